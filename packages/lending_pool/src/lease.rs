use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::{AllocationStrategy, Global, PoolError, PoolState, Result};

/// An object lent out by a [`LendingPool`][crate::LendingPool], or nothing.
///
/// A lease either holds exclusive access to one pooled object or is empty. Empty leases come
/// from acquisitions that found no free object, from [`Lease::empty()`] and from leases whose
/// object was moved out via [`take()`][Self::take] or handed back via [`release()`][Self::release].
/// Check which one you have with [`is_leased()`][Self::is_leased] before dereferencing.
///
/// When a lease that holds an object is dropped, the object goes back to the pool, ready to be
/// acquired again. The object itself is not dropped or reset - the next borrower sees whatever
/// state the previous one left behind.
///
/// A lease keeps the storage of its pool alive, so it remains valid even after the
/// [`LendingPool`][crate::LendingPool] it came from has been dropped.
///
/// # Thread safety
///
/// A lease is [`Send`] if `T` is [`Send`], and [`Sync`] if `T` is [`Send`] and [`Sync`]. It can
/// be dropped on any thread, not only the one that acquired it.
///
/// # Example
///
/// ```rust
/// use lending_pool::LendingPool;
///
/// let pool = LendingPool::with_copies(2, &"idle".to_string())?;
///
/// let mut lease = pool.try_acquire();
/// assert!(lease.is_leased());
///
/// lease.push_str(" no more");
/// assert_eq!(*lease, "idle no more");
/// assert_eq!(pool.size(), 1);
///
/// // Returning the lease makes the object available again, changes included.
/// drop(lease);
/// assert_eq!(pool.size(), 2);
/// assert_eq!(*pool.try_acquire(), "idle no more");
/// # Ok::<(), lending_pool::PoolError>(())
/// ```
pub struct Lease<T, A: AllocationStrategy = Global> {
    slot: Option<LeasedSlot<T, A>>,
}

/// The parts of a lease that holds an object.
struct LeasedSlot<T, A: AllocationStrategy> {
    /// Identifies the slot when handing it back to the pool.
    index: usize,

    /// Address of the object. Stable for as long as the slot is leased.
    ptr: NonNull<T>,

    /// Keeps the storage that `ptr` points into alive.
    state: Arc<PoolState<T, A>>,
}

impl<T, A: AllocationStrategy> Lease<T, A> {
    pub(crate) fn new(index: usize, ptr: NonNull<T>, state: Arc<PoolState<T, A>>) -> Self {
        Self {
            slot: Some(LeasedSlot { index, ptr, state }),
        }
    }

    /// Creates a lease that holds no object.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::Lease;
    ///
    /// let lease = Lease::<u32>::empty();
    /// assert!(lease.is_empty());
    /// ```
    #[must_use]
    pub fn empty() -> Self {
        Self { slot: None }
    }

    /// Whether the lease holds an object.
    #[must_use]
    #[inline]
    pub fn is_leased(&self) -> bool {
        self.slot.is_some()
    }

    /// Whether the lease holds no object.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    /// Returns a shared reference to the leased object.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::EmptyLease`] if the lease holds no object.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::{Lease, LendingPool, PoolError};
    ///
    /// let pool = LendingPool::with_copies(1, &5_u32)?;
    ///
    /// assert_eq!(*pool.try_acquire().get()?, 5);
    /// assert!(matches!(Lease::<u32>::empty().get(), Err(PoolError::EmptyLease)));
    /// # Ok::<(), PoolError>(())
    /// ```
    pub fn get(&self) -> Result<&T> {
        let slot = self.slot.as_ref().ok_or(PoolError::EmptyLease)?;

        // SAFETY: The slot is leased to us, so nobody else accesses the object, and our strong
        // reference to the pool state keeps the storage (and thus the object) alive. The storage
        // never moves leased objects.
        Ok(unsafe { slot.ptr.as_ref() })
    }

    /// Returns an exclusive reference to the leased object.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::EmptyLease`] if the lease holds no object.
    pub fn get_mut(&mut self) -> Result<&mut T> {
        let slot = self.slot.as_mut().ok_or(PoolError::EmptyLease)?;

        // SAFETY: As in get(), plus we hold an exclusive reference to the only lease on the slot.
        Ok(unsafe { slot.ptr.as_mut() })
    }

    /// Moves the leased object (if any) into a new lease, leaving this one empty.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::LendingPool;
    ///
    /// let pool = LendingPool::with_copies(1, &1_u8)?;
    ///
    /// let mut first = pool.try_acquire();
    /// let second = first.take();
    ///
    /// assert!(first.is_empty());
    /// assert!(second.is_leased());
    /// assert_eq!(pool.size(), 0);
    /// # Ok::<(), lending_pool::PoolError>(())
    /// ```
    #[must_use]
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Hands the leased object (if any) back to the pool, leaving this lease empty.
    ///
    /// This is what happens when a lease is dropped or overwritten; calling it explicitly is only
    /// needed to give the object back before the lease goes out of scope.
    pub fn release(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.state.release(slot.index);
        }
    }

    /// The index of the pool slot that holds the leased object, if any.
    ///
    /// Two leases that exist at the same time never share a slot index.
    #[must_use]
    pub fn slot_index(&self) -> Option<usize> {
        self.slot.as_ref().map(|slot| slot.index)
    }
}

impl<T, A: AllocationStrategy> Default for Lease<T, A> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T, A: AllocationStrategy> Deref for Lease<T, A> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the lease holds no object. Use [`Lease::get()`] for a non-panicking variant.
    #[inline]
    fn deref(&self) -> &Self::Target {
        match self.get() {
            Ok(value) => value,
            Err(error) => panic!("cannot dereference lease: {error}"),
        }
    }
}

impl<T, A: AllocationStrategy> DerefMut for Lease<T, A> {
    /// # Panics
    ///
    /// Panics if the lease holds no object. Use [`Lease::get_mut()`] for a non-panicking variant.
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.get_mut() {
            Ok(value) => value,
            Err(error) => panic!("cannot dereference lease: {error}"),
        }
    }
}

impl<T, A: AllocationStrategy> Drop for Lease<T, A> {
    fn drop(&mut self) {
        self.release();
    }
}

// SAFETY: The lease grants exclusive access to the object, so moving it to another thread is
// sound if T is Send. The pool state is only touched through its mutex-guarded methods, which
// require SlotStorage<T, A>: Send, i.e. T: Send and A: Send.
unsafe impl<T: Send, A: AllocationStrategy + Send> Send for Lease<T, A> {}

// SAFETY: A shared lease only hands out shared references to the object, which is sound to do
// from many threads if T is Sync. Releasing needs &mut self, so it never happens concurrently.
unsafe impl<T: Send + Sync, A: AllocationStrategy + Send> Sync for Lease<T, A> {}

impl<T: fmt::Debug, A: AllocationStrategy> fmt::Debug for Lease<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Ok(value) => f
                .debug_struct("Lease")
                .field("slot_index", &self.slot_index())
                .field("value", value)
                .finish(),
            Err(_) => f.write_str("Lease(empty)"),
        }
    }
}
