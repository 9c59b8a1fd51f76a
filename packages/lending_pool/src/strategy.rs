use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use crate::{PoolError, Result};

/// Provides the raw storage blocks that a [`LendingPool`][crate::LendingPool] constructs its
/// objects in.
///
/// A strategy turns a slot count into an uninitialized block of memory that can hold exactly that
/// many values of `T`, and takes such blocks back when the pool no longer needs them. The pool
/// never constructs or drops values through the strategy - it only borrows memory.
///
/// The same strategy instance that produced a block is always the one asked to release it.
///
/// # Safety
///
/// The pool writes values into the returned blocks and hands out references to them without any
/// further checks. Implementations must guarantee that every pointer returned by a successful
/// [`allocate::<T>(count)`][Self::allocate] call:
///
/// * is aligned for `T`;
/// * points to a block that is valid for reads and writes of `count` values of `T`;
/// * does not overlap any other block that is still allocated;
/// * stays valid until it is passed to [`deallocate()`][Self::deallocate], even if the strategy
///   value itself is moved in the meantime.
///
/// Zero-sized requests are exempt from the validity requirements but must still return an
/// aligned, non-null pointer.
///
/// Implementing the trait therefore requires `unsafe impl`:
///
/// ```compile_fail
/// use std::ptr::NonNull;
///
/// use lending_pool::{AllocationStrategy, PoolError};
///
/// struct Dangling;
///
/// impl AllocationStrategy for Dangling {
///     fn allocate<T>(&self, _count: usize) -> Result<NonNull<T>, PoolError> {
///         Ok(NonNull::dangling())
///     }
///
///     unsafe fn deallocate<T>(&self, _ptr: NonNull<T>, _count: usize) {}
/// }
/// ```
///
/// # Example
///
/// ```
/// use std::ptr::NonNull;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use lending_pool::{AllocationStrategy, Global, LendingPool, PoolError};
///
/// /// Counts how many slots are currently allocated through it.
/// #[derive(Clone, Debug, Default)]
/// struct Counting {
///     slots: Arc<AtomicUsize>,
/// }
///
/// // SAFETY: Every block comes from `Global`, which upholds the contract; we only count them.
/// unsafe impl AllocationStrategy for Counting {
///     fn allocate<T>(&self, count: usize) -> Result<NonNull<T>, PoolError> {
///         let ptr = Global.allocate(count)?;
///         self.slots.fetch_add(count, Ordering::Relaxed);
///         Ok(ptr)
///     }
///
///     unsafe fn deallocate<T>(&self, ptr: NonNull<T>, count: usize) {
///         self.slots.fetch_sub(count, Ordering::Relaxed);
///         // SAFETY: Forwarding the caller's guarantees to the strategy that made the block.
///         unsafe { Global.deallocate(ptr, count) };
///     }
/// }
///
/// let strategy = Counting::default();
/// let pool = LendingPool::<u64, _>::with_strategy(strategy.clone());
/// pool.reserve(10)?;
/// assert_eq!(strategy.slots.load(Ordering::Relaxed), 10);
/// # Ok::<(), PoolError>(())
/// ```
pub unsafe trait AllocationStrategy {
    /// Allocates uninitialized storage for exactly `count` values of `T`.
    ///
    /// Zero-sized requests (a `count` of zero or a zero-sized `T`) must succeed and may return a
    /// dangling, well-aligned pointer.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::AllocationFailed`] if the storage cannot be obtained and
    /// [`PoolError::CapacityOverflow`] if the requested size cannot be represented.
    fn allocate<T>(&self, count: usize) -> Result<NonNull<T>>;

    /// Releases a block previously obtained from [`allocate()`][Self::allocate].
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` was returned by `self.allocate::<T>(count)` with the
    /// same `count`, that the block has not already been released and that no value inside the
    /// block is still alive.
    unsafe fn deallocate<T>(&self, ptr: NonNull<T>, count: usize);
}

/// The default [`AllocationStrategy`], backed by the Rust global allocator.
///
/// # Example
///
/// ```
/// use lending_pool::{Global, LendingPool};
///
/// // These two are equivalent.
/// let a = LendingPool::<String>::new();
/// let b = LendingPool::<String, Global>::with_strategy(Global);
/// # drop((a, b));
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Global;

// SAFETY: Blocks come from the global allocator with the exact layout of `count` values of `T`
// and stay allocated until deallocate() is called with the same layout. Zero-sized requests get a
// dangling pointer, which is aligned and non-null.
unsafe impl AllocationStrategy for Global {
    fn allocate<T>(&self, count: usize) -> Result<NonNull<T>> {
        let layout =
            Layout::array::<T>(count).map_err(|_layout_error| PoolError::CapacityOverflow)?;

        if layout.size() == 0 {
            return Ok(NonNull::dangling());
        }

        // SAFETY: The layout has a non-zero size, which is the only requirement of `alloc`.
        let ptr = unsafe { alloc(layout) };

        NonNull::new(ptr)
            .map(NonNull::cast::<T>)
            .ok_or(PoolError::AllocationFailed {
                slots: count,
                bytes: layout.size(),
            })
    }

    unsafe fn deallocate<T>(&self, ptr: NonNull<T>, count: usize) {
        // The block was allocated with this exact layout, so it must be representable.
        let Ok(layout) = Layout::array::<T>(count) else {
            return;
        };

        if layout.size() == 0 {
            return;
        }

        // SAFETY: The caller guarantees the block came from `allocate::<T>(count)`, which used
        // this exact layout with the global allocator.
        unsafe {
            dealloc(ptr.as_ptr().cast::<u8>(), layout);
        }
    }
}
