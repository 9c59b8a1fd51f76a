use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::{AllocationStrategy, Global, Lease, LendingPoolBuilder, PoolState, Result, SlotStorage};

/// Pass to [`LendingPool::acquire_wait()`] to wait for an object without a time limit.
pub const WAIT_FOREVER: Duration = Duration::ZERO;

/// A thread-safe pool of reusable objects of type `T`.
///
/// The pool constructs objects up front (or whenever you add them) and lends them out as
/// [`Lease`]s. Dropping a lease hands the object back to the pool so the next caller can reuse it
/// instead of constructing a new one. Objects are neither dropped nor reset between leases.
///
/// # Acquiring objects
///
/// * [`try_acquire()`][Self::try_acquire] - returns immediately, with an empty lease if no object
///   is free.
/// * [`acquire_wait()`][Self::acquire_wait] - waits until an object is free or a timeout elapses.
/// * [`acquire_or_insert_with()`][Self::acquire_or_insert_with] - constructs and adds a new
///   object if none is free, so it always succeeds unless storage cannot be allocated.
///
/// The most recently returned object is lent out first.
///
/// # Resource usage
///
/// Objects live in storage obtained from the pool's [`AllocationStrategy`]. The storage grows as
/// objects are added and is released when both the pool and every lease from it have been
/// dropped - leases remain usable after the pool itself is gone.
///
/// Objects never move while they are lent out, so growing the pool never invalidates a lease.
///
/// # Thread safety
///
/// All methods take `&self` and may be called concurrently from any number of threads. Share the
/// pool by reference (e.g. with scoped threads) or wrap it in an [`Arc`].
///
/// # Example
///
/// ```rust
/// use lending_pool::LendingPool;
///
/// let pool = LendingPool::with_copies(5, &10_i32)?;
///
/// let lease = pool.try_acquire();
/// assert!(lease.is_leased());
/// assert_eq!(*lease, 10);
/// assert_eq!(pool.size(), 4);
/// assert!(pool.in_use());
///
/// drop(lease);
/// assert_eq!(pool.size(), 5);
/// assert!(!pool.in_use());
/// # Ok::<(), lending_pool::PoolError>(())
/// ```
pub struct LendingPool<T, A: AllocationStrategy = Global> {
    state: Arc<PoolState<T, A>>,
}

impl<T> LendingPool<T, Global> {
    /// Creates an empty pool that uses the global allocator.
    ///
    /// No storage is allocated until the first object is added.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::LendingPool;
    ///
    /// let pool = LendingPool::<String>::new();
    ///
    /// assert_eq!(pool.size(), 0);
    /// assert_eq!(pool.capacity(), 0);
    /// assert!(!pool.try_acquire().is_leased());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::with_strategy(Global)
    }

    /// Starts building a new [`LendingPool`].
    ///
    /// Use this when you want to customize the pool configuration beyond the defaults.
    pub fn builder() -> LendingPoolBuilder<T, Global> {
        LendingPoolBuilder::new()
    }

    /// Creates a pool holding `count` clones of `value`, all free to be acquired.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage for the objects cannot be allocated.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::LendingPool;
    ///
    /// let pool = LendingPool::with_copies(3, &"Hello World!".to_string())?;
    ///
    /// assert_eq!(pool.size(), 3);
    /// assert_eq!(pool.capacity(), 3);
    /// # Ok::<(), lending_pool::PoolError>(())
    /// ```
    pub fn with_copies(count: usize, value: &T) -> Result<Self>
    where
        T: Clone,
    {
        Self::builder().build_with(count, || value.clone())
    }

    /// Creates a pool holding `count` default-constructed objects, all free to be acquired.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage for the objects cannot be allocated.
    pub fn with_defaults(count: usize) -> Result<Self>
    where
        T: Default,
    {
        Self::builder().build_with(count, T::default)
    }
}

impl<T, A: AllocationStrategy> LendingPool<T, A> {
    /// Creates an empty pool whose storage is provided by `strategy`.
    ///
    /// No storage is allocated until the first object is added.
    #[must_use]
    pub fn with_strategy(strategy: A) -> Self {
        Self::from_state(PoolState::new(SlotStorage::new(strategy)))
    }

    pub(crate) fn from_state(state: PoolState<T, A>) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Leases a free object if there is one.
    ///
    /// Never waits for an object to be returned. If no object is free, the returned lease is
    /// empty and the pool is unchanged.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::LendingPool;
    ///
    /// let pool: LendingPool<i32> = LendingPool::new();
    /// assert!(pool.try_acquire().is_empty());
    ///
    /// pool.push(10)?;
    /// assert_eq!(*pool.try_acquire(), 10);
    /// # Ok::<(), lending_pool::PoolError>(())
    /// ```
    #[must_use]
    pub fn try_acquire(&self) -> Lease<T, A> {
        self.state.try_acquire()
    }

    /// Leases a free object, waiting for one to become available if necessary.
    ///
    /// Objects become available when a lease is dropped or when objects are added to the pool via
    /// [`push()`][Self::push], [`emplace_with()`][Self::emplace_with] or a growing
    /// [`resize()`][Self::resize].
    ///
    /// A `timeout` of [`WAIT_FOREVER`] (zero) waits without a time limit. Any other timeout
    /// returns an empty lease once it has elapsed without an object becoming available; a timed
    /// out call leaves the pool unchanged. To check for a free object without waiting at all, use
    /// [`try_acquire()`][Self::try_acquire].
    ///
    /// There is no fairness guarantee between multiple waiting threads.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::thread;
    /// use std::time::Duration;
    ///
    /// use lending_pool::{LendingPool, WAIT_FOREVER};
    ///
    /// let pool = LendingPool::<u32>::new();
    ///
    /// assert!(pool.acquire_wait(Duration::from_millis(10)).is_empty());
    ///
    /// thread::scope(|s| {
    ///     s.spawn(|| pool.push(42));
    ///
    ///     assert_eq!(*pool.acquire_wait(WAIT_FOREVER), 42);
    /// });
    /// ```
    #[must_use]
    pub fn acquire_wait(&self, timeout: Duration) -> Lease<T, A> {
        self.state.acquire_wait(timeout)
    }

    /// Leases a free object if there is one, otherwise adds an object constructed by `make` to
    /// the pool and leases that.
    ///
    /// `make` is only called if no object is free. It runs without any pool lock held.
    ///
    /// # Errors
    ///
    /// Returns an error if a new object is needed and storage for it cannot be allocated.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::LendingPool;
    ///
    /// let pool = LendingPool::with_copies(1, &"Hello World".to_string())?;
    ///
    /// let first = pool.acquire_or_insert_with(|| "fresh".to_string())?;
    /// let second = pool.acquire_or_insert_with(|| "fresh".to_string())?;
    ///
    /// assert_eq!(*first, "Hello World");
    /// assert_eq!(*second, "fresh");
    /// assert_eq!(pool.size(), 0);
    ///
    /// drop((first, second));
    /// assert_eq!(pool.size(), 2);
    /// # Ok::<(), lending_pool::PoolError>(())
    /// ```
    pub fn acquire_or_insert_with<F>(&self, make: F) -> Result<Lease<T, A>>
    where
        F: FnOnce() -> T,
    {
        self.state.acquire_or_insert_with(make)
    }

    /// Leases a free object if there is one, otherwise adds a default-constructed object to the
    /// pool and leases that.
    ///
    /// # Errors
    ///
    /// Returns an error if a new object is needed and storage for it cannot be allocated.
    pub fn acquire_or_default(&self) -> Result<Lease<T, A>>
    where
        T: Default,
    {
        self.acquire_or_insert_with(T::default)
    }

    /// Adds an object to the pool, making it available for acquisition.
    ///
    /// Grows the storage if it is full, waking one waiting acquirer afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage needs to grow and cannot be allocated. The value is
    /// dropped in that case.
    pub fn push(&self, value: T) -> Result<()> {
        self.state.push(value)
    }

    /// Adds an object constructed by `make` to the pool.
    ///
    /// `make` runs before any pool lock is taken.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage needs to grow and cannot be allocated.
    pub fn emplace_with<F>(&self, make: F) -> Result<()>
    where
        F: FnOnce() -> T,
    {
        self.push(make())
    }

    /// Changes the number of objects managed by the pool to `count`.
    ///
    /// Growing adds clones of `value` (see [`resize_with()`][Self::resize_with] for details).
    ///
    /// # Errors
    ///
    /// See [`resize_with()`][Self::resize_with].
    pub fn resize(&self, count: usize, value: T) -> Result<()>
    where
        T: Clone,
    {
        self.resize_with(count, || value.clone())
    }

    /// Changes the number of objects managed by the pool to `count`.
    ///
    /// Growing adds default-constructed objects (see [`resize_with()`][Self::resize_with] for
    /// details).
    ///
    /// # Errors
    ///
    /// See [`resize_with()`][Self::resize_with].
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::LendingPool;
    ///
    /// let pool = LendingPool::<String>::new();
    ///
    /// pool.resize_default(3)?;
    /// assert_eq!(pool.size(), 3);
    /// assert_eq!(*pool.try_acquire(), "");
    /// # Ok::<(), lending_pool::PoolError>(())
    /// ```
    pub fn resize_default(&self, count: usize) -> Result<()>
    where
        T: Default,
    {
        self.resize_with(count, T::default)
    }

    /// Changes the number of objects managed by the pool to `count`.
    ///
    /// If `count` is larger than [`live_count()`][Self::live_count], objects constructed by `fill`
    /// are added (growing the capacity to exactly `count` if needed) and all waiting acquirers are
    /// woken. If it is smaller, the most recently added objects beyond `count` are dropped.
    ///
    /// Objects are constructed by `fill` and dropped without any pool lock held, so `fill` may use
    /// the pool and a panic in `fill` or in a destructor leaves the pool intact. If another thread
    /// changes the object count meanwhile, `fill` may be called more often than the difference
    /// requires and the extra objects are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ShrinkBelowLeased`][crate::PoolError::ShrinkBelowLeased] without
    /// changing anything if any object that would be dropped is currently leased. Returns an
    /// allocation error if the storage needs to grow and cannot be allocated.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::{LendingPool, PoolError};
    ///
    /// let pool = LendingPool::with_copies(5, &0_u8)?;
    ///
    /// pool.resize_with(2, Default::default)?;
    /// assert_eq!(pool.size(), 2);
    /// assert_eq!(pool.capacity(), 5);
    ///
    /// // The most recently added object is leased first, so this shrink would destroy it.
    /// let lease = pool.try_acquire();
    /// assert!(matches!(
    ///     pool.resize_with(1, Default::default),
    ///     Err(PoolError::ShrinkBelowLeased { .. })
    /// ));
    /// # drop(lease);
    /// # Ok::<(), PoolError>(())
    /// ```
    pub fn resize_with<F>(&self, count: usize, fill: F) -> Result<()>
    where
        F: FnMut() -> T,
    {
        self.state.resize_with(count, fill)
    }

    /// Ensures the pool can hold at least `new_capacity` objects without allocating.
    ///
    /// Unlike [`Vec::reserve()`], the argument is the total capacity, not an additional amount.
    /// If `new_capacity` is larger than the current capacity, the capacity becomes exactly
    /// `new_capacity`; otherwise nothing happens. No objects are constructed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be allocated.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::LendingPool;
    ///
    /// let pool = LendingPool::<String>::new();
    ///
    /// pool.reserve(10)?;
    /// assert_eq!(pool.capacity(), 10);
    /// assert_eq!(pool.size(), 0);
    ///
    /// pool.reserve(5)?;
    /// assert_eq!(pool.capacity(), 10);
    /// # Ok::<(), lending_pool::PoolError>(())
    /// ```
    pub fn reserve(&self, new_capacity: usize) -> Result<()> {
        self.state.reserve(new_capacity)
    }

    /// The number of objects that are free to be acquired.
    ///
    /// This operation may block if another thread is currently accessing the pool.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.storage().free_count()
    }

    /// The number of objects the pool can hold without allocating more storage.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.storage().capacity()
    }

    /// Whether no object is free to be acquired, i.e. whether [`size()`][Self::size] is zero.
    ///
    /// An empty pool may still manage objects that are currently leased.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether at least one object is free to be acquired.
    #[must_use]
    pub fn has_available(&self) -> bool {
        self.size() > 0
    }

    /// Whether any object of the pool is currently leased.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.leased_count() > 0
    }

    /// The number of objects managed by the pool, free or leased.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.state.storage().live_count()
    }

    /// The number of objects currently leased.
    #[must_use]
    pub fn leased_count(&self) -> usize {
        self.state.storage().leased_count()
    }

    /// Returns a copy of the allocation strategy that provides the storage of the pool.
    #[must_use]
    pub fn allocation_strategy(&self) -> A
    where
        A: Clone,
    {
        self.state.storage().strategy().clone()
    }

    /// Creates an independent pool with clones of every object in this one.
    ///
    /// The new pool has the same capacity and lends out its objects in the same order.
    ///
    /// While the objects are being cloned they are unavailable to acquirers of this pool.
    /// `T::clone()` runs without any pool lock held.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InUse`][crate::PoolError::InUse] if any object of this pool is leased,
    /// or an allocation error if storage for the copy cannot be allocated.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::{LendingPool, PoolError};
    ///
    /// let pool = LendingPool::with_copies(2, &7_u32)?;
    /// let copy = pool.try_clone()?;
    /// assert_eq!(copy.size(), 2);
    ///
    /// let lease = pool.try_acquire();
    /// assert!(matches!(pool.try_clone(), Err(PoolError::InUse { leased: 1 })));
    /// # drop(lease);
    /// # Ok::<(), PoolError>(())
    /// ```
    pub fn try_clone(&self) -> Result<Self>
    where
        T: Clone,
        A: Clone,
    {
        let storage = self.state.duplicate()?;

        Ok(Self::from_state(PoolState::new(storage)))
    }
}

impl<T, A: AllocationStrategy + fmt::Debug> fmt::Debug for LendingPool<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LendingPool")
            .field("state", &self.state)
            .finish()
    }
}

impl<T> Default for LendingPool<T, Global> {
    fn default() -> Self {
        Self::new()
    }
}
