use std::fmt;
use std::marker::PhantomData;

use crate::{AllocationStrategy, Global, LendingPool, PoolState, Result, SlotStorage};

/// Builder for creating an instance of [`LendingPool`].
///
/// You only need to use this builder if you want to customize the pool configuration.
/// The shorthand constructors on [`LendingPool`] cover the common cases.
///
/// # Examples
///
/// ```
/// use lending_pool::{Global, LendingPool};
///
/// let pool = LendingPool::<String>::builder()
///     .initial_capacity(64)
///     .allocation_strategy(Global)
///     .build()?;
///
/// assert_eq!(pool.capacity(), 64);
/// assert_eq!(pool.size(), 0);
/// # Ok::<(), lending_pool::PoolError>(())
/// ```
#[must_use]
pub struct LendingPoolBuilder<T, A = Global> {
    initial_capacity: usize,
    strategy: A,

    _item: PhantomData<T>,
}

impl<T, A: fmt::Debug> fmt::Debug for LendingPoolBuilder<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LendingPoolBuilder")
            .field(
                "item_type",
                &std::format_args!("{}", std::any::type_name::<T>()),
            )
            .field("initial_capacity", &self.initial_capacity)
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl<T> LendingPoolBuilder<T, Global> {
    pub(crate) fn new() -> Self {
        Self {
            initial_capacity: 0,
            strategy: Global,
            _item: PhantomData,
        }
    }
}

impl<T, A: AllocationStrategy> LendingPoolBuilder<T, A> {
    /// Sets the number of slots to allocate up front, without constructing any objects in them.
    ///
    /// Defaults to zero, in which case the pool allocates nothing until the first object arrives.
    ///
    /// # Examples
    ///
    /// ```
    /// use lending_pool::LendingPool;
    ///
    /// let pool = LendingPool::<u64>::builder().initial_capacity(10).build()?;
    ///
    /// assert_eq!(pool.capacity(), 10);
    /// assert!(pool.is_empty());
    /// # Ok::<(), lending_pool::PoolError>(())
    /// ```
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Sets the [allocation strategy][AllocationStrategy] that provides the storage of the pool.
    ///
    /// Defaults to [`Global`].
    pub fn allocation_strategy<B: AllocationStrategy>(self, strategy: B) -> LendingPoolBuilder<T, B> {
        LendingPoolBuilder {
            initial_capacity: self.initial_capacity,
            strategy,
            _item: PhantomData,
        }
    }

    /// Builds a pool with no objects in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial capacity cannot be allocated.
    pub fn build(self) -> Result<LendingPool<T, A>> {
        self.build_with(0, || unreachable!("no objects are constructed for an empty pool"))
    }

    /// Builds a pool that starts out with `count` objects, each constructed by calling `make`.
    ///
    /// The capacity of the pool is the larger of `count` and the configured initial capacity.
    /// All the objects are free to be acquired.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage for the objects cannot be allocated.
    ///
    /// # Examples
    ///
    /// ```
    /// use lending_pool::LendingPool;
    ///
    /// let mut next = 0;
    /// let pool = LendingPool::builder().build_with(3, || {
    ///     next += 1;
    ///     next
    /// })?;
    ///
    /// assert_eq!(pool.size(), 3);
    /// assert_eq!(pool.capacity(), 3);
    ///
    /// // The most recently added object is lent out first.
    /// assert_eq!(*pool.try_acquire(), 3);
    /// # Ok::<(), lending_pool::PoolError>(())
    /// ```
    pub fn build_with<F>(self, count: usize, make: F) -> Result<LendingPool<T, A>>
    where
        F: FnMut() -> T,
    {
        let mut storage = SlotStorage::new(self.strategy);
        storage.reserve(self.initial_capacity.max(count))?;
        storage.resize_with(count, make)?;

        Ok(LendingPool::from_state(PoolState::new(storage)))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::test_support::{Budgeted, Counting};
    use crate::PoolError;

    #[test]
    fn default_builder_allocates_nothing() {
        let strategy = Counting::default();

        let pool = LendingPool::<u32>::builder()
            .allocation_strategy(strategy.clone())
            .build()
            .unwrap();

        assert_eq!(pool.capacity(), 0);
        assert_eq!(strategy.allocations(), 0);
    }

    #[test]
    fn initial_capacity_is_allocated_once() {
        let strategy = Counting::default();

        let pool = LendingPool::<u32>::builder()
            .allocation_strategy(strategy.clone())
            .initial_capacity(8)
            .build_with(3, || 1)
            .unwrap();

        assert_eq!(pool.capacity(), 8);
        assert_eq!(pool.size(), 3);
        assert_eq!(strategy.allocations(), 1);
        assert_eq!(strategy.outstanding_slots(), 8);

        drop(pool);
        assert_eq!(strategy.outstanding_slots(), 0);
    }

    #[test]
    fn allocation_failure_is_propagated() {
        let result = LendingPool::<u64>::builder()
            .allocation_strategy(Budgeted::new(16))
            .build_with(100, || 0);

        assert!(matches!(result, Err(PoolError::AllocationFailed { .. })));
    }

    #[test]
    fn debug_names_item_type() {
        let builder = LendingPool::<String>::builder().initial_capacity(2);

        let output = format!("{builder:?}");
        assert!(output.contains("String"));
        assert!(output.contains("initial_capacity: 2"));
    }
}
