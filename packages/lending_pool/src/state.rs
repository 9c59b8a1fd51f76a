use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::constants::ERR_POISONED_LOCK;
use crate::{AllocationStrategy, Lease, PoolError, Result, SlotStorage};

/// The shared state behind a [`LendingPool`][crate::LendingPool] and all its leases.
///
/// The pool holds one strong reference and every lease holds another, so the storage is torn down
/// only after the pool and the last lease are both gone.
///
/// # Locks
///
/// * `storage` guards the slots, the counts and the free list. It is only ever held briefly and
///   never across a blocking wait.
/// * `acquisition` guards the wait coordination. A waiter holds it while checking for a free slot
///   and taking one. Anyone who makes a slot available takes it briefly before notifying, which
///   orders the notification after any in-progress check so a waiter can never miss a wake-up.
///
/// Lock order is `acquisition` then `storage`. Notifiers release `storage` before touching
/// `acquisition`.
pub(crate) struct PoolState<T, A: AllocationStrategy> {
    storage: Mutex<SlotStorage<T, A>>,

    acquisition: Mutex<()>,

    /// Signaled whenever a slot may have become free.
    available: Condvar,
}

impl<T, A: AllocationStrategy> PoolState<T, A> {
    pub(crate) fn new(storage: SlotStorage<T, A>) -> Self {
        Self {
            storage: Mutex::new(storage),
            acquisition: Mutex::new(()),
            available: Condvar::new(),
        }
    }

    pub(crate) fn storage(&self) -> MutexGuard<'_, SlotStorage<T, A>> {
        self.storage.lock().expect(ERR_POISONED_LOCK)
    }

    /// Leases a free slot if there is one. Never waits for a slot to become free.
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Lease<T, A> {
        let slot = self.storage().pop_free();

        match slot {
            Some((index, ptr)) => Lease::new(index, ptr, Arc::clone(self)),
            None => Lease::empty(),
        }
    }

    /// Leases a free slot, waiting for one to become free if necessary.
    ///
    /// A zero `timeout` waits without a time limit. Otherwise, returns an empty lease once the
    /// timeout has elapsed without a slot becoming available.
    #[cfg_attr(test, mutants::skip)] // Mutations can turn this into an endless wait.
    pub(crate) fn acquire_wait(self: &Arc<Self>, timeout: Duration) -> Lease<T, A> {
        // An unrepresentable deadline is as good as no deadline at all.
        let deadline = if timeout.is_zero() {
            None
        } else {
            Instant::now().checked_add(timeout)
        };

        let mut waiting = self.acquisition.lock().expect(ERR_POISONED_LOCK);

        loop {
            let slot = self.storage().pop_free();

            if let Some((index, ptr)) = slot {
                drop(waiting);

                // If there is more to go around, pass the baton to the next waiter.
                if self.storage().free_count() > 0 {
                    self.available.notify_one();
                }

                return Lease::new(index, ptr, Arc::clone(self));
            }

            // Loop around to absorb spurious wake-ups and slots taken by non-waiting acquirers.
            waiting = match deadline {
                None => self.available.wait(waiting).expect(ERR_POISONED_LOCK),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());

                    if remaining.is_zero() {
                        trace!(?timeout, "timed out waiting for a pooled object");
                        return Lease::empty();
                    }

                    self.available
                        .wait_timeout(waiting, remaining)
                        .expect(ERR_POISONED_LOCK)
                        .0
                }
            };
        }
    }

    /// Leases a free slot if there is one, otherwise constructs a new value and leases that.
    ///
    /// The value is constructed without holding any lock, so `make` is free to use the pool.
    pub(crate) fn acquire_or_insert_with<F>(self: &Arc<Self>, make: F) -> Result<Lease<T, A>>
    where
        F: FnOnce() -> T,
    {
        let lease = self.try_acquire();

        if lease.is_leased() {
            return Ok(lease);
        }

        let value = make();

        let (index, ptr) = self.storage().append_leased(value)?;

        trace!(index, "leased newly constructed pooled object");

        Ok(Lease::new(index, ptr, Arc::clone(self)))
    }

    pub(crate) fn push(&self, value: T) -> Result<()> {
        self.storage().append(value)?;
        self.notify_available(false);
        Ok(())
    }

    /// Changes the number of objects to `new_count`.
    ///
    /// New objects are constructed and surplus objects are dropped without any lock held, so
    /// a panic in `fill` or in a destructor leaves the pool usable.
    pub(crate) fn resize_with<F>(&self, new_count: usize, mut fill: F) -> Result<()>
    where
        F: FnMut() -> T,
    {
        let mut values = Vec::new();

        loop {
            let mut storage = self.storage();
            let live_count = storage.live_count();

            if new_count <= live_count {
                let removed = storage.truncate(new_count)?;
                drop(storage);

                drop(removed);
                return Ok(());
            }

            // Cannot underflow: checked above.
            let missing = new_count.wrapping_sub(live_count);

            if values.len() >= missing {
                storage.extend(new_count, &mut values)?;
                drop(storage);

                self.notify_available(true);

                // Leftovers from a concurrent growth are dropped on the way out.
                return Ok(());
            }

            drop(storage);

            // Another thread may change the count meanwhile, so we check again afterwards.
            while values.len() < missing {
                values.push(fill());
            }
        }
    }

    pub(crate) fn reserve(&self, new_capacity: usize) -> Result<()> {
        self.storage().reserve(new_capacity)
    }

    /// Returns a slot to the free list. Called exclusively when a lease lets go of its slot.
    pub(crate) fn release(&self, index: usize) {
        self.storage().release(index);
        self.notify_available(false);
    }

    /// Creates independent storage with clones of every object, in the same free list order.
    ///
    /// The objects are checked out of the pool while they are cloned, so `T::clone()` runs
    /// without any lock held and nobody can lease or mutate them meanwhile.
    pub(crate) fn duplicate(&self) -> Result<SlotStorage<T, A>>
    where
        T: Clone,
        A: Clone,
    {
        let (checkout, capacity, strategy) = {
            let mut storage = self.storage();
            let leased = storage.leased_count();

            if leased > 0 {
                return Err(PoolError::InUse { leased });
            }

            let capacity = storage.capacity();
            let strategy = storage.strategy().clone();

            let checkout = CheckOut {
                state: self,
                slots: storage.check_out_free(),
            };

            (checkout, capacity, strategy)
        };

        let mut by_index = checkout.slots.clone();
        by_index.sort_unstable_by_key(|&(index, _)| index);

        let values = by_index
            .iter()
            .map(|(_, ptr)| {
                // SAFETY: The slot is checked out to us, which makes us its only user, and the
                // storage does not move checked out slots.
                unsafe { ptr.as_ref() }.clone()
            })
            .collect::<Vec<_>>();

        let free_order = checkout
            .slots
            .iter()
            .map(|&(index, _)| index)
            .collect::<Vec<_>>();

        drop(checkout);

        SlotStorage::from_parts(strategy, capacity, values, &free_order)
    }

    fn notify_available(&self, all: bool) {
        // Any waiter is either before its check (and will see the new slot) or already waiting.
        drop(self.acquisition.lock().expect(ERR_POISONED_LOCK));

        if all {
            self.available.notify_all();
        } else {
            self.available.notify_one();
        }
    }
}

/// Slots taken off the free list while their objects are being cloned.
///
/// Hands the slots back when dropped, also when cloning panics.
struct CheckOut<'a, T, A: AllocationStrategy> {
    state: &'a PoolState<T, A>,
    slots: Vec<(usize, NonNull<T>)>,
}

impl<T, A: AllocationStrategy> Drop for CheckOut<'_, T, A> {
    fn drop(&mut self) {
        self.state
            .storage()
            .check_in(self.slots.iter().map(|&(index, _)| index));

        self.state.notify_available(true);
    }
}

impl<T, A: AllocationStrategy + fmt::Debug> fmt::Debug for PoolState<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolState")
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::thread;

    use super::*;
    use crate::Global;

    fn state_with(values: &[u32]) -> Arc<PoolState<u32, Global>> {
        let mut storage = SlotStorage::new(Global);

        for &value in values {
            storage.append(value).unwrap();
        }

        Arc::new(PoolState::new(storage))
    }

    #[test]
    fn try_acquire_from_empty_is_empty() {
        let state = state_with(&[]);

        assert!(!state.try_acquire().is_leased());
        assert_eq!(state.storage().live_count(), 0);
    }

    #[test]
    fn lease_holds_strong_reference() {
        let state = state_with(&[1]);

        let lease = state.try_acquire();
        assert_eq!(Arc::strong_count(&state), 2);

        drop(lease);
        assert_eq!(Arc::strong_count(&state), 1);
        assert_eq!(state.storage().free_count(), 1);
    }

    #[test]
    fn timed_wait_on_exhausted_state_times_out() {
        let state = state_with(&[]);
        let timeout = Duration::from_millis(50);

        let started = Instant::now();
        let lease = state.acquire_wait(timeout);

        assert!(!lease.is_leased());
        assert!(started.elapsed() >= timeout);
        assert_eq!(state.storage().free_count(), 0);
    }

    #[test]
    fn wait_is_woken_by_push() {
        let state = state_with(&[]);

        let waiter = thread::spawn({
            let state = Arc::clone(&state);
            move || *state.acquire_wait(Duration::ZERO)
        });

        thread::sleep(Duration::from_millis(20));
        state.push(77).unwrap();

        assert_eq!(waiter.join().unwrap(), 77);
    }

    #[test]
    fn resize_wakes_every_waiter() {
        let state = state_with(&[]);

        let waiters = (0..3)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    let lease = state.acquire_wait(Duration::from_secs(10));
                    assert!(lease.is_leased());
                    // Keep the lease until all waiters are served.
                    thread::sleep(Duration::from_millis(50));
                })
            })
            .collect::<Vec<_>>();

        thread::sleep(Duration::from_millis(20));
        state.resize_with(3, || 5).unwrap();

        for waiter in waiters {
            waiter.join().unwrap();
        }

        assert_eq!(state.storage().free_count(), 3);
    }

    #[test]
    fn acquire_or_insert_prefers_free_slot() {
        let state = state_with(&[10]);

        let lease = state.acquire_or_insert_with(|| 20).unwrap();
        assert_eq!(*lease, 10);
        assert_eq!(state.storage().live_count(), 1);

        let second = state.acquire_or_insert_with(|| 20).unwrap();
        assert_eq!(*second, 20);
        assert_eq!(state.storage().live_count(), 2);
    }

    #[test]
    fn resize_rechecks_count_after_filling() {
        let state = state_with(&[]);

        // Every call grows the pool behind the back of the resize.
        state
            .resize_with(3, || {
                state.push(1).unwrap();
                0
            })
            .unwrap();

        let storage = state.storage();
        assert_eq!(storage.live_count(), 3);
        assert_eq!(storage.free_count(), 3);
    }

    #[test]
    fn duplicate_keeps_order_and_returns_slots() {
        let state = state_with(&[1, 2, 3]);

        // Shuffle the free list to slot order 1, 2, 0 (top last).
        let first = state.try_acquire();
        let second = state.try_acquire();
        let third = state.try_acquire();
        drop(second);
        drop(first);
        drop(third);

        let copy = Arc::new(PoolState::new(state.duplicate().unwrap()));

        assert_eq!(state.storage().free_count(), 3);
        assert_eq!(copy.storage().capacity(), state.storage().capacity());

        let originals = (0..3).map(|_| state.try_acquire()).collect::<Vec<_>>();
        let copies = (0..3).map(|_| copy.try_acquire()).collect::<Vec<_>>();

        let original_values = originals.iter().map(|lease| **lease).collect::<Vec<_>>();
        let copied_values = copies.iter().map(|lease| **lease).collect::<Vec<_>>();

        assert_eq!(original_values, [1, 3, 2]);
        assert_eq!(copied_values, original_values);
    }

    #[test]
    fn duplicate_rejects_state_in_use() {
        let state = state_with(&[1]);
        let _lease = state.try_acquire();

        assert!(matches!(
            state.duplicate(),
            Err(PoolError::InUse { leased: 1 })
        ));
    }
}
