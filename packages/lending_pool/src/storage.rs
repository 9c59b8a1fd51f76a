use std::cmp::Ordering;
use std::fmt;
use std::ptr::{self, NonNull};

use tracing::debug;

use crate::constants::FIRST_GROWTH_CAPACITY;
use crate::{AllocationStrategy, PoolError, Result};

/// The storage engine of a pool: constructed objects in slots addressed by a global index, plus a
/// LIFO stack of the slots that are constructed but not lent out.
///
/// Every slot is in exactly one of three states:
///
/// * uninitialized - `index >= live_count`, no value present;
/// * free - a value is present and the index is on `free_slots`;
/// * leased - a value is present and exactly one lease refers to it.
///
/// # Growth
///
/// Slot indices never change. Values only move when nobody can observe it: if no slot is leased,
/// growth consolidates all blocks into one contiguous block, relocating the values. If any slot is
/// leased, growth appends a new block after the existing ones instead, so the addresses that
/// outstanding leases hold stay valid.
///
/// # Out of band access
///
/// The storage never creates references to leased slots. The owner of a leased slot may access it
/// through the pointer returned on acquisition until the slot is handed back via `release()`.
pub(crate) struct SlotStorage<T, A: AllocationStrategy> {
    /// Storage blocks ordered by the index range they cover. Together they cover `0..capacity`
    /// without gaps.
    blocks: Vec<Block<T>>,

    /// Slots `0..live_count` hold constructed values.
    live_count: usize,

    capacity: usize,

    /// Indices of constructed slots that are not leased. The most recently released slot is
    /// handed out first.
    free_slots: Vec<usize>,

    strategy: A,
}

/// One contiguous block of slots obtained from the allocation strategy.
struct Block<T> {
    ptr: NonNull<T>,

    /// Global index of the first slot in the block.
    start: usize,

    len: usize,
}

impl<T> Block<T> {
    fn end(&self) -> usize {
        // Cannot overflow because the end of the last block is the pool capacity.
        self.start.wrapping_add(self.len)
    }
}

impl<T, A: AllocationStrategy> SlotStorage<T, A> {
    pub(crate) fn new(strategy: A) -> Self {
        Self {
            blocks: Vec::new(),
            live_count: 0,
            capacity: 0,
            free_slots: Vec::new(),
            strategy,
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live_count
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free_slots.len()
    }

    pub(crate) fn leased_count(&self) -> usize {
        // Cannot underflow: every free slot is also a live slot.
        self.live_count.wrapping_sub(self.free_slots.len())
    }

    pub(crate) fn strategy(&self) -> &A {
        &self.strategy
    }

    /// Grows the capacity to exactly `new_capacity` if it is currently smaller.
    pub(crate) fn reserve(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity > self.capacity {
            self.grow(new_capacity)
        } else {
            Ok(())
        }
    }

    /// Constructs `value` in a new slot and puts the slot on the free list.
    pub(crate) fn append(&mut self, value: T) -> Result<()> {
        let index = self.construct_next(value)?;
        self.free_slots.push(index);
        Ok(())
    }

    /// Constructs `value` in a new slot that is immediately leased to the caller.
    pub(crate) fn append_leased(&mut self, value: T) -> Result<(usize, NonNull<T>)> {
        let index = self.construct_next(value)?;
        Ok((index, self.slot_ptr(index)))
    }

    /// Takes the most recently freed slot off the free list.
    pub(crate) fn pop_free(&mut self) -> Option<(usize, NonNull<T>)> {
        let index = self.free_slots.pop()?;
        Some((index, self.slot_ptr(index)))
    }

    /// Returns a leased slot to the free list.
    ///
    /// Never allocates: the free list always has room for every live slot.
    pub(crate) fn release(&mut self, index: usize) {
        debug_assert!(
            index < self.live_count,
            "released slot {index} is not a live slot (live count {})",
            self.live_count
        );
        debug_assert!(
            self.free_slots.len() < self.live_count,
            "released a slot while every slot was already free"
        );

        self.free_slots.push(index);
    }

    /// Changes the number of constructed slots to `new_count`.
    ///
    /// Shrinking destroys the values in `new_count..live_count` and fails without changing
    /// anything if any of them is leased. Growing sets the capacity to at least `new_count` and
    /// constructs the new values with `fill`, each of which becomes free.
    ///
    /// Runs `fill` and destructors while `self` is borrowed, so this is only for storage that is
    /// not yet shared. Shared storage uses `truncate()` and `extend()` instead.
    pub(crate) fn resize_with<F>(&mut self, new_count: usize, mut fill: F) -> Result<()>
    where
        F: FnMut() -> T,
    {
        match new_count.cmp(&self.live_count) {
            Ordering::Less => self.truncate(new_count).map(drop),
            Ordering::Equal => Ok(()),
            Ordering::Greater => {
                self.reserve(new_count)?;

                while self.live_count < new_count {
                    // Capacity was reserved above, so this never grows the storage.
                    self.append(fill())?;
                }

                Ok(())
            }
        }
    }

    /// Moves the values in `new_count..live_count` out of the storage and returns them, so the
    /// caller can drop them once no lock is held.
    ///
    /// Fails without changing anything if any of those slots is leased or if the returned
    /// collection cannot be allocated.
    pub(crate) fn truncate(&mut self, new_count: usize) -> Result<Vec<T>> {
        let removed = self.live_count.saturating_sub(new_count);

        let free_removed = self
            .free_slots
            .iter()
            .filter(|&&index| index >= new_count)
            .count();

        if free_removed != removed {
            return Err(PoolError::ShrinkBelowLeased {
                requested: new_count,
                leased_above: removed.wrapping_sub(free_removed),
            });
        }

        let mut values = Vec::new();
        values
            .try_reserve_exact(removed)
            .map_err(|_reserve_error| PoolError::AllocationFailed {
                slots: removed,
                bytes: removed.saturating_mul(size_of::<T>()),
            })?;

        if removed == 0 {
            return Ok(values);
        }

        self.free_slots.retain(|&index| index < new_count);

        let old_count = self.live_count;
        self.live_count = new_count;

        for index in new_count..old_count {
            // SAFETY: The slot was below the old live count and on the free list, so it holds a
            // live value that no lease refers to. It is now outside the live range, so the value
            // is moved out exactly once.
            values.push(unsafe { self.slot_ptr(index).read() });
        }

        debug!(old_count, new_count, "removed surplus pooled objects");

        Ok(values)
    }

    /// Moves values from `values` into new free slots until the live count reaches `new_count`
    /// or `values` runs out. Values that are not needed remain in `values`.
    ///
    /// Never runs code outside the pool apart from the strategy.
    pub(crate) fn extend(&mut self, new_count: usize, values: &mut Vec<T>) -> Result<()> {
        if new_count <= self.live_count {
            return Ok(());
        }

        self.reserve(new_count)?;

        // Cannot underflow: checked above.
        let missing = new_count.wrapping_sub(self.live_count);
        let take = missing.min(values.len());

        for value in values.drain(..take) {
            // Capacity was reserved above, so this never grows the storage.
            self.append(value)?;
        }

        Ok(())
    }

    fn construct_next(&mut self, value: T) -> Result<usize> {
        if self.live_count == self.capacity {
            let new_capacity = self.next_capacity()?;
            self.grow(new_capacity)?;
        }

        let index = self.live_count;

        // SAFETY: The index is below the capacity (ensured above) and at the live count, so the
        // slot is allocated but holds no value yet.
        unsafe {
            self.slot_ptr(index).write(value);
        }

        // Cannot overflow because the index is below the capacity.
        self.live_count = index.wrapping_add(1);

        Ok(index)
    }

    fn next_capacity(&self) -> Result<usize> {
        if self.capacity == 0 {
            Ok(FIRST_GROWTH_CAPACITY)
        } else {
            self.capacity
                .checked_mul(2)
                .ok_or(PoolError::CapacityOverflow)
        }
    }

    fn grow(&mut self, new_capacity: usize) -> Result<()> {
        debug_assert!(new_capacity > self.capacity);

        // The free list must be able to hold every slot, so that releasing never allocates.
        let additional = new_capacity.saturating_sub(self.free_slots.len());
        self.free_slots
            .try_reserve_exact(additional)
            .map_err(|_reserve_error| PoolError::AllocationFailed {
                slots: new_capacity,
                bytes: new_capacity.saturating_mul(size_of::<usize>()),
            })?;

        let old_capacity = self.capacity;
        let relocated = self.leased_count() == 0 && !self.blocks.is_empty();

        if relocated {
            self.relocate(new_capacity)?;
        } else {
            // Cannot underflow because the new capacity is larger than the old one.
            let len = new_capacity.wrapping_sub(old_capacity);
            let ptr = self.strategy.allocate::<T>(len)?;

            self.blocks.push(Block {
                ptr,
                start: old_capacity,
                len,
            });
        }

        self.capacity = new_capacity;

        debug!(
            old_capacity,
            new_capacity,
            relocated,
            blocks = self.blocks.len(),
            "grew pool storage"
        );

        Ok(())
    }

    /// Moves every live value into a single new block of `new_capacity` slots.
    ///
    /// Only valid while no slot is leased.
    fn relocate(&mut self, new_capacity: usize) -> Result<()> {
        let new_ptr = self.strategy.allocate::<T>(new_capacity)?;

        for block in self.blocks.drain(..) {
            let constructed = self.live_count.saturating_sub(block.start).min(block.len);

            // SAFETY: The source range holds `constructed` live values inside the old block. The
            // destination range starts at the same global index inside the new block, which is
            // larger than the old capacity. The blocks are distinct allocations.
            unsafe {
                ptr::copy_nonoverlapping(
                    block.ptr.as_ptr(),
                    new_ptr.add(block.start).as_ptr(),
                    constructed,
                );
            }

            // SAFETY: The values were moved out bitwise above and the block came from our
            // strategy with this exact length.
            unsafe {
                self.strategy.deallocate(block.ptr, block.len);
            }
        }

        self.blocks.push(Block {
            ptr: new_ptr,
            start: 0,
            len: new_capacity,
        });

        Ok(())
    }

    fn slot_ptr(&self, index: usize) -> NonNull<T> {
        let block_index = self.blocks.partition_point(|block| block.end() <= index);

        let block = self
            .blocks
            .get(block_index)
            .expect("slot index must be within the capacity of the pool");

        // SAFETY: The partition point is the block with start <= index < end, so the offset is
        // within the bounds of that block.
        unsafe { block.ptr.add(index.wrapping_sub(block.start)) }
    }
}

impl<T, A: AllocationStrategy> SlotStorage<T, A> {
    /// Takes every free slot off the free list, in free list order, without giving up any
    /// capacity of the free list. The slots count as leased until they are checked back in.
    pub(crate) fn check_out_free(&mut self) -> Vec<(usize, NonNull<T>)> {
        let slots = self
            .free_slots
            .iter()
            .map(|&index| (index, self.slot_ptr(index)))
            .collect();

        self.free_slots.clear();

        slots
    }

    /// Returns slots taken by `check_out_free()` to the free list, preserving their order.
    pub(crate) fn check_in(&mut self, indices: impl IntoIterator<Item = usize>) {
        for index in indices {
            self.release(index);
        }
    }

    /// Assembles storage from values in slot index order and the order of the free list.
    ///
    /// Every value becomes free. The capacity is at least `capacity`.
    pub(crate) fn from_parts(
        strategy: A,
        capacity: usize,
        values: Vec<T>,
        free_order: &[usize],
    ) -> Result<Self> {
        debug_assert_eq!(values.len(), free_order.len());

        let mut storage = Self::new(strategy);
        storage.reserve(capacity.max(values.len()))?;

        for value in values {
            storage.append(value)?;
        }

        storage.free_slots.clear();
        storage.free_slots.extend_from_slice(free_order);

        Ok(storage)
    }
}

impl<T, A: AllocationStrategy> Drop for SlotStorage<T, A> {
    fn drop(&mut self) {
        let leased = self.leased_count();

        // Only possible if a lease could not hand its slot back. Nothing refers to the slot
        // anymore, so its value is dropped with the rest.
        if leased > 0 {
            debug!(leased, "pool storage dropped with slots that were never released");
        }

        let live_count = self.live_count;
        self.live_count = 0;
        self.free_slots.clear();

        for index in 0..live_count {
            // SAFETY: Every slot below the old live count holds a value and nothing refers to it
            // anymore. The live count is already zero so nothing will drop it again.
            unsafe {
                self.slot_ptr(index).drop_in_place();
            }
        }

        for block in self.blocks.drain(..) {
            // SAFETY: The block came from our strategy with this exact length and all values
            // inside it were dropped above.
            unsafe {
                self.strategy.deallocate(block.ptr, block.len);
            }
        }
    }
}

// SAFETY: The storage owns its values exclusively; moving it to another thread moves the values,
// which is sound when T is Send. The strategy moves along with it.
unsafe impl<T: Send, A: AllocationStrategy + Send> Send for SlotStorage<T, A> {}

impl<T, A: AllocationStrategy + fmt::Debug> fmt::Debug for SlotStorage<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotStorage")
            .field("item_type", &std::any::type_name::<T>())
            .field("blocks", &self.blocks.len())
            .field("live_count", &self.live_count)
            .field("capacity", &self.capacity)
            .field("free_count", &self.free_slots.len())
            .field("strategy", &self.strategy)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    #![allow(
        clippy::indexing_slicing,
        reason = "we do not need to worry about these things when writing test code"
    )]

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::Global;
    use crate::test_support::{Budgeted, Counting, DropCounter};

    fn read<T: Copy, A: AllocationStrategy>(storage: &SlotStorage<T, A>, index: usize) -> T {
        assert!(index < storage.live_count());

        // SAFETY: The index is below the live count so the slot holds a value.
        unsafe { storage.slot_ptr(index).read() }
    }

    #[test]
    fn starts_without_storage() {
        let storage = SlotStorage::<u32, _>::new(Global);

        assert_eq!(storage.capacity(), 0);
        assert_eq!(storage.live_count(), 0);
        assert_eq!(storage.free_count(), 0);
        assert!(storage.blocks.is_empty());
    }

    #[test]
    fn append_grows_geometrically() {
        let mut storage = SlotStorage::<u32, _>::new(Global);

        storage.append(1).unwrap();
        assert_eq!(storage.capacity(), FIRST_GROWTH_CAPACITY);

        for value in 2..=5 {
            storage.append(value).unwrap();
        }

        assert_eq!(storage.capacity(), FIRST_GROWTH_CAPACITY * 2);
        assert_eq!(storage.live_count(), 5);
        assert_eq!(storage.free_count(), 5);

        for index in 0..5 {
            assert_eq!(read(&storage, index), index as u32 + 1);
        }
    }

    #[test]
    fn idle_growth_consolidates_into_one_block() {
        let mut storage = SlotStorage::<u64, _>::new(Global);

        for value in 0..20 {
            storage.append(value * 3).unwrap();
        }

        assert_eq!(storage.blocks.len(), 1);
        assert_eq!(storage.blocks[0].len, storage.capacity());

        for index in 0..20 {
            assert_eq!(read(&storage, index), index as u64 * 3);
        }
    }

    #[test]
    fn growth_while_leased_keeps_addresses_stable() {
        let mut storage = SlotStorage::<u64, _>::new(Global);
        storage.resize_with(4, || 7).unwrap();

        let (index, ptr) = storage.pop_free().unwrap();

        // SAFETY: We hold the lease on this slot.
        unsafe { ptr.write(99) };

        for value in 0..10 {
            storage.append(value).unwrap();
        }

        assert!(storage.blocks.len() > 1);

        // SAFETY: The slot is still leased to us and the storage promised not to move it.
        assert_eq!(unsafe { ptr.read() }, 99);
        assert_eq!(read(&storage, index), 99);

        storage.release(index);

        // With nothing leased, the next growth consolidates again.
        storage.reserve(1000).unwrap();
        assert_eq!(storage.blocks.len(), 1);
        assert_eq!(read(&storage, index), 99);
        assert_eq!(read(&storage, 13), 9);
    }

    #[test]
    fn free_slots_are_reused_lifo() {
        let mut storage = SlotStorage::<u32, _>::new(Global);
        storage.resize_with(3, || 0).unwrap();

        let (a, _) = storage.pop_free().unwrap();
        let (b, _) = storage.pop_free().unwrap();

        storage.release(a);
        storage.release(b);

        assert_eq!(storage.pop_free().unwrap().0, b);
        assert_eq!(storage.pop_free().unwrap().0, a);
    }

    #[test]
    fn append_leased_skips_free_list() {
        let mut storage = SlotStorage::<u32, _>::new(Global);

        let (index, ptr) = storage.append_leased(5).unwrap();

        assert_eq!(index, 0);
        assert_eq!(storage.live_count(), 1);
        assert_eq!(storage.free_count(), 0);
        assert_eq!(storage.leased_count(), 1);
        // SAFETY: The slot is leased to us.
        assert_eq!(unsafe { ptr.read() }, 5);

        storage.release(index);
        assert_eq!(storage.free_count(), 1);
    }

    #[test]
    fn resize_grows_to_exact_capacity() {
        let mut storage = SlotStorage::<u32, _>::new(Global);

        storage.resize_with(100, || 42).unwrap();

        assert_eq!(storage.capacity(), 100);
        assert_eq!(storage.live_count(), 100);
        assert_eq!(storage.free_count(), 100);
        assert_eq!(read(&storage, 99), 42);
    }

    #[test]
    fn shrink_destroys_surplus_values() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut storage = SlotStorage::new(Global);

        storage
            .resize_with(10, || DropCounter::new(&drops))
            .unwrap();
        storage
            .resize_with(4, || DropCounter::new(&drops))
            .unwrap();

        assert_eq!(drops.load(Ordering::Relaxed), 6);
        assert_eq!(storage.live_count(), 4);
        assert_eq!(storage.free_count(), 4);
        assert_eq!(storage.capacity(), 10);
        assert!(storage.free_slots.iter().all(|&index| index < 4));
    }

    #[test]
    fn shrink_below_leased_slot_is_rejected() {
        let mut storage = SlotStorage::<u32, _>::new(Global);
        storage.resize_with(5, || 1).unwrap();

        // The top of the free list is the highest index.
        let (index, _) = storage.pop_free().unwrap();
        assert_eq!(index, 4);

        let result = storage.resize_with(2, || 0);

        assert!(matches!(
            result,
            Err(PoolError::ShrinkBelowLeased {
                requested: 2,
                leased_above: 1
            })
        ));
        assert_eq!(storage.live_count(), 5);
        assert_eq!(storage.free_count(), 4);

        // Shrinking that keeps the leased slot is fine.
        storage.release(index);
        let (index, _) = storage.pop_free().unwrap();
        storage.resize_with(index + 1, || 0).unwrap();
        storage.release(index);
    }

    #[test]
    fn reserve_smaller_is_noop() {
        let mut storage = SlotStorage::<u32, _>::new(Global);
        storage.reserve(10).unwrap();
        storage.reserve(3).unwrap();

        assert_eq!(storage.capacity(), 10);
        assert_eq!(storage.live_count(), 0);
    }

    #[test]
    fn failed_growth_leaves_state_unchanged() {
        let mut storage = SlotStorage::<u64, _>::new(Budgeted::new(4 * size_of::<u64>()));

        for value in 0..4 {
            storage.append(value).unwrap();
        }

        let result = storage.append(4);

        assert!(matches!(result, Err(PoolError::AllocationFailed { .. })));
        assert_eq!(storage.capacity(), 4);
        assert_eq!(storage.live_count(), 4);
        assert_eq!(storage.free_count(), 4);
        assert_eq!(read(&storage, 3), 3);
    }

    #[test]
    fn drop_releases_values_and_blocks() {
        let drops = Arc::new(AtomicUsize::new(0));
        let strategy = Counting::default();

        {
            let mut storage = SlotStorage::new(strategy.clone());
            storage
                .resize_with(3, || DropCounter::new(&drops))
                .unwrap();

            let (_index, _ptr) = storage.pop_free().unwrap();
            storage.append(DropCounter::new(&drops)).unwrap();
            storage.release(2);

            assert!(strategy.outstanding_slots() > 0);
        }

        assert_eq!(drops.load(Ordering::Relaxed), 4);
        assert_eq!(strategy.outstanding_slots(), 0);
    }

    #[test]
    fn truncate_hands_back_surplus_values() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut storage = SlotStorage::new(Global);
        storage
            .resize_with(5, || DropCounter::new(&drops))
            .unwrap();

        let removed = storage.truncate(2).unwrap();

        // Nothing is dropped until the caller lets go of the values.
        assert_eq!(removed.len(), 3);
        assert_eq!(drops.load(Ordering::Relaxed), 0);
        assert_eq!(storage.live_count(), 2);
        assert_eq!(storage.free_count(), 2);

        drop(removed);
        assert_eq!(drops.load(Ordering::Relaxed), 3);

        assert!(storage.truncate(2).unwrap().is_empty());
    }

    #[test]
    fn extend_takes_only_what_is_missing() {
        let mut storage = SlotStorage::<u32, _>::new(Global);
        storage.append(1).unwrap();

        let mut values = vec![2, 3, 4, 5];
        storage.extend(3, &mut values).unwrap();

        assert_eq!(storage.live_count(), 3);
        assert_eq!(storage.capacity(), FIRST_GROWTH_CAPACITY);
        assert_eq!(values, [4, 5]);
        assert_eq!(read(&storage, 1), 2);
        assert_eq!(read(&storage, 2), 3);

        // Already large enough.
        storage.extend(2, &mut values).unwrap();
        assert_eq!(storage.live_count(), 3);
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn checked_out_slots_count_as_leased() {
        let mut storage = SlotStorage::<u32, _>::new(Global);
        storage.resize_with(3, || 9).unwrap();

        let slots = storage.check_out_free();

        assert_eq!(
            slots.iter().map(|&(index, _)| index).collect::<Vec<_>>(),
            [0, 1, 2]
        );
        assert_eq!(storage.free_count(), 0);
        assert_eq!(storage.leased_count(), 3);
        assert!(matches!(
            storage.truncate(0),
            Err(PoolError::ShrinkBelowLeased { .. })
        ));

        storage.check_in(slots.iter().map(|&(index, _)| index));

        assert_eq!(storage.free_slots, [0, 1, 2]);
        assert_eq!(storage.leased_count(), 0);
    }

    #[test]
    fn from_parts_restores_free_order() {
        let storage =
            SlotStorage::from_parts(Global, 10, vec!["a".to_string(), "b".to_string()], &[1, 0])
                .unwrap();

        assert_eq!(storage.capacity(), 10);
        assert_eq!(storage.live_count(), 2);
        assert_eq!(storage.free_slots, [1, 0]);
        // SAFETY: Index 1 is a live slot.
        assert_eq!(unsafe { storage.slot_ptr(1).as_ref() }, "b");
    }

    #[test]
    fn drop_with_unreleased_slot_does_not_panic() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut storage = SlotStorage::new(Global);
        storage
            .resize_with(2, || DropCounter::new(&drops))
            .unwrap();

        // Never released, as when a lease could not reach the storage.
        let _unreleased = storage.pop_free().unwrap();

        drop(storage);

        assert_eq!(drops.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn zero_sized_values() {
        let mut storage = SlotStorage::<(), _>::new(Global);

        for _ in 0..10 {
            storage.append(()).unwrap();
        }

        assert_eq!(storage.live_count(), 10);

        let (index, _) = storage.pop_free().unwrap();
        storage.release(index);
    }
}
