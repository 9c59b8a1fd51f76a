pub(crate) const ERR_POISONED_LOCK: &str = "poisoned lock - cannot continue execution because pool state may be corrupted";

/// Capacity of the first storage block of a pool that has to grow from zero capacity.
/// Subsequent automatic growth doubles the capacity.
pub(crate) const FIRST_GROWTH_CAPACITY: usize = 4;
