//! Allocation strategies and value types that make pool internals observable in unit tests.

use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{AllocationStrategy, Global, PoolError, Result};

/// Tracks how many slots are currently allocated through it.
#[derive(Clone, Debug, Default)]
pub(crate) struct Counting {
    slots: Arc<AtomicUsize>,
    allocations: Arc<AtomicUsize>,
}

impl Counting {
    pub(crate) fn outstanding_slots(&self) -> usize {
        self.slots.load(Ordering::Relaxed)
    }

    pub(crate) fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }
}

// SAFETY: Every block comes from `Global`; we only count them.
unsafe impl AllocationStrategy for Counting {
    fn allocate<T>(&self, count: usize) -> Result<NonNull<T>> {
        let ptr = Global.allocate(count)?;
        self.slots.fetch_add(count, Ordering::Relaxed);
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(ptr)
    }

    unsafe fn deallocate<T>(&self, ptr: NonNull<T>, count: usize) {
        self.slots.fetch_sub(count, Ordering::Relaxed);

        // SAFETY: Forwarding the guarantees of our caller.
        unsafe {
            Global.deallocate(ptr, count);
        }
    }
}

/// Refuses any allocation that would take the outstanding bytes above a fixed budget.
#[derive(Clone, Debug)]
pub(crate) struct Budgeted {
    budget: usize,
    used: Arc<AtomicUsize>,
}

impl Budgeted {
    pub(crate) fn new(budget: usize) -> Self {
        Self {
            budget,
            used: Arc::new(AtomicUsize::new(0)),
        }
    }
}

// SAFETY: Every block comes from `Global`; we only refuse requests over the budget.
unsafe impl AllocationStrategy for Budgeted {
    fn allocate<T>(&self, count: usize) -> Result<NonNull<T>> {
        let bytes = count.saturating_mul(size_of::<T>());

        if self.used.load(Ordering::Relaxed).saturating_add(bytes) > self.budget {
            return Err(PoolError::AllocationFailed {
                slots: count,
                bytes,
            });
        }

        let ptr = Global.allocate(count)?;
        self.used.fetch_add(bytes, Ordering::Relaxed);
        Ok(ptr)
    }

    unsafe fn deallocate<T>(&self, ptr: NonNull<T>, count: usize) {
        self.used
            .fetch_sub(count.saturating_mul(size_of::<T>()), Ordering::Relaxed);

        // SAFETY: Forwarding the guarantees of our caller.
        unsafe {
            Global.deallocate(ptr, count);
        }
    }
}

/// Increments a shared counter when dropped.
#[derive(Debug)]
pub(crate) struct DropCounter {
    drops: Arc<AtomicUsize>,
}

impl DropCounter {
    pub(crate) fn new(drops: &Arc<AtomicUsize>) -> Self {
        Self {
            drops: Arc::clone(drops),
        }
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }
}
