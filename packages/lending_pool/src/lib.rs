#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! This package provides [`LendingPool`], a thread-safe pool of pre-constructed objects that are
//! lent out to callers and reclaimed automatically when the caller is done with them.
//!
//! Constructing some objects is expensive - buffers, connections, parsers with large tables.
//! A lending pool constructs them once and hands out [`Lease`]s to them. When a lease is dropped,
//! its object goes back into the pool as-is, ready for the next borrower.
//!
//! # Features
//!
//! - **Automatic return**: Dropping a [`Lease`] hands its object back to the pool.
//! - **Thread-safe**: Any number of threads can acquire and return objects concurrently.
//! - **Waiting with a timeout**: [`LendingPool::acquire_wait()`] blocks until an object is
//!   returned or a timeout elapses.
//! - **Leases outlive the pool**: The pool storage is released only after the pool and the last
//!   lease are gone, so a lease never dangles.
//! - **Stable addresses**: A leased object never moves, even if the pool grows meanwhile.
//! - **Pluggable storage**: Slot storage comes from an [`AllocationStrategy`], defaulting to the
//!   global allocator via [`Global`].
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use lending_pool::LendingPool;
//!
//! let pool = LendingPool::with_copies(2, &Vec::<u8>::with_capacity(1024))?;
//!
//! let mut buffer = pool.try_acquire();
//! buffer.extend_from_slice(b"hello");
//! assert_eq!(pool.size(), 1);
//!
//! let other = pool.acquire_wait(Duration::from_millis(100));
//! assert!(other.is_leased());
//!
//! // Both objects are out, so a third caller gets nothing.
//! assert!(pool.try_acquire().is_empty());
//!
//! drop(buffer);
//! drop(other);
//! assert_eq!(pool.size(), 2);
//! # Ok::<(), lending_pool::PoolError>(())
//! ```
//!
//! Objects are not reset when they come back. If borrowers must see a clean object, clear it
//! after acquiring it.

mod builder;
mod constants;
mod error;
mod lease;
mod pool;
mod state;
mod storage;
mod strategy;
#[cfg(test)]
mod test_support;

pub use builder::*;
pub use error::PoolError;
pub(crate) use error::Result;
pub use lease::*;
pub use pool::*;
pub(crate) use state::PoolState;
pub(crate) use storage::SlotStorage;
pub use strategy::*;
