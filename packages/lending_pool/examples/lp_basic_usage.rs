//! Example demonstrating basic usage of `LendingPool`.
//!
//! Objects are constructed once, lent out and returned automatically when the lease is dropped.

use lending_pool::{LendingPool, PoolError};

fn main() -> Result<(), PoolError> {
    println!("=== LendingPool: basic usage ===");

    // Five buffers, constructed up front.
    let pool = LendingPool::with_copies(5, &String::with_capacity(256))?;
    println!("Free objects: {}", pool.size());

    {
        let mut greeting = pool.try_acquire();
        greeting.push_str("Hello");

        let mut subject = pool.try_acquire();
        subject.push_str("World");

        println!("Leased: {} {}", *greeting, *subject);
        println!("Free objects while leased: {}", pool.size());
        println!("In use: {}", pool.in_use());
    }

    // Both objects are back, with their contents intact.
    println!("Free objects after return: {}", pool.size());
    println!("In use: {}", pool.in_use());

    // An exhausted pool hands out empty leases rather than failing.
    let all = (0..pool.size()).map(|_| pool.try_acquire()).collect::<Vec<_>>();
    let extra = pool.try_acquire();
    println!("Extra lease holds an object: {}", extra.is_leased());

    // Unless we ask it to construct a new object when needed.
    let extra = pool.acquire_or_insert_with(String::new)?;
    println!("Extra lease holds an object now: {}", extra.is_leased());
    println!("Objects managed: {}", pool.live_count());

    drop(all);
    drop(extra);
    println!("Free objects at the end: {}", pool.size());

    Ok(())
}
