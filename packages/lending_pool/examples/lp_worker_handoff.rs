//! Example demonstrating worker threads that wait for pooled objects.
//!
//! There are fewer objects than workers, so workers block in `acquire_wait()` until another
//! worker returns its lease. A lease also remains valid after the pool itself is dropped.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lending_pool::{LendingPool, PoolError, WAIT_FOREVER};

const WORKERS: usize = 6;
const CONNECTIONS: usize = 2;

/// Stands in for something that is expensive to construct.
#[derive(Debug)]
struct Connection {
    id: usize,
    requests_served: usize,
}

fn main() -> Result<(), PoolError> {
    let mut next_id = 0_usize;
    let pool = Arc::new(LendingPool::builder().build_with(CONNECTIONS, || {
        next_id = next_id.wrapping_add(1);
        Connection {
            id: next_id,
            requests_served: 0,
        }
    })?);

    let workers = (0..WORKERS)
        .map(|worker| {
            let pool = Arc::clone(&pool);

            thread::spawn(move || {
                let mut connection = pool.acquire_wait(WAIT_FOREVER);
                connection.requests_served = connection.requests_served.wrapping_add(1);
                println!("Worker {worker} uses connection {}", connection.id);

                thread::sleep(Duration::from_millis(50));
            })
        })
        .collect::<Vec<_>>();

    for worker in workers {
        worker.join().expect("worker thread panicked");
    }

    // Both connections are held by us, so this wait gives up.
    let held = pool.try_acquire();
    let _other = pool.try_acquire();
    let timed_out = pool.acquire_wait(Duration::from_millis(20));
    println!("Timed out wait got an object: {}", timed_out.is_leased());

    // The lease keeps the storage alive after the pool is gone.
    drop(pool);
    println!("Still holding {held:?} after dropping the pool");

    Ok(())
}
