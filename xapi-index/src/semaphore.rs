//! A plain counting semaphore, used to throttle how many prepare batches
//! the `DocIndexer` coordinator may have in flight (capacity
//! capacity `limit_max`, released in batches of `limit_signal`).

use parking_lot::{Condvar, Mutex};

pub struct Semaphore {
    capacity: usize,
    permits: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        Semaphore { capacity, permits: Mutex::new(capacity), condvar: Condvar::new() }
    }

    /// Blocks until a permit is available, then takes it.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.condvar.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Returns `n` permits at once (capped at the original capacity) and
    /// wakes any waiters, matching the "signalling in batches" policy.
    pub fn release(&self, n: usize) {
        let mut permits = self.permits.lock();
        *permits = (*permits + n).min(self.capacity);
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn acquire_blocks_until_release() {
        let sem = Arc::new(Semaphore::new(1));
        sem.acquire();
        let sem2 = sem.clone();
        let handle = std::thread::spawn(move || {
            sem2.acquire();
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        sem.release(1);
        handle.join().unwrap();
    }
}
