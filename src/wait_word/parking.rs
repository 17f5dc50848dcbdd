//! # Parking table
//!
//! Futex emulation out of a [Mutex] and a [Condvar] for when the OS doesn't help.
//!
//! There's one global table of buckets, a word's address picks the bucket.
//! Each bucket is a queue of parked threads behind a std mutex:
//! - `wait` locks the bucket, checks the word and only then enqueues itself.
//!   The waker must take the same bucket lock => it either runs before the check
//!   (and the check sees the new value) or after the enqueue (and finds the parker).
//! - `wake` locks the bucket, takes out up to N parkers of the same address and signals them.
//!
//! Different addresses may share a bucket, so each parker remembers its address and wakes
//! are filtered by it. Every parker has its own condvar => a wake never lands on a thread
//! waiting for some other word.

use std::sync::{
    atomic::{AtomicU32, Ordering::SeqCst},
    Arc, Condvar, Mutex, MutexGuard, PoisonError,
};

use super::WaitWord;

const BUCKETS: usize = 64;

/// Condition variable based backend. Never wakes up spuriously.
pub struct Parking;

struct Parker {
    address: usize,
    woken: Mutex<bool>,
    signal: Condvar,
}

impl Parker {
    fn new(address: usize) -> Self {
        Self {
            address,
            woken: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    fn park(&self) {
        let mut woken = lock(&self.woken);
        while !*woken {
            woken = self
                .signal
                .wait(woken)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn unpark(&self) {
        *lock(&self.woken) = true;
        self.signal.notify_one();
    }
}

type Bucket = Mutex<Vec<Arc<Parker>>>;

static TABLE: [Bucket; BUCKETS] = [const { Mutex::new(Vec::new()) }; BUCKETS];

/// A panic while holding the bucket can't leave the queue half-updated => poisoning is ignored
fn lock<Y>(m: &Mutex<Y>) -> MutexGuard<'_, Y> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn bucket(address: usize) -> &'static Bucket {
    // words are 4-byte aligned, the low bits carry nothing
    &TABLE[(address >> 2) % BUCKETS]
}

impl Parking {
    /// How many threads are parked on the word right now
    #[cfg(test)]
    pub(crate) fn parked(word: &AtomicU32) -> usize {
        let address = word.as_ptr() as usize;
        lock(bucket(address))
            .iter()
            .filter(|p| p.address == address)
            .count()
    }
}

impl WaitWord for Parking {
    fn wait(word: &AtomicU32, expected: u32) {
        let address = word.as_ptr() as usize;
        let parker = {
            let mut queue = lock(bucket(address));
            if word.load(SeqCst) != expected {
                return;
            }
            let parker = Arc::new(Parker::new(address));
            queue.push(Arc::clone(&parker));
            parker
        };
        // the waker removes us from the queue, nothing to clean up afterwards
        parker.park();
    }

    fn wake(word: &AtomicU32, count: u32) {
        let address = word.as_ptr() as usize;
        let mut woken = Vec::new();
        {
            let mut queue = lock(bucket(address));
            let mut i = 0;
            while i < queue.len() && woken.len() < count as usize {
                if queue[i].address == address {
                    // FIFO among the parkers of one address
                    woken.push(queue.remove(i));
                } else {
                    i += 1;
                }
            }
        }
        for parker in woken {
            parker.unpark();
        }
    }
}
