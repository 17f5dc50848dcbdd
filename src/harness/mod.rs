//! # Verification harness
//!
//! Hammers a lock from many threads and checks it behaves like one.
//!
//! Every thread runs the same loop:
//! ```text
//! lock -> occupancy += 1 -> occupancy must be 1 -> total += 1 -> occupancy -= 1 -> unlock
//! ```
//! - occupancy is an atomic counter of threads inside the critical section. Anything but 1
//!   right after entering means 2 threads are in at once.
//! - total is a plain `u64` behind the lock itself. It only adds up to threads * iterations
//!   if no update got lost.
//!
//! After all threads are joined, the lock must be free again.
//!
//! The lock and the counters live in one [Shared] resource behind an [Arc], every thread
//! gets its own handle.

use std::{
    io,
    sync::{
        atomic::{AtomicU32, Ordering::SeqCst},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

use crate::{
    lock::{Lock, RawLock},
    mutex::RawMutex,
    spinlock::{CompareExchange, RawSpinLock, Swap},
    wait_word::{OsWait, Parking},
};

/// Which lock to put under the harness
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LockKind {
    /// [RawSpinLock] with compare-and-swap
    SpinCas,
    /// [RawSpinLock] with exchange
    SpinSwap,
    /// [RawMutex] on the native wait/wake
    Mutex,
    /// [RawMutex] on the condvar emulation
    MutexParking,
}

impl LockKind {
    pub fn run(self, workload: &Workload) -> Result<Report, HarnessError> {
        match self {
            LockKind::SpinCas => run::<RawSpinLock<CompareExchange>>(workload),
            LockKind::SpinSwap => run::<RawSpinLock<Swap>>(workload),
            LockKind::Mutex => run::<RawMutex<OsWait>>(workload),
            LockKind::MutexParking => run::<RawMutex<Parking>>(workload),
        }
    }
}

/// How hard to hammer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub threads: usize,
    pub iterations: u64,
    /// yield inside the critical section to provoke more contention
    pub yield_inside: bool,
}

impl Workload {
    /// threads * iterations, None if it doesn't fit the counter
    pub fn acquisitions(&self) -> Option<u64> {
        u64::try_from(self.threads)
            .ok()?
            .checked_mul(self.iterations)
    }
}

impl Default for Workload {
    /// 5 threads, 10k iterations each
    fn default() -> Self {
        Self {
            threads: 5,
            iterations: 10_000,
            yield_inside: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub threads: usize,
    pub acquisitions: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to spawn worker thread {thread}")]
    Spawn {
        thread: usize,
        #[source]
        source: io::Error,
    },
    #[error("worker thread {thread} panicked")]
    Panicked { thread: usize },
    #[error("mutual exclusion broken: thread {thread} saw {occupancy} threads inside at iteration {iteration}")]
    Exclusion {
        thread: usize,
        iteration: u64,
        occupancy: u32,
    },
    #[error("lost updates: expected {expected} acquisitions, counted {actual}")]
    LostUpdates { expected: u64, actual: u64 },
    #[error("the lock is still held after every thread finished")]
    LeftLocked,
    #[error("{threads} threads x {iterations} iterations overflows the acquisition counter")]
    TooLarge { threads: usize, iterations: u64 },
}

/// What all the threads share
struct Shared<R: RawLock> {
    total: Lock<R, u64>,
    occupancy: AtomicU32,
}

/// Runs the workload on a fresh lock of type `R`
pub fn run<R: RawLock + 'static>(workload: &Workload) -> Result<Report, HarnessError> {
    let expected = workload.acquisitions().ok_or(HarnessError::TooLarge {
        threads: workload.threads,
        iterations: workload.iterations,
    })?;
    let shared = Arc::new(Shared::<R> {
        total: Lock::new(0),
        occupancy: AtomicU32::new(0),
    });
    let started = Instant::now();

    let workers = spawn_workers(workload.threads, |id| {
        let shared = Arc::clone(&shared);
        let iterations = workload.iterations;
        let yield_inside = workload.yield_inside;
        thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || hammer(&shared, id, iterations, yield_inside))
    })?;

    // join everyone before reporting, a failing thread doesn't stop the others
    let mut outcome = Ok(());
    for (id, worker) in workers.into_iter().enumerate() {
        let result = worker
            .join()
            .unwrap_or(Err(HarnessError::Panicked { thread: id }));
        if outcome.is_ok() {
            outcome = result;
        }
    }
    outcome?;
    let elapsed = started.elapsed();

    if shared.total.is_locked() {
        return Err(HarnessError::LeftLocked);
    }
    let actual = *shared.total.lock();
    if actual != expected {
        return Err(HarnessError::LostUpdates { expected, actual });
    }

    log::info!(
        "{} threads x {} iterations: {actual} acquisitions in {elapsed:?}",
        workload.threads,
        workload.iterations
    );
    Ok(Report {
        threads: workload.threads,
        acquisitions: actual,
        elapsed,
    })
}

/// Starts `count` workers. If one fails to start, the ones already running are joined
/// before the error goes up, so nothing keeps hammering in the background.
fn spawn_workers<Y>(
    count: usize,
    mut spawn: impl FnMut(usize) -> io::Result<JoinHandle<Y>>,
) -> Result<Vec<JoinHandle<Y>>, HarnessError> {
    let mut workers = Vec::with_capacity(count);
    for id in 0..count {
        match spawn(id) {
            Ok(worker) => workers.push(worker),
            Err(source) => {
                for worker in workers {
                    worker.join().ok();
                }
                return Err(HarnessError::Spawn { thread: id, source });
            }
        }
    }
    Ok(workers)
}

fn hammer<R: RawLock>(
    shared: &Shared<R>,
    id: usize,
    iterations: u64,
    yield_inside: bool,
) -> Result<(), HarnessError> {
    log::debug!("thread {id} starting");
    for iteration in 0..iterations {
        let mut total = shared.total.lock();
        let occupancy = shared.occupancy.fetch_add(1, SeqCst) + 1;
        if occupancy != 1 {
            shared.occupancy.fetch_sub(1, SeqCst);
            return Err(HarnessError::Exclusion {
                thread: id,
                iteration,
                occupancy,
            });
        }
        log::trace!("thread {id}");
        if yield_inside {
            thread::yield_now();
        }
        *total += 1;
        shared.occupancy.fetch_sub(1, SeqCst);
    }
    log::debug!("thread {id} done");
    Ok(())
}
