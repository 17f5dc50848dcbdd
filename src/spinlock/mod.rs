//! # Spin lock
//!
//! The simplest lock there is: one word, 0 is unlocked, 1 is locked.
//! Locking is a loop of "was it 0? make it 1" attempts until one succeeds.
//! The thread never sleeps, it just burns its CPU until the owner lets go.
//!
//! It's not practical to send a thread to sleep if the lock is held for brief moments of time,
//! that's where spinning wins. It's also the only option where there's nothing to sleep on.
//!
//! There are 2 ways to get the "was it 0? make it 1" observation atomically, see [SpinStrategy]:
//! - [CompareExchange] - CAS 0 -> 1, fails if it wasn't 0
//! - [Swap] - unconditionally write 1 and look at what was there before
//!
//! Both give the same mutual exclusion, the difference is in how they treat the cache line
//! (swap always writes, a failed CAS doesn't have to).
//!
//! No backoff, no fairness: any spinning thread may win, one may starve forever under
//! contention. That's accepted.
//!
//! All operations are SeqCst, it's a reference implementation, not a fast one.

use std::{
    hint,
    marker::PhantomData,
    sync::atomic::{AtomicU32, Ordering::SeqCst},
};

use crate::lock::{Lock, RawLock};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// How a spinning thread tries to flip the word from unlocked to locked
pub trait SpinStrategy {
    /// One attempt. true means the word was 0 and now it's 1 and it's ours.
    fn try_acquire(word: &AtomicU32) -> bool;
}

/// CAS-based acquisition
pub struct CompareExchange;

/// Exchange-based acquisition
pub struct Swap;

impl SpinStrategy for CompareExchange {
    #[inline]
    fn try_acquire(word: &AtomicU32) -> bool {
        word.compare_exchange(UNLOCKED, LOCKED, SeqCst, SeqCst).is_ok()
    }
}

impl SpinStrategy for Swap {
    #[inline]
    fn try_acquire(word: &AtomicU32) -> bool {
        // writing 1 over 1 changes nothing, so only the one who saw 0 wins
        word.swap(LOCKED, SeqCst) == UNLOCKED
    }
}

/// Busy-waits until `attempt` succeeds.
///
/// Returns the number of failed attempts before the successful one.
#[inline]
pub fn spin_until(mut attempt: impl FnMut() -> bool) -> u64 {
    let mut spins = 0;
    while !attempt() {
        spins += 1;
        hint::spin_loop(); // let the CPU know this loop is waiting
    }
    spins
}

/// A bare spin lock with no data attached.
///
/// See [SpinLock] for the guarded version.
pub struct RawSpinLock<S = CompareExchange> {
    word: AtomicU32,
    // fn() -> S keeps the lock Send + Sync whatever S is
    _strategy: PhantomData<fn() -> S>,
}

/// A spin lock protecting a value of type `Y`
pub type SpinLock<Y, S = CompareExchange> = Lock<RawSpinLock<S>, Y>;

impl<S: SpinStrategy> RawSpinLock<S> {
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(UNLOCKED),
            _strategy: PhantomData,
        }
    }

    /// Spins until the lock is ours
    pub fn lock(&self) {
        spin_until(|| S::try_acquire(&self.word));
    }

    pub fn try_lock(&self) -> bool {
        S::try_acquire(&self.word)
    }

    /// # Safety
    /// The calling thread must hold the lock. Nothing checks that: unlocking someone else's lock
    /// lets a second thread into their critical section.
    pub unsafe fn unlock(&self) {
        self.word.store(UNLOCKED, SeqCst);
    }

    pub fn is_locked(&self) -> bool {
        self.word.load(SeqCst) == LOCKED
    }
}

impl<S: SpinStrategy> Default for RawSpinLock<S> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: only the thread that saw the word go 0 -> 1 returns from lock / try_lock
unsafe impl<S: SpinStrategy> RawLock for RawSpinLock<S> {
    const INIT: Self = Self::new();

    fn lock(&self) {
        RawSpinLock::lock(self);
    }

    fn try_lock(&self) -> bool {
        RawSpinLock::try_lock(self)
    }

    unsafe fn unlock(&self) {
        RawSpinLock::unlock(self);
    }

    fn is_locked(&self) -> bool {
        RawSpinLock::is_locked(self)
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize},
        thread::scope,
        time::Duration,
    };

    use super::*;
    use crate::child;

    #[test]
    fn spin_until_counts_failed_attempts() {
        let mut calls = 0;
        let spins = spin_until(|| {
            calls += 1;
            calls == 5
        });
        assert_eq!(spins, 4);
        assert_eq!(calls, 5);

        // immediate success => no spinning at all
        assert_eq!(spin_until(|| true), 0);
    }

    #[test]
    fn spin_until_waits_for_another_thread() {
        let flag = AtomicBool::new(false);
        scope(|s| {
            s.spawn(|| flag.store(true, SeqCst));
            spin_until(|| flag.load(SeqCst));
        });
    }

    fn fresh_lock_is_acquirable<S: SpinStrategy>() {
        let lock = RawSpinLock::<S>::new();
        assert!(!lock.is_locked());
        lock.lock();
        assert!(lock.is_locked());
        assert!(!lock.try_lock());
        unsafe { lock.unlock() };
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }

    #[test]
    fn fresh_lock() {
        fresh_lock_is_acquirable::<CompareExchange>();
        fresh_lock_is_acquirable::<Swap>();
    }

    /// lock -> increment occupancy -> check it's 1 -> decrement -> unlock, from many threads
    fn mutual_exclusion<S: SpinStrategy>(threads: usize, iterations: usize) {
        let lock = RawSpinLock::<S>::new();
        let inside = AtomicUsize::new(0);
        let total = AtomicUsize::new(0);
        scope(|s| {
            for _ in 0..threads {
                s.spawn(|| {
                    for _ in 0..iterations {
                        lock.lock();
                        assert_eq!(inside.fetch_add(1, SeqCst), 0);
                        // not an atomic increment on purpose, only the lock protects it
                        total.store(total.load(SeqCst) + 1, SeqCst);
                        inside.fetch_sub(1, SeqCst);
                        unsafe { lock.unlock() };
                    }
                });
            }
        });
        assert_eq!(total.load(SeqCst), threads * iterations);
        assert!(!lock.is_locked());
    }

    #[test]
    fn compare_exchange_excludes() {
        mutual_exclusion::<CompareExchange>(5, 10_000);
    }

    #[test]
    fn swap_excludes() {
        mutual_exclusion::<Swap>(5, 10_000);
    }

    #[test]
    fn guarded_spin_lock() {
        let x = SpinLock::<Vec<i32>, Swap>::new(Vec::new());
        scope(|s| {
            s.spawn(|| x.lock().push(1));
            s.spawn(|| {
                let mut g = x.lock();
                g.push(2);
                g.push(2);
            });
        });
        let g = x.lock();
        assert!(g.as_slice() == [1, 2, 2] || g.as_slice() == [2, 2, 1]);
    }

    /// A second lock from the same thread spins forever, the lock isn't reentrant
    #[test]
    fn relock_from_same_thread_hangs() {
        if child::is_child() {
            let lock = RawSpinLock::<CompareExchange>::new();
            lock.lock();
            lock.lock();
            unreachable!("locked the spin lock twice");
        }
        child::assert_hangs(
            &child::test_path(module_path!(), "relock_from_same_thread_hangs"),
            Duration::from_millis(500),
        );
    }
}
