//! # Futex mutex
//!
//! It starts where the [spin lock](crate::spinlock) ends: if the lock is busy, don't burn the CPU,
//! ask the kernel to put the thread to sleep until the lock word changes.
//!
//! ## The word
//! Everything lives in one `AtomicU32`, there's nothing else shared:
//! - bit 0 - locked
//! - bits 1.. - waiters, the number of threads trying to get the lock right now,
//!   including the one which holds it or is about to
//!
//! So one waiter is `1 << 1` and "locked by one thread, nobody else around" is `0b11`.
//! No owner is recorded: the owner is whoever flipped bit 0 last.
//!
//! ## Locking
//! 1. Fast path: CAS `0 -> 0b11`. That's the uncontended case, no syscalls, nothing else to do.
//! 2. Registration: add one waiter with a CAS loop, keeping whatever the locked bit is.
//!    Never a blind `fetch_add`, as the count is checked against [WAITER_LIMIT] first.
//! 3. Acquisition: if it's locked - wait on the exact value we saw. If it's not - CAS the locked bit in.
//!    The registration stays in the word until unlock, so the count means "contending", not "sleeping".
//!
//! ## Unlocking
//! 1. Fast path: CAS `0b11 -> 0`. We were the only one registered => nobody to wake up.
//! 2. Slow path: one `fetch_add` of `-(locked + one waiter)` clears the bit and drops our registration
//!    in one go, then wake one sleeper.
//!
//! Both paths can only be right if the caller held the lock. A double unlock makes the subtraction
//! borrow into bit 0 (an even word minus 3 is odd), so a locked bit right after the unlock means the
//! word is corrupt, and the process aborts.
//!
//! ## Fairness
//! None. A fresh thread may get the lock before one that slept for ages, the woken thread then
//! just goes back to sleep. Every unlock with someone registered wakes one thread, so sleepers
//! aren't forgotten, they're just not first in line.
//!
//! All operations on the word are SeqCst. It's simple to reason about and this is a reference
//! implementation, not a fast one.

use std::{
    fmt,
    marker::PhantomData,
    process,
    sync::atomic::{AtomicU32, Ordering::SeqCst},
};

use crate::{
    lock::{Lock, RawLock},
    wait_word::{OsWait, WaitWord},
};

const LOCKED: u32 = 1;
const ONE_WAITER: u32 = 1 << 1;
const WAITERS_SHIFT: u32 = 1;

/// Fully unlocked, nobody around
const IDLE: u32 = 0;
/// Locked by the only registered thread
const LOCKED_ALONE: u32 = LOCKED | ONE_WAITER;
/// Adding it to the word clears the locked bit and removes one waiter
const UNLOCK_DELTA: u32 = LOCKED_ALONE.wrapping_neg();

/// The waiter count must stay below this. Reaching it means registrations leaked.
pub const WAITER_LIMIT: u32 = 10_000;

/// Decoded snapshot of the mutex word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MutexState {
    pub locked: bool,
    pub waiters: u32,
}

impl MutexState {
    fn decode(word: u32) -> Self {
        Self {
            locked: word & LOCKED != 0,
            waiters: word >> WAITERS_SHIFT,
        }
    }
}

impl fmt::Display for MutexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.locked { "locked" } else { "unlocked" };
        write!(f, "{state} with {} waiter(s)", self.waiters)
    }
}

/// A blocking lock, waits via `W` when contended.
///
/// See [Mutex] for the guarded version.
pub struct RawMutex<W = OsWait> {
    state: AtomicU32,
    _wait: PhantomData<fn() -> W>,
}

/// A futex mutex protecting a value of type `Y`
pub type Mutex<Y, W = OsWait> = Lock<RawMutex<W>, Y>;

impl<W: WaitWord> RawMutex<W> {
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(IDLE),
            _wait: PhantomData,
        }
    }

    pub fn lock(&self) {
        if self
            .state
            .compare_exchange(IDLE, LOCKED_ALONE, SeqCst, SeqCst)
            .is_err()
        {
            self.lock_contended();
        }
    }

    /// Somebody else is around => register and wait for our turn
    #[cold]
    fn lock_contended(&self) {
        let mut state = self.register();
        loop {
            if state & LOCKED != 0 {
                // sleeps only if the word is still what we saw, returns on any change or spuriously
                W::wait(&self.state, state);
                state = self.state.load(SeqCst);
                continue;
            }
            // our registration is already counted, just flip the bit
            match self
                .state
                .compare_exchange(state, state | LOCKED, SeqCst, SeqCst)
            {
                Ok(_) => return,
                Err(s) => state = s,
            }
        }
    }

    /// Adds one waiter to the word. Returns the word as it is after the registration.
    fn register(&self) -> u32 {
        let mut state = self.state.load(SeqCst);
        loop {
            let waiters = (state >> WAITERS_SHIFT) + 1;
            if waiters >= WAITER_LIMIT {
                fatal(format_args!(
                    "mutex waiter count would reach {waiters}, registrations are leaking ({})",
                    MutexState::decode(state)
                ));
            }
            let registered = state + ONE_WAITER;
            match self
                .state
                .compare_exchange(state, registered, SeqCst, SeqCst)
            {
                Ok(_) => return registered,
                Err(s) => state = s,
            }
        }
    }

    /// Takes the lock only if it's free right now, registering and locking in one step.
    /// Doesn't register on failure.
    pub fn try_lock(&self) -> bool {
        let mut state = self.state.load(SeqCst);
        while state & LOCKED == 0 {
            if (state >> WAITERS_SHIFT) + 1 >= WAITER_LIMIT {
                fatal(format_args!(
                    "mutex waiter count would reach the limit on try_lock ({})",
                    MutexState::decode(state)
                ));
            }
            match self
                .state
                .compare_exchange(state, state + LOCKED_ALONE, SeqCst, SeqCst)
            {
                Ok(_) => return true,
                Err(s) => state = s,
            }
        }
        false
    }

    /// # Safety
    /// The calling thread must hold the lock. An unlock of an unlocked mutex aborts the process,
    /// but an unlock of a mutex held by another thread lets a second thread into its critical section.
    pub unsafe fn unlock(&self) {
        if self
            .state
            .compare_exchange(LOCKED_ALONE, IDLE, SeqCst, SeqCst)
            .is_ok()
        {
            return;
        }
        self.unlock_contended();
    }

    #[cold]
    fn unlock_contended(&self) {
        let state = self.state.fetch_add(UNLOCK_DELTA, SeqCst).wrapping_add(UNLOCK_DELTA);
        if state & LOCKED != 0 {
            fatal(format_args!(
                "mutex is still locked right after unlock, unlock without lock? ({})",
                MutexState::decode(state)
            ));
        }
        // no guarantee the woken thread gets the lock, anyone may be faster
        W::wake(&self.state, 1);
    }

    pub fn is_locked(&self) -> bool {
        self.state.load(SeqCst) & LOCKED != 0
    }

    pub fn state(&self) -> MutexState {
        MutexState::decode(self.state.load(SeqCst))
    }
}

impl<W: WaitWord> Default for RawMutex<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: WaitWord> fmt::Debug for RawMutex<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawMutex").field(&self.state()).finish()
    }
}

// SAFETY: lock and try_lock only return holding the lock after CAS'ing bit 0 from 0 to 1
unsafe impl<W: WaitWord> RawLock for RawMutex<W> {
    const INIT: Self = Self::new();

    fn lock(&self) {
        RawMutex::lock(self);
    }

    fn try_lock(&self) -> bool {
        RawMutex::try_lock(self)
    }

    unsafe fn unlock(&self) {
        RawMutex::unlock(self);
    }

    fn is_locked(&self) -> bool {
        RawMutex::is_locked(self)
    }
}

/// The word is broken, going on would only hide it. No unwinding either, someone could catch it.
#[cold]
fn fatal(message: fmt::Arguments<'_>) -> ! {
    log::error!("{message}");
    process::abort();
}
