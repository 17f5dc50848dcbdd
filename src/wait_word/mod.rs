//! # Waiting on a word
//!
//! Blocking locks need a way to put a thread to sleep until another thread changes some memory.
//! The kernel's scheduler can do that for us. On Linux it's the futex syscall, other platforms have
//! their own flavours (`WaitOnAddress` on Windows, `__ulock_wait` behind libc++ on macOS).
//!
//! All of them boil down to the same 2 operations:
//! - `wait(&AtomicU32, expected)` - sleeps, but only if the atomic still holds `expected`.
//!   The check and the sleep are atomic from the caller's point of view, so a wake
//!   that happens after the caller looked at the word can't get lost.
//! - `wake(&AtomicU32, count)` - wakes up to `count` threads sleeping on the same atomic.
//!
//! Note that `wait` may return spuriously. It never tells the caller _why_ it returned,
//! so the caller always has to look at the word again.
//!
//! Waiting and waking don't take part in memory ordering. They only spare processor cycles,
//! all the synchronization is done by the atomic operations around them.
//!
//! ## Backends
//! - [Futex] - the raw syscall on Linux and Android
//! - [AtomicWait] - the [atomic-wait](https://crates.io/crates/atomic-wait) crate for other platforms,
//!   as their syscalls aren't stable and it's better to go through the platform's libraries
//! - [Parking] - a condition-variable based emulation, works anywhere `std` does
//!
//! [OsWait] picks the native one for the current target.

use std::sync::atomic::AtomicU32;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod futex;
mod parking;
mod platform;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use futex::Futex;
pub use parking::Parking;
pub use platform::AtomicWait;

/// The native backend of the target platform.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub type OsWait = Futex;

/// The native backend of the target platform.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub type OsWait = AtomicWait;

/// Wait / wake capability keyed on the address of a 32-bit word.
///
/// Implementors are zero-sized markers; everything is keyed on the word's address.
pub trait WaitWord {
    /// Blocks the current thread while `*word == expected`.
    ///
    /// Returns immediately if the value differs. May return spuriously.
    fn wait(word: &AtomicU32, expected: u32);

    /// Wakes up to `count` threads blocked in [WaitWord::wait] on the same `word`.
    ///
    /// It's a no-op if nobody waits.
    fn wake(word: &AtomicU32, count: u32);
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicBool, Ordering::SeqCst},
        thread::{scope, sleep},
        time::Duration,
    };

    use super::*;

    /// The waiter must not block if the value is already different
    fn wait_on_mismatch_returns<W: WaitWord>() {
        let word = AtomicU32::new(7);
        W::wait(&word, 8);
        W::wait(&word, 0);
    }

    /// Nobody waits => nothing should happen
    fn wake_without_waiters<W: WaitWord>() {
        let word = AtomicU32::new(0);
        W::wake(&word, 1);
        W::wake(&word, u32::MAX);
        assert_eq!(word.load(SeqCst), 0);
    }

    /// A waiter stays asleep until the word changes and it's woken up.
    /// The loop is there because of spurious wake-ups.
    fn store_then_wake_releases_waiter<W: WaitWord>() {
        let word = AtomicU32::new(0);
        let released = AtomicBool::new(false);
        scope(|s| {
            s.spawn(|| {
                while word.load(SeqCst) == 0 {
                    W::wait(&word, 0);
                }
                released.store(true, SeqCst);
            });

            sleep(Duration::from_millis(100));
            assert!(!released.load(SeqCst));

            word.store(1, SeqCst);
            W::wake(&word, 1);
        });
        assert!(released.load(SeqCst));
    }

    #[test]
    fn os_wait_on_mismatch() {
        wait_on_mismatch_returns::<OsWait>();
    }

    #[test]
    fn os_wake_without_waiters() {
        wake_without_waiters::<OsWait>();
    }

    #[test]
    fn os_store_then_wake() {
        store_then_wake_releases_waiter::<OsWait>();
    }

    #[test]
    fn atomic_wait_store_then_wake() {
        wait_on_mismatch_returns::<AtomicWait>();
        wake_without_waiters::<AtomicWait>();
        store_then_wake_releases_waiter::<AtomicWait>();
    }

    #[test]
    fn parking_on_mismatch() {
        wait_on_mismatch_returns::<Parking>();
    }

    #[test]
    fn parking_wake_without_waiters() {
        wake_without_waiters::<Parking>();
    }

    #[test]
    fn parking_store_then_wake() {
        store_then_wake_releases_waiter::<Parking>();
    }
}
