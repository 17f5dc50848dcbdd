//! Cheating a bit: the [atomic_wait] crate already knows how to wait on an address on every
//! major platform, so there's no need to deal with all the OS-specific stuff here.
//!
//! It only has `wake_one` and `wake_all`, so a wake of N is N single wakes.

use std::sync::atomic::AtomicU32;

use atomic_wait::{wait, wake_all, wake_one};

use super::WaitWord;

/// Backend on top of the [atomic_wait] crate.
pub struct AtomicWait;

impl WaitWord for AtomicWait {
    fn wait(word: &AtomicU32, expected: u32) {
        wait(word, expected);
    }

    fn wake(word: &AtomicU32, count: u32) {
        if count == u32::MAX {
            wake_all(word);
            return;
        }
        for _ in 0..count {
            wake_one(word);
        }
    }
}
