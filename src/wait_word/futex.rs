//! Linux has stable syscalls, so it's fine to call the futex directly through `libc::syscall`.
//! The `_PRIVATE` flavours tell the kernel the word isn't shared with other processes,
//! which lets it skip the shared-mapping lookup.

use std::{ptr, sync::atomic::AtomicU32};

use super::WaitWord;

/// `futex(2)` based backend.
pub struct Futex;

impl WaitWord for Futex {
    fn wait(word: &AtomicU32, expected: u32) {
        // EAGAIN (value mismatch) and EINTR (signal) are both just an early return for us,
        // the caller re-checks the word anyway => the result is ignored
        // SAFETY: the word is a valid aligned u32 for the whole call, timeout is null => wait forever
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                word.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                expected,
                ptr::null::<libc::timespec>(),
            );
        }
    }

    fn wake(word: &AtomicU32, count: u32) {
        // the kernel takes a signed int, anything above i32::MAX means "everyone" anyway
        let count = i32::try_from(count).unwrap_or(i32::MAX);
        // SAFETY: the word is a valid aligned u32; FUTEX_WAKE doesn't dereference anything else
        unsafe {
            libc::syscall(libc::SYS_futex, word.as_ptr(), libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG, count);
        }
    }
}
