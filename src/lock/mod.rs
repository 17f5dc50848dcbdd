//! # Guarded locks
//!
//! The raw locks only know lock and unlock. Pairing them up correctly is on the caller, and
//! unlocking something you don't hold is UB => `unlock` is unsafe.
//!
//! [Lock] puts the protected value next to the raw lock and hands out a [Guard]:
//! - the guard can only be made by locking
//! - it derefs to the value like `&mut Y`
//! - it unlocks on drop
//!
//! So with the guard the lock / unlock pairing is the compiler's problem.
//! The idea is the same as in the lock_api crate, only much smaller.

use std::{
    cell::UnsafeCell,
    fmt,
    ops::{Deref, DerefMut},
};

/// A word-sized mutual exclusion primitive.
///
/// # Safety
/// Implementors must guarantee that between a successful `lock` / `try_lock` and the matching
/// `unlock` no other thread's `lock` returns or `try_lock` succeeds.
pub unsafe trait RawLock: Send + Sync {
    /// Unlocked state, usable in const contexts
    const INIT: Self;

    /// Blocks (one way or another) until the lock is held by the calling thread
    fn lock(&self);

    /// A single attempt, never blocks
    fn try_lock(&self) -> bool;

    /// # Safety
    /// The calling thread must hold the lock.
    unsafe fn unlock(&self);

    fn is_locked(&self) -> bool;
}

pub struct Lock<R, Y: ?Sized> {
    raw: R,
    value: UnsafeCell<Y>,
}

// UnsafeCell makes the Lock !Sync => promise the compiler it's fine as long as Y can be sent,
// as only one thread at a time gets to the value
unsafe impl<R: RawLock, Y: ?Sized + Send> Sync for Lock<R, Y> {}

impl<R: RawLock, Y> Lock<R, Y> {
    pub const fn new(value: Y) -> Self {
        Self {
            raw: R::INIT,
            value: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> Y {
        self.value.into_inner()
    }
}

impl<R: RawLock, Y: ?Sized> Lock<R, Y> {
    pub fn lock(&self) -> Guard<'_, R, Y> {
        self.raw.lock();
        Guard { lock: self }
    }

    pub fn try_lock(&self) -> Option<Guard<'_, R, Y>> {
        // lazily, a guard made for nothing would unlock someone else's lock on drop
        self.raw.try_lock().then(|| Guard { lock: self })
    }

    /// &mut self proves nobody else can lock => no locking needed
    pub fn get_mut(&mut self) -> &mut Y {
        self.value.get_mut()
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// The lock itself, for whoever wants to look at its state
    pub fn raw(&self) -> &R {
        &self.raw
    }
}

impl<R: RawLock, Y: Default> Default for Lock<R, Y> {
    fn default() -> Self {
        Self::new(Y::default())
    }
}

impl<R: RawLock, Y: ?Sized> fmt::Debug for Lock<R, Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("locked", &self.raw.is_locked())
            .finish_non_exhaustive()
    }
}

/// Proof that the lock is held. Unlocks on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct Guard<'a, R: RawLock, Y: ?Sized> {
    lock: &'a Lock<R, Y>,
}

/// Sharing the guard shares &Y => Y has to be Sync
unsafe impl<R: RawLock, Y: ?Sized + Sync> Sync for Guard<'_, R, Y> {}

impl<R: RawLock, Y: ?Sized> Deref for Guard<'_, R, Y> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        // SAFETY: existence of the guard means the lock is held
        unsafe { &*self.lock.value.get() }
    }
}

impl<R: RawLock, Y: ?Sized> DerefMut for Guard<'_, R, Y> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: existence of the guard means the lock is held
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<R: RawLock, Y: ?Sized> Drop for Guard<'_, R, Y> {
    fn drop(&mut self) {
        // SAFETY: the guard was made by locking and it's dropped exactly once
        unsafe { self.lock.raw.unlock() };
    }
}
