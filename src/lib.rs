pub mod harness;
pub mod lock;
pub mod mutex;
pub mod spinlock;
pub mod wait_word;

#[cfg(test)]
mod child;

pub use lock::{Guard, Lock, RawLock};
pub use mutex::{Mutex, MutexState, RawMutex, WAITER_LIMIT};
pub use spinlock::{CompareExchange, RawSpinLock, SpinLock, SpinStrategy, Swap};
pub use wait_word::{OsWait, WaitWord};
