//! Low-level synchronization primitives used by the shards.

mod slot;
mod spinlock;

pub use slot::IdleSlot;
pub use spinlock::{SpinLock, SpinLockGuard, MAX_SPIN_BACKOFF};
