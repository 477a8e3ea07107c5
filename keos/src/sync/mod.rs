//! Low-level synchronization.
//!
//! The machine has a single core, so a critical section is atomic as long as
//! interrupts stay disabled. [`SpinLock`] couples that with a lock flag and
//! guards the data it protects; [`InterruptGuard`] disables interrupts without
//! protecting any data.
//!
//! Neither of them may be held across a point where the thread gives the core
//! away. Blocking primitives live in the `keos-synch` crate.

pub use abyss::{
    interrupt::InterruptGuard,
    spinlock::{SpinLock, SpinLockGuard, WouldBlock},
};
