//! # Synchronization Primitives.
//!
//! The kernel's only mutual exclusion mechanism is the [`SpinLock`], which
//! disables interrupts while it is held and therefore must never be held
//! across a blocking point. The primitives of this module block instead: a
//! thread that has to wait parks itself with [`Current::park_with`] and gives
//! the core to another thread.
//!
//! | Primitive             | Blocks Thread? | Wake order       | Typical Use Case                      |
//! |-----------------------|----------------|------------------|---------------------------------------|
//! | [`SpinLock`]          | No (busy wait) | -                | Short critical sections in the kernel |
//! | [`Semaphore`]         | Yes            | Highest priority | Counting resources, signaling events  |
//! | [`Lock`]              | Yes            | Highest priority | Exclusive access, with donation       |
//! | [`ConditionVariable`] | Yes            | Highest priority | Waiting for a condition to become true |
//! | [`Mutex`]             | Yes            | Highest priority | Exclusive access to shared data       |
//!
//! Every wait queue is re-sorted when a waiter is woken rather than when it is
//! inserted, because the priority of a queued thread can change while it
//! waits. Ties are broken in arrival order.
//!
//! [`SpinLock`]: keos::sync::SpinLock
//! [`Current::park_with`]: keos::thread::Current::park_with

pub mod condition_variable;
pub mod donation;
pub mod lock;
pub mod mutex;
pub mod semaphore;

pub use condition_variable::*;
pub use lock::*;
pub use mutex::*;
pub use semaphore::*;
