//! # Synchronization with Priority Donation
//!
//! This crate implements the blocking synchronization primitives of KeOS on
//! top of the priority scheduler:
//!
//! - [`Semaphore`]: a counting semaphore whose waiters are woken in priority
//!   order.
//! - [`Lock`]: a non-recursive lock that donates the priority of its waiters
//!   to its holder.
//! - [`ConditionVariable`]: a Mesa-style condition variable whose waiters are
//!   signaled in priority order.
//! - [`Mutex`]: a data-carrying lock built on [`Lock`].
//!
//! ## Priority inversion
//!
//! Consider three threads with priorities low (L), medium (M) and high (H).
//! L holds a lock that H needs. H blocks, and the scheduler runs M, which has
//! nothing to do with the lock, for as long as it wants; H effectively waits
//! for M although it has the higher priority. This is **priority inversion**.
//!
//! KeOS bounds the inversion with **priority donation**: while H waits for the
//! lock, L runs with H's priority, so M can no longer preempt it. Once L
//! releases the lock, its priority falls back. Donation is transitive: if L is
//! itself blocked on a lock held by another thread, the donation follows the
//! chain of locks. The protocol lives in [`donation`].
//!
//! In [`SchedulingMode::Mlfqs`], locks donate nothing and behave as binary
//! semaphores with an owner.
//!
//! [`Semaphore`]: sync::Semaphore
//! [`Lock`]: sync::Lock
//! [`ConditionVariable`]: sync::ConditionVariable
//! [`Mutex`]: sync::Mutex
//! [`donation`]: sync::donation
//! [`SchedulingMode::Mlfqs`]: keos::SchedulingMode::Mlfqs
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod sync;
