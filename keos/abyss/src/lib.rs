//! The abyss of kernel that emulates the hardware.
//!
//! This crate contains the collections of the (emulated) hardware that the
//! kernel runs on: a single x86_64 core with its `RFLAGS` register, the
//! interrupt controller, and the console.
//!
//! The core is emulated on top of the host. Every kernel thread runs on its own
//! host thread, but exactly one of them owns the core at any moment, and each
//! host thread is attached to the [`Cpu`] of the machine it belongs to. Every
//! primitive in this crate therefore operates on the *current* core, exactly
//! like the real instructions (`cli`, `sti`, `pushf`) would.
//!
//! You are **not** required to understand every line of code in this crate.
//! Instead, see the [`keos`] crate to see which modules (or functions) are
//! available for implementing the kernel.
//!
//! [`keos`]: ../keos/index.html
//! [`Cpu`]: x86_64::Cpu
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

#[macro_use]
pub mod kprint;
pub mod interrupt;
pub mod spinlock;
pub mod x86_64;

/// Maximum number of CPU the kernel can support.
///
/// The emulated machine is a uniprocessor: disabling interrupts on the core is
/// enough to make a critical section atomic.
pub const MAX_CPU: usize = 1;
