//! The emulated x86_64 core.
//!
//! A [`Cpu`] keeps the architectural state that the kernel can observe: the
//! `RFLAGS` register (only [`Rflags::IF`] is meaningful), the nesting state of
//! [`InterruptGuard`]s, whether the core is currently inside an interrupt
//! handler, and the console attached to the machine.
//!
//! [`InterruptGuard`]: crate::interrupt::InterruptGuard
use crate::{interrupt::InterruptGuardInner, kprint::Console};
use bitflags::bitflags;
use std::{
    cell::RefCell,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

bitflags! {
    /// The RFLAGS register.
    pub struct Rflags: u64 {
        /// Carry flag.
        const CF = 1 << 0;
        /// Reserved, always set.
        const RESERVED = 1 << 1;
        /// Zero flag.
        const ZF = 1 << 6;
        /// Sign flag.
        const SF = 1 << 7;
        /// Trap flag.
        const TF = 1 << 8;
        /// Interrupt enable flag.
        const IF = 1 << 9;
        /// Direction flag.
        const DF = 1 << 10;
        /// Overflow flag.
        const OF = 1 << 11;
    }
}

impl Rflags {
    /// Read the RFLAGS register of the current core.
    pub fn read() -> Self {
        with_cpu(|cpu| Rflags::from_bits_truncate(cpu.rflags.load(Ordering::SeqCst)))
    }

    pub(crate) fn update(f: impl FnOnce(&mut Rflags)) {
        with_cpu(|cpu| {
            let mut flags = Rflags::from_bits_truncate(cpu.rflags.load(Ordering::SeqCst));
            f(&mut flags);
            cpu.rflags.store(flags.bits(), Ordering::SeqCst);
        })
    }
}

/// An emulated core.
pub struct Cpu {
    rflags: AtomicU64,
    pub(crate) interrupt: InterruptGuardInner,
    pub(crate) in_interrupt: AtomicBool,
    pub(crate) yield_on_return: AtomicBool,
    pub(crate) console: Console,
}

impl Cpu {
    /// Power on a new core with interrupts enabled.
    pub fn new() -> Self {
        Self {
            rflags: AtomicU64::new((Rflags::RESERVED | Rflags::IF).bits()),
            interrupt: InterruptGuardInner::new(),
            in_interrupt: AtomicBool::new(false),
            yield_on_return: AtomicBool::new(false),
            console: Console::new(),
        }
    }

    /// Set whether console and log lines are echoed to the host.
    pub fn set_quiet(&self, quiet: bool) {
        self.console.set_quiet(quiet);
    }

    /// Set the lowest level of log messages that is recorded.
    pub fn set_log_level(&self, level: crate::kprint::LogLevel) {
        self.console.set_level(level);
    }

    /// Take the console output written so far.
    pub fn take_output(&self) -> String {
        self.console.take_output()
    }

    /// Drain the kernel log ring of this core.
    pub fn dmesg(&self) -> Vec<String> {
        self.console.dmesg()
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static CURRENT: RefCell<Arc<Cpu>> = RefCell::new(Arc::new(Cpu::new()));
}

/// Attach the calling host thread to `cpu`.
///
/// Every host thread starts attached to a private, otherwise unused core.
/// A host thread that executes a kernel thread must be attached to the core of
/// its machine before it touches any kernel state.
pub fn attach(cpu: Arc<Cpu>) {
    CURRENT.with(|current| *current.borrow_mut() = cpu);
}

/// Get the core the calling host thread is attached to.
pub fn current() -> Arc<Cpu> {
    CURRENT.with(|current| current.borrow().clone())
}

pub(crate) fn with_cpu<R>(f: impl FnOnce(&Cpu) -> R) -> R {
    CURRENT.with(|current| f(&current.borrow()))
}

pub(crate) fn cpu_ptr() -> *const Cpu {
    with_cpu(|cpu| cpu as *const Cpu)
}
