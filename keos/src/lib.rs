//! # KeOS: KAIST Educational Operating System, the synchronization kernel
//!
//! This crate is the core of a small, single-processor kernel whose purpose is
//! to host the synchronization primitives of the [`keos-synch`] project:
//! semaphores, locks and condition variables that wake the most urgent thread
//! first, and the priority donation protocol that keeps a low-priority lock
//! holder from stalling a high-priority waiter.
//!
//! The kernel provides everything those primitives stand on:
//!
//! - [`thread`]: threads, their priorities, parking, and the [`Scheduler`].
//! - [`interrupt`]: interrupt handler registration and dispatch, including
//!   the timer.
//! - [`sync`]: the interrupt-disabling [`SpinLock`], the only mutual
//!   exclusion mechanism below the synchronization primitives.
//! - [`teletype`]: the console.
//!
//! ## The machine
//!
//! KeOS runs on an emulated uniprocessor (see the [`abyss`] crate). Each kernel
//! thread is backed by a host thread, but only the thread that owns the core
//! executes; the others wait until the core is handed to them. Because there
//! is a single core, disabling interrupts is enough to make a critical section
//! atomic.
//!
//! A machine is configured and booted with [`SystemConfigurationBuilder`]:
//!
//! ```
//! use keos::{SystemConfigurationBuilder, println};
//!
//! let power_off = SystemConfigurationBuilder::new()
//!     .set_quiet(true)
//!     .boot(|| println!("Hello, KeOS!"));
//! assert_eq!(power_off.output, "Hello, KeOS!\n");
//! ```
//!
//! The main thread runs the given closure at [`PRI_DEFAULT`]. When it returns,
//! the machine powers off, no matter what the other threads are doing. A panic
//! on any thread is a kernel panic: the machine powers off and [`boot`]
//! re-raises the panic on its caller. A machine on which every thread is
//! parked can never make progress again; the kernel panics with a deadlock
//! message instead of hanging.
//!
//! ## Scheduling modes
//!
//! The kernel runs in one of two [`SchedulingMode`]s. In the default
//! [`SchedulingMode::Priority`], locks donate priorities to their holders. In
//! [`SchedulingMode::Mlfqs`], priorities are left to a feedback scheduler and
//! locks perform no donation at all.
//!
//! [`keos-synch`]: ../keos_synch/index.html
//! [`Scheduler`]: thread::scheduler::Scheduler
//! [`SpinLock`]: sync::SpinLock
//! [`PRI_DEFAULT`]: thread::priority::PRI_DEFAULT
//! [`boot`]: SystemConfigurationBuilder::boot
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

mod kernel;

pub mod interrupt;
pub mod sync;
pub mod teletype;
pub mod thread;

pub use abyss::{MAX_CPU, debug, info, kprint::LogLevel, print, println, warning};

use crossbeam_utils::sync::Parker;
use kernel::Kernel;
use std::sync::Arc;
use thread::{
    ThreadBuilder,
    priority::PRI_DEFAULT,
    scheduler::{PriorityScheduler, Scheduler},
};

/// Enum representing errors that can occur during a kernel operation.
///
/// This enum is used to categorize errors encountered by the kernel operation.
/// Contract violations are not errors; they are kernel bugs and panic.
#[derive(Debug, Eq, PartialEq)]
pub enum KernelError {
    /// Invalid arguement. (EINVAL)
    InvalidArgument,
}

impl KernelError {
    /// Converts the [`KernelError`] enum into a corresponding `usize` error
    /// code.
    pub fn into_usize(self) -> usize {
        (match self {
            KernelError::InvalidArgument => -22isize,
        }) as usize
    }
}

/// The scheduling mode of the kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchedulingMode {
    /// Strict priority scheduling. Locks donate priorities.
    #[default]
    Priority,
    /// Multi-level feedback queue scheduling. Locks never donate.
    Mlfqs,
}

impl SchedulingMode {
    /// Returns true if locks perform priority donation in this mode.
    pub fn donation_enabled(self) -> bool {
        self == SchedulingMode::Priority
    }
}

/// The report of a powered-off machine.
#[derive(Debug)]
pub struct PowerOff {
    /// Everything the machine wrote to its console.
    pub output: String,
    /// The kernel log lines still in the log ring.
    pub dmesg: Vec<String>,
}

/// A builder for system configuration settings.
///
/// The [`SystemConfigurationBuilder`] struct provides an interface for
/// configuring various system-wide settings before initialization:
/// the scheduler, the scheduling mode, and the kernel log.
pub struct SystemConfigurationBuilder {
    scheduler: Option<Box<dyn Scheduler>>,
    mode: SchedulingMode,
    log_level: LogLevel,
    quiet: bool,
}

impl Default for SystemConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemConfigurationBuilder {
    /// Start from the default configuration: a [`PriorityScheduler`] in
    /// [`SchedulingMode::Priority`], logging at [`LogLevel::Info`].
    pub fn new() -> Self {
        Self {
            scheduler: None,
            mode: SchedulingMode::Priority,
            log_level: LogLevel::Info,
            quiet: false,
        }
    }

    /// Sets the system-wide scheduler.
    ///
    /// This function configures the default scheduler with a custom scheduler
    /// implementation. It is expected that the provided scheduler
    /// implements the [`Scheduler`] trait and has a `'static` lifetime,
    /// meaning it must outlive all references.
    pub fn set_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Box::new(scheduler));
        self
    }

    /// Sets the scheduling mode.
    pub fn set_scheduling_mode(mut self, mode: SchedulingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the lowest level of log messages that is recorded.
    pub fn set_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Stop echoing the console and the log to the host.
    pub fn set_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Apply a kernel command line.
    ///
    /// The command line is a whitespace-separated list of options:
    ///
    /// - `-mlfqs`: use [`SchedulingMode::Mlfqs`].
    /// - `-q`: be quiet.
    /// - `log=<error|warning|info|debug>`: set the log level.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidArgument`] on an unknown option or log
    /// level.
    pub fn parse_cmdline(mut self, cmdline: &str) -> Result<Self, KernelError> {
        for option in cmdline.split_whitespace() {
            match option {
                "-mlfqs" => self.mode = SchedulingMode::Mlfqs,
                "-q" => self.quiet = true,
                _ => {
                    let level = option
                        .strip_prefix("log=")
                        .ok_or(KernelError::InvalidArgument)?;
                    self.log_level = match level {
                        "error" => LogLevel::Error,
                        "warning" => LogLevel::Warning,
                        "info" => LogLevel::Info,
                        "debug" => LogLevel::Debug,
                        _ => return Err(KernelError::InvalidArgument),
                    };
                }
            }
        }
        Ok(self)
    }

    /// Boot a machine and run `main` on its main thread.
    ///
    /// Returns once the main thread finishes. If any thread of the machine
    /// panics, the panic is propagated to the caller.
    ///
    /// The scheduler of the machine is never freed, so every boot leaks one
    /// scheduler.
    pub fn boot<F: FnOnce() + Send + 'static>(self, main: F) -> PowerOff {
        let Self {
            scheduler,
            mode,
            log_level,
            quiet,
        } = self;
        let cpu = Arc::new(abyss::x86_64::Cpu::new());
        cpu.set_quiet(quiet);
        cpu.set_log_level(log_level);

        // Leaked once per boot: host threads of a powered-off machine may
        // still be unwinding through the scheduler after `boot` returns.
        let scheduler: &'static dyn Scheduler = Box::leak(
            scheduler.unwrap_or_else(|| Box::new(PriorityScheduler::new())),
        );
        let parker = Parker::new();
        let kernel = Arc::new(Kernel::new(
            cpu.clone(),
            scheduler,
            mode,
            parker.unparker().clone(),
        ));
        kernel::enter(kernel.clone(), None);

        info!("KeOS: booting in {:?} mode.", mode);
        interrupt::register(interrupt::TIMER_VECTOR, || {
            thread::scheduler::scheduler().timer_tick()
        });
        ThreadBuilder::new("main")
            .priority(PRI_DEFAULT)
            .boot(&kernel, main);

        if let Some(payload) = kernel.wait_for_power_off(&parker) {
            std::panic::resume_unwind(payload);
        }
        PowerOff {
            output: cpu.take_output(),
            dmesg: cpu.dmesg(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmdline_selects_mode_and_log_level() {
        let config = SystemConfigurationBuilder::new()
            .parse_cmdline("-q  -mlfqs log=debug")
            .unwrap();
        assert_eq!(config.mode, SchedulingMode::Mlfqs);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.quiet);
    }

    #[test]
    fn cmdline_rejects_unknown_options() {
        assert_eq!(
            SystemConfigurationBuilder::new()
                .parse_cmdline("-fast")
                .err(),
            Some(KernelError::InvalidArgument)
        );
        assert_eq!(
            SystemConfigurationBuilder::new()
                .parse_cmdline("log=verbose")
                .err(),
            Some(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn main_thread_output_is_captured() {
        let power_off = SystemConfigurationBuilder::new()
            .set_quiet(true)
            .boot(|| {
                let state = thread::get_state_by_tid(thread::Current::get_tid());
                crate::println!("main is {:?}", state);
                crate::info!("hello from main");
            });
        assert_eq!(power_off.output, "main is Ok(Running)\n");
        assert!(
            power_off
                .dmesg
                .iter()
                .any(|line| line == "[INFO] hello from main")
        );
    }

    #[test]
    fn machines_boot_back_to_back() {
        for i in 0..3 {
            let power_off = SystemConfigurationBuilder::new()
                .set_quiet(true)
                .set_scheduler(PriorityScheduler::new())
                .boot(move || crate::println!("boot {i}"));
            assert_eq!(power_off.output, format!("boot {i}\n"));
        }
    }

    #[test]
    #[should_panic(expected = "kernel bug")]
    fn kernel_panic_reaches_the_boot_thread() {
        SystemConfigurationBuilder::new()
            .set_quiet(true)
            .boot(|| panic!("kernel bug"));
    }
}
