//! Kernel print utilities.
//!
//! Each core owns a console. Text written with [`print!`] and [`println!`] is
//! appended to the console output, which the grader inspects afterwards.
//! Messages written with [`info!`], [`warning!`] and [`debug!`] are
//! level-tagged, filtered by the core's [`LogLevel`], and kept in a bounded
//! kernel log ring (see [`dmesg`]). Unless the core is quiet, both are echoed
//! to the host's standard output.
use crate::{spinlock::SpinLock, x86_64::with_cpu};
use crossbeam_queue::ArrayQueue;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Number of log lines a core keeps before evicting the oldest one.
pub const DMESG_CAPACITY: usize = 512;

/// Severity of a kernel log message.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum LogLevel {
    /// Unrecoverable conditions. Nothing is logged at this level by macros;
    /// selecting it silences the log.
    Error = 0,
    /// Suspicious but recoverable conditions.
    Warning = 1,
    /// Normal but significant events.
    Info = 2,
    /// Detailed tracing.
    Debug = 3,
}

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

pub(crate) struct Console {
    output: SpinLock<String>,
    dmesg: ArrayQueue<String>,
    level: AtomicU8,
    quiet: AtomicBool,
}

impl Console {
    pub(crate) fn new() -> Self {
        Self {
            output: SpinLock::new(String::new()),
            dmesg: ArrayQueue::new(DMESG_CAPACITY),
            level: AtomicU8::new(LogLevel::Info.into()),
            quiet: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_quiet(&self, quiet: bool) {
        self.quiet.store(quiet, Ordering::SeqCst);
    }

    pub(crate) fn set_level(&self, level: LogLevel) {
        self.level.store(level.into(), Ordering::SeqCst);
    }

    fn level(&self) -> LogLevel {
        LogLevel::try_from(self.level.load(Ordering::SeqCst)).unwrap_or(LogLevel::Info)
    }

    fn echo(&self, text: &str) {
        if !self.quiet.load(Ordering::SeqCst) {
            std::print!("{text}");
        }
    }

    pub(crate) fn take_output(&self) -> String {
        let mut guard = self.output.lock();
        let output = std::mem::take(&mut *guard);
        guard.unlock();
        output
    }

    pub(crate) fn dmesg(&self) -> Vec<String> {
        std::iter::from_fn(|| self.dmesg.pop()).collect()
    }
}

#[doc(hidden)]
pub fn _print(fmt: std::fmt::Arguments<'_>) {
    let text = std::fmt::format(fmt);
    with_cpu(|cpu| {
        let mut guard = cpu.console.output.lock();
        guard.push_str(&text);
        guard.unlock();
        cpu.console.echo(&text);
    });
}

#[doc(hidden)]
pub fn _log(level: LogLevel, fmt: std::fmt::Arguments<'_>) {
    with_cpu(|cpu| {
        if level > cpu.console.level() {
            return;
        }
        let line = format!("[{}] {}", level.tag(), fmt);
        cpu.console.echo(&line);
        cpu.console.echo("\n");
        cpu.console.dmesg.force_push(line);
    });
}

/// Returns true if messages of `level` are recorded on the current core.
pub fn enabled(level: LogLevel) -> bool {
    with_cpu(|cpu| level <= cpu.console.level())
}

/// Set the lowest level of log messages recorded on the current core.
pub fn set_log_level(level: LogLevel) {
    with_cpu(|cpu| cpu.console.set_level(level));
}

/// Take the console output of the current core written so far.
pub fn take_output() -> String {
    with_cpu(|cpu| cpu.console.take_output())
}

/// Drain the kernel log ring of the current core, oldest line first.
pub fn dmesg() -> Vec<String> {
    with_cpu(|cpu| cpu.console.dmesg())
}

/// Prints out the message.
///
/// Use the format! syntax to write data to the console.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the format! syntax to write data to the console.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
#[macro_export]
macro_rules! info {
    () => ($crate::kprint::_log($crate::kprint::LogLevel::Info, format_args!("")));
    ($($arg:tt)*) => ($crate::kprint::_log($crate::kprint::LogLevel::Info, format_args!($($arg)*)));
}

/// Display a warning message.
#[macro_export]
macro_rules! warning {
    () => ($crate::kprint::_log($crate::kprint::LogLevel::Warning, format_args!("")));
    ($($arg:tt)*) => ($crate::kprint::_log($crate::kprint::LogLevel::Warning, format_args!($($arg)*)));
}

/// Display a debug message.
#[macro_export]
macro_rules! debug {
    () => ($crate::kprint::_log($crate::kprint::LogLevel::Debug, format_args!("")));
    ($($arg:tt)*) => ($crate::kprint::_log($crate::kprint::LogLevel::Debug, format_args!($($arg)*)));
}
