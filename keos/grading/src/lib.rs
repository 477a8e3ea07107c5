//! Test tooling for KeOS.
//!
//! Each test boots a fresh machine, so tests can run in parallel:
//!
//! - `#[kernel_test]` turns a function into a `#[test]` whose body runs on the
//!   main thread of a machine in [`SchedulingMode::Priority`].
//!   `#[kernel_test(mlfqs)]` boots in [`SchedulingMode::Mlfqs`] instead.
//! - `#[assert_output(b"...")]`, placed above `#[kernel_test]`, compares the
//!   console output of the machine once the body returns.
//! - `#[assert_exit_code(n)]`, placed above `#[kernel_test]`, runs the body on
//!   a fresh thread and compares its exit code.
//!
//! ```ignore
//! use grading::{assert_output, kernel_test};
//! use keos::println;
//!
//! #[assert_output(b"hello\n")]
//! #[kernel_test]
//! fn hello() {
//!     println!("hello");
//! }
//! ```
//!
//! [`SchedulingMode::Priority`]: keos::SchedulingMode::Priority
//! [`SchedulingMode::Mlfqs`]: keos::SchedulingMode::Mlfqs
extern crate grading_derive;

pub use grading_derive::*;
