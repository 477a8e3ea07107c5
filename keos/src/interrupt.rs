//! Interrupt management.
//!
//! Interrupts of the emulated machine are raised synchronously by the running
//! thread with [`trigger`]. The registered handler runs in interrupt context:
//! interrupts are disabled and the handler must not block. A handler that
//! wants the interrupted thread to give the core away calls
//! [`abyss::interrupt::yield_on_return`]; the reschedule happens right after
//! the handler returns.
use crate::{
    kernel::{Handler, kernel},
    thread::scheduler::scheduler,
};
use abyss::interrupt::{InterruptContext, InterruptState, take_yield_on_return};
use std::sync::Arc;

pub use abyss::interrupt::{in_interrupt_context, yield_on_return};

/// The vector of the timer interrupt.
pub const TIMER_VECTOR: usize = 32;

/// Register the interrupt handler for `vec`.
///
/// A handler registered earlier for the same vector is replaced.
pub fn register(vec: usize, handler: impl Fn() + Send + Sync + 'static) {
    let kernel = kernel();
    let mut guard = kernel.handlers.lock();
    guard.insert(vec, Arc::new(handler) as Handler);
    guard.unlock();
}

/// Raise the interrupt `vec` on the current core.
///
/// # Panics
///
/// Panics if interrupts are disabled or no handler is registered for `vec`.
pub fn trigger(vec: usize) {
    assert_eq!(
        InterruptState::current(),
        InterruptState::On,
        "Interrupt #{vec} raised while interrupts are disabled."
    );
    let kernel = kernel();
    let guard = kernel.handlers.lock();
    let handler = guard.get(&vec).cloned();
    guard.unlock();

    match handler {
        Some(handler) => {
            let _context = InterruptContext::enter();
            handler();
        }
        None => panic!("Unknown interrupt #{vec}"),
    }

    if take_yield_on_return() {
        scheduler().reschedule();
    }
}
