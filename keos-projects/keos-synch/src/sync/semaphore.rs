//! # Semaphore.
//!
//! A **semaphore** is a nonnegative counter together with two atomic
//! operations on it:
//!
//! - **down** (or "P"): wait for the value to become positive, then decrement
//!   it.
//! - **up** (or "V"): increment the value, and wake one waiting thread, if any.
//!
//! A semaphore initialized to zero is a one-shot or repeating signal: one
//! thread downs it to wait for an event, another ups it once the event has
//! happened. A semaphore initialized to one guards a resource, which is how
//! [`Lock`] uses it.
//!
//! ## Priority
//!
//! [`Semaphore::up`] always wakes the waiter with the highest *current*
//! priority. Since a waiter may receive a donation while it waits, the wait
//! queue is sorted again right before a waiter is picked. After an up, the
//! caller offers the core to the threads that deserve it; inside an interrupt
//! handler, that offer is deferred until the handler returns.
//!
//! ```
//! # use keos_synch::sync::Semaphore;
//! # keos::SystemConfigurationBuilder::new().set_quiet(true).boot(|| {
//! let sema = Semaphore::new(1);
//! sema.down();
//! assert!(!sema.try_down());
//! sema.up();
//! assert_eq!(sema.value(), 1);
//! # });
//! ```
//!
//! [`Lock`]: crate::sync::Lock
use keos::{
    sync::SpinLock,
    thread::{
        Current, ParkHandle,
        priority::{Priority, PriorityHolder, with_priorities},
    },
};
use std::{cmp::Reverse, collections::VecDeque};

struct SemaphoreState {
    value: usize,
    waiters: VecDeque<ParkHandle>,
}

/// Counting semaphore.
pub struct Semaphore {
    state: SpinLock<SemaphoreState>,
}

impl Semaphore {
    /// Creates a new semaphore with the initial `value`.
    pub const fn new(value: usize) -> Self {
        Self {
            state: SpinLock::new(SemaphoreState {
                value,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Waits for the value to become positive and then decrements it.
    ///
    /// The current thread parks while the value is zero. Being woken does not
    /// grant the decrement: another thread may have taken the value before the
    /// woken thread runs again, in which case it parks again.
    ///
    /// # Panics
    ///
    /// Panics inside an interrupt handler.
    pub fn down(&self) {
        assert!(
            !keos::interrupt::in_interrupt_context(),
            "Semaphore::down must not be called inside an interrupt handler."
        );
        loop {
            let mut state = self.state.lock();
            if state.value > 0 {
                state.value -= 1;
                state.unlock();
                return;
            }
            Current::park_with(move |handle| {
                let at = with_priorities(|table| {
                    let priority = table.priority(handle.tid());
                    state
                        .waiters
                        .iter()
                        .position(|waiter| table.priority(waiter.tid()) < priority)
                });
                match at {
                    Some(at) => state.waiters.insert(at, handle),
                    None => state.waiters.push_back(handle),
                }
                state.unlock();
            });
        }
    }

    /// Decrements the value if it is positive, without waiting.
    ///
    /// Returns true on success. This may be called inside an interrupt
    /// handler.
    pub fn try_down(&self) -> bool {
        let mut state = self.state.lock();
        let success = state.value > 0;
        if success {
            state.value -= 1;
        }
        state.unlock();
        success
    }

    /// Increments the value and wakes the highest-priority waiter, if any.
    ///
    /// The current thread then yields, so that a woken thread with a higher
    /// priority runs right away. This may be called inside an interrupt
    /// handler; the yield then happens when the handler returns.
    pub fn up(&self) {
        let mut state = self.state.lock();
        if !state.waiters.is_empty() {
            with_priorities(|table| {
                state
                    .waiters
                    .make_contiguous()
                    .sort_by_key(|waiter| Reverse(table.priority(waiter.tid())));
            });
        }
        let woken = state.waiters.pop_front();
        state.value += 1;
        state.unlock();

        if let Some(waiter) = woken {
            waiter.unpark();
        }
        if keos::interrupt::in_interrupt_context() {
            keos::interrupt::yield_on_return();
        } else {
            Current::yield_now();
        }
    }

    /// The current value.
    ///
    /// The value may change as soon as this returns; use it for diagnostics
    /// only.
    pub fn value(&self) -> usize {
        let state = self.state.lock();
        let value = state.value;
        state.unlock();
        value
    }

    /// The highest priority among the threads waiting on this semaphore.
    pub fn max_waiter_priority(&self) -> Option<Priority> {
        let state = self.state.lock();
        let priority = if state.waiters.is_empty() {
            None
        } else {
            with_priorities(|table| {
                state
                    .waiters
                    .iter()
                    .map(|waiter| table.priority(waiter.tid()))
                    .max()
            })
        };
        state.unlock();
        priority
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}
