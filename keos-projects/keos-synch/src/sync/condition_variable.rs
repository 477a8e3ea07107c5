//! # Condition Variable.
//!
//! A **Condition Variable** allows a thread to efficiently block until a
//! certain condition is met, without consuming CPU cycles. It is always used
//! in conjunction with a [`Lock`] that guards access to shared data: a thread
//! checks the condition with the lock held, and waits if it is not met. Another
//! thread changes the shared data under the same lock and *signals* the
//! condition variable.
//!
//! ## Mesa semantics
//!
//! Signaling a waiter and the waiter running again are not atomic. By the time
//! the woken thread has reacquired the lock, another thread may have
//! invalidated the condition again, so a waiter must re-check its condition in
//! a loop. [`ConditionVariable::wait_while`] does exactly that for a
//! [`Mutex`]:
//!
//! ```rust,ignore
//! let guard = condvar.wait_while(&mutex, |state| state.is_empty());
//! ```
//!
//! ## Priority
//!
//! Each waiter parks on a private [`Semaphore`]. [`ConditionVariable::signal`]
//! wakes the waiter whose thread has the highest priority at the moment of the
//! signal, and [`ConditionVariable::broadcast`] wakes every waiter in that
//! order.
//!
//! [`Mutex`]: crate::sync::Mutex
use super::{Lock, Mutex, MutexGuard, Semaphore};
use keos::{
    interrupt::in_interrupt_context,
    sync::SpinLock,
    thread::{
        Current, Tid,
        priority::{PriorityHolder, with_priorities},
    },
};
use std::{cmp::Reverse, collections::VecDeque, sync::Arc};

/// A Condition Variable
///
/// Condition variables represent the ability to block a thread such that it
/// consumes no CPU time while waiting for an event to occur. One lock may
/// serve many condition variables, but all the waiters of one condition
/// variable must use the same lock.
#[derive(Default)]
pub struct ConditionVariable {
    waiters: SpinLock<VecDeque<(Tid, Arc<Semaphore>)>>,
}

impl ConditionVariable {
    /// Creates a new condition variable which is ready to be waited on and
    /// signaled.
    pub fn new() -> Self {
        Self {
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// Atomically releases `lock` and waits to be signaled, then reacquires
    /// `lock` before returning.
    ///
    /// # Panics
    ///
    /// Panics inside an interrupt handler, or if the current thread does not
    /// hold `lock`.
    pub fn wait(&self, lock: &Lock) {
        assert!(
            !in_interrupt_context(),
            "ConditionVariable::wait must not be called inside an interrupt handler."
        );
        assert!(
            lock.held_by_current(),
            "ConditionVariable::wait requires {lock:?} to be held by the current thread."
        );
        let waiter = Arc::new(Semaphore::new(0));
        let mut waiters = self.waiters.lock();
        waiters.push_back((Current::get_tid(), waiter.clone()));
        waiters.unlock();

        lock.release();
        waiter.down();
        lock.acquire();
    }

    /// Blocks the current thread while `predicate` returns `true`.
    ///
    /// This function locks `mutex` and checks the predicate. If it returns
    /// `true`, the thread waits, temporarily releasing the mutex. When the
    /// thread is signaled and wakes up, it reacquires the mutex and
    /// re-evaluates the predicate. The returned guard holds the mutex, and the
    /// predicate is false for the data behind it.
    pub fn wait_while<'a, T>(
        &self,
        mutex: &'a Mutex<T>,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        let mut guard = mutex.lock();
        while predicate(&mut guard) {
            self.wait(mutex.as_ref());
        }
        guard
    }

    /// Wakes up the highest-priority thread waiting on this condvar, if any.
    ///
    /// Waiters are ranked by the current effective priority of their threads,
    /// whether or not they have parked yet; ties go to the earliest waiter.
    /// Calls to `signal` are not buffered in any way.
    ///
    /// # Panics
    ///
    /// Panics if the current thread does not hold `lock`.
    pub fn signal(&self, lock: &impl AsRef<Lock>) {
        let lock = lock.as_ref();
        assert!(
            lock.held_by_current(),
            "ConditionVariable::signal requires {lock:?} to be held by the current thread."
        );
        let mut waiters = self.waiters.lock();
        if !waiters.is_empty() {
            with_priorities(|table| {
                waiters
                    .make_contiguous()
                    .sort_by_key(|(tid, _)| Reverse(table.priority(*tid)));
            });
        }
        let waiter = waiters.pop_front();
        waiters.unlock();

        if let Some((_, waiter)) = waiter {
            waiter.up();
        }
    }

    /// Wakes up all threads waiting on this condvar, highest priority first.
    ///
    /// # Panics
    ///
    /// Panics if the current thread does not hold `lock`.
    pub fn broadcast(&self, lock: &impl AsRef<Lock>) {
        assert!(
            lock.as_ref().held_by_current(),
            "ConditionVariable::broadcast requires {:?} to be held by the current thread.",
            lock.as_ref()
        );
        loop {
            let waiters = self.waiters.lock();
            let empty = waiters.is_empty();
            waiters.unlock();
            if empty {
                break;
            }
            self.signal(lock);
        }
    }
}
