//! Thread scheduler
use super::{
    ParkHandle, Thread, ThreadState,
    priority::{Priority, PriorityHolder, with_priorities},
};
use crate::{
    SchedulingMode,
    kernel::{current_tid, kernel},
};
use abyss::{
    interrupt::{InterruptGuard, InterruptState},
    spinlock::SpinLock,
};
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Number of timer ticks a thread may run before it is preempted.
pub const TIME_SLICE: usize = 4;

/// A trait for a thread scheduler.
///
/// The [`Scheduler`] trait defines the common functionality expected from a
/// thread scheduler. It provides an interface for managing threads, determining
/// which thread to run next, and handling periodic timer interrupts. A thread
/// scheduler is responsible for controlling the execution of threads in a
/// system. The scheduler determines when each thread is allowed to run and
/// which of the runnable threads deserves the core.
///
/// This trait can be implemented by different types of schedulers, such as
/// Round Robin, Priority-based, or Multi-level Queue schedulers. Each
/// implementation may have a unique strategy for selecting the next
/// thread to run and handling thread management.
pub trait Scheduler: Sync {
    /// Peek a next thread to run.
    ///
    /// This method checks the queue and returns the next thread to run. If no
    /// threads are available, it returns `None`.
    fn next_to_run(&self) -> Option<Box<Thread>>;

    /// Push a thread `th` into scheduling queue.
    ///
    /// This method adds the specified thread to the queue of threads waiting to
    /// be scheduled.
    fn push_to_queue(&self, th: Box<Thread>);

    /// Called on every timer interrupt.
    ///
    /// This method runs in interrupt context. A scheduler that wants to
    /// preempt the running thread requests it with
    /// [`abyss::interrupt::yield_on_return`].
    fn timer_tick(&self);

    /// The highest effective priority among the runnable threads, if any.
    ///
    /// The kernel compares it against the running thread whenever priorities
    /// might have changed, and yields if the running thread is outranked.
    fn highest_priority(&self) -> Option<Priority>;
}

/// A strict priority scheduler.
///
/// It always runs the runnable thread with the highest effective priority.
/// Threads of equal priority are served first-come first-served, and the
/// running thread is preempted every [`TIME_SLICE`] timer ticks so that it
/// goes behind the other runnable threads of its priority.
pub struct PriorityScheduler {
    run_queue: SpinLock<VecDeque<Box<Thread>>>,
    remain: AtomicUsize,
}

impl PriorityScheduler {
    /// Create an empty scheduler.
    pub const fn new() -> Self {
        Self {
            run_queue: SpinLock::new(VecDeque::new()),
            remain: AtomicUsize::new(TIME_SLICE),
        }
    }
}

impl Default for PriorityScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for PriorityScheduler {
    fn next_to_run(&self) -> Option<Box<Thread>> {
        let mut queue = self.run_queue.lock();
        let position = with_priorities(|table| {
            let mut best: Option<(usize, Priority)> = None;
            for (idx, th) in queue.iter().enumerate() {
                let priority = table.priority(th.tid);
                if best.is_none_or(|(_, highest)| priority > highest) {
                    best = Some((idx, priority));
                }
            }
            best.map(|(idx, _)| idx)
        });
        let next = position.and_then(|idx| queue.remove(idx));
        queue.unlock();
        self.remain.store(TIME_SLICE, Ordering::SeqCst);
        next
    }

    fn push_to_queue(&self, th: Box<Thread>) {
        let mut queue = self.run_queue.lock();
        queue.push_back(th);
        queue.unlock();
    }

    fn timer_tick(&self) {
        let remain = self.remain.load(Ordering::SeqCst);
        if remain <= 1 {
            self.remain.store(TIME_SLICE, Ordering::SeqCst);
            abyss::interrupt::yield_on_return();
        } else {
            self.remain.store(remain - 1, Ordering::SeqCst);
        }
    }

    fn highest_priority(&self) -> Option<Priority> {
        let queue = self.run_queue.lock();
        let highest =
            with_priorities(|table| queue.iter().map(|th| table.priority(th.tid)).max());
        queue.unlock();
        highest
    }
}

/// Get the reference of the kernel scheduler.
pub fn scheduler() -> &'static (dyn Scheduler + 'static) {
    kernel().scheduler
}

/// The scheduling mode the kernel was booted with.
pub fn scheduling_mode() -> SchedulingMode {
    kernel().mode
}

impl dyn Scheduler {
    /// Reschedule the current thread.
    ///
    /// If the current thread is still running, it becomes runnable and
    /// competes with the other runnable threads. If it is parked, the core is
    /// given to the next runnable thread; when there is none, no thread can
    /// ever make progress and the kernel panics.
    pub fn reschedule(&self) {
        assert!(
            !InterruptGuard::is_guarded(),
            "Try to reschedule a thread while holding a lock."
        );

        unsafe { InterruptState::disable() };
        let kernel = kernel();
        let tid = current_tid();

        let mut running = kernel.running.lock();
        let current = running.take();
        running.unlock();
        if let Some(th) = current {
            let mut state = th.state.lock();
            *state = ThreadState::Runnable;
            state.unlock();
            self.push_to_queue(th);
        }

        match self.next_to_run() {
            Some(th) if th.tid == tid => kernel.switch_to(th),
            Some(th) => {
                kernel.switch_to(th);
                kernel.wait_for_cpu(tid);
            }
            None => panic!("Deadlock: every thread is parked."),
        }
        unsafe { InterruptState::enable() };
    }

    /// Park the current thread and return its [`ParkHandle`].
    ///
    /// The thread keeps running until the next [`reschedule`].
    ///
    /// [`reschedule`]: Self::reschedule
    pub(crate) fn park_current(&self) -> ParkHandle {
        let kernel = kernel();
        let mut running = kernel.running.lock();
        let th = running.take();
        running.unlock();

        let th = th.unwrap_or_else(|| panic!("The current thread is already parked."));
        let mut state = th.state.lock();
        *state = ThreadState::Parked;
        state.unlock();
        ParkHandle::new_for(th)
    }
}
