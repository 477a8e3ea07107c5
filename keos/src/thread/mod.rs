//! Thread abstration, an abstraction of a cpu core.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each with their
//! own stack and local state. Threads can be named, carry a priority, and
//! provide some built-in support for low-level synchronization.
//!
//! The machine has a single core. Exactly one thread runs at a time; the
//! others are either runnable (waiting in the [`Scheduler`]'s queue) or parked
//! (owned by whoever holds their [`ParkHandle`]). A thread gives the core away
//! only at well-defined points: when it yields, when it parks, when it exits,
//! and when an interrupt handler asks for a reschedule on return.
//!
//! ## Parking
//!
//! [`Current::park_with`] is the only way to block. It hands the
//! [`ParkHandle`] of the current thread to a closure, which typically stores it
//! in a wait queue, and then gives the core away. The thread stays parked until
//! someone calls [`ParkHandle::unpark`]:
//!
//! ```
//! use keos::{sync::SpinLock, thread::{Current, ParkHandle}};
//!
//! fn wait_on(queue: &SpinLock<Vec<ParkHandle>>) {
//!     let mut guard = queue.lock();
//!     Current::park_with(move |handle| {
//!         guard.push(handle);
//!         guard.unlock();
//!     });
//! }
//! ```
//!
//! [`Scheduler`]: scheduler::Scheduler
pub mod priority;
pub mod scheduler;

use crate::{
    KernelError,
    kernel::{Context, Halt, Kernel, ThreadEntry, ThreadExit, current_tid, kernel},
};
use abyss::{
    debug,
    interrupt::{InterruptGuard, in_interrupt_context},
    spinlock::SpinLock,
};
use crossbeam_utils::sync::{Parker, Unparker};
use priority::{PRI_DEFAULT, PRI_MAX, Priority, PriorityHolder, with_priorities};
use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// Identifier of a thread.
pub type Tid = u64;

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ThreadState {
    /// Thread is runnable.
    Runnable,
    /// Thread is running.
    Running,
    /// Thread is exited with exitcode.
    Exited(i32),
    /// Thread is parked.
    Parked,
}

#[derive(Default)]
pub(crate) struct ExitState {
    code: Option<i32>,
    joiners: Vec<ParkHandle>,
}

/// Get specified thread's [`ThreadState`] by TID (Thread ID).
///
/// # Errors
///
/// Returns [`KernelError::InvalidArgument`] if no live thread has `tid`.
pub fn get_state_by_tid(tid: Tid) -> Result<ThreadState, KernelError> {
    let kernel = kernel();
    let threads = kernel.threads.lock();
    let result = threads.get(&tid).map(|entry| {
        let state = entry.state.lock();
        let result = *state;
        state.unlock();
        result
    });
    threads.unlock();
    result.ok_or(KernelError::InvalidArgument)
}

/// An thread abstraction.
pub struct Thread {
    /// Thread id
    pub tid: Tid,
    /// Thread name
    pub name: String,
    /// State of the thread.
    pub state: Arc<SpinLock<ThreadState>>,
    pub(crate) exit: Arc<SpinLock<ExitState>>,
    pub(crate) unparker: Unparker,
}

impl Thread {
    fn new(name: String, unparker: Unparker) -> Box<Self> {
        static TID: AtomicU64 = AtomicU64::new(0);
        Box::new(Self {
            tid: TID.fetch_add(1, Ordering::SeqCst),
            name,
            state: Arc::new(SpinLock::new(ThreadState::Runnable)),
            exit: Arc::new(SpinLock::new(ExitState::default())),
            unparker,
        })
    }

    /// Register the thread to the machine and start its host thread.
    ///
    /// The host thread waits until the core is handed to the thread.
    fn launch<F: FnOnce() + Send + 'static>(
        &self,
        kernel: &Arc<Kernel>,
        priority: Priority,
        parker: Parker,
        thread_fn: F,
    ) {
        let tid = self.tid;
        with_priorities(|table| table.insert(tid, priority));
        let mut threads = kernel.threads.lock();
        threads.insert(
            tid,
            ThreadEntry {
                state: self.state.clone(),
                unparker: self.unparker.clone(),
            },
        );
        threads.unlock();

        let kernel = kernel.clone();
        std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || thread_start(kernel, tid, parker, thread_fn))
            .unwrap_or_else(|e| panic!("Failed to spawn the host thread of {tid}: {e}"));
    }
}

/// The very beginning of the thread.
fn thread_start<F: FnOnce() + Send>(kernel: Arc<Kernel>, tid: Tid, parker: Parker, thread_fn: F) {
    crate::kernel::enter(kernel.clone(), Some(Context { tid, parker }));
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        kernel.wait_for_cpu(tid);
        unsafe { abyss::interrupt::InterruptState::enable() };
        thread_fn();
    }));
    let exit_code = match result {
        Ok(()) => 0,
        Err(payload) if payload.is::<Halt>() => return,
        Err(payload) => match payload.downcast::<ThreadExit>() {
            Ok(exit) => exit.0,
            Err(payload) => return kernel.crash(payload),
        },
    };
    if let Err(payload) = std::panic::catch_unwind(|| __do_exit(exit_code)) {
        if !payload.is::<Halt>() {
            kernel.crash(payload);
        }
    }
}

/// Tear down the current thread and give the core away for good.
///
/// When the main thread exits, the machine powers off.
fn __do_exit(exit_code: i32) {
    let kernel = kernel();
    let tid = current_tid();
    let guard = InterruptGuard::new();

    let mut running = kernel.running.lock();
    let th = running.take();
    running.unlock();
    let th = th.unwrap_or_else(|| panic!("Exiting thread {tid} does not own the core."));

    let mut state = th.state.lock();
    *state = ThreadState::Exited(exit_code);
    state.unlock();

    let mut exit = th.exit.lock();
    exit.code = Some(exit_code);
    let joiners = std::mem::take(&mut exit.joiners);
    exit.unlock();
    for joiner in joiners {
        joiner.unpark();
    }

    let mut threads = kernel.threads.lock();
    threads.remove(&tid);
    threads.unlock();
    with_priorities(|table| table.remove(tid));
    debug!("Thread {} ({}) exited with {}.", tid, th.name, exit_code);
    drop(guard);

    if kernel.main_tid.load(Ordering::SeqCst) == tid {
        return kernel.power_off();
    }
    match kernel.scheduler.next_to_run() {
        Some(next) => kernel.switch_to(next),
        None => panic!("Deadlock: every thread is parked after thread {tid} exited."),
    }
}

/// A handle to join thread.
pub struct JoinHandle
where
    Self: 'static,
{
    /// Thread id of this handle.
    pub tid: Tid,
    exit: Arc<SpinLock<ExitState>>,
}

impl JoinHandle {
    /// Make a join handle for Thread `th`.
    pub fn new_for(th: &Thread) -> Self {
        Self {
            tid: th.tid,
            exit: th.exit.clone(),
        }
    }

    /// Join this handle and returns exit code.
    ///
    /// The current thread parks until the thread exits.
    pub fn join(self) -> i32 {
        let mut exit = self.exit.lock();
        if let Some(code) = exit.code {
            exit.unlock();
            return code;
        }
        Current::park_with(move |handle| {
            exit.joiners.push(handle);
            exit.unlock();
        });

        let exit = self.exit.lock();
        let code = exit.code;
        exit.unlock();
        code.unwrap_or_else(|| panic!("Thread {} woke a joiner before exiting.", self.tid))
    }
}

/// A handle that represent the parked thread.
pub struct ParkHandle {
    pub(crate) th: Box<Thread>,
}

impl ParkHandle {
    pub(crate) fn new_for(th: Box<Thread>) -> Self {
        Self { th }
    }

    /// The thread id of the parked thread.
    pub fn tid(&self) -> Tid {
        self.th.tid
    }

    /// Consume the handle and unpark the underlying thread.
    ///
    /// The thread becomes runnable. The current thread keeps running even if
    /// the unparked thread has a higher priority.
    pub fn unpark(self) {
        let mut state = self.th.state.lock();
        *state = ThreadState::Runnable;
        state.unlock();

        scheduler::scheduler().push_to_queue(self.th);
    }
}

impl std::fmt::Debug for ParkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParkHandle")
            .field("tid", &self.th.tid)
            .field("name", &self.th.name)
            .finish()
    }
}

/// The opaque structure indicating the running thread on the current cpu.
pub struct Current {
    _p: (),
}

impl Current {
    /// Run a function `f` with [`ParkHandle`] for current thread, and then park
    /// the current thread.
    ///
    /// Interrupts stay disabled from the moment the thread is parked until the
    /// core is handed to another thread, so `f` may release spinlocks without
    /// racing with the thread it wakes. `f` must not block.
    pub fn park_with(f: impl FnOnce(ParkHandle)) {
        assert!(
            !in_interrupt_context(),
            "Try to park a thread inside an interrupt handler."
        );
        let guard = InterruptGuard::new();
        let scheduler = scheduler::scheduler();
        f(scheduler.park_current());
        guard.consume();
        scheduler.reschedule();
    }

    /// Yield the core to the runnable threads that deserve it.
    ///
    /// With the [`PriorityScheduler`], the current thread keeps running unless
    /// a runnable thread has a priority higher than or equal to its own.
    ///
    /// [`PriorityScheduler`]: scheduler::PriorityScheduler
    pub fn yield_now() {
        assert!(
            !in_interrupt_context(),
            "Try to yield inside an interrupt handler."
        );
        scheduler::scheduler().reschedule();
    }

    /// Exit the current thread with `exit_code`.
    pub fn exit(exit_code: i32) -> ! {
        assert!(
            !InterruptGuard::is_guarded(),
            "Try to exit a thread while holding a lock."
        );
        std::panic::resume_unwind(Box::new(ThreadExit(exit_code)))
    }

    /// Get the current thread's id.
    pub fn get_tid() -> Tid {
        current_tid()
    }

    /// Get the current thread's effective priority.
    pub fn get_priority() -> Priority {
        let tid = current_tid();
        with_priorities(|table| table.priority(tid))
    }

    /// Set the current thread's base priority to `priority`.
    ///
    /// The effective priority never drops below the priority donated through
    /// the locks the thread holds; a lowered base priority takes effect once
    /// those locks are released. If the current thread is no longer the
    /// highest-priority thread, it yields.
    pub fn set_priority(priority: Priority) {
        assert!(priority <= PRI_MAX, "Priority {priority} is out of range.");
        let tid = current_tid();
        let effective = with_priorities(|table| {
            table.set_base_priority(tid, priority);
            table.update_priority(tid)
        });
        debug!("Thread {tid} set its base priority to {priority} (effective {effective}).");
        preempt_if_outranked();
    }
}

/// Yield if a runnable thread has a higher priority than the current thread.
///
/// Inside an interrupt handler, the yield is deferred until the handler
/// returns.
pub fn preempt_if_outranked() {
    if scheduler::scheduler().highest_priority() > Some(Current::get_priority()) {
        if in_interrupt_context() {
            abyss::interrupt::yield_on_return();
        } else {
            Current::yield_now();
        }
    }
}

/// Run a function `f` with current thread as an argument.
///
/// # Panics
///
/// Panics inside an interrupt handler that interrupted a parking thread,
/// which has no [`Thread`] while it gives the core away.
#[inline]
pub fn with_current<R>(f: impl FnOnce(&mut Thread) -> R) -> R {
    let kernel = kernel();
    let mut running = kernel.running.lock();
    let result = running.as_mut().map(|th| f(th));
    running.unlock();
    result.unwrap_or_else(|| panic!("No thread is running on the core."))
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    th: Box<Thread>,
    parker: Parker,
    priority: Priority,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        let parker = Parker::new();
        Self {
            th: Thread::new(String::from(name), parker.unparker().clone()),
            parker,
            priority: PRI_DEFAULT,
        }
    }

    /// Set the priority of the thread. Defaults to [`PRI_DEFAULT`].
    pub fn priority(mut self, priority: Priority) -> Self {
        assert!(priority <= PRI_MAX, "Priority {priority} is out of range.");
        self.priority = priority;
        self
    }

    /// Spawn the thread.
    ///
    /// If the new thread has a higher priority than the current thread, the
    /// current thread yields to it immediately.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> JoinHandle {
        let Self {
            th,
            parker,
            priority,
        } = self;
        let kernel = kernel();
        let handle = JoinHandle::new_for(&th);
        th.launch(&kernel, priority, parker, thread_fn);
        debug!("Spawned thread {} ({}) at priority {}.", th.tid, th.name, priority);
        kernel.scheduler.push_to_queue(th);
        preempt_if_outranked();
        handle
    }

    /// Get the thread id of this thread.
    pub fn get_tid(&self) -> Tid {
        self.th.tid
    }

    /// Start the main thread of a machine and give it the core.
    pub(crate) fn boot<F: FnOnce() + Send + 'static>(self, kernel: &Arc<Kernel>, main: F) {
        let Self {
            th,
            parker,
            priority,
        } = self;
        kernel.main_tid.store(th.tid, Ordering::SeqCst);
        th.launch(kernel, priority, parker, main);
        kernel.switch_to(th);
    }
}
