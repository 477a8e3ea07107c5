//! The running machine.
//!
//! A [`Kernel`] owns everything that a booted machine shares among its
//! threads: the emulated core, the scheduler, the thread and priority tables,
//! and the interrupt handlers. Each host thread that executes a kernel thread
//! knows its machine through a thread-local handle, so several machines can
//! run side by side in one host process.
//!
//! The core is handed over explicitly. The thread that gives up the core
//! installs the next thread in the running slot, publishes its tid in
//! `on_cpu`, and unparks its host thread. Afterwards it only waits on
//! `on_cpu`; it never touches kernel state while another thread owns the core.
use crate::{
    SchedulingMode,
    thread::{Thread, ThreadState, Tid, priority::PriorityTable, scheduler::Scheduler},
};
use abyss::{spinlock::SpinLock, x86_64::Cpu};
use crossbeam_utils::sync::{Parker, Unparker};
use std::{
    any::Any,
    cell::RefCell,
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

/// Unwinding payload that tears down the host thread of a powered-off machine.
pub(crate) struct Halt;

/// Unwinding payload of [`Current::exit`].
///
/// [`Current::exit`]: crate::thread::Current::exit
pub(crate) struct ThreadExit(pub(crate) i32);

/// Bookkeeping of a live thread, visible to every thread of the machine.
pub(crate) struct ThreadEntry {
    pub(crate) state: Arc<SpinLock<ThreadState>>,
    pub(crate) unparker: Unparker,
}

pub(crate) type Handler = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct Kernel {
    pub(crate) cpu: Arc<Cpu>,
    pub(crate) scheduler: &'static dyn Scheduler,
    pub(crate) mode: SchedulingMode,
    /// The thread that owns the core. Empty while the owner is parking or
    /// exiting.
    pub(crate) running: SpinLock<Option<Box<Thread>>>,
    on_cpu: AtomicU64,
    pub(crate) priorities: SpinLock<PriorityTable>,
    pub(crate) threads: SpinLock<BTreeMap<Tid, ThreadEntry>>,
    pub(crate) handlers: SpinLock<BTreeMap<usize, Handler>>,
    pub(crate) main_tid: AtomicU64,
    halted: AtomicBool,
    panic: SpinLock<Option<Box<dyn Any + Send>>>,
    boot: Unparker,
}

impl Kernel {
    pub(crate) fn new(
        cpu: Arc<Cpu>,
        scheduler: &'static dyn Scheduler,
        mode: SchedulingMode,
        boot: Unparker,
    ) -> Self {
        Self {
            cpu,
            scheduler,
            mode,
            running: SpinLock::new(None),
            on_cpu: AtomicU64::new(u64::MAX),
            priorities: SpinLock::new(PriorityTable::new()),
            threads: SpinLock::new(BTreeMap::new()),
            handlers: SpinLock::new(BTreeMap::new()),
            main_tid: AtomicU64::new(u64::MAX),
            halted: AtomicBool::new(false),
            panic: SpinLock::new(None),
            boot,
        }
    }

    /// Give the core to `th`.
    ///
    /// The caller must not touch kernel state afterwards until the core is
    /// handed back to it.
    pub(crate) fn switch_to(&self, th: Box<Thread>) {
        let tid = th.tid;
        let unparker = th.unparker.clone();
        let mut state = th.state.lock();
        *state = ThreadState::Running;
        state.unlock();

        let mut running = self.running.lock();
        debug_assert!(running.is_none(), "The core is owned by another thread.");
        *running = Some(th);
        running.unlock();

        self.on_cpu.store(tid, Ordering::SeqCst);
        unparker.unpark();
    }

    /// Block the host thread of `tid` until the core is handed to it.
    ///
    /// If the machine powers off in the meantime, the host thread unwinds.
    pub(crate) fn wait_for_cpu(&self, tid: Tid) {
        let halted = CONTEXT.with(|context| {
            let context = context.borrow();
            let context = context
                .as_ref()
                .unwrap_or_else(|| panic!("Host thread does not execute a kernel thread."));
            loop {
                if self.halted.load(Ordering::SeqCst) {
                    break true;
                }
                if self.on_cpu.load(Ordering::SeqCst) == tid {
                    break false;
                }
                context.parker.park();
            }
        });
        if halted {
            std::panic::resume_unwind(Box::new(Halt));
        }
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Power off the machine and wake every host thread so that it unwinds.
    pub(crate) fn power_off(&self) {
        if self.halted.swap(true, Ordering::SeqCst) {
            return;
        }
        let threads = self.threads.lock();
        for entry in threads.values() {
            entry.unparker.unpark();
        }
        threads.unlock();
        self.boot.unpark();
    }

    /// Record a kernel panic and power off.
    ///
    /// Only the first panic is kept; it is re-raised by the boot thread.
    pub(crate) fn crash(&self, payload: Box<dyn Any + Send>) {
        let mut panic = self.panic.lock();
        if panic.is_none() {
            *panic = Some(payload);
        }
        panic.unlock();
        self.power_off();
    }

    /// Block the boot thread until the machine powers off.
    pub(crate) fn wait_for_power_off(&self, parker: &Parker) -> Option<Box<dyn Any + Send>> {
        while !self.is_halted() {
            parker.park();
        }
        let mut panic = self.panic.lock();
        let payload = panic.take();
        panic.unlock();
        payload
    }
}

/// The kernel thread executed by a host thread.
pub(crate) struct Context {
    pub(crate) tid: Tid,
    pub(crate) parker: Parker,
}

thread_local! {
    static KERNEL: RefCell<Option<Arc<Kernel>>> = const { RefCell::new(None) };
    static CONTEXT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

/// Bind the calling host thread to `kernel`.
pub(crate) fn enter(kernel: Arc<Kernel>, context: Option<Context>) {
    abyss::x86_64::attach(kernel.cpu.clone());
    KERNEL.with(|k| *k.borrow_mut() = Some(kernel));
    CONTEXT.with(|c| *c.borrow_mut() = context);
}

/// The machine the calling host thread belongs to.
pub(crate) fn kernel() -> Arc<Kernel> {
    KERNEL.with(|k| {
        k.borrow()
            .clone()
            .unwrap_or_else(|| panic!("No kernel is running on this host thread."))
    })
}

/// The tid of the kernel thread executed by the calling host thread.
pub(crate) fn current_tid() -> Tid {
    CONTEXT.with(|c| {
        c.borrow()
            .as_ref()
            .map(|context| context.tid)
            .unwrap_or_else(|| panic!("Host thread does not execute a kernel thread."))
    })
}
