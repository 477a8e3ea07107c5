//! # Lock.
//!
//! A [`Lock`] is a binary [`Semaphore`] with an owner: at most one thread
//! holds it, and only the holder may release it. Unlike a semaphore, a lock
//! is not reentrant. Acquiring a lock the current thread already holds is a
//! bug and panics rather than deadlocking.
//!
//! When a thread has to wait for a held lock, it donates its priority to the
//! holder, and through the holder to every thread further down the blocking
//! chain (see [`donation`]). Releasing the lock ends the donation.
//!
//! ```
//! # use keos_synch::sync::Lock;
//! # keos::SystemConfigurationBuilder::new().set_quiet(true).boot(|| {
//! let lock = Lock::new();
//! lock.acquire();
//! assert!(lock.held_by_current());
//! lock.release();
//! assert_eq!(lock.holder(), None);
//! # });
//! ```
//!
//! [`donation`]: crate::sync::donation
use super::{Semaphore, donation};
use keos::{
    debug,
    interrupt::in_interrupt_context,
    thread::{
        Current, Tid,
        priority::{LockId, PriorityHolder, with_priorities},
        scheduler::scheduling_mode,
    },
};

/// A non-recursive lock that donates the priority of its waiters to its
/// holder.
pub struct Lock {
    id: LockId,
    sema: Semaphore,
}

impl Lock {
    /// Creates a new lock in an unlocked state ready for use.
    pub fn new() -> Self {
        Self {
            id: LockId::allocate(),
            sema: Semaphore::new(1),
        }
    }

    /// The handle of this lock in the donation graph.
    pub fn id(&self) -> LockId {
        self.id
    }

    /// The thread that holds this lock, if any.
    ///
    /// The answer may be stale as soon as this returns, unless the current
    /// thread is the holder. Use it for diagnostics only.
    pub fn holder(&self) -> Option<Tid> {
        with_priorities(|graph| graph.holder(self.id))
    }

    /// Returns true if the current thread holds this lock.
    pub fn held_by_current(&self) -> bool {
        self.holder() == Some(Current::get_tid())
    }

    /// Acquires the lock, parking until it becomes available.
    ///
    /// If another thread holds the lock, the current thread donates its
    /// priority along the blocking chain before it parks.
    ///
    /// # Panics
    ///
    /// Panics inside an interrupt handler, or if the current thread already
    /// holds the lock.
    pub fn acquire(&self) {
        assert!(
            !in_interrupt_context(),
            "Lock::acquire must not be called inside an interrupt handler."
        );
        assert!(
            !self.held_by_current(),
            "Lock {:?} is already held by the current thread.",
            self.id
        );
        let tid = Current::get_tid();
        let donation = scheduling_mode().donation_enabled();
        if donation {
            let raised = with_priorities(|graph| donation::donate(graph, tid, self.id));
            if raised > 0 {
                debug!(
                    "Thread {} donated its priority to {} lock(s) through {:?}.",
                    tid, raised, self.id
                );
            }
        }

        self.sema.down();

        let raised = with_priorities(|graph| {
            if donation {
                donation::acquired(graph, tid, self.id)
            } else {
                graph.set_holder(self.id, Some(tid));
                false
            }
        });
        if raised {
            Current::yield_now();
        }
    }

    /// Tries to acquire the lock without parking.
    ///
    /// Returns true on success. Nothing is donated, and the current thread
    /// never yields. This may be called inside an interrupt handler.
    ///
    /// # Panics
    ///
    /// Panics if the current thread already holds the lock.
    pub fn try_acquire(&self) -> bool {
        assert!(
            !self.held_by_current(),
            "Lock {:?} is already held by the current thread.",
            self.id
        );
        if !self.sema.try_down() {
            return false;
        }
        let tid = Current::get_tid();
        let donation = scheduling_mode().donation_enabled();
        with_priorities(|graph| {
            if donation {
                let priority = graph.priority(tid);
                graph.held_locks_mut(tid).insert(self.id, priority);
            }
            graph.set_holder(self.id, Some(tid));
        });
        true
    }

    /// Releases the lock.
    ///
    /// The donation received through this lock ends, and the highest-priority
    /// waiter, if any, is woken. If it now outranks the current thread, it
    /// runs right away.
    ///
    /// # Panics
    ///
    /// Panics if the current thread does not hold the lock.
    pub fn release(&self) {
        assert!(
            self.held_by_current(),
            "Lock {:?} is not held by the current thread.",
            self.id
        );
        let tid = Current::get_tid();
        if scheduling_mode().donation_enabled() {
            let priority = with_priorities(|graph| donation::released(graph, tid, self.id));
            debug!(
                "Thread {} released {:?}; its priority is now {}.",
                tid, self.id, priority
            );
        } else {
            with_priorities(|graph| graph.set_holder(self.id, None));
        }
        self.sema.up();
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<Lock> for Lock {
    fn as_ref(&self) -> &Lock {
        self
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock").field("id", &self.id).finish()
    }
}
