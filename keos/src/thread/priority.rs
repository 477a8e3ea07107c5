//! Thread priorities and the priority-holder capability.
//!
//! Every thread carries two priorities:
//!
//! - The **base priority**, assigned when the thread is created and changed
//!   only by [`Current::set_priority`].
//! - The **effective priority**, which the scheduler actually uses. It is the
//!   maximum of the base priority and the priorities *donated* to the thread
//!   through the locks it holds.
//!
//! Donation crosses the border between the scheduler, which owns the
//! priorities, and the synchronization primitives, which know who waits on
//! what. This module defines that border: the [`PriorityHolder`] trait is the
//! only way a lock reads or changes a thread's priorities, its waiting lock,
//! and its held-lock collection. The kernel implements it with the
//! [`PriorityTable`], reachable through [`with_priorities`].
//!
//! Locks and threads refer to each other by handle ([`LockId`] and [`Tid`]),
//! never by reference, so the donation graph can be walked and updated while
//! the locks themselves are owned by arbitrary clients.
//!
//! [`Current::set_priority`]: crate::thread::Current::set_priority
use crate::{kernel::kernel, thread::Tid};
use std::{
    cmp::Reverse,
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

/// A scheduling priority. Larger is more urgent.
pub type Priority = u8;

/// Lowest priority.
pub const PRI_MIN: Priority = 0;
/// Default priority.
pub const PRI_DEFAULT: Priority = 31;
/// Highest priority.
pub const PRI_MAX: Priority = 63;

/// Handle of a lock in the donation graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(u64);

impl LockId {
    /// Allocate a fresh, never reused handle.
    pub fn allocate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A lock in a thread's held-lock collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeldLock {
    /// The held lock.
    pub lock: LockId,
    /// Highest priority among the threads blocked on the lock, or the priority
    /// of the holder at the time it acquired the lock.
    pub max_priority: Priority,
}

/// The locks held by a thread, ordered by `max_priority`, highest first.
///
/// Locks with equal `max_priority` keep the order in which they were
/// inserted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeldLocks {
    locks: Vec<HeldLock>,
}

impl HeldLocks {
    /// Create an empty collection.
    pub const fn new() -> Self {
        Self { locks: Vec::new() }
    }

    /// Insert `lock` behind every lock whose `max_priority` is not lower.
    pub fn insert(&mut self, lock: LockId, max_priority: Priority) {
        let at = self
            .locks
            .iter()
            .position(|held| held.max_priority < max_priority)
            .unwrap_or(self.locks.len());
        self.locks.insert(at, HeldLock { lock, max_priority });
    }

    /// Remove `lock`, returning its entry if it was held.
    pub fn remove(&mut self, lock: LockId) -> Option<HeldLock> {
        let at = self.locks.iter().position(|held| held.lock == lock)?;
        Some(self.locks.remove(at))
    }

    /// The recorded `max_priority` of `lock`, if it is held.
    pub fn get(&self, lock: LockId) -> Option<Priority> {
        self.locks
            .iter()
            .find(|held| held.lock == lock)
            .map(|held| held.max_priority)
    }

    /// Raise the `max_priority` of `lock` to `priority` and restore the order.
    ///
    /// Returns false if `lock` is not held.
    pub fn raise(&mut self, lock: LockId, priority: Priority) -> bool {
        match self.locks.iter_mut().find(|held| held.lock == lock) {
            Some(held) => {
                held.max_priority = held.max_priority.max(priority);
                self.locks.sort_by_key(|held| Reverse(held.max_priority));
                true
            }
            None => false,
        }
    }

    /// The highest `max_priority` among the held locks.
    pub fn highest(&self) -> Option<Priority> {
        self.locks.first().map(|held| held.max_priority)
    }

    /// Returns true if no lock is held.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Number of held locks.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Iterate over the held locks, highest `max_priority` first.
    pub fn iter(&self) -> impl Iterator<Item = &HeldLock> {
        self.locks.iter()
    }
}

/// The capability a scheduler grants to the synchronization primitives.
///
/// A `PriorityHolder` owns, for every live thread, its base and effective
/// priority, the lock it is blocked on, and the locks it holds; and for every
/// held lock, its holder. Implementations only store; the donation protocol
/// that keeps the effective priorities consistent lives with the locks.
///
/// Querying an unknown thread is a bug and panics.
pub trait PriorityHolder {
    /// The base priority of `tid`.
    fn base_priority(&self, tid: Tid) -> Priority;

    /// Set the base priority of `tid`. The effective priority is untouched.
    fn set_base_priority(&mut self, tid: Tid, priority: Priority);

    /// The effective priority of `tid`.
    fn priority(&self, tid: Tid) -> Priority;

    /// Set the effective priority of `tid`.
    fn set_priority(&mut self, tid: Tid, priority: Priority);

    /// The lock `tid` is blocked on, if any.
    fn lock_waiting(&self, tid: Tid) -> Option<LockId>;

    /// Record the lock `tid` is blocked on.
    fn set_lock_waiting(&mut self, tid: Tid, lock: Option<LockId>);

    /// The locks `tid` holds.
    fn held_locks(&self, tid: Tid) -> &HeldLocks;

    /// The locks `tid` holds, mutably.
    fn held_locks_mut(&mut self, tid: Tid) -> &mut HeldLocks;

    /// The thread holding `lock`, if any.
    fn holder(&self, lock: LockId) -> Option<Tid>;

    /// Record the thread holding `lock`.
    fn set_holder(&mut self, lock: LockId, holder: Option<Tid>);

    /// The `max_priority` of `lock`, if it is held.
    fn max_priority(&self, lock: LockId) -> Option<Priority> {
        self.holder(lock)
            .and_then(|holder| self.held_locks(holder).get(lock))
    }

    /// Recompute the effective priority of `tid` from its base priority and
    /// the locks it holds, and return it.
    fn update_priority(&mut self, tid: Tid) -> Priority {
        let base = self.base_priority(tid);
        let priority = self
            .held_locks(tid)
            .highest()
            .map_or(base, |donated| donated.max(base));
        self.set_priority(tid, priority);
        priority
    }
}

#[derive(Debug)]
struct ThreadPriority {
    base: Priority,
    priority: Priority,
    lock_waiting: Option<LockId>,
    locks: HeldLocks,
}

/// The kernel's [`PriorityHolder`].
#[derive(Debug, Default)]
pub struct PriorityTable {
    threads: BTreeMap<Tid, ThreadPriority>,
    holders: BTreeMap<LockId, Tid>,
}

impl PriorityTable {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            threads: BTreeMap::new(),
            holders: BTreeMap::new(),
        }
    }

    /// Register `tid` with both priorities set to `priority`.
    pub fn insert(&mut self, tid: Tid, priority: Priority) {
        self.threads.insert(
            tid,
            ThreadPriority {
                base: priority,
                priority,
                lock_waiting: None,
                locks: HeldLocks::new(),
            },
        );
    }

    /// Forget `tid` and every lock it still holds.
    pub fn remove(&mut self, tid: Tid) {
        self.threads.remove(&tid);
        self.holders.retain(|_, holder| *holder != tid);
    }

    /// Returns true if `tid` is registered.
    pub fn contains(&self, tid: Tid) -> bool {
        self.threads.contains_key(&tid)
    }

    fn entry(&self, tid: Tid) -> &ThreadPriority {
        self.threads
            .get(&tid)
            .unwrap_or_else(|| panic!("Thread {tid} has no priority record."))
    }

    fn entry_mut(&mut self, tid: Tid) -> &mut ThreadPriority {
        self.threads
            .get_mut(&tid)
            .unwrap_or_else(|| panic!("Thread {tid} has no priority record."))
    }
}

impl PriorityHolder for PriorityTable {
    fn base_priority(&self, tid: Tid) -> Priority {
        self.entry(tid).base
    }

    fn set_base_priority(&mut self, tid: Tid, priority: Priority) {
        self.entry_mut(tid).base = priority;
    }

    fn priority(&self, tid: Tid) -> Priority {
        self.entry(tid).priority
    }

    fn set_priority(&mut self, tid: Tid, priority: Priority) {
        self.entry_mut(tid).priority = priority;
    }

    fn lock_waiting(&self, tid: Tid) -> Option<LockId> {
        self.entry(tid).lock_waiting
    }

    fn set_lock_waiting(&mut self, tid: Tid, lock: Option<LockId>) {
        self.entry_mut(tid).lock_waiting = lock;
    }

    fn held_locks(&self, tid: Tid) -> &HeldLocks {
        &self.entry(tid).locks
    }

    fn held_locks_mut(&mut self, tid: Tid) -> &mut HeldLocks {
        &mut self.entry_mut(tid).locks
    }

    fn holder(&self, lock: LockId) -> Option<Tid> {
        self.holders.get(&lock).copied()
    }

    fn set_holder(&mut self, lock: LockId, holder: Option<Tid>) {
        match holder {
            Some(tid) => self.holders.insert(lock, tid),
            None => self.holders.remove(&lock),
        };
    }
}

/// Run `f` on the priority table of the running machine.
///
/// Interrupts are disabled while `f` runs, so `f` observes and leaves a
/// consistent donation graph. `f` must not block or reschedule.
pub fn with_priorities<R>(f: impl FnOnce(&mut PriorityTable) -> R) -> R {
    let kernel = kernel();
    let mut table = kernel.priorities.lock();
    let result = f(&mut table);
    table.unlock();
    result
}
