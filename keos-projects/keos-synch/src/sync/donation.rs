//! # Priority donation.
//!
//! The donation graph is a forest. Each thread waits on at most one lock (its
//! `lock_waiting`), and each lock has at most one holder. Following the two
//! relations from a blocked thread yields its **blocking chain**:
//!
//! ```text
//!   H --waits on--> B --held by--> M --waits on--> A --held by--> L
//! ```
//!
//! Each held lock records the highest priority among its waiters in its
//! `max_priority`, and a thread's effective priority is the maximum of its
//! base priority and the `max_priority` of every lock it holds. The three
//! functions of this module keep both facts true as threads block on,
//! acquire, and release locks:
//!
//! - [`donate`] walks the blocking chain of a thread that is about to block,
//!   raising every lock and holder on the way.
//! - [`acquired`] registers a freshly acquired lock with its new holder.
//! - [`released`] unregisters a lock and lets the holder's priority fall back.
//!
//! They operate on any [`PriorityHolder`], so the protocol can be exercised
//! without a running kernel. The caller must keep interrupts disabled while a
//! function runs, which [`with_priorities`] does.
//!
//! [`with_priorities`]: keos::thread::priority::with_priorities
use keos::thread::{
    Tid,
    priority::{LockId, Priority, PriorityHolder},
};

/// Donate the priority of `donor`, which is about to block on `lock`.
///
/// Records `lock` as the lock `donor` waits on, then walks the blocking chain
/// starting at `lock`. While the priority of `donor` exceeds the
/// `max_priority` of the current lock, the lock is raised to it, the holder's
/// effective priority is recomputed, and the walk advances to the lock the
/// holder waits on. A step that raises nothing ends the walk, as everything
/// further down the chain has already received at least as much.
///
/// Does nothing if `lock` is free. Returns the number of locks raised.
pub fn donate<H: PriorityHolder + ?Sized>(graph: &mut H, donor: Tid, lock: LockId) -> usize {
    if graph.holder(lock).is_none() {
        return 0;
    }
    graph.set_lock_waiting(donor, Some(lock));

    let priority = graph.priority(donor);
    let mut raised = 0;
    let mut next = Some(lock);
    while let Some(lock) = next {
        let Some(holder) = graph.holder(lock) else {
            break;
        };
        match graph.held_locks(holder).get(lock) {
            Some(max_priority) if priority > max_priority => {}
            _ => break,
        }
        graph.held_locks_mut(holder).raise(lock, priority);
        graph.update_priority(holder);
        raised += 1;
        next = graph.lock_waiting(holder);
    }
    raised
}

/// Register `lock` as held by `tid`, which has just acquired it.
///
/// The thread no longer waits on any lock. The lock's `max_priority` starts
/// at the thread's effective priority. Returns true if the thread's effective
/// priority rose, in which case the caller must yield.
pub fn acquired<H: PriorityHolder + ?Sized>(graph: &mut H, tid: Tid, lock: LockId) -> bool {
    graph.set_lock_waiting(tid, None);
    let priority = graph.priority(tid);
    graph.held_locks_mut(tid).insert(lock, priority);
    graph.set_holder(lock, Some(tid));
    graph.update_priority(tid) > priority
}

/// Unregister `lock` from `tid`, which is releasing it.
///
/// Returns the recomputed effective priority of `tid`: the maximum of its
/// base priority and the `max_priority` of the locks it still holds.
pub fn released<H: PriorityHolder + ?Sized>(graph: &mut H, tid: Tid, lock: LockId) -> Priority {
    graph.held_locks_mut(tid).remove(lock);
    graph.set_holder(lock, None);
    graph.update_priority(tid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keos::thread::priority::{HeldLocks, PRI_DEFAULT};
    use std::collections::BTreeMap;

    /// A scheduler that only keeps priorities.
    #[derive(Default)]
    struct FakeScheduler {
        threads: BTreeMap<Tid, (Priority, Priority, Option<LockId>, HeldLocks)>,
        holders: BTreeMap<LockId, Tid>,
    }

    impl FakeScheduler {
        fn spawn(&mut self, tid: Tid, priority: Priority) {
            self.threads
                .insert(tid, (priority, priority, None, HeldLocks::new()));
        }

        fn acquire(&mut self, tid: Tid, lock: LockId) {
            assert!(self.holder(lock).is_none());
            acquired(self, tid, lock);
        }
    }

    impl PriorityHolder for FakeScheduler {
        fn base_priority(&self, tid: Tid) -> Priority {
            self.threads[&tid].0
        }
        fn set_base_priority(&mut self, tid: Tid, priority: Priority) {
            self.threads.get_mut(&tid).unwrap().0 = priority;
        }
        fn priority(&self, tid: Tid) -> Priority {
            self.threads[&tid].1
        }
        fn set_priority(&mut self, tid: Tid, priority: Priority) {
            self.threads.get_mut(&tid).unwrap().1 = priority;
        }
        fn lock_waiting(&self, tid: Tid) -> Option<LockId> {
            self.threads[&tid].2
        }
        fn set_lock_waiting(&mut self, tid: Tid, lock: Option<LockId>) {
            self.threads.get_mut(&tid).unwrap().2 = lock;
        }
        fn held_locks(&self, tid: Tid) -> &HeldLocks {
            &self.threads[&tid].3
        }
        fn held_locks_mut(&mut self, tid: Tid) -> &mut HeldLocks {
            &mut self.threads.get_mut(&tid).unwrap().3
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

    const L: Tid = 1;
    const M: Tid = 2;
    const H: Tid = 3;

    #[test]
    fn donation_to_a_free_lock_is_a_no_op() {
        let mut graph = FakeScheduler::default();
        let a = LockId::allocate();
        graph.spawn(H, PRI_DEFAULT + 2);
        assert_eq!(donate(&mut graph, H, a), 0);
        assert_eq!(graph.lock_waiting(H), None);
    }

    #[test]
    fn single_donation_reverts_on_release() {
        let mut graph = FakeScheduler::default();
        let a = LockId::allocate();
        graph.spawn(L, PRI_DEFAULT);
        graph.spawn(H, PRI_DEFAULT + 10);
        graph.acquire(L, a);

        assert_eq!(donate(&mut graph, H, a), 1);
        assert_eq!(graph.lock_waiting(H), Some(a));
        assert_eq!(graph.priority(L), PRI_DEFAULT + 10);
        assert_eq!(graph.max_priority(a), Some(PRI_DEFAULT + 10));

        assert_eq!(released(&mut graph, L, a), PRI_DEFAULT);
        assert!(!acquired(&mut graph, H, a));
        assert_eq!(graph.lock_waiting(H), None);
        assert_eq!(graph.holder(a), Some(H));
    }

    #[test]
    fn nested_donation_follows_the_blocking_chain() {
        let mut graph = FakeScheduler::default();
        let (a, b) = (LockId::allocate(), LockId::allocate());
        graph.spawn(L, PRI_DEFAULT);
        graph.spawn(M, PRI_DEFAULT + 1);
        graph.spawn(H, PRI_DEFAULT + 2);
        graph.acquire(L, a);
        graph.acquire(M, b);

        assert_eq!(donate(&mut graph, M, a), 1);
        assert_eq!(graph.priority(L), PRI_DEFAULT + 1);

        assert_eq!(donate(&mut graph, H, b), 2);
        assert_eq!(graph.priority(M), PRI_DEFAULT + 2);
        assert_eq!(graph.priority(L), PRI_DEFAULT + 2);

        // L releases A, which M acquires while still holding the donated B.
        assert_eq!(released(&mut graph, L, a), PRI_DEFAULT);
        assert!(!acquired(&mut graph, M, a));
        assert_eq!(graph.priority(M), PRI_DEFAULT + 2);
        assert_eq!(released(&mut graph, M, a), PRI_DEFAULT + 2);
        assert_eq!(released(&mut graph, M, b), PRI_DEFAULT + 1);
    }

    #[test]
    fn walk_stops_at_the_first_lock_it_cannot_raise() {
        let mut graph = FakeScheduler::default();
        let (a, b) = (LockId::allocate(), LockId::allocate());
        graph.spawn(L, PRI_DEFAULT);
        graph.spawn(M, PRI_DEFAULT + 5);
        graph.spawn(H, PRI_DEFAULT + 3);
        graph.acquire(L, a);
        graph.acquire(M, b);
        donate(&mut graph, M, a);

        // B already carries M's own priority, which is higher than H's.
        assert_eq!(donate(&mut graph, H, b), 0);
        assert_eq!(graph.lock_waiting(H), Some(b));
        assert_eq!(graph.priority(M), PRI_DEFAULT + 5);
        assert_eq!(graph.priority(L), PRI_DEFAULT + 5);
    }

    #[test]
    fn holder_keeps_the_highest_of_several_donations() {
        let mut graph = FakeScheduler::default();
        let (a, b) = (LockId::allocate(), LockId::allocate());
        graph.spawn(L, PRI_DEFAULT);
        graph.spawn(M, PRI_DEFAULT + 1);
        graph.spawn(H, PRI_DEFAULT + 2);
        graph.acquire(L, a);
        graph.acquire(L, b);

        donate(&mut graph, M, a);
        donate(&mut graph, H, b);
        assert_eq!(graph.priority(L), PRI_DEFAULT + 2);
        assert_eq!(graph.held_locks(L).highest(), Some(PRI_DEFAULT + 2));

        assert_eq!(released(&mut graph, L, b), PRI_DEFAULT + 1);
        assert_eq!(released(&mut graph, L, a), PRI_DEFAULT);
    }

    #[test]
    fn lowered_base_priority_waits_for_the_donation_to_end() {
        let mut graph = FakeScheduler::default();
        let a = LockId::allocate();
        graph.spawn(L, PRI_DEFAULT);
        graph.spawn(H, PRI_DEFAULT + 10);
        graph.acquire(L, a);
        donate(&mut graph, H, a);

        graph.set_base_priority(L, PRI_DEFAULT - 10);
        assert_eq!(graph.update_priority(L), PRI_DEFAULT + 10);
        assert_eq!(released(&mut graph, L, a), PRI_DEFAULT - 10);
    }

    #[test]
    fn walk_terminates_on_a_cycle() {
        let mut graph = FakeScheduler::default();
        let (a, b) = (LockId::allocate(), LockId::allocate());
        graph.spawn(L, PRI_DEFAULT);
        graph.spawn(M, PRI_DEFAULT + 1);
        graph.acquire(L, a);
        graph.acquire(M, b);

        assert_eq!(donate(&mut graph, L, b), 0);
        // M closes the cycle. The walk comes back to B, which already carries
        // M's priority, and stops there.
        assert_eq!(donate(&mut graph, M, a), 1);
        assert_eq!(graph.priority(L), PRI_DEFAULT + 1);
        assert_eq!(graph.priority(M), PRI_DEFAULT + 1);
    }
}
