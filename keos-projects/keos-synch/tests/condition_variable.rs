use grading::{assert_output, kernel_test};
use keos::{
    println,
    thread::{
        Current, ThreadBuilder,
        priority::{PRI_DEFAULT, PRI_MIN},
        with_current,
    },
};
use keos_synch::sync::{ConditionVariable, Lock, Mutex};
use std::{collections::VecDeque, sync::Arc};

#[assert_output(b"Thread priority 23 starting.
Thread priority 22 starting.
Thread priority 21 starting.
Thread priority 30 starting.
Thread priority 29 starting.
Thread priority 28 starting.
Thread priority 27 starting.
Thread priority 26 starting.
Thread priority 25 starting.
Thread priority 24 starting.
Signaling...
Thread priority 30 woke up.
Signaling...
Thread priority 29 woke up.
Signaling...
Thread priority 28 woke up.
Signaling...
Thread priority 27 woke up.
Signaling...
Thread priority 26 woke up.
Signaling...
Thread priority 25 woke up.
Signaling...
Thread priority 24 woke up.
Signaling...
Thread priority 23 woke up.
Signaling...
Thread priority 22 woke up.
Signaling...
Thread priority 21 woke up.
")]
#[kernel_test]
fn priority_condvar() {
    let shared = Arc::new((Lock::new(), ConditionVariable::new()));
    Current::set_priority(PRI_MIN);

    for i in 0..10 {
        let priority = PRI_DEFAULT - (i + 7) % 10 - 1;
        let shared = shared.clone();
        ThreadBuilder::new(format!("priority {priority}"))
            .priority(priority)
            .spawn(move || {
                let (lock, condvar) = &*shared;
                let name = with_current(|th| th.name.clone());
                println!("Thread {name} starting.");
                lock.acquire();
                condvar.wait(lock);
                println!("Thread {name} woke up.");
                lock.release();
            });
    }

    let (lock, condvar) = &*shared;
    for _ in 0..10 {
        lock.acquire();
        println!("Signaling...");
        condvar.signal(lock);
        lock.release();
    }
}

#[assert_output(b"priority 34 woke up.
priority 33 woke up.
priority 32 woke up.
")]
#[kernel_test]
fn broadcast_wakes_highest_first() {
    let shared = Arc::new((Lock::new(), ConditionVariable::new()));

    let handles: Vec<_> = [PRI_DEFAULT + 1, PRI_DEFAULT + 3, PRI_DEFAULT + 2]
        .into_iter()
        .map(|priority| {
            let shared = shared.clone();
            ThreadBuilder::new(format!("priority {priority}"))
                .priority(priority)
                .spawn(move || {
                    let (lock, condvar) = &*shared;
                    lock.acquire();
                    condvar.wait(lock);
                    println!("priority {priority} woke up.");
                    lock.release();
                })
        })
        .collect();

    let (lock, condvar) = &*shared;
    lock.acquire();
    condvar.broadcast(lock);
    // Every waiter now waits for the lock.
    assert_eq!(Current::get_priority(), PRI_DEFAULT + 3);
    lock.release();

    for handle in handles {
        assert_eq!(handle.join(), 0);
    }
}

#[assert_output(b"W woke
Y woke
")]
#[kernel_test]
fn signal_ranks_a_waiter_that_has_not_parked_yet() {
    let shared = Arc::new((Lock::new(), ConditionVariable::new()));

    // Y parks in `wait` first.
    let y = {
        let shared = shared.clone();
        ThreadBuilder::new("Y")
            .priority(PRI_DEFAULT + 2)
            .spawn(move || {
                let (lock, condvar) = &*shared;
                lock.acquire();
                condvar.wait(lock);
                println!("Y woke");
                lock.release();
            })
    };

    // W releases the lock inside `wait` to X, which signals before W parks.
    let w = {
        let shared = shared.clone();
        ThreadBuilder::new("W")
            .priority(PRI_DEFAULT + 9)
            .spawn(move || {
                let (lock, condvar) = &*shared;
                lock.acquire();
                let x = {
                    let shared = shared.clone();
                    ThreadBuilder::new("X")
                        .priority(PRI_DEFAULT + 19)
                        .spawn(move || {
                            let (lock, condvar) = &*shared;
                            lock.acquire();
                            condvar.signal(lock);
                            lock.release();
                        })
                };
                assert_eq!(Current::get_priority(), PRI_DEFAULT + 19);
                condvar.wait(lock);
                println!("W woke");
                lock.release();
                assert_eq!(x.join(), 0);
            })
    };

    let (lock, condvar) = &*shared;
    lock.acquire();
    condvar.signal(lock);
    lock.release();

    assert_eq!(w.join(), 0);
    assert_eq!(y.join(), 0);
}

#[kernel_test]
fn signal_without_waiters() {
    let lock = Lock::new();
    let condvar = ConditionVariable::new();
    lock.acquire();
    condvar.signal(&lock);
    condvar.broadcast(&lock);
    lock.release();
}

#[kernel_test]
fn bounded_buffer() {
    const CAPACITY: usize = 2;
    const ITEMS: usize = 10;

    struct Channel {
        queue: Mutex<VecDeque<usize>>,
        not_empty: ConditionVariable,
        not_full: ConditionVariable,
    }

    let channel = Arc::new(Channel {
        queue: Mutex::new(VecDeque::new()),
        not_empty: ConditionVariable::new(),
        not_full: ConditionVariable::new(),
    });

    let producer = {
        let channel = channel.clone();
        ThreadBuilder::new("producer").spawn(move || {
            for item in 0..ITEMS {
                let mut queue = channel
                    .not_full
                    .wait_while(&channel.queue, |queue| queue.len() == CAPACITY);
                queue.push_back(item);
                channel.not_empty.signal(&queue);
                queue.unlock();
            }
        })
    };

    let mut received = Vec::new();
    while received.len() < ITEMS {
        let mut queue = channel
            .not_empty
            .wait_while(&channel.queue, |queue| queue.is_empty());
        assert!(queue.len() <= CAPACITY);
        received.extend(queue.drain(..));
        channel.not_full.signal(&queue);
        queue.unlock();
    }

    assert_eq!(producer.join(), 0);
    assert_eq!(received, (0..ITEMS).collect::<Vec<_>>());
}

#[kernel_test]
#[should_panic(expected = "to be held by the current thread")]
fn signal_without_lock() {
    let lock = Lock::new();
    let condvar = ConditionVariable::new();
    condvar.signal(&lock);
}

#[kernel_test]
#[should_panic(expected = "to be held by the current thread")]
fn wait_without_lock() {
    let lock = Lock::new();
    let condvar = ConditionVariable::new();
    condvar.wait(&lock);
}
