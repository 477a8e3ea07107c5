use grading::{assert_output, kernel_test};
use keos::{
    println,
    thread::{Current, ThreadBuilder, priority::PRI_DEFAULT},
};
use keos_synch::sync::Lock;
use std::sync::Arc;

fn acquire_and_report(lock: Arc<Lock>, name: &'static str) -> impl FnOnce() + Send + 'static {
    move || {
        lock.acquire();
        println!("{name}: got the lock");
        lock.release();
        println!("{name}: done");
    }
}

#[assert_output(b"This thread should have priority 32.  Actual priority: 32.
This thread should have priority 33.  Actual priority: 33.
acquire2: got the lock
acquire2: done
acquire1: got the lock
acquire1: done
acquire2, acquire1 must already have finished, in that order.
This should be the last line before finishing this test.
")]
#[kernel_test]
fn donate_one() {
    let lock = Arc::new(Lock::new());
    lock.acquire();

    ThreadBuilder::new("acquire1")
        .priority(PRI_DEFAULT + 1)
        .spawn(acquire_and_report(lock.clone(), "acquire1"));
    println!(
        "This thread should have priority {}.  Actual priority: {}.",
        PRI_DEFAULT + 1,
        Current::get_priority()
    );

    ThreadBuilder::new("acquire2")
        .priority(PRI_DEFAULT + 2)
        .spawn(acquire_and_report(lock.clone(), "acquire2"));
    println!(
        "This thread should have priority {}.  Actual priority: {}.",
        PRI_DEFAULT + 2,
        Current::get_priority()
    );

    lock.release();
    println!("acquire2, acquire1 must already have finished, in that order.");
    println!("This should be the last line before finishing this test.");
}

#[assert_output(b"Main thread should have priority 32.  Actual priority: 32.
Main thread should have priority 33.  Actual priority: 33.
Thread b acquired lock b.
Thread b finished.
Thread b should have just finished.
Main thread should have priority 32.  Actual priority: 32.
Thread a acquired lock a.
Thread a finished.
Thread a should have just finished.
Main thread should have priority 31.  Actual priority: 31.
")]
#[kernel_test]
fn donate_multiple() {
    let a = Arc::new(Lock::new());
    let b = Arc::new(Lock::new());
    a.acquire();
    b.acquire();

    for (name, lock, priority) in [("a", &a, PRI_DEFAULT + 1), ("b", &b, PRI_DEFAULT + 2)] {
        let lock = lock.clone();
        ThreadBuilder::new(name).priority(priority).spawn(move || {
            lock.acquire();
            println!("Thread {name} acquired lock {name}.");
            lock.release();
            println!("Thread {name} finished.");
        });
        println!(
            "Main thread should have priority {}.  Actual priority: {}.",
            priority,
            Current::get_priority()
        );
    }

    b.release();
    println!("Thread b should have just finished.");
    println!(
        "Main thread should have priority {}.  Actual priority: {}.",
        PRI_DEFAULT + 1,
        Current::get_priority()
    );

    a.release();
    println!("Thread a should have just finished.");
    println!(
        "Main thread should have priority {}.  Actual priority: {}.",
        PRI_DEFAULT,
        Current::get_priority()
    );
}

#[assert_output(b"Low thread should have priority 32.  Actual priority: 32.
Low thread should have priority 33.  Actual priority: 33.
Medium thread should have priority 33.  Actual priority: 33.
Medium thread got the lock.
High thread got the lock.
High thread finished.
High thread should have just finished.
Middle thread finished.
Medium thread should just have finished.
Low thread should have priority 31.  Actual priority: 31.
")]
#[kernel_test]
fn donate_nest() {
    let a = Arc::new(Lock::new());
    let b = Arc::new(Lock::new());
    a.acquire();

    {
        let (a, b) = (a.clone(), b.clone());
        ThreadBuilder::new("medium")
            .priority(PRI_DEFAULT + 1)
            .spawn(move || {
                b.acquire();
                a.acquire();
                println!(
                    "Medium thread should have priority {}.  Actual priority: {}.",
                    PRI_DEFAULT + 2,
                    Current::get_priority()
                );
                println!("Medium thread got the lock.");
                a.release();
                Current::yield_now();
                b.release();
                Current::yield_now();
                println!("High thread should have just finished.");
                println!("Middle thread finished.");
            });
    }
    Current::yield_now();
    println!(
        "Low thread should have priority {}.  Actual priority: {}.",
        PRI_DEFAULT + 1,
        Current::get_priority()
    );

    {
        let b = b.clone();
        ThreadBuilder::new("high")
            .priority(PRI_DEFAULT + 2)
            .spawn(move || {
                b.acquire();
                println!("High thread got the lock.");
                b.release();
                println!("High thread finished.");
            });
    }
    Current::yield_now();
    println!(
        "Low thread should have priority {}.  Actual priority: {}.",
        PRI_DEFAULT + 2,
        Current::get_priority()
    );

    a.release();
    Current::yield_now();
    println!("Medium thread should just have finished.");
    println!(
        "Low thread should have priority {}.  Actual priority: {}.",
        PRI_DEFAULT,
        Current::get_priority()
    );
}

#[assert_output(b"Main thread should have priority 41.  Actual priority: 41.
Lowering base priority...
Main thread should have priority 41.  Actual priority: 41.
acquire: got the lock
acquire: done
acquire must already have finished.
Main thread should have priority 21.  Actual priority: 21.
")]
#[kernel_test]
fn donate_lower() {
    let lock = Arc::new(Lock::new());
    lock.acquire();

    ThreadBuilder::new("acquire")
        .priority(PRI_DEFAULT + 10)
        .spawn(acquire_and_report(lock.clone(), "acquire"));
    println!(
        "Main thread should have priority {}.  Actual priority: {}.",
        PRI_DEFAULT + 10,
        Current::get_priority()
    );

    println!("Lowering base priority...");
    Current::set_priority(PRI_DEFAULT - 10);
    println!(
        "Main thread should have priority {}.  Actual priority: {}.",
        PRI_DEFAULT + 10,
        Current::get_priority()
    );

    lock.release();
    println!("acquire must already have finished.");
    println!(
        "Main thread should have priority {}.  Actual priority: {}.",
        PRI_DEFAULT - 10,
        Current::get_priority()
    );
}

#[kernel_test]
fn donation_ends_with_the_chain() {
    let a = Arc::new(Lock::new());
    let b = Arc::new(Lock::new());
    let c = Arc::new(Lock::new());
    a.acquire();

    // low <- a - mid1 <- b - mid2 <- c - high
    let mid1 = {
        let (a, b) = (a.clone(), b.clone());
        ThreadBuilder::new("mid1")
            .priority(PRI_DEFAULT + 1)
            .spawn(move || {
                b.acquire();
                a.acquire();
                a.release();
                b.release();
            })
    };
    let mid2 = {
        let (b, c) = (b.clone(), c.clone());
        ThreadBuilder::new("mid2")
            .priority(PRI_DEFAULT + 2)
            .spawn(move || {
                c.acquire();
                b.acquire();
                b.release();
                c.release();
            })
    };
    assert_eq!(Current::get_priority(), PRI_DEFAULT + 2);

    let high = {
        let c = c.clone();
        ThreadBuilder::new("high")
            .priority(PRI_DEFAULT + 20)
            .spawn(move || {
                c.acquire();
                assert_eq!(Current::get_priority(), PRI_DEFAULT + 20);
                c.release();
            })
    };
    assert_eq!(Current::get_priority(), PRI_DEFAULT + 20);
    assert_eq!(a.holder(), Some(Current::get_tid()));

    a.release();
    assert_eq!(Current::get_priority(), PRI_DEFAULT);
    for handle in [high, mid2, mid1] {
        assert_eq!(handle.join(), 0);
    }
    assert_eq!(a.holder(), None);
    assert_eq!(b.holder(), None);
    assert_eq!(c.holder(), None);
}

#[assert_output(b"Main thread has priority 31.
waiter: got the lock
waiter: done
")]
#[kernel_test(mlfqs)]
fn no_donation_under_mlfqs() {
    let lock = Arc::new(Lock::new());
    lock.acquire();

    let handle = ThreadBuilder::new("waiter")
        .priority(PRI_DEFAULT + 1)
        .spawn(acquire_and_report(lock.clone(), "waiter"));
    println!("Main thread has priority {}.", Current::get_priority());
    assert_eq!(lock.holder(), Some(Current::get_tid()));

    lock.release();
    assert_eq!(handle.join(), 0);
}
