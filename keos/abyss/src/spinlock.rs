//! Interrupt-disabling spinlock.

use std::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// The lock could not be acquired at this time because the operation would
/// otherwise block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WouldBlock;

/// A mutual exclusion primitive useful for protecting shared data.
///
/// Acquiring a spinlock disables interrupts on the current core, so the
/// critical section can neither be preempted nor interrupted. On the
/// uniprocessor this is what makes a critical section atomic; the lock flag
/// itself only guards against the host threads of a powered-off machine.
///
/// The data can only be accessed through the guards returned from [`lock`]
/// and [`try_lock`]. A guard must be released with [`SpinLockGuard::unlock`];
/// dropping it is a bug and panics. A thread must not block while holding a
/// spinlock.
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
///
/// # Examples
///
/// ```
/// use abyss::spinlock::SpinLock;
///
/// let counter = SpinLock::new(0);
/// let mut guard = counter.lock();
/// *guard += 1;
/// // the lock must be "explicitly" unlocked before `guard` goes out of scope.
/// guard.unlock();
/// ```
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes this spinlock, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires a spinlock, spinning until it is able to do so.
    ///
    /// Interrupts stay disabled until the returned guard is unlocked. Locking a
    /// spinlock that the current thread already holds never returns.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let guard = loop {
            let guard = crate::interrupt::InterruptGuard::new();
            if !self.locked.swap(true, Ordering::Acquire) {
                break guard;
            }
            drop(guard);
            std::hint::spin_loop();
        };

        SpinLockGuard {
            caller: std::panic::Location::caller(),
            lock: self,
            guard: Some(guard),
            _not_send: PhantomData,
        }
    }

    /// Attempts to acquire this lock without spinning.
    ///
    /// # Errors
    ///
    /// Returns [`WouldBlock`] if the spinlock is already locked.
    #[track_caller]
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        let guard = crate::interrupt::InterruptGuard::new();
        if self.locked.swap(true, Ordering::Acquire) {
            return Err(WouldBlock);
        }
        Ok(SpinLockGuard {
            caller: std::panic::Location::caller(),
            lock: self,
            guard: Some(guard),
            _not_send: PhantomData,
        })
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

/// A "scoped lock" of a spinlock.
///
/// The lock must be explicitly released by [`unlock`]. When this structure is
/// dropped without unlock, panic occurs, unless the thread is already
/// unwinding; then the lock is silently released.
///
/// [`unlock`]: Self::unlock
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    caller: &'static std::panic::Location<'static>,
    lock: &'a SpinLock<T>,
    guard: Option<crate::interrupt::InterruptGuard>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the underlying [`SpinLock`] and restores the interrupt state.
    pub fn unlock(mut self) {
        self.release();
        std::mem::forget(self);
    }

    fn release(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        self.guard.take();
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.release();
            return;
        }
        panic!(
            "`.unlock()` must be explicitly called before dropping SpinLockGuard.
The lock is held at {:?}.",
            self.caller
        );
    }
}
