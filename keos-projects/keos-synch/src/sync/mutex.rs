//! # Mutex.
//!
//! Mutex is a synchronization primitive that allows **only one thread at a
//! time** to access the data it protects. It is a [`Lock`] that owns its data:
//! the data can only be reached through the [`MutexGuard`] returned by
//! [`Mutex::lock`], so it is never touched without holding the lock.
//!
//! As with [`SpinLock`], the guard must be released explicitly with
//! [`MutexGuard::unlock`]; dropping it is a bug and panics.
//!
//! [`SpinLock`]: keos::sync::SpinLock
use super::Lock;
use keos::sync::WouldBlock;
use std::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

/// A mutual exclusion primitive useful for protecting shared data
///
/// This mutex will block threads waiting for the lock to become available.
/// Waiters donate their priority to the holder.
///
/// # Examples
///
/// ```
/// use keos::thread::ThreadBuilder;
/// use keos_synch::sync::Mutex;
/// use std::sync::Arc;
///
/// # keos::SystemConfigurationBuilder::new().set_quiet(true).boot(|| {
/// const N: usize = 10;
///
/// let data = Arc::new(Mutex::new(0));
/// let handles: Vec<_> = (0..N)
///     .map(|_| {
///         let data = Arc::clone(&data);
///         ThreadBuilder::new("work").spawn(move || {
///             let mut data = data.lock();
///             *data += 1;
///             // the lock must be "explicitly" unlocked.
///             data.unlock();
///         })
///     })
///     .collect();
/// for handle in handles {
///     handle.join();
/// }
/// let data = data.lock();
/// assert_eq!(*data, N);
/// data.unlock();
/// # });
/// ```
pub struct Mutex<T> {
    lock: Lock,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    pub fn new(t: T) -> Mutex<T> {
        Mutex {
            lock: Lock::new(),
            data: UnsafeCell::new(t),
        }
    }

    /// Acquires a mutex, blocking the current thread until it is able to do
    /// so.
    ///
    /// Upon returning, the thread is the only thread with the lock held.
    ///
    /// # Panics
    ///
    /// Panics if the current thread already holds the mutex.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.lock.acquire();
        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    /// Attempts to acquire this lock.
    ///
    /// This function does not block.
    ///
    /// # Errors
    ///
    /// If the mutex could not be acquired because it is already locked, then
    /// this call will return the [`WouldBlock`] error.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, WouldBlock> {
        if self.lock.try_acquire() {
            Ok(MutexGuard {
                mutex: self,
                _not_send: PhantomData,
            })
        } else {
            Err(WouldBlock)
        }
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for Mutex<T> {
    /// Creates a `Mutex<T>`, with the `Default` value for T.
    fn default() -> Mutex<T> {
        Mutex::new(Default::default())
    }
}

impl<T> AsRef<Lock> for Mutex<T> {
    fn as_ref(&self) -> &Lock {
        &self.lock
    }
}

/// An implementation of a "scoped lock" of a mutex.
///
/// The lock must be explicitly unlocked by [`unlock`] method. When this
/// structure is dropped without unlocking, the panic occurs.
///
/// This structure is created by the [`lock`] and [`try_lock`] methods on
/// [`Mutex`].
///
/// [`lock`]: Mutex::lock
/// [`try_lock`]: Mutex::try_lock
/// [`unlock`]: MutexGuard::unlock
pub struct MutexGuard<'a, T: 'a> {
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<T> MutexGuard<'_, T> {
    /// Releases the underlying [`Mutex`].
    pub fn unlock(self) {
        self.mutex.lock.release();
        std::mem::forget(self);
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> AsRef<Lock> for MutexGuard<'_, T> {
    fn as_ref(&self) -> &Lock {
        &self.mutex.lock
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            panic!("`.unlock()` must be explicitly called for MutexGuard.");
        }
    }
}
