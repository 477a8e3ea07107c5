//! Interrupt
#[cfg(doc)]
use crate::spinlock::SpinLockGuard;
use crate::x86_64::{Rflags, cpu_ptr, with_cpu};
use std::{
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicIsize, Ordering},
};

pub(crate) struct InterruptGuardInner {
    initial_state: AtomicBool,
    cnt: AtomicIsize,
}

impl InterruptGuardInner {
    pub(crate) const fn new() -> Self {
        Self {
            initial_state: AtomicBool::new(true),
            cnt: AtomicIsize::new(0),
        }
    }

    fn save_nested_interrupt_state(&self, state: InterruptState) {
        if self.cnt.fetch_add(1, Ordering::SeqCst) == 0 {
            self.initial_state
                .store(state == InterruptState::On, Ordering::SeqCst);
        }
    }

    fn load_nested_interrupt_state(&self) {
        let prev = self.cnt.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "Mismatched InterruptGuard drop calls: {prev}");

        if prev == 1 && self.initial_state.load(Ordering::SeqCst) {
            unsafe { InterruptState::enable() };
        }
    }

    fn decrement_count(&self) {
        let prev = self.cnt.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "Mismatched InterruptGuard drop calls: {prev}");
    }
}

/// Enumeration representing the interrupt state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InterruptState {
    /// Interrupts are enabled.
    On,
    /// Interrupts are disabled.
    Off,
}

impl InterruptState {
    /// Reads the current interrupt state.
    ///
    /// # Returns
    /// - [`InterruptState::On`] if interrupts are enabled.
    /// - [`InterruptState::Off`] if interrupts are disabled.
    pub fn current() -> Self {
        if Rflags::read().contains(Rflags::IF) {
            Self::On
        } else {
            Self::Off
        }
    }

    /// Enables interrupts on the current core (`sti`).
    ///
    /// # Safety
    /// Enabling interrupts inside a section protected by an [`InterruptGuard`]
    /// breaks the atomicity the guard promises.
    pub unsafe fn enable() {
        Rflags::update(|flags| flags.insert(Rflags::IF));
    }

    /// Disables interrupts on the current core (`cli`).
    ///
    /// # Safety
    /// The caller is responsible for restoring the interrupt state.
    pub unsafe fn disable() {
        Rflags::update(|flags| flags.remove(Rflags::IF));
    }
}

/// An RAII-based guard for managing interrupt disabling.
///
/// When an `InterruptGuard` is created, interrupts are disabled. When the
/// outermost guard is dropped, the interrupt state is restored to what it was
/// before that guard was created.
///
/// **Important:**
/// - [`InterruptGuard`] instances **must be dropped in reverse order of their
///   creation** to prevent unintended interrupt state changes.
/// - Due to Rust's ownership and scoping rules, this invariant is naturally
///   upheld unless `drop()` is explicitly called prematurely or an
///   [`InterruptGuard`] is stored in a struct field (as [`SpinLockGuard`]
///   does).
///
/// This structure is created using [`InterruptGuard::new`].
pub struct InterruptGuard {
    core: *const crate::x86_64::Cpu,
    _not_send: PhantomData<*const ()>,
}

impl InterruptGuard {
    /// Creates a new `InterruptGuard`, disabling interrupts.
    ///
    /// # Example
    /// ```rust
    /// use abyss::interrupt::{InterruptGuard, InterruptState};
    ///
    /// let guard = InterruptGuard::new(); // Disables interrupts
    /// assert_eq!(InterruptState::current(), InterruptState::Off);
    /// drop(guard);
    /// assert_eq!(InterruptState::current(), InterruptState::On);
    /// ```
    pub fn new() -> Self {
        let state = InterruptState::current();
        unsafe { InterruptState::disable() };
        std::sync::atomic::fence(Ordering::SeqCst);

        with_cpu(|cpu| cpu.interrupt.save_nested_interrupt_state(state));

        Self {
            core: cpu_ptr(),
            _not_send: PhantomData,
        }
    }

    /// Forget this guard without restoring the interrupt state.
    ///
    /// The nesting count is still decremented, so interrupts stay disabled
    /// until someone enables them explicitly. This is how a thread keeps
    /// interrupts off across a context switch.
    pub fn consume(self) {
        with_cpu(|cpu| cpu.interrupt.decrement_count());
        std::mem::forget(self);
    }

    /// Returns true if any guard is alive on the current core.
    pub fn is_guarded() -> bool {
        with_cpu(|cpu| cpu.interrupt.cnt.load(Ordering::SeqCst) > 0)
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.core != cpu_ptr() {
            panic!("InterruptGuard dropped on different core.");
        }

        with_cpu(|cpu| cpu.interrupt.load_nested_interrupt_state());
        std::sync::atomic::fence(Ordering::SeqCst);
    }
}

/// Returns true if the current core is executing an interrupt handler.
pub fn in_interrupt_context() -> bool {
    with_cpu(|cpu| cpu.in_interrupt.load(Ordering::SeqCst))
}

/// Request a reschedule right after the running interrupt handler returns.
///
/// Handlers cannot yield the core themselves; they ask the interrupt
/// dispatcher to do it on their behalf.
pub fn yield_on_return() {
    assert!(
        in_interrupt_context(),
        "yield_on_return is only meaningful inside an interrupt handler."
    );
    with_cpu(|cpu| cpu.yield_on_return.store(true, Ordering::SeqCst));
}

/// Consume the pending yield-on-return request, if any.
pub fn take_yield_on_return() -> bool {
    with_cpu(|cpu| cpu.yield_on_return.swap(false, Ordering::SeqCst))
}

/// The execution context of an interrupt handler.
///
/// While it is alive, interrupts are disabled and [`in_interrupt_context`]
/// returns true. Interrupts do not nest.
pub struct InterruptContext {
    _guard: InterruptGuard,
}

impl InterruptContext {
    /// Enter the interrupt context on the current core.
    pub fn enter() -> Self {
        assert!(!in_interrupt_context(), "Nested interrupt is not supported.");
        let guard = InterruptGuard::new();
        with_cpu(|cpu| cpu.in_interrupt.store(true, Ordering::SeqCst));
        Self { _guard: guard }
    }
}

impl Drop for InterruptContext {
    fn drop(&mut self) {
        with_cpu(|cpu| cpu.in_interrupt.store(false, Ordering::SeqCst));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_guards_restore_the_outermost_state() {
        assert_eq!(InterruptState::current(), InterruptState::On);
        let outer = InterruptGuard::new();
        let inner = InterruptGuard::new();
        assert!(InterruptGuard::is_guarded());
        drop(inner);
        assert_eq!(InterruptState::current(), InterruptState::Off);
        drop(outer);
        assert_eq!(InterruptState::current(), InterruptState::On);
        assert!(!InterruptGuard::is_guarded());
    }

    #[test]
    fn consumed_guard_leaves_interrupts_disabled() {
        let guard = InterruptGuard::new();
        guard.consume();
        assert!(!InterruptGuard::is_guarded());
        assert_eq!(InterruptState::current(), InterruptState::Off);
        unsafe { InterruptState::enable() };
    }

    #[test]
    fn interrupt_context_is_visible_to_handlers() {
        assert!(!in_interrupt_context());
        {
            let _ctx = InterruptContext::enter();
            assert!(in_interrupt_context());
            assert_eq!(InterruptState::current(), InterruptState::Off);
            yield_on_return();
        }
        assert!(!in_interrupt_context());
        assert!(take_yield_on_return());
        assert!(!take_yield_on_return());
    }
}
