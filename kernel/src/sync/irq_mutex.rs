//! Spin lock that masks interrupts while held
//!
//! The run queue, alarm lists and event queues are mutated both from thread
//! context and from the preemption interrupt. Holding one of them with
//! interrupts enabled would let the handler spin on a lock its own CPU owns.

use core::{
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
};

use spin::{Mutex, MutexGuard};

use crate::arch::Platform;

pub struct IrqMutex<T> {
    inner: Mutex<T>,
}

impl<T> IrqMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Mask interrupts on the calling CPU, then take the lock.
    ///
    /// The previous interrupt state is restored after the lock is released.
    pub fn lock<'a>(&'a self, platform: &'a dyn Platform) -> IrqMutexGuard<'a, T> {
        let was_enabled = platform.disable_interrupts();
        IrqMutexGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
            platform,
            was_enabled,
        }
    }

    /// Whether some CPU currently holds the lock. Diagnostics only.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

pub struct IrqMutexGuard<'a, T> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    platform: &'a dyn Platform,
    was_enabled: bool,
}

impl<T> Deref for IrqMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqMutexGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: the guard is dropped exactly once, here, and never touched
        // again.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.platform.restore_interrupts(self.was_enabled);
    }
}
