// SPDX-License-Identifier: MPL-2.0

use core::ops::{Deref, DerefMut};

use crate::{
    irq::{self, DisabledLocalIrqGuard},
    platform::IrqChip,
    prelude::*,
};

/// A spin lock that may be shared with interrupt handlers.
///
/// Local IRQs are disabled for as long as the lock is held, so a handler
/// running on the lock holder's CPU can never spin on it.
pub struct SpinLock<T> {
    irq_chip: Arc<dyn IrqChip>,
    inner: Mutex<T>,
}

impl<T> SpinLock<T> {
    /// Creates a new spin lock whose holders mask the IRQs of `irq_chip`.
    pub fn new(val: T, irq_chip: Arc<dyn IrqChip>) -> Self {
        Self {
            irq_chip,
            inner: Mutex::new(val),
        }
    }

    /// Acquires the spin lock with disabling the local IRQs.
    ///
    /// This method runs in a busy loop until the lock can be acquired.
    /// After acquiring the spin lock, all interrupts are disabled.
    pub fn lock_irq_disabled(&self) -> SpinLockGuard<'_, T> {
        let irq_guard = irq::disable_local(self.irq_chip.as_ref());
        SpinLockGuard {
            inner: self.inner.lock(),
            _irq_guard: irq_guard,
        }
    }
}

/// The guard of a [`SpinLock`].
///
/// The lock is released before the local IRQs are restored.
pub struct SpinLockGuard<'a, T> {
    inner: MutexGuard<'a, T>,
    _irq_guard: DisabledLocalIrqGuard<'a>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
