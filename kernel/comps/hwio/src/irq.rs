// SPDX-License-Identifier: MPL-2.0

//! Interrupt lines handed out to user space.
//!
//! An interrupt session registers an [`IrqEventChannel`] as a shared,
//! level-triggered handler on its line. The handler runs in interrupt
//! context and does nothing but latch a pending flag and wake the waiters.
//! The client consumes the flag with [`IrqEventChannel::wait_for_event`].
//!
//! At most one event is tracked: interrupts that arrive while an event is
//! still pending collapse into it.

use core::{
    marker::PhantomData,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{
    platform::{IrqChip, IrqCookie, IrqHandler, IrqReturn, Task},
    prelude::*,
    sync::WaitQueue,
};

bitflags! {
    /// Flags of an interrupt handler registration, conforming to Linux's `IRQF_*`.
    pub struct IrqFlags: u32 {
        const TRIGGER_RISING  = 0x0000_0001;
        const TRIGGER_FALLING = 0x0000_0002;
        const TRIGGER_HIGH    = 0x0000_0004;
        const TRIGGER_LOW     = 0x0000_0008;
        const SHARED          = 0x0000_0080;
        const ONESHOT         = 0x0000_2000;
    }
}

/// The name under which broker handlers are registered.
pub(crate) const IRQ_HANDLER_NAME: &str = "hwio";

/// Disables all IRQs on the current CPU (i.e., locally).
///
/// This function returns a guard object, which will automatically enable local IRQs again when
/// it is dropped. This function works correctly even when it is called in a _nested_ way.
/// The local IRQs shall only be re-enabled when the most outer guard is dropped.
pub fn disable_local(irq_chip: &dyn IrqChip) -> DisabledLocalIrqGuard<'_> {
    DisabledLocalIrqGuard::new(irq_chip)
}

/// A guard for disabled local IRQs.
#[must_use]
pub struct DisabledLocalIrqGuard<'a> {
    irq_chip: &'a dyn IrqChip,
    was_enabled: bool,
    // The guard belongs to the CPU that created it.
    _not_send: PhantomData<*const ()>,
}

impl<'a> DisabledLocalIrqGuard<'a> {
    fn new(irq_chip: &'a dyn IrqChip) -> Self {
        let was_enabled = irq_chip.is_local_enabled();
        if was_enabled {
            irq_chip.disable_local();
        }
        Self {
            irq_chip,
            was_enabled,
            _not_send: PhantomData,
        }
    }
}

impl Drop for DisabledLocalIrqGuard<'_> {
    fn drop(&mut self) {
        if self.was_enabled {
            self.irq_chip.enable_local();
        }
    }
}

/// Errors of [`IrqEventChannel::wait_for_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The session is not bound to an interrupt line.
    WrongSessionKind,
    /// The wait was aborted by a signal.
    Interrupted,
}

impl From<WaitError> for Error {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::WrongSessionKind => {
                Error::with_message(Errno::EINVAL, "the session is not bound to an interrupt line")
            }
            WaitError::Interrupted => Error::with_message(Errno::EINTR, "interrupted by signal"),
        }
    }
}

/// The event channel between an interrupt line and the client waiting on it.
pub struct IrqEventChannel {
    irq_num: u32,
    pending: AtomicBool,
    wait_queue: WaitQueue,
}

impl IrqEventChannel {
    /// Creates the channel of line `irq_num`, whose handler is dispatched by `irq_chip`.
    pub(crate) fn new(irq_num: u32, irq_chip: Arc<dyn IrqChip>) -> Self {
        Self {
            irq_num,
            pending: AtomicBool::new(false),
            wait_queue: WaitQueue::new(irq_chip),
        }
    }

    pub fn irq_num(&self) -> u32 {
        self.irq_num
    }

    /// Returns whether an event has arrived that no wait has consumed yet.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Blocks the calling thread until an event is pending, then consumes it.
    ///
    /// Returns immediately if an event was latched before the call.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Interrupted`] if `task` has a pending signal before an event
    /// arrives. The pending flag is left untouched in this case, so the event is delivered
    /// to the next wait.
    pub fn wait_for_event(&self, task: &Arc<dyn Task>) -> core::result::Result<(), WaitError> {
        self.wait_queue.wait_until_or_cancelled(
            task,
            || self.take_pending().then_some(()),
            || {
                if task.has_pending_signal() {
                    Err(WaitError::Interrupted)
                } else {
                    Ok(())
                }
            },
        )
    }

    /// Publishes an event and releases all waiters.
    fn notify(&self) {
        self.pending.store(true, Ordering::Release);
        self.wait_queue.wake_all();
    }

    fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

impl IrqHandler for IrqEventChannel {
    fn handle_irq(&self, _irq_num: u32) -> IrqReturn {
        self.notify();
        IrqReturn::Handled
    }
}

/// The handle to a handler registered on an interrupt line.
///
/// When the handle is dropped, the handler will be unregistered automatically.
#[must_use]
pub struct IrqCallbackHandle {
    irq_chip: Arc<dyn IrqChip>,
    irq_num: u32,
    cookie: IrqCookie,
}

impl IrqCallbackHandle {
    /// Registers `handler` as a shared, level-triggered handler on `irq_num`.
    pub(crate) fn register(
        irq_chip: &Arc<dyn IrqChip>,
        irq_num: u32,
        handler: Arc<dyn IrqHandler>,
    ) -> Result<Self> {
        let cookie = irq_chip.request_irq(
            irq_num,
            IrqFlags::SHARED | IrqFlags::TRIGGER_HIGH,
            IRQ_HANDLER_NAME,
            handler,
        )?;
        debug!("registered handler {:?} on IRQ {}", cookie, irq_num);
        Ok(Self {
            irq_chip: irq_chip.clone(),
            irq_num,
            cookie,
        })
    }

    pub fn irq_num(&self) -> u32 {
        self.irq_num
    }
}

impl Drop for IrqCallbackHandle {
    fn drop(&mut self) {
        self.irq_chip.free_irq(self.irq_num, self.cookie);
        debug!("freed handler {:?} on IRQ {}", self.cookie, self.irq_num);
    }
}
