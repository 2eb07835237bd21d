// SPDX-License-Identifier: MPL-2.0

//! Broker sessions.
//!
//! A [`Session`] is the state behind one open handle of the device.
//! It starts out [`SessionKind::Unconfigured`] and is bound exactly once,
//! by the first successful control request, to either a memory range or
//! an interrupt line. The binding never changes afterwards.
//!
//! While a bind request copies its payload and talks to the platform, the
//! session is [`SessionKind::Binding`]: other requests are answered at once
//! as if the session were still unconfigured, and further binds are refused.

mod bind;

pub use self::bind::{BindError, BindRequest, MmioRangeArg};
use crate::{
    irq::{IrqCallbackHandle, IrqEventChannel, WaitError},
    mmap::{self, MapError},
    platform::{PhysMemPlatform, Task, VmArea},
    prelude::*,
};

/// A physical memory range bound to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmioRange {
    phys: Paddr,
    length: usize,
}

impl MmioRange {
    pub(crate) const fn new(phys: Paddr, length: usize) -> Self {
        Self { phys, length }
    }

    /// Returns the first physical address of the range.
    pub fn phys(&self) -> Paddr {
        self.phys
    }

    /// Returns the length of the range in bytes, a multiple of [`PAGE_SIZE`].
    pub fn length(&self) -> usize {
        self.length
    }

    /// Returns the first physical address past the range.
    pub fn end(&self) -> Paddr {
        // Cannot overflow, checked at bind time.
        self.phys + self.length
    }
}

/// An interrupt line bound to a session.
pub struct IrqBinding {
    // Declared before `channel` so that the handler is freed first.
    handle: IrqCallbackHandle,
    channel: Arc<IrqEventChannel>,
}

impl IrqBinding {
    pub fn irq_num(&self) -> u32 {
        self.handle.irq_num()
    }

    pub fn channel(&self) -> &Arc<IrqEventChannel> {
        &self.channel
    }
}

/// The resource a session is bound to.
pub enum SessionKind {
    Unconfigured,
    /// A bind request is in flight.
    Binding,
    MemoryRegion(MmioRange),
    InterruptLine(IrqBinding),
}

impl Debug for SessionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SessionKind::Unconfigured => write!(f, "Unconfigured"),
            SessionKind::Binding => write!(f, "Binding"),
            SessionKind::MemoryRegion(range) => write!(
                f,
                "MemoryRegion {{ phys: {:#x}, length: {:#x} }}",
                range.phys, range.length
            ),
            SessionKind::InterruptLine(binding) => {
                write!(f, "InterruptLine {{ irq: {} }}", binding.irq_num())
            }
        }
    }
}

/// The state of one open handle.
pub struct Session {
    // Never held across a user copy or a platform call.
    kind: Mutex<SessionKind>,
}

impl Session {
    /// Creates an unconfigured session.
    pub fn new() -> Self {
        Self {
            kind: Mutex::new(SessionKind::Unconfigured),
        }
    }

    /// Returns whether the session has been bound.
    pub fn is_configured(&self) -> bool {
        !matches!(
            *self.kind.lock(),
            SessionKind::Unconfigured | SessionKind::Binding
        )
    }

    /// Returns the bound memory range, if the session is a memory session.
    pub fn mmio_range(&self) -> Option<MmioRange> {
        match &*self.kind.lock() {
            SessionKind::MemoryRegion(range) => Some(*range),
            _ => None,
        }
    }

    /// Returns the bound interrupt line, if the session is an interrupt session.
    pub fn irq_num(&self) -> Option<u32> {
        match &*self.kind.lock() {
            SessionKind::InterruptLine(binding) => Some(binding.irq_num()),
            _ => None,
        }
    }

    /// Returns the event channel of an interrupt session.
    pub fn irq_channel(&self) -> Option<Arc<IrqEventChannel>> {
        match &*self.kind.lock() {
            SessionKind::InterruptLine(binding) => Some(binding.channel().clone()),
            _ => None,
        }
    }

    /// Validates `vma` against the bound range and maps it.
    ///
    /// See [`mmap::map_range`] for the checks performed.
    pub fn map(
        &self,
        vma: &mut VmArea,
        phys_mem: &dyn PhysMemPlatform,
    ) -> core::result::Result<(), MapError> {
        let range = self.mmio_range().ok_or(MapError::WrongSessionKind)?;
        mmap::map_range(&range, vma, phys_mem)
    }

    /// Waits for the next event on the bound interrupt line.
    pub fn wait_for_event(&self, task: &Arc<dyn Task>) -> core::result::Result<(), WaitError> {
        // The lock must not be held while sleeping.
        let channel = self.irq_channel().ok_or(WaitError::WrongSessionKind)?;
        channel.wait_for_event(task)
    }

    /// Releases the platform resources of the session.
    ///
    /// For interrupt sessions, the handler is unregistered before this method returns.
    pub fn release(self) {
        let kind = self.kind.into_inner();
        debug!("releasing session: {:?}", kind);
        drop(kind);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("kind", &*self.kind.lock())
            .finish()
    }
}
