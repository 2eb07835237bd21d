// SPDX-License-Identifier: MPL-2.0

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::{IrqBinding, MmioRange, Session, SessionKind};
use crate::{
    irq::{IrqCallbackHandle, IrqEventChannel},
    platform::{IrqChip, UserSpace},
    prelude::*,
};

/// The payload of a set-range request, laid out as
/// `struct { unsigned long phys; size_t length; }` on a 64-bit target.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MmioRangeArg {
    pub phys: u64,
    pub length: u64,
}

/// A control request that binds a session.
///
/// The payloads still live in client memory; they are copied in by [`Session::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindRequest {
    /// Bind to the memory range described by the [`MmioRangeArg`] at `arg`.
    MemoryRange { arg: Vaddr },
    /// Bind to the interrupt line whose `i32` number is stored at `arg`.
    InterruptLine { arg: Vaddr },
    /// A request this broker does not understand.
    Unrecognized { cmd: u32 },
}

/// Errors of [`Session::bind`].
///
/// On any error, the session stays unconfigured (or keeps its earlier binding).
#[derive(Debug, Clone, Copy)]
pub enum BindError {
    /// The session has been bound before.
    AlreadyConfigured,
    /// The request payload could not be copied from client memory.
    CopyFault,
    /// The platform refused to register the interrupt handler.
    IrqRegistrationFailed(Error),
    /// The request is not supported.
    InvalidRequest,
    /// The memory range is empty.
    EmptyRange,
    /// The interrupt line number is negative.
    InvalidLine,
    /// The page-rounded range does not fit in the physical address space.
    Overflow,
}

impl From<BindError> for Error {
    fn from(err: BindError) -> Self {
        match err {
            BindError::AlreadyConfigured => {
                Error::with_message(Errno::EACCES, "the session is already configured")
            }
            BindError::CopyFault => {
                Error::with_message(Errno::EFAULT, "cannot copy the request from user space")
            }
            BindError::IrqRegistrationFailed(err) => err,
            BindError::InvalidRequest => Error::with_message(Errno::EINVAL, "invalid request"),
            BindError::EmptyRange => Error::with_message(Errno::EINVAL, "the range is empty"),
            BindError::InvalidLine => {
                Error::with_message(Errno::EINVAL, "the interrupt line is negative")
            }
            BindError::Overflow => {
                Error::with_message(Errno::EOVERFLOW, "the range exceeds the address space")
            }
        }
    }
}

impl Session {
    /// Binds the session to the resource described by `request`.
    ///
    /// This is the only transition out of [`SessionKind::Unconfigured`]
    /// and it can succeed at most once per session.
    /// A bind that races with an in-flight one fails with [`BindError::AlreadyConfigured`].
    pub fn bind(
        &self,
        request: BindRequest,
        user_space: &dyn UserSpace,
        irq_chip: &Arc<dyn IrqChip>,
    ) -> core::result::Result<(), BindError> {
        {
            let mut kind = self.kind.lock();
            // Once set, a binding can never be changed.
            if !matches!(*kind, SessionKind::Unconfigured) {
                return Err(BindError::AlreadyConfigured);
            }
            *kind = SessionKind::Binding;
        }

        let result = new_binding(request, user_space, irq_chip);

        let mut kind = self.kind.lock();
        match result {
            Ok(new_kind) => {
                debug!("session bound: {:?}", new_kind);
                *kind = new_kind;
                Ok(())
            }
            Err(err) => {
                *kind = SessionKind::Unconfigured;
                Err(err)
            }
        }
    }
}

fn new_binding(
    request: BindRequest,
    user_space: &dyn UserSpace,
    irq_chip: &Arc<dyn IrqChip>,
) -> core::result::Result<SessionKind, BindError> {
    match request {
        BindRequest::MemoryRange { arg } => {
            let range = read_mmio_range(user_space, arg)?;
            Ok(SessionKind::MemoryRegion(range))
        }
        BindRequest::InterruptLine { arg } => {
            let irq_num = read_irq_num(user_space, arg)?;
            let channel = Arc::new(IrqEventChannel::new(irq_num, irq_chip.clone()));
            let handle = IrqCallbackHandle::register(irq_chip, irq_num, channel.clone())
                .map_err(BindError::IrqRegistrationFailed)?;
            Ok(SessionKind::InterruptLine(IrqBinding { handle, channel }))
        }
        BindRequest::Unrecognized { .. } => Err(BindError::InvalidRequest),
    }
}

fn read_mmio_range(
    user_space: &dyn UserSpace,
    arg: Vaddr,
) -> core::result::Result<MmioRange, BindError> {
    let range_arg: MmioRangeArg = user_space
        .read_val(arg)
        .map_err(|_| BindError::CopyFault)?;

    let phys = Paddr::try_from(range_arg.phys).map_err(|_| BindError::Overflow)?;
    let length = usize::try_from(range_arg.length).map_err(|_| BindError::Overflow)?;
    if length == 0 {
        return Err(BindError::EmptyRange);
    }

    // Extend the range to full pages since only pages can be mapped.
    let length = length
        .checked_next_multiple_of(PAGE_SIZE)
        .ok_or(BindError::Overflow)?;
    phys.checked_add(length).ok_or(BindError::Overflow)?;

    Ok(MmioRange::new(phys, length))
}

fn read_irq_num(user_space: &dyn UserSpace, arg: Vaddr) -> core::result::Result<u32, BindError> {
    let irq_num: i32 = user_space
        .read_val(arg)
        .map_err(|_| BindError::CopyFault)?;
    u32::try_from(irq_num).map_err(|_| BindError::InvalidLine)
}
