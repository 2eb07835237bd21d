// SPDX-License-Identifier: MPL-2.0

//! Control requests of the broker device.

use crate::{config::Variant, prelude::*, session::BindRequest};

/// The control requests, numbered with Linux's `_IOW`/`_IO` encoding and the type letter `'g'`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromInt)]
pub enum IoctlCmd {
    /// `HWIO_SET_RANGE`: bind the session to a physical memory range.
    SetRange = 0x4008_6701,
    /// `HWIO_SET_IRQ`: bind the session to an interrupt line.
    SetIrq = 0x4004_6702,
    /// `HWIO_WAIT_IRQ`: wait for the next interrupt.
    WaitIrq = 0x0000_6703,
}

/// A decoded control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwioRequest {
    Bind(BindRequest),
    WaitIrq,
}

impl HwioRequest {
    /// Decodes the raw request `cmd` with argument `arg`.
    ///
    /// Requests that the `variant` does not serve, and unknown requests,
    /// decode to [`BindRequest::Unrecognized`] so that they are rejected
    /// by the binder like any other invalid request.
    pub fn decode(cmd: u32, arg: Vaddr, variant: Variant) -> Self {
        let unrecognized = Self::Bind(BindRequest::Unrecognized { cmd });
        let Ok(ioctl_cmd) = IoctlCmd::try_from(cmd) else {
            return unrecognized;
        };
        match ioctl_cmd {
            IoctlCmd::SetRange => Self::Bind(BindRequest::MemoryRange { arg }),
            IoctlCmd::SetIrq if variant.serves_irq() => {
                Self::Bind(BindRequest::InterruptLine { arg })
            }
            IoctlCmd::WaitIrq if variant.serves_irq() => Self::WaitIrq,
            _ => unrecognized,
        }
    }
}
