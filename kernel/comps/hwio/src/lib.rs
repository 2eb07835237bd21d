// SPDX-License-Identifier: MPL-2.0

//! A broker of hardware resources for a privileged user-space driver.
//!
//! Each open of the broker device yields a session that can be bound, once,
//! to either a physical memory range or an interrupt line:
//!
//! - a memory session lets the client map any page-aligned sub-range of the
//!   bound range into its address space, after the platform policy agrees;
//! - an interrupt session lets the client block until the line fires.
//!
//! The broker is platform-agnostic. The surrounding kernel provides the
//! primitives in [`platform`] and forwards file operations to [`HwioFile`].
//!
//! # Example
//!
//! ```ignore
//! let device = hwio::init(cmdline, platform, console)?;
//! let file = device.open(&ctx)?;
//! file.ioctl(IoctlCmd::SetRange as u32, range_arg_addr, &ctx)?;
//! file.mmap(&mut vma)?;
//! file.close();
//! device.exit();
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

pub mod capability;
pub mod config;
pub mod device;
pub mod error;
pub mod genode;
pub mod ioctl;
pub mod irq;
pub mod logger;
pub mod mmap;
pub mod platform;
mod prelude;
pub mod session;
pub mod sync;
#[cfg(test)]
mod test_utils;

pub use self::{
    config::{HwioConfig, Variant},
    device::{FileIo, HwioDevice, HwioFile},
    error::{Errno, Error},
    genode::GenodeModule,
    ioctl::IoctlCmd,
    platform::{Context, Platform},
    session::{Session, SessionKind},
};
use crate::{platform::Console, prelude::*};

/// Loads the broker module.
///
/// The configuration is parsed from the kernel command line `cmdline`,
/// log output goes to `console` and the device node is registered with `platform`.
pub fn init(cmdline: &str, platform: Platform, console: Arc<dyn Console>) -> Result<HwioDevice> {
    let config = HwioConfig::from_cmdline(cmdline);
    if let Err(err) = logger::init(console, config.log_level()) {
        // The logger of an earlier load is still installed.
        log::set_max_level(config.log_level());
        debug!("keeping the installed logger: {}", err);
    }
    HwioDevice::init(config, platform)
}
