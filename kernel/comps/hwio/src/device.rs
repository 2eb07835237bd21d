// SPDX-License-Identifier: MPL-2.0

//! The broker device.
//!
//! [`HwioDevice`] is the registration of the broker as a misc character
//! device, alive between module initialization and module exit.
//! Every open of the device node creates a [`HwioFile`] that owns one
//! [`Session`].
//!
//! See <https://www.kernel.org/doc/Documentation/admin-guide/devices.txt>.

use crate::{
    capability,
    config::{HwioConfig, Variant},
    ioctl::HwioRequest,
    platform::{IrqChip, PhysMemPlatform, Platform, VmArea},
    prelude::*,
    session::Session,
};

/// The major number of misc character devices.
pub const MISC_MAJOR: u32 = 10;

/// The identifier of a character device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId {
    major: u32,
    minor: u32,
}

impl DeviceId {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub const fn major(&self) -> u32 {
        self.major
    }

    pub const fn minor(&self) -> u32 {
        self.minor
    }
}

/// The file operations that the kernel dispatches to an open device.
pub trait FileIo: Send + Sync {
    fn read(&self, buf: &mut [u8], ctx: &Context) -> Result<usize>;

    fn write(&self, buf: &[u8], ctx: &Context) -> Result<usize>;

    fn ioctl(&self, cmd: u32, arg: usize, ctx: &Context) -> Result<i32>;

    fn mmap(&self, vma: &mut VmArea) -> Result<()>;
}

/// The registered broker device.
///
/// The device node is deregistered when the device is dropped.
pub struct HwioDevice {
    config: HwioConfig,
    platform: Platform,
    id: DeviceId,
}

impl HwioDevice {
    /// Registers the device node with a dynamic minor number.
    pub fn init(config: HwioConfig, platform: Platform) -> Result<Self> {
        let minor = platform.misc.misc_register(config.device_name())?;
        info!("{} module registered", config.device_name());
        Ok(Self {
            config,
            platform,
            id: DeviceId::new(MISC_MAJOR, minor),
        })
    }

    /// Deregisters the device node.
    ///
    /// Sessions that are still open stay usable until they are closed.
    pub fn exit(self) {
        drop(self);
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn config(&self) -> &HwioConfig {
        &self.config
    }

    /// Opens a new session on behalf of the caller.
    ///
    /// # Errors
    ///
    /// Returns [`EPERM`] if the caller lacks `CAP_SYS_RAWIO`.
    ///
    /// [`EPERM`]: Errno::EPERM
    pub fn open(&self, ctx: &Context) -> Result<HwioFile> {
        capability::ensure_raw_io(ctx.credentials)?;
        Ok(HwioFile {
            session: Session::new(),
            variant: self.config.variant(),
            irq_chip: self.platform.irq_chip.clone(),
            phys_mem: self.platform.phys_mem.clone(),
        })
    }
}

impl Drop for HwioDevice {
    fn drop(&mut self) {
        self.platform.misc.misc_deregister(self.id.minor());
        info!("{} module unregistered", self.config.device_name());
    }
}

/// An open handle of the broker device.
pub struct HwioFile {
    session: Session,
    variant: Variant,
    irq_chip: Arc<dyn IrqChip>,
    phys_mem: Arc<dyn PhysMemPlatform>,
}

impl HwioFile {
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Closes the handle.
    ///
    /// An interrupt line bound to the session is freed before this method returns.
    pub fn close(self) {
        self.session.release();
    }
}

impl FileIo for HwioFile {
    fn read(&self, _buf: &mut [u8], _ctx: &Context) -> Result<usize> {
        return_errno_with_message!(Errno::EPERM, "Read operation not supported")
    }

    fn write(&self, _buf: &[u8], _ctx: &Context) -> Result<usize> {
        return_errno_with_message!(Errno::EPERM, "Write operation not supported")
    }

    fn ioctl(&self, cmd: u32, arg: usize, ctx: &Context) -> Result<i32> {
        match HwioRequest::decode(cmd, arg, self.variant) {
            HwioRequest::Bind(request) => {
                self.session.bind(request, ctx.user_space(), &self.irq_chip)?;
            }
            HwioRequest::WaitIrq => self.session.wait_for_event(ctx.task)?,
        }
        Ok(0)
    }

    fn mmap(&self, vma: &mut VmArea) -> Result<()> {
        self.session.map(vma, self.phys_mem.as_ref())?;
        Ok(())
    }
}
