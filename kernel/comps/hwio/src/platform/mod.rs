// SPDX-License-Identifier: MPL-2.0

//! The platform primitives that the broker depends on but does not implement.
//!
//! The broker never touches page tables, interrupt controllers or credentials itself.
//! Everything it needs from the surrounding kernel is expressed by the traits
//! in this module:
//!
//! - [`Credentials`] answers the privilege check made when a session is opened;
//! - [`UserSpace`] copies request payloads out of client memory;
//! - [`Task`] parks and unparks the calling thread and reports pending signals;
//! - [`IrqChip`] registers and frees interrupt handlers and masks local interrupts;
//! - [`PhysMemPlatform`] decides on and establishes physical memory mappings;
//! - [`MiscRegistry`] registers the device node at module load time;
//! - [`Console`] receives formatted log records.
//!
//! Per-call collaborators are bundled in a [`Context`],
//! system-wide ones in a [`Platform`].

mod vm;

use alloc::sync::Arc;

use zerocopy::{FromBytes, FromZeros, IntoBytes};

pub use self::vm::{AccessFn, PageProt, VmArea, VmFlags, VmOperations};
use crate::{capability::CapSet, irq::IrqFlags, prelude::Result};

/// A virtual address.
pub type Vaddr = usize;

/// A physical address.
pub type Paddr = usize;

/// The page size of the platform.
pub const PAGE_SIZE: usize = 0x1000;

/// The number of bits to shift a page frame number into a physical address.
pub const PAGE_SHIFT: u32 = PAGE_SIZE.trailing_zeros();

/// The credentials of the calling process.
pub trait Credentials {
    /// Returns the effective capability set.
    fn effective_capset(&self) -> CapSet;
}

/// The address space of the calling process.
pub trait UserSpace {
    /// Copies `dst.len()` bytes starting at `src` in the user address space.
    ///
    /// # Errors
    ///
    /// Returns [`EFAULT`] if any byte of the source range is not readable.
    ///
    /// [`EFAULT`]: crate::error::Errno::EFAULT
    fn read_bytes(&self, src: Vaddr, dst: &mut [u8]) -> Result<()>;
}

impl dyn UserSpace + '_ {
    /// Reads a value of plain-old-data type `T` from the user address space.
    ///
    /// The value is only returned if it was copied in its entirety.
    pub fn read_val<T: FromBytes + IntoBytes>(&self, src: Vaddr) -> Result<T> {
        let mut val = <T as FromZeros>::new_zeroed();
        self.read_bytes(src, val.as_mut_bytes())?;
        Ok(val)
    }
}

/// A schedulable thread of the platform.
pub trait Task: Send + Sync {
    /// Puts the current thread to sleep.
    ///
    /// The method returns after [`Task::unpark`] is called on this task,
    /// when a signal arrives for this task, or spuriously.
    /// An `unpark` that happens before `park` makes the next `park` return immediately.
    fn park(&self);

    /// Wakes up the thread if it is parked.
    fn unpark(&self);

    /// Returns whether the thread has a pending signal that should abort a sleep.
    fn has_pending_signal(&self) -> bool;
}

/// The return value of an interrupt handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// The interrupt was not from this handler's device.
    None,
    /// The interrupt was handled.
    Handled,
}

/// A handler for a hardware interrupt line.
pub trait IrqHandler: Send + Sync {
    /// Handles an interrupt on line `irq_num`.
    ///
    /// This method is called in interrupt context.
    /// It must not allocate memory, sleep or fail.
    fn handle_irq(&self, irq_num: u32) -> IrqReturn;
}

/// An opaque token that identifies one handler registration on an interrupt line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IrqCookie(pub u64);

/// The interrupt controller of the platform.
pub trait IrqChip: Send + Sync {
    /// Registers `handler` on the interrupt line `irq_num`.
    ///
    /// # Errors
    ///
    /// Returns an error if the line does not exist, or if it is already
    /// taken in a way that is incompatible with `flags`.
    fn request_irq(
        &self,
        irq_num: u32,
        flags: IrqFlags,
        name: &'static str,
        handler: Arc<dyn IrqHandler>,
    ) -> Result<IrqCookie>;

    /// Unregisters the handler identified by `cookie` from the line `irq_num`.
    ///
    /// After this method returns, the handler is never called again.
    fn free_irq(&self, irq_num: u32, cookie: IrqCookie);

    /// Returns whether interrupts are enabled on the local CPU.
    fn is_local_enabled(&self) -> bool;

    /// Disables interrupts on the local CPU.
    fn disable_local(&self);

    /// Enables interrupts on the local CPU.
    fn enable_local(&self);
}

/// The physical memory policy and page table manipulation of the platform.
///
/// Page frame numbers (`pfn`) are physical addresses shifted right by [`PAGE_SHIFT`].
pub trait PhysMemPlatform: Send + Sync {
    /// Returns whether `[pfn << PAGE_SHIFT, (pfn << PAGE_SHIFT) + size)` is a legal
    /// physical range on this architecture.
    fn valid_mmap_phys_addr_range(&self, pfn: usize, size: usize) -> bool;

    /// Returns whether the architecture supports the mapping type (private or shared)
    /// requested by `vma`.
    fn private_mapping_ok(&self, vma: &VmArea) -> bool;

    /// Returns whether the platform policy allows user space to map the range.
    fn range_is_allowed(&self, pfn: usize, size: usize) -> bool;

    /// Derives the page protection of the mapping.
    ///
    /// The method may adjust the cacheability or writability bits of `prot`.
    /// Returns `false` if the range cannot be mapped with any protection.
    fn phys_mem_access_prot_allowed(&self, pfn: usize, size: usize, prot: &mut PageProt)
    -> bool;

    /// Returns whether the platform maps I/O memory with arbitrary protection
    /// attributes, so that faults never need to fall back to [`generic_access_phys`].
    ///
    /// [`generic_access_phys`]: PhysMemPlatform::generic_access_phys
    fn has_ioremap_prot(&self) -> bool;

    /// Maps `size` bytes of physical memory starting at page frame `pfn`
    /// at the virtual address `vaddr` inside `vma`.
    fn remap_pfn_range(
        &self,
        vma: &VmArea,
        vaddr: Vaddr,
        pfn: usize,
        size: usize,
        prot: PageProt,
    ) -> Result<()>;

    /// Accesses the physical memory behind `addr` in `vma` without a live mapping,
    /// returning the number of bytes transferred.
    fn generic_access_phys(
        &self,
        vma: &VmArea,
        addr: Vaddr,
        buf: &mut [u8],
        write: bool,
    ) -> Result<usize>;
}

/// The registry of misc character devices.
pub trait MiscRegistry: Send + Sync {
    /// Registers a misc device named `name` with a dynamic minor number,
    /// returning the assigned minor.
    fn misc_register(&self, name: &str) -> Result<u32>;

    /// Deregisters the misc device with the given minor number.
    fn misc_deregister(&self, minor: u32);
}

/// A sink for log output.
pub trait Console: Send + Sync {
    /// Writes `buf` to the console.
    fn send(&self, buf: &[u8]);
}

/// The system-wide collaborators, injected once at module initialization.
#[derive(Clone)]
pub struct Platform {
    pub irq_chip: Arc<dyn IrqChip>,
    pub phys_mem: Arc<dyn PhysMemPlatform>,
    pub misc: Arc<dyn MiscRegistry>,
}

/// The context of a call from user space.
pub struct Context<'a> {
    pub credentials: &'a dyn Credentials,
    pub user_space: &'a dyn UserSpace,
    pub task: &'a Arc<dyn Task>,
}

impl<'a> Context<'a> {
    pub fn new(
        credentials: &'a dyn Credentials,
        user_space: &'a dyn UserSpace,
        task: &'a Arc<dyn Task>,
    ) -> Self {
        Self {
            credentials,
            user_space,
            task,
        }
    }

    /// Returns the address space of the caller.
    pub fn user_space(&self) -> &'a dyn UserSpace {
        self.user_space
    }
}
