// SPDX-License-Identifier: MPL-2.0

use super::{PAGE_SIZE, PhysMemPlatform, Vaddr};
use crate::prelude::*;

bitflags! {
    /// The flags of a virtual memory area, conforming to Linux's `vm_flags`.
    pub struct VmFlags: u64 {
        const READ      = 0x0000_0001;
        const WRITE     = 0x0000_0002;
        const EXEC      = 0x0000_0004;
        const SHARED    = 0x0000_0008;
        const MAYREAD   = 0x0000_0010;
        const MAYWRITE  = 0x0000_0020;
        const MAYEXEC   = 0x0000_0040;
        const MAYSHARE  = 0x0000_0080;
        const IO        = 0x0000_4000;
        const DONTEXPAND = 0x0004_0000;
        const PFNMAP    = 0x0000_0400;
        const DONTDUMP  = 0x0400_0000;
    }
}

bitflags! {
    /// The protection attributes of the pages of a mapping.
    pub struct PageProt: u32 {
        const READ          = 1 << 0;
        const WRITE         = 1 << 1;
        const EXEC          = 1 << 2;
        /// Accesses bypass the caches.
        const UNCACHED      = 1 << 3;
        /// Writes may be combined before reaching the device.
        const WRITE_COMBINE = 1 << 4;
    }
}

/// Accesses memory of a VM area on behalf of another party (e.g., a debugger)
/// when the area has no live mapping that can be walked.
pub type AccessFn = fn(&dyn PhysMemPlatform, &VmArea, Vaddr, &mut [u8], bool) -> Result<usize>;

/// The operations installed on a VM area by the driver that mapped it.
#[derive(Debug)]
pub struct VmOperations {
    pub access: Option<AccessFn>,
}

/// A contiguous virtual memory area of a user address space
/// that is about to be (or has been) backed by a driver.
#[derive(Debug)]
pub struct VmArea {
    start: Vaddr,
    end: Vaddr,
    pgoff: usize,
    flags: VmFlags,
    page_prot: PageProt,
    ops: Option<&'static VmOperations>,
}

impl VmArea {
    /// Creates a VM area covering `[start, end)` whose first page maps
    /// the page with index `pgoff` of the backing object.
    ///
    /// # Errors
    ///
    /// Returns [`EINVAL`] if the range is empty or not page aligned.
    ///
    /// [`EINVAL`]: Errno::EINVAL
    pub fn new(
        start: Vaddr,
        end: Vaddr,
        pgoff: usize,
        flags: VmFlags,
        page_prot: PageProt,
    ) -> Result<Self> {
        if start >= end {
            return_errno_with_message!(Errno::EINVAL, "the VM area is empty");
        }
        if start % PAGE_SIZE != 0 || end % PAGE_SIZE != 0 {
            return_errno_with_message!(Errno::EINVAL, "the VM area is not page aligned");
        }
        Ok(Self {
            start,
            end,
            pgoff,
            flags,
            page_prot,
            ops: None,
        })
    }

    pub fn start(&self) -> Vaddr {
        self.start
    }

    pub fn end(&self) -> Vaddr {
        self.end
    }

    pub fn size(&self) -> usize {
        self.end - self.start
    }

    /// Returns the page offset into the backing object.
    ///
    /// For physical memory devices, this is the page frame number.
    pub fn pgoff(&self) -> usize {
        self.pgoff
    }

    pub fn flags(&self) -> VmFlags {
        self.flags
    }

    pub fn is_shared(&self) -> bool {
        self.flags.contains(VmFlags::SHARED)
    }

    pub fn page_prot(&self) -> PageProt {
        self.page_prot
    }

    pub(crate) fn set_page_prot(&mut self, page_prot: PageProt) {
        self.page_prot = page_prot;
    }

    pub fn ops(&self) -> Option<&'static VmOperations> {
        self.ops
    }

    pub(crate) fn set_ops(&mut self, ops: &'static VmOperations) {
        self.ops = Some(ops);
    }

    /// Accesses `buf.len()` bytes at `addr` through the area's access operation.
    ///
    /// # Errors
    ///
    /// Returns [`EIO`] if no access operation is installed,
    /// or [`EFAULT`] if `addr` lies outside the area.
    ///
    /// [`EIO`]: Errno::EIO
    /// [`EFAULT`]: Errno::EFAULT
    pub fn access(
        &self,
        platform: &dyn PhysMemPlatform,
        addr: Vaddr,
        buf: &mut [u8],
        write: bool,
    ) -> Result<usize> {
        if addr < self.start || addr >= self.end {
            return_errno_with_message!(Errno::EFAULT, "the address is outside the VM area");
        }
        let Some(access) = self.ops.and_then(|ops| ops.access) else {
            return_errno_with_message!(Errno::EIO, "the VM area has no access operation");
        };
        let len = buf.len().min(self.end - addr);
        access(platform, self, addr, &mut buf[..len], write)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn malformed_areas_are_rejected() {
        let flags = VmFlags::READ | VmFlags::SHARED;
        let prot = PageProt::READ;

        let err = VmArea::new(0x4000, 0x4000, 0, flags, prot).unwrap_err();
        assert_eq!(err.error(), Errno::EINVAL);
        let err = VmArea::new(0x5000, 0x4000, 0, flags, prot).unwrap_err();
        assert_eq!(err.error(), Errno::EINVAL);
        let err = VmArea::new(0x4000, 0x4800, 0, flags, prot).unwrap_err();
        assert_eq!(err.error(), Errno::EINVAL);

        let vma = VmArea::new(0x4000, 0x6000, 3, flags, prot).unwrap();
        assert_eq!(vma.size(), 0x2000);
        assert_eq!(vma.pgoff(), 3);
        assert!(vma.is_shared());
    }
}
