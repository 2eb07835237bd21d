// SPDX-License-Identifier: MPL-2.0

//! Publication of a bound memory range into the client's address space.
//!
//! The client asks for a sub-range of the bound range by mapping the device
//! at an offset: the page offset of the mapping is the page frame number of
//! the first physical page to map. Every request is checked against the bound
//! range and the platform policy before any page table is touched.

use crate::{
    platform::{PhysMemPlatform, VmArea, VmOperations},
    prelude::*,
    session::MmioRange,
};

/// Errors of [`map_range`].
#[derive(Debug, Clone, Copy)]
pub enum MapError {
    /// The session is not bound to a memory range.
    WrongSessionKind,
    /// The requested range is not contained in the bound range.
    OutOfBounds,
    /// The requested range wraps around or is rejected by the platform.
    InvalidRange,
    /// The platform cannot honor the requested mapping type.
    UnsupportedMapping,
    /// The platform policy forbids mapping the requested range.
    Forbidden,
    /// The platform failed to establish the mapping.
    MappingFailed(Error),
}

impl From<MapError> for Error {
    fn from(err: MapError) -> Self {
        match err {
            MapError::WrongSessionKind => {
                Error::with_message(Errno::EINVAL, "the session is not bound to a memory range")
            }
            MapError::OutOfBounds => {
                Error::with_message(Errno::EPERM, "the mapping exceeds the bound range")
            }
            MapError::InvalidRange => Error::with_message(Errno::EINVAL, "invalid physical range"),
            MapError::UnsupportedMapping => {
                Error::with_message(Errno::ENOSYS, "unsupported mapping type")
            }
            MapError::Forbidden => {
                Error::with_message(Errno::EPERM, "the range is not allowed to be mapped")
            }
            MapError::MappingFailed(_) => {
                Error::with_message(Errno::EAGAIN, "failed to map the physical range")
            }
        }
    }
}

/// The operations of areas mapped on platforms that cannot remap I/O memory
/// with arbitrary protection, where foreign accesses must go through physical memory.
static GENERIC_PHYS_VM_OPS: VmOperations = VmOperations {
    access: Some(generic_access),
};

fn generic_access(
    phys_mem: &dyn PhysMemPlatform,
    vma: &VmArea,
    addr: Vaddr,
    buf: &mut [u8],
    write: bool,
) -> Result<usize> {
    phys_mem.generic_access_phys(vma, addr, buf, write)
}

/// Maps the part of `range` requested by `vma` into `vma`.
///
/// The request is rejected with the first failing check, in this order:
///
/// 1. the requested length exceeds the bound length ([`MapError::OutOfBounds`]);
/// 2. the requested offset lies below the bound base ([`MapError::OutOfBounds`]);
/// 3. the requested end lies beyond the bound end ([`MapError::OutOfBounds`]);
/// 4. the requested end wraps around ([`MapError::InvalidRange`]);
/// 5. the platform rejects the physical range ([`MapError::InvalidRange`]);
/// 6. the platform cannot honor a private mapping ([`MapError::UnsupportedMapping`]);
/// 7. the platform policy forbids the range ([`MapError::Forbidden`]);
/// 8. no page protection can be derived ([`MapError::InvalidRange`]).
///
/// No mapping is attempted unless all checks pass.
pub fn map_range(
    range: &MmioRange,
    vma: &mut VmArea,
    phys_mem: &dyn PhysMemPlatform,
) -> core::result::Result<(), MapError> {
    let pfn = vma.pgoff();
    let size = vma.size();

    if size > range.length() {
        return Err(MapError::OutOfBounds);
    }
    // An offset past the address space lies above the bound base and beyond the bound end.
    let Some(offset) = pfn.checked_mul(PAGE_SIZE) else {
        return Err(MapError::OutOfBounds);
    };
    let requested_end = offset.checked_add(size);
    if offset < range.phys() {
        return Err(MapError::OutOfBounds);
    }
    // A wrapping end is reported by the next check.
    if requested_end.is_some_and(|end| end > range.end()) {
        return Err(MapError::OutOfBounds);
    }
    if requested_end.is_none() {
        return Err(MapError::InvalidRange);
    }

    if !phys_mem.valid_mmap_phys_addr_range(pfn, size) {
        return Err(MapError::InvalidRange);
    }
    if !phys_mem.private_mapping_ok(vma) {
        return Err(MapError::UnsupportedMapping);
    }
    if !phys_mem.range_is_allowed(pfn, size) {
        return Err(MapError::Forbidden);
    }
    let mut prot = vma.page_prot();
    if !phys_mem.phys_mem_access_prot_allowed(pfn, size, &mut prot) {
        return Err(MapError::InvalidRange);
    }
    vma.set_page_prot(prot);

    if !phys_mem.has_ioremap_prot() {
        vma.set_ops(&GENERIC_PHYS_VM_OPS);
    }

    phys_mem
        .remap_pfn_range(vma, vma.start(), pfn, size, prot)
        .map_err(|err| {
            warn!("failed to remap pfn {:#x}: {}", pfn, err);
            MapError::MappingFailed(err)
        })?;

    debug!(
        "mapped physical range {:#x}..{:#x} at {:#x}",
        offset,
        offset + size,
        vma.start()
    );
    Ok(())
}
