//! Logical → physical address translation for the Kestrel machine.
//!
//! The translator implements a two-level page walk over 4 KiB pages: a root
//! table indexed by the top 10 bits of the 32-bit logical address, a page
//! table indexed by the next 10, and a 12-bit page offset. Both table entries
//! are 4 bytes and are addressed at a *byte* offset from their table base
//! (`RPT + root_index`, not `RPT + root_index * 4`) — an architectural quirk
//! the walk preserves.
//!
//! With `PAGING_ENABLE` clear the identity map is used. Protection checks
//! (PROTECTED / WRITABLE / EXECUTABLE) apply only while `PROTECTED_ENABLE`
//! is set; presence is always checked.

#![forbid(unsafe_code)]

use kestrel_isa::{EF_PAGING_ENABLE, EF_PROTECTED_ENABLE};
use kestrel_mem::{MemError, PhysMemory};

// Page-table entry bits.
pub const PTE_FRAME: u32 = 0xFFFF_F000;
pub const PTE_OCCUPIED: u32 = 0x01;
pub const PTE_PROTECTED: u32 = 0x02;
pub const PTE_MODIFIED: u32 = 0x04;
pub const PTE_WRITABLE: u32 = 0x08;
pub const PTE_EXECUTABLE: u32 = 0x10;
pub const PTE_ACCESSED: u32 = 0x20;

pub const PAGE_SIZE: u32 = 4096;

/// Type of memory access being translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
    Execute,
}

impl AccessType {
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(self, AccessType::Write)
    }

    #[inline]
    pub fn is_execute(self) -> bool {
        matches!(self, AccessType::Execute)
    }
}

/// A failed translation, reporting the first check that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// Faulting logical address.
    pub addr: u32,
    /// The PTE bit whose absence (OCCUPIED/WRITABLE/EXECUTABLE) or presence
    /// (PROTECTED) failed the access.
    pub missing: u32,
}

impl PageFault {
    #[inline]
    fn new(addr: u32, missing: u32) -> Self {
        Self { addr, missing }
    }

    /// The fault `info` word: failing mask in the high half, faulting
    /// address in the low half.
    #[inline]
    pub fn info(&self) -> u64 {
        ((self.missing as u64) << 32) | self.addr as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateError {
    PageFault(PageFault),
    /// A page-table access fell outside physical memory.
    Mem(MemError),
}

impl From<MemError> for TranslateError {
    fn from(e: MemError) -> Self {
        TranslateError::Mem(e)
    }
}

impl From<PageFault> for TranslateError {
    fn from(e: PageFault) -> Self {
        TranslateError::PageFault(e)
    }
}

/// Check one walked entry, returning its frame base.
///
/// Check order is architectural: presence first, then the protection bit,
/// then writability, then executability. The last three apply only while
/// protection is enforced.
fn check_entry(entry: u32, addr: u32, protected: bool, access: AccessType) -> Result<u32, PageFault> {
    if entry & PTE_OCCUPIED == 0 {
        return Err(PageFault::new(addr, PTE_OCCUPIED));
    }
    if protected && entry & PTE_PROTECTED != 0 {
        return Err(PageFault::new(addr, PTE_PROTECTED));
    }
    if protected && access.is_write() && entry & PTE_WRITABLE == 0 {
        return Err(PageFault::new(addr, PTE_WRITABLE));
    }
    if protected && access.is_execute() && entry & PTE_EXECUTABLE == 0 {
        return Err(PageFault::new(addr, PTE_EXECUTABLE));
    }
    Ok(entry & PTE_FRAME)
}

/// Translate a 32-bit logical address to a physical address.
///
/// `eflags` and `rpt` are the live EFLAGS and root-page-table protected
/// registers. On success the walk sets ACCESSED on both entries (and
/// MODIFIED on the page entry for writes) and writes each entry back to its
/// own slot. On fault nothing is written back.
pub fn translate(
    mem: &mut impl PhysMemory,
    vaddr: u32,
    access: AccessType,
    eflags: u64,
    rpt: u64,
) -> Result<u32, TranslateError> {
    if eflags & EF_PAGING_ENABLE == 0 {
        return Ok(vaddr);
    }

    let protected = eflags & EF_PROTECTED_ENABLE != 0;

    let root_index = (vaddr >> 22) & 0x3FF;
    let page_index = (vaddr >> 12) & 0x3FF;
    let offset = vaddr & 0xFFF;

    // Byte-offset entry addressing, truncated to the 32-bit physical space.
    let root_slot = rpt.wrapping_add(root_index as u64) as u32;
    let mut root_entry = mem.read_u32_le(root_slot as u64)?;
    let page_table = check_entry(root_entry, vaddr, protected, access)?;

    let page_slot = page_table.wrapping_add(page_index);
    let mut page_entry = mem.read_u32_le(page_slot as u64)?;
    let frame = check_entry(page_entry, vaddr, protected, access)?;

    root_entry |= PTE_ACCESSED;
    page_entry |= PTE_ACCESSED;
    if access.is_write() {
        page_entry |= PTE_MODIFIED;
    }
    mem.write_u32_le(root_slot as u64, root_entry)?;
    mem.write_u32_le(page_slot as u64, page_entry)?;

    Ok(frame + offset)
}
