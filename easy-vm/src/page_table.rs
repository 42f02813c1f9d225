//! Two-level translation: a 1024-slot directory of 1024-entry tables.
//!
//! Entries are 4 bytes wide:
//! ```text
//! | 31                12 | 11   3 | 2  | 1  | 0 |
//! |     frame number     | unused | US | RW | P |
//! ```
//! A [`PageDirectory`] is a bare handle to the root frame; table frames are
//! reached through the [`PhysMap`] window and freed explicitly by the owner
//! of the address space, never by drop glue.

use crate::address::{PhysMap, PhysPageNum, VirtPageNum};
#[cfg(target_arch = "x86")]
use crate::address::{PhysAddr, VirtAddr};
use crate::config::PAGE_SIZE_BITS;
use crate::error::{VmError, VmResult};
use crate::frame_source::FrameSource;
use bitflags::*;

bitflags! {
    /// page table entry flags
    pub struct EntryFlags: u32 {
        /// present
        const P = 1 << 0;
        /// writable
        const RW = 1 << 1;
        /// user accessible
        const US = 1 << 2;
    }
}

/// page table entry structure
#[derive(Copy, Clone)]
#[repr(transparent)]
pub struct PageTableEntry {
    /// bits of page table entry
    pub bits: u32,
}

impl PageTableEntry {
    /// Create a new page table entry
    pub fn new(ppn: PhysPageNum, flags: EntryFlags) -> Self {
        PageTableEntry {
            bits: (ppn.0 as u32) << PAGE_SIZE_BITS | flags.bits(),
        }
    }
    /// Create an empty page table entry
    pub fn empty() -> Self {
        PageTableEntry { bits: 0 }
    }
    /// Return the 20-bit frame number
    pub fn ppn(&self) -> PhysPageNum {
        ((self.bits as usize) >> PAGE_SIZE_BITS).into()
    }
    /// Return the low flag bits
    pub fn flags(&self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.bits)
    }
    /// Check PTE present
    pub fn is_valid(&self) -> bool {
        (self.flags() & EntryFlags::P) != EntryFlags::empty()
    }
    /// Check PTE writable
    pub fn writable(&self) -> bool {
        (self.flags() & EntryFlags::RW) != EntryFlags::empty()
    }
    /// Check PTE user accessible
    pub fn user(&self) -> bool {
        (self.flags() & EntryFlags::US) != EntryFlags::empty()
    }
}

/// Handle to one page directory frame.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PageDirectory {
    root: PhysPageNum,
}

impl PageDirectory {
    /// Allocate and zero a fresh directory frame.
    pub fn new_empty(mem: &PhysMap, frames: &dyn FrameSource) -> VmResult<Self> {
        let root = frames.alloc_frame().ok_or(VmError::OutOfFrames)?;
        mem.bytes_array(root).fill(0);
        Ok(Self { root })
    }
    /// Rebuild the handle from a raw root frame number.
    pub fn from_root(root: PhysPageNum) -> Self {
        Self { root }
    }
    /// Root frame of the directory
    pub fn root(&self) -> PhysPageNum {
        self.root
    }
    /// Find the leaf entry for `vpn`, allocating a zeroed mid-level table
    /// when the directory slot is empty.
    fn find_pte_create(
        &self,
        mem: &PhysMap,
        frames: &dyn FrameSource,
        vpn: VirtPageNum,
    ) -> VmResult<&'static mut PageTableEntry> {
        let [dir_idx, tbl_idx] = vpn.indexes();
        let slot = &mut mem.pte_array(self.root)[dir_idx];
        if !slot.is_valid() {
            let frame = frames.alloc_frame().ok_or(VmError::OutOfFrames)?;
            mem.bytes_array(frame).fill(0);
            // user access needs US at both levels; grant it on the slot and
            // let leaf entries decide
            *slot = PageTableEntry::new(frame, EntryFlags::P | EntryFlags::RW | EntryFlags::US);
        }
        Ok(&mut mem.pte_array(slot.ppn())[tbl_idx])
    }
    /// Find the leaf entry for `vpn` without allocating.
    fn find_pte(&self, mem: &PhysMap, vpn: VirtPageNum) -> Option<&'static mut PageTableEntry> {
        let [dir_idx, tbl_idx] = vpn.indexes();
        let slot = &mem.pte_array(self.root)[dir_idx];
        if !slot.is_valid() {
            return None;
        }
        Some(&mut mem.pte_array(slot.ppn())[tbl_idx])
    }
    /// Point `vpn` at `ppn`. Remapping an already mapped page replaces the
    /// entry in place.
    pub fn map(
        &self,
        mem: &PhysMap,
        frames: &dyn FrameSource,
        vpn: VirtPageNum,
        ppn: PhysPageNum,
        flags: EntryFlags,
    ) -> VmResult<()> {
        let pte = self.find_pte_create(mem, frames, vpn)?;
        *pte = PageTableEntry::new(ppn, flags | EntryFlags::P);
        Ok(())
    }
    /// Drop the mapping of `vpn` if there is one, invalidating its cached
    /// translation. With `release` the referenced frame goes back to the
    /// frame source.
    pub fn unmap(&self, mem: &PhysMap, frames: &dyn FrameSource, vpn: VirtPageNum, release: bool) {
        let pte = match self.find_pte(mem, vpn) {
            Some(pte) if pte.is_valid() => pte,
            _ => return,
        };
        let ppn = pte.ppn();
        *pte = PageTableEntry::empty();
        flush_page(vpn);
        if release {
            frames.dealloc_frame(ppn);
        }
    }
    /// Copy of the leaf entry for `vpn`; the caller checks the present bit.
    pub fn translate(&self, mem: &PhysMap, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.find_pte(mem, vpn).map(|pte| *pte)
    }
}

/// Load the directory base register, switching translation to `dir`.
/// Loading implies a full TLB flush. Hosted builds leave translation alone.
#[cfg(target_arch = "x86")]
pub fn activate(dir: PageDirectory) {
    let pa: PhysAddr = dir.root().into();
    unsafe {
        core::arch::asm!("mov cr3, {}", in(reg) pa.0);
    }
}
#[cfg(not(target_arch = "x86"))]
pub fn activate(_dir: PageDirectory) {}

/// Root frame of the directory loaded on this core, where the target
/// exposes one.
#[cfg(target_arch = "x86")]
pub fn active_root() -> Option<PhysPageNum> {
    let pa: usize;
    unsafe {
        core::arch::asm!("mov {}, cr3", out(reg) pa);
    }
    Some(PhysAddr::from(pa).floor())
}
#[cfg(not(target_arch = "x86"))]
pub fn active_root() -> Option<PhysPageNum> {
    None
}

/// Drop one page's cached translation.
#[cfg(target_arch = "x86")]
fn flush_page(vpn: VirtPageNum) {
    let va: VirtAddr = vpn.into();
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.0);
    }
}
#[cfg(not(target_arch = "x86"))]
fn flush_page(_vpn: VirtPageNum) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_packing() {
        let pte = PageTableEntry::new(
            PhysPageNum(0x1234),
            EntryFlags::P | EntryFlags::RW | EntryFlags::US,
        );
        assert_eq!(pte.bits, (0x1234u32 << 12) | 0b111);
        assert!(pte.is_valid());
        assert!(pte.writable());
        assert!(pte.user());
        assert_eq!(pte.ppn().0, 0x1234);
    }

    #[test]
    fn empty_entry() {
        let pte = PageTableEntry::empty();
        assert!(!pte.is_valid());
        assert!(!pte.writable());
        assert!(!pte.user());
    }

    #[test]
    fn read_only_user_entry() {
        let pte = PageTableEntry::new(PhysPageNum(0x1), EntryFlags::P | EntryFlags::US);
        assert!(pte.is_valid());
        assert!(pte.user());
        assert!(!pte.writable());
    }
}
