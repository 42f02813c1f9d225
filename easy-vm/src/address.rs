//! Physical and virtual addresses, page numbers, and the one place in the
//! crate that turns a physical address into a raw pointer.
//!
//! Addresses are 32 bits wide and translated by a two-level scheme:
//! ```text
//! | 31        22 | 21        12 | 11           0 |
//! |  directory   |    table     |  page offset   |
//! ```

use crate::config::{ENTRY_COUNT, MMIO_WINDOWS, PAGE_SIZE, PAGE_SIZE_BITS, USER_BASE, USER_TOP};
use crate::page_table::PageTableEntry;
use core::fmt::{self, Debug, Formatter};

/// addresses are 32 bits wide
const ADDR_MASK: usize = u32::MAX as usize;
/// page numbers carry the upper 20 address bits
const PN_MASK: usize = ADDR_MASK >> PAGE_SIZE_BITS;

/// physical address
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub struct PhysAddr(pub usize);

/// virtual address
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub struct VirtAddr(pub usize);

/// physical page number
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub struct PhysPageNum(pub usize);

/// virtual page number
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub struct VirtPageNum(pub usize);

impl Debug for VirtAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("VA:{:#x}", self.0))
    }
}
impl Debug for VirtPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("VPN:{:#x}", self.0))
    }
}
impl Debug for PhysAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("PA:{:#x}", self.0))
    }
}
impl Debug for PhysPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("PPN:{:#x}", self.0))
    }
}

impl From<usize> for PhysAddr {
    fn from(v: usize) -> Self {
        Self(v & ADDR_MASK)
    }
}
impl From<usize> for PhysPageNum {
    fn from(v: usize) -> Self {
        Self(v & PN_MASK)
    }
}
impl From<usize> for VirtAddr {
    fn from(v: usize) -> Self {
        Self(v & ADDR_MASK)
    }
}
impl From<usize> for VirtPageNum {
    fn from(v: usize) -> Self {
        Self(v & PN_MASK)
    }
}
impl From<PhysAddr> for usize {
    fn from(v: PhysAddr) -> Self {
        v.0
    }
}
impl From<PhysPageNum> for usize {
    fn from(v: PhysPageNum) -> Self {
        v.0
    }
}
impl From<VirtAddr> for usize {
    fn from(v: VirtAddr) -> Self {
        v.0
    }
}
impl From<VirtPageNum> for usize {
    fn from(v: VirtPageNum) -> Self {
        v.0
    }
}

impl VirtAddr {
    /// `VirtAddr`->`VirtPageNum`, rounding down
    pub fn floor(&self) -> VirtPageNum {
        VirtPageNum(self.0 / PAGE_SIZE)
    }
    /// `VirtAddr`->`VirtPageNum`, rounding up
    pub fn ceil(&self) -> VirtPageNum {
        if self.0 == 0 {
            VirtPageNum(0)
        } else {
            VirtPageNum((self.0 - 1 + PAGE_SIZE) / PAGE_SIZE)
        }
    }
    /// Get the page offset of the address
    pub fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
    /// Check page alignment
    pub fn aligned(&self) -> bool {
        self.page_offset() == 0
    }
}
impl From<VirtAddr> for VirtPageNum {
    fn from(v: VirtAddr) -> Self {
        assert_eq!(v.page_offset(), 0);
        v.floor()
    }
}
impl From<VirtPageNum> for VirtAddr {
    fn from(v: VirtPageNum) -> Self {
        Self(v.0 << PAGE_SIZE_BITS)
    }
}

impl PhysAddr {
    /// `PhysAddr`->`PhysPageNum`, rounding down
    pub fn floor(&self) -> PhysPageNum {
        PhysPageNum(self.0 / PAGE_SIZE)
    }
    /// `PhysAddr`->`PhysPageNum`, rounding up
    pub fn ceil(&self) -> PhysPageNum {
        if self.0 == 0 {
            PhysPageNum(0)
        } else {
            PhysPageNum((self.0 - 1 + PAGE_SIZE) / PAGE_SIZE)
        }
    }
    /// Get the page offset of the address
    pub fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
    /// Check page alignment
    pub fn aligned(&self) -> bool {
        self.page_offset() == 0
    }
}
impl From<PhysAddr> for PhysPageNum {
    fn from(v: PhysAddr) -> Self {
        assert_eq!(v.page_offset(), 0);
        v.floor()
    }
}
impl From<PhysPageNum> for PhysAddr {
    fn from(v: PhysPageNum) -> Self {
        Self(v.0 << PAGE_SIZE_BITS)
    }
}

impl VirtPageNum {
    /// Directory and table indexes of the page, top level first.
    pub fn indexes(&self) -> [usize; 2] {
        let mut vpn = self.0;
        let mut idx = [0usize; 2];
        for i in (0..2).rev() {
            idx[i] = vpn & (ENTRY_COUNT - 1);
            vpn >>= 10;
        }
        idx
    }
}

/// True when the page holds one of the interrupt-controller windows.
pub fn is_window_page(vpn: VirtPageNum) -> bool {
    MMIO_WINDOWS.iter().any(|w| VirtAddr(*w).floor() == vpn)
}

/// True when `va` may never be the target of a user mapping request:
/// everything outside `[USER_BASE, USER_TOP)` plus the two windows.
pub fn is_reserved(va: VirtAddr) -> bool {
    va.0 < USER_BASE || va.0 >= USER_TOP || is_window_page(va.floor())
}

/// Window through which physical frames are addressed.
///
/// On the 32-bit target physical memory is identity mapped under the kernel
/// half of every directory, so the window is a zero displacement. Hosted
/// harnesses hand out frames inside a heap arena and set the displacement to
/// the arena base. Every raw pointer in the crate is formed here; callers
/// must keep the backing memory alive and hand out a frame to one owner at
/// a time.
#[derive(Copy, Clone)]
pub struct PhysMap {
    offset: usize,
}

impl PhysMap {
    /// zero-displacement window for running on the real directory
    pub const fn identity() -> Self {
        Self { offset: 0 }
    }
    /// window displaced by `offset`, for hosted frame arenas
    pub const fn with_offset(offset: usize) -> Self {
        Self { offset }
    }
    /// Get the mutable reference of the page-table slots held in one frame
    pub fn pte_array(&self, ppn: PhysPageNum) -> &'static mut [PageTableEntry] {
        let pa: PhysAddr = ppn.into();
        unsafe {
            core::slice::from_raw_parts_mut(
                (self.offset + pa.0) as *mut PageTableEntry,
                ENTRY_COUNT,
            )
        }
    }
    /// Get the mutable reference of the bytes held in one frame
    pub fn bytes_array(&self, ppn: PhysPageNum) -> &'static mut [u8] {
        let pa: PhysAddr = ppn.into();
        unsafe { core::slice::from_raw_parts_mut((self.offset + pa.0) as *mut u8, PAGE_SIZE) }
    }
}

/// a simple abstract type that can step forward by one
pub trait StepByOne {
    /// step forward
    fn step(&mut self);
}
impl StepByOne for VirtPageNum {
    fn step(&mut self) {
        self.0 += 1;
    }
}

/// a simple range structure for type T
#[derive(Copy, Clone)]
pub struct SimpleRange<T>
where
    T: StepByOne + Copy + PartialEq + PartialOrd + Debug,
{
    l: T,
    r: T,
}
impl<T> SimpleRange<T>
where
    T: StepByOne + Copy + PartialEq + PartialOrd + Debug,
{
    pub fn new(start: T, end: T) -> Self {
        assert!(start <= end, "start {:?} > end {:?}!", start, end);
        Self { l: start, r: end }
    }
    pub fn get_start(&self) -> T {
        self.l
    }
    pub fn get_end(&self) -> T {
        self.r
    }
}
impl<T> IntoIterator for SimpleRange<T>
where
    T: StepByOne + Copy + PartialEq + PartialOrd + Debug,
{
    type Item = T;
    type IntoIter = SimpleRangeIterator<T>;
    fn into_iter(self) -> Self::IntoIter {
        SimpleRangeIterator::new(self.l, self.r)
    }
}
/// iterator for the simple range structure
pub struct SimpleRangeIterator<T>
where
    T: StepByOne + Copy + PartialEq + PartialOrd + Debug,
{
    current: T,
    end: T,
}
impl<T> SimpleRangeIterator<T>
where
    T: StepByOne + Copy + PartialEq + PartialOrd + Debug,
{
    pub fn new(l: T, r: T) -> Self {
        Self { current: l, end: r }
    }
}
impl<T> Iterator for SimpleRangeIterator<T>
where
    T: StepByOne + Copy + PartialEq + PartialOrd + Debug,
{
    type Item = T;
    fn next(&mut self) -> Option<Self::Item> {
        if self.current == self.end {
            None
        } else {
            let t = self.current;
            self.current.step();
            Some(t)
        }
    }
}

/// a range of virtual page numbers
pub type VPNRange = SimpleRange<VirtPageNum>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_masking() {
        assert_eq!(PhysAddr::from(0x1_0000_1000).0, 0x1000);
        assert_eq!(VirtAddr::from(0xffff_ffff).0, 0xffff_ffff);
    }

    #[test]
    fn two_level_indexes() {
        let vpn = VirtAddr(0x8040_3000).floor();
        assert_eq!(vpn.indexes(), [0x201, 0x3]);
        let vpn = VirtAddr(0xfec0_0000).floor();
        assert_eq!(vpn.indexes(), [0x3fb, 0x0]);
    }

    #[test]
    fn rounding() {
        assert_eq!(VirtAddr(0x1001).ceil().0, 0x2);
        assert_eq!(VirtAddr(0x1000).ceil().0, 0x1);
        assert_eq!(VirtAddr(0x0).ceil().0, 0x0);
        assert_eq!(VirtAddr(0x1fff).floor().0, 0x1);
    }

    #[test]
    fn reserved_classification() {
        assert!(is_reserved(VirtAddr(0x1000)));
        assert!(is_reserved(VirtAddr(0x7fff_ffff)));
        assert!(is_reserved(VirtAddr(0xfec0_0800)));
        assert!(is_reserved(VirtAddr(0xfee0_0000)));
        assert!(is_reserved(VirtAddr(USER_TOP)));
        assert!(is_reserved(VirtAddr(0xffff_ffff)));
        assert!(!is_reserved(VirtAddr(0x8000_0000)));
        assert!(!is_reserved(VirtAddr(0xfec0_1000)));
        assert!(!is_reserved(VirtAddr(0xfed0_0000)));
        assert!(!is_reserved(VirtAddr(USER_TOP - 1)));
    }
}
