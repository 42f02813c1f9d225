//! [`VmArea`] and [`AddressSpace`]: what a process has mapped, and where
//! new mappings go.

use crate::address::{PhysPageNum, VPNRange, VirtAddr};
use crate::config::{MMIO_WINDOWS, PAGE_SIZE, USER_BASE, USER_TOP};
use crate::node::Node;
use crate::page_table::PageDirectory;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::*;

bitflags! {
    /// access protection of one mapped area
    pub struct MapProt: u32 {
        /// loads allowed; population reads the backing file
        const READ = 1 << 0;
        /// stores allowed
        const WRITE = 1 << 1;
    }
}

bitflags! {
    /// placement and sharing behavior of one mapping request
    pub struct MapFlags: u32 {
        /// stores are visible through every mapping of the same file
        const SHARED = 1 << 0;
        /// land exactly at the requested address or fail
        const FIXED = 1 << 1;
    }
}

/// one contiguous region of mapped user virtual memory
pub struct VmArea {
    start: VirtAddr,
    size: usize,
    node: Option<Arc<dyn Node>>,
    offset: usize,
    prot: MapProt,
    flags: MapFlags,
    /// frame adopted from the shared registry at first fault
    shared_frame: Option<PhysPageNum>,
}

impl VmArea {
    pub(crate) fn new(
        start: VirtAddr,
        size: usize,
        node: Option<Arc<dyn Node>>,
        offset: usize,
        prot: MapProt,
        flags: MapFlags,
    ) -> Self {
        Self {
            start,
            size,
            node,
            offset,
            prot,
            flags,
            shared_frame: None,
        }
    }
    /// First mapped address
    pub fn start(&self) -> VirtAddr {
        self.start
    }
    /// Length in bytes, a page multiple
    pub fn size(&self) -> usize {
        self.size
    }
    /// One past the last mapped address
    pub fn end(&self) -> VirtAddr {
        VirtAddr(self.start.0 + self.size)
    }
    /// Access protection
    pub fn prot(&self) -> MapProt {
        self.prot
    }
    /// Mapping flags
    pub fn flags(&self) -> MapFlags {
        self.flags
    }
    /// Byte offset into the backing file
    pub fn offset(&self) -> usize {
        self.offset
    }
    /// Backing file, if any
    pub fn node(&self) -> Option<&Arc<dyn Node>> {
        self.node.as_ref()
    }
    /// Check whether `va` falls inside the area
    pub fn contains(&self, va: VirtAddr) -> bool {
        self.start <= va && va < self.end()
    }
    /// SHARED mappings of a file resolve through the registry; anything
    /// else owns its frames privately
    pub fn is_shared_file(&self) -> bool {
        self.flags.contains(MapFlags::SHARED) && self.node.is_some()
    }
    pub(crate) fn page_range(&self) -> VPNRange {
        VPNRange::new(self.start.floor(), self.end().ceil())
    }
    pub(crate) fn shared_frame(&self) -> Option<PhysPageNum> {
        self.shared_frame
    }
    pub(crate) fn set_shared_frame(&mut self, frame: PhysPageNum) {
        self.shared_frame = Some(frame);
    }
    pub(crate) fn take_shared_frame(&mut self) -> Option<PhysPageNum> {
        self.shared_frame.take()
    }
    /// Duplicate for a forked child: same range, same backing handle, and
    /// the same registry back-link (the caller accounts the extra
    /// reference).
    pub(crate) fn clone_for_fork(&self) -> Self {
        Self {
            start: self.start,
            size: self.size,
            node: self.node.clone(),
            offset: self.offset,
            prot: self.prot,
            flags: self.flags,
            shared_frame: self.shared_frame,
        }
    }
}

/// per-process mapping state: a directory handle plus areas ordered by
/// start address
pub struct AddressSpace {
    dir: PageDirectory,
    areas: Vec<VmArea>,
}

impl AddressSpace {
    pub(crate) fn new(dir: PageDirectory) -> Self {
        Self {
            dir,
            areas: Vec::new(),
        }
    }
    /// Directory the hardware walks for this space
    pub fn directory(&self) -> PageDirectory {
        self.dir
    }
    /// Mapped areas, ordered by start address
    pub fn areas(&self) -> &[VmArea] {
        &self.areas
    }
    pub(crate) fn find(&self, va: VirtAddr) -> Option<usize> {
        self.areas.iter().position(|a| a.contains(va))
    }
    pub(crate) fn area_mut(&mut self, idx: usize) -> &mut VmArea {
        &mut self.areas[idx]
    }
    pub(crate) fn remove(&mut self, idx: usize) -> VmArea {
        self.areas.remove(idx)
    }
    pub(crate) fn drain_areas(&mut self) -> Vec<VmArea> {
        core::mem::take(&mut self.areas)
    }
    /// Insert keeping address order. The caller has verified the range is
    /// free.
    pub(crate) fn insert(&mut self, area: VmArea) {
        let idx = self
            .areas
            .iter()
            .position(|a| a.start() > area.start())
            .unwrap_or(self.areas.len());
        debug_assert!(idx == 0 || self.areas[idx - 1].end() <= area.start());
        debug_assert!(idx == self.areas.len() || area.end() <= self.areas[idx].start());
        self.areas.insert(idx, area);
    }
    /// First free gap of `size` bytes at or above `hint`, past every
    /// overlapping area and the reserved windows. `hint` and `size` arrive
    /// page aligned.
    pub(crate) fn place(&self, hint: VirtAddr, size: usize) -> Option<VirtAddr> {
        debug_assert!(hint.aligned());
        debug_assert!(size > 0 && size % PAGE_SIZE == 0);
        let mut va = hint.0.max(USER_BASE);
        loop {
            for area in self.areas.iter() {
                if area.end().0 <= va {
                    continue;
                }
                if va.checked_add(size)? <= area.start().0 {
                    break;
                }
                va = area.end().0;
            }
            let end = va.checked_add(size)?;
            if let Some(past) = window_clash(va, end) {
                // rescan: the bump may have pushed us into a later area
                va = past;
                continue;
            }
            return if end <= USER_TOP {
                Some(VirtAddr(va))
            } else {
                None
            };
        }
    }
}

/// First address past the lowest window page overlapping `[va, end)`.
fn window_clash(va: usize, end: usize) -> Option<usize> {
    MMIO_WINDOWS
        .iter()
        .find(|&&w| va < w + PAGE_SIZE && w < end)
        .map(|w| w + PAGE_SIZE)
}
