//! The [`MemoryManager`]: the one object the subsystem hangs off. It owns
//! the physical window, the frame source, the kernel template directory and
//! the shared-frame registry. The kernel builds a single manager at boot and
//! passes `&` to it everywhere; there is no global state.

use crate::address::{is_reserved, PhysMap, PhysPageNum, VPNRange, VirtAddr};
use crate::address_space::{AddressSpace, MapFlags, MapProt, VmArea};
use crate::config::{KERNEL_SLOTS, MMIO_WINDOWS, PAGE_SIZE, USER_BASE};
use crate::error::{VmError, VmResult};
use crate::frame_source::FrameSource;
use crate::node::Node;
use crate::page_table::{active_root, EntryFlags, PageDirectory, PageTableEntry};
use crate::share::ShareTable;
use alloc::sync::Arc;
use log::{debug, warn};
use spin::Mutex;

/// Round a byte length up to whole pages.
fn round_up(len: usize) -> VmResult<usize> {
    let bumped = len.checked_add(PAGE_SIZE - 1).ok_or(VmError::BadLength)?;
    Ok(bumped & !(PAGE_SIZE - 1))
}

/// Owner of all virtual-memory state shared between processes.
pub struct MemoryManager {
    pub(crate) mem: PhysMap,
    pub(crate) frames: Arc<dyn FrameSource>,
    mem_size: usize,
    kernel_dir: PageDirectory,
    pub(crate) shares: Mutex<ShareTable>,
}

impl MemoryManager {
    /// Boot-time construction: build the kernel template directory with an
    /// identity map of `[PAGE_SIZE, mem_size)` plus both windows, all
    /// supervisor only. Runs once; the template never changes afterwards,
    /// which is what makes the slot copy in [`Self::create_address_space`]
    /// safe without a lock.
    pub fn new(mem: PhysMap, frames: Arc<dyn FrameSource>, mem_size: usize) -> VmResult<Self> {
        if mem_size < PAGE_SIZE {
            return Err(VmError::BadLength);
        }
        let kernel_dir = PageDirectory::new_empty(&mem, &*frames)?;
        let identity = VPNRange::new(VirtAddr(PAGE_SIZE).floor(), VirtAddr(mem_size).floor());
        for vpn in identity {
            kernel_dir.map(&mem, &*frames, vpn, PhysPageNum(vpn.0), EntryFlags::RW)?;
        }
        let manager = Self {
            mem,
            frames,
            mem_size,
            kernel_dir,
            shares: Mutex::new(ShareTable::new()),
        };
        manager.map_windows(kernel_dir)?;
        debug!("kernel template ready, physical memory {:#x}", mem_size);
        Ok(manager)
    }

    /// Extent of the identity-mapped physical memory.
    pub fn mem_size(&self) -> usize {
        self.mem_size
    }

    /// The boot template directory, for loading before the first process
    /// exists.
    pub fn kernel_directory(&self) -> PageDirectory {
        self.kernel_dir
    }

    /// Fresh address space: a directory carrying the template's kernel
    /// slots (mid tables shared with the template) plus its own window
    /// table, and no areas.
    pub fn create_address_space(&self) -> VmResult<AddressSpace> {
        let dir = self.make_directory()?;
        Ok(AddressSpace::new(dir))
    }

    /// Duplicate `parent` for a forked child. Areas are copied; resident
    /// private pages are not: the child re-faults, re-reading file pages
    /// and restarting anonymous pages zeroed. A resolved shared frame is
    /// adopted with one more registry reference, so parent and child keep
    /// seeing the same memory.
    pub fn fork_address_space(&self, parent: &AddressSpace) -> VmResult<AddressSpace> {
        let mut child = self.create_address_space()?;
        for area in parent.areas() {
            let copy = area.clone_for_fork();
            if let (Some(frame), Some(node)) = (copy.shared_frame(), copy.node()) {
                let retained = self.shares.lock().retain(node.number());
                debug_assert_eq!(retained, Some(frame));
            }
            child.insert(copy);
        }
        debug!("forked space with {} areas", parent.areas().len());
        Ok(child)
    }

    /// Map `len` bytes at or above `addr`. Nothing is allocated, read or
    /// written here; pages materialize on first touch.
    ///
    /// `addr == 0` means no preference. A nonzero `addr` is rounded down
    /// to its page and must name a user address outside the reserved
    /// windows. With [`MapFlags::FIXED`] the mapping lands exactly at the
    /// hint or the call fails leaving the space unchanged. `offset` is a
    /// page-aligned byte offset into `node`.
    pub fn mmap(
        &self,
        space: &mut AddressSpace,
        addr: usize,
        len: usize,
        prot: MapProt,
        flags: MapFlags,
        node: Option<Arc<dyn Node>>,
        offset: usize,
    ) -> VmResult<VirtAddr> {
        if len == 0 {
            return Err(VmError::BadLength);
        }
        if offset % PAGE_SIZE != 0 {
            return Err(VmError::BadLength);
        }
        let size = round_up(len)?;
        let hint = if addr == 0 {
            VirtAddr(USER_BASE)
        } else {
            let hint: VirtAddr = VirtAddr::from(addr).floor().into();
            if is_reserved(hint) {
                warn!("mmap refuses reserved hint {:?}", hint);
                return Err(VmError::BadAddress);
            }
            hint
        };
        let start = space.place(hint, size).ok_or(VmError::NoSpace)?;
        if flags.contains(MapFlags::FIXED) && start != hint {
            warn!("fixed mapping at {:?} collides", hint);
            return Err(VmError::FixedConflict);
        }
        debug!(
            "mmap {:?} + {:#x}, prot {:?}, flags {:?}",
            start, size, prot, flags
        );
        space.insert(VmArea::new(start, size, node, offset, prot, flags));
        Ok(start)
    }

    /// Unmap the area containing `addr`. `addr` must be the area start and
    /// the rounded `len` must cover it exactly; partial unmaps are refused.
    /// Unmapping a hole succeeds without doing anything.
    pub fn munmap(&self, space: &mut AddressSpace, addr: usize, len: usize) -> VmResult<()> {
        let va = VirtAddr::from(addr);
        if is_reserved(va) {
            return Err(VmError::BadAddress);
        }
        if len == 0 {
            return Err(VmError::BadLength);
        }
        let idx = match space.find(va) {
            Some(idx) => idx,
            None => return Ok(()),
        };
        let size = round_up(len)?;
        let area = &space.areas()[idx];
        if va != area.start() || size != area.size() {
            warn!("munmap {:?} + {:#x} does not cover its area exactly", va, len);
            return Err(VmError::BadLength);
        }
        let mut area = space.remove(idx);
        self.release_area(space.directory(), &mut area);
        debug!("munmap {:?} + {:#x}", area.start(), area.size());
        Ok(())
    }

    /// Exec-time reset: drop every area exactly as munmap would, free the
    /// user-half tables, then re-map the windows. The directory stays
    /// valid and, if loaded, loaded.
    pub fn clear_address_space(&self, space: &mut AddressSpace) -> VmResult<()> {
        let dir = space.directory();
        for mut area in space.drain_areas() {
            self.release_area(dir, &mut area);
        }
        self.free_user_tables(dir);
        self.map_windows(dir)?;
        debug!("address space cleared");
        Ok(())
    }

    /// Exit-time destruction of the space whose directory is loaded on the
    /// calling core. The kernel half keeps translating throughout; the
    /// caller switches directories before touching user memory again.
    pub fn teardown_active(&self, space: AddressSpace) {
        if let Some(root) = active_root() {
            debug_assert_eq!(root, space.directory().root());
        }
        self.teardown(space);
    }

    /// Exit-time destruction of a space no core has loaded.
    pub fn teardown_inactive(&self, space: AddressSpace) {
        if let Some(root) = active_root() {
            debug_assert!(root != space.directory().root());
        }
        self.teardown(space);
    }

    /// Read-only walk of `space`'s directory, for the trap path and the
    /// harness.
    pub fn translate(&self, space: &AddressSpace, addr: usize) -> Option<PageTableEntry> {
        space
            .directory()
            .translate(&self.mem, VirtAddr::from(addr).floor())
    }

    pub(crate) fn alloc_frame(&self) -> VmResult<PhysPageNum> {
        self.frames.alloc_frame().ok_or(VmError::OutOfFrames)
    }

    /// Map both interrupt-controller windows, identity and supervisor only.
    fn map_windows(&self, dir: PageDirectory) -> VmResult<()> {
        for base in MMIO_WINDOWS {
            let vpn = VirtAddr(base).floor();
            dir.map(&self.mem, &*self.frames, vpn, PhysPageNum(vpn.0), EntryFlags::RW)?;
        }
        Ok(())
    }

    fn make_directory(&self) -> VmResult<PageDirectory> {
        let dir = PageDirectory::new_empty(&self.mem, &*self.frames)?;
        let src = self.mem.pte_array(self.kernel_dir.root());
        let dst = self.mem.pte_array(dir.root());
        dst[..KERNEL_SLOTS].copy_from_slice(&src[..KERNEL_SLOTS]);
        if let Err(e) = self.map_windows(dir) {
            self.frames.dealloc_frame(dir.root());
            return Err(e);
        }
        Ok(dir)
    }

    fn teardown(&self, mut space: AddressSpace) {
        let dir = space.directory();
        for mut area in space.drain_areas() {
            self.release_area(dir, &mut area);
        }
        self.free_user_tables(dir);
        self.frames.dealloc_frame(dir.root());
        debug!("address space torn down");
    }

    /// Undo one area's resident pages. Private frames go straight back to
    /// the frame source; a resolved shared frame drops one registry
    /// reference and is freed only when the last mapping of the file goes
    /// away.
    pub(crate) fn release_area(&self, dir: PageDirectory, area: &mut VmArea) {
        let shared = area.is_shared_file();
        for vpn in area.page_range() {
            dir.unmap(&self.mem, &*self.frames, vpn, !shared);
        }
        if let Some(frame) = area.take_shared_frame() {
            let number = match area.node() {
                Some(node) => node.number(),
                None => return,
            };
            if let Some(released) = self.shares.lock().release(number) {
                debug_assert_eq!(released, frame);
                self.frames.dealloc_frame(released);
                debug!("last shared mapping of node {} gone, frame freed", number);
            }
        }
    }

    /// Free every mid-level table the user half of `dir` owns. Kernel
    /// slots point into the shared template and stay put; window target
    /// pages are device registers and are never handed to the frame
    /// source.
    fn free_user_tables(&self, dir: PageDirectory) {
        let slots = self.mem.pte_array(dir.root());
        for slot in slots[KERNEL_SLOTS..].iter_mut() {
            if slot.is_valid() {
                self.frames.dealloc_frame(slot.ppn());
                *slot = PageTableEntry::empty();
            }
        }
    }
}
