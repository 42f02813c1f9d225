//! Demand-fault resolution: the path from a hardware page fault to either
//! a freshly populated mapping or a dead process.

use crate::address::{is_reserved, PhysMap, PhysPageNum, VirtAddr};
use crate::address_space::{AddressSpace, MapProt};
use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};
use crate::manager::MemoryManager;
use crate::node::Node;
use crate::page_table::EntryFlags;
use alloc::sync::Arc;
use log::{trace, warn};

/// What the faulting instruction was doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAccess {
    /// read access
    Load,
    /// write access
    Store,
}

impl MemoryManager {
    /// Resolve a page fault at `addr`.
    ///
    /// `Ok` means the page is mapped and the faulting instruction can be
    /// retried. Every `Err` is fatal to the faulting process: either the
    /// access violated the space ([`VmError::AccessViolation`]) or
    /// physical memory ran out ([`VmError::OutOfFrames`]).
    pub fn handle_page_fault(
        &self,
        space: &mut AddressSpace,
        addr: usize,
        access: FaultAccess,
    ) -> VmResult<()> {
        let va = VirtAddr::from(addr);
        if is_reserved(va) {
            warn!("fault at reserved {:?}", va);
            return Err(VmError::AccessViolation);
        }
        let idx = match space.find(va) {
            Some(idx) => idx,
            None => {
                warn!("fault at unmapped {:?}", va);
                return Err(VmError::AccessViolation);
            }
        };
        let dir = space.directory();
        let vpn = va.floor();
        let area = space.area_mut(idx);
        if access == FaultAccess::Store && !area.prot().contains(MapProt::WRITE) {
            warn!("store to read-only {:?}", va);
            return Err(VmError::AccessViolation);
        }
        if let Some(pte) = dir.translate(&self.mem, vpn) {
            if pte.is_valid() {
                // another thread of this process resolved it first
                trace!("benign refault at {:?}", va);
                return Ok(());
            }
        }
        let page_base: VirtAddr = vpn.into();
        let file_off = area.offset() + (page_base.0 - area.start().0);
        let readable = area.prot().contains(MapProt::READ);
        let ppn = if area.is_shared_file() {
            match area.shared_frame() {
                Some(frame) => frame,
                None => {
                    // is_shared_file established the node
                    let node = area.node().cloned().ok_or(VmError::AccessViolation)?;
                    let frame = self.resolve_shared(&node, file_off, readable)?;
                    area.set_shared_frame(frame);
                    frame
                }
            }
        } else {
            let frame = self.alloc_frame()?;
            populate(&self.mem, frame, area.node(), file_off, readable);
            frame
        };
        let mut flags = EntryFlags::US;
        if area.prot().contains(MapProt::WRITE) {
            flags |= EntryFlags::RW;
        }
        if let Err(e) = dir.map(&self.mem, &*self.frames, vpn, ppn, flags) {
            // shared frames stay reachable through the registry and the
            // area; a private one would leak here
            if !area.is_shared_file() {
                self.frames.dealloc_frame(ppn);
            }
            return Err(e);
        }
        trace!("fault at {:?} resolved to {:?}", va, ppn);
        Ok(())
    }

    /// Find or create the registry frame for `node`. The populating read
    /// happens under the registry lock, so a racing second process can
    /// never adopt a half-filled frame.
    fn resolve_shared(
        &self,
        node: &Arc<dyn Node>,
        file_off: usize,
        readable: bool,
    ) -> VmResult<PhysPageNum> {
        let mut shares = self.shares.lock();
        if let Some(frame) = shares.retain(node.number()) {
            trace!("shared frame of node {} reused", node.number());
            return Ok(frame);
        }
        let frame = self.alloc_frame()?;
        populate(&self.mem, frame, Some(node), file_off, readable);
        shares.insert(node.number(), Arc::clone(node), frame);
        trace!(
            "shared frame of node {} registered, {} resident",
            node.number(),
            shares.len()
        );
        Ok(frame)
    }
}

/// Fill `frame` for the page at `file_off` into `node`: read what the file
/// still covers and zero the tail. No file, or no READ in the mapping,
/// means an all-zero page.
fn populate(
    mem: &PhysMap,
    frame: PhysPageNum,
    node: Option<&Arc<dyn Node>>,
    file_off: usize,
    readable: bool,
) {
    let buf = mem.bytes_array(frame);
    let node = match node {
        Some(node) if readable => node,
        _ => {
            buf.fill(0);
            return;
        }
    };
    let want = PAGE_SIZE.min(node.size().saturating_sub(file_off));
    let got = node.read_at(file_off, &mut buf[..want]);
    buf[got..].fill(0);
}
