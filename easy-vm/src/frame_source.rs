use crate::address::PhysPageNum;

/// Trait for the physical frame allocator
/// which hands out and takes back 4 KiB frames
pub trait FrameSource: Send + Sync {
    /// Allocate one frame; `None` when physical memory is exhausted
    fn alloc_frame(&self) -> Option<PhysPageNum>;
    /// Return a frame; the caller guarantees it is no longer referenced
    fn dealloc_frame(&self, ppn: PhysPageNum);
}
