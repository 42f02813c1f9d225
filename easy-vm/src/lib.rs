//! A paged virtual-memory subsystem isolated from the kernel.
//!
//! Two-level 32-bit translation, per-process address spaces with
//! demand-paged mappings, and a registry that lands every SHARED mapping of
//! a file on one physical frame. Physical memory and file content sit
//! behind the [`FrameSource`] and [`Node`] traits, so the crate links into
//! a kernel and runs on a host unchanged.
#![no_std]
extern crate alloc;
mod address;
mod address_space;
pub mod config;
mod error;
mod fault;
mod frame_source;
mod manager;
mod node;
mod page_table;
mod share;
pub use address::{PhysAddr, PhysMap, PhysPageNum, StepByOne, VPNRange, VirtAddr, VirtPageNum};
pub use address_space::{AddressSpace, MapFlags, MapProt, VmArea};
pub use error::{VmError, VmResult};
pub use fault::FaultAccess;
pub use frame_source::FrameSource;
pub use manager::MemoryManager;
pub use node::Node;
pub use page_table::{activate, active_root, EntryFlags, PageDirectory, PageTableEntry};
