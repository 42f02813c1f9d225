//! Address-layout and paging constants for the 32-bit two-level scheme.

/// page/frame granularity in bytes
pub const PAGE_SIZE: usize = 0x1000;
/// log2 of [`PAGE_SIZE`]
pub const PAGE_SIZE_BITS: usize = 0xc;
/// slots in a page directory, entries in a page table
pub const ENTRY_COUNT: usize = 1024;
/// virtual pages covered by one directory slot
pub const PAGES_PER_SLOT: usize = ENTRY_COUNT;

/// lowest user-mappable virtual address
pub const USER_BASE: usize = 0x8000_0000;
/// exclusive upper bound of user placement; the last page stays unmapped
pub const USER_TOP: usize = 0xffff_f000;
/// directory slots below [`USER_BASE`], shared with the kernel template
pub const KERNEL_SLOTS: usize = USER_BASE >> (PAGE_SIZE_BITS + 10);

/// identity-mapped io apic register window
pub const IOAPIC_BASE: usize = 0xfec0_0000;
/// identity-mapped local apic register window
pub const LAPIC_BASE: usize = 0xfee0_0000;
/// one-page windows kept out of user placement in every address space
pub const MMIO_WINDOWS: [usize; 2] = [IOAPIC_BASE, LAPIC_BASE];
