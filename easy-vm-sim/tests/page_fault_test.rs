//! Fault-driven population: frames appear on first touch, file pages carry
//! the right slice, and bad accesses kill the process.

use easy_vm::config::{IOAPIC_BASE, PAGE_SIZE, USER_BASE};
use easy_vm::{FaultAccess, MapFlags, MapProt, VmError};
use easy_vm_sim::{ByteNode, Machine, Process, EXIT_FAULT};
use pretty_assertions::assert_eq;

const MIB: usize = 1 << 20;

fn rw() -> MapProt {
    MapProt::READ | MapProt::WRITE
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn frames_appear_on_first_touch() {
    let m = Machine::new(MIB);
    let mut p = Process::new(&m);
    let va = p
        .mmap(&m, 0, 3 * PAGE_SIZE, rw(), MapFlags::empty(), -1, 0)
        .unwrap();
    let before = m.frames.in_use();
    assert_eq!(p.read_user(&m, va), Some(0));
    // one data frame plus the directory slot's table
    assert_eq!(m.frames.in_use(), before + 2);
    assert_eq!(p.read_user(&m, va + PAGE_SIZE - 1), Some(0));
    assert_eq!(m.frames.in_use(), before + 2);
    assert_eq!(p.read_user(&m, va + PAGE_SIZE), Some(0));
    assert_eq!(m.frames.in_use(), before + 3);
}

#[test]
fn stores_persist_across_pages() {
    let m = Machine::new(MIB);
    let mut p = Process::new(&m);
    let va = p
        .mmap(&m, 0, 2 * PAGE_SIZE, rw(), MapFlags::empty(), -1, 0)
        .unwrap();
    assert!(p.write_user(&m, va + 10, 0x5a));
    assert!(p.write_user(&m, va + PAGE_SIZE + 10, 0xa5));
    assert_eq!(p.read_user(&m, va + 10), Some(0x5a));
    assert_eq!(p.read_user(&m, va + PAGE_SIZE + 10), Some(0xa5));
    // untouched bytes of a demand-zero page stay zero
    assert_eq!(p.read_user(&m, va + 11), Some(0));
}

#[test]
fn file_pages_carry_their_slice_and_a_zero_tail() {
    let m = Machine::new(MIB);
    let mut p = Process::new(&m);
    let content = patterned(2 * PAGE_SIZE + 100);
    let node = ByteNode::new(9, content.clone());
    let fd = p.open(node) as isize;
    // skip the first file page
    let va = p
        .mmap(
            &m,
            0,
            2 * PAGE_SIZE,
            MapProt::READ,
            MapFlags::empty(),
            fd,
            PAGE_SIZE,
        )
        .unwrap();
    let first = p.read_user_bytes(&m, va, PAGE_SIZE).unwrap();
    assert_eq!(first.as_slice(), &content[PAGE_SIZE..2 * PAGE_SIZE]);
    let second = p.read_user_bytes(&m, va + PAGE_SIZE, PAGE_SIZE).unwrap();
    assert_eq!(&second[..100], &content[2 * PAGE_SIZE..]);
    assert!(second[100..].iter().all(|&b| b == 0));
}

#[test]
fn a_short_file_fills_one_page() {
    let m = Machine::new(MIB);
    let mut p = Process::new(&m);
    let node = ByteNode::new(3, "abcd");
    let fd = p.open(node) as isize;
    let va = p
        .mmap(&m, 0, 1, MapProt::READ, MapFlags::empty(), fd, 0)
        .unwrap();
    let page = p.read_user_bytes(&m, va, PAGE_SIZE).unwrap();
    assert_eq!(&page[..4], b"abcd");
    assert!(page[4..].iter().all(|&b| b == 0));
}

#[test]
fn an_unreadable_mapping_faults_in_zeros() {
    let m = Machine::new(MIB);
    let mut p = Process::new(&m);
    let node = ByteNode::new(4, "abcd");
    let fd = p.open(node) as isize;
    // no READ, so the file contents never reach the page
    let va = p
        .mmap(&m, 0, 1, MapProt::WRITE, MapFlags::empty(), fd, 0)
        .unwrap();
    let page = p.read_user_bytes(&m, va, PAGE_SIZE).unwrap();
    assert!(page.iter().all(|&b| b == 0));
    // the page itself works like any writable page
    assert!(p.write_user(&m, va, b'k'));
    assert_eq!(p.read_user(&m, va), Some(b'k'));
}

#[test]
fn store_to_a_read_only_page_kills() {
    let m = Machine::new(MIB);
    let mut p = Process::new(&m);
    let va = p
        .mmap(&m, 0, 1, MapProt::READ, MapFlags::empty(), -1, 0)
        .unwrap();
    assert!(!p.write_user(&m, va, 1));
    assert_eq!(p.exit_status(), Some(EXIT_FAULT));

    // a page that is already resident dies the same way
    let mut q = Process::new(&m);
    let va = q
        .mmap(&m, 0, 1, MapProt::READ, MapFlags::empty(), -1, 0)
        .unwrap();
    assert_eq!(q.read_user(&m, va), Some(0));
    assert!(!q.write_user(&m, va, 1));
    assert_eq!(q.exit_status(), Some(EXIT_FAULT));
}

#[test]
fn stray_accesses_kill() {
    let m = Machine::new(MIB);

    let mut p = Process::new(&m);
    assert_eq!(p.read_user(&m, 0x9000_0000), None);
    assert_eq!(p.exit_status(), Some(EXIT_FAULT));

    // kernel half
    let mut p = Process::new(&m);
    assert_eq!(p.read_user(&m, 0x1000), None);
    assert_eq!(p.exit_status(), Some(EXIT_FAULT));

    // interrupt-controller window
    let mut p = Process::new(&m);
    assert_eq!(p.read_user(&m, IOAPIC_BASE + 0x10), None);
    assert_eq!(p.exit_status(), Some(EXIT_FAULT));

    // one page past the end of an area
    let mut p = Process::new(&m);
    let va = p.mmap(&m, 0, 1, rw(), MapFlags::empty(), -1, 0).unwrap();
    assert_eq!(va, USER_BASE);
    assert_eq!(p.read_user(&m, va + PAGE_SIZE), None);
    assert_eq!(p.exit_status(), Some(EXIT_FAULT));
}

#[test]
fn refaulting_a_resident_page_is_benign() {
    let m = Machine::new(MIB);
    let mut p = Process::new(&m);
    let va = p.mmap(&m, 0, 1, rw(), MapFlags::empty(), -1, 0).unwrap();
    assert!(p.write_user(&m, va, 0x42));
    let before = m.frames.in_use();
    m.vm
        .handle_page_fault(&mut p.space, va, FaultAccess::Load)
        .unwrap();
    m.vm
        .handle_page_fault(&mut p.space, va + 7, FaultAccess::Store)
        .unwrap();
    assert_eq!(m.frames.in_use(), before);
    assert_eq!(p.read_user(&m, va), Some(0x42));
}

#[test]
fn exhaustion_surfaces_at_the_fault() {
    let m = Machine::new(16 * PAGE_SIZE);
    let mut p = Process::new(&m);
    // more pages than the machine has frames
    let va = p
        .mmap(&m, 0, 32 * PAGE_SIZE, rw(), MapFlags::empty(), -1, 0)
        .unwrap();
    let mut seen = None;
    for i in 0..32 {
        match m
            .vm
            .handle_page_fault(&mut p.space, va + i * PAGE_SIZE, FaultAccess::Store)
        {
            Ok(()) => {}
            Err(e) => {
                seen = Some(e);
                break;
            }
        }
    }
    assert_eq!(seen, Some(VmError::OutOfFrames));
    assert_eq!(m.frames.in_use(), m.frames.capacity());
    // earlier pages are untouched by the failure
    assert_eq!(p.read_user(&m, va), Some(0));
    assert!(p.exit_status().is_none());
}
