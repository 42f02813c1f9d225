//! In-memory machine harness for the virtual-memory subsystem: a heap
//! arena standing in for physical memory, byte-vector files, and simulated
//! processes whose loads and stores walk the page tables the way the
//! hardware would, faulting into the subsystem on a miss.

use easy_vm::config::PAGE_SIZE;
use easy_vm::{
    AddressSpace, FaultAccess, FrameSource, MapFlags, MapProt, MemoryManager, Node, PhysAddr,
    PhysMap, PhysPageNum, VmError, VmResult,
};
use log::{LevelFilter, Log, Metadata, Record};
use std::sync::{Arc, Mutex};

/// exit status recorded when a fault kills a process
pub const EXIT_FAULT: i32 = -2;

struct ArenaInner {
    current: usize,
    end: usize,
    recycled: Vec<usize>,
    in_use: usize,
}

/// Physical memory for the harness: one heap arena carved into 4 KiB
/// frames, handed out by a bump-and-recycle allocator. Frame numbers are
/// offsets into the arena, so [`PhysMap::with_offset`] over the arena base
/// lets the subsystem write real page tables into it.
pub struct ArenaFrames {
    base: *mut u8,
    words: usize,
    inner: Mutex<ArenaInner>,
}

// The raw arena pointer is only dereferenced through the allocator's own
// accounting; the Mutex serializes that accounting.
unsafe impl Send for ArenaFrames {}
unsafe impl Sync for ArenaFrames {}

impl ArenaFrames {
    /// Arena of `frames` frames. Frame 0 is left unused so a zero frame
    /// number never denotes live memory.
    pub fn new(frames: usize) -> Arc<Self> {
        assert!(frames >= 2, "arena of {} frames is too small", frames);
        let words = frames * PAGE_SIZE / 8;
        let storage = vec![0u64; words].into_boxed_slice();
        let base = Box::into_raw(storage) as *mut u8;
        Arc::new(Self {
            base,
            words,
            inner: Mutex::new(ArenaInner {
                current: 1,
                end: frames,
                recycled: Vec::new(),
                in_use: 0,
            }),
        })
    }
    /// Window the subsystem uses to reach the arena.
    pub fn phys_map(&self) -> PhysMap {
        PhysMap::with_offset(self.base as usize)
    }
    /// Frames currently handed out.
    pub fn in_use(&self) -> usize {
        self.inner.lock().unwrap().in_use
    }
    /// Frames the arena can hand out in total.
    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().end - 1
    }
    /// Host pointer for a physical address, for the harness's own loads
    /// and stores.
    fn ptr(&self, pa: PhysAddr) -> *mut u8 {
        (self.base as usize + pa.0) as *mut u8
    }
}

impl Drop for ArenaFrames {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.base as *mut u64,
                self.words,
            )));
        }
    }
}

impl FrameSource for ArenaFrames {
    fn alloc_frame(&self) -> Option<PhysPageNum> {
        let mut inner = self.inner.lock().unwrap();
        let ppn = if let Some(ppn) = inner.recycled.pop() {
            ppn
        } else if inner.current == inner.end {
            return None;
        } else {
            inner.current += 1;
            inner.current - 1
        };
        inner.in_use += 1;
        Some(PhysPageNum(ppn))
    }
    fn dealloc_frame(&self, ppn: PhysPageNum) {
        let mut inner = self.inner.lock().unwrap();
        let ppn = ppn.0;
        if ppn == 0 || ppn >= inner.current || inner.recycled.iter().any(|&v| v == ppn) {
            panic!("Frame ppn={:#x} has not been allocated!", ppn);
        }
        inner.recycled.push(ppn);
        inner.in_use -= 1;
    }
}

/// File content for the harness: a numbered byte vector.
pub struct ByteNode {
    number: u64,
    bytes: Vec<u8>,
}

impl ByteNode {
    pub fn new(number: u64, bytes: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            number,
            bytes: bytes.into(),
        })
    }
}

impl Node for ByteNode {
    fn number(&self) -> u64 {
        self.number
    }
    fn size(&self) -> usize {
        self.bytes.len()
    }
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        if offset >= self.bytes.len() {
            return 0;
        }
        let n = buf.len().min(self.bytes.len() - offset);
        buf[..n].copy_from_slice(&self.bytes[offset..offset + n]);
        n
    }
}

/// The machine: the frame arena plus one booted memory manager.
pub struct Machine {
    pub frames: Arc<ArenaFrames>,
    pub vm: MemoryManager,
}

impl Machine {
    /// Boot with `mem_size` bytes of physical memory.
    pub fn new(mem_size: usize) -> Self {
        let frames = ArenaFrames::new(mem_size / PAGE_SIZE);
        let vm = MemoryManager::new(frames.phys_map(), frames.clone(), mem_size)
            .expect("boot ran out of frames");
        Self { frames, vm }
    }
}

/// One simulated process: an address space, an open-file table and an exit
/// status.
pub struct Process {
    pub space: AddressSpace,
    files: Vec<Option<Arc<dyn Node>>>,
    exit: Option<i32>,
}

impl Process {
    /// A process with an empty space and no open files.
    pub fn new(m: &Machine) -> Self {
        Self {
            space: m
                .vm
                .create_address_space()
                .expect("out of frames creating a process"),
            files: Vec::new(),
            exit: None,
        }
    }
    /// Fork: duplicated space, duplicated file table.
    pub fn fork(&self, m: &Machine) -> Self {
        Self {
            space: m
                .vm
                .fork_address_space(&self.space)
                .expect("out of frames at fork"),
            files: self.files.clone(),
            exit: None,
        }
    }
    /// Open `node` at the lowest free descriptor.
    pub fn open(&mut self, node: Arc<dyn Node>) -> usize {
        if let Some(fd) = self.files.iter().position(|f| f.is_none()) {
            self.files[fd] = Some(node);
            fd
        } else {
            self.files.push(Some(node));
            self.files.len() - 1
        }
    }
    /// Close a descriptor; mappings made through it stay valid.
    pub fn close(&mut self, fd: usize) {
        if fd < self.files.len() {
            self.files[fd] = None;
        }
    }
    /// The mmap call surface. A negative `fd` maps anonymous memory; a
    /// dangling descriptor fails as a bad address, the catch-all the
    /// original call returned.
    #[allow(clippy::too_many_arguments)]
    pub fn mmap(
        &mut self,
        m: &Machine,
        addr: usize,
        len: usize,
        prot: MapProt,
        flags: MapFlags,
        fd: isize,
        offset: usize,
    ) -> VmResult<usize> {
        let node = if fd < 0 {
            None
        } else {
            match self.files.get(fd as usize).and_then(|f| f.clone()) {
                Some(node) => Some(node),
                None => return Err(VmError::BadAddress),
            }
        };
        m.vm
            .mmap(&mut self.space, addr, len, prot, flags, node, offset)
            .map(|va| va.0)
    }
    /// The munmap call surface.
    pub fn munmap(&mut self, m: &Machine, addr: usize, len: usize) -> VmResult<()> {
        m.vm.munmap(&mut self.space, addr, len)
    }
    /// One user load, faulting the way the hardware would. A violation
    /// kills the process and yields `None`.
    pub fn read_user(&mut self, m: &Machine, va: usize) -> Option<u8> {
        match self.access(m, va, FaultAccess::Load) {
            Ok(ptr) => Some(unsafe { *ptr }),
            Err(err) => {
                self.die(va, err);
                None
            }
        }
    }
    /// One user store, faulting the way the hardware would.
    pub fn write_user(&mut self, m: &Machine, va: usize, byte: u8) -> bool {
        match self.access(m, va, FaultAccess::Store) {
            Ok(ptr) => {
                unsafe { *ptr = byte };
                true
            }
            Err(err) => {
                self.die(va, err);
                false
            }
        }
    }
    /// Contiguous user read, for assertions over whole mappings.
    pub fn read_user_bytes(&mut self, m: &Machine, va: usize, len: usize) -> Option<Vec<u8>> {
        (0..len).map(|i| self.read_user(m, va + i)).collect()
    }
    /// Exit status recorded by a fatal fault, if any.
    pub fn exit_status(&self) -> Option<i32> {
        self.exit
    }
    /// Exit, handing the space back. Returns the recorded kill status when
    /// a fault already ended the process, else `status`.
    pub fn exit(self, m: &Machine, status: i32) -> i32 {
        m.vm.teardown_active(self.space);
        self.exit.unwrap_or(status)
    }

    /// The MMU walk: translate, check the present/user/writable bits, and
    /// fault at most once before retrying.
    fn access(&mut self, m: &Machine, va: usize, access: FaultAccess) -> VmResult<*mut u8> {
        for _ in 0..2 {
            if let Some(pte) = m.vm.translate(&self.space, va) {
                let store = access == FaultAccess::Store;
                if pte.is_valid() && pte.user() && (!store || pte.writable()) {
                    let frame: PhysAddr = pte.ppn().into();
                    let pa = PhysAddr(frame.0 + (va & (PAGE_SIZE - 1)));
                    return Ok(m.frames.ptr(pa));
                }
            }
            m.vm.handle_page_fault(&mut self.space, va, access)?;
        }
        unreachable!("translation still missing after a resolved fault at {va:#x}");
    }

    fn die(&mut self, va: usize, err: VmError) {
        log::warn!("process killed at {:#x}: {}", va, err);
        self.exit = Some(EXIT_FAULT);
    }
}

struct StdoutLogger;

static LOGGER: StdoutLogger = StdoutLogger;

impl Log for StdoutLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }
    fn log(&self, record: &Record) {
        println!("[{:>5}] {}", record.level(), record.args());
    }
    fn flush(&self) {}
}

/// Route subsystem logging to stdout at `level`. Calling twice is fine.
pub fn init_logging(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
