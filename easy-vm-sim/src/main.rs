//! Scenario runner: replays the story the subsystem is built around. One
//! file mapped SHARED from two address spaces, stores visible through every
//! mapping, an unmap that keeps the shared frame alive, FIXED placement,
//! and no-read mappings faulting in as zeros.

use clap::{App, Arg};
use easy_vm::config::PAGE_SIZE;
use easy_vm::{MapFlags, MapProt};
use easy_vm_sim::{init_logging, ByteNode, Machine, Process};
use log::LevelFilter;

fn read_string(m: &Machine, p: &mut Process, va: usize) -> String {
    let mut s = String::new();
    for i in 0..PAGE_SIZE {
        match p.read_user(m, va + i) {
            Some(0) | None => break,
            Some(b) => s.push(b as char),
        }
    }
    s
}

fn main() {
    let matches = App::new("easy-vm-sim")
        .version("0.1.0")
        .about("replays the shared-mapping story on the in-memory machine")
        .arg(
            Arg::new("mem")
                .short('m')
                .long("mem")
                .takes_value(true)
                .help("physical memory in MiB"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .multiple_occurrences(true)
                .help("raise log verbosity, repeat for trace"),
        )
        .get_matches();
    let mem_mib: usize = matches
        .value_of("mem")
        .unwrap_or("4")
        .parse()
        .expect("--mem wants a number of MiB");
    init_logging(match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    });

    let m = Machine::new(mem_mib << 20);
    let rw = MapProt::READ | MapProt::WRITE;
    let data = ByteNode::new(1, "abcd");
    let note = ByteNode::new(2, "stay calm");

    let mut a = Process::new(&m);
    let fd = a.open(data) as isize;

    let p = a.mmap(&m, 0, 1, rw, MapFlags::SHARED, fd, 0).expect("mmap");
    println!("A maps the file SHARED at {:#x}", p);
    println!("A reads: {:?}", read_string(&m, &mut a, p));

    let mut b = a.fork(&m);
    println!("forked; the child inherits the mapping");
    println!("child reads: {:?}", read_string(&m, &mut b, p));
    let status = b.exit(&m, 0);
    println!("child exited with {}", status);

    let p2 = a.mmap(&m, 0, 1, rw, MapFlags::SHARED, fd, 0).expect("mmap");
    println!("A maps the same file again at {:#x}", p2);
    a.write_user(&m, p2 + 4, b'x');
    println!("A stores 'x' at byte 4 through the second mapping");
    println!("A reads through the first: {:?}", read_string(&m, &mut a, p));

    a.munmap(&m, p2, 1).expect("munmap");
    println!("second mapping dropped; the frame stays while the first lives");
    println!("A reads: {:?}", read_string(&m, &mut a, p));
    a.munmap(&m, p, 1).expect("munmap");
    println!("all mappings of the file are gone, frames in use: {}", m.frames.in_use());

    let fd2 = a.open(note) as isize;
    let p3 = a
        .mmap(&m, 0x9000_0000, 1, MapProt::READ, MapFlags::SHARED, fd2, 0)
        .expect("mmap");
    println!("hinted mapping lands at {:#x}", p3);
    let p4 = a
        .mmap(&m, 0x9000_0000, 1, MapProt::READ, MapFlags::SHARED, fd2, 0)
        .expect("mmap");
    println!("same hint again slides to {:#x}", p4);
    let p5 = a.mmap(
        &m,
        0x9000_0000,
        1,
        MapProt::READ,
        MapFlags::SHARED | MapFlags::FIXED,
        fd2,
        0,
    );
    println!("FIXED at the occupied page: {:?}", p5);
    println!("A reads the note: {:?}", read_string(&m, &mut a, p3));

    let p6 = a
        .mmap(&m, 0, 1, MapProt::empty(), MapFlags::SHARED, fd, 0)
        .expect("mmap");
    println!(
        "no-read mapping of the file reads as {:?}",
        read_string(&m, &mut a, p6)
    );

    let status = a.exit(&m, 0);
    println!(
        "A exited with {}; frames in use: {}",
        status,
        m.frames.in_use()
    );
}
