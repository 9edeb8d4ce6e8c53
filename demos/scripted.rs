//! Scripted walk through the allocator: reuse, splitting, coalescing and
//! double free detection, printing the heap after every step.
//!
//! Set `BLOCKALLOC_LOG=trace` to see what the allocator does internally.

use std::ptr::NonNull;

use blockalloc::{HeapDump, MemAlloc};
use log::{LevelFilter, Metadata, Record, info, warn};

struct SimpleLogger;

static LOGGER: SimpleLogger = SimpleLogger;

impl log::Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("[{}] {}", record.level(), record.args())
        }
    }

    fn flush(&self) {}
}

fn init_logger() {
    let level = std::env::var("BLOCKALLOC_LOG")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::Info);

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

fn dump(allocator: &MemAlloc, step: &str) {
    println!("--- {step}");
    print!("{}", HeapDump(&allocator.dump_state()));
    println!("{}\n", allocator.stats());
}

fn allocate(allocator: &mut MemAlloc, size: usize) -> NonNull<u8> {
    match allocator.allocate(size) {
        Some(ptr) => {
            info!("allocate({size}) = {ptr:p}");
            ptr
        }
        None => {
            eprintln!("allocate({size}) failed");
            std::process::exit(1);
        }
    }
}

fn release(allocator: &mut MemAlloc, ptr: NonNull<u8>) {
    match unsafe { allocator.release(ptr.as_ptr()) } {
        Ok(()) => info!("release({ptr:p})"),
        Err(err) => warn!("release({ptr:p}) rejected: {err}"),
    }
}

fn main() {
    init_logger();

    let mut allocator = MemAlloc::new();

    // First fit reuse and splitting.
    let first = allocate(&mut allocator, 512);
    dump(&allocator, "allocate 512");

    release(&mut allocator, first);
    let reused = allocate(&mut allocator, 256);
    dump(&allocator, "release it and allocate 256");

    // Three neighbours merged back into one block.
    let a = allocate(&mut allocator, 100);
    let b = allocate(&mut allocator, 200);
    let c = allocate(&mut allocator, 300);
    dump(&allocator, "allocate A, B and C");

    release(&mut allocator, b);
    release(&mut allocator, a);
    release(&mut allocator, c);
    dump(&allocator, "release B, A and C");

    // Double free is reported and changes nothing.
    release(&mut allocator, reused);
    release(&mut allocator, reused);
    dump(&allocator, "release the 256 block twice");

    // A request larger than a region gets a region of its own.
    let big = allocate(&mut allocator, 200_000);
    dump(&allocator, "allocate 200000");
    release(&mut allocator, big);

    match allocator.validate() {
        Ok(()) => info!("heap is consistent"),
        Err(err) => warn!("heap is corrupted: {err}"),
    }

    // Zero sized requests are not an error, they just give nothing back.
    assert!(allocator.allocate(0).is_none());
}
