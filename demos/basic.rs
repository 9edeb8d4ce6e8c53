use blockalloc::MemAlloc;

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    let mut allocator = MemAlloc::new();

    let sizes = [8, 8, 16];
    let mut addrs = Vec::new();

    for size in sizes {
        let addr = allocator.allocate(size).map_or(std::ptr::null_mut(), |ptr| ptr.as_ptr());
        log_alloc(addr, size);
        addrs.push(addr);
    }

    for addr in addrs {
        if let Err(err) = unsafe { allocator.release(addr) } {
            eprintln!("release failed: {err}");
        }
    }

    println!("{}", allocator.stats());
}
