use std::ptr::NonNull;

use log::{debug, warn};

use crate::{ALIGNMENT, error::AllocError, utils::checked_align};

/// Smallest region we ever ask the operating system for. Windows hands out
/// memory in 64 KiB units anyway, so we use the same size everywhere.
pub const REGION_GRANULARITY: usize = 64 * 1024;

/// Largest power of two a `usize` can hold.
const MAX_GRANULARITY: usize = 1 << (usize::BITS - 1);

/// A contiguous span of raw memory handed out by a [`RegionProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Start of the span.
    pub addr: NonNull<u8>,
    /// Length of the span in bytes.
    pub len: usize,
}

/// Source of the large memory regions the allocator carves blocks from.
///
/// # Safety
///
/// Implementors must return spans that are readable and writable, aligned to
/// at least [`ALIGNMENT`], at least as long as requested, not overlapping any
/// other span they returned, and that stay valid for as long as the provider
/// lives. [`Span::len`] must be a multiple of [`ALIGNMENT`].
pub unsafe trait RegionProvider {
    /// Unit every region size is rounded up to.
    fn granularity(&self) -> usize;

    /// Obtains a region of at least `min_bytes` bytes.
    fn acquire_region(&mut self, min_bytes: usize) -> Result<Span, AllocError>;
}

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this, has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a Pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the unit in which the platform commits memory, in bytes.
    unsafe fn allocation_granularity() -> usize;
}

/// The operating system, seen as a [`RegionProvider`].
///
/// Regions are obtained with `mmap` on unix and `VirtualAlloc` on windows and
/// are never returned, they stay mapped until the process exits.
#[derive(Debug)]
pub struct Kernel {
    /// Every region is a multiple of this size.
    granularity: usize,
    /// Number of regions handed out so far.
    regions: usize,
    /// Total bytes handed out so far.
    bytes: usize,
}

impl Kernel {
    /// Creates a provider using the platform allocation granularity,
    /// but never less than [`REGION_GRANULARITY`].
    pub fn new() -> Self {
        let platform = unsafe { Self::allocation_granularity() };

        Self::with_granularity(platform.max(REGION_GRANULARITY))
    }

    /// Creates a provider whose regions are multiples of `granularity`,
    /// rounded up to a power of two and to at least [`ALIGNMENT`]. Values
    /// past the largest power of two are clamped to it.
    pub fn with_granularity(granularity: usize) -> Self {
        let granularity = granularity
            .max(ALIGNMENT)
            .checked_next_power_of_two()
            .unwrap_or(MAX_GRANULARITY);

        Self {
            granularity,
            regions: 0,
            bytes: 0,
        }
    }

    /// Number of regions obtained from the operating system.
    #[inline]
    pub fn regions(&self) -> usize {
        self.regions
    }

    /// Total bytes obtained from the operating system.
    #[inline]
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RegionProvider for Kernel {
    #[inline]
    fn granularity(&self) -> usize {
        self.granularity
    }

    fn acquire_region(&mut self, min_bytes: usize) -> Result<Span, AllocError> {
        let len = checked_align(min_bytes.max(1), self.granularity)
            .ok_or(AllocError::SizeOverflow { requested: min_bytes })?;

        let Some(addr) = (unsafe { Self::request_memory(len) }) else {
            warn!("operating system refused a region of {len} bytes");
            return Err(AllocError::ResourceExhaustion { requested: len });
        };

        self.regions += 1;
        self.bytes += len;

        debug!("acquired region #{} of {len} bytes at {addr:p}", self.regions);

        Ok(Span { addr, len })
    }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            let addr = unsafe { mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) };

            if addr == libc::MAP_FAILED {
                return None;
            }

            NonNull::new(addr.cast::<u8>())
        }

        unsafe fn allocation_granularity() -> usize {
            match unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) } {
                size if size > 0 => size as usize,
                _ => super::REGION_GRANULARITY,
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn allocation_granularity() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwAllocationGranularity as usize
            }
        }
    }
}
