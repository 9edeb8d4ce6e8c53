//! A first-fit free-list allocator.
//!
//! Memory is obtained from the operating system in large regions (see
//! [`Kernel`]) and carved into blocks. Every block is preceded by a header:
//!
//! ```text
//! +-------------------------------+
//! | Header   | Actual memory block |
//! +-------------------------------+
//! ```
//!
//! The returned pointer is at the start of the memory block, and walking back
//! [`BLOCK_HEADER_SIZE`] bytes always gets us to its header.
//!
//! Allocation takes the first free block that is large enough, splitting off
//! whatever is left if it can hold a block of its own. Releasing a block
//! merges it with its free neighbours, so no two adjacent blocks are ever
//! free at the same time.
//!
//! ```
//! use blockalloc::MemAlloc;
//!
//! let mut allocator = MemAlloc::new();
//!
//! let block = allocator.allocate(512).unwrap();
//! assert_eq!(block.as_ptr() as usize % 16, 0);
//!
//! unsafe { allocator.release(block.as_ptr()).unwrap() };
//! ```
//!
//! The allocator is single threaded: [`MemAlloc`] is neither `Send` nor
//! `Sync`, and regions are never given back to the operating system.

mod block;
mod error;
mod freelist;
mod heap;
mod inspect;
mod kernel;
mod list;
mod region;
mod utils;

use std::ptr::NonNull;

use log::trace;

pub use block::{BLOCK_HEADER_SIZE, BLOCK_MAGIC, BlockState};
pub use error::{AllocError, IntegrityError, ReleaseError};
pub use inspect::{BlockInfo, HeapDump, HeapStats};
pub use kernel::{Kernel, REGION_GRANULARITY, RegionProvider, Span};
pub use utils::align;

use heap::Heap;

/// Every payload address and every block size is a multiple of this.
pub const ALIGNMENT: usize = 16;

/// Smallest block we ever hand out or keep. Requests below it are rounded up,
/// which guarantees a free block can always hold its free list node.
pub const MIN_BLOCK_SIZE: usize = 32;

/// The allocator. It owns the block chain and the free list, and gets its
/// memory from a [`RegionProvider`], the operating system by default.
///
/// Independent instances manage independent heaps.
pub struct MemAlloc<P: RegionProvider = Kernel> {
    heap: Heap,
    provider: P,
}

impl MemAlloc<Kernel> {
    /// Creates an empty allocator backed by the operating system. No memory
    /// is requested until the first allocation.
    pub fn new() -> Self {
        Self::with_provider(Kernel::new())
    }
}

impl Default for MemAlloc<Kernel> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: RegionProvider> MemAlloc<P> {
    /// Creates an empty allocator that takes its regions from `provider`.
    pub fn with_provider(provider: P) -> Self {
        Self {
            heap: Heap::new(),
            provider,
        }
    }

    /// Allocates `size` bytes and returns a pointer to them, aligned to
    /// [`ALIGNMENT`].
    ///
    /// Returns `None` for zero sized requests and when no more memory can be
    /// obtained. See [`MemAlloc::try_allocate`] to tell both apart.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.try_allocate(size).ok()
    }

    /// Same as [`MemAlloc::allocate`] but reports why nothing was allocated.
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let payload = self.heap.allocate(&mut self.provider, size)?;
        trace!("allocated {size} bytes at {payload:p}");

        Ok(payload)
    }

    /// Gives the memory at `ptr` back to the allocator. A null `ptr` is
    /// ignored.
    ///
    /// Releasing an already free block returns [`ReleaseError::DoubleFree`]
    /// and a pointer that does not lead to a block header returns
    /// [`ReleaseError::InvalidPointer`]. In both cases nothing changes.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or have been returned by this allocator, and must
    /// not be used after it is released. The header checks catch gross
    /// misuse only: a stale pointer whose address was handed out again,
    /// or user data that happens to look like a header, can't be told
    /// apart from a valid pointer.
    pub unsafe fn release(&mut self, ptr: *mut u8) -> Result<(), ReleaseError> {
        let Some(payload) = NonNull::new(ptr) else {
            return Ok(());
        };

        unsafe { self.heap.release(payload) }
    }

    /// Describes every block, free or not, in address-order chain order.
    pub fn dump_state(&self) -> Vec<BlockInfo> {
        self.heap.dump()
    }

    pub fn stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Checks every structural invariant of the heap.
    pub fn validate(&self) -> Result<(), IntegrityError> {
        self.heap.validate()
    }

    /// Usable size of the live allocation at `ptr`, which can be larger than
    /// what was requested. `None` if `ptr` is not a live allocation.
    pub fn block_size_of(&self, ptr: *const u8) -> Option<usize> {
        self.heap.block_size_of(NonNull::new(ptr.cast_mut())?)
    }

    /// The region provider backing this allocator.
    pub fn provider(&self) -> &P {
        &self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_alloc() {
        let mut allocator = MemAlloc::new();

        unsafe {
            // Allocated space for unsigned 32 bit integer.
            let block = allocator.allocate(4).unwrap().cast::<u32>();
            *block.as_ptr() = 23;
            assert_eq!(23, *block.as_ptr());
        }
    }

    #[test]
    fn zero_size_is_null() {
        let mut allocator = MemAlloc::new();

        assert!(allocator.allocate(0).is_none());
        assert_eq!(allocator.try_allocate(0), Err(AllocError::ZeroSize));
        assert_eq!(allocator.provider().regions(), 0);
    }

    #[test]
    fn null_release_is_a_no_op() {
        let mut allocator = MemAlloc::new();

        assert_eq!(unsafe { allocator.release(std::ptr::null_mut()) }, Ok(()));
        assert!(allocator.dump_state().is_empty());
    }

    #[test]
    fn space_for_free_block_is_used() {
        let mut allocator = MemAlloc::new();

        let first_block = allocator.allocate(4).unwrap();
        let _ = allocator.allocate(8).unwrap();
        let _ = allocator.allocate(8).unwrap();

        unsafe { allocator.release(first_block.as_ptr()).unwrap() };

        let second_block = allocator.allocate(4).unwrap();

        assert_eq!(first_block, second_block);
    }

    #[test]
    fn memory_is_usable_end_to_end() {
        let mut allocator = MemAlloc::new();
        let sizes = [1, 17, 100, 4096, 70_000];

        let blocks: Vec<_> = sizes
            .iter()
            .map(|&size| (allocator.allocate(size).unwrap(), size))
            .collect();

        for (index, (block, size)) in blocks.iter().enumerate() {
            unsafe { std::ptr::write_bytes(block.as_ptr(), index as u8, *size) };
        }

        for (index, (block, size)) in blocks.iter().enumerate() {
            let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr(), *size) };
            assert!(bytes.iter().all(|byte| *byte == index as u8));
            assert!(allocator.block_size_of(block.as_ptr()).unwrap() >= *size);
        }

        allocator.validate().unwrap();
    }

    #[test]
    fn stats_follow_allocations() {
        let mut allocator = MemAlloc::new();

        let a = allocator.allocate(100).unwrap();
        let stats = allocator.stats();

        assert_eq!(stats.regions, 1);
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.in_use_bytes, 112);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.largest_free, stats.free_bytes);

        unsafe { allocator.release(a.as_ptr()).unwrap() };
        let stats = allocator.stats();

        assert_eq!(stats.blocks, 1);
        assert_eq!(stats.in_use_bytes, 0);
        assert_eq!(
            stats.free_bytes,
            stats.region_bytes - region::REGION_HEADER_SIZE - BLOCK_HEADER_SIZE
        );
    }
}
