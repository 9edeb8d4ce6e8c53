use std::ptr::NonNull;

use log::trace;

use crate::{
    ALIGNMENT, MIN_BLOCK_SIZE,
    block::{
        BLOCK_HEADER_SIZE, Block, BlockState, end_of, header_to_payload, payload_to_header,
    },
    error::{AllocError, IntegrityError, ReleaseError},
    freelist::FreeList,
    inspect::{BlockInfo, HeapStats},
    kernel::RegionProvider,
    list::{List, Node},
    region::{self, REGION_HEADER_SIZE, Region},
    utils::{checked_align, is_aligned},
};

/// Smallest remainder worth turning into a block of its own when splitting.
pub(crate) const MIN_SPLIT_REMAINDER: usize = BLOCK_HEADER_SIZE + MIN_BLOCK_SIZE;

/// The internal data structure of the allocator. This is where blocks are
/// searched, split and merged. Memory itself comes from a [`RegionProvider`]
/// that is passed in whenever we need more of it.
///
/// Three intrusive lists are threaded through the managed memory:
///
/// - `regions`: every span obtained from the provider, in acquisition order.
/// - `blocks`: every block, free or not. Inside a region blocks follow
///   ascending addresses, and regions follow each other in acquisition order.
/// - `free_list`: only the free blocks, in the same relative order.
pub(crate) struct Heap {
    regions: List<Region>,
    blocks: List<Block>,
    free_list: FreeList,
}

/// Rounds a request up to the alignment and to [`MIN_BLOCK_SIZE`].
pub(crate) fn needed_size(requested: usize) -> Result<usize, AllocError> {
    if requested == 0 {
        return Err(AllocError::ZeroSize);
    }

    let aligned = checked_align(requested, ALIGNMENT)
        .ok_or(AllocError::SizeOverflow { requested })?;

    Ok(aligned.max(MIN_BLOCK_SIZE))
}

impl Heap {
    pub const fn new() -> Self {
        Self {
            regions: List::new(),
            blocks: List::new(),
            free_list: FreeList::new(),
        }
    }

    /// Serves a request of `requested` bytes, reusing a free block when one
    /// is large enough and asking `provider` for a new region otherwise.
    pub fn allocate<P: RegionProvider>(
        &mut self,
        provider: &mut P,
        requested: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let needed = needed_size(requested)?;

        let block = match self.free_list.find_free_block(needed) {
            Some(block) => {
                trace!("reusing block at {:p} for {needed} bytes", block);
                block
            }
            None => self.grow(provider, needed)?,
        };

        unsafe { self.take(block, needed) };

        Ok(header_to_payload(block))
    }

    /// Obtains a new region large enough for `needed` bytes and turns it
    /// into a single free block appended to the chain.
    fn grow<P: RegionProvider>(
        &mut self,
        provider: &mut P,
        needed: usize,
    ) -> Result<NonNull<Node<Block>>, AllocError> {
        let min_bytes = needed
            .checked_add(REGION_HEADER_SIZE + BLOCK_HEADER_SIZE)
            .ok_or(AllocError::SizeOverflow { requested: needed })?;

        let span = provider.acquire_region(min_bytes)?;
        debug_assert!(span.len >= min_bytes && span.len % ALIGNMENT == 0);
        debug_assert!(is_aligned(span.addr.as_ptr() as usize, ALIGNMENT));

        unsafe {
            let region = self.regions.append(Region { size: span.len }, span.addr);

            let block = self.blocks.append(
                Block::new(Region::usable(span.len), region, BlockState::Free),
                region::first_block_addr(region),
            );

            self.free_list.insert_free_block(block);

            Ok(block)
        }
    }

    /// Hands `block` out for `needed` bytes. If what is left over can hold a
    /// header plus [`MIN_BLOCK_SIZE`], it is split off as a new free block
    /// placed right after `block` in the chain.
    ///
    /// **SAFETY**: `block` must be a free block of this heap with at least
    /// `needed` bytes.
    unsafe fn take(&mut self, mut block: NonNull<Node<Block>>, needed: usize) {
        unsafe {
            self.free_list.remove_free_block(block);

            let header = &mut block.as_mut().data;
            header.state = BlockState::InUse;

            let remainder = header.size - needed;
            if remainder < MIN_SPLIT_REMAINDER {
                return;
            }

            header.size = needed;
            let region = header.region;

            let split_addr = header_to_payload(block).add(needed);
            let split = self.blocks.insert_after(
                Some(block),
                Block::new(remainder - BLOCK_HEADER_SIZE, region, BlockState::Free),
                split_addr,
            );

            trace!(
                "split {:p} into {needed} bytes and a free block of {} bytes",
                block,
                remainder - BLOCK_HEADER_SIZE
            );

            self.free_list.insert_free_block(split);
        }
    }

    /// Gives the block owning `payload` back to the heap, merging it with
    /// its free neighbours.
    ///
    /// **SAFETY**: `payload` must not be in use by anyone once released.
    pub unsafe fn release(&mut self, payload: NonNull<u8>) -> Result<(), ReleaseError> {
        let mut block = self.locate(payload)?;

        unsafe {
            if block.as_ref().data.is_free() {
                trace!("double free of {:p}", payload);
                return Err(ReleaseError::DoubleFree {
                    addr: payload.as_ptr() as usize,
                });
            }

            block.as_mut().data.state = BlockState::Free;

            while self.merge_with_next(block) {}
            while self.merge_with_prev(&mut block) {}

            self.free_list.insert_free_block(block);
        }

        Ok(())
    }

    /// Tries to merge `node` with the next block of the chain. This can be
    /// performed if that block is free and starts right where `node` ends.
    ///
    /// **SAFETY**: `node` must be a free block that is not in the free list.
    unsafe fn merge_with_next(&mut self, mut node: NonNull<Node<Block>>) -> bool {
        unsafe {
            let Some(next) = node.as_ref().next else {
                return false;
            };

            if !Self::adjacent_free(node, next) {
                return false;
            }

            // The next block is in the free list, it has to leave before its
            // header becomes part of our payload.
            self.free_list.remove_free_block(next);

            node.as_mut().data.size += BLOCK_HEADER_SIZE + next.as_ref().data.size;
            self.retire(next);

            trace!("merged {:p} into its predecessor {:p}", next, node);

            true
        }
    }

    /// Tries to merge `node` with the previous block of the chain. On success
    /// `node` is updated to point to that previous block, which survives.
    ///
    /// **SAFETY**: `node` must be a free block that is not in the free list.
    unsafe fn merge_with_prev(&mut self, node: &mut NonNull<Node<Block>>) -> bool {
        unsafe {
            let Some(mut prev) = node.as_ref().prev else {
                return false;
            };

            if !Self::adjacent_free(prev, *node) {
                return false;
            }

            self.free_list.remove_free_block(prev);

            prev.as_mut().data.size += BLOCK_HEADER_SIZE + node.as_ref().data.size;
            self.retire(*node);

            trace!("merged {:p} into its predecessor {:p}", *node, prev);

            *node = prev;

            true
        }
    }

    /// Tells whether `second` is free, comes from the same region as `first`
    /// and its header starts exactly where the content of `first` ends.
    #[inline]
    fn adjacent_free(first: NonNull<Node<Block>>, second: NonNull<Node<Block>>) -> bool {
        let (first_block, second_block) = unsafe { (&first.as_ref().data, &second.as_ref().data) };

        first_block.is_free()
            && second_block.is_free()
            && first_block.region == second_block.region
            && end_of(first) == second.as_ptr() as usize
    }

    /// Removes a merged block from the chain. Its header stays in place,
    /// free and with its sentinel, inside the payload of the survivor, so
    /// releasing a stale pointer to it again reads as a double free.
    unsafe fn retire(&mut self, node: NonNull<Node<Block>>) {
        unsafe {
            debug_assert!(node.as_ref().data.is_free());

            self.blocks.remove(node);
        }
    }

    /// Finds the header owning `payload`. The pointer has to be aligned and
    /// fall inside one of our regions before we dare to read the header in
    /// front of it, then the header has to carry the sentinel.
    fn locate(&self, payload: NonNull<u8>) -> Result<NonNull<Node<Block>>, ReleaseError> {
        let addr = payload.as_ptr() as usize;
        let invalid = ReleaseError::InvalidPointer { addr };

        if !is_aligned(addr, ALIGNMENT) {
            return Err(invalid);
        }

        let region = self
            .regions
            .nodes()
            .find(|&candidate| region::may_hold_payload(candidate, addr))
            .ok_or(invalid)?;

        let header = unsafe { payload_to_header(payload) };
        let block = unsafe { header.as_ref() };

        if !block.data.has_valid_magic() || block.data.region != region {
            return Err(invalid);
        }

        Ok(header)
    }

    /// Usable size of the live allocation at `payload`.
    pub fn block_size_of(&self, payload: NonNull<u8>) -> Option<usize> {
        let header = self.locate(payload).ok()?;
        let block = unsafe { &header.as_ref().data };

        (block.state == BlockState::InUse).then_some(block.size)
    }

    /// Describes every block of the chain, in chain order.
    pub fn dump(&self) -> Vec<BlockInfo> {
        let regions: Vec<_> = self.regions.nodes().collect();
        let free: Vec<_> = self.free_list.blocks().collect();

        self.blocks
            .nodes()
            .map(|node| {
                let block = unsafe { &node.as_ref().data };

                BlockInfo {
                    region: regions
                        .iter()
                        .position(|region| *region == block.region)
                        .unwrap_or(usize::MAX),
                    header: node.as_ptr() as usize,
                    payload: header_to_payload(node).as_ptr() as usize,
                    size: block.size,
                    state: block.state,
                    free_position: free.iter().position(|candidate| *candidate == node),
                }
            })
            .collect()
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            regions: self.regions.len(),
            region_bytes: self.regions.iter().map(|region| region.size).sum(),
            blocks: self.blocks.len(),
            ..HeapStats::default()
        };

        for block in &self.blocks {
            match block.state {
                BlockState::Free => {
                    stats.free_blocks += 1;
                    stats.free_bytes += block.size;
                    stats.largest_free = stats.largest_free.max(block.size);
                }
                BlockState::InUse => stats.in_use_bytes += block.size,
            }
        }

        stats
    }

    /// Walks the chain and the free list checking every structural invariant.
    pub fn validate(&self) -> Result<(), IntegrityError> {
        let chain: Vec<_> = self.blocks.nodes().collect();

        let mut previous: Option<NonNull<Node<Block>>> = None;
        let mut current_region: Option<NonNull<Node<Region>>> = None;
        let mut covered = 0;

        for &node in &chain {
            let header = node.as_ptr() as usize;
            let (block, prev_link) = unsafe { (&node.as_ref().data, node.as_ref().prev) };

            if !block.has_valid_magic() {
                return Err(IntegrityError::BadSentinel { header });
            }

            if block.size < MIN_BLOCK_SIZE || block.size % ALIGNMENT != 0 {
                return Err(IntegrityError::BadSize { header, size: block.size });
            }

            if prev_link != previous {
                return Err(IntegrityError::BrokenLink { header });
            }

            if current_region == Some(block.region) {
                // Same region as the previous block, so it must follow it.
                let prev = previous.ok_or(IntegrityError::BrokenLink { header })?;
                let expected = end_of(prev);

                if header != expected {
                    return Err(IntegrityError::NotContiguous { header, expected });
                }

                if unsafe { prev.as_ref().data.is_free() } && block.is_free() {
                    return Err(IntegrityError::UncoalescedPair {
                        first: prev.as_ptr() as usize,
                        second: header,
                    });
                }
            } else {
                if let Some(region) = current_region {
                    Self::check_tiling(region, covered)?;
                }

                let expected = region::first_block_addr(block.region).as_ptr() as usize;
                if header != expected {
                    return Err(IntegrityError::NotContiguous { header, expected });
                }

                current_region = Some(block.region);
                covered = 0;
            }

            covered += BLOCK_HEADER_SIZE + block.size;
            previous = Some(node);
        }

        if let Some(region) = current_region {
            Self::check_tiling(region, covered)?;
        }

        self.validate_free_list(&chain)
    }

    fn check_tiling(region: NonNull<Node<Region>>, covered: usize) -> Result<(), IntegrityError> {
        let size = unsafe { region.as_ref().data.size };

        if covered + REGION_HEADER_SIZE != size {
            return Err(IntegrityError::RegionNotTiled {
                region: region.as_ptr() as usize,
                covered: covered + REGION_HEADER_SIZE,
                size,
            });
        }

        Ok(())
    }

    /// The free list must hold every free block of the chain exactly once,
    /// nothing else, and in chain order.
    fn validate_free_list(&self, chain: &[NonNull<Node<Block>>]) -> Result<(), IntegrityError> {
        let mut last_index: Option<usize> = None;

        for node in self.free_list.blocks() {
            let header = node.as_ptr() as usize;
            let index = chain
                .iter()
                .position(|candidate| *candidate == node)
                .ok_or(IntegrityError::FreeListOrder { header })?;

            let block = unsafe { &node.as_ref().data };
            if !block.is_free() {
                return Err(IntegrityError::FreeListMismatch { header, state: block.state });
            }

            if last_index.is_some_and(|last| index <= last) {
                return Err(IntegrityError::FreeListOrder { header });
            }
            last_index = Some(index);
        }

        let free_in_chain = chain
            .iter()
            .filter(|&&node| unsafe { node.as_ref().data.is_free() })
            .count();

        if free_in_chain != self.free_list.len() {
            let missing = chain
                .iter()
                .copied()
                .find(|&node| {
                    let free = unsafe { node.as_ref().data.is_free() };
                    free && self.free_list.position_of(node).is_none()
                })
                .or_else(|| self.free_list.blocks().next());

            let header = missing.map_or(0, |node| node.as_ptr() as usize);

            return Err(IntegrityError::FreeListMismatch {
                header,
                state: BlockState::Free,
            });
        }

        Ok(())
    }
}
