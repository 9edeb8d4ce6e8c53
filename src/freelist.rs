use std::ptr::NonNull;

use static_assertions::const_assert;

use crate::{
    MIN_BLOCK_SIZE,
    block::{Block, BlockState, header_to_payload},
    list::{Link, List, Node},
};

/// Node of the free list. It is written at the start of the payload of the
/// free block it points to.
type FreeNode = Node<NonNull<Node<Block>>>;

const_assert!(std::mem::size_of::<FreeNode>() <= MIN_BLOCK_SIZE);

/// Linked list to keep track of free [`Block`].
///
/// This list only stores pointers to the actual blocks. The reason behind
/// this is that we don't actually need to store any additional content for
/// blocks which are free. We just need to keep track of them.
///
/// Inside of the allocator, this will look something like this:
///
/// ```text
///                                     Free List
///
///                     Next free block                Next free block
///                +----------------------+  +--------------------------------------+
///                |                      |  |                                      |
/// +--------------|----------------------|--|----+      +--------------------------|-------------------+
/// |        | +---|--+    +-------+    +-|--|-+  |      |        | +-------+    +--|---+    +-------+  |
/// | Region | | Free | -> | Block | -> | Free |  | ---> | Region | | Block | -> | Free | -> | Block |  |
/// |        | +------+    +-------+    +------+  |      |        | +-------+    +------+    +-------+  |
/// +---------------------------------------------+      +----------------------------------------------+
///
/// ```
///
/// We use the payload of every free block as storage for its node. As the
/// block is free, the payload is not used by anyone, and [`MIN_BLOCK_SIZE`]
/// guarantees the node fits:
///
/// ```text
/// +------------------------+ <--------+
/// |       Node<Block>      |          |-------> Block Header
/// +------------------------+ <--------+
/// |   Node<NonNull<...>>   |          |-------> Free list node
/// +------------------------+ <--------+
/// |      Free Payload      |
/// |        (unused)        |
/// +------------------------+
/// ```
///
/// Because the node of a block is always at its payload address, removing a
/// block is O(1). The list is kept in the same order as the address-order
/// chain, so a first-fit search through it picks exactly the block a scan of
/// the whole chain would pick.
pub(crate) struct FreeList {
    /// Nodes of the list (Pointers to <Node<Block>>)
    items: List<NonNull<Node<Block>>>,
}

impl FreeList {
    /// Creates a new empty List
    pub const fn new() -> Self {
        Self { items: List::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Marks `block` as free and links it into the list, right after the
    /// closest free block that precedes it in the address-order chain.
    ///
    /// **SAFETY**: `block` must be a live header that is not in the list, its
    /// payload must be at least [`MIN_BLOCK_SIZE`] bytes, and every free block
    /// before it in the chain must already be in the list.
    pub unsafe fn insert_free_block(&mut self, mut block: NonNull<Node<Block>>) {
        unsafe {
            block.as_mut().data.state = BlockState::Free;

            let mut previous = block.as_ref().prev;
            while let Some(candidate) = previous {
                if candidate.as_ref().data.is_free() {
                    break;
                }
                previous = candidate.as_ref().prev;
            }

            let after: Link<FreeNode> = previous.map(node_of);

            self.items.insert_after(after, block, header_to_payload(block));
        }
    }

    /// Removes `block` from the FreeList. Its state is left to the caller.
    ///
    /// **SAFETY**: `block` must currently be in the list.
    pub unsafe fn remove_free_block(&mut self, block: NonNull<Node<Block>>) {
        unsafe {
            debug_assert!(node_of(block).as_ref().data == block);

            self.items.remove(node_of(block));
        }
    }

    /// Returns the first block of the list that can hold `needed` bytes.
    ///
    /// This is the first-fit algorithm: ties are broken by list order, not
    /// by how close the size is.
    pub fn find_free_block(&self, needed: usize) -> Link<Node<Block>> {
        self.blocks()
            .find(|&block| unsafe { block.as_ref().data.size >= needed })
    }

    /// Blocks of the list, in list order.
    pub fn blocks(&self) -> impl Iterator<Item = NonNull<Node<Block>>> + '_ {
        self.items.iter().copied()
    }

    /// Index of `block` in the list, if it is there.
    pub fn position_of(&self, block: NonNull<Node<Block>>) -> Option<usize> {
        self.blocks().position(|candidate| candidate == block)
    }
}

/// The free list node of a free block, stored at its payload.
#[inline]
fn node_of(block: NonNull<Node<Block>>) -> NonNull<FreeNode> {
    header_to_payload(block).cast()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::BLOCK_HEADER_SIZE, region::Region};

    const BLOCKS: usize = 4;
    const SIZE: usize = 64;

    #[repr(C, align(16))]
    struct Arena([u8; BLOCKS * (BLOCK_HEADER_SIZE + SIZE)]);

    /// Lays out `BLOCKS` in-use blocks back to back, chained in address order.
    fn chain(arena: &mut Arena) -> (List<Block>, Vec<NonNull<Node<Block>>>) {
        let mut chain = List::new();
        let base = NonNull::new(arena.0.as_mut_ptr()).unwrap();
        let region = NonNull::<Node<Region>>::dangling();

        let blocks = (0..BLOCKS)
            .map(|i| unsafe {
                let addr = base.add(i * (BLOCK_HEADER_SIZE + SIZE));
                chain.append(Block::new(SIZE, region, BlockState::InUse), addr)
            })
            .collect();

        (chain, blocks)
    }

    #[test]
    fn new_free_list_is_empty() {
        let list = FreeList::new();

        assert_eq!(list.len(), 0);
        assert!(list.blocks().next().is_none());
        assert!(list.find_free_block(1).is_none());
    }

    #[test]
    fn insertion_follows_chain_order() {
        let mut arena = Arena([0; BLOCKS * (BLOCK_HEADER_SIZE + SIZE)]);
        let (_chain, blocks) = chain(&mut arena);
        let mut list = FreeList::new();

        unsafe {
            list.insert_free_block(blocks[2]);
            list.insert_free_block(blocks[0]);
            list.insert_free_block(blocks[3]);
        }

        assert_eq!(list.blocks().collect::<Vec<_>>(), vec![blocks[0], blocks[2], blocks[3]]);
        assert_eq!(list.position_of(blocks[2]), Some(1));
        assert_eq!(list.position_of(blocks[1]), None);
        unsafe {
            assert!(blocks[0].as_ref().data.is_free());
            assert!(!blocks[1].as_ref().data.is_free());
        }
    }

    #[test]
    fn removal_unlinks_only_that_block() {
        let mut arena = Arena([0; BLOCKS * (BLOCK_HEADER_SIZE + SIZE)]);
        let (_chain, blocks) = chain(&mut arena);
        let mut list = FreeList::new();

        unsafe {
            for block in &blocks {
                list.insert_free_block(*block);
            }
            list.remove_free_block(blocks[1]);
        }

        assert_eq!(list.len(), BLOCKS - 1);
        assert_eq!(list.position_of(blocks[1]), None);
        assert_eq!(list.position_of(blocks[2]), Some(1));
    }

    #[test]
    fn first_fit_takes_first_large_enough_block() {
        let mut arena = Arena([0; BLOCKS * (BLOCK_HEADER_SIZE + SIZE)]);
        let (_chain, mut blocks) = chain(&mut arena);
        let mut list = FreeList::new();

        unsafe {
            // Shrink the first block so only the later ones fit.
            blocks[0].as_mut().data.size = 32;
            list.insert_free_block(blocks[0]);
            list.insert_free_block(blocks[1]);
            list.insert_free_block(blocks[3]);
        }

        assert_eq!(list.find_free_block(32), Some(blocks[0]));
        assert_eq!(list.find_free_block(48), Some(blocks[1]));
        assert_eq!(list.find_free_block(SIZE + 1), None);
    }
}
