use std::{fmt, mem, ptr::NonNull};

use static_assertions::const_assert;

use crate::{
    ALIGNMENT, MIN_BLOCK_SIZE,
    list::Node,
    region::Region,
    utils::align,
};

/// Sentinel written into every block header when the block is created. It is
/// only a sanity check that a pointer handed back to us addresses a header,
/// it catches gross misuse and nothing more.
pub const BLOCK_MAGIC: u32 = 144_553_566;

/// Header size of a block. We need to add the overhead introduced by our
/// [`Node`] structure since we always use our `Block` as a node of the
/// address-order chain. Rounded up so payloads stay 16 byte aligned.
pub const BLOCK_HEADER_SIZE: usize = align(mem::size_of::<Node<Block>>(), ALIGNMENT);

const_assert!(BLOCK_HEADER_SIZE % ALIGNMENT == 0);
const_assert!(mem::align_of::<Node<Block>>() <= ALIGNMENT);

/// Whether a block is available for reuse or handed out to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockState {
    Free,
    InUse,
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockState::Free => write!(f, "free"),
            BlockState::InUse => write!(f, "in use"),
        }
    }
}

/// This is the structure of a block. The fields of the block are its metadata,
/// content is placed after this header.
///
/// The following diagram represents this structure including the [`Node`]
/// links, `next` being the following block in address order:
///
/// ```text
/// +---------------------+ <------+
/// |        next         |        |
/// +---------------------+        |
/// |        prev         |        |
/// +---------------------+        |
/// |        size         |        | -> Header (BLOCK_HEADER_SIZE)
/// +---------------------+        |
/// |       region        |        |
/// +---------------------+        |
/// |   magic  |  state   |        |
/// +---------------------+ <------+
/// |       Content       |        |
/// |         ...         |        | -> Addressable content (`size` bytes)
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// `size` never includes the header. Both the header address and the payload
/// address are multiples of [`ALIGNMENT`].
#[repr(C)]
pub(crate) struct Block {
    /// Usable size of the block.
    pub size: usize,
    /// Region which the block belongs to.
    pub region: NonNull<Node<Region>>,
    /// Always [`BLOCK_MAGIC`] for a live header.
    pub magic: u32,
    pub state: BlockState,
}

impl Block {
    pub fn new(size: usize, region: NonNull<Node<Region>>, state: BlockState) -> Self {
        debug_assert!(size >= MIN_BLOCK_SIZE && size % ALIGNMENT == 0);

        Self {
            size,
            region,
            magic: BLOCK_MAGIC,
            state,
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }

    #[inline]
    pub fn has_valid_magic(&self) -> bool {
        self.magic == BLOCK_MAGIC
    }
}

/// Returns the address of the content of `header`. This and
/// [`payload_to_header`] are the only places where a header and its payload
/// are converted into each other.
#[inline]
pub(crate) fn header_to_payload(header: NonNull<Node<Block>>) -> NonNull<u8> {
    unsafe { header.cast::<u8>().add(BLOCK_HEADER_SIZE) }
}

/// Inverse of [`header_to_payload`].
///
/// **SAFETY**: `payload` must be at least [`BLOCK_HEADER_SIZE`] bytes past the
/// start of a region.
#[inline]
pub(crate) unsafe fn payload_to_header(payload: NonNull<u8>) -> NonNull<Node<Block>> {
    unsafe { payload.sub(BLOCK_HEADER_SIZE).cast() }
}

/// Address right after the content of `header`, which is where the header
/// of a contiguous neighbour would start.
#[inline]
pub(crate) fn end_of(header: NonNull<Node<Block>>) -> usize {
    let size = unsafe { header.as_ref().data.size };
    header_to_payload(header).as_ptr() as usize + size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_keeps_payload_aligned() {
        assert_eq!(BLOCK_HEADER_SIZE % ALIGNMENT, 0);
        assert!(BLOCK_HEADER_SIZE >= mem::size_of::<Node<Block>>());
    }

    #[test]
    fn header_payload_round_trip() {
        #[repr(C, align(16))]
        struct Buffer([u8; 256]);

        let mut buffer = Buffer([0; 256]);
        let header = NonNull::new(buffer.0.as_mut_ptr()).unwrap().cast::<Node<Block>>();

        let payload = header_to_payload(header);
        assert_eq!(payload.as_ptr() as usize - header.as_ptr() as usize, BLOCK_HEADER_SIZE);
        assert_eq!(payload.as_ptr() as usize % ALIGNMENT, 0);
        assert_eq!(unsafe { payload_to_header(payload) }, header);
    }

    #[test]
    fn new_block_carries_sentinel() {
        let region = NonNull::<Node<Region>>::dangling();
        let block = Block::new(64, region, BlockState::InUse);

        assert!(block.has_valid_magic());
        assert!(!block.is_free());
        assert_eq!(block.size, 64);
    }

    #[test]
    fn state_display() {
        assert_eq!(BlockState::Free.to_string(), "free");
        assert_eq!(BlockState::InUse.to_string(), "in use");
    }
}
