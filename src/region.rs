use std::{mem, ptr::NonNull};

use static_assertions::const_assert;

use crate::{
    ALIGNMENT,
    block::BLOCK_HEADER_SIZE,
    list::Node,
    utils::align,
};

/// This is the overhead size introduced by the [`Region`] header in bytes.
/// The header is represented as a [`Node`]. See [`crate::list::List`] for more
/// detail. Rounded up so the first block header is aligned.
pub(crate) const REGION_HEADER_SIZE: usize = align(mem::size_of::<Node<Region>>(), ALIGNMENT);

const_assert!(REGION_HEADER_SIZE % ALIGNMENT == 0);

/// This struct contains the memory regions specific metadata. However,
/// as every other header, this is usually represented as a [`Node<Region>`]
/// so that would be the complete region data.
///
/// Regions come from a [`crate::RegionProvider`] and are never returned. We
/// cannot assume regions are adjacent, so every block remembers the region
/// it was carved from and blocks of different regions are never merged.
///
/// ```text
/// +-----------------------------------------------+      +-----------------------------------------------+
/// |        | +-------+    +-------+    +-------+  |      |        | +-------+    +-------+    +-------+  |
/// | Region | | Block | -> | Block | -> | Block |  | ---> | Region | | Block | -> | Block | -> | Block |  |
/// |        | +-------+    +-------+    +-------+  |      |        | +-------+    +-------+    +-------+  |
/// +-----------------------------------------------+      +-----------------------------------------------+
/// ```
///
/// Unlike the diagram suggests, the block links are one single chain that
/// runs through all regions in the order they were acquired.
#[repr(C)]
pub(crate) struct Region {
    /// Size of the whole span, headers included.
    pub size: usize,
}

impl Region {
    /// Bytes of a span of `size` bytes left for the first block's content.
    #[inline]
    pub const fn usable(size: usize) -> usize {
        size - REGION_HEADER_SIZE - BLOCK_HEADER_SIZE
    }
}

/// Address where the region starts, which is the region header itself.
#[inline]
pub(crate) fn start_of(region: NonNull<Node<Region>>) -> usize {
    region.as_ptr() as usize
}

/// Address one past the last byte of the region.
#[inline]
pub(crate) fn end_of(region: NonNull<Node<Region>>) -> usize {
    start_of(region) + unsafe { region.as_ref().data.size }
}

/// Address of the first block header of the region.
#[inline]
pub(crate) fn first_block_addr(region: NonNull<Node<Region>>) -> NonNull<u8> {
    unsafe { region.cast::<u8>().add(REGION_HEADER_SIZE) }
}

/// Tells whether `addr` may be the payload of a block carved out of `region`,
/// that is, whether a header placed right before it would lie in the region.
#[inline]
pub(crate) fn may_hold_payload(region: NonNull<Node<Region>>, addr: usize) -> bool {
    let lowest = start_of(region) + REGION_HEADER_SIZE + BLOCK_HEADER_SIZE;

    addr >= lowest && addr < end_of(region)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(16))]
    struct Span([u8; 1024]);

    fn region_in(span: &mut Span) -> NonNull<Node<Region>> {
        let region = NonNull::new(span.0.as_mut_ptr()).unwrap().cast::<Node<Region>>();
        unsafe {
            region.as_ptr().write(Node {
                next: None,
                prev: None,
                data: Region { size: 1024 },
            });
        }
        region
    }

    #[test]
    fn usable_bytes_exclude_headers() {
        assert_eq!(
            Region::usable(65536),
            65536 - REGION_HEADER_SIZE - BLOCK_HEADER_SIZE
        );
        assert_eq!(Region::usable(65536) % ALIGNMENT, 0);
    }

    #[test]
    fn bounds() {
        let mut span = Span([0; 1024]);
        let region = region_in(&mut span);
        let start = start_of(region);

        assert_eq!(end_of(region), start + 1024);
        assert_eq!(first_block_addr(region).as_ptr() as usize, start + REGION_HEADER_SIZE);
    }

    #[test]
    fn payload_must_leave_room_for_headers() {
        let mut span = Span([0; 1024]);
        let region = region_in(&mut span);
        let first_payload = start_of(region) + REGION_HEADER_SIZE + BLOCK_HEADER_SIZE;

        assert!(may_hold_payload(region, first_payload));
        assert!(may_hold_payload(region, end_of(region) - ALIGNMENT));
        assert!(!may_hold_payload(region, first_payload - ALIGNMENT));
        assert!(!may_hold_payload(region, end_of(region)));
        assert!(!may_hold_payload(region, start_of(region)));
    }
}
