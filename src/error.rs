//! Error types returned by the allocator.
//!
//! Every error is local to the call that produced it. There is no global
//! error state and the allocator never retries on its own.

use std::fmt;

use crate::block::BlockState;

/// Why an allocation request could not be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// A request of zero bytes. [`crate::MemAlloc::allocate`] turns this
    /// into a null result, it is not a failure of the allocator.
    ZeroSize,

    /// The request is so large that aligning it, or adding the metadata
    /// overhead, overflows `usize`.
    SizeOverflow { requested: usize },

    /// The operating system refused to commit a new region.
    ResourceExhaustion { requested: usize },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::ZeroSize => write!(f, "zero sized allocation request"),
            AllocError::SizeOverflow { requested } => {
                write!(f, "allocation of {requested} bytes overflows the address space")
            }
            AllocError::ResourceExhaustion { requested } => {
                write!(f, "operating system refused a region of {requested} bytes")
            }
        }
    }
}

impl std::error::Error for AllocError {}

/// Why a pointer handed back to [`crate::MemAlloc::release`] was rejected.
/// In both cases the heap is left exactly as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseError {
    /// The block owning `addr` is already free.
    DoubleFree { addr: usize },

    /// `addr` does not resolve to a block header carrying the sentinel.
    InvalidPointer { addr: usize },
}

impl fmt::Display for ReleaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseError::DoubleFree { addr } => write!(f, "double free of {addr:#x}"),
            ReleaseError::InvalidPointer { addr } => {
                write!(f, "{addr:#x} was not returned by this allocator")
            }
        }
    }
}

impl std::error::Error for ReleaseError {}

/// A broken heap invariant found by [`crate::MemAlloc::validate`].
/// Addresses are block header addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityError {
    /// The block header does not carry the sentinel.
    BadSentinel { header: usize },

    /// The block size is below the minimum or not a multiple of the alignment.
    BadSize { header: usize, size: usize },

    /// The block does not start where its predecessor in the same region ends.
    NotContiguous { header: usize, expected: usize },

    /// The blocks of a region don't add up to the region size.
    RegionNotTiled { region: usize, covered: usize, size: usize },

    /// Two neighbouring blocks of the same region are both free.
    UncoalescedPair { first: usize, second: usize },

    /// The block state disagrees with its membership in the free list.
    FreeListMismatch { header: usize, state: BlockState },

    /// The free list is not in address-order chain order, or lists a block twice.
    FreeListOrder { header: usize },

    /// A back link doesn't point at the previous node.
    BrokenLink { header: usize },
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityError::BadSentinel { header } => {
                write!(f, "block {header:#x} has a corrupted sentinel")
            }
            IntegrityError::BadSize { header, size } => {
                write!(f, "block {header:#x} has an invalid size of {size} bytes")
            }
            IntegrityError::NotContiguous { header, expected } => {
                write!(f, "block {header:#x} should start at {expected:#x}")
            }
            IntegrityError::RegionNotTiled { region, covered, size } => {
                write!(f, "region {region:#x} covers {covered} of {size} bytes")
            }
            IntegrityError::UncoalescedPair { first, second } => {
                write!(f, "adjacent blocks {first:#x} and {second:#x} are both free")
            }
            IntegrityError::FreeListMismatch { header, state } => {
                write!(f, "block {header:#x} is {state} but free list membership disagrees")
            }
            IntegrityError::FreeListOrder { header } => {
                write!(f, "free list entry for block {header:#x} is out of order")
            }
            IntegrityError::BrokenLink { header } => {
                write!(f, "block {header:#x} has a broken back link")
            }
        }
    }
}

impl std::error::Error for IntegrityError {}
