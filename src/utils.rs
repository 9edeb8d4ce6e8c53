//! Helper functions for size and address arithmetic.
//! These don't particularly belong to any concrete module of the allocator.

/// It aligns `to_be_aligned` using `alignment`, which must be a power of two.
///
/// This is used to round payload sizes up to [`crate::ALIGNMENT`] and region
/// sizes up to the provider granularity. Callers that handle user supplied
/// sizes should use [`checked_align`] instead since this can overflow.
#[inline]
pub const fn align(to_be_aligned: usize, alignment: usize) -> usize {
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around when
/// `to_be_aligned` is too close to `usize::MAX`.
#[inline]
pub const fn checked_align(to_be_aligned: usize, alignment: usize) -> Option<usize> {
    match to_be_aligned.checked_add(alignment - 1) {
        Some(sum) => Some(sum & !(alignment - 1)),
        None => None,
    }
}

/// Tells whether `addr` is a multiple of `alignment`.
#[inline]
pub const fn is_aligned(addr: usize, alignment: usize) -> bool {
    addr & (alignment - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_to_sixteen() {
        let alignments = vec![(1..17, 16), (17..33, 32), (33..49, 48), (49..65, 64)];

        for (sizes, expected) in alignments {
            for size in sizes {
                assert_eq!(expected, align(size, 16));
            }
        }
    }

    #[test]
    fn align_region_size() {
        // 64 KiB granularity, the default region size.
        let alignments = vec![(1..65537, 65536), (65537..131073, 131072)];

        for (sizes, expected) in alignments {
            for size in sizes.step_by(97) {
                assert_eq!(expected, align(size, 65536))
            }
        }
    }

    #[test]
    fn aligned_values_are_unchanged() {
        for size in [0, 16, 32, 4096, 65536] {
            assert_eq!(size, align(size, 16));
        }
    }

    #[test]
    fn checked_align_detects_overflow() {
        assert_eq!(checked_align(usize::MAX - 3, 16), None);
        assert_eq!(checked_align(100, 16), Some(112));
    }

    #[test]
    fn alignment_check() {
        assert!(is_aligned(0x1000, 16));
        assert!(is_aligned(0x1010, 16));
        assert!(!is_aligned(0x1008, 16));
    }
}
