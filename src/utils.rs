//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.


/// It aligns `to_be_aligned` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two. This is used to place allocations at the offsets
/// the caller asked for inside of a chunk.
#[inline]
pub fn align_up(to_be_aligned: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

/// Rounds `size` up to a multiple of `granularity`, which doesn't need to be a
/// power of two.
#[inline]
pub fn round_up(size: u64, granularity: u64) -> u64 {
    if granularity.is_power_of_two() {
        align_up(size, granularity)
    } else {
        size.div_ceil(granularity) * granularity
    }
}

/// Index of the most significant set bit. `value` can't be zero.
#[inline]
pub fn bit_scan_msb(value: u64) -> u32 {
    debug_assert!(value != 0);
    u64::BITS - 1 - value.leading_zeros()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_pointer_size() {
        let aligments = vec![(1..8, 8), (9..16, 16), (17..24, 24), (25..32, 32)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align_up(size, 8));
            }
        }
    }

    #[test]
    fn align_keeps_aligned_values() {
        for alignment in [1, 2, 64, 256, 4096] {
            assert_eq!(0, align_up(0, alignment));
            assert_eq!(alignment * 3, align_up(alignment * 3, alignment));
        }
    }

    #[test]
    fn round_up_to_granularity() {
        assert_eq!(12, round_up(10, 4));
        assert_eq!(12, round_up(12, 4));
        assert_eq!(12, round_up(7, 6));
        assert_eq!(7, round_up(7, 1));
    }

    #[test]
    fn msb() {
        assert_eq!(0, bit_scan_msb(1));
        assert_eq!(8, bit_scan_msb(256));
        assert_eq!(8, bit_scan_msb(511));
        assert_eq!(63, bit_scan_msb(u64::MAX));
    }
}
