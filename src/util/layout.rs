//! Alignment helpers for device offsets.

/// Align `value` up to `align`, which must be a power of two.
#[inline]
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Whether `value` is a multiple of `align` (a power of two).
#[inline]
pub const fn is_aligned(value: u64, align: u64) -> bool {
    value & (align - 1) == 0
}

/// Round `value` up to a multiple of `multiple`, which need not be a power of two.
#[inline]
pub const fn round_up_to_multiple(value: u64, multiple: u64) -> u64 {
    value.div_ceil(multiple) * multiple
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 16), 272);
    }

    #[test]
    fn test_is_aligned() {
        assert!(is_aligned(512, 256));
        assert!(!is_aligned(520, 256));
    }

    #[test]
    fn test_round_up_to_multiple() {
        assert_eq!(round_up_to_multiple(10, 3), 12);
        assert_eq!(round_up_to_multiple(12, 3), 12);
    }
}
