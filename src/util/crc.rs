//! Masked CRC32 checksums for record framing.
//!
//! Checksums are stored masked so that a CRC computed over data which itself
//! embeds CRCs does not degenerate.

use crc32fast::Hasher;

const MASK_DELTA: u32 = 0xa282_ead8;

/// Compute CRC32 checksum of the given data.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Compute CRC32 checksum of multiple data slices as if concatenated.
pub fn crc32_multi(slices: &[&[u8]]) -> u32 {
    let mut hasher = Hasher::new();
    for slice in slices {
        hasher.update(slice);
    }
    hasher.finalize()
}

/// Mask a CRC value for storage.
pub fn mask_crc(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Unmask a stored CRC value.
pub fn unmask_crc(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_empty() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn test_crc32_multi() {
        let data = b"hello world";
        assert_eq!(crc32(data), crc32_multi(&[b"hello ", b"world"]));
    }

    #[test]
    fn test_mask_unmask() {
        let original = crc32(b"foo");
        let masked = mask_crc(original);

        assert_ne!(masked, original);
        assert_ne!(mask_crc(masked), masked);
        assert_eq!(unmask_crc(masked), original);
        assert_eq!(unmask_crc(unmask_crc(mask_crc(mask_crc(original)))), original);
    }

    #[test]
    fn test_mask_matches_rotate_add() {
        let crc = 0x1234_5678u32;
        let expected = ((crc >> 15) | (crc << 17)).wrapping_add(0xa282ead8);
        assert_eq!(mask_crc(crc), expected);
    }
}
