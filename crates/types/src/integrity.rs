//! Chunk integrity checks
//!
//! CRC32C checksums for read-back verification of written chunks. CRC32C is
//! hardware-accelerated on x86 (SSE4.2) and ARM, so checksumming a chunk is
//! cheap relative to the bulk transfer that produced it.

use crc32fast::Hasher;

/// Compute the CRC32C checksum of a chunk payload
#[inline]
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Verify a chunk payload against an expected checksum
#[inline]
pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_roundtrip() {
        let data = vec![0x01, 0x02, 0x03, 0x04, 0x05];
        let checksum = compute_checksum(&data);
        assert!(verify_checksum(&data, checksum));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let data = vec![0x01, 0x02, 0x03, 0x04, 0x05];
        let checksum = compute_checksum(&data);

        let mut corrupted = data.clone();
        corrupted[2] = 0xFF;
        assert!(!verify_checksum(&corrupted, checksum));
    }

    #[test]
    fn test_checksum_empty_data() {
        let checksum = compute_checksum(&[]);
        assert!(verify_checksum(&[], checksum));
    }

    #[test]
    fn test_checksum_differs_by_content() {
        assert_ne!(compute_checksum(b"chunk-a"), compute_checksum(b"chunk-b"));
    }
}
