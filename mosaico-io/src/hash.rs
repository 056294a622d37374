//! Content hashing for tile payloads

use xxhash_rust::xxh3::xxh3_64;

/// xxh3-64 of a payload file, as 16 lowercase hex digits.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:016x}", xxh3_64(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_stable() {
        let a = content_hash(b"c0000_r0000");
        assert_eq!(a.len(), 16);
        assert_eq!(a, content_hash(b"c0000_r0000"));
        assert_ne!(a, content_hash(b"c0000_r0001"));
    }
}
