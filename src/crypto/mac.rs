//! HMAC-SHA-256 with constant-time verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::MacScheme;

/// Size of a SHA-256 HMAC tag in bytes.
pub const MAC_SIZE: usize = 32;

type HmacImpl = Hmac<Sha256>;

/// HMAC-SHA-256 implementation of [`MacScheme`].
#[derive(Clone, Copy, Default)]
pub struct HmacSha256;

impl MacScheme for HmacSha256 {
    fn sum(&self, key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
        let mut mac = HmacImpl::new_from_slice(key).expect("HMAC accepts keys of any length");
        for part in parts {
            mac.update(part);
        }
        mac.finalize().into_bytes().to_vec()
    }

    fn equal(&self, a: &[u8], b: &[u8]) -> bool {
        a.ct_eq(b).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_is_deterministic() {
        let mac = HmacSha256;
        let a = mac.sum(b"key", &[b"part1", b"part2"]);
        let b = mac.sum(b"key", &[b"part1", b"part2"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), MAC_SIZE);
    }

    #[test]
    fn test_sum_over_parts_equals_concatenation() {
        let mac = HmacSha256;
        let split = mac.sum(b"key", &[b"ab", b"cd"]);
        let joined = mac.sum(b"key", &[b"abcd"]);
        assert_eq!(split, joined);
    }

    #[test]
    fn test_key_separates_tags() {
        let mac = HmacSha256;
        let a = mac.sum(b"key-a", &[b"data"]);
        let b = mac.sum(b"key-b", &[b"data"]);
        assert!(!mac.equal(&a, &b));
    }

    #[test]
    fn test_equal() {
        let mac = HmacSha256;
        let tag = mac.sum(b"key", &[b"data"]);
        assert!(mac.equal(&tag, &tag.clone()));
        assert!(!mac.equal(&tag, &tag[..MAC_SIZE - 1]));
        assert!(!mac.equal(&tag, &[0u8; MAC_SIZE]));
    }
}
