//! Keyed hashing primitives for the message codec.
//!
//! HMAC-SHA512 over a key derived from the shared secret, plus the
//! constant-time comparison used on tag verification.

use crate::error::CodecError;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

type HmacSha512 = Hmac<Sha512>;

/// Size of the derived key, the chain accumulators and every tag.
pub const HASH_SIZE: usize = 512 / 8;

/// A derived key, accumulator or tag.
pub type Digest64 = [u8; HASH_SIZE];

/// Derive the codec key from the shared secret.
pub fn derive_key(secret: &str) -> Digest64 {
    let mut key = [0u8; HASH_SIZE];
    key.copy_from_slice(&Sha512::digest(secret.as_bytes()));
    key
}

/// HMAC-SHA512 over the concatenation of `parts`.
pub fn hmac(key: &Digest64, parts: &[&[u8]]) -> Result<Digest64, CodecError> {
    let mut mac = <HmacSha512 as Mac>::new_from_slice(key)
        .map_err(|_| CodecError::Configuration("invalid HMAC key".to_string()))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Compare two buffers without short-circuiting on the first differing byte.
///
/// Buffers of different lengths compare unequal; lengths are not secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Fill `buf` from the operating system CSPRNG.
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        assert_eq!(derive_key("s3cr3t"), derive_key("s3cr3t"));
        assert_ne!(derive_key("s3cr3t"), derive_key("s3cr3T"));
    }

    #[test]
    fn test_hmac_parts_concatenate() {
        let key = derive_key("s3cr3t");
        let whole = hmac(&key, &[b"helloworld".as_slice()]).unwrap();
        let split = hmac(&key, &[b"hello".as_slice(), b"world".as_slice()]).unwrap();
        assert_eq!(whole, split);

        let other = hmac(&derive_key("other"), &[b"helloworld".as_slice()]).unwrap();
        assert_ne!(whole, other);
    }

    #[test]
    fn test_constant_time_eq_equal() {
        let a = [0x5au8; HASH_SIZE];
        let b = [0x5au8; HASH_SIZE];
        assert!(constant_time_eq(&a, &b));
        assert!(constant_time_eq(&[], &[]));
    }

    #[test]
    fn test_constant_time_eq_every_position() {
        let a = derive_key("s3cr3t");
        for i in 0..HASH_SIZE {
            let mut b = a;
            b[i] ^= 0x01;
            assert!(!constant_time_eq(&a, &b), "difference at byte {} missed", i);
        }
    }

    #[test]
    fn test_constant_time_eq_length_mismatch() {
        let a = [0u8; HASH_SIZE];
        assert!(!constant_time_eq(&a, &a[..HASH_SIZE - 1]));
    }

    #[test]
    fn test_fill_random() {
        let mut buf1 = [0u8; HASH_SIZE];
        let mut buf2 = [0u8; HASH_SIZE];
        fill_random(&mut buf1);
        fill_random(&mut buf2);
        assert_ne!(buf1, buf2);
    }
}
