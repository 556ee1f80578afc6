// SPDX-License-Identifier: MIT OR Apache-2.0

//! Suite-selected SHA2 digest and HMAC.
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::crypto::CipherSuite;

/// Hashes the concatenation of `parts` with the suite's digest.
pub fn digest(suite: CipherSuite, parts: &[&[u8]]) -> Vec<u8> {
    match suite.hash_len() {
        32 => {
            let mut hasher = Sha256::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }
        _ => {
            let mut hasher = Sha512::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }
    }
}

/// HMAC under the suite's digest.
pub fn hmac_sign(suite: CipherSuite, key: &[u8], message: &[u8]) -> Vec<u8> {
    match suite.hash_len() {
        32 => {
            let mut mac =
                Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key size");
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
        _ => {
            let mut mac =
                Hmac::<Sha512>::new_from_slice(key).expect("hmac accepts any key size");
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// Constant-time check of an HMAC tag.
pub fn hmac_verify(suite: CipherSuite, key: &[u8], message: &[u8], tag: &[u8]) -> bool {
    let expected = hmac_sign(suite, key, message);
    bool::from(expected.ct_eq(tag))
}

#[cfg(test)]
mod tests {
    use super::{digest, hmac_sign, hmac_verify};
    use crate::crypto::CipherSuite;

    #[test]
    fn digest_sizes_follow_suite() {
        let d256 = digest(CipherSuite::X25519Sha256Aes128Gcm, &[b"abc"]);
        assert_eq!(d256.len(), 32);
        // NIST test vector for SHA-256("abc").
        assert_eq!(
            d256,
            hex::decode("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
                .unwrap()
        );

        let d512 = digest(CipherSuite::P521Sha512Aes256Gcm, &[b"ab", b"c"]);
        assert_eq!(d512.len(), 64);
    }

    #[test]
    fn hmac_round_trip() {
        let suite = CipherSuite::P256Sha256Aes128Gcm;
        let tag = hmac_sign(suite, b"key", b"message");
        assert!(hmac_verify(suite, b"key", b"message", &tag));
        assert!(!hmac_verify(suite, b"key", b"other message", &tag));
        assert!(!hmac_verify(suite, b"other key", b"message", &tag));
    }
}
