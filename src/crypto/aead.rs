// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authenticated encryption with associated data, keyed by cipher suite.
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use chacha20poly1305::ChaCha20Poly1305;

use crate::crypto::CipherSuite;
use crate::error::{Error, Result};

/// Seals `plaintext` under the suite's AEAD. The ciphertext carries the authentication tag
/// at its tail.
pub fn aead_seal(
    suite: CipherSuite,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    check_sizes(suite, key, nonce)?;
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    let ciphertext = match suite {
        CipherSuite::P256Sha256Aes128Gcm | CipherSuite::X25519Sha256Aes128Gcm => {
            Aes128Gcm::new_from_slice(key)
                .map_err(|_| Error::InvalidParameter("aead key size"))?
                .encrypt(Nonce::from_slice(nonce), payload)
        }
        CipherSuite::P521Sha512Aes256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|_| Error::InvalidParameter("aead key size"))?
            .encrypt(Nonce::from_slice(nonce), payload),
        CipherSuite::X25519Sha256ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| Error::InvalidParameter("aead key size"))?
            .encrypt(Nonce::from_slice(nonce), payload),
    };
    ciphertext.map_err(|_| Error::Protocol("aead encryption failed"))
}

/// Opens a sealed ciphertext. Authentication failure reports as a protocol error.
pub fn aead_open(
    suite: CipherSuite,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    check_sizes(suite, key, nonce)?;
    let payload = Payload {
        msg: ciphertext,
        aad,
    };
    let plaintext = match suite {
        CipherSuite::P256Sha256Aes128Gcm | CipherSuite::X25519Sha256Aes128Gcm => {
            Aes128Gcm::new_from_slice(key)
                .map_err(|_| Error::InvalidParameter("aead key size"))?
                .decrypt(Nonce::from_slice(nonce), payload)
        }
        CipherSuite::P521Sha512Aes256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|_| Error::InvalidParameter("aead key size"))?
            .decrypt(Nonce::from_slice(nonce), payload),
        CipherSuite::X25519Sha256ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| Error::InvalidParameter("aead key size"))?
            .decrypt(Nonce::from_slice(nonce), payload),
    };
    plaintext.map_err(|_| Error::Protocol("aead authentication failed"))
}

fn check_sizes(suite: CipherSuite, key: &[u8], nonce: &[u8]) -> Result<()> {
    if key.len() != suite.aead_key_len() {
        return Err(Error::InvalidParameter("aead key size"));
    }
    if nonce.len() != suite.aead_nonce_len() {
        return Err(Error::InvalidParameter("aead nonce size"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{aead_open, aead_seal};
    use crate::crypto::{CipherSuite, Rng};

    const SUITES: [CipherSuite; 4] = [
        CipherSuite::P256Sha256Aes128Gcm,
        CipherSuite::X25519Sha256Aes128Gcm,
        CipherSuite::X25519Sha256ChaCha20Poly1305,
        CipherSuite::P521Sha512Aes256Gcm,
    ];

    #[test]
    fn seal_and_open_all_suites() {
        let rng = Rng::from_seed([1; 32]);
        for suite in SUITES {
            let key = rng.random_vec(suite.aead_key_len()).unwrap();
            let nonce = rng.random_vec(suite.aead_nonce_len()).unwrap();

            let sealed = aead_seal(suite, &key, &nonce, b"aad", b"application data").unwrap();
            let opened = aead_open(suite, &key, &nonce, b"aad", &sealed).unwrap();
            assert_eq!(opened, b"application data");
        }
    }

    #[test]
    fn tamper_detection() {
        let rng = Rng::from_seed([2; 32]);
        let suite = CipherSuite::X25519Sha256Aes128Gcm;
        let key = rng.random_vec(suite.aead_key_len()).unwrap();
        let nonce = rng.random_vec(suite.aead_nonce_len()).unwrap();

        let mut sealed = aead_seal(suite, &key, &nonce, b"aad", b"payload").unwrap();
        sealed[0] ^= 0x01;
        assert!(aead_open(suite, &key, &nonce, b"aad", &sealed).is_err());

        sealed[0] ^= 0x01;
        assert!(aead_open(suite, &key, &nonce, b"other aad", &sealed).is_err());
        assert!(aead_open(suite, &key, &nonce, b"aad", &sealed).is_ok());
    }
}
