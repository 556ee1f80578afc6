// SPDX-License-Identifier: MIT OR Apache-2.0

//! HKDF with the protocol's labelled expansion on top.
//!
//! `HKDF-Expand-Label(secret, label, context, length)` expands with the serialized
//! `HkdfLabel` as info:
//!
//! ```text
//! struct {
//!     uint16 length;
//!     opaque label<7..255> = "mls10 " + label;
//!     opaque context<0..2^32-1>;
//! } HkdfLabel;
//! ```
//!
//! `Derive-Secret(secret, label, context)` is `HKDF-Expand-Label` over the hash of the
//! context, producing one hash-length of output.
use hkdf::Hkdf;
use sha2::{Sha256, Sha512};

use crate::crypto::hash::digest;
use crate::crypto::{CipherSuite, Secret};
use crate::error::{Error, Result};
use crate::tls;

const LABEL_PREFIX: &str = "mls10 ";

/// `HKDF-Extract(salt, ikm)` under the suite's hash.
pub fn hkdf_extract(suite: CipherSuite, salt: &[u8], ikm: &[u8]) -> Secret {
    let salt = (!salt.is_empty()).then_some(salt);
    match suite.hash_len() {
        32 => Secret::from_bytes(Hkdf::<Sha256>::extract(salt, ikm).0.to_vec()),
        _ => Secret::from_bytes(Hkdf::<Sha512>::extract(salt, ikm).0.to_vec()),
    }
}

/// `HKDF-Expand(prk, info, length)` under the suite's hash.
pub fn hkdf_expand(suite: CipherSuite, prk: &Secret, info: &[u8], length: usize) -> Result<Secret> {
    let mut okm = vec![0u8; length];
    let expanded = match suite.hash_len() {
        32 => Hkdf::<Sha256>::from_prk(prk.as_bytes())
            .map_err(|_| ())
            .and_then(|hk| hk.expand(info, &mut okm).map_err(|_| ())),
        _ => Hkdf::<Sha512>::from_prk(prk.as_bytes())
            .map_err(|_| ())
            .and_then(|hk| hk.expand(info, &mut okm).map_err(|_| ())),
    };
    expanded.map_err(|()| Error::InvalidParameter("hkdf arguments out of range"))?;
    Ok(Secret::from_bytes(okm))
}

/// `HKDF-Expand-Label(secret, label, context, length)`.
pub fn hkdf_expand_label(
    suite: CipherSuite,
    secret: &Secret,
    label: &str,
    context: &[u8],
    length: usize,
) -> Result<Secret> {
    let mut info = Vec::new();
    tls::write_uint(&mut info, 2, length as u64)?;
    let mut full_label = String::with_capacity(LABEL_PREFIX.len() + label.len());
    full_label.push_str(LABEL_PREFIX);
    full_label.push_str(label);
    tls::encode_opaque(&mut info, 1, full_label.as_bytes())?;
    tls::encode_opaque(&mut info, 4, context)?;
    hkdf_expand(suite, secret, &info, length)
}

/// `Derive-Secret(secret, label, context)`: labelled expansion over the hashed context.
pub fn derive_secret(
    suite: CipherSuite,
    secret: &Secret,
    label: &str,
    context: &[u8],
) -> Result<Secret> {
    let hashed = digest(suite, &[context]);
    hkdf_expand_label(suite, secret, label, &hashed, suite.hash_len())
}

/// A zero-filled byte string, used as the initial init secret and the Add update secret.
pub fn zero_bytes(len: usize) -> Vec<u8> {
    vec![0; len]
}

#[cfg(test)]
mod tests {
    use super::{derive_secret, hkdf_expand_label, hkdf_extract};
    use crate::crypto::{CipherSuite, Secret};

    // Known answers for the path-secret step. The chain is pure SHA-256 HKDF, so the
    // values hold for every SHA-256 suite.
    #[test]
    fn path_step_known_answers() {
        let suite = CipherSuite::X25519Sha256Aes128Gcm;
        let step = |secret: &Secret| hkdf_expand_label(suite, secret, "path", b"", 32).unwrap();

        let secret_b = Secret::from_slice(&hex::decode("04050607").unwrap());
        assert_eq!(
            step(&secret_b).as_bytes(),
            hex::decode("e8de418a07b497953174c71f5ad83d63d90bc68582a9a340c6023fba536455f4")
                .unwrap()
        );

        let secret_c = Secret::from_slice(&hex::decode("08090a0b").unwrap());
        assert_eq!(
            step(&secret_c).as_bytes(),
            hex::decode("1dbd153c8f2ca387cfc3104b39b0954bbf287bfeb94d2a5bd92e05ff510c2244")
                .unwrap()
        );

        let secret_d = Secret::from_slice(&hex::decode("0c0d0e0f").unwrap());
        assert_eq!(
            step(&step(&secret_d)).as_bytes(),
            hex::decode("ca118da171367f30e5c03e2e651558f55c57fba6319101ccb56f8a34953b25f2")
                .unwrap()
        );
    }

    #[test]
    fn labels_separate_outputs() {
        let suite = CipherSuite::P256Sha256Aes128Gcm;
        let secret = hkdf_extract(suite, b"salt", b"input key material");
        let a = hkdf_expand_label(suite, &secret, "app", b"", 32).unwrap();
        let b = hkdf_expand_label(suite, &secret, "init", b"", 32).unwrap();
        assert_ne!(a, b);

        // Same label at different lengths also separates, the length is part of the info.
        let short = hkdf_expand_label(suite, &secret, "app", b"", 16).unwrap();
        assert_ne!(&a.as_bytes()[..16], short.as_bytes());
    }

    #[test]
    fn derive_secret_is_deterministic() {
        let suite = CipherSuite::P521Sha512Aes256Gcm;
        let secret = hkdf_extract(suite, b"", b"ikm");
        let a = derive_secret(suite, &secret, "confirm", b"group context").unwrap();
        let b = derive_secret(suite, &secret, "confirm", b"group context").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
