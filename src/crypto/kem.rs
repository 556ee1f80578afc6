// SPDX-License-Identifier: MIT OR Apache-2.0

//! Diffie-Hellman key pairs over the suites' groups (X25519, P-256, P-521).
//!
//! Key pairs are always derived from a byte secret: the caller hands in entropy (or a path
//! secret run through the `"node"` label) and derivation is deterministic from there. Public
//! keys use the raw 32-byte u-coordinate for X25519 and uncompressed SEC1 points for the
//! NIST curves.
use p256::elliptic_curve::ops::Reduce;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};

use crate::crypto::hash::digest;
use crate::crypto::hkdf::hkdf_expand_label;
use crate::crypto::{CipherSuite, Rng, Secret};
use crate::error::{Error, Result};
use crate::tls::{self, DecodeWith, Encode, Reader};

#[derive(Copy, Clone, PartialEq, Eq)]
enum DhGroup {
    X25519,
    P256,
    P521,
}

fn group(suite: CipherSuite) -> DhGroup {
    match suite {
        CipherSuite::X25519Sha256Aes128Gcm | CipherSuite::X25519Sha256ChaCha20Poly1305 => {
            DhGroup::X25519
        }
        CipherSuite::P256Sha256Aes128Gcm => DhGroup::P256,
        CipherSuite::P521Sha512Aes256Gcm => DhGroup::P521,
    }
}

/// DH public key, stored in its wire encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HpkePublicKey {
    suite: CipherSuite,
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
}

impl HpkePublicKey {
    pub(crate) fn from_bytes(suite: CipherSuite, data: Vec<u8>) -> Result<Self> {
        if data.len() != suite.dh_public_key_len() {
            return Err(Error::InvalidParameter("dh public key size"));
        }
        Ok(Self { suite, data })
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Encode for HpkePublicKey {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        tls::encode_opaque(buf, 2, &self.data)
    }
}

impl DecodeWith<CipherSuite> for HpkePublicKey {
    fn decode_with(r: &mut Reader<'_>, suite: CipherSuite) -> Result<Self> {
        let data = tls::decode_opaque(r, 2)?;
        if data.len() != suite.dh_public_key_len() {
            return Err(Error::TlsSyntax("dh public key size"));
        }
        Ok(Self { suite, data })
    }
}

/// DH private key with its cached public half.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HpkePrivateKey {
    suite: CipherSuite,
    secret: Secret,
    public: HpkePublicKey,
}

impl HpkePrivateKey {
    /// Derives a key pair from a byte secret. Deterministic: equal inputs give equal pairs.
    pub fn derive(suite: CipherSuite, ikm: &[u8]) -> Result<Self> {
        let seed = digest(suite, &[ikm]);
        let (secret, public) = match group(suite) {
            DhGroup::X25519 => {
                let scalar: [u8; 32] = seed.try_into().expect("sha256 output size");
                let sk = x25519_dalek::StaticSecret::from(scalar);
                let pk = x25519_dalek::PublicKey::from(&sk);
                (
                    Secret::from_slice(sk.as_bytes()),
                    pk.as_bytes().to_vec(),
                )
            }
            DhGroup::P256 => {
                let bytes = p256::FieldBytes::clone_from_slice(&seed);
                let scalar =
                    <p256::Scalar as Reduce<p256::elliptic_curve::bigint::U256>>::reduce_bytes(
                        &bytes,
                    );
                let scalar = Option::<p256::NonZeroScalar>::from(p256::NonZeroScalar::new(scalar))
                    .ok_or(Error::InvalidParameter("derived zero scalar"))?;
                let sk = p256::SecretKey::from(scalar);
                let pk = sk.public_key().to_encoded_point(false);
                (
                    Secret::from_slice(sk.to_bytes().as_slice()),
                    pk.as_bytes().to_vec(),
                )
            }
            DhGroup::P521 => {
                // 64 hash octets land below the P-521 group order once left-padded to the
                // 66-octet field size.
                let mut padded = [0u8; 66];
                padded[2..].copy_from_slice(&seed);
                let bytes = p521::FieldBytes::clone_from_slice(&padded);
                let sk = p521::SecretKey::from_bytes(&bytes)
                    .map_err(|_| Error::InvalidParameter("derived zero scalar"))?;
                let pk = sk.public_key().to_encoded_point(false);
                (
                    Secret::from_slice(sk.to_bytes().as_slice()),
                    pk.as_bytes().to_vec(),
                )
            }
        };
        Ok(Self {
            suite,
            secret,
            public: HpkePublicKey::from_bytes(suite, public)?,
        })
    }

    /// Derives the key pair belonging to a path secret, via the `"node"` label.
    pub fn node_derive(suite: CipherSuite, path_secret: &Secret) -> Result<Self> {
        let node_secret =
            hkdf_expand_label(suite, path_secret, "node", b"", suite.hash_len())?;
        Self::derive(suite, node_secret.as_bytes())
    }

    /// Fresh key pair from the caller's randomness source.
    pub fn generate(suite: CipherSuite, rng: &Rng) -> Result<Self> {
        let ikm = rng.random_vec(suite.hash_len())?;
        Self::derive(suite, &ikm)
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn public_key(&self) -> &HpkePublicKey {
        &self.public
    }

    /// Raw DH shared secret with a remote public key.
    pub(crate) fn shared_secret(&self, remote: &HpkePublicKey) -> Result<Secret> {
        if remote.suite != self.suite {
            return Err(Error::InvalidParameter("cipher suite mismatch"));
        }
        match group(self.suite) {
            DhGroup::X25519 => {
                let scalar: [u8; 32] = self
                    .secret
                    .as_bytes()
                    .try_into()
                    .map_err(|_| Error::InvalidParameter("dh private key size"))?;
                let point: [u8; 32] = remote
                    .data
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::InvalidParameter("dh public key size"))?;
                let sk = x25519_dalek::StaticSecret::from(scalar);
                let shared = sk.diffie_hellman(&x25519_dalek::PublicKey::from(point));
                Ok(Secret::from_slice(shared.as_bytes()))
            }
            DhGroup::P256 => {
                let sk = p256::SecretKey::from_slice(self.secret.as_bytes())
                    .map_err(|_| Error::InvalidParameter("dh private key"))?;
                let pk = p256::PublicKey::from_sec1_bytes(&remote.data)
                    .map_err(|_| Error::InvalidParameter("dh public key"))?;
                let shared =
                    p256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
                Ok(Secret::from_slice(shared.raw_secret_bytes().as_slice()))
            }
            DhGroup::P521 => {
                let sk = p521::SecretKey::from_slice(self.secret.as_bytes())
                    .map_err(|_| Error::InvalidParameter("dh private key"))?;
                let pk = p521::PublicKey::from_sec1_bytes(&remote.data)
                    .map_err(|_| Error::InvalidParameter("dh public key"))?;
                let shared =
                    p521::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
                Ok(Secret::from_slice(shared.raw_secret_bytes().as_slice()))
            }
        }
    }
}
