// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signature key pairs and sign/verify for the supported schemes.
//!
//! Ed25519 signs deterministically. The ECDSA schemes do not in general, so nothing in the
//! crate compares ECDSA signatures byte-for-byte; equality of signed objects goes through
//! verification instead.
use p256::ecdsa::signature::{Signer, Verifier};
use p256::elliptic_curve::ops::Reduce;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::crypto::{Rng, Secret, SignatureScheme};
use crate::error::{Error, Result};
use crate::tls::{self, Decode, Encode, Reader};

/// Verification key in its wire encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePublicKey {
    scheme: SignatureScheme,
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
}

impl SignaturePublicKey {
    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Checks `signature` over `message`. Any malformed key or signature counts as failure.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self.scheme {
            SignatureScheme::Ed25519 => {
                let Ok(key_bytes) = <[u8; 32]>::try_from(self.data.as_slice()) else {
                    return false;
                };
                let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes) else {
                    return false;
                };
                let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
                    return false;
                };
                key.verify(message, &sig).is_ok()
            }
            SignatureScheme::P256Sha256 => {
                let Ok(key) = p256::ecdsa::VerifyingKey::from_sec1_bytes(&self.data) else {
                    return false;
                };
                let Ok(sig) = p256::ecdsa::Signature::from_slice(signature) else {
                    return false;
                };
                key.verify(message, &sig).is_ok()
            }
            SignatureScheme::P521Sha512 => {
                let Ok(key) = p521::ecdsa::VerifyingKey::from_sec1_bytes(&self.data) else {
                    return false;
                };
                let Ok(sig) = p521::ecdsa::Signature::from_slice(signature) else {
                    return false;
                };
                key.verify(message, &sig).is_ok()
            }
        }
    }
}

impl Encode for SignaturePublicKey {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.scheme.encode(buf)?;
        tls::encode_opaque(buf, 2, &self.data)
    }
}

impl Decode for SignaturePublicKey {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            scheme: SignatureScheme::decode(r)?,
            data: tls::decode_opaque(r, 2)?,
        })
    }
}

/// Signing key with its cached verification key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignaturePrivateKey {
    scheme: SignatureScheme,
    secret: Secret,
    public: SignaturePublicKey,
}

impl SignaturePrivateKey {
    /// Derives a signing key pair from a byte secret. Deterministic.
    pub fn derive(scheme: SignatureScheme, ikm: &[u8]) -> Result<Self> {
        let (secret, public) = match scheme {
            SignatureScheme::Ed25519 => {
                let seed: [u8; 32] = Sha256::digest(ikm).into();
                let key = ed25519_dalek::SigningKey::from_bytes(&seed);
                (
                    Secret::from_slice(&seed),
                    key.verifying_key().as_bytes().to_vec(),
                )
            }
            SignatureScheme::P256Sha256 => {
                let seed = Sha256::digest(ikm);
                let bytes = p256::FieldBytes::clone_from_slice(&seed);
                let scalar =
                    <p256::Scalar as Reduce<p256::elliptic_curve::bigint::U256>>::reduce_bytes(
                        &bytes,
                    );
                let scalar = Option::<p256::NonZeroScalar>::from(p256::NonZeroScalar::new(scalar))
                    .ok_or(Error::InvalidParameter("derived zero scalar"))?;
                let sk = p256::SecretKey::from(scalar);
                let verifying = p256::ecdsa::SigningKey::from(&sk).verifying_key().to_owned();
                (
                    Secret::from_slice(sk.to_bytes().as_slice()),
                    verifying.to_encoded_point(false).as_bytes().to_vec(),
                )
            }
            SignatureScheme::P521Sha512 => {
                let seed = Sha512::digest(ikm);
                let mut padded = [0u8; 66];
                padded[2..].copy_from_slice(&seed);
                let bytes = p521::FieldBytes::clone_from_slice(&padded);
                let sk = p521::SecretKey::from_bytes(&bytes)
                    .map_err(|_| Error::InvalidParameter("derived zero scalar"))?;
                let signing_key = p521::ecdsa::SigningKey::from_bytes(&sk.to_bytes())
                    .map_err(|_| Error::InvalidParameter("derived zero scalar"))?;
                let verifying = p521::ecdsa::VerifyingKey::from(&signing_key);
                (
                    Secret::from_slice(sk.to_bytes().as_slice()),
                    verifying.to_encoded_point(false).as_bytes().to_vec(),
                )
            }
        };
        Ok(Self {
            scheme,
            secret,
            public: SignaturePublicKey {
                scheme,
                data: public,
            },
        })
    }

    /// Fresh signing key from the caller's randomness source.
    pub fn generate(scheme: SignatureScheme, rng: &Rng) -> Result<Self> {
        let ikm = rng.random_vec(32)?;
        Self::derive(scheme, &ikm)
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn public_key(&self) -> &SignaturePublicKey {
        &self.public
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        match self.scheme {
            SignatureScheme::Ed25519 => {
                let seed: [u8; 32] = self
                    .secret
                    .as_bytes()
                    .try_into()
                    .map_err(|_| Error::InvalidParameter("signature key size"))?;
                let key = ed25519_dalek::SigningKey::from_bytes(&seed);
                Ok(key.sign(message).to_bytes().to_vec())
            }
            SignatureScheme::P256Sha256 => {
                let key = p256::ecdsa::SigningKey::from_slice(self.secret.as_bytes())
                    .map_err(|_| Error::InvalidParameter("signature key"))?;
                let signature: p256::ecdsa::Signature = key.sign(message);
                Ok(signature.to_bytes().to_vec())
            }
            SignatureScheme::P521Sha512 => {
                let key = p521::ecdsa::SigningKey::from_slice(self.secret.as_bytes())
                    .map_err(|_| Error::InvalidParameter("signature key"))?;
                let signature: p521::ecdsa::Signature = key.sign(message);
                Ok(signature.to_bytes().to_vec())
            }
        }
    }
}
