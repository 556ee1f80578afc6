// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed facades over the cryptographic primitives, selected by cipher suite.
//!
//! Algorithms in use across the suites:
//! - DH groups: X25519, NIST P-256, NIST P-521
//! - Hashes: SHA-256, SHA-512 (with HKDF and HMAC on top)
//! - AEADs: AES-128-GCM, AES-256-GCM, ChaCha20-Poly1305
//! - Signatures: Ed25519, ECDSA P-256, ECDSA P-521
//!
//! All randomness is drawn from an [`Rng`] handed in by the caller; tests install a seeded
//! generator to make every output, including HPKE ephemerals, reproducible.
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tls::{Decode, Encode, Reader};

pub mod aead;
pub mod hash;
pub mod hkdf;
pub mod hpke;
pub mod kem;
mod rng;
mod secret;
pub mod sign;

pub use rng::{Rng, RngError};
pub use secret::Secret;

/// Cipher suite discriminant: fixes the DH group, hash and AEAD for a group.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CipherSuite {
    P256Sha256Aes128Gcm = 0x0000,
    X25519Sha256Aes128Gcm = 0x0001,
    X25519Sha256ChaCha20Poly1305 = 0x0002,
    P521Sha512Aes256Gcm = 0x0010,
}

impl CipherSuite {
    pub fn try_from_u16(value: u16) -> Result<Self> {
        match value {
            0x0000 => Ok(Self::P256Sha256Aes128Gcm),
            0x0001 => Ok(Self::X25519Sha256Aes128Gcm),
            0x0002 => Ok(Self::X25519Sha256ChaCha20Poly1305),
            0x0010 => Ok(Self::P521Sha512Aes256Gcm),
            _ => Err(Error::NotImplemented("cipher suite")),
        }
    }

    /// Output size of the suite's hash (`Nh`).
    pub fn hash_len(self) -> usize {
        match self {
            Self::P256Sha256Aes128Gcm
            | Self::X25519Sha256Aes128Gcm
            | Self::X25519Sha256ChaCha20Poly1305 => 32,
            Self::P521Sha512Aes256Gcm => 64,
        }
    }

    /// Key size of the suite's AEAD (`Nk`).
    pub fn aead_key_len(self) -> usize {
        match self {
            Self::P256Sha256Aes128Gcm | Self::X25519Sha256Aes128Gcm => 16,
            Self::X25519Sha256ChaCha20Poly1305 | Self::P521Sha512Aes256Gcm => 32,
        }
    }

    /// Nonce size of the suite's AEAD (`Nn`).
    pub fn aead_nonce_len(self) -> usize {
        12
    }

    /// Encoded size of a DH public key in this suite.
    pub fn dh_public_key_len(self) -> usize {
        match self {
            Self::X25519Sha256Aes128Gcm | Self::X25519Sha256ChaCha20Poly1305 => 32,
            Self::P256Sha256Aes128Gcm => 65,
            Self::P521Sha512Aes256Gcm => 133,
        }
    }

    /// Stable name, used as the derivation label for per-suite init secrets.
    pub fn name(self) -> &'static str {
        match self {
            Self::P256Sha256Aes128Gcm => "P256_SHA256_AES128GCM",
            Self::X25519Sha256Aes128Gcm => "X25519_SHA256_AES128GCM",
            Self::X25519Sha256ChaCha20Poly1305 => "X25519_SHA256_CHACHA20POLY1305",
            Self::P521Sha512Aes256Gcm => "P521_SHA512_AES256GCM",
        }
    }
}

impl Encode for CipherSuite {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        (*self as u16).encode(buf)
    }
}

impl Decode for CipherSuite {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Self::try_from_u16(u16::decode(r)?)
    }
}

/// Signature scheme discriminant, using the TLS `SignatureScheme` code points.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum SignatureScheme {
    P256Sha256 = 0x0403,
    P521Sha512 = 0x0603,
    Ed25519 = 0x0807,
}

impl SignatureScheme {
    pub fn try_from_u16(value: u16) -> Result<Self> {
        match value {
            0x0403 => Ok(Self::P256Sha256),
            0x0603 => Ok(Self::P521Sha512),
            0x0807 => Ok(Self::Ed25519),
            _ => Err(Error::NotImplemented("signature scheme")),
        }
    }

    /// Whether signing the same input twice yields identical bytes. ECDSA draws a per-call
    /// nonce in the general case, so consumers that need replays compare by verification
    /// instead of byte equality.
    pub fn is_deterministic(self) -> bool {
        matches!(self, Self::Ed25519)
    }
}

impl Encode for SignatureScheme {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        (*self as u16).encode(buf)
    }
}

impl Decode for SignatureScheme {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Self::try_from_u16(u16::decode(r)?)
    }
}
