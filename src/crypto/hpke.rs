// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-shot public-key authenticated encryption.
//!
//! The sealer generates an ephemeral DH key pair from the caller's [`Rng`], computes the
//! shared secret with the recipient's public key and expands it into an AEAD key and nonce
//! under a per-use label: `"member"` wraps path secrets addressed to group members,
//! `"welcome"` wraps the group snapshot for a joiner. The ciphertext carries the ephemeral
//! public key next to the AEAD output.
//!
//! With a seeded [`Rng`] the ephemeral is derived deterministically, so equal inputs produce
//! byte-identical ciphertexts. Test transcripts rely on this.
use serde::{Deserialize, Serialize};

use crate::crypto::aead::{aead_open, aead_seal};
use crate::crypto::hkdf::{hkdf_expand_label, hkdf_extract};
use crate::crypto::kem::{HpkePrivateKey, HpkePublicKey};
use crate::crypto::{CipherSuite, Rng, Secret};
use crate::error::Result;
use crate::tls::{self, DecodeWith, Encode, Reader};

/// Ephemeral public key plus AEAD output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HpkeCiphertext {
    pub ephemeral_key: HpkePublicKey,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

impl Encode for HpkeCiphertext {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.ephemeral_key.encode(buf)?;
        tls::encode_opaque(buf, 4, &self.ciphertext)
    }
}

impl DecodeWith<CipherSuite> for HpkeCiphertext {
    fn decode_with(r: &mut Reader<'_>, suite: CipherSuite) -> Result<Self> {
        Ok(Self {
            ephemeral_key: HpkePublicKey::decode_with(r, suite)?,
            ciphertext: tls::decode_opaque(r, 4)?,
        })
    }
}

/// Encrypts `plaintext` to `public_key` under the given derivation label.
pub fn hpke_seal(
    suite: CipherSuite,
    label: &str,
    public_key: &HpkePublicKey,
    aad: Option<&[u8]>,
    plaintext: &[u8],
    rng: &Rng,
) -> Result<HpkeCiphertext> {
    let ephemeral = HpkePrivateKey::generate(suite, rng)?;
    let shared = ephemeral.shared_secret(public_key)?;
    let (key, nonce) = content_keys(suite, label, &shared, ephemeral.public_key(), public_key)?;
    let ciphertext = aead_seal(
        suite,
        key.as_bytes(),
        nonce.as_bytes(),
        aad.unwrap_or_default(),
        plaintext,
    )?;
    Ok(HpkeCiphertext {
        ephemeral_key: ephemeral.public_key().clone(),
        ciphertext,
    })
}

/// Decrypts a single-shot ciphertext with the recipient's private key.
pub fn hpke_open(
    suite: CipherSuite,
    label: &str,
    input: &HpkeCiphertext,
    secret_key: &HpkePrivateKey,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let shared = secret_key.shared_secret(&input.ephemeral_key)?;
    let (key, nonce) = content_keys(
        suite,
        label,
        &shared,
        &input.ephemeral_key,
        secret_key.public_key(),
    )?;
    aead_open(
        suite,
        key.as_bytes(),
        nonce.as_bytes(),
        aad.unwrap_or_default(),
        &input.ciphertext,
    )
}

// Key and nonce expand from the same label; the output length inside HkdfLabel keeps them
// distinct. The context binds both public keys of the exchange.
fn content_keys(
    suite: CipherSuite,
    label: &str,
    shared: &Secret,
    ephemeral: &HpkePublicKey,
    recipient: &HpkePublicKey,
) -> Result<(Secret, Secret)> {
    let mut context = Vec::new();
    ephemeral.encode(&mut context)?;
    recipient.encode(&mut context)?;
    let prk = hkdf_extract(suite, b"", shared.as_bytes());
    let key = hkdf_expand_label(suite, &prk, label, &context, suite.aead_key_len())?;
    let nonce = hkdf_expand_label(suite, &prk, label, &context, suite.aead_nonce_len())?;
    Ok((key, nonce))
}
