// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signed advertisement of a prospective member's supported suites and initial HPKE keys.
//!
//! A joiner publishes one of these; an adder consumes it once to negotiate a suite and
//! address the Welcome. The advertised init keys are kept in their wire encoding and only
//! parsed against a concrete suite when used, the joiner's own private halves live next to
//! the bundle and never serialize.
//!
//! Each suite gets its own key pair. The per-suite secrets branch from the caller's single
//! init secret through `HKDF-Expand-Label` under the suite name, so no two suites share key
//! material.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::crypto::hkdf::hkdf_expand_label;
use crate::crypto::kem::{HpkePrivateKey, HpkePublicKey};
use crate::crypto::{CipherSuite, Secret};
use crate::error::{Error, Result};
use crate::message::PROTOCOL_VERSION;
use crate::tls::{self, Decode, Encode, Reader};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientInitKey {
    id: Vec<u8>,
    supported_versions: Vec<u8>,
    cipher_suites: Vec<CipherSuite>,
    init_keys: Vec<Vec<u8>>,
    credential: Credential,
    signature: Vec<u8>,
    private_keys: HashMap<CipherSuite, HpkePrivateKey>,
}

impl ClientInitKey {
    /// Builds and signs a bundle covering `suites`, deriving one init key per suite from
    /// `init_secret`. The credential must carry its signing key.
    pub fn new(
        id: &[u8],
        suites: &[CipherSuite],
        init_secret: &[u8],
        credential: Credential,
    ) -> Result<Self> {
        let mut bundle = Self {
            id: id.to_vec(),
            supported_versions: vec![PROTOCOL_VERSION],
            cipher_suites: Vec::new(),
            init_keys: Vec::new(),
            credential: credential.clone(),
            signature: Vec::new(),
            private_keys: HashMap::new(),
        };
        let base = Secret::from_slice(init_secret);
        for suite in suites {
            let suite_secret =
                hkdf_expand_label(*suite, &base, suite.name(), b"", suite.hash_len())?;
            let private = HpkePrivateKey::derive(*suite, suite_secret.as_bytes())?;
            bundle.add_init_key(private)?;
        }
        bundle.sign(credential)?;
        Ok(bundle)
    }

    /// Installs a single init key pair. Callers composing a bundle by hand must [`sign`]
    /// afterwards.
    ///
    /// [`sign`]: Self::sign
    pub fn add_init_key(&mut self, private: HpkePrivateKey) -> Result<()> {
        let suite = private.cipher_suite();
        if self.cipher_suites.contains(&suite) {
            return Err(Error::InvalidParameter("duplicate cipher suite"));
        }
        self.cipher_suites.push(suite);
        self.init_keys.push(private.public_key().as_bytes().to_vec());
        self.private_keys.insert(suite, private);
        Ok(())
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Advertised public init key for `suite`.
    pub fn find_init_key(&self, suite: CipherSuite) -> Result<HpkePublicKey> {
        let position = self
            .cipher_suites
            .iter()
            .position(|s| *s == suite)
            .ok_or(Error::Protocol("no init key for cipher suite"))?;
        HpkePublicKey::from_bytes(suite, self.init_keys[position].clone())
    }

    /// Held private init key for `suite`. Present only on the bundle's creator.
    pub fn find_private_key(&self, suite: CipherSuite) -> Option<&HpkePrivateKey> {
        self.private_keys.get(&suite)
    }

    /// Signs the bundle under `credential`'s signing key.
    pub fn sign(&mut self, credential: Credential) -> Result<()> {
        if self.cipher_suites.len() != self.init_keys.len() {
            return Err(Error::InvalidParameter("malformed client init key"));
        }
        let signing_key = credential.signing_key()?.clone();
        self.credential = credential;
        let tbs = self.to_be_signed()?;
        self.signature = signing_key.sign(&tbs)?;
        Ok(())
    }

    /// Checks the bundle's self-signature under its credential.
    pub fn verify(&self) -> Result<bool> {
        if self.cipher_suites.len() != self.init_keys.len() {
            return Err(Error::InvalidParameter("malformed client init key"));
        }
        let tbs = self.to_be_signed()?;
        Ok(self.credential.public_key().verify(&tbs, &self.signature))
    }

    fn to_be_signed(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        tls::encode_vector(&mut buf, 1, &self.cipher_suites)?;
        let mut keys = Vec::new();
        for key in &self.init_keys {
            tls::encode_opaque(&mut keys, 2, key)?;
        }
        tls::encode_opaque(&mut buf, 2, &keys)?;
        self.credential.encode(&mut buf)?;
        Ok(buf)
    }
}

// Signature bytes are excluded: ECDSA signs non-deterministically, so two honestly built
// bundles over the same keys may differ there. Verification is the caller's job.
impl PartialEq for ClientInitKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.supported_versions == other.supported_versions
            && self.cipher_suites == other.cipher_suites
            && self.init_keys == other.init_keys
            && self.credential == other.credential
    }
}

impl Eq for ClientInitKey {}

impl Encode for ClientInitKey {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        tls::encode_opaque(buf, 1, &self.id)?;
        tls::encode_opaque(buf, 1, &self.supported_versions)?;
        tls::encode_vector(buf, 1, &self.cipher_suites)?;
        let mut keys = Vec::new();
        for key in &self.init_keys {
            tls::encode_opaque(&mut keys, 2, key)?;
        }
        tls::encode_opaque(buf, 2, &keys)?;
        self.credential.encode(buf)?;
        tls::encode_opaque(buf, 2, &self.signature)
    }
}

impl Decode for ClientInitKey {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let id = tls::decode_opaque(r, 1)?;
        let supported_versions = tls::decode_opaque(r, 1)?;
        let cipher_suites: Vec<CipherSuite> = tls::decode_vector(r, 1)?;
        let mut keys_frame = r.take_framed(2)?;
        let mut init_keys = Vec::new();
        while !keys_frame.is_empty() {
            init_keys.push(tls::decode_opaque(&mut keys_frame, 2)?);
        }
        if init_keys.len() != cipher_suites.len() {
            return Err(Error::TlsSyntax("init key count mismatch"));
        }
        for (suite, key) in cipher_suites.iter().zip(&init_keys) {
            if key.len() != suite.dh_public_key_len() {
                return Err(Error::TlsSyntax("init key size"));
            }
        }
        let credential = Credential::decode(r)?;
        let signature = tls::decode_opaque(r, 2)?;
        Ok(Self {
            id,
            supported_versions,
            cipher_suites,
            init_keys,
            credential,
            signature,
            private_keys: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ClientInitKey;
    use crate::credential::Credential;
    use crate::crypto::sign::SignaturePrivateKey;
    use crate::crypto::{CipherSuite, Rng, SignatureScheme};
    use crate::tls;

    const SUITES: [CipherSuite; 2] = [
        CipherSuite::P256Sha256Aes128Gcm,
        CipherSuite::X25519Sha256Aes128Gcm,
    ];

    fn credential(rng: &Rng) -> Credential {
        let key = SignaturePrivateKey::generate(SignatureScheme::Ed25519, rng).unwrap();
        Credential::basic_with_key(b"alice", key)
    }

    #[test]
    fn build_sign_verify() {
        let rng = Rng::from_seed([13; 32]);
        let cik =
            ClientInitKey::new(b"cik-id", &SUITES, b"init secret", credential(&rng)).unwrap();

        assert!(cik.verify().unwrap());
        for suite in SUITES {
            assert!(cik.find_init_key(suite).is_ok());
            assert!(cik.find_private_key(suite).is_some());
        }
        assert!(
            cik.find_init_key(CipherSuite::P521Sha512Aes256Gcm)
                .is_err()
        );
    }

    #[test]
    fn per_suite_keys_differ() {
        let rng = Rng::from_seed([14; 32]);
        let cik =
            ClientInitKey::new(b"cik-id", &SUITES, b"init secret", credential(&rng)).unwrap();

        let p256 = cik.find_private_key(CipherSuite::P256Sha256Aes128Gcm).unwrap();
        let x25519 = cik
            .find_private_key(CipherSuite::X25519Sha256Aes128Gcm)
            .unwrap();
        assert_ne!(
            p256.public_key().as_bytes(),
            x25519.public_key().as_bytes()
        );
    }

    #[test]
    fn wire_round_trip() {
        let rng = Rng::from_seed([15; 32]);
        let cik =
            ClientInitKey::new(b"cik-id", &SUITES, b"init secret", credential(&rng)).unwrap();

        let encoded = tls::to_bytes(&cik).unwrap();
        let decoded: ClientInitKey = tls::from_bytes(&encoded).unwrap();

        assert_eq!(cik, decoded);
        assert!(decoded.verify().unwrap());
        // Private halves never travel.
        for suite in SUITES {
            assert!(decoded.find_private_key(suite).is_none());
        }
        assert_eq!(tls::to_bytes(&decoded).unwrap(), encoded);
    }

    #[test]
    fn tampered_bundle_fails_verification() {
        let rng = Rng::from_seed([16; 32]);
        let mut cik =
            ClientInitKey::new(b"cik-id", &SUITES, b"init secret", credential(&rng)).unwrap();
        cik.init_keys[0][0] ^= 0x01;
        assert!(!cik.verify().unwrap());
    }
}
