// SPDX-License-Identifier: MIT OR Apache-2.0

//! Credentials bind an identity byte string to a signature public key.
//!
//! Only the "basic" credential form exists here: the binding is asserted, not certified.
//! A member's own credential additionally carries the signing key; the private half never
//! appears on the wire.
use serde::{Deserialize, Serialize};

use crate::crypto::sign::{SignaturePrivateKey, SignaturePublicKey};
use crate::error::{Error, Result};
use crate::tls::{self, Decode, Encode, Reader};

const CREDENTIAL_TYPE_BASIC: u8 = 0;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credential {
    identity: Vec<u8>,
    public_key: SignaturePublicKey,
    private_key: Option<SignaturePrivateKey>,
}

impl Credential {
    /// Credential for somebody else: identity plus verification key.
    pub fn basic(identity: &[u8], public_key: SignaturePublicKey) -> Self {
        Self {
            identity: identity.to_vec(),
            public_key,
            private_key: None,
        }
    }

    /// Our own credential, carrying the signing key.
    pub fn basic_with_key(identity: &[u8], private_key: SignaturePrivateKey) -> Self {
        Self {
            identity: identity.to_vec(),
            public_key: private_key.public_key().clone(),
            private_key: Some(private_key),
        }
    }

    pub fn identity(&self) -> &[u8] {
        &self.identity
    }

    pub fn public_key(&self) -> &SignaturePublicKey {
        &self.public_key
    }

    pub fn private_key(&self) -> Option<&SignaturePrivateKey> {
        self.private_key.as_ref()
    }

    pub(crate) fn signing_key(&self) -> Result<&SignaturePrivateKey> {
        self.private_key
            .as_ref()
            .ok_or(Error::InvalidParameter("credential has no private key"))
    }
}

// The held private key is local state, equality is over the public binding.
impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity && self.public_key == other.public_key
    }
}

impl Eq for Credential {}

impl Encode for Credential {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        CREDENTIAL_TYPE_BASIC.encode(buf)?;
        tls::encode_opaque(buf, 2, &self.identity)?;
        self.public_key.encode(buf)
    }
}

impl Decode for Credential {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        match u8::decode(r)? {
            CREDENTIAL_TYPE_BASIC => Ok(Self {
                identity: tls::decode_opaque(r, 2)?,
                public_key: SignaturePublicKey::decode(r)?,
                private_key: None,
            }),
            _ => Err(Error::TlsSyntax("unknown credential type")),
        }
    }
}
