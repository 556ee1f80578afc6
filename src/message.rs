// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handshake and application message framing.
//!
//! Handshake messages travel as signed [`MLSPlaintext`]; application payloads are sealed
//! into [`MLSCiphertext`] with sender identity and chain generation hidden inside an
//! encrypted sender-data block. The [`Welcome`] carries an HPKE-wrapped [`WelcomeInfo`]
//! snapshot to a joiner.
use serde::{Deserialize, Serialize};

use crate::client_init_key::ClientInitKey;
use crate::crypto::hash::digest;
use crate::crypto::hpke::{HpkeCiphertext, hpke_open, hpke_seal};
use crate::crypto::kem::{HpkePrivateKey, HpkePublicKey};
use crate::crypto::sign::{SignaturePrivateKey, SignaturePublicKey};
use crate::crypto::{CipherSuite, Rng, Secret};
use crate::error::{Error, Result};
use crate::tls::{self, Decode, DecodeWith, Encode, Reader};
use crate::tree::RatchetTree;
use crate::tree_math::LeafIndex;

/// The protocol version advertised and carried in welcome snapshots.
pub const PROTOCOL_VERSION: u8 = 0xff;

const CONTENT_PADDING_MARKER: u8 = 0x01;

/// One node of a transmitted path: the new public key, plus the path secret at this node
/// encrypted to every resolution member of the copath node below it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetNode {
    pub public_key: HpkePublicKey,
    pub node_secrets: Vec<HpkeCiphertext>,
}

impl Encode for RatchetNode {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.public_key.encode(buf)?;
        tls::encode_vector(buf, 2, &self.node_secrets)
    }
}

impl DecodeWith<CipherSuite> for RatchetNode {
    fn decode_with(r: &mut Reader<'_>, suite: CipherSuite) -> Result<Self> {
        Ok(Self {
            public_key: HpkePublicKey::decode_with(r, suite)?,
            node_secrets: tls::decode_vector_with(r, 2, suite)?,
        })
    }
}

/// Leaf-first sequence of [`RatchetNode`]s along a sender's direct path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectPath {
    pub nodes: Vec<RatchetNode>,
}

impl Encode for DirectPath {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        tls::encode_vector(buf, 2, &self.nodes)
    }
}

impl DecodeWith<CipherSuite> for DirectPath {
    fn decode_with(r: &mut Reader<'_>, suite: CipherSuite) -> Result<Self> {
        Ok(Self {
            nodes: tls::decode_vector_with(r, 2, suite)?,
        })
    }
}

/// Proposal to insert a joiner at a leaf slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Add {
    pub index: LeafIndex,
    pub init_key: ClientInitKey,
    pub welcome_info_hash: Vec<u8>,
}

impl Encode for Add {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.index.0.encode(buf)?;
        self.init_key.encode(buf)?;
        tls::encode_opaque(buf, 1, &self.welcome_info_hash)
    }
}

impl Decode for Add {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            index: LeafIndex(u32::decode(r)?),
            init_key: ClientInitKey::decode(r)?,
            welcome_info_hash: tls::decode_opaque(r, 1)?,
        })
    }
}

/// Fresh path from the sender's leaf, rotating every key it crosses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub path: DirectPath,
}

impl Encode for Update {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.path.encode(buf)
    }
}

impl DecodeWith<CipherSuite> for Update {
    fn decode_with(r: &mut Reader<'_>, suite: CipherSuite) -> Result<Self> {
        Ok(Self {
            path: DirectPath::decode_with(r, suite)?,
        })
    }
}

/// Eviction of a member: its leaf is blanked, then the sender re-keys its own path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remove {
    pub removed: LeafIndex,
    pub path: DirectPath,
}

impl Encode for Remove {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.removed.0.encode(buf)?;
        self.path.encode(buf)
    }
}

impl DecodeWith<CipherSuite> for Remove {
    fn decode_with(r: &mut Reader<'_>, suite: CipherSuite) -> Result<Self> {
        Ok(Self {
            removed: LeafIndex(u32::decode(r)?),
            path: DirectPath::decode_with(r, suite)?,
        })
    }
}

const OPERATION_TAG_ADD: u8 = 1;
const OPERATION_TAG_UPDATE: u8 = 2;
const OPERATION_TAG_REMOVE: u8 = 3;

/// Tagged sum of the group-mutating handshake operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GroupOperation {
    Add(Add),
    Update(Update),
    Remove(Remove),
}

impl Encode for GroupOperation {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::Add(add) => {
                OPERATION_TAG_ADD.encode(buf)?;
                add.encode(buf)
            }
            Self::Update(update) => {
                OPERATION_TAG_UPDATE.encode(buf)?;
                update.encode(buf)
            }
            Self::Remove(remove) => {
                OPERATION_TAG_REMOVE.encode(buf)?;
                remove.encode(buf)
            }
        }
    }
}

impl DecodeWith<CipherSuite> for GroupOperation {
    fn decode_with(r: &mut Reader<'_>, suite: CipherSuite) -> Result<Self> {
        match u8::decode(r)? {
            OPERATION_TAG_ADD => Ok(Self::Add(Add::decode(r)?)),
            OPERATION_TAG_UPDATE => Ok(Self::Update(Update::decode_with(r, suite)?)),
            OPERATION_TAG_REMOVE => Ok(Self::Remove(Remove::decode_with(r, suite)?)),
            tag => Err(Error::InvalidMessageType(tag)),
        }
    }
}

const CONTENT_TYPE_HANDSHAKE: u8 = 1;
const CONTENT_TYPE_APPLICATION: u8 = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    Handshake,
    Application,
}

impl Encode for ContentType {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        let tag = match self {
            Self::Handshake => CONTENT_TYPE_HANDSHAKE,
            Self::Application => CONTENT_TYPE_APPLICATION,
        };
        tag.encode(buf)
    }
}

impl Decode for ContentType {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        match u8::decode(r)? {
            CONTENT_TYPE_HANDSHAKE => Ok(Self::Handshake),
            CONTENT_TYPE_APPLICATION => Ok(Self::Application),
            _ => Err(Error::TlsSyntax("unknown content type")),
        }
    }
}

/// The two content bodies are mutually exclusive; which one a message carries is fixed by
/// its content type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MessageContent {
    Handshake {
        operation: GroupOperation,
        confirmation: Vec<u8>,
    },
    Application(Vec<u8>),
}

/// A signed group message before framing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MLSPlaintext {
    pub group_id: Vec<u8>,
    pub epoch: u32,
    pub sender: LeafIndex,
    pub content: MessageContent,
    pub signature: Vec<u8>,
}

impl MLSPlaintext {
    pub fn handshake(
        group_id: Vec<u8>,
        epoch: u32,
        sender: LeafIndex,
        operation: GroupOperation,
    ) -> Self {
        Self {
            group_id,
            epoch,
            sender,
            content: MessageContent::Handshake {
                operation,
                confirmation: Vec::new(),
            },
            signature: Vec::new(),
        }
    }

    pub fn application(group_id: Vec<u8>, epoch: u32, sender: LeafIndex, data: Vec<u8>) -> Self {
        Self {
            group_id,
            epoch,
            sender,
            content: MessageContent::Application(data),
            signature: Vec::new(),
        }
    }

    pub fn content_type(&self) -> ContentType {
        match &self.content {
            MessageContent::Handshake { .. } => ContentType::Handshake,
            MessageContent::Application(_) => ContentType::Application,
        }
    }

    pub fn operation(&self) -> Result<&GroupOperation> {
        match &self.content {
            MessageContent::Handshake { operation, .. } => Ok(operation),
            MessageContent::Application(_) => Err(Error::InvalidMessageType(
                CONTENT_TYPE_APPLICATION,
            )),
        }
    }

    pub fn confirmation(&self) -> Result<&[u8]> {
        match &self.content {
            MessageContent::Handshake { confirmation, .. } => Ok(confirmation),
            MessageContent::Application(_) => Err(Error::InvalidMessageType(
                CONTENT_TYPE_APPLICATION,
            )),
        }
    }

    pub fn set_confirmation(&mut self, confirmation: Vec<u8>) -> Result<()> {
        match &mut self.content {
            MessageContent::Handshake {
                confirmation: slot, ..
            } => {
                *slot = confirmation;
                Ok(())
            }
            MessageContent::Application(_) => Err(Error::InvalidMessageType(
                CONTENT_TYPE_APPLICATION,
            )),
        }
    }

    /// The octets covered by the signature.
    pub fn to_be_signed(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        tls::encode_opaque(&mut buf, 1, &self.group_id)?;
        self.epoch.encode(&mut buf)?;
        self.sender.0.encode(&mut buf)?;
        self.content_type().encode(&mut buf)?;
        match &self.content {
            MessageContent::Handshake {
                operation,
                confirmation,
            } => {
                operation.encode(&mut buf)?;
                tls::encode_opaque(&mut buf, 1, confirmation)?;
            }
            MessageContent::Application(data) => {
                tls::encode_opaque(&mut buf, 4, data)?;
            }
        }
        Ok(buf)
    }

    pub fn sign(&mut self, key: &SignaturePrivateKey) -> Result<()> {
        let tbs = self.to_be_signed()?;
        self.signature = key.sign(&tbs)?;
        Ok(())
    }

    pub fn verify(&self, key: &SignaturePublicKey) -> Result<bool> {
        let tbs = self.to_be_signed()?;
        Ok(key.verify(&tbs, &self.signature))
    }

    /// Transcript input of a handshake message: everything up to and including the
    /// operation, before the confirmation exists.
    pub fn operation_content(&self) -> Result<Vec<u8>> {
        let operation = self.operation()?;
        let mut buf = Vec::new();
        tls::encode_opaque(&mut buf, 1, &self.group_id)?;
        self.epoch.encode(&mut buf)?;
        self.sender.0.encode(&mut buf)?;
        self.content_type().encode(&mut buf)?;
        operation.encode(&mut buf)?;
        Ok(buf)
    }

    /// Authenticated trailer of a handshake message: confirmation plus signature.
    pub fn auth_data(&self) -> Result<Vec<u8>> {
        let confirmation = self.confirmation()?;
        let mut buf = Vec::new();
        tls::encode_opaque(&mut buf, 1, confirmation)?;
        tls::encode_opaque(&mut buf, 2, &self.signature)?;
        Ok(buf)
    }

    /// Content framing before encryption:
    /// `content || signature || sig_len || 0x01 || zero-padding`.
    pub fn marshal_content(&self, padding_size: usize) -> Result<Vec<u8>> {
        let mut buf = match &self.content {
            MessageContent::Handshake { operation, .. } => tls::to_bytes(operation)?,
            MessageContent::Application(data) => data.clone(),
        };
        buf.extend_from_slice(&self.signature);
        tls::write_uint(&mut buf, 2, self.signature.len() as u64)?;
        buf.push(CONTENT_PADDING_MARKER);
        buf.extend(std::iter::repeat_n(0u8, padding_size));
        Ok(buf)
    }

    /// Rebuilds a message from decrypted content framing. The envelope fields come from the
    /// ciphertext header.
    pub fn from_content(
        suite: CipherSuite,
        group_id: Vec<u8>,
        epoch: u32,
        sender: LeafIndex,
        content_type: ContentType,
        marshaled: &[u8],
    ) -> Result<Self> {
        let marker = marshaled
            .iter()
            .rposition(|b| *b != 0)
            .ok_or(Error::Protocol("invalid padding marker"))?;
        if marshaled[marker] != CONTENT_PADDING_MARKER {
            return Err(Error::Protocol("invalid padding marker"));
        }
        if marker < 2 {
            return Err(Error::Protocol("invalid signature size"));
        }
        let sig_len =
            u16::from_be_bytes([marshaled[marker - 2], marshaled[marker - 1]]) as usize;
        let cut = marker - 2;
        if sig_len > cut {
            return Err(Error::Protocol("invalid signature size"));
        }
        let signature = marshaled[cut - sig_len..cut].to_vec();
        let content = &marshaled[..cut - sig_len];

        let content = match content_type {
            ContentType::Handshake => MessageContent::Handshake {
                operation: tls::from_bytes_with(content, suite)?,
                confirmation: Vec::new(),
            },
            ContentType::Application => MessageContent::Application(content.to_vec()),
        };
        Ok(Self {
            group_id,
            epoch,
            sender,
            content,
            signature,
        })
    }
}

impl Encode for MLSPlaintext {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend(self.to_be_signed()?);
        tls::encode_opaque(buf, 2, &self.signature)
    }
}

impl DecodeWith<CipherSuite> for MLSPlaintext {
    fn decode_with(r: &mut Reader<'_>, suite: CipherSuite) -> Result<Self> {
        let group_id = tls::decode_opaque(r, 1)?;
        let epoch = u32::decode(r)?;
        let sender = LeafIndex(u32::decode(r)?);
        let content = match ContentType::decode(r)? {
            ContentType::Handshake => MessageContent::Handshake {
                operation: GroupOperation::decode_with(r, suite)?,
                confirmation: tls::decode_opaque(r, 1)?,
            },
            ContentType::Application => {
                MessageContent::Application(tls::decode_opaque(r, 4)?)
            }
        };
        let signature = tls::decode_opaque(r, 2)?;
        Ok(Self {
            group_id,
            epoch,
            sender,
            content,
            signature,
        })
    }
}

/// Encrypted framing of a group message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MLSCiphertext {
    pub group_id: Vec<u8>,
    pub epoch: u32,
    pub content_type: ContentType,
    pub sender_data_nonce: Vec<u8>,
    pub encrypted_sender_data: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl MLSCiphertext {
    /// Additional data authenticated by both AEAD layers.
    pub fn additional_data(group_id: &[u8], epoch: u32, content_type: ContentType) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        tls::encode_opaque(&mut buf, 1, group_id)?;
        epoch.encode(&mut buf)?;
        content_type.encode(&mut buf)?;
        Ok(buf)
    }
}

impl Encode for MLSCiphertext {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        tls::encode_opaque(buf, 1, &self.group_id)?;
        self.epoch.encode(buf)?;
        self.content_type.encode(buf)?;
        tls::encode_opaque(buf, 1, &self.sender_data_nonce)?;
        tls::encode_opaque(buf, 1, &self.encrypted_sender_data)?;
        tls::encode_opaque(buf, 4, &self.ciphertext)
    }
}

impl Decode for MLSCiphertext {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            group_id: tls::decode_opaque(r, 1)?,
            epoch: u32::decode(r)?,
            content_type: ContentType::decode(r)?,
            sender_data_nonce: tls::decode_opaque(r, 1)?,
            encrypted_sender_data: tls::decode_opaque(r, 1)?,
            ciphertext: tls::decode_opaque(r, 4)?,
        })
    }
}

/// Snapshot of the group state a joiner needs, delivered encrypted inside a [`Welcome`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WelcomeInfo {
    pub version: u8,
    pub group_id: Vec<u8>,
    pub epoch: u32,
    pub tree: RatchetTree,
    pub interim_transcript_hash: Vec<u8>,
    pub init_secret: Secret,
}

impl WelcomeInfo {
    pub fn hash(&self, suite: CipherSuite) -> Result<Vec<u8>> {
        let encoded = tls::to_bytes(self)?;
        Ok(digest(suite, &[&encoded]))
    }
}

impl Encode for WelcomeInfo {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.version.encode(buf)?;
        tls::encode_opaque(buf, 1, &self.group_id)?;
        self.epoch.encode(buf)?;
        self.tree.encode(buf)?;
        tls::encode_opaque(buf, 1, &self.interim_transcript_hash)?;
        tls::encode_opaque(buf, 1, self.init_secret.as_bytes())
    }
}

impl DecodeWith<CipherSuite> for WelcomeInfo {
    fn decode_with(r: &mut Reader<'_>, suite: CipherSuite) -> Result<Self> {
        Ok(Self {
            version: u8::decode(r)?,
            group_id: tls::decode_opaque(r, 1)?,
            epoch: u32::decode(r)?,
            tree: RatchetTree::decode_with(r, suite)?,
            interim_transcript_hash: tls::decode_opaque(r, 1)?,
            init_secret: Secret::from_bytes(tls::decode_opaque(r, 1)?),
        })
    }
}

/// Invitation addressed to a joiner's init key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    pub client_init_key_id: Vec<u8>,
    pub cipher_suite: CipherSuite,
    pub encrypted_welcome_info: HpkeCiphertext,
}

impl Welcome {
    /// Encrypts `info` to the joiner's advertised init key.
    pub fn new(
        client_init_key_id: &[u8],
        public_key: &HpkePublicKey,
        info: &WelcomeInfo,
        rng: &Rng,
    ) -> Result<Self> {
        let suite = public_key.cipher_suite();
        let encoded = tls::to_bytes(info)?;
        Ok(Self {
            client_init_key_id: client_init_key_id.to_vec(),
            cipher_suite: suite,
            encrypted_welcome_info: hpke_seal(suite, "welcome", public_key, None, &encoded, rng)?,
        })
    }

    /// Decrypts the snapshot with the joiner's private init key.
    pub fn decrypt(&self, private_key: &HpkePrivateKey) -> Result<WelcomeInfo> {
        let encoded = hpke_open(
            self.cipher_suite,
            "welcome",
            &self.encrypted_welcome_info,
            private_key,
            None,
        )?;
        tls::from_bytes_with(&encoded, self.cipher_suite)
    }
}

impl Encode for Welcome {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        tls::encode_opaque(buf, 1, &self.client_init_key_id)?;
        self.cipher_suite.encode(buf)?;
        self.encrypted_welcome_info.encode(buf)
    }
}

impl Decode for Welcome {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let client_init_key_id = tls::decode_opaque(r, 1)?;
        let cipher_suite = CipherSuite::decode(r)?;
        let encrypted_welcome_info = HpkeCiphertext::decode_with(r, cipher_suite)?;
        Ok(Self {
            client_init_key_id,
            cipher_suite,
            encrypted_welcome_info,
        })
    }
}

/// The group context folded into every epoch's key derivations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupContext {
    pub group_id: Vec<u8>,
    pub epoch: u32,
    pub tree_hash: Vec<u8>,
    pub transcript_hash: Vec<u8>,
}

impl Encode for GroupContext {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        tls::encode_opaque(buf, 1, &self.group_id)?;
        self.epoch.encode(buf)?;
        tls::encode_opaque(buf, 1, &self.tree_hash)?;
        tls::encode_opaque(buf, 1, &self.transcript_hash)
    }
}

impl Decode for GroupContext {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            group_id: tls::decode_opaque(r, 1)?,
            epoch: u32::decode(r)?,
            tree_hash: tls::decode_opaque(r, 1)?,
            transcript_hash: tls::decode_opaque(r, 1)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ContentType, GroupOperation, MLSCiphertext, MLSPlaintext, Remove, Update, Welcome,
        WelcomeInfo, PROTOCOL_VERSION,
    };
    use crate::client_init_key::ClientInitKey;
    use crate::credential::Credential;
    use crate::crypto::kem::HpkePrivateKey;
    use crate::crypto::sign::SignaturePrivateKey;
    use crate::crypto::{CipherSuite, Rng, Secret, SignatureScheme};
    use crate::error::Error;
    use crate::tls;
    use crate::tree::RatchetTree;
    use crate::tree_math::LeafIndex;

    const SUITE: CipherSuite = CipherSuite::X25519Sha256Aes128Gcm;
    const SCHEME: SignatureScheme = SignatureScheme::Ed25519;

    fn credential(rng: &Rng, identity: &[u8]) -> Credential {
        let key = SignaturePrivateKey::generate(SCHEME, rng).unwrap();
        Credential::basic_with_key(identity, key)
    }

    fn group_tree(rng: &Rng) -> RatchetTree {
        let secrets: Vec<Vec<u8>> = (0..4).map(|_| rng.random_vec(32).unwrap()).collect();
        let credentials: Vec<Credential> =
            (0..4).map(|i| credential(rng, &[i as u8])).collect();
        RatchetTree::from_secrets(SUITE, &secrets, &credentials).unwrap()
    }

    fn update_operation(rng: &Rng, tree: &RatchetTree) -> GroupOperation {
        let (path, _) = tree.encrypt(LeafIndex(0), b"update leaf secret", rng).unwrap();
        GroupOperation::Update(Update { path })
    }

    #[test]
    fn padded_content_round_trip() {
        let rng = Rng::from_seed([31; 32]);
        let tree = group_tree(&rng);

        let mut plaintext = MLSPlaintext::handshake(
            vec![0, 1, 2, 3],
            7,
            LeafIndex(0),
            update_operation(&rng, &tree),
        );
        let signer = SignaturePrivateKey::generate(SCHEME, &rng).unwrap();
        plaintext.sign(&signer).unwrap();

        let marshaled = plaintext.marshal_content(16).unwrap();
        let recovered = MLSPlaintext::from_content(
            SUITE,
            plaintext.group_id.clone(),
            plaintext.epoch,
            plaintext.sender,
            ContentType::Handshake,
            &marshaled,
        )
        .unwrap();

        assert_eq!(recovered.operation().unwrap(), plaintext.operation().unwrap());
        assert_eq!(recovered.signature, plaintext.signature);
    }

    #[test]
    fn padded_content_rejects_bad_framing() {
        let plaintext =
            MLSPlaintext::application(vec![0], 0, LeafIndex(0), b"data".to_vec());
        let marshaled = plaintext.marshal_content(4).unwrap();

        // All-zero padding without marker.
        assert!(matches!(
            MLSPlaintext::from_content(
                SUITE,
                vec![0],
                0,
                LeafIndex(0),
                ContentType::Application,
                &vec![0u8; 8],
            ),
            Err(Error::Protocol(_))
        ));

        // Oversized signature length.
        let mut tampered = marshaled.clone();
        let marker = tampered.iter().rposition(|b| *b != 0).unwrap();
        tampered[marker - 2] = 0xff;
        tampered[marker - 1] = 0xff;
        assert!(matches!(
            MLSPlaintext::from_content(
                SUITE,
                vec![0],
                0,
                LeafIndex(0),
                ContentType::Application,
                &tampered,
            ),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn plaintext_sign_and_verify() {
        let rng = Rng::from_seed([32; 32]);
        let mut plaintext =
            MLSPlaintext::application(vec![1, 2], 3, LeafIndex(1), b"hello".to_vec());
        let signer = SignaturePrivateKey::generate(SCHEME, &rng).unwrap();
        plaintext.sign(&signer).unwrap();

        assert!(plaintext.verify(signer.public_key()).unwrap());

        let mut tampered = plaintext.clone();
        tampered.epoch += 1;
        assert!(!tampered.verify(signer.public_key()).unwrap());
    }

    #[test]
    fn handshake_wire_round_trip() {
        let rng = Rng::from_seed([33; 32]);
        let tree = group_tree(&rng);

        let mut plaintext = MLSPlaintext::handshake(
            vec![0, 1, 2, 3],
            2,
            LeafIndex(0),
            GroupOperation::Remove(Remove {
                removed: LeafIndex(3),
                path: match update_operation(&rng, &tree) {
                    GroupOperation::Update(update) => update.path,
                    _ => unreachable!(),
                },
            }),
        );
        plaintext.set_confirmation(vec![0xaa; 32]).unwrap();
        let signer = SignaturePrivateKey::generate(SCHEME, &rng).unwrap();
        plaintext.sign(&signer).unwrap();

        let encoded = tls::to_bytes(&plaintext).unwrap();
        let decoded: MLSPlaintext = tls::from_bytes_with(&encoded, SUITE).unwrap();
        assert_eq!(decoded, plaintext);
        assert_eq!(tls::to_bytes(&decoded).unwrap(), encoded);

        // Truncation anywhere must fail.
        assert!(tls::from_bytes_with::<MLSPlaintext, _>(
            &encoded[..encoded.len() - 1],
            SUITE
        )
        .is_err());
    }

    #[test]
    fn unknown_operation_tag() {
        let rng = Rng::from_seed([34; 32]);
        let mut plaintext = MLSPlaintext::application(vec![0], 0, LeafIndex(0), vec![1]);
        plaintext.sign(&SignaturePrivateKey::generate(SCHEME, &rng).unwrap()).unwrap();
        let mut encoded = tls::to_bytes(&plaintext).unwrap();

        // Rewrite the content type to handshake; the application body now reads as an
        // operation with a bogus tag.
        let type_offset = 1 + plaintext.group_id.len() + 4 + 4;
        encoded[type_offset] = 1;
        encoded[type_offset + 1] = 0x77;
        assert!(matches!(
            tls::from_bytes_with::<MLSPlaintext, _>(&encoded, SUITE),
            Err(Error::InvalidMessageType(0x77))
        ));
    }

    #[test]
    fn ciphertext_wire_round_trip() {
        let ciphertext = MLSCiphertext {
            group_id: vec![0, 1, 2, 3],
            epoch: 9,
            content_type: ContentType::Application,
            sender_data_nonce: vec![0xab; 12],
            encrypted_sender_data: vec![0xcd; 24],
            ciphertext: vec![0xef; 100],
        };
        let encoded = tls::to_bytes(&ciphertext).unwrap();
        let decoded: MLSCiphertext = tls::from_bytes(&encoded).unwrap();
        assert_eq!(decoded, ciphertext);
        assert_eq!(tls::to_bytes(&decoded).unwrap(), encoded);
    }

    #[test]
    fn welcome_round_trip() {
        let rng = Rng::from_seed([35; 32]);
        let tree = group_tree(&rng);

        let joiner_credential = credential(&rng, b"joiner");
        let joiner_cik = ClientInitKey::new(
            b"cik-id",
            &[SUITE],
            b"joiner init secret",
            joiner_credential,
        )
        .unwrap();

        let info = WelcomeInfo {
            version: PROTOCOL_VERSION,
            group_id: vec![0, 1, 2, 3],
            epoch: 4,
            tree,
            interim_transcript_hash: vec![0x55; 32],
            init_secret: Secret::from_slice(b"epoch init secret"),
        };

        let public = joiner_cik.find_init_key(SUITE).unwrap();
        let welcome = Welcome::new(joiner_cik.id(), &public, &info, &rng).unwrap();

        // Wire round trip.
        let encoded = tls::to_bytes(&welcome).unwrap();
        let decoded: Welcome = tls::from_bytes(&encoded).unwrap();
        assert_eq!(decoded, welcome);

        // The joiner can open it and sees the same snapshot.
        let private = joiner_cik.find_private_key(SUITE).unwrap();
        let opened = decoded.decrypt(private).unwrap();
        assert_eq!(opened, info);
        assert_eq!(opened.hash(SUITE).unwrap(), info.hash(SUITE).unwrap());

        // A different key cannot.
        let wrong = HpkePrivateKey::generate(SUITE, &rng).unwrap();
        assert!(decoded.decrypt(&wrong).is_err());
    }
}
