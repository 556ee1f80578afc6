// SPDX-License-Identifier: MIT OR Apache-2.0

//! The epoch state machine.
//!
//! A [`State`] is one member's view of the group at one epoch. Every transition (creating,
//! adding, updating, removing, or handling a peer's handshake) returns a fresh state and
//! leaves the current one untouched, so a failed handshake cannot corrupt anything. The only
//! interior mutation is the application key chain's sliding window, used by
//! [`protect`](State::protect) and [`unprotect`](State::unprotect).
//!
//! A handshake advances the epoch in lockstep everywhere: fold the operation into the
//! transcript, apply the tree mutation, re-derive the epoch secrets over the new group
//! context, then check the confirmation MAC before anything is committed.
use serde::{Deserialize, Serialize};

use crate::client_init_key::ClientInitKey;
use crate::credential::Credential;
use crate::crypto::aead::{aead_open, aead_seal};
use crate::crypto::hash::{digest, hmac_sign, hmac_verify};
use crate::crypto::hkdf::{hkdf_expand_label, zero_bytes};
use crate::crypto::kem::HpkePrivateKey;
use crate::crypto::sign::SignaturePrivateKey;
use crate::crypto::{CipherSuite, Rng, Secret};
use crate::error::{Error, Result};
use crate::key_schedule::{AppKeyChain, EpochSecrets, derive_epoch_secrets};
use crate::message::{
    Add, ContentType, GroupContext, GroupOperation, MLSCiphertext, MLSPlaintext, MessageContent,
    PROTOCOL_VERSION, Remove, Update, Welcome, WelcomeInfo,
};
use crate::tls::{self, Encode as _};
use crate::tree::RatchetTree;
use crate::tree_math::LeafIndex;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct State {
    suite: CipherSuite,
    group_id: Vec<u8>,
    epoch: u32,
    tree: RatchetTree,
    confirmed_transcript_hash: Vec<u8>,
    interim_transcript_hash: Vec<u8>,
    epoch_secret: Secret,
    application_secret: Secret,
    confirmation_key: Secret,
    init_secret: Secret,
    index: LeafIndex,
    identity_priv: SignaturePrivateKey,
    application_keys: AppKeyChain,
}

impl State {
    /// Creates a one-member group: the creator at leaf zero, epoch zero, zero init secret.
    pub fn new(
        group_id: &[u8],
        suite: CipherSuite,
        leaf_priv: HpkePrivateKey,
        credential: Credential,
    ) -> Result<Self> {
        if leaf_priv.cipher_suite() != suite {
            return Err(Error::InvalidParameter("leaf key suite mismatch"));
        }
        let identity_priv = credential.signing_key()?.clone();
        let mut tree = RatchetTree::new(suite);
        tree.add_leaf_private(LeafIndex(0), leaf_priv, credential)?;

        let nh = suite.hash_len();
        let mut state = Self {
            suite,
            group_id: group_id.to_vec(),
            epoch: 0,
            tree,
            confirmed_transcript_hash: Vec::new(),
            interim_transcript_hash: Vec::new(),
            epoch_secret: Secret::zero(nh),
            application_secret: Secret::zero(nh),
            confirmation_key: Secret::zero(nh),
            init_secret: Secret::zero(nh),
            index: LeafIndex(0),
            identity_priv,
            application_keys: AppKeyChain::new(suite, Secret::zero(nh)),
        };
        state.update_epoch_secrets(&zero_bytes(nh))?;
        Ok(state)
    }

    /// Joins a group from a Welcome and the Add that inserted us.
    pub fn from_welcome(
        my_cik: &ClientInitKey,
        welcome: &Welcome,
        handshake: &MLSPlaintext,
    ) -> Result<Self> {
        if welcome.client_init_key_id != my_cik.id() {
            return Err(Error::InvalidParameter(
                "welcome addressed to a different init key",
            ));
        }
        let suite = welcome.cipher_suite;
        let leaf_priv = my_cik
            .find_private_key(suite)
            .ok_or(Error::MissingNode)?
            .clone();
        let info = welcome.decrypt(&leaf_priv)?;

        let GroupOperation::Add(add) = handshake.operation()? else {
            return Err(Error::Protocol("welcome must pair with an add"));
        };
        if handshake.group_id != info.group_id || handshake.epoch != info.epoch {
            return Err(Error::Protocol("handshake does not match welcome"));
        }
        if add.welcome_info_hash != info.hash(suite)? {
            return Err(Error::Protocol("welcome info hash mismatch"));
        }

        // The adder signs with its credential in the tree we were just handed.
        let sender_key = info
            .tree
            .get_credential(handshake.sender)?
            .public_key()
            .clone();
        if !handshake.verify(&sender_key)? {
            return Err(Error::Protocol("invalid handshake signature"));
        }

        let identity_priv = my_cik.credential().signing_key()?.clone();
        let nh = suite.hash_len();
        let mut state = Self {
            suite,
            group_id: info.group_id.clone(),
            epoch: info.epoch,
            tree: info.tree.clone(),
            confirmed_transcript_hash: Vec::new(),
            interim_transcript_hash: info.interim_transcript_hash.clone(),
            epoch_secret: Secret::zero(nh),
            application_secret: Secret::zero(nh),
            confirmation_key: Secret::zero(nh),
            init_secret: info.init_secret.clone(),
            index: add.index,
            identity_priv,
            application_keys: AppKeyChain::new(suite, Secret::zero(nh)),
        };
        state
            .tree
            .add_leaf_private(add.index, leaf_priv, my_cik.credential().clone())?;

        // Same epoch advance every existing member performs for this Add.
        state.confirmed_transcript_hash = digest(
            suite,
            &[&info.interim_transcript_hash, &handshake.operation_content()?],
        );
        state.epoch += 1;
        state.update_epoch_secrets(&zero_bytes(nh))?;
        if !hmac_verify(
            suite,
            state.confirmation_key.as_bytes(),
            &state.confirmed_transcript_hash,
            handshake.confirmation()?,
        ) {
            return Err(Error::Protocol("confirmation mismatch"));
        }
        state.interim_transcript_hash = digest(
            suite,
            &[&state.confirmed_transcript_hash, &handshake.auth_data()?],
        );
        Ok(state)
    }

    /// Creates a group with a peer: picks the first suite in our preference order the peer
    /// also supports, then adds the peer.
    pub fn negotiate(
        group_id: &[u8],
        my_cik: &ClientInitKey,
        peer_cik: &ClientInitKey,
        rng: &Rng,
    ) -> Result<(Welcome, MLSPlaintext, Self)> {
        let suite = my_cik
            .cipher_suites()
            .iter()
            .copied()
            .find(|suite| peer_cik.cipher_suites().contains(suite))
            .ok_or(Error::InvalidParameter("no common cipher suite"))?;
        let leaf_priv = my_cik
            .find_private_key(suite)
            .ok_or(Error::MissingNode)?
            .clone();
        let state = Self::new(group_id, suite, leaf_priv, my_cik.credential().clone())?;
        state.add(peer_cik, rng)
    }

    /// Adds a joiner at the lowest blank leaf, or past the edge.
    pub fn add(
        &self,
        cik: &ClientInitKey,
        rng: &Rng,
    ) -> Result<(Welcome, MLSPlaintext, Self)> {
        self.add_at(self.tree.leftmost_free(), cik, rng)
    }

    /// Adds a joiner at a chosen slot.
    pub fn add_at(
        &self,
        index: LeafIndex,
        cik: &ClientInitKey,
        rng: &Rng,
    ) -> Result<(Welcome, MLSPlaintext, Self)> {
        let public = cik.find_init_key(self.suite)?;
        let info = self.welcome_info();
        let welcome = Welcome::new(cik.id(), &public, &info, rng)?;
        let add = Add {
            index,
            init_key: cik.clone(),
            welcome_info_hash: info.hash(self.suite)?,
        };

        let mut next = self.clone();
        let update_secret = next.apply_add(&add)?;
        let (plaintext, next) =
            Self::ratchet_and_sign(next, GroupOperation::Add(add), update_secret.as_bytes())?;
        Ok((welcome, plaintext, next))
    }

    /// Rotates our own leaf and every key above it from a fresh secret.
    pub fn update(&self, leaf_secret: &[u8], rng: &Rng) -> Result<(MLSPlaintext, Self)> {
        let mut next = self.clone();
        let (path, update_secret) = next.tree.encrypt(self.index, leaf_secret, rng)?;
        next.tree.set_path(self.index, leaf_secret)?;
        Self::ratchet_and_sign(
            next,
            GroupOperation::Update(Update { path }),
            update_secret.as_bytes(),
        )
    }

    /// Evicts a member: blanks its path, then re-keys our own with `evict_secret`. The
    /// removed member's leaf is absent from every resolution, so it cannot read the new
    /// path secrets.
    pub fn remove(
        &self,
        evict_secret: &[u8],
        removed: LeafIndex,
        rng: &Rng,
    ) -> Result<(MLSPlaintext, Self)> {
        if removed == self.index {
            return Err(Error::InvalidParameter("cannot remove own leaf"));
        }
        if removed.0 >= self.tree.size().0 {
            return Err(Error::InvalidIndex);
        }
        if !self.tree.occupied(removed) {
            return Err(Error::InvalidParameter("removed leaf is blank"));
        }

        let mut next = self.clone();
        next.tree.blank_path(removed)?;
        let (path, update_secret) = next.tree.encrypt(self.index, evict_secret, rng)?;
        next.tree.set_path(self.index, evict_secret)?;
        Self::ratchet_and_sign(
            next,
            GroupOperation::Remove(Remove { removed, path }),
            update_secret.as_bytes(),
        )
    }

    /// Processes a peer's handshake and returns the next epoch's state.
    ///
    /// Signature and confirmation are checked before the result is handed out; on any error
    /// the current state remains the valid one.
    pub fn handle(&self, handshake: &MLSPlaintext) -> Result<Self> {
        if handshake.group_id != self.group_id {
            return Err(Error::InvalidParameter("group id mismatch"));
        }
        if handshake.epoch != self.epoch {
            return Err(Error::Protocol("handshake for a different epoch"));
        }
        if handshake.sender == self.index {
            return Err(Error::InvalidParameter("cannot handle own handshake"));
        }
        let operation = handshake.operation()?;

        let sender_key = self
            .tree
            .get_credential(handshake.sender)?
            .public_key()
            .clone();
        if !handshake.verify(&sender_key)? {
            return Err(Error::Protocol("invalid handshake signature"));
        }

        let mut next = self.clone();
        let update_secret = match operation {
            GroupOperation::Add(add) => next.apply_add(add)?,
            GroupOperation::Update(update) => next.apply_update(handshake.sender, update)?,
            GroupOperation::Remove(remove) => next.apply_remove(handshake.sender, remove)?,
        };

        next.confirmed_transcript_hash = digest(
            self.suite,
            &[
                &self.interim_transcript_hash,
                &handshake.operation_content()?,
            ],
        );
        next.epoch += 1;
        next.update_epoch_secrets(update_secret.as_bytes())?;

        if !hmac_verify(
            self.suite,
            next.confirmation_key.as_bytes(),
            &next.confirmed_transcript_hash,
            handshake.confirmation()?,
        ) {
            return Err(Error::Protocol("confirmation mismatch"));
        }
        next.interim_transcript_hash = digest(
            self.suite,
            &[&next.confirmed_transcript_hash, &handshake.auth_data()?],
        );
        Ok(next)
    }

    /// Seals application data for the current epoch.
    pub fn protect(&mut self, data: &[u8], rng: &Rng) -> Result<MLSCiphertext> {
        let mut plaintext = MLSPlaintext::application(
            self.group_id.clone(),
            self.epoch,
            self.index,
            data.to_vec(),
        );
        plaintext.sign(&self.identity_priv)?;

        let keys = self.application_keys.next(self.index)?;
        let aad =
            MLSCiphertext::additional_data(&self.group_id, self.epoch, ContentType::Application)?;

        let sender_data_nonce = rng.random_vec(self.suite.aead_nonce_len())?;
        let mut sender_data = Vec::new();
        self.index.0.encode(&mut sender_data)?;
        keys.generation.encode(&mut sender_data)?;
        let (sender_key, sender_nonce) = self.sender_data_keys(&sender_data_nonce)?;
        let encrypted_sender_data = aead_seal(
            self.suite,
            sender_key.as_bytes(),
            &sender_nonce,
            &aad,
            &sender_data,
        )?;

        let content = plaintext.marshal_content(0)?;
        let content_nonce = xor(keys.nonce.as_bytes(), &sender_data_nonce);
        let ciphertext = aead_seal(
            self.suite,
            keys.key.as_bytes(),
            &content_nonce,
            &aad,
            &content,
        )?;

        Ok(MLSCiphertext {
            group_id: self.group_id.clone(),
            epoch: self.epoch,
            content_type: ContentType::Application,
            sender_data_nonce,
            encrypted_sender_data,
            ciphertext,
        })
    }

    /// Opens application data sealed for the current epoch.
    pub fn unprotect(&mut self, message: &MLSCiphertext) -> Result<Vec<u8>> {
        if message.group_id != self.group_id || message.epoch != self.epoch {
            return Err(Error::MissingState);
        }
        if message.content_type != ContentType::Application {
            return Err(Error::Protocol("unexpected content type"));
        }
        let aad =
            MLSCiphertext::additional_data(&self.group_id, self.epoch, message.content_type)?;

        let (sender_key, sender_nonce) = self.sender_data_keys(&message.sender_data_nonce)?;
        let sender_data = aead_open(
            self.suite,
            sender_key.as_bytes(),
            &sender_nonce,
            &aad,
            &message.encrypted_sender_data,
        )?;
        if sender_data.len() != 8 {
            return Err(Error::Protocol("malformed sender data"));
        }
        let sender = LeafIndex(u32::from_be_bytes(
            sender_data[..4].try_into().expect("checked length"),
        ));
        let generation = u32::from_be_bytes(sender_data[4..].try_into().expect("checked length"));
        if sender.0 >= self.tree.size().0 {
            return Err(Error::InvalidIndex);
        }
        let sender_verify_key = self.tree.get_credential(sender)?.public_key().clone();

        let keys = self.application_keys.get(sender, generation)?;
        let content_nonce = xor(keys.nonce.as_bytes(), &message.sender_data_nonce);
        let content = aead_open(
            self.suite,
            keys.key.as_bytes(),
            &content_nonce,
            &aad,
            &message.ciphertext,
        )?;

        let plaintext = MLSPlaintext::from_content(
            self.suite,
            message.group_id.clone(),
            message.epoch,
            sender,
            message.content_type,
            &content,
        )?;
        if !plaintext.verify(&sender_verify_key)? {
            return Err(Error::Protocol("invalid message signature"));
        }
        match plaintext.content {
            MessageContent::Application(data) => Ok(data),
            MessageContent::Handshake { .. } => Err(Error::Protocol("unexpected content type")),
        }
    }

    /// Static access to the key schedule, for interop checks and external drivers.
    pub fn derive_epoch_secrets(
        suite: CipherSuite,
        init_secret: &Secret,
        update_secret: &[u8],
        group_context: &[u8],
    ) -> Result<EpochSecrets> {
        derive_epoch_secrets(suite, init_secret, update_secret, group_context)
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn group_id(&self) -> &[u8] {
        &self.group_id
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn index(&self) -> LeafIndex {
        self.index
    }

    pub fn tree(&self) -> &RatchetTree {
        &self.tree
    }

    pub fn epoch_secret(&self) -> &Secret {
        &self.epoch_secret
    }

    pub fn application_secret(&self) -> &Secret {
        &self.application_secret
    }

    pub fn confirmation_key(&self) -> &Secret {
        &self.confirmation_key
    }

    pub fn init_secret(&self) -> &Secret {
        &self.init_secret
    }

    // Pre-mutation snapshot handed to a joiner inside the Welcome.
    fn welcome_info(&self) -> WelcomeInfo {
        WelcomeInfo {
            version: PROTOCOL_VERSION,
            group_id: self.group_id.clone(),
            epoch: self.epoch,
            tree: self.tree.clone(),
            interim_transcript_hash: self.interim_transcript_hash.clone(),
            init_secret: self.init_secret.clone(),
        }
    }

    // Validates and applies an Add to the tree. An Add carries no fresh entropy, its
    // update secret is all zeroes.
    fn apply_add(&mut self, add: &Add) -> Result<Secret> {
        let size = self.tree.size().0;
        if add.index.0 > size {
            return Err(Error::InvalidIndex);
        }
        if add.index.0 < size && self.tree.occupied(add.index) {
            return Err(Error::InvalidParameter("target leaf occupied"));
        }
        if !add.init_key.verify()? {
            return Err(Error::Protocol("invalid client init key signature"));
        }
        let expected = self.welcome_info().hash(self.suite)?;
        if expected != add.welcome_info_hash {
            return Err(Error::Protocol("welcome info hash mismatch"));
        }
        let public = add.init_key.find_init_key(self.suite)?;
        self.tree
            .add_leaf_public(add.index, public, add.init_key.credential().clone())?;
        Ok(Secret::zero(self.suite.hash_len()))
    }

    fn apply_update(&mut self, sender: LeafIndex, update: &Update) -> Result<Secret> {
        let decrypted = self.tree.decrypt(sender, &update.path)?;
        self.tree.merge_path(sender, &decrypted)?;
        Ok(decrypted.root_path_secret)
    }

    fn apply_remove(&mut self, sender: LeafIndex, remove: &Remove) -> Result<Secret> {
        self.tree.blank_path(remove.removed)?;
        let decrypted = self.tree.decrypt(sender, &remove.path)?;
        self.tree.merge_path(sender, &decrypted)?;
        Ok(decrypted.root_path_secret)
    }

    // Folds the signed operation into the transcript and advances the key schedule on a
    // state whose tree mutation is already applied.
    fn ratchet_and_sign(
        mut next: Self,
        operation: GroupOperation,
        update_secret: &[u8],
    ) -> Result<(MLSPlaintext, Self)> {
        let suite = next.suite;
        let mut plaintext = MLSPlaintext::handshake(
            next.group_id.clone(),
            next.epoch,
            next.index,
            operation,
        );

        next.confirmed_transcript_hash = digest(
            suite,
            &[
                &next.interim_transcript_hash,
                &plaintext.operation_content()?,
            ],
        );
        next.epoch += 1;
        next.update_epoch_secrets(update_secret)?;

        let confirmation = hmac_sign(
            suite,
            next.confirmation_key.as_bytes(),
            &next.confirmed_transcript_hash,
        );
        plaintext.set_confirmation(confirmation)?;
        plaintext.sign(&next.identity_priv)?;

        next.interim_transcript_hash = digest(
            suite,
            &[&next.confirmed_transcript_hash, &plaintext.auth_data()?],
        );
        Ok((plaintext, next))
    }

    // Re-derives the working secrets over the current group context and installs a fresh
    // application key chain. Secrets of the previous epoch that are not carried forward are
    // dropped here.
    fn update_epoch_secrets(&mut self, update_secret: &[u8]) -> Result<()> {
        let context = GroupContext {
            group_id: self.group_id.clone(),
            epoch: self.epoch,
            tree_hash: self.tree.root_hash()?,
            transcript_hash: self.confirmed_transcript_hash.clone(),
        };
        let encoded = tls::to_bytes(&context)?;
        let secrets = derive_epoch_secrets(self.suite, &self.init_secret, update_secret, &encoded)?;
        self.epoch_secret = secrets.epoch_secret;
        self.application_secret = secrets.application_secret;
        self.confirmation_key = secrets.confirmation_key;
        self.init_secret = secrets.init_secret;
        self.application_keys = AppKeyChain::new(self.suite, self.application_secret.clone());
        Ok(())
    }

    fn sender_data_keys(&self, sender_data_nonce: &[u8]) -> Result<(Secret, Vec<u8>)> {
        let key = hkdf_expand_label(
            self.suite,
            &self.application_secret,
            "sender data key",
            b"",
            self.suite.aead_key_len(),
        )?;
        let base = hkdf_expand_label(
            self.suite,
            &self.application_secret,
            "sender data nonce",
            b"",
            self.suite.aead_nonce_len(),
        )?;
        Ok((key, xor(base.as_bytes(), sender_data_nonce)))
    }
}

// Shared group state only: per-member fields (leaf index, identity key, chain windows) are
// local knowledge and two honest members at the same epoch must compare equal without them.
impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.suite == other.suite
            && self.group_id == other.group_id
            && self.epoch == other.epoch
            && self.tree == other.tree
            && self.confirmed_transcript_hash == other.confirmed_transcript_hash
            && self.interim_transcript_hash == other.interim_transcript_hash
            && self.epoch_secret == other.epoch_secret
            && self.application_secret == other.application_secret
            && self.confirmation_key == other.confirmation_key
            && self.init_secret == other.init_secret
    }
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}
