// SPDX-License-Identifier: MIT OR Apache-2.0

//! The ratchet tree: a left-balanced binary tree of DH key pairs over the group's members.
//!
//! Leaves belong to members, intermediate nodes to the subgroups below them. A member holds
//! private keys for exactly the nodes from its own leaf up to the root that it has learned
//! through path updates; everything else it knows only by public key. A node may be blank,
//! meaning nobody currently knows a key pair for it.
//!
//! Path updates walk a hash chain: starting from a fresh leaf secret, each step up the tree
//! applies the `"path"` expansion, and each node's key pair derives from its step's secret
//! under the `"node"` expansion. The final secret at the root becomes the epoch's update
//! secret. Senders encrypt each step's secret once per public key in the resolution of the
//! copath sibling below it, which is exactly the set of members that need it.
use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::crypto::hash::digest;
use crate::crypto::hkdf::hkdf_expand_label;
use crate::crypto::hpke::{hpke_open, hpke_seal};
use crate::crypto::kem::{HpkePrivateKey, HpkePublicKey};
use crate::crypto::{CipherSuite, Rng, Secret};
use crate::error::{Error, Result};
use crate::message::{DirectPath, RatchetNode};
use crate::tls::{self, DecodeWith, Encode, Reader};
use crate::tree_math::{
    LeafCount, LeafIndex, NodeCount, NodeIndex, copath, direct_path, left, level, right, root,
};

const LEAF_HASH_TAG: u8 = 0x01;
const PARENT_HASH_TAG: u8 = 0x02;

/// An occupied tree node. Leaves additionally carry the member's credential.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RatchetTreeNode {
    public_key: HpkePublicKey,
    private_key: Option<HpkePrivateKey>,
    credential: Option<Credential>,
}

impl RatchetTreeNode {
    pub fn public_key(&self) -> &HpkePublicKey {
        &self.public_key
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }
}

// Private keys are local knowledge; two views of the same tree agree on public state only.
impl PartialEq for RatchetTreeNode {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key && self.credential == other.credential
    }
}

impl Eq for RatchetTreeNode {}

impl Encode for RatchetTreeNode {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.public_key.encode(buf)?;
        tls::encode_optional(buf, self.credential.as_ref())
    }
}

impl DecodeWith<CipherSuite> for RatchetTreeNode {
    fn decode_with(r: &mut Reader<'_>, suite: CipherSuite) -> Result<Self> {
        Ok(Self {
            public_key: HpkePublicKey::decode_with(r, suite)?,
            private_key: None,
            credential: tls::decode_optional(r)?,
        })
    }
}

/// Secrets recovered from a transmitted [`DirectPath`], ready to merge into the tree.
///
/// Transmitted public keys below the receiver's overlap with the sender's path are installed
/// as-is; from the overlap upward the receiver knows the path secrets and re-derives the key
/// pairs itself.
#[derive(Debug)]
pub struct DecryptedPath {
    public_keys: Vec<HpkePublicKey>,
    overlap: usize,
    path_secrets: Vec<Secret>,
    pub root_path_secret: Secret,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RatchetTree {
    suite: CipherSuite,
    nodes: Vec<Option<RatchetTreeNode>>,
}

impl RatchetTree {
    pub fn new(suite: CipherSuite) -> Self {
        Self {
            suite,
            nodes: Vec::new(),
        }
    }

    /// Builds a tree of `secrets.len()` leaves, each leaf added and its path set in turn.
    pub fn from_secrets(
        suite: CipherSuite,
        secrets: &[Vec<u8>],
        credentials: &[Credential],
    ) -> Result<Self> {
        if secrets.len() != credentials.len() {
            return Err(Error::InvalidParameter("secret and credential counts differ"));
        }
        let mut tree = Self::new(suite);
        for (i, (secret, credential)) in secrets.iter().zip(credentials).enumerate() {
            let index = LeafIndex(i as u32);
            tree.add_leaf_secret(index, secret, credential.clone())?;
            tree.set_path(index, secret)?;
        }
        Ok(tree)
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }

    /// Number of leaf slots, blank or occupied.
    pub fn size(&self) -> LeafCount {
        LeafCount::from(NodeCount(self.nodes.len() as u32))
    }

    pub fn occupied(&self, leaf: LeafIndex) -> bool {
        let index = NodeIndex::from(leaf).0 as usize;
        index < self.nodes.len() && self.nodes[index].is_some()
    }

    /// Lowest blank leaf, or the append position past the current edge.
    pub fn leftmost_free(&self) -> LeafIndex {
        let size = self.size().0;
        (0..size)
            .map(LeafIndex)
            .find(|leaf| !self.occupied(*leaf))
            .unwrap_or(LeafIndex(size))
    }

    pub fn get_credential(&self, leaf: LeafIndex) -> Result<&Credential> {
        self.node(NodeIndex::from(leaf))?
            .credential
            .as_ref()
            .ok_or(Error::MissingNode)
    }

    /// Public key at an occupied leaf.
    pub fn leaf_public_key(&self, leaf: LeafIndex) -> Result<&HpkePublicKey> {
        Ok(&self.node(NodeIndex::from(leaf))?.public_key)
    }

    /// Installs a leaf whose key pair is derived from a secret the caller knows.
    pub fn add_leaf_secret(
        &mut self,
        index: LeafIndex,
        leaf_secret: &[u8],
        credential: Credential,
    ) -> Result<()> {
        let private = HpkePrivateKey::node_derive(self.suite, &Secret::from_slice(leaf_secret))?;
        self.add_leaf(index, private.public_key().clone(), Some(private), credential)
    }

    /// Installs a leaf known only by its public key, the adder's view of a joiner.
    pub fn add_leaf_public(
        &mut self,
        index: LeafIndex,
        public_key: HpkePublicKey,
        credential: Credential,
    ) -> Result<()> {
        self.add_leaf(index, public_key, None, credential)
    }

    /// Installs a leaf from a held key pair, the joiner's own view.
    pub fn add_leaf_private(
        &mut self,
        index: LeafIndex,
        private: HpkePrivateKey,
        credential: Credential,
    ) -> Result<()> {
        self.add_leaf(index, private.public_key().clone(), Some(private), credential)
    }

    fn add_leaf(
        &mut self,
        index: LeafIndex,
        public_key: HpkePublicKey,
        private_key: Option<HpkePrivateKey>,
        credential: Credential,
    ) -> Result<()> {
        let size = self.size().0;
        if index.0 > size {
            return Err(Error::InvalidIndex);
        }
        if index.0 == size {
            // Growing by one leaf appends a parent slot and the new leaf slot.
            if !self.nodes.is_empty() {
                self.nodes.push(None);
            }
            self.nodes.push(None);
        } else if self.occupied(index) {
            return Err(Error::InvalidParameter("leaf is occupied"));
        }

        let node = NodeIndex::from(index);
        self.nodes[node.0 as usize] = Some(RatchetTreeNode {
            public_key,
            private_key,
            credential: Some(credential),
        });

        // The nodes above the new leaf no longer cover their subtrees, they are filled in
        // again by the next path update.
        for ancestor in direct_path(node, self.size())? {
            self.nodes[ancestor.0 as usize] = None;
        }
        Ok(())
    }

    /// Blanks a leaf and everything above it. Applied when a member is removed.
    pub fn blank_path(&mut self, leaf: LeafIndex) -> Result<()> {
        let node = NodeIndex::from(leaf);
        if node.0 as usize >= self.nodes.len() {
            return Err(Error::InvalidIndex);
        }
        self.nodes[node.0 as usize] = None;
        for ancestor in direct_path(node, self.size())? {
            self.nodes[ancestor.0 as usize] = None;
        }
        Ok(())
    }

    /// Installs a fresh path derived from `leaf_secret` and returns the root path secret,
    /// the epoch's update secret.
    pub fn set_path(&mut self, leaf: LeafIndex, leaf_secret: &[u8]) -> Result<Secret> {
        let node = NodeIndex::from(leaf);
        if node.0 as usize >= self.nodes.len() {
            return Err(Error::InvalidIndex);
        }
        let dirpath = direct_path(node, self.size())?;
        let secrets = self.path_secret_chain(leaf_secret, dirpath.len() + 1)?;

        self.install_key_pair(node, HpkePrivateKey::node_derive(self.suite, &secrets[0])?);
        for (step, ancestor) in dirpath.iter().enumerate() {
            let private = HpkePrivateKey::node_derive(self.suite, &secrets[step + 1])?;
            self.install_key_pair(*ancestor, private);
        }
        Ok(secrets.last().cloned().expect("chain is never empty"))
    }

    /// Derives the same path as [`set_path`] and encrypts each step's secret to the members
    /// that need it: one HPKE ciphertext per public key in the resolution of the copath node
    /// below that step. Does not mutate the tree.
    pub fn encrypt(
        &self,
        leaf: LeafIndex,
        leaf_secret: &[u8],
        rng: &Rng,
    ) -> Result<(DirectPath, Secret)> {
        let node = NodeIndex::from(leaf);
        if node.0 as usize >= self.nodes.len() {
            return Err(Error::InvalidIndex);
        }
        let size = self.size();
        let dirpath = direct_path(node, size)?;
        let copath_nodes = copath(node, size)?;
        let secrets = self.path_secret_chain(leaf_secret, dirpath.len() + 1)?;

        let leaf_private = HpkePrivateKey::node_derive(self.suite, &secrets[0])?;
        let mut nodes = vec![RatchetNode {
            public_key: leaf_private.public_key().clone(),
            node_secrets: Vec::new(),
        }];

        for (step, sibling) in copath_nodes.iter().enumerate() {
            let path_secret = &secrets[step + 1];
            let private = HpkePrivateKey::node_derive(self.suite, path_secret)?;
            let mut node_secrets = Vec::new();
            for target in self.resolution(*sibling) {
                let public_key = self.public_key(target)?;
                node_secrets.push(hpke_seal(
                    self.suite,
                    "member",
                    public_key,
                    None,
                    path_secret.as_bytes(),
                    rng,
                )?);
            }
            nodes.push(RatchetNode {
                public_key: private.public_key().clone(),
                node_secrets,
            });
        }

        let update_secret = secrets.last().cloned().expect("chain is never empty");
        Ok((DirectPath { nodes }, update_secret))
    }

    /// Recovers the path secrets addressed to us from a sender's transmitted path.
    ///
    /// The lowest node on the sender's direct path covering our leaf is the overlap; its
    /// copath resolution contains exactly one node we hold a private key for. Decrypting
    /// that ciphertext yields the path secret at the overlap, and everything above derives
    /// by walking the chain.
    pub fn decrypt(&self, from: LeafIndex, path: &DirectPath) -> Result<DecryptedPath> {
        let node = NodeIndex::from(from);
        let size = self.size();
        let dirpath = direct_path(node, size)?;
        let copath_nodes = copath(node, size)?;
        if path.nodes.len() != dirpath.len() + 1 {
            return Err(Error::InvalidPath("transmitted path length"));
        }

        let mut overlap = None;
        'search: for (step, sibling) in copath_nodes.iter().enumerate() {
            let res = self.resolution(*sibling);
            for (position, target) in res.iter().enumerate() {
                if self.private_key(*target).is_some() {
                    overlap = Some((step, position, *target));
                    break 'search;
                }
            }
        }
        let (step, position, holder) = overlap.ok_or(Error::MissingNode)?;

        let ciphertext = path.nodes[step + 1]
            .node_secrets
            .get(position)
            .ok_or(Error::InvalidPath("resolution does not match ciphertexts"))?;
        let private = self.private_key(holder).ok_or(Error::MissingNode)?;
        let plaintext = hpke_open(self.suite, "member", ciphertext, private, None)?;

        let mut path_secrets = vec![Secret::from_bytes(plaintext)];
        for _ in step + 1..dirpath.len() {
            let next = hkdf_expand_label(
                self.suite,
                path_secrets.last().expect("chain is never empty"),
                "path",
                b"",
                self.suite.hash_len(),
            )?;
            path_secrets.push(next);
        }

        let root_path_secret = path_secrets.last().cloned().expect("chain is never empty");
        Ok(DecryptedPath {
            public_keys: path.nodes.iter().map(|n| n.public_key.clone()).collect(),
            overlap: step + 1,
            path_secrets,
            root_path_secret,
        })
    }

    /// Installs a decrypted path: transmitted public keys below the overlap, re-derived key
    /// pairs from the overlap upward. Re-derivation must agree with the transmitted keys.
    pub fn merge_path(&mut self, from: LeafIndex, decrypted: &DecryptedPath) -> Result<()> {
        let node = NodeIndex::from(from);
        let mut targets = vec![node];
        targets.extend(direct_path(node, self.size())?);
        if decrypted.public_keys.len() != targets.len()
            || decrypted.path_secrets.len() != targets.len() - decrypted.overlap
        {
            return Err(Error::InvalidPath("decrypted path length"));
        }

        for (index, target) in targets.iter().enumerate() {
            if index < decrypted.overlap {
                self.merge_public(*target, decrypted.public_keys[index].clone());
            } else {
                let path_secret = &decrypted.path_secrets[index - decrypted.overlap];
                let private = HpkePrivateKey::node_derive(self.suite, path_secret)?;
                if private.public_key() != &decrypted.public_keys[index] {
                    return Err(Error::IncompatibleNodes);
                }
                self.install_key_pair(*target, private);
            }
        }
        Ok(())
    }

    /// Hash of the subtree under the root.
    pub fn root_hash(&self) -> Result<Vec<u8>> {
        if self.nodes.is_empty() {
            return Err(Error::InvalidIndex);
        }
        self.node_hash(root(self.size()))
    }

    /// Minimal set of occupied nodes whose subtrees cover `node`. Empty below blank leaves.
    pub fn resolution(&self, node: NodeIndex) -> Vec<NodeIndex> {
        if self.nodes[node.0 as usize].is_some() {
            return vec![node];
        }
        if level(node) == 0 {
            return Vec::new();
        }
        let mut out = self.resolution(left(node).expect("intermediate node"));
        out.extend(self.resolution(
            right(node, self.size()).expect("intermediate node"),
        ));
        out
    }

    /// True when every occupied leaf carries a credential.
    pub fn check_credentials(&self) -> bool {
        (0..self.size().0).all(|i| {
            match &self.nodes[NodeIndex::from(LeafIndex(i)).0 as usize] {
                Some(node) => node.credential.is_some(),
                None => true,
            }
        })
    }

    /// True when our held private keys are consistent with the public tree as seen from
    /// `leaf`: the leaf itself holds a key pair and every held private on the direct path
    /// matches its node's public key.
    pub fn check_invariant(&self, leaf: LeafIndex) -> bool {
        let node = NodeIndex::from(leaf);
        let Ok(dirpath) = direct_path(node, self.size()) else {
            return false;
        };
        let mut targets = vec![node];
        targets.extend(dirpath);
        for (index, target) in targets.iter().enumerate() {
            match &self.nodes[target.0 as usize] {
                Some(entry) => match &entry.private_key {
                    Some(private) => {
                        if private.public_key() != &entry.public_key {
                            return false;
                        }
                    }
                    None if index == 0 => return false,
                    None => {}
                },
                None if index == 0 => return false,
                None => {}
            }
        }
        true
    }

    fn node(&self, index: NodeIndex) -> Result<&RatchetTreeNode> {
        self.nodes
            .get(index.0 as usize)
            .ok_or(Error::InvalidIndex)?
            .as_ref()
            .ok_or(Error::MissingNode)
    }

    fn public_key(&self, index: NodeIndex) -> Result<&HpkePublicKey> {
        Ok(&self.node(index)?.public_key)
    }

    fn private_key(&self, index: NodeIndex) -> Option<&HpkePrivateKey> {
        self.nodes
            .get(index.0 as usize)?
            .as_ref()?
            .private_key
            .as_ref()
    }

    fn install_key_pair(&mut self, index: NodeIndex, private: HpkePrivateKey) {
        let slot = &mut self.nodes[index.0 as usize];
        let credential = slot.take().and_then(|node| node.credential);
        *slot = Some(RatchetTreeNode {
            public_key: private.public_key().clone(),
            private_key: Some(private),
            credential,
        });
    }

    fn merge_public(&mut self, index: NodeIndex, public_key: HpkePublicKey) {
        let slot = &mut self.nodes[index.0 as usize];
        match slot {
            Some(node) if node.public_key == public_key => {}
            Some(node) => {
                node.public_key = public_key;
                node.private_key = None;
            }
            None => {
                *slot = Some(RatchetTreeNode {
                    public_key,
                    private_key: None,
                    credential: None,
                });
            }
        }
    }

    fn path_secret_chain(&self, leaf_secret: &[u8], length: usize) -> Result<Vec<Secret>> {
        let mut secrets = vec![Secret::from_slice(leaf_secret)];
        while secrets.len() < length {
            let next = hkdf_expand_label(
                self.suite,
                secrets.last().expect("chain is never empty"),
                "path",
                b"",
                self.suite.hash_len(),
            )?;
            secrets.push(next);
        }
        Ok(secrets)
    }

    fn node_hash(&self, index: NodeIndex) -> Result<Vec<u8>> {
        let entry = self.nodes[index.0 as usize].as_ref();
        if level(index) == 0 {
            let mut buf = vec![LEAF_HASH_TAG];
            tls::encode_optional(&mut buf, entry.and_then(|node| node.credential.as_ref()))?;
            tls::encode_optional(&mut buf, entry.map(|node| &node.public_key))?;
            Ok(digest(self.suite, &[&buf]))
        } else {
            let mut buf = vec![PARENT_HASH_TAG];
            tls::encode_optional(&mut buf, entry.map(|node| &node.public_key))?;
            let size = self.size();
            buf.extend(self.node_hash(left(index)?)?);
            buf.extend(self.node_hash(right(index, size)?)?);
            Ok(digest(self.suite, &[&buf]))
        }
    }
}

impl PartialEq for RatchetTree {
    fn eq(&self, other: &Self) -> bool {
        self.suite == other.suite && self.nodes == other.nodes
    }
}

impl Eq for RatchetTree {}

impl Encode for RatchetTree {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        let mut payload = Vec::new();
        for node in &self.nodes {
            tls::encode_optional(&mut payload, node.as_ref())?;
        }
        tls::encode_opaque(buf, 4, &payload)
    }
}

impl DecodeWith<CipherSuite> for RatchetTree {
    fn decode_with(r: &mut Reader<'_>, suite: CipherSuite) -> Result<Self> {
        let mut frame = r.take_framed(4)?;
        let mut nodes = Vec::new();
        while !frame.is_empty() {
            nodes.push(tls::decode_optional_with(&mut frame, suite)?);
        }
        if !nodes.is_empty() && nodes.len() % 2 == 0 {
            return Err(Error::TlsSyntax("even node count"));
        }
        Ok(Self { suite, nodes })
    }
}
