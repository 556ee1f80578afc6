// SPDX-License-Identifier: MIT OR Apache-2.0

//! `treekem` implements the core of an MLS-style group key agreement protocol: N parties
//! agree on a shared secret, evolve it as members join, refresh keys or leave, and derive
//! per-sender, per-generation symmetric keys for authenticated application-message
//! encryption.
//!
//! Compromising a current state does not reveal past traffic (forward secrecy), and after
//! one honest key update a past compromise no longer yields future secrets (post-compromise
//! security).
//!
//! ## Building blocks
//!
//! - [`tree_math`] and [`tree`]: the ratchet tree, a left-balanced binary tree of DH key
//!   pairs over the members. Joins, updates and removals each mutate a single root-to-leaf
//!   path and encrypt it once per copath subtree.
//! - [`key_schedule`]: the epoch secret cascade and the application key chain handing out
//!   forward-secret AEAD keys per sender and generation.
//! - [`group`]: the epoch state machine validating, applying, signing and sealing group
//!   messages.
//! - [`Session`]: a thin facade over wire bytes with a cache of pending next-states.
//! - [`tls`]: the deterministic presentation-language codec everything is hashed and
//!   transmitted with.
//! - [`crypto`]: typed facades over the suites' primitives, with an injectable RNG so tests
//!   replay byte-identically.
//!
//! ## Usage
//!
//! Two parties bootstrap a group from published [`ClientInitKey`] bundles:
//!
//! ```
//! use treekem::{CipherSuite, ClientInitKey, Credential, Rng, Session, SignatureScheme};
//! use treekem::crypto::sign::SignaturePrivateKey;
//!
//! # fn main() -> Result<(), treekem::Error> {
//! let rng = Rng::default();
//! let suites = [CipherSuite::X25519Sha256Aes128Gcm];
//!
//! let alice_key = SignaturePrivateKey::generate(SignatureScheme::Ed25519, &rng)?;
//! let alice_cred = Credential::basic_with_key(b"alice", alice_key);
//! let alice_cik = ClientInitKey::new(b"alice-init", &suites, &[0; 32], alice_cred)?;
//!
//! let bob_key = SignaturePrivateKey::generate(SignatureScheme::Ed25519, &rng)?;
//! let bob_cred = Credential::basic_with_key(b"bob", bob_key);
//! let bob_cik = ClientInitKey::new(b"bob-init", &suites, &[1; 32], bob_cred)?;
//!
//! let (mut alice, welcome, add) = Session::start(b"group", &alice_cik, &bob_cik, &rng)?;
//! let mut bob = Session::join(&bob_cik, &welcome, &add)?;
//!
//! let message = alice.protect(b"hello", &rng)?;
//! assert_eq!(bob.unprotect(&message)?, b"hello");
//! # Ok(())
//! # }
//! ```
//!
//! The crate is a library only: no transport, no persistence format, no delivery ordering.
//! Handshakes must reach [`Session::handle`] in epoch order; application messages may
//! reorder within a sender's chain window.
mod client_init_key;
mod credential;
pub mod crypto;
mod error;
pub mod group;
pub mod key_schedule;
mod message;
mod session;
pub mod tls;
pub mod tree;
pub mod tree_math;

pub use client_init_key::ClientInitKey;
pub use credential::Credential;
pub use crypto::{CipherSuite, Rng, Secret, SignatureScheme};
pub use error::{Error, Result};
pub use group::State;
pub use key_schedule::{AppKeyChain, EpochSecrets};
pub use message::{
    Add, ContentType, DirectPath, GroupContext, GroupOperation, MLSCiphertext, MLSPlaintext,
    PROTOCOL_VERSION, RatchetNode, Remove, Update, Welcome, WelcomeInfo,
};
pub use session::Session;
pub use tree::{DecryptedPath, RatchetTree};
pub use tree_math::{LeafCount, LeafIndex, NodeCount, NodeIndex};
