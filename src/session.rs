// SPDX-License-Identifier: MIT OR Apache-2.0

//! Facade over the epoch state machine for driving a group from wire bytes.
//!
//! A session keeps a small cache of states keyed by epoch and a pending next-state for our
//! own outbound handshake. Messages we sent come back to us through the same broadcast
//! channel as everyone else's; [`handle`](Session::handle) recognizes them, checks the echo
//! against what we transmitted and installs the cached state instead of processing the
//! handshake twice.
use std::collections::BTreeMap;

use crate::client_init_key::ClientInitKey;
use crate::crypto::{CipherSuite, Rng};
use crate::error::{Error, Result};
use crate::group::State;
use crate::message::{MLSCiphertext, MLSPlaintext, Welcome};
use crate::tls;
use crate::tree_math::LeafIndex;

pub struct Session {
    states: BTreeMap<u32, State>,
    current_epoch: u32,
    outbound_cache: Option<(Vec<u8>, State)>,
}

impl Session {
    /// Creator path: negotiate a suite with the peer's bundle, produce the Welcome and Add
    /// wire messages, and a session already at the post-add epoch.
    pub fn start(
        group_id: &[u8],
        my_cik: &ClientInitKey,
        peer_cik: &ClientInitKey,
        rng: &Rng,
    ) -> Result<(Self, Vec<u8>, Vec<u8>)> {
        let (welcome, add, state) = State::negotiate(group_id, my_cik, peer_cik, rng)?;
        let welcome_bytes = tls::to_bytes(&welcome)?;
        let add_bytes = tls::to_bytes(&add)?;
        let mut session = Self {
            states: BTreeMap::new(),
            current_epoch: state.epoch(),
            outbound_cache: None,
        };
        session.states.insert(state.epoch(), state);
        Ok((session, welcome_bytes, add_bytes))
    }

    /// Joiner path: decode the Welcome and the Add that inserted us.
    pub fn join(my_cik: &ClientInitKey, welcome: &[u8], add: &[u8]) -> Result<Self> {
        let welcome: Welcome = tls::from_bytes(welcome)?;
        let add: MLSPlaintext = tls::from_bytes_with(add, welcome.cipher_suite)?;
        let state = State::from_welcome(my_cik, &welcome, &add)?;
        let mut session = Self {
            states: BTreeMap::new(),
            current_epoch: state.epoch(),
            outbound_cache: None,
        };
        session.states.insert(state.epoch(), state);
        Ok(session)
    }

    /// Proposes adding a peer. Returns Welcome and Add wire bytes; our own next state is
    /// cached until the Add echoes back through [`handle`](Self::handle).
    pub fn add(&mut self, peer_cik: &ClientInitKey, rng: &Rng) -> Result<(Vec<u8>, Vec<u8>)> {
        let (welcome, add, next) = self.current_state()?.add(peer_cik, rng)?;
        let welcome_bytes = tls::to_bytes(&welcome)?;
        let add_bytes = tls::to_bytes(&add)?;
        self.outbound_cache = Some((add_bytes.clone(), next));
        Ok((welcome_bytes, add_bytes))
    }

    /// Proposes rotating our own leaf with a fresh secret.
    pub fn update(&mut self, leaf_secret: &[u8], rng: &Rng) -> Result<Vec<u8>> {
        let (update, next) = self.current_state()?.update(leaf_secret, rng)?;
        let update_bytes = tls::to_bytes(&update)?;
        self.outbound_cache = Some((update_bytes.clone(), next));
        Ok(update_bytes)
    }

    /// Proposes evicting the member at `index`.
    pub fn remove(&mut self, evict_secret: &[u8], index: u32, rng: &Rng) -> Result<Vec<u8>> {
        let (remove, next) = self
            .current_state()?
            .remove(evict_secret, LeafIndex(index), rng)?;
        let remove_bytes = tls::to_bytes(&remove)?;
        self.outbound_cache = Some((remove_bytes.clone(), next));
        Ok(remove_bytes)
    }

    /// Processes a broadcast handshake, advancing to the next epoch.
    ///
    /// Our own echoed handshake must match the transmitted bytes and installs the cached
    /// next state. Handshakes for epochs we do not hold a state for are rejected.
    pub fn handle(&mut self, message: &[u8]) -> Result<()> {
        let (suite, my_index) = {
            let state = self.current_state()?;
            (state.cipher_suite(), state.index())
        };
        let handshake: MLSPlaintext = tls::from_bytes_with(message, suite)?;
        if handshake.epoch != self.current_epoch {
            return Err(Error::MissingState);
        }

        if handshake.sender == my_index {
            let (sent, next) = self
                .outbound_cache
                .take()
                .ok_or(Error::Protocol("received own handshake without sending"))?;
            if sent != message {
                return Err(Error::Protocol("echoed handshake differs from sent"));
            }
            self.add_state(handshake.epoch, next);
            return Ok(());
        }

        let next = self.current_state()?.handle(&handshake)?;
        self.add_state(handshake.epoch, next);
        Ok(())
    }

    /// Seals application bytes under the current epoch.
    pub fn protect(&mut self, plaintext: &[u8], rng: &Rng) -> Result<Vec<u8>> {
        let message = self.current_state_mut()?.protect(plaintext, rng)?;
        tls::to_bytes(&message)
    }

    /// Opens application bytes with the state of the epoch they were sealed under.
    pub fn unprotect(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        let ciphertext: MLSCiphertext = tls::from_bytes(message)?;
        let state = self
            .states
            .get_mut(&ciphertext.epoch)
            .ok_or(Error::MissingState)?;
        state.unprotect(&ciphertext)
    }

    pub fn current_epoch(&self) -> u32 {
        self.current_epoch
    }

    pub fn index(&self) -> Result<u32> {
        Ok(self.current_state()?.index().0)
    }

    pub fn cipher_suite(&self) -> Result<CipherSuite> {
        Ok(self.current_state()?.cipher_suite())
    }

    pub fn current_state(&self) -> Result<&State> {
        self.states
            .get(&self.current_epoch)
            .ok_or(Error::MissingState)
    }

    fn current_state_mut(&mut self) -> Result<&mut State> {
        self.states
            .get_mut(&self.current_epoch)
            .ok_or(Error::MissingState)
    }

    fn add_state(&mut self, prior_epoch: u32, state: State) {
        let epoch = state.epoch();
        self.states.insert(epoch, state);
        if prior_epoch == self.current_epoch || self.states.len() == 1 {
            self.current_epoch = epoch;
        }
    }
}

// Sessions compare equal when their overlapping epochs hold equal states. Used by the
// multi-party tests to assert convergence.
impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        if self.current_epoch != other.current_epoch {
            return false;
        }
        self.states.iter().all(|(epoch, state)| {
            other
                .states
                .get(epoch)
                .map(|theirs| theirs == state)
                .unwrap_or(true)
        })
    }
}
