// SPDX-License-Identifier: MIT OR Apache-2.0

//! The epoch secret cascade and the per-sender application key chain.
//!
//! Each accepted handshake folds the epoch's update secret into the running init secret and
//! fans the result out into the epoch's working secrets. The application secret then seeds
//! one symmetric chain per leaf, producing a fresh AEAD key and nonce for every message
//! generation. Chain heads only ever move forward; once a generation's key has been handed
//! out, the material behind it is gone.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::hkdf::{derive_secret, hkdf_expand_label, hkdf_extract};
use crate::crypto::{CipherSuite, Secret};
use crate::error::{Error, Result};
use crate::tls::Encode as _;
use crate::tree_math::LeafIndex;

/// How far ahead of a sender's chain head a requested generation may run.
pub const MAX_GENERATION_SKIP: u32 = 1000;

/// How many skipped generations stay available behind the newest consumed one, for
/// out-of-order delivery inside an epoch.
pub const OUT_OF_ORDER_WINDOW: u32 = 5;

/// Working secrets of one epoch.
#[derive(Clone, Debug, PartialEq)]
pub struct EpochSecrets {
    pub epoch_secret: Secret,
    pub application_secret: Secret,
    pub confirmation_key: Secret,
    pub init_secret: Secret,
}

/// Derives the secrets of the next epoch from the previous init secret, the update secret
/// contributed by the handshake, and the encoded group context.
///
/// Pure: fixed inputs give bit-identical outputs on every invocation.
pub fn derive_epoch_secrets(
    suite: CipherSuite,
    init_secret: &Secret,
    update_secret: &[u8],
    group_context: &[u8],
) -> Result<EpochSecrets> {
    let epoch_secret = hkdf_extract(suite, init_secret.as_bytes(), update_secret);
    Ok(EpochSecrets {
        application_secret: derive_secret(suite, &epoch_secret, "app", group_context)?,
        confirmation_key: derive_secret(suite, &epoch_secret, "confirm", group_context)?,
        init_secret: derive_secret(suite, &epoch_secret, "init", group_context)?,
        epoch_secret,
    })
}

/// Key material for one `(sender, generation)` pair.
#[derive(Clone, Debug, PartialEq)]
pub struct ApplicationKeys {
    pub generation: u32,
    pub secret: Secret,
    pub key: Secret,
    pub nonce: Secret,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SenderChain {
    next_secret: Secret,
    next_generation: u32,
    skipped: BTreeMap<u32, ApplicationKeysState>,
}

// Parked keys for generations that were derived past but not yet consumed.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ApplicationKeysState {
    secret: Secret,
    key: Secret,
    nonce: Secret,
}

/// Lazy mapping `(leaf, generation) -> (secret, key, nonce)` rooted in the epoch's
/// application secret.
///
/// Sender chains materialize on first use. Requesting a generation ahead of a chain's head
/// derives and parks the keys in between (bounded by [`MAX_GENERATION_SKIP`]); requesting
/// one behind the head succeeds only while it sits unconsumed inside
/// [`OUT_OF_ORDER_WINDOW`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppKeyChain {
    suite: CipherSuite,
    application_secret: Secret,
    chains: BTreeMap<u32, SenderChain>,
}

impl AppKeyChain {
    pub fn new(suite: CipherSuite, application_secret: Secret) -> Self {
        Self {
            suite,
            application_secret,
            chains: BTreeMap::new(),
        }
    }

    /// Keys for our own next outgoing message.
    pub fn next(&mut self, sender: LeafIndex) -> Result<ApplicationKeys> {
        let generation = match self.chains.get(&sender.0) {
            Some(chain) => chain.next_generation,
            None => 0,
        };
        self.get(sender, generation)
    }

    /// Keys for `(sender, generation)`, consuming them.
    pub fn get(&mut self, sender: LeafIndex, generation: u32) -> Result<ApplicationKeys> {
        let suite = self.suite;
        if !self.chains.contains_key(&sender.0) {
            let mut context = Vec::new();
            sender.0.encode(&mut context)?;
            let base = derive_secret(suite, &self.application_secret, "app sender", &context)?;
            self.chains.insert(
                sender.0,
                SenderChain {
                    next_secret: base,
                    next_generation: 0,
                    skipped: BTreeMap::new(),
                },
            );
        }
        let chain = self
            .chains
            .get_mut(&sender.0)
            .expect("chain exists after insert");

        if generation < chain.next_generation {
            let state = chain
                .skipped
                .remove(&generation)
                .ok_or(Error::Protocol("application key already consumed"))?;
            return Ok(ApplicationKeys {
                generation,
                secret: state.secret,
                key: state.key,
                nonce: state.nonce,
            });
        }

        if generation - chain.next_generation > MAX_GENERATION_SKIP {
            return Err(Error::Protocol("application key generation too far ahead"));
        }

        // Ratchet forward, parking the keys of skipped generations.
        while chain.next_generation < generation {
            let state = Self::derive_keys(suite, &chain.next_secret)?;
            chain.skipped.insert(chain.next_generation, state);
            Self::advance(suite, chain)?;
        }

        let state = Self::derive_keys(suite, &chain.next_secret)?;
        Self::advance(suite, chain)?;

        // Anything older than the window is forfeit.
        let horizon = generation.saturating_sub(OUT_OF_ORDER_WINDOW);
        chain.skipped.retain(|g, _| *g >= horizon);

        Ok(ApplicationKeys {
            generation,
            secret: state.secret,
            key: state.key,
            nonce: state.nonce,
        })
    }

    fn derive_keys(suite: CipherSuite, secret: &Secret) -> Result<ApplicationKeysState> {
        Ok(ApplicationKeysState {
            secret: secret.clone(),
            key: hkdf_expand_label(suite, secret, "app key", b"", suite.aead_key_len())?,
            nonce: hkdf_expand_label(suite, secret, "app nonce", b"", suite.aead_nonce_len())?,
        })
    }

    // Replaces the chain head; the previous secret is dropped and zeroised.
    fn advance(suite: CipherSuite, chain: &mut SenderChain) -> Result<()> {
        chain.next_secret = hkdf_expand_label(
            suite,
            &chain.next_secret,
            "app sender",
            b"",
            suite.hash_len(),
        )?;
        chain.next_generation += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AppKeyChain, derive_epoch_secrets};
    use crate::crypto::{CipherSuite, Secret};
    use crate::tree_math::LeafIndex;

    const SUITE: CipherSuite = CipherSuite::X25519Sha256Aes128Gcm;

    fn chain() -> AppKeyChain {
        AppKeyChain::new(SUITE, Secret::from_slice(b"application secret of this epoch"))
    }

    #[test]
    fn epoch_secrets_are_pure() {
        let init = Secret::zero(32);
        let a = derive_epoch_secrets(SUITE, &init, b"update", b"context").unwrap();
        let b = derive_epoch_secrets(SUITE, &init, b"update", b"context").unwrap();
        assert_eq!(a, b);

        let c = derive_epoch_secrets(SUITE, &init, b"update", b"other context").unwrap();
        assert_ne!(a.application_secret, c.application_secret);
        assert_ne!(a.confirmation_key, c.confirmation_key);
        assert_ne!(a.init_secret, c.init_secret);

        // Chained epochs keep moving.
        let d = derive_epoch_secrets(SUITE, &a.init_secret, b"update", b"context").unwrap();
        assert_ne!(d.epoch_secret, a.epoch_secret);
    }

    #[test]
    fn generations_and_senders_separate() {
        let mut chain = chain();
        let a0 = chain.get(LeafIndex(0), 0).unwrap();
        let a1 = chain.get(LeafIndex(0), 1).unwrap();
        let b0 = chain.get(LeafIndex(1), 0).unwrap();

        assert_eq!(a0.generation, 0);
        assert_eq!(a1.generation, 1);
        assert_ne!(a0.key, a1.key);
        assert_ne!(a0.nonce, a1.nonce);
        assert_ne!(a0.key, b0.key);

        assert_eq!(a0.key.len(), SUITE.aead_key_len());
        assert_eq!(a0.nonce.len(), SUITE.aead_nonce_len());
        assert_eq!(a0.secret.len(), SUITE.hash_len());
    }

    #[test]
    fn two_chains_agree() {
        let mut ours = chain();
        let mut theirs = chain();
        for generation in 0..8 {
            let a = ours.get(LeafIndex(3), generation).unwrap();
            let b = theirs.get(LeafIndex(3), generation).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn consumed_generation_is_forgotten() {
        let mut chain = chain();
        chain.get(LeafIndex(0), 0).unwrap();
        chain.get(LeafIndex(0), 1).unwrap();
        assert!(chain.get(LeafIndex(0), 0).is_err());
        assert!(chain.get(LeafIndex(0), 1).is_err());
    }

    #[test]
    fn out_of_order_within_window() {
        let mut chain = chain();
        let g4 = chain.get(LeafIndex(0), 4).unwrap();
        // Generations 0..4 were skipped and stay available.
        let g2 = chain.get(LeafIndex(0), 2).unwrap();
        assert_ne!(g4.key, g2.key);

        let mut sequential = self::chain();
        for g in 0..=4 {
            let keys = sequential.get(LeafIndex(0), g).unwrap();
            if g == 2 {
                assert_eq!(keys, g2);
            }
        }
    }

    #[test]
    fn window_expires_old_generations() {
        let mut chain = chain();
        chain.get(LeafIndex(0), 20).unwrap();
        // 20 - OUT_OF_ORDER_WINDOW = 15 is the horizon.
        assert!(chain.get(LeafIndex(0), 14).is_err());
        assert!(chain.get(LeafIndex(0), 15).is_ok());
    }

    #[test]
    fn skip_limit() {
        let mut chain = chain();
        assert!(chain.get(LeafIndex(0), super::MAX_GENERATION_SKIP + 1).is_err());
        assert!(chain.get(LeafIndex(0), super::MAX_GENERATION_SKIP).is_ok());
    }

    #[test]
    fn own_sending_is_sequential() {
        let mut chain = chain();
        assert_eq!(chain.next(LeafIndex(2)).unwrap().generation, 0);
        assert_eq!(chain.next(LeafIndex(2)).unwrap().generation, 1);
        assert_eq!(chain.next(LeafIndex(2)).unwrap().generation, 2);
    }
}
