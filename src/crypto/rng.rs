// SPDX-License-Identifier: MIT OR Apache-2.0

//! Injectable random number generator.
//!
//! Every operation in the crate that needs entropy takes an `Rng` by reference; nothing pulls
//! from ambient OS randomness directly. Tests construct the generator from a fixed seed, which
//! makes all derived values, including HPKE ephemeral keys, byte-for-byte reproducible.
use std::sync::Mutex;

use rand_chacha::rand_core::{SeedableRng, TryRngCore};
use thiserror::Error;

/// Cryptographically-secure random number generator backed by the ChaCha stream cipher.
#[derive(Debug)]
pub struct Rng {
    inner: Mutex<rand_chacha::ChaCha20Rng>,
}

impl Default for Rng {
    fn default() -> Self {
        Self {
            inner: Mutex::new(rand_chacha::ChaCha20Rng::from_os_rng()),
        }
    }
}

impl Rng {
    #[cfg(any(test, feature = "test_utils"))]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            inner: Mutex::new(rand_chacha::ChaCha20Rng::from_seed(seed)),
        }
    }

    pub fn random_array<const N: usize>(&self) -> Result<[u8; N], RngError> {
        let mut out = [0u8; N];
        self.fill(&mut out)?;
        Ok(out)
    }

    pub fn random_vec(&self, len: usize) -> Result<Vec<u8>, RngError> {
        let mut out = vec![0u8; len];
        self.fill(&mut out)?;
        Ok(out)
    }

    fn fill(&self, out: &mut [u8]) -> Result<(), RngError> {
        let mut rng = self.inner.lock().map_err(|_| RngError::LockPoisoned)?;
        rng.try_fill_bytes(out)
            .map_err(|_| RngError::NotEnoughRandomness)
    }
}

#[derive(Debug, Error)]
pub enum RngError {
    #[error("rng lock is poisoned")]
    LockPoisoned,

    #[error("unable to collect enough randomness")]
    NotEnoughRandomness,
}
