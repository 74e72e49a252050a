//! Simulated oracle randomness.
//!
//! Each word is `SHA-256(32 bytes from the OS CSPRNG)`, read as a big-endian
//! `u256`. There is no seeded or deterministic path: if the OS cannot supply
//! entropy the draw fails and the caller must treat it as fatal.

use alloy_primitives::U256;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::RandomnessError;

/// The two words delivered per fulfillment.
pub type RandomWords = [U256; 2];

/// Source of fulfillment randomness.
pub trait RandomnessSource: Send + Sync {
    fn random_words(&self) -> Result<RandomWords, RandomnessError>;
}

/// Production source backed by the operating system's CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandomness;

impl RandomnessSource for OsRandomness {
    fn random_words(&self) -> Result<RandomWords, RandomnessError> {
        Ok([draw_word()?, draw_word()?])
    }
}

fn draw_word() -> Result<U256, RandomnessError> {
    let mut entropy = [0u8; 32];
    OsRng.try_fill_bytes(&mut entropy)?;
    let digest: [u8; 32] = Sha256::digest(entropy).into();
    Ok(U256::from_be_bytes(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn produces_two_distinct_words() {
        let source = OsRandomness;
        for _ in 0..1_000 {
            let [a, b] = source.random_words().unwrap();
            assert_ne!(a, b);
        }
    }

    #[test]
    fn words_do_not_repeat_across_draws() {
        let source = OsRandomness;
        let mut seen = HashSet::new();
        for _ in 0..500 {
            for word in source.random_words().unwrap() {
                assert!(seen.insert(word), "repeated word {word}");
            }
        }
    }

    #[test]
    fn words_use_the_full_width() {
        // 200 words all fitting in 128 bits has probability 2^-25600.
        let source = OsRandomness;
        let high = (0..100)
            .flat_map(|_| source.random_words().unwrap())
            .any(|w| w > U256::from(u128::MAX));
        assert!(high);
    }
}
