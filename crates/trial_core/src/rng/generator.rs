//! Hash-counter generator.
//!
//! Draw `n` is `SHA-256(seed_bytes || decimal(n))`; the leading 53 bits of the
//! digest become an `f64` in `[0, 1)`. No other entropy source is consulted.

use super::seed::Seed;
use sha2::{Digest, Sha256};

/// 2^53, the number of distinct `f64` fractions produced.
const FRACTION_SCALE: f64 = (1u64 << 53) as f64;

/// Deterministic draw source for list construction.
///
/// Two generators built from the same seed and driven through the same call
/// sequence yield identical output.
#[derive(Debug, Clone)]
pub struct SeededGenerator {
    seed: Seed,
    counter: u64,
}

impl SeededGenerator {
    /// Start a stream at counter 0
    pub fn new(seed: Seed) -> Self {
        Self { seed, counter: 0 }
    }

    /// Seed the stream derives from
    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    /// Number of draws consumed so far
    pub fn calls(&self) -> u64 {
        self.counter
    }

    /// Uniform value in `[0, 1)`.
    pub fn gen_uniform(&mut self) -> f64 {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.as_str().as_bytes());
        hasher.update(self.counter.to_string().as_bytes());
        let digest = hasher.finalize();
        self.counter += 1;

        let mut lead = [0u8; 8];
        lead.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(lead) >> 11) as f64 / FRACTION_SCALE
    }

    /// Uniform index in `[0, max)`.
    ///
    /// `max == 0` returns 0 without consuming a draw.
    pub fn gen_index(&mut self, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        let index = (self.gen_uniform() * max as f64).floor() as usize;
        index.min(max - 1)
    }

    /// In-place Fisher-Yates shuffle driven by [`gen_index`](Self::gen_index).
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.gen_index(i + 1);
            items.swap(i, j);
        }
    }
}
