//! Deterministic seeded PRNG and shuffle.
//!
//! Every ordering decision in the engine (the frozen card order, the HARD
//! test queue) goes through this module so that a session replayed with the
//! same seed produces the same permutations. The generator is a SplitMix64
//! stream mapped to floats in [0, 1); it must stay byte-for-byte stable
//! within a deployment, which is why this does not use a general-purpose
//! RNG crate whose stream may change between versions.

/// Seeded pseudo-random stream of floats in [0, 1).
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next raw 64-bit value (SplitMix64).
    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Next float in [0, 1), using the top 53 bits of the stream.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniformly chosen index in `0..=max`.
    fn index_inclusive(&mut self, max: usize) -> usize {
        (self.next_f64() * (max + 1) as f64) as usize
    }
}

/// Fisher–Yates shuffle driven by the seeded stream.
///
/// Iterates from the last index down to 1, swapping each position with a
/// uniformly chosen earlier-or-equal index. Identical (input, seed) pairs
/// always produce identical permutations.
pub fn shuffle<T>(items: &mut [T], seed: u64) {
    let mut rng = SeededRng::new(seed);
    for i in (1..items.len()).rev() {
        let j = rng.index_inclusive(i);
        items.swap(i, j);
    }
}

/// Convenience wrapper returning a shuffled copy.
pub fn shuffled<T: Clone>(items: &[T], seed: u64) -> Vec<T> {
    let mut out = items.to_vec();
    shuffle(&mut out, seed);
    out
}
