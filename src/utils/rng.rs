//! Seeded random number generation for parameter initialization.
//!
//! A small xorshift PRNG: deterministic for a given seed, so two layers built
//! from the same seed start from identical parameters.

use ndarray::{ArrayBase, DataMut, Dimension};

/// Xorshift generator used by `set_parameters_random`.
#[derive(Debug, Clone)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    /// Create a new RNG with explicit seed (if zero, use a fixed value).
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { 0x9e3779b97f4a7c15 } else { seed };
        Self { state }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform sample in [0, 1].
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / ((1u64 << 53) - 1) as f64
    }

    /// Uniform sample in [low, high].
    pub fn gen_range(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64()
    }

    /// Overwrites every entry of `array` with a sample in [low, high].
    pub fn fill_uniform<S, D>(&mut self, array: &mut ArrayBase<S, D>, low: f64, high: f64)
    where
        S: DataMut<Elem = f64>,
        D: Dimension,
    {
        for value in array.iter_mut() {
            *value = self.gen_range(low, high);
        }
    }
}

impl Default for SimpleRng {
    fn default() -> Self {
        Self::new(0)
    }
}
