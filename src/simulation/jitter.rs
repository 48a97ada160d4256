//! # Jitter Sources
//!
//! Every random perturbation in the cell model is drawn from a [`JitterSource`]
//! so that tests can replay a run exactly. Production code uses
//! [`SeededJitter`], which wraps a `StdRng` seeded either from a fixed value or
//! from entropy, the same way the grid and solar simulators pick their RNG.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniform samples in `[0, 1)`.
pub trait JitterSource: Send {
    /// Next sample in `[0, 1)`.
    fn next_unit(&mut self) -> f64;

    /// Uniform sample in `[low, high)`.
    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        low + self.next_unit() * (high - low)
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    fn pick(&mut self, len: usize) -> usize {
        let idx = (self.next_unit() * len as f64).floor() as usize;
        idx.min(len.saturating_sub(1))
    }
}

/// `StdRng`-backed jitter.
#[derive(Debug, Clone)]
pub struct SeededJitter {
    rng: StdRng,
}

impl SeededJitter {
    /// Reproducible source for a fixed seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seed from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Seeded when `seed` is set, entropy otherwise.
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::from_seed(seed),
            None => Self::from_entropy(),
        }
    }
}

impl JitterSource for SeededJitter {
    fn next_unit(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Returns the same sample forever. `ConstantJitter::zero()` removes every
/// perturbation from the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantJitter(f64);

impl ConstantJitter {
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0 - f64::EPSILON))
    }

    pub fn zero() -> Self {
        Self(0.0)
    }
}

impl JitterSource for ConstantJitter {
    fn next_unit(&mut self) -> f64 {
        self.0
    }
}

/// Replays a fixed sequence of samples, cycling when exhausted.
#[derive(Debug, Clone)]
pub struct ScriptedJitter {
    samples: Vec<f64>,
    cursor: usize,
}

impl ScriptedJitter {
    pub fn new(samples: Vec<f64>) -> Self {
        Self { samples, cursor: 0 }
    }
}

impl JitterSource for ScriptedJitter {
    fn next_unit(&mut self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let value = self.samples[self.cursor % self.samples.len()];
        self.cursor += 1;
        value
    }
}

impl<J: JitterSource + ?Sized> JitterSource for Box<J> {
    fn next_unit(&mut self) -> f64 {
        (**self).next_unit()
    }
}
