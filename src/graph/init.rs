//! Parameter initializers.
//!
//! Fan computation follows the Keras convention: a convolution kernel of shape
//! `[kh, kw, in, out]` has `fan_in = kh * kw * in` and `fan_out = kh * kw * out`,
//! a dense kernel `[in, out]` uses its two dimensions directly.

use crate::tensors::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// How a parameter tensor is filled when a model is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Initializer {
    /// Uniform in `[-limit, limit]`, `limit = sqrt(6 / (fan_in + fan_out))`.
    GlorotUniform {
        /// Fixed seed; `None` draws from the OS.
        #[serde(default)]
        seed: Option<u64>,
    },
    /// Uniform in `[-limit, limit]`, `limit = sqrt(6 / fan_in)`.
    HeUniform {
        /// Fixed seed; `None` draws from the OS.
        #[serde(default)]
        seed: Option<u64>,
    },
    /// All zeros.
    Zeros,
    /// All ones.
    Ones,
    /// Every element set to `value`.
    Constant {
        /// Fill value.
        value: f32,
    },
}

impl Default for Initializer {
    fn default() -> Self {
        Self::GlorotUniform { seed: Some(0) }
    }
}

impl Initializer {
    /// Seeded Glorot-uniform, the kernel initializer ResNet-50 uses by default.
    #[must_use]
    pub const fn glorot_uniform(seed: u64) -> Self {
        Self::GlorotUniform { seed: Some(seed) }
    }

    /// Fills a tensor of `shape`.
    ///
    /// `stream` separates parameters that share one seeded initializer: the
    /// same `(seed, stream, shape)` always yields the same values, while two
    /// streams of one seed do not repeat each other.
    #[must_use]
    pub fn sample(&self, shape: &[usize], stream: u64) -> Tensor<f32> {
        match *self {
            Self::Zeros => Tensor::zeros(shape),
            Self::Ones => Tensor::filled(shape, 1.0),
            Self::Constant { value } => Tensor::filled(shape, value),
            Self::GlorotUniform { seed } => {
                let (fan_in, fan_out) = fans(shape);
                let limit = (6.0 / (fan_in + fan_out) as f64).sqrt() as f32;
                uniform(shape, limit, seed, stream)
            }
            Self::HeUniform { seed } => {
                let (fan_in, _) = fans(shape);
                let limit = (6.0 / fan_in as f64).sqrt() as f32;
                uniform(shape, limit, seed, stream)
            }
        }
    }
}

/// `(fan_in, fan_out)` for a parameter shape.
#[must_use]
pub fn fans(shape: &[usize]) -> (usize, usize) {
    match shape {
        [] => (1, 1),
        [n] => (*n, *n),
        [fan_in, fan_out] => (*fan_in, *fan_out),
        [spatial @ .., fan_in, fan_out] => {
            let receptive: usize = spatial.iter().product();
            (fan_in * receptive, fan_out * receptive)
        }
    }
}

fn uniform(shape: &[usize], limit: f32, seed: Option<u64>, stream: u64) -> Tensor<f32> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(mix(seed, stream)),
        None => StdRng::from_os_rng(),
    };
    let len: usize = shape.iter().product();
    let data = (0..len).map(|_| rng.random_range(-limit..=limit)).collect();
    Tensor::new(shape, data)
}

// splitmix64 finaliser
fn mix(seed: u64, stream: u64) -> u64 {
    let mut z = seed ^ stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
