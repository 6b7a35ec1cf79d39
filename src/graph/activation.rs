//! Activation functions selectable by name.

use crate::error::{GraphError, Result};
use core::fmt;
use core::str::FromStr;

/// An enumeration of activation functions.
///
/// Parsed case-insensitively from the names Keras uses (`"relu"`, `"softmax"`,
/// ...), so a model's activation can be configured with a plain string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ActivationKind {
    /// Identity.
    Linear,
    /// `max(0, x)`.
    #[default]
    ReLU,
    /// `1 / (1 + e^-x)`.
    Sigmoid,
    /// Hyperbolic tangent.
    Tanh,
    /// Normalised exponentials over the last axis.
    Softmax,
    /// `x` for positive inputs, `e^x - 1` otherwise.
    Elu,
    /// Scaled ELU with the self-normalising constants.
    Selu,
    /// `x * sigmoid(x)`, also known as SiLU.
    Swish,
    /// Gaussian error linear unit (tanh approximation).
    Gelu,
}

const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_SCALE: f32 = 1.050_701;

impl ActivationKind {
    /// Canonical lower-case name, also used when auto-naming layers.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::ReLU => "relu",
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
            Self::Softmax => "softmax",
            Self::Elu => "elu",
            Self::Selu => "selu",
            Self::Swish => "swish",
            Self::Gelu => "gelu",
        }
    }

    /// Whether the activation looks at a whole row instead of one element.
    #[must_use]
    pub const fn is_row_wise(self) -> bool {
        matches!(self, Self::Softmax)
    }

    /// Applies an element-wise activation to a single value.
    ///
    /// Row-wise kinds ([`ActivationKind::Softmax`]) return `x` unchanged; use
    /// [`crate::ops::cpu::activation`] for them.
    #[must_use]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Self::Linear | Self::Softmax => x,
            Self::ReLU => x.max(0.0),
            Self::Sigmoid => sigmoid(x),
            Self::Tanh => x.tanh(),
            Self::Elu => {
                if x > 0.0 {
                    x
                } else {
                    x.exp_m1()
                }
            }
            Self::Selu => {
                if x > 0.0 {
                    SELU_SCALE * x
                } else {
                    SELU_SCALE * SELU_ALPHA * x.exp_m1()
                }
            }
            Self::Swish => x * sigmoid(x),
            Self::Gelu => {
                let c = (2.0 / core::f32::consts::PI).sqrt();
                0.5 * x * (1.0 + (c * (x + 0.044_715 * x * x * x)).tanh())
            }
        }
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl FromStr for ActivationKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s.trim().to_ascii_lowercase().as_str() {
            "linear" | "identity" => Self::Linear,
            "relu" => Self::ReLU,
            "sigmoid" => Self::Sigmoid,
            "tanh" => Self::Tanh,
            "softmax" => Self::Softmax,
            "elu" => Self::Elu,
            "selu" => Self::Selu,
            "swish" | "silu" => Self::Swish,
            "gelu" => Self::Gelu,
            _ => return Err(GraphError::UnknownActivation(s.to_owned())),
        };
        Ok(kind)
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
