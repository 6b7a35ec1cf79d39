//! Errors raised while assembling or running a layer graph.
//!
//! Every check happens when a layer is applied, so a graph that was built
//! without errors is guaranteed to be shape-consistent.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Everything that can go wrong while building, configuring or evaluating a model.
#[derive(Debug, Error)]
pub enum GraphError {
    /// An input tensor's shape is incompatible with the layer.
    #[error("layer `{layer}`: expected shape {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// Layer that rejected the input.
        layer: String,
        /// Shape the layer required.
        expected: Vec<usize>,
        /// Shape it received.
        found: Vec<usize>,
    },

    /// A layer argument (filter count, kernel size, stride, ...) is out of range.
    #[error("layer `{layer}`: {reason}")]
    InvalidArgument {
        /// Offending layer.
        layer: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Two layers were given the same explicit name.
    #[error("duplicate layer name `{0}`")]
    DuplicateName(String),

    /// A tensor handle was produced by a different graph.
    #[error("tensor #{0} does not belong to this graph")]
    ForeignTensor(usize),

    /// A layer received the wrong number of inputs.
    #[error("layer `{layer}` takes {expected} input(s), got {found}")]
    Arity {
        /// Offending layer.
        layer: String,
        /// Accepted input count (minimum for variadic layers).
        expected: usize,
        /// Supplied input count.
        found: usize,
    },

    /// An activation name could not be parsed.
    #[error("unknown activation `{0}`")]
    UnknownActivation(String),

    /// No layer with that name exists in the model.
    #[error("no layer named `{0}`")]
    UnknownLayer(String),

    /// The requested output does not depend solely on the requested input.
    #[error("output `{output}` is not computable from input `{input}`")]
    Disconnected {
        /// Name of the designated input layer.
        input: String,
        /// Name of the designated output layer.
        output: String,
    },

    /// A model configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The inference thread pool could not be created.
    #[error("thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Reading a configuration file failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration document is not valid JSON for [`crate::ResNetConfig`].
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphError {
    pub(crate) fn invalid(layer: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            layer: layer.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(layer: &str, expected: &[usize], found: &[usize]) -> Self {
        Self::ShapeMismatch {
            layer: layer.to_owned(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }
}
