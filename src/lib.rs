//! briny_resnet: ResNet-50 built from a small symbolic layer graph.
//!
//! The crate assembles a ResNet-50 image classifier out of convolution,
//! batch normalization, activation and residual addition layers. Shapes are
//! checked as each layer is applied, parameters are initialized when the
//! [`Model`] is assembled, and a parallel CPU forward pass is available to
//! evaluate it.
//!
//! # Features
//!
//! - Symbolic graph construction with immediate shape inference and errors.
//! - Keras-compatible layer naming, parameter shapes and counts.
//! - Seeded, reproducible Glorot-uniform initialization.
//! - Inference with multi-threaded kernels via Rayon.
//! - JSON configuration with validation.
//!
//! Training, data loading and checkpointing are out of scope.
//!
//! # Modules
//!
//! - [`tensors`]: dense row-major tensors.
//! - [`graph`]: layer specifications and the symbolic graph.
//! - [`model`]: assembled models, summaries and `predict`.
//! - [`ops`]: CPU kernels backing `predict`.
//! - [`resnet`]: the ResNet-50 stage table and block builders.
//! - [`config`]: serde configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use briny_resnet::{ResNetConfig, tensors::Tensor};
//!
//! let model = ResNetConfig::new([64, 64, 3], 6).build()?;
//! let batch = Tensor::zeros(vec![1, 64, 64, 3]);
//! let probs = model.predict(&batch)?;
//! assert_eq!(probs.shape, vec![1, 6]);
//! # Ok::<(), briny_resnet::GraphError>(())
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::similar_names,
    clippy::many_single_char_names
)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod ops;
pub mod resnet;
pub mod tensors;

pub use config::ResNetConfig;
pub use error::{GraphError, Result};
pub use model::Model;
pub use resnet::{convolutional_block, identity_block, resnet50};
