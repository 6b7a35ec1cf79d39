//! # CPU kernels
//!
//! Inference-mode implementations of every layer kind, used by
//! [`crate::model::Model::predict`].
//!
//! ## Submodules
//!
//! - [`cpu`]: multi-threaded kernels over channels-last (`NHWC`) tensors
//! - [`dispatch`]: routes a [`crate::graph::Layer`] to its kernel
//!
//! ## Notes
//!
//! - Kernels assume shapes were validated while the graph was built and
//!   **panic** on mismatches, so calling them directly requires consistent inputs.
//! - Parallelism comes from [`rayon`]; kernels split work along output rows
//!   and run on whatever pool they are called from.
//! - Batch normalization always uses the moving statistics.

pub mod cpu;
pub mod dispatch;
