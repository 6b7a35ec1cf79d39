//! Model configuration.
//!
//! [`ResNetConfig`] is plain serde data: every field has a default, so a JSON
//! document only needs the fields it changes.
//!
//! ```json
//! { "input_shape": [224, 224, 3], "classes": 1000, "activation": "relu",
//!   "kernel_initializer": { "kind": "glorot_uniform", "seed": 0 } }
//! ```
//!
//! Documents loaded with [`ResNetConfig::from_json`] or
//! [`ResNetConfig::from_path`] are validated before they are handed out.

use crate::error::{GraphError, Result};
use crate::graph::{ActivationKind, Initializer};
use crate::model::Model;
use crate::resnet::{resnet50, StageSpec, RESNET50_STAGES};
use briny::prelude::{TrustedData, Validate, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound on every extent and count a configuration may request.
pub const MAX_EXTENT: usize = 1 << 16;

/// Parameters of a ResNet build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResNetConfig {
    /// Model name.
    pub name: String,
    /// Per-sample `[height, width, channels]`.
    pub input_shape: Vec<usize>,
    /// Number of output classes.
    pub classes: usize,
    /// Activation used throughout the residual stages (by name).
    pub activation: String,
    /// Initializer of every convolution and dense kernel.
    pub kernel_initializer: Initializer,
    /// Residual stages after the stem.
    pub stages: Vec<StageSpec>,
    /// Worker threads for [`Model::predict`]; `None` uses the global rayon pool.
    pub threads: Option<usize>,
}

impl Default for ResNetConfig {
    fn default() -> Self {
        Self {
            name: "ResNet50".to_owned(),
            input_shape: vec![64, 64, 3],
            classes: 6,
            activation: ActivationKind::ReLU.name().to_owned(),
            kernel_initializer: Initializer::glorot_uniform(0),
            stages: RESNET50_STAGES.to_vec(),
            threads: None,
        }
    }
}

impl ResNetConfig {
    /// Default configuration for another input shape and class count.
    #[must_use]
    pub fn new(input_shape: impl Into<Vec<usize>>, classes: usize) -> Self {
        Self {
            input_shape: input_shape.into(),
            classes,
            ..Self::default()
        }
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    /// [`GraphError::Json`] for malformed documents, [`GraphError::InvalidConfig`]
    /// when validation fails.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Self = serde_json::from_str(json)?;
        raw.check()?;
        let trusted = TrustedData::new(raw)
            .map_err(|_| GraphError::InvalidConfig("configuration rejected".to_owned()))?;
        Ok(trusted.into_inner())
    }

    /// Reads and validates a JSON file.
    ///
    /// # Errors
    /// [`GraphError::Io`] if the file cannot be read, otherwise as
    /// [`ResNetConfig::from_json`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialises the configuration as pretty JSON.
    ///
    /// # Errors
    /// [`GraphError::Json`] if serialisation fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The configured activation.
    ///
    /// # Errors
    /// [`GraphError::UnknownActivation`] for an unrecognised name.
    pub fn activation_kind(&self) -> Result<ActivationKind> {
        self.activation.parse()
    }

    /// Checks every field, reporting the first problem found.
    ///
    /// # Errors
    /// [`GraphError::InvalidConfig`] describing the problem.
    pub fn check(&self) -> Result<()> {
        let invalid = |msg: String| Err(GraphError::InvalidConfig(msg));

        if self.name.trim().is_empty() {
            return invalid("name must not be empty".to_owned());
        }
        let in_range = |n: usize| (1..=MAX_EXTENT).contains(&n);
        if self.input_shape.len() != 3 || !self.input_shape.iter().all(|&d| in_range(d)) {
            return invalid(format!(
                "input_shape must be [height, width, channels] with extents in 1..={MAX_EXTENT}, \
                 got {:?}",
                self.input_shape
            ));
        }
        if !in_range(self.classes) {
            return invalid(format!("classes must be in 1..={MAX_EXTENT}"));
        }
        if self.activation_kind().is_err() {
            return invalid(format!("unknown activation `{}`", self.activation));
        }
        if self.stages.is_empty() {
            return invalid("at least one stage is required".to_owned());
        }
        for spec in &self.stages {
            let counts = [spec.stride, spec.blocks, spec.kernel_size];
            if !spec.filters.iter().chain(&counts).all(|&n| in_range(n)) {
                return invalid(format!(
                    "stage {}: filters, stride, blocks and kernel_size must be in 1..={MAX_EXTENT}",
                    spec.stage
                ));
            }
        }
        if self.threads == Some(0) {
            return invalid("threads must be at least 1".to_owned());
        }
        Ok(())
    }

    /// Builds the model this configuration describes.
    ///
    /// # Errors
    /// See [`resnet50`].
    pub fn build(&self) -> Result<Model> {
        resnet50(self)
    }
}

impl Validate for ResNetConfig {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        self.check().map_err(|_| ValidationError)
    }
}
