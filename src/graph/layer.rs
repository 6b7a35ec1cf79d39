//! Layer specifications and their shape rules.
//!
//! A [`Layer`] is pure configuration. Applying it to a [`super::Graph`] checks
//! the incoming shapes against the rules below and records the output shape;
//! parameters only come into existence when a [`crate::model::Model`] is
//! assembled from the graph.
//!
//! All spatial layers work on per-sample `[height, width, channels]` shapes.

use super::{ActivationKind, Initializer};
use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};

/// Border handling for windowed layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// Only windows that fit entirely inside the input.
    #[default]
    Valid,
    /// Pad so that `out = ceil(in / stride)`; the smaller half of the padding goes first.
    Same,
}

impl Padding {
    /// Output extent and leading padding along one axis, or `None` when the
    /// window does not fit.
    #[must_use]
    pub fn resolve(self, input: usize, window: usize, stride: usize) -> Option<(usize, usize)> {
        if input == 0 || window == 0 || stride == 0 {
            return None;
        }
        match self {
            Self::Valid => (input >= window).then(|| ((input - window) / stride + 1, 0)),
            Self::Same => {
                let out = input.div_ceil(stride);
                let total = (out - 1)
                    .checked_mul(stride)?
                    .checked_add(window)?
                    .saturating_sub(input);
                Some((out, total / 2))
            }
        }
    }

    fn resolve2(
        self,
        layer: &str,
        input: &[usize],
        window: (usize, usize),
        strides: (usize, usize),
    ) -> Result<(usize, usize)> {
        let rows = self.resolve(input[0], window.0, strides.0);
        let cols = self.resolve(input[1], window.1, strides.1);
        match (rows, cols) {
            (Some((h, _)), Some((w, _))) => Ok((h, w)),
            _ => Err(GraphError::invalid(
                layer,
                format!(
                    "window {window:?} does not fit input {}x{}",
                    input[0], input[1]
                ),
            )),
        }
    }
}

/// 2-D convolution over `[h, w, c]` inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Conv2d {
    /// Output channels.
    pub filters: usize,
    /// Kernel height and width.
    pub kernel: (usize, usize),
    /// Row and column strides.
    pub strides: (usize, usize),
    /// Border handling.
    pub padding: Padding,
    /// Whether a per-filter bias is added.
    pub use_bias: bool,
    /// Fills the `[kh, kw, in, filters]` kernel.
    pub kernel_initializer: Initializer,
    /// Fills the bias.
    pub bias_initializer: Initializer,
}

impl Conv2d {
    /// A stride-1, `valid`, biased convolution with Glorot-uniform weights.
    #[must_use]
    pub fn new(filters: usize, kernel: (usize, usize)) -> Self {
        Self {
            filters,
            kernel,
            strides: (1, 1),
            padding: Padding::Valid,
            use_bias: true,
            kernel_initializer: Initializer::GlorotUniform { seed: None },
            bias_initializer: Initializer::Zeros,
        }
    }

    /// Sets the strides.
    #[must_use]
    pub fn strides(mut self, strides: (usize, usize)) -> Self {
        self.strides = strides;
        self
    }

    /// Sets the padding mode.
    #[must_use]
    pub fn padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    /// Sets the kernel initializer.
    #[must_use]
    pub fn kernel_initializer(mut self, init: Initializer) -> Self {
        self.kernel_initializer = init;
        self
    }

    /// Enables or disables the bias term.
    #[must_use]
    pub fn use_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }
}

/// Batch normalization along one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNorm {
    /// Normalised axis, counted with the batch axis as 0 (`3` = channels of an image batch).
    pub axis: usize,
    /// Added to the variance before the square root.
    pub epsilon: f32,
    /// Decay of the moving statistics (kept for trainers; inference ignores it).
    pub momentum: f32,
}

impl BatchNorm {
    /// Normalises `axis` with the Keras defaults (`epsilon = 1e-3`, `momentum = 0.99`).
    #[must_use]
    pub fn new(axis: usize) -> Self {
        Self {
            axis,
            epsilon: 1e-3,
            momentum: 0.99,
        }
    }
}

/// Max or average pooling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pool2d {
    /// Window height and width.
    pub pool: (usize, usize),
    /// Row and column strides (defaults to the window).
    pub strides: (usize, usize),
    /// Border handling; padded cells never contribute.
    pub padding: Padding,
}

impl Pool2d {
    /// Non-overlapping `valid` pooling.
    #[must_use]
    pub fn new(pool: (usize, usize)) -> Self {
        Self {
            pool,
            strides: pool,
            padding: Padding::Valid,
        }
    }

    /// Sets the strides.
    #[must_use]
    pub fn strides(mut self, strides: (usize, usize)) -> Self {
        self.strides = strides;
        self
    }

    /// Sets the padding mode.
    #[must_use]
    pub fn padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }
}

/// Fully connected projection of a rank-1 sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    /// Output width.
    pub units: usize,
    /// Applied after the affine map.
    pub activation: ActivationKind,
    /// Fills the `[in, units]` kernel.
    pub kernel_initializer: Initializer,
    /// Fills the bias.
    pub bias_initializer: Initializer,
}

impl Dense {
    /// A linear projection to `units` outputs.
    #[must_use]
    pub fn new(units: usize) -> Self {
        Self {
            units,
            activation: ActivationKind::Linear,
            kernel_initializer: Initializer::GlorotUniform { seed: None },
            bias_initializer: Initializer::Zeros,
        }
    }

    /// Sets the output activation.
    #[must_use]
    pub fn activation(mut self, activation: ActivationKind) -> Self {
        self.activation = activation;
        self
    }

    /// Sets the kernel initializer.
    #[must_use]
    pub fn kernel_initializer(mut self, init: Initializer) -> Self {
        self.kernel_initializer = init;
        self
    }
}

/// One node kind of the layer graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    /// Graph entry point with a fixed per-sample shape.
    Input {
        /// Per-sample shape (no batch axis).
        shape: Vec<usize>,
    },
    /// Zero rows/columns around each image.
    ZeroPadding2d {
        /// `(top, bottom)` rows.
        rows: (usize, usize),
        /// `(left, right)` columns.
        cols: (usize, usize),
    },
    /// See [`Conv2d`].
    Conv2d(Conv2d),
    /// See [`BatchNorm`].
    BatchNorm(BatchNorm),
    /// Stand-alone activation.
    Activation(ActivationKind),
    /// Window maximum.
    MaxPool2d(Pool2d),
    /// Window mean over in-bounds cells.
    AvgPool2d(Pool2d),
    /// Collapses a sample to rank 1.
    Flatten,
    /// See [`Dense`].
    Dense(Dense),
    /// Element-wise sum of two or more same-shaped tensors.
    Add,
}

/// A parameter a layer owns, before it is materialised.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSlot {
    /// Slot name within the layer (`kernel`, `bias`, `gamma`, ...).
    pub name: &'static str,
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Whether an optimizer would update it.
    pub trainable: bool,
    /// How it is filled.
    pub initializer: Initializer,
}

impl ParamSlot {
    fn new(
        name: &'static str,
        shape: Vec<usize>,
        trainable: bool,
        initializer: Initializer,
    ) -> Self {
        Self {
            name,
            shape,
            trainable,
            initializer,
        }
    }
}

impl Layer {
    /// Symmetric zero padding of `rows` and `cols` cells.
    #[must_use]
    pub fn zero_padding(rows: usize, cols: usize) -> Self {
        Self::ZeroPadding2d {
            rows: (rows, rows),
            cols: (cols, cols),
        }
    }

    /// Prefix used for auto-generated layer names (`conv2d_3`, `add_1`, ...).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input { .. } => "input",
            Self::ZeroPadding2d { .. } => "zero_padding2d",
            Self::Conv2d(_) => "conv2d",
            Self::BatchNorm(_) => "batch_normalization",
            Self::Activation(_) => "activation",
            Self::MaxPool2d(_) => "max_pooling2d",
            Self::AvgPool2d(_) => "average_pooling2d",
            Self::Flatten => "flatten",
            Self::Dense(_) => "dense",
            Self::Add => "add",
        }
    }

    /// Type name shown in model summaries.
    #[must_use]
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Input { .. } => "InputLayer",
            Self::ZeroPadding2d { .. } => "ZeroPadding2D",
            Self::Conv2d(_) => "Conv2D",
            Self::BatchNorm(_) => "BatchNormalization",
            Self::Activation(_) => "Activation",
            Self::MaxPool2d(_) => "MaxPooling2D",
            Self::AvgPool2d(_) => "AveragePooling2D",
            Self::Flatten => "Flatten",
            Self::Dense(_) => "Dense",
            Self::Add => "Add",
        }
    }

    fn check_arity(&self, layer: &str, found: usize) -> Result<()> {
        let (expected, ok) = match self {
            Self::Input { .. } => (0, found == 0),
            Self::Add => (2, found >= 2),
            _ => (1, found == 1),
        };
        if ok {
            Ok(())
        } else {
            Err(GraphError::Arity {
                layer: layer.to_owned(),
                expected,
                found,
            })
        }
    }

    /// Per-sample output shape for the given input shapes.
    ///
    /// # Errors
    /// - [`GraphError::Arity`] for the wrong number of inputs.
    /// - [`GraphError::ShapeMismatch`] when input ranks or extents are incompatible.
    /// - [`GraphError::InvalidArgument`] for zero filters, kernels, strides or units,
    ///   a window larger than the (padded) input, or an output or parameter
    ///   whose element count overflows `usize`.
    pub fn output_shape(&self, layer: &str, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        self.check_arity(layer, inputs.len())?;
        let shape = self.infer(layer, inputs)?;
        volume(layer, &shape)?;
        for slot in self.param_slots(inputs) {
            volume(layer, &slot.shape)?;
        }
        Ok(shape)
    }

    fn infer(&self, layer: &str, inputs: &[&[usize]]) -> Result<Vec<usize>> {

        match self {
            Self::Input { shape } => {
                if shape.is_empty() || shape.contains(&0) {
                    return Err(GraphError::invalid(
                        layer,
                        format!("input shape {shape:?} must be non-empty with non-zero extents"),
                    ));
                }
                Ok(shape.clone())
            }
            Self::ZeroPadding2d { rows, cols } => {
                let [h, w, c] = image(layer, inputs[0])?;
                Ok(vec![grow(layer, h, *rows)?, grow(layer, w, *cols)?, c])
            }
            Self::Conv2d(conv) => {
                let [h, w, c] = image(layer, inputs[0])?;
                positive(layer, "filters", conv.filters)?;
                positive(layer, "kernel", conv.kernel.0.min(conv.kernel.1))?;
                positive(layer, "strides", conv.strides.0.min(conv.strides.1))?;
                let (oh, ow) = conv.padding.resolve2(layer, &[h, w, c], conv.kernel, conv.strides)?;
                Ok(vec![oh, ow, conv.filters])
            }
            Self::BatchNorm(bn) => {
                let rank = inputs[0].len();
                if bn.axis == 0 || bn.axis > rank {
                    return Err(GraphError::invalid(
                        layer,
                        format!("axis {} out of range for a rank-{} batch", bn.axis, rank + 1),
                    ));
                }
                if bn.epsilon.is_nan() || bn.epsilon <= 0.0 {
                    return Err(GraphError::invalid(layer, "epsilon must be positive"));
                }
                Ok(inputs[0].to_vec())
            }
            Self::Activation(_) => Ok(inputs[0].to_vec()),
            Self::MaxPool2d(pool) | Self::AvgPool2d(pool) => {
                let [h, w, c] = image(layer, inputs[0])?;
                positive(layer, "pool", pool.pool.0.min(pool.pool.1))?;
                positive(layer, "strides", pool.strides.0.min(pool.strides.1))?;
                let (oh, ow) = pool.padding.resolve2(layer, &[h, w, c], pool.pool, pool.strides)?;
                Ok(vec![oh, ow, c])
            }
            Self::Flatten => Ok(vec![volume(layer, inputs[0])?]),
            Self::Dense(dense) => {
                if inputs[0].len() != 1 {
                    return Err(GraphError::invalid(
                        layer,
                        format!("expects a flat input, found {:?}", inputs[0]),
                    ));
                }
                positive(layer, "units", dense.units)?;
                Ok(vec![dense.units])
            }
            Self::Add => {
                let first = inputs[0];
                if let Some(other) = inputs[1..].iter().find(|s| **s != first) {
                    return Err(GraphError::shape(layer, first, other));
                }
                Ok(first.to_vec())
            }
        }
    }

    /// Parameters owned by this layer given (already validated) input shapes.
    #[must_use]
    pub fn param_slots(&self, inputs: &[&[usize]]) -> Vec<ParamSlot> {
        match self {
            Self::Conv2d(conv) => {
                let in_channels = inputs[0].last().copied().unwrap_or_default();
                let mut slots = vec![ParamSlot::new(
                    "kernel",
                    vec![conv.kernel.0, conv.kernel.1, in_channels, conv.filters],
                    true,
                    conv.kernel_initializer,
                )];
                if conv.use_bias {
                    slots.push(ParamSlot::new(
                        "bias",
                        vec![conv.filters],
                        true,
                        conv.bias_initializer,
                    ));
                }
                slots
            }
            Self::BatchNorm(bn) => {
                let channels = inputs[0][bn.axis - 1];
                vec![
                    ParamSlot::new("gamma", vec![channels], true, Initializer::Ones),
                    ParamSlot::new("beta", vec![channels], true, Initializer::Zeros),
                    ParamSlot::new("moving_mean", vec![channels], false, Initializer::Zeros),
                    ParamSlot::new("moving_variance", vec![channels], false, Initializer::Ones),
                ]
            }
            Self::Dense(dense) => vec![
                ParamSlot::new(
                    "kernel",
                    vec![inputs[0][0], dense.units],
                    true,
                    dense.kernel_initializer,
                ),
                ParamSlot::new("bias", vec![dense.units], true, dense.bias_initializer),
            ],
            _ => Vec::new(),
        }
    }
}

fn image(layer: &str, shape: &[usize]) -> Result<[usize; 3]> {
    match *shape {
        [h, w, c] => Ok([h, w, c]),
        _ => Err(GraphError::invalid(
            layer,
            format!("expects a [height, width, channels] input, found {shape:?}"),
        )),
    }
}

/// Element count of `shape`, or an error when it does not fit in `usize`.
fn volume(layer: &str, shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| GraphError::invalid(layer, format!("{shape:?} has too many elements")))
}

fn grow(layer: &str, extent: usize, (before, after): (usize, usize)) -> Result<usize> {
    extent
        .checked_add(before)
        .and_then(|e| e.checked_add(after))
        .ok_or_else(|| GraphError::invalid(layer, "padded extent overflows"))
}

fn positive(layer: &str, what: &str, value: usize) -> Result<()> {
    if value == 0 {
        Err(GraphError::invalid(layer, format!("{what} must be non-zero")))
    } else {
        Ok(())
    }
}
