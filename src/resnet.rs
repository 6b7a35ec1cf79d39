//! ResNet-50 assembly.
//!
//! The network is a stem (`7x7/2` convolution and `3x3/2` max pooling) followed
//! by four stages of bottleneck residual blocks and a softmax classifier. The
//! stage layout is plain data ([`RESNET50_STAGES`]), so deeper variants only need
//! a different table.
//!
//! Layer names follow the classic Caffe/Keras scheme: `conv1`, `bn_conv1`,
//! `res{stage}{block}_branch2a`, `bn{stage}{block}_branch1`, `fc{classes}`.
//!
//! # Example
//!
//! ```rust,no_run
//! use briny_resnet::{resnet50, ResNetConfig};
//!
//! let model = resnet50(&ResNetConfig::default())?;
//! assert_eq!(model.output_shape(), &[6]);
//! println!("{}", model.summary());
//! # Ok::<(), briny_resnet::GraphError>(())
//! ```

use crate::config::ResNetConfig;
use crate::error::Result;
use crate::graph::{
    ActivationKind, BatchNorm, Conv2d, Dense, Graph, Initializer, Layer, Padding, Pool2d,
    SymbolicTensor,
};
use crate::model::Model;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Channel axis of an `NHWC` batch.
const CHANNEL_AXIS: usize = 3;

/// One stage of residual blocks operating at a single resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage number used in layer names (the stem is stage 1).
    pub stage: usize,
    /// Bottleneck filters `[F1, F2, F3]`; `F3` is the stage's output width.
    pub filters: [usize; 3],
    /// Stride of the first block, which halves the resolution when `2`.
    pub stride: usize,
    /// Number of blocks: one convolutional block, then identity blocks.
    pub blocks: usize,
    /// Kernel size of the middle convolution.
    #[serde(default = "default_kernel_size")]
    pub kernel_size: usize,
}

const fn default_kernel_size() -> usize {
    3
}

/// Stages 2 to 5 of ResNet-50: 3, 4, 6 and 3 blocks.
pub const RESNET50_STAGES: [StageSpec; 4] = [
    StageSpec {
        stage: 2,
        filters: [64, 64, 256],
        stride: 1,
        blocks: 3,
        kernel_size: 3,
    },
    StageSpec {
        stage: 3,
        filters: [128, 128, 512],
        stride: 2,
        blocks: 4,
        kernel_size: 3,
    },
    StageSpec {
        stage: 4,
        filters: [256, 256, 1024],
        stride: 2,
        blocks: 6,
        kernel_size: 3,
    },
    StageSpec {
        stage: 5,
        filters: [512, 512, 2048],
        stride: 2,
        blocks: 3,
        kernel_size: 3,
    },
];

/// Everything a residual block needs besides its input.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualBlock {
    /// Stage number, used in layer names.
    pub stage: usize,
    /// Block label within the stage (`a`, `b`, ...).
    pub block: String,
    /// Middle convolution kernel size.
    pub kernel_size: usize,
    /// Bottleneck filters `[F1, F2, F3]`.
    pub filters: [usize; 3],
    /// Activation between and after the convolutions.
    pub activation: ActivationKind,
    /// Initializer for every convolution kernel.
    pub initializer: Initializer,
}

impl ResidualBlock {
    fn conv_name(&self, branch: &str) -> String {
        format!("res{}{}_branch{branch}", self.stage, self.block)
    }

    fn bn_name(&self, branch: &str) -> String {
        format!("bn{}{}_branch{branch}", self.stage, self.block)
    }

    #[allow(clippy::too_many_arguments)]
    fn conv_bn(
        &self,
        graph: &mut Graph,
        x: &SymbolicTensor,
        filters: usize,
        kernel: usize,
        stride: usize,
        padding: Padding,
        branch: &str,
    ) -> Result<SymbolicTensor> {
        let conv = Conv2d::new(filters, (kernel, kernel))
            .strides((stride, stride))
            .padding(padding)
            .kernel_initializer(self.initializer);
        let y = graph.apply_named(Layer::Conv2d(conv), &self.conv_name(branch), &[x])?;
        graph.apply_named(
            Layer::BatchNorm(BatchNorm::new(CHANNEL_AXIS)),
            &self.bn_name(branch),
            &[&y],
        )
    }

    /// `1x1/s -> BN -> act -> fxf same -> BN -> act -> 1x1 -> BN`.
    fn main_path(
        &self,
        graph: &mut Graph,
        x: &SymbolicTensor,
        stride: usize,
    ) -> Result<SymbolicTensor> {
        let [f1, f2, f3] = self.filters;
        let y = self.conv_bn(graph, x, f1, 1, stride, Padding::Valid, "2a")?;
        let y = graph.apply(Layer::Activation(self.activation), &[&y])?;
        let y = self.conv_bn(graph, &y, f2, self.kernel_size, 1, Padding::Same, "2b")?;
        let y = graph.apply(Layer::Activation(self.activation), &[&y])?;
        self.conv_bn(graph, &y, f3, 1, 1, Padding::Valid, "2c")
    }

    fn merge(
        &self,
        graph: &mut Graph,
        main: &SymbolicTensor,
        shortcut: &SymbolicTensor,
    ) -> Result<SymbolicTensor> {
        let sum = graph.add(&[main, shortcut])?;
        graph.apply(Layer::Activation(self.activation), &[&sum])
    }
}

/// Residual block whose shortcut is the unchanged input.
///
/// The input must already have `F3` channels, otherwise the addition fails
/// with [`crate::GraphError::ShapeMismatch`].
///
/// # Errors
/// Any error raised while applying the block's layers.
pub fn identity_block(
    graph: &mut Graph,
    x: &SymbolicTensor,
    block: &ResidualBlock,
) -> Result<SymbolicTensor> {
    debug!(stage = block.stage, block = %block.block, "identity block");
    let main = block.main_path(graph, x, 1)?;
    block.merge(graph, &main, x)
}

/// Residual block with a `1x1` projection shortcut of stride `stride`, used
/// where the channel count or resolution changes.
///
/// # Errors
/// Any error raised while applying the block's layers.
pub fn convolutional_block(
    graph: &mut Graph,
    x: &SymbolicTensor,
    block: &ResidualBlock,
    stride: usize,
) -> Result<SymbolicTensor> {
    debug!(stage = block.stage, block = %block.block, stride, "convolutional block");
    let main = block.main_path(graph, x, stride)?;
    let shortcut = block.conv_bn(graph, x, block.filters[2], 1, stride, Padding::Valid, "1")?;
    block.merge(graph, &main, &shortcut)
}

/// Label of the `index`-th block in a stage: `a` to `z`, then `b26`, `b27`, ...
#[must_use]
pub fn block_label(index: usize) -> String {
    match u8::try_from(index) {
        Ok(i) if i < 26 => char::from(b'a' + i).to_string(),
        _ => format!("b{index}"),
    }
}

/// Appends one stage: a convolutional block followed by identity blocks.
///
/// # Errors
/// Any error raised while applying the stage's layers.
pub fn stage(
    graph: &mut Graph,
    x: &SymbolicTensor,
    spec: &StageSpec,
    activation: ActivationKind,
    initializer: Initializer,
) -> Result<SymbolicTensor> {
    let mut x = x.clone();
    for index in 0..spec.blocks {
        let block = ResidualBlock {
            stage: spec.stage,
            block: block_label(index),
            kernel_size: spec.kernel_size,
            filters: spec.filters,
            activation,
            initializer,
        };
        x = if index == 0 {
            convolutional_block(graph, &x, &block, spec.stride)?
        } else {
            identity_block(graph, &x, &block)?
        };
    }
    Ok(x)
}

/// Builds the ResNet-50 classifier described by `config`.
///
/// # Errors
/// [`crate::GraphError::InvalidConfig`] for an invalid configuration, or any
/// graph error (for instance an input too small for the stride-2 stages).
pub fn resnet50(config: &ResNetConfig) -> Result<Model> {
    config.check()?;
    let activation = config.activation_kind()?;
    let init = config.kernel_initializer;

    let mut graph = Graph::new();
    let input = graph.input(config.input_shape.clone())?;
    let x = graph.apply(Layer::zero_padding(3, 3), &[&input])?;

    let stem = Conv2d::new(64, (7, 7))
        .strides((2, 2))
        .kernel_initializer(init);
    let x = graph.apply_named(Layer::Conv2d(stem), "conv1", &[&x])?;
    let x = graph.apply_named(Layer::BatchNorm(BatchNorm::new(CHANNEL_AXIS)), "bn_conv1", &[&x])?;
    let x = graph.apply(Layer::Activation(activation), &[&x])?;
    let mut x = graph.apply(Layer::MaxPool2d(Pool2d::new((3, 3)).strides((2, 2))), &[&x])?;

    for spec in &config.stages {
        x = stage(&mut graph, &x, spec, activation, init)?;
    }

    let x = graph.apply(
        Layer::AvgPool2d(Pool2d::new((2, 2)).padding(Padding::Same)),
        &[&x],
    )?;
    let x = graph.apply(Layer::Flatten, &[&x])?;
    let head = Dense::new(config.classes)
        .activation(ActivationKind::Softmax)
        .kernel_initializer(init);
    let output = graph.apply_named(Layer::Dense(head), &format!("fc{}", config.classes), &[&x])?;

    Ok(Model::new(graph, &input, &output, config.name.clone())?.with_threads(config.threads))
}
