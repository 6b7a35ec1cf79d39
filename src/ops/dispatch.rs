//! Layer-to-kernel dispatch.
//!
//! Parameters arrive in the order [`crate::graph::Layer::param_slots`]
//! declares them:
//!
//! - `Conv2d`: `kernel`, optional `bias`
//! - `BatchNorm`: `gamma`, `beta`, `moving_mean`, `moving_variance`
//! - `Dense`: `kernel`, `bias`

use super::cpu;
use crate::graph::Layer;
use crate::tensors::Tensor;

/// Evaluates one non-input layer on a batch.
///
/// # Panics
/// Panics for [`Layer::Input`] (inputs are fed, not computed) and on any
/// shape or parameter-count mismatch.
#[must_use]
pub fn forward(layer: &Layer, inputs: &[&Tensor<f32>], params: &[&Tensor<f32>]) -> Tensor<f32> {
    match layer {
        Layer::Input { .. } => unreachable!("input nodes are fed by the caller"),
        Layer::ZeroPadding2d { rows, cols } => cpu::zero_pad2d(inputs[0], *rows, *cols),
        Layer::Conv2d(conv) => cpu::conv2d(
            inputs[0],
            params[0],
            params.get(1).copied(),
            conv.strides,
            conv.padding,
        ),
        Layer::BatchNorm(bn) => cpu::batch_norm(
            inputs[0],
            bn.axis,
            cpu::Moments {
                gamma: params[0],
                beta: params[1],
                mean: params[2],
                variance: params[3],
            },
            bn.epsilon,
        ),
        Layer::Activation(kind) => cpu::activation(inputs[0], *kind),
        Layer::MaxPool2d(pool) => cpu::max_pool2d(inputs[0], pool),
        Layer::AvgPool2d(pool) => cpu::avg_pool2d(inputs[0], pool),
        Layer::Flatten => cpu::flatten(inputs[0]),
        Layer::Dense(dense) => cpu::dense(inputs[0], params[0], params[1], dense.activation),
        Layer::Add => cpu::add(inputs),
    }
}
