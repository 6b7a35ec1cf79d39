//! Parallel CPU kernels
//!
//! Every image kernel takes and returns channels-last tensors
//! (`[batch, height, width, channels]`). Work is split with
//! [`rayon`](https://docs.rs/rayon) along output rows, one row being
//! `width * channels` contiguous values, so each task writes a disjoint slice.
//!
//! ## Implemented Ops
//!
//! - `zero_pad2d`, `conv2d`, `max_pool2d`, `avg_pool2d`
//! - `batch_norm` (inference: moving statistics)
//! - `activation` (element-wise kinds and row-wise softmax)
//! - `dense`, `flatten`, `add`

use crate::graph::{ActivationKind, Padding, Pool2d};
use crate::tensors::Tensor;
use rayon::prelude::*;

fn nhwc(x: &Tensor<f32>) -> [usize; 4] {
    match x.shape[..] {
        [n, h, w, c] => [n, h, w, c],
        _ => panic!("expected an NHWC tensor, found shape {:?}", x.shape),
    }
}

fn window(padding: Padding, input: usize, size: usize, stride: usize) -> (usize, usize) {
    padding
        .resolve(input, size, stride)
        .unwrap_or_else(|| panic!("window {size} (stride {stride}) does not fit extent {input}"))
}

/// In-bounds input range covered by output position `o`.
#[inline]
fn span(o: usize, stride: usize, size: usize, pad: usize, limit: usize) -> (usize, usize) {
    let start = o * stride;
    (
        start.saturating_sub(pad),
        (start + size).saturating_sub(pad).min(limit),
    )
}

/// Surrounds every image with zero rows and columns.
///
/// `rows = (top, bottom)`, `cols = (left, right)`.
///
/// # Panics
/// Panics if `x` is not rank 4.
#[must_use]
pub fn zero_pad2d(x: &Tensor<f32>, rows: (usize, usize), cols: (usize, usize)) -> Tensor<f32> {
    let [n, h, w, c] = nhwc(x);
    let oh = h + rows.0 + rows.1;
    let ow = w + cols.0 + cols.1;
    let mut out = vec![0.0; n * oh * ow * c];

    out.par_chunks_mut(ow * c)
        .enumerate()
        .for_each(|(row, out_row)| {
            let (b, y) = (row / oh, row % oh);
            if y < rows.0 || y >= rows.0 + h {
                return;
            }
            let src = (b * h + y - rows.0) * w * c;
            out_row[cols.0 * c..(cols.0 + w) * c].copy_from_slice(&x.data[src..src + w * c]);
        });

    Tensor::new(vec![n, oh, ow, c], out)
}

/// 2-D convolution of `x` with a `[kh, kw, in, out]` kernel.
///
/// # Requirements
/// - `x.shape = [n, h, w, in]`
/// - `bias`, when present, has `out` elements
///
/// # Panics
/// Panics on channel mismatches or when the kernel does not fit the input.
#[must_use]
pub fn conv2d(
    x: &Tensor<f32>,
    kernel: &Tensor<f32>,
    bias: Option<&Tensor<f32>>,
    strides: (usize, usize),
    padding: Padding,
) -> Tensor<f32> {
    let [n, h, w, cin] = nhwc(x);
    let [kh, kw, kin, cout] = match kernel.shape[..] {
        [a, b, c, d] => [a, b, c, d],
        _ => panic!("conv2d kernel must be rank 4, found {:?}", kernel.shape),
    };
    assert_eq!(cin, kin, "conv2d channel mismatch");
    if let Some(bias) = bias {
        assert_eq!(bias.len(), cout, "conv2d bias length mismatch");
    }

    let (oh, pad_top) = window(padding, h, kh, strides.0);
    let (ow, pad_left) = window(padding, w, kw, strides.1);
    let mut out = vec![0.0; n * oh * ow * cout];

    out.par_chunks_mut(ow * cout)
        .enumerate()
        .for_each(|(row, out_row)| {
            let (b, oy) = (row / oh, row % oh);
            for (ox, acc) in out_row.chunks_mut(cout).enumerate() {
                if let Some(bias) = bias {
                    acc.copy_from_slice(&bias.data);
                }
                for ky in 0..kh {
                    let Some(iy) = (oy * strides.0 + ky).checked_sub(pad_top) else {
                        continue;
                    };
                    if iy >= h {
                        continue;
                    }
                    for kx in 0..kw {
                        let Some(ix) = (ox * strides.1 + kx).checked_sub(pad_left) else {
                            continue;
                        };
                        if ix >= w {
                            continue;
                        }
                        let px = ((b * h + iy) * w + ix) * cin;
                        let taps = (ky * kw + kx) * cin * cout;
                        for (ci, &v) in x.data[px..px + cin].iter().enumerate() {
                            let weights = &kernel.data[taps + ci * cout..taps + (ci + 1) * cout];
                            for (a, &k) in acc.iter_mut().zip(weights) {
                                *a += v * k;
                            }
                        }
                    }
                }
            }
        });

    Tensor::new(vec![n, oh, ow, cout], out)
}

/// Per-channel statistics and affine terms of a batch normalization layer.
#[derive(Debug, Clone, Copy)]
pub struct Moments<'a> {
    /// Scale.
    pub gamma: &'a Tensor<f32>,
    /// Offset.
    pub beta: &'a Tensor<f32>,
    /// Moving mean.
    pub mean: &'a Tensor<f32>,
    /// Moving variance.
    pub variance: &'a Tensor<f32>,
}

/// Normalises `x` along `axis` with fixed statistics:
/// `gamma * (x - mean) / sqrt(variance + epsilon) + beta`.
///
/// # Panics
/// Panics if `axis` is out of range or a statistic has the wrong length.
#[must_use]
pub fn batch_norm(x: &Tensor<f32>, axis: usize, m: Moments<'_>, epsilon: f32) -> Tensor<f32> {
    assert!(axis < x.rank(), "batch_norm axis {axis} out of range for {:?}", x.shape);
    let channels = x.shape[axis];
    let inner: usize = x.shape[axis + 1..].iter().product();
    for t in [m.gamma, m.beta, m.mean, m.variance] {
        assert_eq!(t.len(), channels, "batch_norm statistic length mismatch");
    }

    let scale: Vec<f32> = m
        .gamma
        .data
        .iter()
        .zip(&m.variance.data)
        .map(|(g, v)| g / (v + epsilon).sqrt())
        .collect();
    let shift: Vec<f32> = m
        .beta
        .data
        .iter()
        .zip(&m.mean.data)
        .zip(&scale)
        .map(|((b, mu), s)| b - mu * s)
        .collect();

    let mut data = x.data.clone();
    data.par_iter_mut().enumerate().for_each(|(i, v)| {
        let ch = (i / inner) % channels;
        *v = *v * scale[ch] + shift[ch];
    });

    Tensor::new(x.shape.clone(), data)
}

fn softmax_row(row: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in row.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in row.iter_mut() {
        *v /= sum;
    }
}

fn activate_in_place(data: &mut [f32], width: usize, kind: ActivationKind) {
    match kind {
        ActivationKind::Linear => {}
        ActivationKind::Softmax => data.par_chunks_mut(width.max(1)).for_each(softmax_row),
        _ => data.par_iter_mut().for_each(|v| *v = kind.apply(*v)),
    }
}

/// Applies `kind` element-wise, or along the last axis for softmax.
#[must_use]
pub fn activation(x: &Tensor<f32>, kind: ActivationKind) -> Tensor<f32> {
    let mut data = x.data.clone();
    activate_in_place(&mut data, x.shape.last().copied().unwrap_or(1), kind);
    Tensor::new(x.shape.clone(), data)
}

#[derive(Clone, Copy)]
enum Reduce {
    Max,
    Mean,
}

fn pool2d(x: &Tensor<f32>, pool: &Pool2d, reduce: Reduce) -> Tensor<f32> {
    let [n, h, w, c] = nhwc(x);
    let (ph, pw) = pool.pool;
    let (sh, sw) = pool.strides;
    let (oh, pad_top) = window(pool.padding, h, ph, sh);
    let (ow, pad_left) = window(pool.padding, w, pw, sw);
    let mut out = vec![0.0; n * oh * ow * c];

    out.par_chunks_mut(ow * c)
        .enumerate()
        .for_each(|(row, out_row)| {
            let (b, oy) = (row / oh, row % oh);
            let (y0, y1) = span(oy, sh, ph, pad_top, h);
            for (ox, cell) in out_row.chunks_mut(c).enumerate() {
                let (x0, x1) = span(ox, sw, pw, pad_left, w);
                if let Reduce::Max = reduce {
                    cell.fill(f32::NEG_INFINITY);
                }
                for iy in y0..y1 {
                    for ix in x0..x1 {
                        let px = ((b * h + iy) * w + ix) * c;
                        for (o, &v) in cell.iter_mut().zip(&x.data[px..px + c]) {
                            match reduce {
                                Reduce::Max => *o = o.max(v),
                                Reduce::Mean => *o += v,
                            }
                        }
                    }
                }
                if let Reduce::Mean = reduce {
                    let count = ((y1 - y0) * (x1 - x0)) as f32;
                    cell.iter_mut().for_each(|o| *o /= count);
                }
            }
        });

    Tensor::new(vec![n, oh, ow, c], out)
}

/// Window maximum; padded cells never win.
///
/// # Panics
/// Panics if `x` is not rank 4 or the window does not fit.
#[must_use]
pub fn max_pool2d(x: &Tensor<f32>, pool: &Pool2d) -> Tensor<f32> {
    pool2d(x, pool, Reduce::Max)
}

/// Window mean over the in-bounds cells only.
///
/// # Panics
/// Panics if `x` is not rank 4 or the window does not fit.
#[must_use]
pub fn avg_pool2d(x: &Tensor<f32>, pool: &Pool2d) -> Tensor<f32> {
    pool2d(x, pool, Reduce::Mean)
}

/// Collapses every sample to one axis: `[n, ...] -> [n, prod(...)]`.
///
/// # Panics
/// Panics on a rank-0 tensor.
#[must_use]
pub fn flatten(x: &Tensor<f32>) -> Tensor<f32> {
    let n = x.shape[0];
    let rest = x.shape[1..].iter().product::<usize>();
    x.clone().reshape(vec![n, rest])
}

/// Computes `activation(x · kernel + bias)` for `x: [n, in]`, `kernel: [in, units]`.
///
/// # Panics
/// Panics if the inner dimensions or the bias length do not match.
#[must_use]
pub fn dense(
    x: &Tensor<f32>,
    kernel: &Tensor<f32>,
    bias: &Tensor<f32>,
    activation: ActivationKind,
) -> Tensor<f32> {
    let [n, k] = match x.shape[..] {
        [n, k] => [n, k],
        _ => panic!("dense expects a [batch, features] input, found {:?}", x.shape),
    };
    assert_eq!(kernel.rank(), 2, "dense kernel must be rank 2");
    assert_eq!(k, kernel.shape[0], "dense shape mismatch");
    let units = kernel.shape[1];
    assert_eq!(bias.len(), units, "dense bias length mismatch");

    let mut out = vec![0.0; n * units];
    out.par_chunks_mut(units)
        .enumerate()
        .for_each(|(i, row)| {
            row.copy_from_slice(&bias.data);
            for (l, &v) in x.data[i * k..(i + 1) * k].iter().enumerate() {
                for (o, &wt) in row.iter_mut().zip(&kernel.data[l * units..(l + 1) * units]) {
                    *o += v * wt;
                }
            }
        });

    activate_in_place(&mut out, units, activation);
    Tensor::new(vec![n, units], out)
}

/// Element-wise sum of same-shaped tensors.
///
/// # Panics
/// Panics if `inputs` is empty or the shapes differ.
#[must_use]
pub fn add(inputs: &[&Tensor<f32>]) -> Tensor<f32> {
    let (first, rest) = inputs.split_first().expect("add needs at least one input");
    let mut data = first.data.clone();
    for t in rest {
        assert_eq!(t.shape, first.shape, "add shape mismatch");
        data.par_iter_mut().zip(&t.data).for_each(|(a, b)| *a += b);
    }
    Tensor::new(first.shape.clone(), data)
}
