//! Weight overrides for tests that pin how tensors are wired together.

use std::ops::Range;

use burn::{backend::NdArray, module::Param, prelude::*};

pub type TestBackend = NdArray<f32>;

/// A parameter of the same shape as `param` filled with `value`.
pub fn filled<const D: usize>(
    param: &Param<Tensor<TestBackend, D>>,
    value: f32,
) -> Param<Tensor<TestBackend, D>> {
    let tensor = param.val();
    Param::from_tensor(Tensor::full(tensor.shape(), value, &tensor.device()))
}

/// Zeroes every slice of `weight` along `dim` outside `channels`.
pub fn keep_channels(
    weight: &Param<Tensor<TestBackend, 4>>,
    dim: usize,
    channels: Range<usize>,
) -> Param<Tensor<TestBackend, 4>> {
    let weight = weight.val();
    let device = weight.device();
    let dims = weight.dims();
    let mut kept = dims;
    kept[dim] = channels.len();
    let mut ranges = dims.map(|size| 0..size);
    ranges[dim] = channels;

    let mask = Tensor::zeros(dims, &device).slice_assign(ranges, Tensor::ones(kept, &device));
    Param::from_tensor(weight * mask)
}
