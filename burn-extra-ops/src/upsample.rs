//! # Integer-Factor Upsampling
//!
//! Bilinear upsampling with half-pixel centers, i.e. the sampling grid of
//! PyTorch's `nn.Upsample(scale_factor=s, mode="bilinear")` with
//! `align_corners=False`. Burn's `interpolate` samples corner-aligned, which
//! shifts every fused feature map by a fraction of a pixel relative to weights
//! trained with the half-pixel grid.

use burn::prelude::*;

/// Upsamples the spatial axes of a `[N, C, H, W]` tensor by `scale`.
///
/// Output pixel `o` samples source coordinate `(o + 0.5) / scale - 0.5`, clamped
/// to the image borders.
///
/// # Panics
///
/// Panics if `scale` is zero.
pub fn upsample_bilinear<B: Backend>(x: Tensor<B, 4>, scale: usize) -> Tensor<B, 4> {
    assert!(scale > 0, "upsampling scale must be positive");
    if scale == 1 {
        return x;
    }
    let x = upsample_axis(x, 2, scale);
    upsample_axis(x, 3, scale)
}

fn upsample_axis<B: Backend>(x: Tensor<B, 4>, axis: usize, scale: usize) -> Tensor<B, 4> {
    let dims = x.dims();
    let len = dims[axis];

    // Neighbours with the border replicated.
    let prev = if len > 1 {
        Tensor::cat(
            vec![x.clone().narrow(axis, 0, 1), x.clone().narrow(axis, 0, len - 1)],
            axis,
        )
    } else {
        x.clone()
    };
    let next = if len > 1 {
        Tensor::cat(
            vec![x.clone().narrow(axis, 1, len - 1), x.clone().narrow(axis, len - 1, 1)],
            axis,
        )
    } else {
        x.clone()
    };

    let phases = (0..scale)
        .map(|phase| {
            let offset = (phase as f64 + 0.5) / scale as f64 - 0.5;
            if offset < 0.0 {
                x.clone().mul_scalar(1.0 + offset) + prev.clone().mul_scalar(-offset)
            } else {
                x.clone().mul_scalar(1.0 - offset) + next.clone().mul_scalar(offset)
            }
        })
        .collect::<Vec<_>>();

    let mut out_dims = dims;
    out_dims[axis] = len * scale;
    Tensor::stack::<5>(phases, axis + 1).reshape(out_dims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::TensorData};

    type TestBackend = NdArray<f32>;

    fn assert_close(actual: Tensor<TestBackend, 4>, expected: &[f32]) {
        let actual = actual.into_data().to_vec::<f32>().unwrap();
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn doubles_a_row_with_half_pixel_weights() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.0f32, 4.0, 8.0], [1, 1, 1, 3]),
            &device,
        );
        let y = upsample_bilinear(x, 2);

        assert_eq!(y.dims(), [1, 1, 2, 6]);
        let row = [0.0, 1.0, 3.0, 5.0, 7.0, 8.0];
        let expected = [row, row].concat();
        assert_close(y, &expected);
    }

    #[test]
    fn quadruples_a_column() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.0f32, 8.0], [1, 1, 2, 1]),
            &device,
        );
        let y = upsample_bilinear(x, 4);

        assert_eq!(y.dims(), [1, 1, 8, 4]);
        let y = y.narrow(3, 0, 1);
        assert_close(y, &[0.0, 0.0, 1.0, 3.0, 5.0, 7.0, 8.0, 8.0]);
    }

    #[test]
    fn constant_maps_stay_constant() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([2, 3, 4, 5], &device).mul_scalar(3.0);
        let y = upsample_bilinear(x, 2);

        assert_eq!(y.dims(), [2, 3, 8, 10]);
        assert_close(y, &[3.0; 2 * 3 * 8 * 10]);
    }
}
