//! # Multi-Scale Refinement Unit
//!
//! Enlarges the receptive field of a single feature map cheaply. Four
//! half-width projections are computed in parallel (plain, 5x5 average pool
//! stride 2, 9x9 average pool stride 4, depthwise conv stride 2). The pooled
//! ones are upsampled and fused one after another through residual 3x3
//! refinement convs. All four results are then concatenated, compressed and
//! added to a shortcut projection of the input.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AvgPool2d, AvgPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};
use burn_extra_ops::ShapeInventory;

use crate::error::{ShuffleSegError, ShuffleSegResult};

/// Number of progressive fusion levels.
const NUM_LEVELS: usize = 3;

/// Nearest-neighbour resize of `x` to the spatial size of `reference`.
fn upsample_to<B: Backend>(x: Tensor<B, 4>, reference: &Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, height, width] = reference.dims();
    interpolate(
        x,
        [height, width],
        InterpolateOptions::new(InterpolateMode::Nearest),
    )
}

/// bn -> relu -> conv.
#[derive(Module, Debug)]
pub struct PreActConv<B: Backend> {
    bn: BatchNorm<B, 2>,
    relu: Relu,
    conv: Conv2d<B>,
}

impl<B: Backend> PreActConv<B> {
    fn new(inp: usize, oup: usize, kernel: usize, device: &Device<B>) -> Self {
        let padding = kernel / 2;
        let conv = Conv2dConfig::new([inp, oup], [kernel, kernel])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_bias(false)
            .init(device);

        Self {
            bn: BatchNormConfig::new(inp).init(device),
            relu: Relu::new(),
            conv,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(self.relu.forward(self.bn.forward(x)))
    }

    fn collect_shapes(&self, inventory: &mut ShapeInventory) {
        inventory.batch_norm("bn", &self.bn);
        inventory.conv2d("conv", &self.conv);
    }
}

/// Average pool -> bn -> 1x1 conv.
#[derive(Module, Debug)]
pub struct PooledProjection<B: Backend> {
    pool: AvgPool2d,
    bn: BatchNorm<B, 2>,
    conv: Conv2d<B>,
}

impl<B: Backend> PooledProjection<B> {
    /// Pooling window `2 * stride + 1`, padded so the output is `ceil(size / stride)`.
    fn new(inp: usize, oup: usize, stride: usize, device: &Device<B>) -> Self {
        let kernel = 2 * stride + 1;
        let pool = AvgPool2dConfig::new([kernel, kernel])
            .with_strides([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(stride, stride))
            .with_count_include_pad(true)
            .init();

        Self {
            pool,
            bn: BatchNormConfig::new(inp).init(device),
            conv: Conv2dConfig::new([inp, oup], [1, 1])
                .with_bias(false)
                .init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(self.bn.forward(self.pool.forward(x)))
    }

    fn collect_shapes(&self, inventory: &mut ShapeInventory) {
        inventory.batch_norm("bn", &self.bn);
        inventory.conv2d("conv", &self.conv);
    }
}

/// Depthwise 3x3 stride-2 conv -> bn -> 1x1 conv.
#[derive(Module, Debug)]
pub struct StridedProjection<B: Backend> {
    dw_conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    conv: Conv2d<B>,
}

impl<B: Backend> StridedProjection<B> {
    fn new(inp: usize, oup: usize, device: &Device<B>) -> Self {
        let dw_conv = Conv2dConfig::new([inp, inp], [3, 3])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_groups(inp)
            .with_bias(false)
            .init(device);

        Self {
            dw_conv,
            bn: BatchNormConfig::new(inp).init(device),
            conv: Conv2dConfig::new([inp, oup], [1, 1])
                .with_bias(false)
                .init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(self.bn.forward(self.dw_conv.forward(x)))
    }

    fn collect_shapes(&self, inventory: &mut ShapeInventory) {
        inventory.conv2d("dw_conv", &self.dw_conv);
        inventory.batch_norm("bn", &self.bn);
        inventory.conv2d("conv", &self.conv);
    }
}

/// Configuration for the `MultiScaleRefinement` unit.
#[derive(Config, Debug)]
pub struct MultiScaleRefinementConfig {
    /// Channels of the input feature map. Must be even.
    in_channels: usize,
    /// Channels of the output feature map.
    out_channels: usize,
}

impl MultiScaleRefinementConfig {
    /// Initializes a new `MultiScaleRefinement` unit.
    ///
    /// # Errors
    ///
    /// Returns `ShuffleSegError::InvalidConfiguration` if `in_channels` is odd or
    /// either width is zero.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ShuffleSegResult<MultiScaleRefinement<B>> {
        if self.in_channels < 2 || self.in_channels % 2 != 0 || self.out_channels == 0 {
            return Err(ShuffleSegError::InvalidConfiguration {
                reason: format!(
                    "refinement unit needs an even input width and a positive output width, got {} -> {}",
                    self.in_channels, self.out_channels
                ),
            });
        }

        let inplanes = self.in_channels;
        let half = inplanes / 2;

        Ok(MultiScaleRefinement {
            base: PreActConv::new(inplanes, half, 1, device),
            pool_half: PooledProjection::new(inplanes, half, 2, device),
            pool_quarter: PooledProjection::new(inplanes, half, 4, device),
            strided: StridedProjection::new(inplanes, half, device),
            levels: (0..NUM_LEVELS)
                .map(|_| PreActConv::new(half, half, 3, device))
                .collect(),
            compress: PreActConv::new(half * (NUM_LEVELS + 1), self.out_channels, 1, device),
            shortcut: PreActConv::new(inplanes, self.out_channels, 1, device),
        })
    }
}

/// Multi-Scale Refinement Unit.
#[derive(Module, Debug)]
pub struct MultiScaleRefinement<B: Backend> {
    base: PreActConv<B>,
    pool_half: PooledProjection<B>,
    pool_quarter: PooledProjection<B>,
    strided: StridedProjection<B>,
    levels: Vec<PreActConv<B>>,
    compress: PreActConv<B>,
    shortcut: PreActConv<B>,
}

impl<B: Backend> MultiScaleRefinement<B> {
    /// # Shapes
    /// * `x` - `[N, in_channels, H, W]`
    /// * Returns - `[N, out_channels, H, W]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let base = self.base.forward(x.clone());
        let context = [
            self.pool_half.forward(x.clone()),
            self.pool_quarter.forward(x.clone()),
            self.strided.forward(x.clone()),
        ];

        let mut fused = Vec::with_capacity(NUM_LEVELS + 1);
        fused.push(base);
        for (level, coarse) in self.levels.iter().zip(context) {
            let previous = &fused[fused.len() - 1];
            let refined = level.forward(upsample_to(coarse, previous) + previous.clone());
            fused.push(refined);
        }

        self.compress.forward(Tensor::cat(fused, 1)) + self.shortcut.forward(x)
    }

    /// # Errors
    ///
    /// Returns `ShuffleSegError::IncompatibleWeights` if `record` has a different
    /// number of fusion levels.
    pub fn check_record(&self, record: &MultiScaleRefinementRecord<B>) -> ShuffleSegResult<()> {
        if record.levels.len() == self.levels.len() {
            Ok(())
        } else {
            Err(ShuffleSegError::IncompatibleWeights {
                name: "levels".to_string(),
                expected: vec![self.levels.len()],
                actual: format!("[{}]", record.levels.len()),
            })
        }
    }

    pub fn collect_shapes(&self, inventory: &mut ShapeInventory) {
        inventory.scoped("base", |inv| self.base.collect_shapes(inv));
        inventory.scoped("pool_half", |inv| self.pool_half.collect_shapes(inv));
        inventory.scoped("pool_quarter", |inv| self.pool_quarter.collect_shapes(inv));
        inventory.scoped("strided", |inv| self.strided.collect_shapes(inv));
        inventory.scoped("levels", |inv| {
            for (index, level) in self.levels.iter().enumerate() {
                inv.scoped(&index.to_string(), |inv| level.collect_shapes(inv));
            }
        });
        inventory.scoped("compress", |inv| self.compress.collect_shapes(inv));
        inventory.scoped("shortcut", |inv| self.shortcut.collect_shapes(inv));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_weights::{filled, keep_channels, TestBackend};
    use burn::tensor::{Distribution, Tolerance};

    /// Source of the coarse context for a fusion level.
    #[derive(Clone, Copy, PartialEq)]
    enum Context {
        PoolHalf,
        PoolQuarter,
        Strided,
    }

    /// Largest output magnitude when only `active` carries signal and the
    /// compression conv reads only concatenation slot `slot` (0 is the base).
    fn slot_response(active: Context, slot: usize) -> f32 {
        let device = Default::default();
        let unit = MultiScaleRefinementConfig::new(4, 4)
            .init::<TestBackend>(&device)
            .unwrap();
        let gate = |context| if context == active { 1.0 } else { 0.0 };

        let mut record = unit.clone().into_record();
        record.base.conv.weight = filled(&record.base.conv.weight, 0.0);
        record.pool_half.conv.weight = filled(&record.pool_half.conv.weight, gate(Context::PoolHalf));
        record.pool_quarter.conv.weight =
            filled(&record.pool_quarter.conv.weight, gate(Context::PoolQuarter));
        record.strided.dw_conv.weight = filled(&record.strided.dw_conv.weight, 1.0);
        record.strided.conv.weight = filled(&record.strided.conv.weight, gate(Context::Strided));
        for level in record.levels.iter_mut() {
            level.conv.weight = filled(&level.conv.weight, 1.0);
        }
        record.compress.conv.weight = keep_channels(&record.compress.conv.weight, 1, 2 * slot..2 * slot + 2);
        record.shortcut.conv.weight = filled(&record.shortcut.conv.weight, 0.0);

        let unit = unit.load_record(record);
        let output = unit.forward(Tensor::ones([1, 4, 16, 16], &device));
        output.abs().max().into_scalar()
    }

    #[test]
    fn base_projection_fills_the_first_slot() {
        let device = Default::default();
        let unit = MultiScaleRefinementConfig::new(4, 4)
            .init::<TestBackend>(&device)
            .unwrap();

        let mut record = unit.clone().into_record();
        record.base.conv.weight = filled(&record.base.conv.weight, 1.0);
        for level in record.levels.iter_mut() {
            level.conv.weight = filled(&level.conv.weight, 0.0);
        }
        record.compress.conv.weight = keep_channels(&filled(&record.compress.conv.weight, 1.0), 1, 0..2);
        record.shortcut.conv.weight = filled(&record.shortcut.conv.weight, 0.0);
        let unit = unit.load_record(record);

        // Fresh batch norms scale by 1 / sqrt(1 + eps). Base: 4 inputs of 1,
        // compression: 2 base channels.
        let scale = 1.0 / (1.0 + 1e-5);
        let output = unit.forward(Tensor::ones([1, 4, 8, 8], &device));
        let expected = Tensor::<TestBackend, 4>::full([1, 4, 8, 8], 8.0 * scale, &device);

        output
            .into_data()
            .assert_approx_eq::<f32>(&expected.into_data(), Tolerance::relative(1e-4));
    }

    #[test]
    fn half_resolution_pool_feeds_the_first_level() {
        assert!(slot_response(Context::PoolHalf, 1) > 0.0);
        assert_eq!(slot_response(Context::PoolQuarter, 1), 0.0);
        assert_eq!(slot_response(Context::Strided, 1), 0.0);
    }

    #[test]
    fn quarter_resolution_pool_feeds_the_second_level() {
        assert!(slot_response(Context::PoolQuarter, 2) > 0.0);
        assert_eq!(slot_response(Context::Strided, 2), 0.0);
    }

    #[test]
    fn strided_projection_feeds_the_last_level() {
        assert!(slot_response(Context::Strided, 3) > 0.0);
        assert_eq!(slot_response(Context::Strided, 0), 0.0);
    }

    #[test]
    fn shortcut_is_added_to_the_compressed_features() {
        let device = Default::default();
        let unit = MultiScaleRefinementConfig::new(4, 2)
            .init::<TestBackend>(&device)
            .unwrap();

        let mut record = unit.clone().into_record();
        record.compress.conv.weight = filled(&record.compress.conv.weight, 0.0);
        record.shortcut.conv.weight = filled(&record.shortcut.conv.weight, 0.5);
        let unit = unit.load_record(record);

        // 4 channels of 2 * 0.5 after the shortcut batch norm.
        let scale = 1.0 / (1.0 + 1e-5f32).sqrt();
        let output = unit.forward(Tensor::full([1, 4, 6, 6], 2.0, &device));
        let expected = Tensor::<TestBackend, 4>::full([1, 2, 6, 6], 4.0 * scale, &device);

        output
            .into_data()
            .assert_approx_eq::<f32>(&expected.into_data(), Tolerance::relative(1e-4));
    }

    #[test]
    fn preserves_spatial_size() {
        let device = Default::default();
        let unit = MultiScaleRefinementConfig::new(12, 12)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 4>::random([2, 12, 32, 40], Distribution::Default, &device);

        assert_eq!(unit.forward(x).dims(), [2, 12, 32, 40]);
    }

    #[test]
    fn output_width_may_differ_from_input() {
        let device = Default::default();
        let unit = MultiScaleRefinementConfig::new(16, 6)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 4>::random([1, 16, 24, 16], Distribution::Default, &device);

        assert_eq!(unit.forward(x).dims(), [1, 6, 24, 16]);
    }

    #[test]
    fn handles_sizes_not_divisible_by_four() {
        let device = Default::default();
        let unit = MultiScaleRefinementConfig::new(4, 4)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 4>::random([1, 4, 13, 7], Distribution::Default, &device);

        assert_eq!(unit.forward(x).dims(), [1, 4, 13, 7]);
    }

    #[test]
    fn rejects_odd_input_width() {
        let result = MultiScaleRefinementConfig::new(11, 12).init::<TestBackend>(&Default::default());

        match result {
            Err(ShuffleSegError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("even input width"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn records_every_projection() {
        let unit = MultiScaleRefinementConfig::new(12, 12)
            .init::<TestBackend>(&Default::default())
            .unwrap();
        let mut inventory = ShapeInventory::new();
        unit.collect_shapes(&mut inventory);

        // 6 pre-activation convs, 2 pooled and 1 strided projection.
        assert_eq!(inventory.len(), 6 * 5 + 2 * 5 + 6);
        assert!(inventory
            .entries()
            .iter()
            .any(|(name, shape)| name == "levels.2.conv.weight" && *shape == vec![6, 6, 3, 3]));
        assert!(inventory
            .entries()
            .iter()
            .any(|(name, shape)| name == "compress.conv.weight" && *shape == vec![12, 24, 1, 1]));
    }
}
