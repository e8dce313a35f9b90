//! ShuffleNetV2 building blocks.
//!
//! This module contains the stem, the channel-shuffle unit (the "inverted
//! residual" of torchvision's ShuffleNetV2) and the stage that chains them.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};
use burn_extra_ops::{channel_shuffle, ShapeInventory};

use crate::error::{ShuffleNetError, ShuffleNetResult};

/// 3x3 depthwise convolution without bias.
fn depthwise_conv<B: Backend>(channels: usize, stride: usize, device: &Device<B>) -> Conv2d<B> {
    Conv2dConfig::new([channels, channels], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_groups(channels)
        .with_bias(false)
        .init(device)
}

/// 1x1 convolution without bias.
fn pointwise_conv<B: Backend>(inp: usize, oup: usize, device: &Device<B>) -> Conv2d<B> {
    Conv2dConfig::new([inp, oup], [1, 1])
        .with_bias(false)
        .init(device)
}

/// Stem: 3x3 stride-2 conv + bn + relu.
///
/// Its output is the finest level of the feature pyramid, so the max-pool that
/// follows it lives in the backbone rather than here.
#[derive(Module, Debug)]
pub struct Stem<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> Stem<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(input);
        let out = self.bn.forward(out);
        self.relu.forward(out)
    }

    /// Create a new stem.
    pub fn new(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
        }
    }

    pub fn collect_shapes(&self, inventory: &mut ShapeInventory) {
        inventory.conv2d("conv", &self.conv);
        inventory.batch_norm("bn", &self.bn);
    }
}

/// Branch applied to the full input of a downsampling unit:
/// depthwise strided conv -> bn -> 1x1 conv -> bn -> relu.
#[derive(Module, Debug)]
pub struct ProjectionBranch<B: Backend> {
    dw_conv: Conv2d<B>,
    dw_bn: BatchNorm<B, 2>,
    pw_conv: Conv2d<B>,
    pw_bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> ProjectionBranch<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.dw_bn.forward(self.dw_conv.forward(x));
        let x = self.pw_bn.forward(self.pw_conv.forward(x));
        self.relu.forward(x)
    }

    fn new(inp: usize, branch_features: usize, stride: usize, device: &Device<B>) -> Self {
        Self {
            dw_conv: depthwise_conv(inp, stride, device),
            dw_bn: BatchNormConfig::new(inp).init(device),
            pw_conv: pointwise_conv(inp, branch_features, device),
            pw_bn: BatchNormConfig::new(branch_features).init(device),
            relu: Relu::new(),
        }
    }

    fn collect_shapes(&self, inventory: &mut ShapeInventory) {
        inventory.conv2d("dw_conv", &self.dw_conv);
        inventory.batch_norm("dw_bn", &self.dw_bn);
        inventory.conv2d("pw_conv", &self.pw_conv);
        inventory.batch_norm("pw_bn", &self.pw_bn);
    }
}

/// Bottleneck branch present in every unit:
/// 1x1 conv -> bn -> relu -> depthwise conv -> bn -> 1x1 conv -> bn -> relu.
#[derive(Module, Debug)]
pub struct MainBranch<B: Backend> {
    pw_in_conv: Conv2d<B>,
    pw_in_bn: BatchNorm<B, 2>,
    dw_conv: Conv2d<B>,
    dw_bn: BatchNorm<B, 2>,
    pw_out_conv: Conv2d<B>,
    pw_out_bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> MainBranch<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.pw_in_bn.forward(self.pw_in_conv.forward(x));
        let x = self.relu.forward(x);
        let x = self.dw_bn.forward(self.dw_conv.forward(x));
        let x = self.pw_out_bn.forward(self.pw_out_conv.forward(x));
        self.relu.forward(x)
    }

    fn new(inp: usize, branch_features: usize, stride: usize, device: &Device<B>) -> Self {
        Self {
            pw_in_conv: pointwise_conv(inp, branch_features, device),
            pw_in_bn: BatchNormConfig::new(branch_features).init(device),
            dw_conv: depthwise_conv(branch_features, stride, device),
            dw_bn: BatchNormConfig::new(branch_features).init(device),
            pw_out_conv: pointwise_conv(branch_features, branch_features, device),
            pw_out_bn: BatchNormConfig::new(branch_features).init(device),
            relu: Relu::new(),
        }
    }

    fn collect_shapes(&self, inventory: &mut ShapeInventory) {
        inventory.conv2d("pw_in_conv", &self.pw_in_conv);
        inventory.batch_norm("pw_in_bn", &self.pw_in_bn);
        inventory.conv2d("dw_conv", &self.dw_conv);
        inventory.batch_norm("dw_bn", &self.dw_bn);
        inventory.conv2d("pw_out_conv", &self.pw_out_conv);
        inventory.batch_norm("pw_out_bn", &self.pw_out_bn);
    }
}

/// Configuration for a [`ShuffleUnit`].
#[derive(Config, Debug)]
pub struct ShuffleUnitConfig {
    /// Number of input channels.
    pub inp: usize,
    /// Number of output channels.
    pub oup: usize,
    /// Spatial stride, one of 1, 2 or 3.
    pub stride: usize,
}

impl ShuffleUnitConfig {
    /// Checks the stride range and, for stride 1, the even channel split.
    pub fn validate(&self) -> ShuffleNetResult<()> {
        if !(1..=3).contains(&self.stride) {
            return Err(ShuffleNetError::InvalidStride {
                stride: self.stride,
            });
        }
        if self.stride == 1 && self.inp != (self.oup / 2) << 1 {
            return Err(ShuffleNetError::UnevenSplit {
                inp: self.inp,
                oup: self.oup,
            });
        }
        Ok(())
    }

    /// Initializes a new `ShuffleUnit`.
    ///
    /// # Errors
    ///
    /// Returns [`ShuffleNetError::InvalidStride`] or [`ShuffleNetError::UnevenSplit`]
    /// if the unit cannot be built.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ShuffleNetResult<ShuffleUnit<B>> {
        self.validate()?;
        let branch_features = self.oup / 2;

        let (branch_proj, main_inp) = if self.stride > 1 {
            (
                Some(ProjectionBranch::new(
                    self.inp,
                    branch_features,
                    self.stride,
                    device,
                )),
                self.inp,
            )
        } else {
            (None, branch_features)
        };

        Ok(ShuffleUnit {
            branch_proj,
            branch_main: MainBranch::new(main_inp, branch_features, self.stride, device),
        })
    }
}

/// ShuffleNetV2 unit.
///
/// Stride 1: the input is split in two halves, the first passes through and the
/// second goes through the main branch. Stride > 1: both branches see the full
/// input. The concatenation is channel-shuffled with two groups.
#[derive(Module, Debug)]
pub struct ShuffleUnit<B: Backend> {
    branch_proj: Option<ProjectionBranch<B>>,
    branch_main: MainBranch<B>,
}

impl<B: Backend> ShuffleUnit<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = match &self.branch_proj {
            Some(branch_proj) => Tensor::cat(
                vec![branch_proj.forward(x.clone()), self.branch_main.forward(x)],
                1,
            ),
            None => {
                let channels = x.dims()[1];
                let half = channels / 2;
                let passthrough = x.clone().narrow(1, 0, half);
                let transformed = self.branch_main.forward(x.narrow(1, half, channels - half));
                Tensor::cat(vec![passthrough, transformed], 1)
            }
        };

        channel_shuffle(out, 2)
    }

    pub fn collect_shapes(&self, inventory: &mut ShapeInventory) {
        if let Some(branch_proj) = &self.branch_proj {
            inventory.scoped("branch_proj", |inv| branch_proj.collect_shapes(inv));
        }
        inventory.scoped("branch_main", |inv| self.branch_main.collect_shapes(inv));
    }
}

/// Configuration for a [`BackboneStage`].
#[derive(Config, Debug)]
pub struct BackboneStageConfig {
    /// Channels entering the stage.
    pub in_channels: usize,
    /// Channels produced by every unit of the stage.
    pub out_channels: usize,
    /// Number of units; the first one downsamples.
    pub repeats: usize,
}

impl BackboneStageConfig {
    /// Initializes a new `BackboneStage`.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ShuffleNetResult<BackboneStage<B>> {
        if self.repeats == 0 {
            return Err(ShuffleNetError::InvalidConfiguration {
                reason: "a stage needs at least one unit".to_string(),
            });
        }

        let mut units = Vec::with_capacity(self.repeats);
        units.push(ShuffleUnitConfig::new(self.in_channels, self.out_channels, 2).init(device)?);
        for _ in 1..self.repeats {
            units.push(
                ShuffleUnitConfig::new(self.out_channels, self.out_channels, 1).init(device)?,
            );
        }

        Ok(BackboneStage { units })
    }
}

/// A downsampling unit followed by `repeats - 1` width-preserving units.
#[derive(Module, Debug)]
pub struct BackboneStage<B: Backend> {
    units: Vec<ShuffleUnit<B>>,
}

impl<B: Backend> BackboneStage<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.units.iter().fold(x, |x, unit| unit.forward(x))
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn collect_shapes(&self, inventory: &mut ShapeInventory) {
        inventory.scoped("units", |inv| {
            for (index, unit) in self.units.iter().enumerate() {
                inv.scoped(&index.to_string(), |inv| unit.collect_shapes(inv));
            }
        });
    }
}
