//! Convolution blocks of the segmentation decoder.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};
use burn_extra_ops::ShapeInventory;

/// Configuration for the `DepthwiseSeparable` block.
#[derive(Config, Debug)]
pub struct DepthwiseSeparableConfig {
    in_channels: usize,
    out_channels: usize,
}

impl DepthwiseSeparableConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> DepthwiseSeparable<B> {
        let dw_conv = Conv2dConfig::new([self.in_channels, self.in_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_groups(self.in_channels)
            .init(device);
        let pw_conv = Conv2dConfig::new([self.in_channels, self.out_channels], [1, 1]).init(device);

        DepthwiseSeparable {
            dw_conv,
            dw_bn: BatchNormConfig::new(self.in_channels).init(device),
            pw_conv,
            pw_bn: BatchNormConfig::new(self.out_channels).init(device),
            relu: Relu::new(),
        }
    }
}

/// Depthwise 3x3 conv -> bn -> 1x1 conv -> bn -> relu.
///
/// Reduces the concatenated deepest levels to the decoder width.
#[derive(Module, Debug)]
pub struct DepthwiseSeparable<B: Backend> {
    dw_conv: Conv2d<B>,
    dw_bn: BatchNorm<B, 2>,
    pw_conv: Conv2d<B>,
    pw_bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> DepthwiseSeparable<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.dw_bn.forward(self.dw_conv.forward(x));
        let x = self.pw_bn.forward(self.pw_conv.forward(x));
        self.relu.forward(x)
    }

    pub fn collect_shapes(&self, inventory: &mut ShapeInventory) {
        inventory.conv2d("dw_conv", &self.dw_conv);
        inventory.batch_norm("dw_bn", &self.dw_bn);
        inventory.conv2d("pw_conv", &self.pw_conv);
        inventory.batch_norm("pw_bn", &self.pw_bn);
    }
}

/// Configuration for the `ConvBnRelu` block.
#[derive(Config, Debug)]
pub struct ConvBnReluConfig {
    in_channels: usize,
    out_channels: usize,
}

impl ConvBnReluConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ConvBnRelu<B> {
        let conv = Conv2dConfig::new([self.in_channels, self.out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);

        ConvBnRelu {
            conv,
            bn: BatchNormConfig::new(self.out_channels).init(device),
            relu: Relu::new(),
        }
    }
}

/// 3x3 conv (with bias) -> bn -> relu.
#[derive(Module, Debug)]
pub struct ConvBnRelu<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> ConvBnRelu<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.relu.forward(self.bn.forward(self.conv.forward(x)))
    }

    pub fn collect_shapes(&self, inventory: &mut ShapeInventory) {
        inventory.conv2d("conv", &self.conv);
        inventory.batch_norm("bn", &self.bn);
    }
}

/// Configuration for the `PredictionHead`.
#[derive(Config, Debug)]
pub struct PredictionHeadConfig {
    in_channels: usize,
    mask_classes: usize,
    /// Follow the 3x3 projection with a 1x1 conv.
    #[config(default = "true")]
    pointwise: bool,
}

impl PredictionHeadConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> PredictionHead<B> {
        let conv = Conv2dConfig::new([self.in_channels, self.mask_classes], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let pointwise = self.pointwise.then(|| {
            Conv2dConfig::new([self.mask_classes, self.mask_classes], [1, 1]).init(device)
        });

        PredictionHead { conv, pointwise }
    }
}

/// 3x3 conv to `mask_classes` channels, optionally followed by a 1x1 conv.
/// No activation.
#[derive(Module, Debug)]
pub struct PredictionHead<B: Backend> {
    conv: Conv2d<B>,
    pointwise: Option<Conv2d<B>>,
}

impl<B: Backend> PredictionHead<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        match &self.pointwise {
            Some(pointwise) => pointwise.forward(x),
            None => x,
        }
    }

    pub fn collect_shapes(&self, inventory: &mut ShapeInventory) {
        inventory.conv2d("conv", &self.conv);
        if let Some(pointwise) = &self.pointwise {
            inventory.conv2d("pointwise", pointwise);
        }
    }
}
