//! # Segmentation Decoder
//!
//! Fuses the backbone pyramid top-down (coarsest to finest) with
//! upsample-concatenate-compress steps, refines the finest fused map at input
//! resolution and predicts the mask.
//!
//! ```text
//! x4 --up2--+
//! x3 -------cat-> lateral --up2--+
//! x2 ----------------------------cat-> fuse_mid --up4--+
//! x1 --------------------------------------------------cat-> fuse_fine = F
//! F --up2--> G --refine--> H;  cat(H, G) -> head        (primary)
//! F --up2--> aux_head                                    (auxiliary)
//! ```

use burn::{module::Ignored, prelude::*, tensor::activation::sigmoid};
use burn_extra_ops::{ShapeInventory, TensorExtraOps};

use super::{
    modules::{
        ConvBnRelu, ConvBnReluConfig, DepthwiseSeparable, DepthwiseSeparableConfig,
        PredictionHead, PredictionHeadConfig,
    },
    refinement::{MultiScaleRefinement, MultiScaleRefinementConfig},
};
use crate::{
    config::OutputMode,
    error::{ShuffleSegError, ShuffleSegResult},
};

/// Configuration for the `SegmentationDecoder`.
#[derive(Config, Debug)]
pub struct SegmentationDecoderConfig {
    /// Channels of the pyramid levels `[x1, x2, x3, x4]`.
    pyramid_channels: [usize; 4],
    #[config(default = "12")]
    concat_ch: usize,
    #[config(default = "1")]
    mask_classes: usize,
    #[config(default = "OutputMode::DualOutput")]
    output_mode: OutputMode,
}

impl SegmentationDecoderConfig {
    /// Initializes a new `SegmentationDecoder`.
    ///
    /// # Errors
    ///
    /// Returns an error if the refinement unit cannot be built for `concat_ch`.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ShuffleSegResult<SegmentationDecoder<B>> {
        let [c1, c2, c3, c4] = self.pyramid_channels;
        let concat_ch = self.concat_ch;
        let dual = self.output_mode == OutputMode::DualOutput;

        let head = PredictionHeadConfig::new(concat_ch * 2, self.mask_classes)
            .with_pointwise(dual)
            .init(device);
        let aux_head = dual.then(|| PredictionHeadConfig::new(concat_ch, self.mask_classes).init(device));

        Ok(SegmentationDecoder {
            lateral: DepthwiseSeparableConfig::new(c4 + c3, concat_ch).init(device),
            fuse_mid: ConvBnReluConfig::new(c2 + concat_ch, concat_ch).init(device),
            fuse_fine: ConvBnReluConfig::new(c1 + concat_ch, concat_ch).init(device),
            refine: MultiScaleRefinementConfig::new(concat_ch, concat_ch).init(device)?,
            head,
            aux_head,
            output_mode: Ignored(self.output_mode.clone()),
        })
    }
}

/// Predictions of one forward pass.
#[derive(Debug, Clone)]
pub struct SegmentationOutput<B: Backend> {
    /// Primary mask `[N, mask_classes, H, W]`. Probabilities in the sigmoid mode, logits otherwise.
    pub mask: Tensor<B, 4>,
    /// Auxiliary deep-supervision mask, same shape. `None` in the sigmoid mode.
    pub aux: Option<Tensor<B, 4>>,
}

/// Segmentation Decoder.
#[derive(Module, Debug)]
pub struct SegmentationDecoder<B: Backend> {
    lateral: DepthwiseSeparable<B>,
    fuse_mid: ConvBnRelu<B>,
    fuse_fine: ConvBnRelu<B>,
    refine: MultiScaleRefinement<B>,
    head: PredictionHead<B>,
    aux_head: Option<PredictionHead<B>>,
    output_mode: Ignored<OutputMode>,
}

impl<B: Backend> SegmentationDecoder<B> {
    /// # Shapes
    /// * `features` - `[x1, x2, x3, x4]` at strides 2, 8, 16 and 32 of an `H x W` input
    /// * Returns - masks of shape `[N, mask_classes, H, W]`
    pub fn forward(&self, features: [Tensor<B, 4>; 4]) -> SegmentationOutput<B> {
        let [x1, x2, x3, x4] = features;

        let x = Tensor::cat(vec![x4.upsample_bilinear(2), x3], 1);
        let x = self.lateral.forward(x);
        let x = Tensor::cat(vec![x.upsample_bilinear(2), x2], 1);
        let x = self.fuse_mid.forward(x);
        let x = Tensor::cat(vec![x.upsample_bilinear(4), x1], 1);
        let fine = self.fuse_fine.forward(x);

        let full = fine.upsample_bilinear(2);
        let refined = self.refine.forward(full.clone());
        let logits = self.head.forward(Tensor::cat(vec![refined, full.clone()], 1));

        match self.output_mode.0 {
            OutputMode::DualOutput => SegmentationOutput {
                mask: logits,
                // F' is G.
                aux: self.aux_head.as_ref().map(|aux_head| aux_head.forward(full)),
            },
            OutputMode::SigmoidSingleOutput => SegmentationOutput {
                mask: sigmoid(logits),
                aux: None,
            },
        }
    }

    pub fn output_mode(&self) -> &OutputMode {
        &self.output_mode.0
    }

    /// Checks the list lengths of `record` against this decoder.
    ///
    /// # Errors
    ///
    /// Returns `ShuffleSegError::IncompatibleWeights` naming the differing list.
    pub fn check_record(&self, record: &SegmentationDecoderRecord<B>) -> ShuffleSegResult<()> {
        self.refine.check_record(&record.refine).map_err(|e| match e {
            ShuffleSegError::IncompatibleWeights {
                name,
                expected,
                actual,
            } => ShuffleSegError::IncompatibleWeights {
                name: format!("refine.{name}"),
                expected,
                actual,
            },
            other => other,
        })
    }

    pub fn collect_shapes(&self, inventory: &mut ShapeInventory) {
        inventory.scoped("lateral", |inv| self.lateral.collect_shapes(inv));
        inventory.scoped("fuse_mid", |inv| self.fuse_mid.collect_shapes(inv));
        inventory.scoped("fuse_fine", |inv| self.fuse_fine.collect_shapes(inv));
        inventory.scoped("refine", |inv| self.refine.collect_shapes(inv));
        inventory.scoped("head", |inv| self.head.collect_shapes(inv));
        if let Some(aux_head) = &self.aux_head {
            inventory.scoped("aux_head", |inv| aux_head.collect_shapes(inv));
        }
    }
}
