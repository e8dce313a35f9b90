//! # ShuffleNetV2 Segmentation Network
//!
//! Stem, max-pool and three channel-shuffle stages produce a four-level
//! pyramid that the segmentation decoder turns into a full-resolution mask.

use burn::{module::Ignored, prelude::*};
use burn_extra_ops::ShapeInventory;
use shufflenet_v2::{ShuffleNetV2Backbone, ShuffleNetV2BackboneRecord};

use super::decoder::{SegmentationDecoder, SegmentationDecoderConfig, SegmentationOutput};
use crate::{
    config::{OutputMode, ShuffleSegConfig, INPUT_STRIDE},
    error::{ShuffleSegError, ShuffleSegResult},
};

impl ShuffleSegConfig {
    /// Initializes a `ShuffleSeg` network with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid. Nothing is allocated in
    /// that case.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ShuffleSegResult<ShuffleSeg<B>> {
        self.validate()?;

        let backbone = self.backbone.init(device)?;
        let decoder = SegmentationDecoderConfig::new(backbone.output_channels())
            .with_concat_ch(self.concat_ch)
            .with_mask_classes(self.effective_mask_classes())
            .with_output_mode(self.output_mode.clone())
            .init(device)?;

        log::debug!(
            "initialized segmentation network: pyramid={:?}, concat_ch={}, mask_classes={}, mode={:?}",
            backbone.output_channels(),
            self.concat_ch,
            self.effective_mask_classes(),
            self.output_mode
        );

        Ok(ShuffleSeg {
            backbone,
            decoder,
            config: Ignored(self.clone()),
        })
    }
}

/// ShuffleNetV2 backbone with a multi-scale segmentation decoder.
#[derive(Module, Debug)]
pub struct ShuffleSeg<B: Backend> {
    backbone: ShuffleNetV2Backbone<B>,
    decoder: SegmentationDecoder<B>,
    config: Ignored<ShuffleSegConfig>,
}

impl<B: Backend> ShuffleSeg<B> {
    /// Predicts the mask of a batch of images.
    ///
    /// Returns the primary mask in the dual-output mode and the sigmoid
    /// probability map in the single-output mode.
    ///
    /// # Shapes
    /// * `input` - `[N, 3, H, W]`, `H` and `W` multiples of 32
    /// * Returns - `[N, mask_classes, H, W]`
    ///
    /// # Errors
    ///
    /// Returns `ShuffleSegError::InvalidTensorShape` for any other input shape.
    pub fn forward(&self, input: Tensor<B, 4>) -> ShuffleSegResult<Tensor<B, 4>> {
        Ok(self.forward_with_aux(input)?.mask)
    }

    /// Like [`forward`](Self::forward), also returning the auxiliary mask in
    /// the dual-output mode.
    ///
    /// # Errors
    ///
    /// Returns `ShuffleSegError::InvalidTensorShape` if the input is not
    /// `[N, 3, H, W]` with `H` and `W` multiples of 32.
    pub fn forward_with_aux(&self, input: Tensor<B, 4>) -> ShuffleSegResult<SegmentationOutput<B>> {
        self.check_input(&input.dims())?;
        Ok(self.decoder.forward(self.backbone.forward(input)))
    }

    /// Backbone pyramid `[x1, x2, x3, x4]` without the decoder.
    pub fn forward_features(&self, input: Tensor<B, 4>) -> [Tensor<B, 4>; 4] {
        self.backbone.forward(input)
    }

    fn check_input(&self, dims: &[usize; 4]) -> ShuffleSegResult<()> {
        let in_channels = self.config.backbone.in_channels;
        let [batch, channels, height, width] = *dims;
        let valid = batch > 0
            && channels == in_channels
            && height > 0
            && width > 0
            && height % INPUT_STRIDE == 0
            && width % INPUT_STRIDE == 0;

        if valid {
            Ok(())
        } else {
            Err(ShuffleSegError::InvalidTensorShape {
                expected: format!(
                    "[N, {in_channels}, H, W] with H and W multiples of {INPUT_STRIDE}"
                ),
                actual: format!("{dims:?}"),
            })
        }
    }

    /// Configuration the network was built from.
    pub fn config(&self) -> &ShuffleSegConfig {
        &self.config
    }

    pub fn output_mode(&self) -> &OutputMode {
        self.decoder.output_mode()
    }

    pub fn backbone(&self) -> &ShuffleNetV2Backbone<B> {
        &self.backbone
    }

    /// Loads `record` after checking that its stage, unit and level counts
    /// match this network.
    ///
    /// # Errors
    ///
    /// Returns `ShuffleSegError::IncompatibleWeights` naming the first list whose
    /// length differs. The network is left untouched in that case.
    pub fn load_checked_record(self, record: ShuffleSegRecord<B>) -> ShuffleSegResult<Self> {
        self.backbone
            .check_record(&record.backbone)
            .map_err(|e| ShuffleSegError::from_backbone_record("backbone.", e))?;
        self.decoder.check_record(&record.decoder).map_err(|e| match e {
            ShuffleSegError::IncompatibleWeights {
                name,
                expected,
                actual,
            } => ShuffleSegError::IncompatibleWeights {
                name: format!("decoder.{name}"),
                expected,
                actual,
            },
            other => other,
        })?;

        Ok(self.load_record(record))
    }

    /// Replaces the backbone parameters, keeping the decoder.
    ///
    /// # Errors
    ///
    /// Returns `ShuffleSegError::IncompatibleWeights` if the record has a
    /// different number of stages or units.
    pub fn load_backbone_record(
        mut self,
        record: ShuffleNetV2BackboneRecord<B>,
    ) -> ShuffleSegResult<Self> {
        self.backbone
            .check_record(&record)
            .map_err(|e| ShuffleSegError::from_backbone_record("backbone.", e))?;
        self.backbone = self.backbone.load_record(record);
        Ok(self)
    }

    /// Named shapes of every learnable tensor, in module-path notation.
    pub fn shape_inventory(&self) -> ShapeInventory {
        let mut inventory = ShapeInventory::new();
        inventory.scoped("backbone", |inv| self.backbone.collect_shapes(inv));
        inventory.scoped("decoder", |inv| self.decoder.collect_shapes(inv));
        inventory
    }
}
