//! ShuffleNetV2 implementation for segmentation backbones.
//!
//! This crate provides the ShuffleNetV2 feature extractor: a stride-2 stem, a
//! max-pool and three stages of channel-shuffle units. The backbone returns the
//! four pyramid levels (stem, stage2, stage3, stage4) consumed by a
//! segmentation decoder. The layout follows torchvision's ShuffleNetV2 so that
//! ImageNet checkpoints can be loaded into it.

use burn::{
    nn::{
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
};
use burn_extra_ops::ShapeInventory;

mod blocks;
mod error;

pub use blocks::*;
pub use error::{ShuffleNetError, ShuffleNetResult};

/// Number of channel-shuffle stages after the stem.
pub const NUM_STAGES: usize = 3;
/// Stem + stage widths + classifier head width.
pub const NUM_WIDTHS: usize = NUM_STAGES + 2;

const STAGES_REPEATS: [usize; NUM_STAGES] = [4, 8, 4];
const X0_5_WIDTHS: [usize; NUM_WIDTHS] = [24, 48, 96, 192, 1024];
const X1_0_WIDTHS: [usize; NUM_WIDTHS] = [24, 116, 232, 464, 1024];
const X1_5_WIDTHS: [usize; NUM_WIDTHS] = [24, 176, 352, 704, 1024];
const X2_0_WIDTHS: [usize; NUM_WIDTHS] = [24, 244, 488, 976, 2048];

/// ShuffleNetV2 configuration.
#[derive(Config, Debug, PartialEq)]
pub struct ShuffleNetV2Config {
    /// Number of units in stage2, stage3 and stage4.
    pub stages_repeats: Vec<usize>,
    /// Widths of the stem, the three stages and the classifier head.
    pub stages_out_channels: Vec<usize>,
    /// Channels of the input image.
    #[config(default = "3")]
    pub in_channels: usize,
}

impl ShuffleNetV2Config {
    /// ShuffleNetV2 with 0.5x output channels.
    pub fn x0_5() -> Self {
        Self::new(STAGES_REPEATS.to_vec(), X0_5_WIDTHS.to_vec())
    }

    /// ShuffleNetV2 with 1.0x output channels.
    pub fn x1_0() -> Self {
        Self::new(STAGES_REPEATS.to_vec(), X1_0_WIDTHS.to_vec())
    }

    /// ShuffleNetV2 with 1.5x output channels.
    pub fn x1_5() -> Self {
        Self::new(STAGES_REPEATS.to_vec(), X1_5_WIDTHS.to_vec())
    }

    /// ShuffleNetV2 with 2.0x output channels.
    pub fn x2_0() -> Self {
        Self::new(STAGES_REPEATS.to_vec(), X2_0_WIDTHS.to_vec())
    }

    /// Validates the list lengths and returns them as fixed-size arrays.
    ///
    /// # Errors
    ///
    /// Returns [`ShuffleNetError::InvalidConfiguration`] if `stages_repeats` does
    /// not hold 3 positive ints or `stages_out_channels` does not hold 5.
    pub fn checked(&self) -> ShuffleNetResult<([usize; NUM_STAGES], [usize; NUM_WIDTHS])> {
        let repeats: [usize; NUM_STAGES] = self
            .stages_repeats
            .as_slice()
            .try_into()
            .ok()
            .filter(|repeats: &[usize; NUM_STAGES]| repeats.iter().all(|&r| r > 0))
            .ok_or_else(|| ShuffleNetError::InvalidConfiguration {
                reason: format!(
                    "expected stages_repeats as list of {NUM_STAGES} positive ints, got {:?}",
                    self.stages_repeats
                ),
            })?;
        let widths: [usize; NUM_WIDTHS] = self
            .stages_out_channels
            .as_slice()
            .try_into()
            .ok()
            .filter(|widths: &[usize; NUM_WIDTHS]| widths.iter().all(|&w| w > 0))
            .ok_or_else(|| ShuffleNetError::InvalidConfiguration {
                reason: format!(
                    "expected stages_out_channels as list of {NUM_WIDTHS} positive ints, got {:?}",
                    self.stages_out_channels
                ),
            })?;

        Ok((repeats, widths))
    }

    /// Channels of the four pyramid levels `[stem, stage2, stage3, stage4]`.
    pub fn pyramid_channels(&self) -> ShuffleNetResult<[usize; 4]> {
        let (_, widths) = self.checked()?;
        Ok([widths[0], widths[1], widths[2], widths[3]])
    }

    /// Initializes a new `ShuffleNetV2Backbone`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lists are malformed or a unit cannot be built.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ShuffleNetResult<ShuffleNetV2Backbone<B>> {
        let (repeats, widths) = self.checked()?;
        log::debug!("building ShuffleNetV2 backbone: repeats={repeats:?}, widths={widths:?}");

        let stem = Stem::new(self.in_channels, widths[0], device);

        // 3x3 maxpool, stride=2, padding=1
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let [stage2, stage3, stage4] = [0, 1, 2].map(|index| {
            BackboneStageConfig::new(widths[index], widths[index + 1], repeats[index]).init(device)
        });

        Ok(ShuffleNetV2Backbone {
            stem,
            maxpool,
            stages: vec![stage2?, stage3?, stage4?],
            channels: [widths[0], widths[1], widths[2], widths[3]],
        })
    }
}

/// ShuffleNetV2 feature extractor.
///
/// Derived from torchvision.models.shufflenetv2.ShuffleNetV2 without `conv5`
/// and the classifier.
#[derive(Module, Debug)]
pub struct ShuffleNetV2Backbone<B: Backend> {
    stem: Stem<B>,
    maxpool: MaxPool2d,
    /// Exactly [`NUM_STAGES`] stages, guaranteed by the config.
    stages: Vec<BackboneStage<B>>,
    channels: [usize; 4],
}

impl<B: Backend> ShuffleNetV2Backbone<B> {
    /// Forward pass returning the pyramid `[stem, stage2, stage3, stage4]`.
    ///
    /// For an input `[N, 3, H, W]` the levels are at strides 2, 8, 16 and 32.
    pub fn forward(&self, input: Tensor<B, 4>) -> [Tensor<B, 4>; 4] {
        let x1 = self.stem.forward(input);
        let x = self.maxpool.forward(x1.clone());
        let x2 = self.stages[0].forward(x);
        let x3 = self.stages[1].forward(x2.clone());
        let x4 = self.stages[2].forward(x3.clone());

        [x1, x2, x3, x4]
    }

    /// Channels of each pyramid level.
    pub const fn output_channels(&self) -> [usize; 4] {
        self.channels
    }

    pub fn stages(&self) -> &[BackboneStage<B>] {
        &self.stages
    }

    /// Checks that `record` has as many stages, and every stage as many units,
    /// as this backbone.
    ///
    /// `load_record` panics on a length mismatch, so records of unknown origin
    /// go through this first.
    ///
    /// # Errors
    ///
    /// Returns [`ShuffleNetError::RecordLayout`] for the first differing list.
    pub fn check_record(&self, record: &ShuffleNetV2BackboneRecord<B>) -> ShuffleNetResult<()> {
        if record.stages.len() != self.stages.len() {
            return Err(ShuffleNetError::RecordLayout {
                path: "stages".to_string(),
                expected: self.stages.len(),
                actual: record.stages.len(),
            });
        }

        for (index, (stage, stage_record)) in self.stages.iter().zip(&record.stages).enumerate() {
            if stage.len() != stage_record.units.len() {
                return Err(ShuffleNetError::RecordLayout {
                    path: format!("stages.{index}.units"),
                    expected: stage.len(),
                    actual: stage_record.units.len(),
                });
            }
        }

        Ok(())
    }

    pub fn collect_shapes(&self, inventory: &mut ShapeInventory) {
        inventory.scoped("stem", |inv| self.stem.collect_shapes(inv));
        inventory.scoped("stages", |inv| {
            for (index, stage) in self.stages.iter().enumerate() {
                inv.scoped(&index.to_string(), |inv| stage.collect_shapes(inv));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_shufflenet_config() {
        let config = ShuffleNetV2Config::x1_0();
        assert_eq!(config.stages_repeats, vec![4, 8, 4]);
        assert_eq!(config.stages_out_channels, vec![24, 116, 232, 464, 1024]);
        assert_eq!(config.pyramid_channels().unwrap(), [24, 116, 232, 464]);
    }

    #[test]
    fn test_shufflenet_forward() {
        let device = Default::default();
        let model = ShuffleNetV2Config::x1_0()
            .init::<TestBackend>(&device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::random(
            [1, 3, 224, 224],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let output = model.forward(input);

        assert_eq!(output[0].dims(), [1, 24, 112, 112]); // 224/2
        assert_eq!(output[1].dims(), [1, 116, 28, 28]); // 224/8
        assert_eq!(output[2].dims(), [1, 232, 14, 14]); // 224/16
        assert_eq!(output[3].dims(), [1, 464, 7, 7]); // 224/32
        assert_eq!(model.output_channels(), [24, 116, 232, 464]);
    }

    #[test]
    fn test_resolution_halves_with_ceil() {
        let device = Default::default();
        let model = ShuffleNetV2Config::x0_5()
            .init::<TestBackend>(&device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 150, 300], &device);
        let output = model.forward(input);

        assert_eq!(output[0].dims(), [2, 24, 75, 150]);
        assert_eq!(output[1].dims(), [2, 48, 19, 38]);
        assert_eq!(output[2].dims(), [2, 96, 10, 19]);
        assert_eq!(output[3].dims(), [2, 192, 5, 10]);
    }

    #[test]
    fn test_stage_unit_counts() {
        let model = ShuffleNetV2Config::x0_5()
            .init::<TestBackend>(&Default::default())
            .unwrap();
        let counts = model.stages().iter().map(BackboneStage::len).collect::<Vec<_>>();

        assert_eq!(counts, vec![4, 8, 4]);
    }

    #[test]
    fn test_check_record_reports_unit_count() {
        let device = Default::default();
        let model = ShuffleNetV2Config::x0_5()
            .init::<TestBackend>(&device)
            .unwrap();
        let mut record = model.clone().into_record();
        assert!(model.check_record(&record).is_ok());

        record.stages[1].units.truncate(5);

        assert_eq!(
            model.check_record(&record),
            Err(ShuffleNetError::RecordLayout {
                path: "stages.1.units".to_string(),
                expected: 8,
                actual: 5,
            })
        );

        record.stages.truncate(2);

        assert_eq!(
            model.check_record(&record),
            Err(ShuffleNetError::RecordLayout {
                path: "stages".to_string(),
                expected: 3,
                actual: 2,
            })
        );
    }

    #[test]
    fn test_check_record_rejects_other_repeats() {
        let device = Default::default();
        let model = ShuffleNetV2Config::x0_5()
            .init::<TestBackend>(&device)
            .unwrap();
        let other = ShuffleNetV2Config::new(vec![4, 4, 4], X0_5_WIDTHS.to_vec())
            .init::<TestBackend>(&device)
            .unwrap();

        assert!(matches!(
            model.check_record(&other.into_record()),
            Err(ShuffleNetError::RecordLayout { path, .. }) if path == "stages.1.units"
        ));
    }

    #[test]
    fn test_rejects_two_stage_repeats() {
        let config = ShuffleNetV2Config::new(vec![4, 8], vec![24, 116, 232, 464, 1024]);

        match config.init::<TestBackend>(&Default::default()) {
            Err(ShuffleNetError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("expected stages_repeats as list of 3 positive ints"));
            }
            other => panic!("Expected InvalidConfiguration error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_four_stage_widths() {
        let config = ShuffleNetV2Config::new(vec![4, 8, 4], vec![24, 116, 232, 464]);

        match config.checked() {
            Err(ShuffleNetError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("expected stages_out_channels as list of 5 positive ints"));
            }
            other => panic!("Expected InvalidConfiguration error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_zero_repeats() {
        let config = ShuffleNetV2Config::new(vec![4, 0, 4], vec![24, 116, 232, 464, 1024]);
        assert!(config.checked().is_err());
    }
}
