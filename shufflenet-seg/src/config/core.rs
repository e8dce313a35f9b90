//! Core configuration structures.
//!
//! `ShuffleSegConfig` fixes every parameter shape of the network;
//! `ExportConfig` describes a single export run.

use core::str::FromStr;
use std::path::PathBuf;

use burn::prelude::*;
use shufflenet_v2::ShuffleNetV2Config;

use super::enums::*;
use crate::error::{ShuffleSegError, ShuffleSegResult};

/// Spatial dimensions of the input must be multiples of the backbone stride.
pub const INPUT_STRIDE: usize = 32;

/// Architecture of the segmentation network.
#[derive(Config, Debug)]
pub struct ShuffleSegConfig {
    /// Backbone stage repeats and widths.
    #[config(default = "ShuffleNetV2Config::x1_0()")]
    pub backbone: ShuffleNetV2Config,
    /// Channels of the predicted mask.
    #[config(default = "1")]
    pub mask_classes: usize,
    /// Classification classes. Only used when `mask_classes_from_num_classes` is set.
    #[config(default = "1000")]
    pub num_classes: usize,
    /// Build the mask heads with `num_classes` channels instead of `mask_classes`.
    ///
    /// Checkpoints trained with the classification-class count as mask width
    /// need this to load.
    #[config(default = "false")]
    pub mask_classes_from_num_classes: bool,
    /// Width of the decoder's fused features.
    #[config(default = "12")]
    pub concat_ch: usize,
    #[config(default = "OutputMode::DualOutput")]
    pub output_mode: OutputMode,
}

impl ShuffleSegConfig {
    /// Default decoder on top of a width preset.
    pub fn from_preset(preset: ArchPreset) -> Self {
        Self::new().with_backbone(preset.backbone_config())
    }

    /// Channels of the mask heads after applying `mask_classes_from_num_classes`.
    pub const fn effective_mask_classes(&self) -> usize {
        if self.mask_classes_from_num_classes {
            self.num_classes
        } else {
            self.mask_classes
        }
    }

    /// Validate the configuration before any module is allocated.
    ///
    /// # Errors
    ///
    /// Returns `ShuffleSegError::Backbone` for malformed stage lists and
    /// `ShuffleSegError::InvalidConfiguration` for decoder widths that cannot be built.
    pub fn validate(&self) -> ShuffleSegResult<()> {
        self.backbone.checked()?;

        if self.effective_mask_classes() == 0 {
            return Err(ShuffleSegError::InvalidConfiguration {
                reason: "mask_classes must be positive".to_owned(),
            });
        }

        // The refinement unit works on concat_ch / 2 channel projections.
        if self.concat_ch < 2 || self.concat_ch % 2 != 0 {
            return Err(ShuffleSegError::InvalidConfiguration {
                reason: format!(
                    "concat_ch must be an even number >= 2, got {}",
                    self.concat_ch
                ),
            });
        }

        Ok(())
    }
}

/// A named axis of an exported tensor whose size may vary at inference time.
#[derive(Config, Debug, PartialEq, Eq)]
pub struct DynamicAxis {
    /// Input or output tensor name.
    pub tensor: String,
    /// Axis index in NCHW order.
    pub axis: usize,
    /// Symbolic name of the axis, e.g. `batch`.
    pub name: String,
}

impl FromStr for DynamicAxis {
    type Err = ShuffleSegError;

    /// Parses `tensor:axis:name`, e.g. `images:0:batch`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ShuffleSegError::InvalidConfiguration {
            reason: format!("dynamic axis '{s}' is not of the form tensor:axis:name"),
        };

        let mut parts = s.splitn(3, ':');
        let (Some(tensor), Some(axis), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let axis = axis.trim().parse::<usize>().map_err(|_| invalid())?;
        if tensor.is_empty() || name.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(tensor.to_owned(), axis, name.to_owned()))
    }
}

/// Options of a single export run.
#[derive(Config, Debug)]
pub struct ExportConfig {
    /// Example input shape, NCHW.
    #[config(default = "[1, 3, 256, 320]")]
    pub input_shape: [usize; 4],
    /// Version of the manifest format written next to the record.
    #[config(default = "12")]
    pub format_version: usize,
    #[config(default = "RecordFormat::NamedMpk")]
    pub record_format: RecordFormat,
    #[config(default = "vec![String::from(\"images\")]")]
    pub input_names: Vec<String>,
    #[config(default = "vec![String::from(\"output0\")]")]
    pub output_names: Vec<String>,
    #[config(default = "Vec::new()")]
    pub dynamic_axes: Vec<DynamicAxis>,
    #[config(default = "PathBuf::from(\".\")")]
    pub output_dir: PathBuf,
    /// File name of the record and manifest, without extension.
    #[config(default = "String::from(\"shufflenet_seg\")")]
    pub file_stem: String,
}

impl ExportConfig {
    /// Validate the export options against a network with `num_outputs` outputs.
    ///
    /// # Errors
    ///
    /// Returns `ShuffleSegError::InvalidConfiguration` if the input shape is not
    /// `(N, 3, H, W)` with `N >= 1` and `H`, `W` multiples of 32, if the tensor names
    /// do not match the network's inputs and outputs, or if a dynamic axis does not
    /// refer to a named tensor's batch, height or width.
    pub fn validate(&self, num_outputs: usize) -> ShuffleSegResult<()> {
        let [batch, channels, height, width] = self.input_shape;
        if batch == 0 || channels != 3 {
            return Err(ShuffleSegError::InvalidConfiguration {
                reason: format!(
                    "input shape must be (N, 3, H, W) with N >= 1, got {:?}",
                    self.input_shape
                ),
            });
        }
        if height == 0 || width == 0 || height % INPUT_STRIDE != 0 || width % INPUT_STRIDE != 0 {
            return Err(ShuffleSegError::InvalidConfiguration {
                reason: format!(
                    "input height and width must be positive multiples of {INPUT_STRIDE}, got {height}x{width}"
                ),
            });
        }

        if self.input_names.len() != 1 {
            return Err(ShuffleSegError::InvalidConfiguration {
                reason: format!(
                    "the network has 1 input, got {} input names",
                    self.input_names.len()
                ),
            });
        }
        if self.output_names.len() != num_outputs {
            return Err(ShuffleSegError::InvalidConfiguration {
                reason: format!(
                    "the network has {num_outputs} output(s), got {} output names",
                    self.output_names.len()
                ),
            });
        }
        // Recorders replace everything after the last dot with their extension.
        if self.file_stem.is_empty() || self.file_stem.contains('.') {
            return Err(ShuffleSegError::InvalidConfiguration {
                reason: format!(
                    "file_stem must be non-empty and contain no '.', got '{}'",
                    self.file_stem
                ),
            });
        }

        for axis in &self.dynamic_axes {
            let known = self
                .input_names
                .iter()
                .chain(&self.output_names)
                .any(|name| *name == axis.tensor);
            if !known {
                return Err(ShuffleSegError::InvalidConfiguration {
                    reason: format!("dynamic axis refers to unknown tensor '{}'", axis.tensor),
                });
            }
            if !matches!(axis.axis, 0 | 2 | 3) {
                return Err(ShuffleSegError::InvalidConfiguration {
                    reason: format!(
                        "only batch, height and width axes may be dynamic, got axis {} of '{}'",
                        axis.axis, axis.tensor
                    ),
                });
            }
        }

        Ok(())
    }

    /// Path of the parameter record, extension included.
    pub fn record_path(&self) -> PathBuf {
        self.output_dir.join(format!(
            "{}.{}",
            self.file_stem,
            self.record_format.extension()
        ))
    }

    /// Path of the JSON graph manifest.
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.graph.json", self.file_stem))
    }
}
