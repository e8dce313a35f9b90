//! Enumeration types for the segmentation network configuration.

use core::str::FromStr;

use burn::prelude::*;
use shufflenet_v2::ShuffleNetV2Config;

use crate::error::ShuffleSegError;

/// Selects what the decoder emits.
#[derive(Config, Debug, PartialEq, Eq, Hash)]
pub enum OutputMode {
    /// Primary mask plus the auxiliary deep-supervision mask.
    DualOutput,
    /// Sigmoid of the primary head only; the auxiliary head is not built.
    SigmoidSingleOutput,
}

impl Default for OutputMode {
    fn default() -> Self {
        Self::DualOutput
    }
}

impl OutputMode {
    /// Number of tensors returned by `forward_with_aux`.
    pub const fn num_outputs(&self) -> usize {
        match self {
            Self::DualOutput => 2,
            Self::SigmoidSingleOutput => 1,
        }
    }
}

/// ShuffleNetV2 width multipliers.
#[derive(Config, Debug, Copy, PartialEq, Eq, Hash)]
pub enum ArchPreset {
    /// 0.5x output channels.
    X0_5,
    /// 1.0x output channels.
    X1_0,
    /// 1.5x output channels.
    X1_5,
    /// 2.0x output channels.
    X2_0,
}

impl ArchPreset {
    pub const ALL: [Self; 4] = [Self::X0_5, Self::X1_0, Self::X1_5, Self::X2_0];

    /// Architecture identifier, e.g. `shufflenetv2_x1.0`.
    pub const fn arch_name(&self) -> &'static str {
        match self {
            Self::X0_5 => "shufflenetv2_x0.5",
            Self::X1_0 => "shufflenetv2_x1.0",
            Self::X1_5 => "shufflenetv2_x1.5",
            Self::X2_0 => "shufflenetv2_x2.0",
        }
    }

    pub fn backbone_config(&self) -> ShuffleNetV2Config {
        match self {
            Self::X0_5 => ShuffleNetV2Config::x0_5(),
            Self::X1_0 => ShuffleNetV2Config::x1_0(),
            Self::X1_5 => ShuffleNetV2Config::x1_5(),
            Self::X2_0 => ShuffleNetV2Config::x2_0(),
        }
    }

    /// Preset whose backbone equals `backbone`, if any.
    pub fn matching(backbone: &ShuffleNetV2Config) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.backbone_config() == *backbone)
    }
}

impl FromStr for ArchPreset {
    type Err = ShuffleSegError;

    /// Accepts `x1.0`, `x1_0`, `1.0` and the full `shufflenetv2_x1.0` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .trim_start_matches("shufflenetv2_")
            .trim_start_matches('x')
            .replace('_', ".");
        match normalized.as_str() {
            "0.5" => Ok(Self::X0_5),
            "1" | "1.0" => Ok(Self::X1_0),
            "1.5" => Ok(Self::X1_5),
            "2" | "2.0" => Ok(Self::X2_0),
            _ => Err(ShuffleSegError::InvalidConfiguration {
                reason: format!("unknown architecture preset '{s}', expected one of x0.5, x1.0, x1.5, x2.0"),
            }),
        }
    }
}

/// Burn recorder used to write the exported parameters.
#[derive(Config, Debug, Copy, PartialEq, Eq, Hash)]
pub enum RecordFormat {
    /// Named MessagePack (`.mpk`).
    NamedMpk,
    /// Gzip-compressed named MessagePack (`.mpk.gz`).
    NamedMpkGz,
    /// Bincode (`.bin`).
    Bin,
    /// Human-readable JSON (`.json`).
    PrettyJson,
}

impl Default for RecordFormat {
    fn default() -> Self {
        Self::NamedMpk
    }
}

impl RecordFormat {
    /// File extension appended by the recorder.
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::NamedMpk => "mpk",
            Self::NamedMpkGz => "mpk.gz",
            Self::Bin => "bin",
            Self::PrettyJson => "json",
        }
    }
}

impl FromStr for RecordFormat {
    type Err = ShuffleSegError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mpk" | "named-mpk" => Ok(Self::NamedMpk),
            "mpk.gz" | "mpkgz" | "named-mpk-gz" => Ok(Self::NamedMpkGz),
            "bin" => Ok(Self::Bin),
            "json" | "pretty-json" => Ok(Self::PrettyJson),
            _ => Err(ShuffleSegError::InvalidConfiguration {
                reason: format!("unknown record format '{s}', expected mpk, mpk.gz, bin or json"),
            }),
        }
    }
}
