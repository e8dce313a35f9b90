//! # ShuffleNetV2 Segmentation
//!
//! A ShuffleNetV2 backbone with a lightweight multi-scale segmentation decoder,
//! built on the Burn deep learning framework for inference and export.
//!
//! ## Modules
//!
//! - `config`: network and export configuration, width presets and output modes.
//! - `error`: the crate's error type.
//! - `models`: the decoder, the multi-scale refinement unit and the top-level network.
//! - `pretrained`: the pretrained-weights registry and checkpoint loading. Downloading
//!   and reading PyTorch files need the `pretrained` feature.
//! - `export`: writes a parameter record and a graph manifest for a network.
//!
//! ## Example
//!
//! ```no_run
//! use burn::backend::NdArray;
//! use burn::tensor::Tensor;
//! use shufflenet_seg::{ArchPreset, ShuffleSegConfig};
//!
//! let device = Default::default();
//! let model = ShuffleSegConfig::from_preset(ArchPreset::X1_0)
//!     .with_mask_classes(4)
//!     .init::<NdArray>(&device)?;
//! let mask = model.forward(Tensor::zeros([1, 3, 256, 320], &device))?;
//! assert_eq!(mask.dims(), [1, 4, 256, 320]);
//! # Ok::<(), shufflenet_seg::ShuffleSegError>(())
//! ```

mod config;
mod error;
mod export;
mod models;
mod pretrained;

#[cfg(test)]
mod tests;

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[doc(inline)]
pub use config::{
    ArchPreset, DynamicAxis, ExportConfig, OutputMode, RecordFormat, ShuffleSegConfig,
    INPUT_STRIDE,
};
#[doc(inline)]
pub use error::{ShuffleSegError, ShuffleSegResult};
#[doc(inline)]
pub use export::{export, load_exported, ExportReport, GraphManifest, TensorSpec};
#[doc(inline)]
pub use models::{
    decoder::{SegmentationDecoder, SegmentationDecoderConfig, SegmentationOutput},
    refinement::{MultiScaleRefinement, MultiScaleRefinementConfig},
    shuffle_seg::{ShuffleSeg, ShuffleSegRecord},
};
#[cfg(feature = "pretrained")]
#[doc(inline)]
pub use pretrained::{fetch_weights, load_backbone_checkpoint, load_checkpoint};
#[doc(inline)]
pub use pretrained::{from_pretrained, verify_weights, PretrainedRegistry};
#[doc(inline)]
pub use shufflenet_v2::{ShuffleNetError, ShuffleNetV2Config};
