//! Pretrained weights: the preset registry, checkpoint loading and shape
//! verification.
//!
//! Checkpoints are PyTorch state dicts. Their keys are remapped to this crate's
//! module paths before loading. Keys with no counterpart (`fc.*`, `conv5.*`,
//! the unused fourth refinement level, `num_batches_tracked`) are dropped.

use std::collections::HashMap;
#[cfg(any(feature = "pretrained", test))]
use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use burn::prelude::*;
use burn_extra_ops::ShapeInventory;
#[cfg(feature = "pretrained")]
use burn::record::{FullPrecisionSettings, Recorder};
#[cfg(feature = "pretrained")]
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
#[cfg(feature = "pretrained")]
use shufflenet_v2::ShuffleNetV2BackboneRecord;

use crate::{
    config::{ArchPreset, ShuffleSegConfig},
    error::{ShuffleSegError, ShuffleSegResult},
    models::shuffle_seg::ShuffleSeg,
};
#[cfg(feature = "pretrained")]
use crate::models::shuffle_seg::ShuffleSegRecord;

/// Checkpoint key families without a counterpart in this crate.
#[cfg(feature = "pretrained")]
const DROPPED_KEY_FAMILIES: [&str; 4] = [
    "fc.*",
    "conv5.*",
    "mask_branch.downup.process4.*",
    "*.num_batches_tracked",
];

const TORCHVISION_X0_5: &str = "https://download.pytorch.org/models/shufflenetv2_x0.5-f707e7126e.pth";
const TORCHVISION_X1_0: &str = "https://download.pytorch.org/models/shufflenetv2_x1-5666bf0f80.pth";

/// Maps each width preset to an optional weights locator (URL or local path).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PretrainedRegistry {
    locators: HashMap<ArchPreset, Option<String>>,
}

impl PretrainedRegistry {
    /// Registry without any locator.
    pub fn new() -> Self {
        Self::default()
    }

    /// ImageNet backbones published by torchvision. x1.5 and x2.0 have none.
    pub fn torchvision() -> Self {
        Self::new()
            .with_locator(ArchPreset::X0_5, Some(TORCHVISION_X0_5))
            .with_locator(ArchPreset::X1_0, Some(TORCHVISION_X1_0))
            .with_locator(ArchPreset::X1_5, None)
            .with_locator(ArchPreset::X2_0, None)
    }

    pub fn with_locator(mut self, preset: ArchPreset, locator: Option<&str>) -> Self {
        self.locators.insert(preset, locator.map(str::to_owned));
        self
    }

    /// Locator registered for `preset`.
    ///
    /// # Errors
    ///
    /// Returns `ShuffleSegError::UnsupportedPretrained` if the preset has no locator.
    pub fn locator(&self, preset: ArchPreset) -> ShuffleSegResult<&str> {
        self.locators
            .get(&preset)
            .and_then(Option::as_deref)
            .ok_or_else(|| ShuffleSegError::UnsupportedPretrained {
                arch: preset.arch_name().to_owned(),
            })
    }

    /// Presets that have a locator, in preset order.
    pub fn available(&self) -> Vec<ArchPreset> {
        ArchPreset::ALL
            .into_iter()
            .filter(|preset| self.locator(*preset).is_ok())
            .collect()
    }
}

/// Compares the parameter shapes of `model` with a reference inventory.
///
/// # Errors
///
/// Returns `ShuffleSegError::IncompatibleWeights` for the first parameter that is
/// missing or differently shaped.
pub fn verify_weights<B: Backend>(
    reference: &ShapeInventory,
    model: &ShuffleSeg<B>,
) -> ShuffleSegResult<()> {
    match reference.first_mismatch(&model.shape_inventory()) {
        None => Ok(()),
        Some(mismatch) => Err(ShuffleSegError::IncompatibleWeights {
            name: mismatch.name,
            expected: mismatch.expected,
            actual: mismatch
                .actual
                .map_or_else(|| "missing".to_owned(), |shape| format!("{shape:?}")),
        }),
    }
}

/// Key remaps for the backbone, `prefix` prepended to the remapped paths.
#[cfg(any(feature = "pretrained", test))]
fn backbone_key_remaps(prefix: &str) -> Vec<(String, String)> {
    let mut remaps = vec![
        (r"^module\.".to_owned(), String::new()),
        (r"^conv1\.0\.".to_owned(), format!("{prefix}stem.conv.")),
        (r"^conv1\.1\.".to_owned(), format!("{prefix}stem.bn.")),
    ];
    for (index, stage) in ["stage2", "stage3", "stage4"].into_iter().enumerate() {
        remaps.push((format!(r"^{stage}\."), format!("{prefix}stages.{index}.units.")));
    }

    let branches = [
        (r"\.branch1\.0\.", ".branch_proj.dw_conv."),
        (r"\.branch1\.1\.", ".branch_proj.dw_bn."),
        (r"\.branch1\.2\.", ".branch_proj.pw_conv."),
        (r"\.branch1\.3\.", ".branch_proj.pw_bn."),
        (r"\.branch2\.0\.", ".branch_main.pw_in_conv."),
        (r"\.branch2\.1\.", ".branch_main.pw_in_bn."),
        (r"\.branch2\.3\.", ".branch_main.dw_conv."),
        (r"\.branch2\.4\.", ".branch_main.dw_bn."),
        (r"\.branch2\.5\.", ".branch_main.pw_out_conv."),
        (r"\.branch2\.6\.", ".branch_main.pw_out_bn."),
    ];
    remaps.extend(
        branches
            .into_iter()
            .map(|(pattern, replacement)| (pattern.to_owned(), replacement.to_owned())),
    );

    remaps
}

/// Key remaps for the decoder (`mask_branch.*`).
#[cfg(any(feature = "pretrained", test))]
fn decoder_key_remaps() -> Vec<(String, String)> {
    let mut remaps = [
        ("conv0.0", "lateral.dw_conv"),
        ("conv0.1", "lateral.dw_bn"),
        ("conv0.2", "lateral.pw_conv"),
        ("conv0.3", "lateral.pw_bn"),
        ("conv1", "fuse_mid.conv"),
        ("bn1", "fuse_mid.bn"),
        ("conv2", "fuse_fine.conv"),
        ("bn2", "fuse_fine.bn"),
        ("conv_d0", "head.conv"),
        ("conv_d0_1", "head.pointwise"),
        ("conv_d1", "aux_head.conv"),
        ("conv_d1_1", "aux_head.pointwise"),
        ("downup.scale0.0", "refine.base.bn"),
        ("downup.scale0.2", "refine.base.conv"),
        ("downup.scale1.1", "refine.pool_half.bn"),
        ("downup.scale1.2", "refine.pool_half.conv"),
        ("downup.scale2.1", "refine.pool_quarter.bn"),
        ("downup.scale2.2", "refine.pool_quarter.conv"),
        ("downup.scale3.0", "refine.strided.dw_conv"),
        ("downup.scale3.1", "refine.strided.bn"),
        ("downup.scale3.2", "refine.strided.conv"),
        ("downup.compression.0", "refine.compress.bn"),
        ("downup.compression.2", "refine.compress.conv"),
        ("downup.shortcut.0", "refine.shortcut.bn"),
        ("downup.shortcut.2", "refine.shortcut.conv"),
    ]
    .into_iter()
    .map(|(source, target)| {
        (
            format!(r"^mask_branch\.{}\.", source.replace('.', r"\.")),
            format!("decoder.{target}."),
        )
    })
    .collect::<Vec<_>>();

    for level in 0..3 {
        let process = level + 1;
        remaps.push((
            format!(r"^mask_branch\.downup\.process{process}\.0\."),
            format!("decoder.refine.levels.{level}.bn."),
        ));
        remaps.push((
            format!(r"^mask_branch\.downup\.process{process}\.2\."),
            format!("decoder.refine.levels.{level}.conv."),
        ));
    }

    remaps
}

#[cfg(feature = "pretrained")]
fn load_args(path: &Path, remaps: Vec<(String, String)>) -> LoadArgs {
    log::debug!(
        "ignoring checkpoint keys without a counterpart: {}",
        DROPPED_KEY_FAMILIES.join(", ")
    );
    let args = remaps
        .iter()
        .fold(LoadArgs::new(path.to_path_buf()), |args, (pattern, replacement)| {
            args.with_key_remap(pattern, replacement)
        });

    // Prints every original key next to its remapped path.
    if log::log_enabled!(log::Level::Trace) {
        args.with_debug_print()
    } else {
        args
    }
}

/// Loads a full segmentation checkpoint into `model`.
///
/// # Errors
///
/// Returns `ShuffleSegError::WeightLoadingFailed` if the file cannot be read or a
/// parameter is missing, and `ShuffleSegError::IncompatibleWeights` if the
/// checkpoint has a different number of units or a loaded parameter has the
/// wrong shape.
#[cfg(feature = "pretrained")]
pub fn load_checkpoint<B: Backend>(
    model: ShuffleSeg<B>,
    path: &Path,
    device: &B::Device,
) -> ShuffleSegResult<ShuffleSeg<B>> {
    let reference = model.shape_inventory();
    let mut remaps = backbone_key_remaps("backbone.");
    remaps.extend(decoder_key_remaps());

    let record: ShuffleSegRecord<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(load_args(path, remaps), device)
        .map_err(|e| ShuffleSegError::WeightLoadingFailed {
            reason: format!("{}: {e}", path.display()),
        })?;
    let model = model.load_checked_record(record)?;
    verify_weights(&reference, &model)?;

    log::info!(
        "loaded {} parameters from {}",
        reference.num_elements(),
        path.display()
    );
    Ok(model)
}

/// Loads an ImageNet classification checkpoint into the backbone of `model`.
///
/// The decoder keeps its initialization.
///
/// # Errors
///
/// Same as [`load_checkpoint`].
#[cfg(feature = "pretrained")]
pub fn load_backbone_checkpoint<B: Backend>(
    model: ShuffleSeg<B>,
    path: &Path,
    device: &B::Device,
) -> ShuffleSegResult<ShuffleSeg<B>> {
    let reference = model.shape_inventory();

    let record: ShuffleNetV2BackboneRecord<B> =
        PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(load_args(path, backbone_key_remaps("")), device)
            .map_err(|e| ShuffleSegError::WeightLoadingFailed {
                reason: format!("{}: {e}", path.display()),
            })?;
    let model = model.load_backbone_record(record)?;
    verify_weights(&reference, &model)?;

    log::info!("loaded backbone weights from {}", path.display());
    log::warn!("decoder parameters were not loaded and keep their initialization");
    Ok(model)
}

/// Resolves `locator` to a local file, downloading URLs into the cache directory.
///
/// # Errors
///
/// Returns `ShuffleSegError::WeightLoadingFailed` if the file does not exist or
/// the download fails.
#[cfg(feature = "pretrained")]
pub fn fetch_weights(locator: &str) -> ShuffleSegResult<PathBuf> {
    let failed = |reason: String| ShuffleSegError::WeightLoadingFailed { reason };

    if !(locator.starts_with("http://") || locator.starts_with("https://")) {
        let path = PathBuf::from(locator);
        return if path.is_file() {
            Ok(path)
        } else {
            Err(failed(format!("weight file not found: {locator}")))
        };
    }

    let file_name = locator
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| failed(format!("cannot derive a file name from {locator}")))?;
    let cache_dir = dirs::cache_dir()
        .ok_or_else(|| failed("no cache directory on this platform".to_owned()))?
        .join("shufflenet-seg");
    let target = cache_dir.join(file_name);
    if target.is_file() {
        log::debug!("using cached weights {}", target.display());
        return Ok(target);
    }

    fs::create_dir_all(&cache_dir)
        .map_err(|e| failed(format!("cannot create {}: {e}", cache_dir.display())))?;

    log::info!("downloading {locator}");
    let response = ureq::get(locator)
        .call()
        .map_err(|e| failed(format!("failed to download {locator}: {e}")))?;
    if response.status() != 200 {
        return Err(failed(format!(
            "download of {locator} failed with status {}",
            response.status()
        )));
    }

    let bytes = write_atomically(&mut response.into_reader(), &target)?;

    log::info!("downloaded {bytes} bytes to {}", target.display());
    Ok(target)
}

/// Streams `reader` into `<target>.part` and renames it to `target` once
/// complete. The partial file is removed if the stream fails.
#[cfg(any(feature = "pretrained", test))]
fn write_atomically(reader: &mut impl io::Read, target: &Path) -> ShuffleSegResult<u64> {
    let failed = |reason: String| ShuffleSegError::WeightLoadingFailed { reason };

    let mut partial = target.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let mut file = File::create(&partial)
        .map_err(|e| failed(format!("cannot create {}: {e}", partial.display())))?;
    let bytes = match io::copy(reader, &mut file) {
        Ok(bytes) => bytes,
        Err(e) => {
            drop(file);
            fs::remove_file(&partial).ok();
            return Err(failed(format!("failed to write {}: {e}", partial.display())));
        }
    };
    fs::rename(&partial, target)
        .map_err(|e| failed(format!("cannot move {}: {e}", partial.display())))?;

    Ok(bytes)
}

/// Builds the network for `preset` and loads its ImageNet backbone.
///
/// # Errors
///
/// Returns `ShuffleSegError::UnsupportedPretrained` if the registry has no locator
/// for `preset`, before anything is downloaded or allocated.
#[cfg(feature = "pretrained")]
pub fn from_pretrained<B: Backend>(
    config: &ShuffleSegConfig,
    registry: &PretrainedRegistry,
    preset: ArchPreset,
    device: &B::Device,
) -> ShuffleSegResult<ShuffleSeg<B>> {
    let locator = registry.locator(preset)?;
    if ArchPreset::matching(&config.backbone) != Some(preset) {
        log::warn!(
            "replacing the configured backbone with the {} preset",
            preset.arch_name()
        );
    }
    let config = config.clone().with_backbone(preset.backbone_config());
    let model = config.init(device)?;
    let path = fetch_weights(locator)?;

    load_backbone_checkpoint(model, &path, device)
}

/// Same preset check as `from_pretrained` for builds without download support.
///
/// # Errors
///
/// Returns `ShuffleSegError::UnsupportedPretrained` for presets without a
/// locator and `ShuffleSegError::WeightLoadingFailed` otherwise.
#[cfg(not(feature = "pretrained"))]
pub fn from_pretrained<B: Backend>(
    _config: &ShuffleSegConfig,
    registry: &PretrainedRegistry,
    preset: ArchPreset,
    _device: &B::Device,
) -> ShuffleSegResult<ShuffleSeg<B>> {
    registry.locator(preset)?;
    Err(ShuffleSegError::WeightLoadingFailed {
        reason: "built without the `pretrained` feature".to_owned(),
    })
}
