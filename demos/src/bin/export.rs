//! Export tool
//!
//! Builds a segmentation network, optionally loads weights into it, and writes
//! its parameter record and graph manifest.
//!
//! ## Usage
//!
//! ```bash
//! # Export with the default settings (x1.0, 1x3x256x320, images -> output0)
//! cargo run --bin export
//!
//! # Sigmoid single-output network with a dynamic batch axis
//! cargo run --bin export -- --pure-mask --dynamic-axis images:0:batch --dynamic-axis output0:0:batch
//!
//! # Start from the torchvision ImageNet backbone
//! cargo run --features pretrained --bin export -- --preset x0.5 --pretrained
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use burn::config::Config;
use clap::Parser;
use log::LevelFilter;
use shufflenet_seg::{
    export, ArchPreset, DynamicAxis, ExportConfig, OutputMode, PretrainedRegistry, RecordFormat,
    ShuffleSeg, ShuffleSegConfig, VERSION,
};
use shufflenet_seg_demos::{
    backend_summary, create_device, init_logging, parse_shape, SelectedBackend, SelectedDevice,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Width preset: x0.5, x1.0, x1.5 or x2.0 [default: x1.0]
    #[arg(long)]
    preset: Option<ArchPreset>,

    /// Channels of the predicted mask (annotated classes + 1)
    #[arg(long, default_value_t = 1)]
    mask_classes: usize,

    /// Emit a single sigmoid probability map instead of logits
    #[arg(long)]
    pure_mask: bool,

    /// Network configuration file (JSON); overrides the mask options and must
    /// agree with --preset when both are given
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// PyTorch checkpoint to load (.pth)
    #[arg(long)]
    weights: Option<PathBuf>,

    /// The checkpoint holds only backbone (classification) weights
    #[arg(long, requires = "weights")]
    backbone_only: bool,

    /// Initialize the backbone from the preset's registered ImageNet weights
    #[arg(long, conflicts_with = "weights")]
    pretrained: bool,

    /// Example input shape N,C,H,W
    #[arg(long, default_value = "1,3,256,320", value_parser = parse_shape)]
    shape: [usize; 4],

    /// Version written into the graph manifest
    #[arg(long, default_value_t = 12)]
    format_version: usize,

    /// Parameter record format: mpk, mpk.gz, bin or json
    #[arg(long, default_value = "mpk")]
    record_format: RecordFormat,

    /// Input tensor name
    #[arg(long = "input-name", default_value = "images")]
    input_names: Vec<String>,

    /// Output tensor name
    #[arg(long = "output-name", default_value = "output0")]
    output_names: Vec<String>,

    /// Dynamic axis as tensor:axis:name, repeatable
    #[arg(long = "dynamic-axis")]
    dynamic_axes: Vec<DynamicAxis>,

    /// Directory receiving the record and the manifest
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// File name of the exported files, without extension
    #[arg(long, default_value = "shufflenet_seg")]
    file_stem: String,
}

fn main() -> Result<()> {
    init_logging(LevelFilter::Info);
    let args = Args::parse();

    let model_config = model_config(&args)?;

    let device = create_device();
    log::info!("Using backend: {}", backend_summary());

    let model = build_model(&args, &model_config, &device)?;
    log::info!(
        "Backbone widths: {:?}, mask classes: {}",
        model.config().backbone.stages_out_channels,
        model.config().effective_mask_classes()
    );

    println!("Repo Version: {VERSION}.");

    let export_config = ExportConfig::new()
        .with_input_shape(args.shape)
        .with_format_version(args.format_version)
        .with_record_format(args.record_format)
        .with_input_names(args.input_names)
        .with_output_names(args.output_names)
        .with_dynamic_axes(args.dynamic_axes)
        .with_output_dir(args.output_dir)
        .with_file_stem(args.file_stem);

    let report = export(&model, &export_config, &device).context("Failed to export model")?;

    println!("Output shape: {:?}", report.output_shape);
    println!("Parameters: {}", report.num_parameters);
    println!("Record: {}", report.record_path.display());
    println!("Manifest: {}", report.manifest_path.display());

    Ok(())
}

/// Network configuration from `--config`, or from the preset and mask options.
fn model_config(args: &Args) -> Result<ShuffleSegConfig> {
    let Some(config_path) = &args.config else {
        let output_mode = if args.pure_mask {
            OutputMode::SigmoidSingleOutput
        } else {
            OutputMode::DualOutput
        };
        return Ok(
            ShuffleSegConfig::from_preset(args.preset.unwrap_or(ArchPreset::X1_0))
                .with_mask_classes(args.mask_classes)
                .with_output_mode(output_mode),
        );
    };

    let config = ShuffleSegConfig::load(config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
    if let Some(preset) = args.preset {
        if config.backbone != preset.backbone_config() {
            bail!(
                "--preset {} conflicts with the backbone of {}",
                preset.arch_name(),
                config_path.display()
            );
        }
    }

    Ok(config)
}

fn build_model(
    args: &Args,
    config: &ShuffleSegConfig,
    device: &SelectedDevice,
) -> Result<ShuffleSeg<SelectedBackend>> {
    if args.pretrained {
        let Some(preset) = args.preset.or_else(|| ArchPreset::matching(&config.backbone)) else {
            bail!("--pretrained needs a backbone that matches one of the width presets");
        };
        let registry = PretrainedRegistry::torchvision();
        return shufflenet_seg::from_pretrained(config, &registry, preset, device)
            .context("Failed to load pretrained backbone");
    }

    let model = config
        .init::<SelectedBackend>(device)
        .context("Failed to initialize model")?;

    match &args.weights {
        Some(path) => load_weights(model, path, args.backbone_only, device),
        None => Ok(model),
    }
}

#[cfg(feature = "pretrained")]
fn load_weights(
    model: ShuffleSeg<SelectedBackend>,
    path: &std::path::Path,
    backbone_only: bool,
    device: &SelectedDevice,
) -> Result<ShuffleSeg<SelectedBackend>> {
    let model = if backbone_only {
        shufflenet_seg::load_backbone_checkpoint(model, path, device)
    } else {
        shufflenet_seg::load_checkpoint(model, path, device)
    };

    model.with_context(|| format!("Failed to load weights from {}", path.display()))
}

#[cfg(not(feature = "pretrained"))]
fn load_weights(
    _model: ShuffleSeg<SelectedBackend>,
    path: &std::path::Path,
    _backbone_only: bool,
    _device: &SelectedDevice,
) -> Result<ShuffleSeg<SelectedBackend>> {
    anyhow::bail!(
        "cannot load {}: rebuild with `--features pretrained`",
        path.display()
    )
}
