//! Export of a constructed network.
//!
//! An export writes two files into the output directory: the parameter record
//! in the selected burn format and a JSON manifest describing the graph's named
//! inputs and outputs. The output shape in the manifest comes from tracing the
//! network once on a zero tensor of the configured input shape.

use std::{fs, path::PathBuf};

use burn::{
    prelude::*,
    record::{
        BinFileRecorder, FullPrecisionSettings, NamedMpkFileRecorder, NamedMpkGzFileRecorder,
        PrettyJsonFileRecorder,
    },
};

use crate::{
    config::{DynamicAxis, ExportConfig, OutputMode, RecordFormat, ShuffleSegConfig},
    error::{ShuffleSegError, ShuffleSegResult},
    models::shuffle_seg::ShuffleSeg,
    VERSION,
};

/// Name and shape of a graph input or output.
#[derive(Config, Debug, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

/// Description of an exported graph, saved next to its parameter record.
#[derive(Config, Debug)]
pub struct GraphManifest {
    pub format_version: usize,
    /// Crate name and version that wrote the export.
    pub producer: String,
    pub model: ShuffleSegConfig,
    pub output_mode: OutputMode,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
    pub dynamic_axes: Vec<DynamicAxis>,
    pub num_parameters: usize,
    pub record_format: RecordFormat,
    /// File name of the record, relative to the manifest.
    pub record_file: String,
}

/// Files and shapes produced by [`export`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub record_path: PathBuf,
    pub manifest_path: PathBuf,
    pub output_shape: [usize; 4],
    pub num_parameters: usize,
}

fn export_failed(reason: impl Into<String>) -> ShuffleSegError {
    ShuffleSegError::ExportFailed {
        reason: reason.into(),
    }
}

/// Exports `model` as described by `config`.
///
/// The manifest records the configuration `model` was built from.
///
/// # Errors
///
/// Returns `ShuffleSegError::InvalidConfiguration` if `config` does not validate
/// and `ShuffleSegError::ExportFailed` if a file cannot be written.
pub fn export<B: Backend>(
    model: &ShuffleSeg<B>,
    config: &ExportConfig,
    device: &B::Device,
) -> ShuffleSegResult<ExportReport> {
    config.validate(1)?;

    let input = Tensor::<B, 4>::zeros(config.input_shape, device);
    let output_shape = model.forward(input)?.dims();
    log::debug!(
        "traced {:?} -> {:?}",
        config.input_shape,
        output_shape
    );

    fs::create_dir_all(&config.output_dir).map_err(|e| {
        export_failed(format!(
            "cannot create {}: {e}",
            config.output_dir.display()
        ))
    })?;

    let record_path = config.record_path();
    save_record(model, config)?;

    let num_parameters = model.num_params();
    let record_file = record_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let manifest = GraphManifest::new(
        config.format_version,
        format!("{}-{VERSION}", env!("CARGO_PKG_NAME")),
        model.config().clone(),
        model.output_mode().clone(),
        config
            .input_names
            .iter()
            .map(|name| TensorSpec::new(name.clone(), config.input_shape.to_vec()))
            .collect(),
        config
            .output_names
            .iter()
            .map(|name| TensorSpec::new(name.clone(), output_shape.to_vec()))
            .collect(),
        config.dynamic_axes.clone(),
        num_parameters,
        config.record_format,
        record_file,
    );
    let manifest_path = config.manifest_path();
    manifest.save(&manifest_path).map_err(|e| {
        export_failed(format!("cannot write {}: {e}", manifest_path.display()))
    })?;

    log::info!(
        "exported {} parameters to {} ({})",
        num_parameters,
        record_path.display(),
        manifest_path.display()
    );

    Ok(ExportReport {
        record_path,
        manifest_path,
        output_shape,
        num_parameters,
    })
}

fn save_record<B: Backend>(model: &ShuffleSeg<B>, config: &ExportConfig) -> ShuffleSegResult<()> {
    // The recorder appends its own extension.
    let stem = config.output_dir.join(&config.file_stem);
    let model = model.clone();
    let result = match config.record_format {
        RecordFormat::NamedMpk => {
            model.save_file(stem, &NamedMpkFileRecorder::<FullPrecisionSettings>::new())
        }
        RecordFormat::NamedMpkGz => {
            model.save_file(stem, &NamedMpkGzFileRecorder::<FullPrecisionSettings>::new())
        }
        RecordFormat::Bin => model.save_file(stem, &BinFileRecorder::<FullPrecisionSettings>::new()),
        RecordFormat::PrettyJson => {
            model.save_file(stem, &PrettyJsonFileRecorder::<FullPrecisionSettings>::new())
        }
    };

    result.map_err(|e| export_failed(format!("cannot write record: {e}")))
}

/// Loads a record written by [`export`] into `model`.
///
/// # Errors
///
/// Returns `ShuffleSegError::WeightLoadingFailed` if the record cannot be read.
pub fn load_exported<B: Backend>(
    model: ShuffleSeg<B>,
    config: &ExportConfig,
    device: &B::Device,
) -> ShuffleSegResult<ShuffleSeg<B>> {
    let stem = config.output_dir.join(&config.file_stem);
    let result = match config.record_format {
        RecordFormat::NamedMpk => model.load_file(
            stem,
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        ),
        RecordFormat::NamedMpkGz => model.load_file(
            stem,
            &NamedMpkGzFileRecorder::<FullPrecisionSettings>::new(),
            device,
        ),
        RecordFormat::Bin => model.load_file(
            stem,
            &BinFileRecorder::<FullPrecisionSettings>::new(),
            device,
        ),
        RecordFormat::PrettyJson => model.load_file(
            stem,
            &PrettyJsonFileRecorder::<FullPrecisionSettings>::new(),
            device,
        ),
    };

    result.map_err(|e| ShuffleSegError::WeightLoadingFailed {
        reason: format!("{}: {e}", config.record_path().display()),
    })
}
