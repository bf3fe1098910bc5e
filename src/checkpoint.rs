//! Persistence of the best model observed during training.
//!
//! A checkpoint is a single record holding the network parameters under
//! `model_weights`, together with the epoch and validation accuracy at which
//! it was taken. Records are written at full precision so that a reloaded
//! network reproduces the exact outputs of the saved one.

use std::path::Path;

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder},
    tensor::backend::Backend,
};

use crate::{
    error::{Result, VggError},
    model::{Vgg, VggConfig, VggRecord},
};

/// Recorder used for checkpoint files (`.mpk` is appended to the given path).
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

#[derive(Record)]
pub struct CheckpointRecord<B: Backend> {
    pub model_weights: VggRecord<B>,
    pub stage_config: Vec<usize>,
    pub epoch: usize,
    pub val_accuracy: f64,
}

/// Where a checkpoint was taken.
#[derive(new, Debug, Clone, Copy, PartialEq)]
pub struct CheckpointMeta {
    pub epoch: usize,
    pub val_accuracy: f64,
}

/// Writes `model` and its metadata to `path`.
pub fn save_checkpoint<B: Backend>(
    model: &Vgg<B>,
    config: &VggConfig,
    meta: CheckpointMeta,
    path: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let record = CheckpointRecord {
        model_weights: model.clone().into_record(),
        stage_config: config.stage_config.clone(),
        epoch: meta.epoch,
        val_accuracy: meta.val_accuracy,
    };
    Recorder::<B>::record(&CheckpointRecorder::new(), record, path.to_path_buf())?;

    log::info!(
        "Saved checkpoint of epoch {} (accuracy {:.4}) to {}",
        meta.epoch,
        meta.val_accuracy,
        path.display()
    );

    Ok(())
}

/// Builds a network from `config` and applies the weights stored at `path`.
///
/// Fails with [VggError::TopologyMismatch] when the checkpoint was saved from a
/// network with a different layout.
pub fn load_checkpoint<B: Backend>(
    config: &VggConfig,
    path: &Path,
    device: &B::Device,
) -> Result<(Vgg<B>, CheckpointMeta)> {
    let record: CheckpointRecord<B> = CheckpointRecorder::new().load(path.to_path_buf(), device)?;

    if record.stage_config != config.stage_config {
        return Err(VggError::TopologyMismatch {
            name: "stage_config".to_string(),
            expected: format!("{:?}", config.stage_config),
            found: format!("{:?}", record.stage_config),
        });
    }

    let model = config.init::<B>(device)?;
    let expected = model.layout();
    let model = model.load_record(record.model_weights);
    check_layout(&expected, &model)?;

    Ok((model, CheckpointMeta::new(record.epoch, record.val_accuracy)))
}

fn check_layout<B: Backend>(expected: &[(String, Vec<usize>)], model: &Vgg<B>) -> Result<()> {
    let found = model.layout();

    for (i, (name, shape)) in expected.iter().enumerate() {
        match found.get(i) {
            Some((found_name, found_shape)) if found_name == name && found_shape == shape => {}
            Some((found_name, found_shape)) => {
                return Err(VggError::TopologyMismatch {
                    name: name.clone(),
                    expected: format!("{shape:?}"),
                    found: format!("{found_name} {found_shape:?}"),
                })
            }
            None => {
                return Err(VggError::TopologyMismatch {
                    name: name.clone(),
                    expected: format!("{shape:?}"),
                    found: "nothing".to_string(),
                })
            }
        }
    }

    Ok(())
}
