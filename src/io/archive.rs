//! Whole-model files.
//!
//! An archive holds everything needed to rebuild a model without the code
//! that originally assembled it: the layer stack as [`LayerConfig`] records,
//! the trainable flag of every layer, the full state dict, and (for compiled
//! models) the optimizer, loss and metrics.

use crate::error::{ClassifierError, Result};
use crate::io::StateDict;
use crate::model::{CompileOptions, CompiledModel, Model, compile};
use crate::nn::{AdamConfig, AdamState, LayerConfig, LayerEntry, Loss, Metric, Network, Sequential};
use bincode::{Decode, Encode, config};
use std::fs;
use std::path::Path;
use tracing::debug;

const FORMAT_TAG: &str = "cnn-classifier/model/v1";

#[derive(Encode, Decode, Clone, Debug, PartialEq)]
struct LayerRecord {
    name: String,
    config: LayerConfig,
    trainable: bool,
}

#[derive(Encode, Decode, Clone, Debug, PartialEq)]
struct TrainingRecord {
    optimizer: AdamConfig,
    optimizer_state: AdamState,
    loss: Loss,
    metrics: Vec<Metric>,
}

#[derive(Encode, Decode, Clone, Debug, PartialEq)]
struct ModelArchive {
    format: String,
    name: String,
    input_shape: Vec<usize>,
    layers: Vec<LayerRecord>,
    state: StateDict,
    training: Option<TrainingRecord>,
}

impl ModelArchive {
    fn from_model(model: &Model, training: Option<TrainingRecord>) -> Self {
        ModelArchive {
            format: FORMAT_TAG.to_string(),
            name: model.name().to_string(),
            input_shape: model.input_dims().to_vec(),
            layers: model
                .layers()
                .iter()
                .map(|l| LayerRecord {
                    name: l.name().to_string(),
                    config: l.config(),
                    trainable: l.trainable(),
                })
                .collect(),
            state: model.state_dict(),
            training,
        }
    }

    fn write(&self, path: &Path) -> Result<()> {
        let encoded = bincode::encode_to_vec(self, config::standard())?;
        fs::write(path, &encoded)?;
        debug!(
            "Wrote model '{}' ({} layers, {} bytes) to {}",
            self.name,
            self.layers.len(),
            encoded.len(),
            path.display()
        );
        Ok(())
    }

    fn read(path: &Path) -> Result<Self> {
        let buffer = fs::read(path)?;
        let (archive, _): (ModelArchive, _) =
            bincode::decode_from_slice(&buffer, config::standard())?;
        if archive.format != FORMAT_TAG {
            return Err(ClassifierError::Serialization(format!(
                "{} is not a model archive (format '{}')",
                path.display(),
                archive.format
            )));
        }
        Ok(archive)
    }

    /// Rebuild the layer stack and load the stored weights into it.
    fn into_model(self) -> Result<(Model, Option<TrainingRecord>)> {
        let corrupt = |e: ClassifierError| {
            ClassifierError::Serialization(format!("archived architecture is invalid: {}", e))
        };

        let mut body = Sequential::new();
        for record in self.layers {
            let layer = record.config.build().map_err(corrupt)?;
            let mut entry = LayerEntry::new(record.name, layer);
            entry.set_trainable(record.trainable);
            body.push(entry).map_err(corrupt)?;
        }
        let mut model = Model::new(self.name, &self.input_shape, body).map_err(corrupt)?;

        let diff = model.load_state_dict_checked(&self.state);
        if !diff.is_empty() {
            return Err(ClassifierError::Serialization(format!(
                "archived weights do not match the architecture: \
                 missing {:?}, unexpected {:?}, shape mismatches {:?}",
                diff.missing_keys, diff.unexpected_keys, diff.shape_mismatches
            )));
        }
        Ok((model, self.training))
    }
}

/// Save a model's architecture, weights and trainable flags.
pub fn save_model(model: &Model, path: impl AsRef<Path>) -> Result<()> {
    ModelArchive::from_model(model, None).write(path.as_ref())
}

/// Save a compiled model, including optimizer configuration and moments.
pub fn save_compiled_model(model: &CompiledModel, path: impl AsRef<Path>) -> Result<()> {
    let options = model.options();
    let training = TrainingRecord {
        optimizer: options.optimizer,
        optimizer_state: model.optimizer().state(),
        loss: options.loss,
        metrics: options.metrics,
    };
    ModelArchive::from_model(model.model(), Some(training)).write(path.as_ref())
}

/// Load a model archive. Training configuration, if present, is dropped.
pub fn load_model(path: impl AsRef<Path>) -> Result<Model> {
    let (model, _) = ModelArchive::read(path.as_ref())?.into_model()?;
    Ok(model)
}

/// Load an archive written by [`save_compiled_model`] and recompile it.
pub fn load_compiled_model(path: impl AsRef<Path>) -> Result<CompiledModel> {
    let path = path.as_ref();
    let (model, training) = ModelArchive::read(path)?.into_model()?;
    let training = training.ok_or_else(|| {
        ClassifierError::Serialization(format!(
            "{} holds an uncompiled model",
            path.display()
        ))
    })?;

    let mut compiled = compile(
        model,
        CompileOptions {
            optimizer: training.optimizer,
            loss: training.loss,
            metrics: training.metrics,
        },
    )?;
    compiled.optimizer_mut().restore(training.optimizer_state)?;
    Ok(compiled)
}
