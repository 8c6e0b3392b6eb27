//! The base-model stage: fetch a pretrained backbone, freeze it, put a new
//! classification head on top and persist both graphs.

pub mod freeze;
pub mod head;

pub use freeze::{FreezePolicy, apply_freeze_policy};
pub use head::{POOLING_LAYER, PREDICTIONS_LAYER, build_classification_head};

use crate::catalog::ModelCatalog;
use crate::config::PrepareBaseModelConfig;
use crate::error::Result;
use crate::model::{CompiledModel, Model};
use crate::nn::Network;
use tracing::info;

/// The stage always trains only the new head.
const FREEZE_ALL: bool = true;
const FREEZE_TILL: Option<usize> = None;

pub struct ModelAssembler {
    config: PrepareBaseModelConfig,
    catalog: ModelCatalog,
}

impl ModelAssembler {
    /// Weight sets are looked up in `config.weights_dir`.
    pub fn new(config: PrepareBaseModelConfig) -> Self {
        let catalog = ModelCatalog::new(config.weights_dir.clone());
        Self::with_catalog(config, catalog)
    }

    pub fn with_catalog(config: PrepareBaseModelConfig, catalog: ModelCatalog) -> Self {
        ModelAssembler { config, catalog }
    }

    pub fn config(&self) -> &PrepareBaseModelConfig {
        &self.config
    }

    /// Fetch the headless backbone and save it to `base_model_path`.
    pub fn load_backbone(&self) -> Result<Model> {
        self.config.validate()?;
        let request = self.config.backbone_request();
        let backbone = self.catalog.fetch(&request)?;
        backbone.save(&self.config.base_model_path)?;
        info!(
            "Saved base model {} ({:?} -> {:?}) to {}",
            backbone.name(),
            backbone.input_shape(),
            backbone.output_shape(),
            self.config.base_model_path.display()
        );
        Ok(backbone)
    }

    /// Freeze the whole backbone, add the classification head, compile and
    /// save the result to `updated_base_model_path`.
    pub fn update_base_model(&self, mut backbone: Model) -> Result<CompiledModel> {
        self.config.validate()?;
        apply_freeze_policy(&mut backbone, FREEZE_ALL, FREEZE_TILL);
        let full_model = build_classification_head(
            backbone,
            self.config.params_classes,
            self.config.params_learning_rate,
        )?;
        full_model.save(&self.config.updated_base_model_path)?;
        info!(
            "Saved updated base model {} ({} trainable layers) to {}",
            full_model.name(),
            full_model.trainable_layer_count(),
            self.config.updated_base_model_path.display()
        );
        Ok(full_model)
    }

    /// Both steps in order; returns the compiled model.
    pub fn run(&self) -> Result<CompiledModel> {
        let backbone = self.load_backbone()?;
        self.update_base_model(backbone)
    }
}
