//! Base-model preparation for a transfer-learning image classifier.
//!
//! The stage fetches a headless EfficientNet backbone, freezes it, appends a
//! global-average-pooling + softmax head sized to the class count, compiles
//! the result with Adam and categorical cross-entropy, and saves both graphs.
//!
//! ```no_run
//! use cnn_classifier::{ConfigurationManager, ModelAssembler};
//!
//! let manager = ConfigurationManager::new("config/config.yaml", "params.yaml")?;
//! let assembler = ModelAssembler::new(manager.prepare_base_model_config()?);
//! let model = assembler.run()?;
//! # Ok::<(), cnn_classifier::ClassifierError>(())
//! ```

pub mod assembler;
pub mod catalog;
pub mod config;
pub mod error;
pub mod io;
pub mod model;
pub mod nn;
pub mod tensor;

pub use assembler::{
    FreezePolicy, ModelAssembler, apply_freeze_policy, build_classification_head,
};
pub use catalog::{Architecture, BackboneRequest, ModelCatalog, WeightSet};
pub use config::{ConfigurationManager, PrepareBaseModelConfig};
pub use error::{ClassifierError, Result};
pub use io::{load_compiled_model, load_model, save_compiled_model, save_model};
pub use model::{CompileOptions, CompiledModel, Evaluation, Model, compile};
pub use nn::{
    Activation, Adam, AdamConfig, BatchNorm, Conv2d, Dense, GlobalAveragePooling2d, Layer,
    LayerEntry, Loss, MbConv, Metric, Module, Network, Sequential,
};
pub use tensor::{RawTensor, Tensor, TensorOps};
