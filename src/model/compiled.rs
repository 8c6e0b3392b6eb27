use crate::error::Result;
use crate::model::Model;
use crate::nn::{Adam, AdamConfig, LayerEntry, Loss, Metric, Network};
use crate::tensor::Tensor;
use std::path::Path;

/// Optimizer, loss and metrics to attach to a model
#[derive(Clone, Debug, PartialEq)]
pub struct CompileOptions {
    pub optimizer: AdamConfig,
    pub loss: Loss,
    pub metrics: Vec<Metric>,
}

impl CompileOptions {
    /// Adam at `learning_rate`, categorical cross-entropy, accuracy
    pub fn classification(learning_rate: f32) -> Self {
        CompileOptions {
            optimizer: AdamConfig::with_learning_rate(learning_rate),
            loss: Loss::CategoricalCrossentropy,
            metrics: vec![Metric::Accuracy],
        }
    }
}

/// Loss and metric values for one batch
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    pub metrics: Vec<(Metric, f32)>,
}

impl Evaluation {
    pub fn metric(&self, metric: Metric) -> Option<f32> {
        self.metrics
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, v)| *v)
    }
}

/// A model bound to an optimizer, a loss and its metrics.
///
/// The optimizer tracks the parameters that were trainable at compile time.
pub struct CompiledModel {
    model: Model,
    optimizer: Adam,
    loss: Loss,
    metrics: Vec<Metric>,
}

pub fn compile(model: Model, options: CompileOptions) -> Result<CompiledModel> {
    options.optimizer.validate()?;
    let optimizer = Adam::new(model.trainable_parameters(), options.optimizer);
    Ok(CompiledModel {
        model,
        optimizer,
        loss: options.loss,
        metrics: options.metrics,
    })
}

impl CompiledModel {
    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn into_model(self) -> Model {
        self.model
    }

    pub fn optimizer(&self) -> &Adam {
        &self.optimizer
    }

    pub fn optimizer_mut(&mut self) -> &mut Adam {
        &mut self.optimizer
    }

    pub fn loss(&self) -> Loss {
        self.loss
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn options(&self) -> CompileOptions {
        CompileOptions {
            optimizer: *self.optimizer.config(),
            loss: self.loss,
            metrics: self.metrics.clone(),
        }
    }

    pub fn predict(&self, x: &Tensor) -> Result<Tensor> {
        self.model.predict(x)
    }

    /// Loss and metrics of one batch of inputs `x` against one-hot targets `y`.
    pub fn test_on_batch(&self, x: &Tensor, y: &Tensor) -> Result<Evaluation> {
        let y_pred = self.model.predict(x)?;
        let loss = self.loss.compute(&y_pred, y)?;
        let metrics = self
            .metrics
            .iter()
            .map(|m| Ok((*m, m.compute(&y_pred, y)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Evaluation { loss, metrics })
    }
}

impl Network for CompiledModel {
    fn name(&self) -> &str {
        self.model.name()
    }

    fn layers(&self) -> &[LayerEntry] {
        self.model.layers()
    }

    fn layers_mut(&mut self) -> &mut [LayerEntry] {
        self.model.layers_mut()
    }

    fn input_shape(&self) -> Vec<Option<usize>> {
        self.model.input_shape()
    }

    fn output_shape(&self) -> Vec<Option<usize>> {
        self.model.output_shape()
    }

    fn save(&self, path: &Path) -> Result<()> {
        crate::io::save_compiled_model(self, path)
    }
}

impl std::fmt::Debug for CompiledModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModel")
            .field("model", &self.model)
            .field("optimizer", self.optimizer.config())
            .field("loss", &self.loss)
            .field("metrics", &self.metrics)
            .finish()
    }
}
