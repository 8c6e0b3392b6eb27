//! Built graphs: an input shape plus an ordered stack of named layers.

pub mod compiled;

pub use compiled::{CompileOptions, CompiledModel, Evaluation, compile};

use crate::error::{ClassifierError, Result};
use crate::io::{StateDict, StateDictDiff, load_state_dict_checked};
use crate::nn::network::batched;
use crate::nn::{LayerEntry, Module, Network, Sequential};
use crate::tensor::{Tensor, TensorOps};
use std::fmt::Write;
use std::path::Path;

/// A feed-forward graph with a fixed per-sample input shape.
///
/// The output shape is inferred layer by layer when the model is built, so
/// holding a `Model` means the chain of layers is known to fit together.
pub struct Model {
    name: String,
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
    body: Sequential,
}

impl Model {
    pub fn new(name: impl Into<String>, input_shape: &[usize], body: Sequential) -> Result<Self> {
        if input_shape.is_empty() || input_shape.contains(&0) {
            return Err(ClassifierError::InvalidConfig(format!(
                "input shape {:?} must have only positive dimensions",
                input_shape
            )));
        }
        let output_shape = body.output_shape(input_shape)?;
        Ok(Model {
            name: name.into(),
            input_shape: input_shape.to_vec(),
            output_shape,
            body,
        })
    }

    /// Same input and layers (trainable flags included) followed by `layers`.
    pub fn extend(self, name: impl Into<String>, layers: Vec<LayerEntry>) -> Result<Self> {
        let mut body = self.body;
        for entry in layers {
            body.push(entry)?;
        }
        Model::new(name, &self.input_shape, body)
    }

    /// Per-sample input shape, without the batch axis
    pub fn input_dims(&self) -> &[usize] {
        &self.input_shape
    }

    /// Per-sample output shape, without the batch axis
    pub fn output_dims(&self) -> &[usize] {
        &self.output_shape
    }

    pub fn body(&self) -> &Sequential {
        &self.body
    }

    pub fn layer(&self, name: &str) -> Option<&LayerEntry> {
        self.body.layers().iter().find(|l| l.name() == name)
    }

    /// One forward pass over a `(batch, ..input_shape)` tensor.
    pub fn predict(&self, x: &Tensor) -> Result<Tensor> {
        let shape = x.shape();
        if shape.len() != self.input_shape.len() + 1 || shape[1..] != self.input_shape[..] {
            return Err(ClassifierError::ShapeMismatch {
                expected: batched(&self.input_shape),
                actual: shape,
            });
        }
        Ok(self.body.forward(x))
    }

    /// Switch batch-norm layers between batch and moving statistics.
    /// Frozen layers always stay in inference mode.
    pub fn train(&mut self, mode: bool) {
        self.body.train(mode);
    }

    pub fn state_dict(&self) -> StateDict {
        self.body.state_dict()
    }

    /// Load weights if every expected key is present with the right shape.
    pub fn load_state_dict_checked(&mut self, state: &StateDict) -> StateDictDiff {
        load_state_dict_checked(&mut self.body, state)
    }

    /// Learnable parameters of trainable layers, keyed like the state dict
    pub fn trainable_parameters(&self) -> Vec<(String, Tensor)> {
        self.body.trainable_parameters()
    }

    /// Every value in the state dict: learnable parameters plus buffers
    pub fn parameter_count(&self) -> usize {
        self.state_dict().values().map(|t| t.data.len()).sum()
    }

    pub fn trainable_parameter_count(&self) -> usize {
        self.body
            .layers()
            .iter()
            .filter(|l| l.trainable())
            .map(|l| l.parameter_count())
            .sum()
    }

    pub fn non_trainable_parameter_count(&self) -> usize {
        self.parameter_count() - self.trainable_parameter_count()
    }

    /// Keras-style table of layers, output shapes and parameter counts.
    pub fn summary(&self) -> String {
        let fmt_shape = |dims: &[usize]| {
            let dims: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
            format!("(None, {})", dims.join(", "))
        };
        let rule = "=".repeat(78);

        let mut out = String::new();
        let _ = writeln!(out, "Model: \"{}\"", self.name);
        let _ = writeln!(out, "{:<40}{:<26}{:>12}", "Layer (type)", "Output Shape", "Param #");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(
            out,
            "{:<40}{:<26}{:>12}",
            "input (InputLayer)",
            fmt_shape(&self.input_shape),
            0
        );
        // Shapes were validated in `new`, so the trace cannot fail here
        let shapes = self.body.shape_trace(&self.input_shape).unwrap_or_default();
        for (entry, shape) in self.body.layers().iter().zip(&shapes) {
            let params: usize = entry
                .layer()
                .state_dict()
                .values()
                .map(|t| t.data.len())
                .sum();
            let label = format!("{} ({})", entry.name(), entry.config().kind());
            let _ = writeln!(out, "{:<40}{:<26}{:>12}", label, fmt_shape(shape), params);
        }
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Total params: {}", self.parameter_count());
        let _ = writeln!(out, "Trainable params: {}", self.trainable_parameter_count());
        let _ = write!(
            out,
            "Non-trainable params: {}",
            self.non_trainable_parameter_count()
        );
        out
    }
}

impl Network for Model {
    fn name(&self) -> &str {
        &self.name
    }

    fn layers(&self) -> &[LayerEntry] {
        self.body.layers()
    }

    fn layers_mut(&mut self) -> &mut [LayerEntry] {
        self.body.layers_mut()
    }

    fn input_shape(&self) -> Vec<Option<usize>> {
        batched(&self.input_shape)
    }

    fn output_shape(&self) -> Vec<Option<usize>> {
        batched(&self.output_shape)
    }

    fn save(&self, path: &Path) -> Result<()> {
        crate::io::save_model(self, path)
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("input_shape", &self.input_shape)
            .field("output_shape", &self.output_shape)
            .field("layers", &self.body.len())
            .finish()
    }
}
