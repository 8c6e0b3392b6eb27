use crate::error::{ClassifierError, Result};
use crate::io::StateDict;
use crate::nn::layers::{LayerConfig, SequentialBuilder};
use crate::nn::{Layer, Module, prefixed, sub_state};
use crate::tensor::Tensor;

/// A named layer plus its trainable flag.
///
/// This is the handle the freezing logic works with. Flipping the flag
/// propagates to `requires_grad` on every parameter of the layer, and a
/// frozen layer always runs in inference mode.
pub struct LayerEntry {
    name: String,
    layer: Box<dyn Layer>,
    trainable: bool,
}

impl LayerEntry {
    pub fn new(name: impl Into<String>, layer: Box<dyn Layer>) -> Self {
        let mut entry = LayerEntry {
            name: name.into(),
            layer,
            trainable: true,
        };
        entry.set_trainable(true);
        entry
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trainable(&self) -> bool {
        self.trainable
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
        for p in self.layer.parameters() {
            p.borrow_mut().requires_grad = trainable;
        }
        if !trainable {
            self.layer.train(false);
        }
    }

    pub fn layer(&self) -> &dyn Layer {
        self.layer.as_ref()
    }

    pub fn layer_mut(&mut self) -> &mut dyn Layer {
        self.layer.as_mut()
    }

    pub fn config(&self) -> LayerConfig {
        self.layer.config()
    }

    /// Number of scalar values across the layer's learnable parameters
    pub fn parameter_count(&self) -> usize {
        self.layer
            .parameters()
            .iter()
            .map(|p| p.borrow().numel())
            .sum()
    }
}

impl std::fmt::Debug for LayerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerEntry")
            .field("name", &self.name)
            .field("kind", &self.layer.config().kind())
            .field("trainable", &self.trainable)
            .finish()
    }
}

/// Ordered stack of named layers; state-dict keys are `"<layer name>.<key>"`.
pub struct Sequential {
    pub(crate) layers: Vec<LayerEntry>,
}

impl Sequential {
    pub fn new() -> Self {
        Sequential { layers: Vec::new() }
    }

    pub fn builder() -> SequentialBuilder {
        SequentialBuilder::new()
    }

    /// Append a layer; names must be unique.
    pub fn push(&mut self, entry: LayerEntry) -> Result<()> {
        if entry.name.is_empty() || self.layers.iter().any(|l| l.name == entry.name) {
            return Err(ClassifierError::InvalidConfig(format!(
                "layer name '{}' is empty or already used",
                entry.name
            )));
        }
        self.layers.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[LayerEntry] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [LayerEntry] {
        &mut self.layers
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name.as_str()).collect()
    }

    /// Per-layer output shapes for a single sample of shape `input`
    pub fn shape_trace(&self, input: &[usize]) -> Result<Vec<Vec<usize>>> {
        let mut current = input.to_vec();
        let mut shapes = Vec::with_capacity(self.layers.len());
        for entry in &self.layers {
            current = entry.layer.output_shape(&current).map_err(|e| match e {
                ClassifierError::InvalidConfig(msg) => {
                    ClassifierError::InvalidConfig(format!("layer '{}': {}", entry.name, msg))
                }
                other => other,
            })?;
            shapes.push(current.clone());
        }
        Ok(shapes)
    }

    /// Output shape of the whole stack for a single sample
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        Ok(self
            .shape_trace(input)?
            .pop()
            .unwrap_or_else(|| input.to_vec()))
    }

    /// Parameters of trainable layers only, keyed like the state dict
    pub fn trainable_parameters(&self) -> Vec<(String, Tensor)> {
        self.layers
            .iter()
            .filter(|l| l.trainable)
            .flat_map(|l| {
                l.layer
                    .named_parameters()
                    .into_iter()
                    .map(|(k, t)| (format!("{}.{}", l.name, k), t))
            })
            .collect()
    }
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Sequential {
    fn forward(&self, x: &Tensor) -> Tensor {
        let mut current = x.clone();
        for entry in &self.layers {
            current = entry.layer.forward(&current);
        }
        current
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.layers
            .iter()
            .flat_map(|l| {
                l.layer
                    .named_parameters()
                    .into_iter()
                    .map(|(k, t)| (format!("{}.{}", l.name, k), t))
            })
            .collect()
    }

    fn state_dict(&self) -> StateDict {
        self.layers
            .iter()
            .flat_map(|l| prefixed(&l.name, l.layer.state_dict()))
            .collect()
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        for entry in &mut self.layers {
            let sub = sub_state(&entry.name, state);
            if !sub.is_empty() {
                entry.layer.load_state_dict(&sub);
            }
        }
    }

    /// Frozen layers stay in inference mode.
    fn train(&mut self, mode: bool) {
        for entry in &mut self.layers {
            entry.layer.train(mode && entry.trainable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::layers::{Activation, ActivationLayer, Dense};
    use crate::tensor::{RawTensor, TensorOps};

    fn mlp() -> Sequential {
        Sequential::builder()
            .add_named("fc1", Box::new(Dense::new(2, 3, Activation::Linear)))
            .add_unnamed(Box::new(ActivationLayer::new(Activation::Relu)))
            .add_named("fc2", Box::new(Dense::new(3, 1, Activation::Linear)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_forward_and_shapes() {
        let model = mlp();
        let y = model.forward(&RawTensor::randn(&[5, 2]));
        assert_eq!(y.shape(), vec![5, 1]);
        assert_eq!(
            model.shape_trace(&[2]).unwrap(),
            vec![vec![3], vec![3], vec![1]]
        );
    }

    #[test]
    fn test_state_dict_prefixes_layer_names() {
        let state = mlp().state_dict();
        let keys: Vec<&str> = state.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["fc1.bias", "fc1.kernel", "fc2.bias", "fc2.kernel"]);
    }

    #[test]
    fn test_trainable_flag_controls_requires_grad() {
        let mut model = mlp();
        model.layers_mut()[0].set_trainable(false);
        let fc1 = model.layers()[0].layer().parameters();
        assert!(fc1.iter().all(|p| !p.borrow().requires_grad));

        let names: Vec<String> = model
            .trainable_parameters()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(names, vec!["fc2.kernel", "fc2.bias"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut model = mlp();
        let dup = LayerEntry::new("fc1", Box::new(Dense::new(1, 1, Activation::Linear)));
        assert!(matches!(
            model.push(dup),
            Err(ClassifierError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_shape_trace_names_failing_layer() {
        let model = mlp();
        let err = model.shape_trace(&[4]).unwrap_err();
        assert!(err.to_string().contains("fc1"));
    }
}
