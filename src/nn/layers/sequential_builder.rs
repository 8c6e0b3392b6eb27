use super::sequential::LayerEntry;
use crate::error::Result;
use crate::nn::{Layer, Sequential};

/// Builder for constructing Sequential stacks with named or unnamed layers
///
/// # Examples
///
/// ```
/// use cnn_classifier::nn::{Activation, ActivationLayer, Dense, Sequential};
///
/// let model = Sequential::builder()
///     .add_named("hidden", Box::new(Dense::new(784, 128, Activation::Linear)))
///     .add_unnamed(Box::new(ActivationLayer::new(Activation::Relu)))
///     .add_named("predictions", Box::new(Dense::new(128, 10, Activation::Softmax)))
///     .build()
///     .unwrap();
/// assert_eq!(model.layer_names(), vec!["hidden", "activation_1", "predictions"]);
/// ```
pub struct SequentialBuilder {
    entries: Vec<(Option<String>, Box<dyn Layer>)>,
}

impl SequentialBuilder {
    /// Create a new empty builder
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add an unnamed layer to the sequence
    ///
    /// The layer is named after its kind and position, e.g. `dense_2`
    #[must_use]
    pub fn add_unnamed(mut self, layer: Box<dyn Layer>) -> Self {
        self.entries.push((None, layer));
        self
    }

    /// Add a named layer to the sequence
    ///
    /// The layer will use the provided name in the state dict.
    /// Empty strings are treated as unnamed.
    #[must_use]
    pub fn add_named(mut self, name: impl Into<String>, layer: Box<dyn Layer>) -> Self {
        let name = name.into();
        self.entries.push(((!name.is_empty()).then_some(name), layer));
        self
    }

    /// Build the Sequential stack from the accumulated layers
    ///
    /// Fails with `InvalidConfig` if two layers end up with the same name.
    pub fn build(self) -> Result<Sequential> {
        let mut model = Sequential::new();
        for (index, (name, layer)) in self.entries.into_iter().enumerate() {
            let name = name.unwrap_or_else(|| {
                format!("{}_{}", layer.config().kind().to_lowercase(), index)
            });
            model.push(LayerEntry::new(name, layer))?;
        }
        Ok(model)
    }
}

impl Default for SequentialBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClassifierError;
    use crate::nn::layers::{Activation, ActivationLayer, Dense};

    #[test]
    fn test_builder_empty() {
        let model = SequentialBuilder::new().build().unwrap();
        assert_eq!(model.len(), 0);
    }

    #[test]
    fn test_builder_unnamed() {
        let model = SequentialBuilder::new()
            .add_unnamed(Box::new(Dense::new(2, 3, Activation::Linear)))
            .add_unnamed(Box::new(ActivationLayer::new(Activation::Relu)))
            .build()
            .unwrap();

        assert_eq!(model.layer_names(), vec!["dense_0", "activation_1"]);
    }

    #[test]
    fn test_builder_mixed() {
        let model = SequentialBuilder::new()
            .add_named("fc1", Box::new(Dense::new(2, 3, Activation::Linear)))
            .add_unnamed(Box::new(ActivationLayer::new(Activation::Relu)))
            .add_named("fc2", Box::new(Dense::new(3, 1, Activation::Linear)))
            .build()
            .unwrap();

        assert_eq!(model.len(), 3);
        assert_eq!(model.layer_names(), vec!["fc1", "activation_1", "fc2"]);
    }

    #[test]
    fn test_builder_empty_string_name() {
        let model = SequentialBuilder::new()
            .add_named("", Box::new(Dense::new(2, 3, Activation::Linear)))
            .build()
            .unwrap();

        // Empty string treated as unnamed
        assert_eq!(model.layer_names(), vec!["dense_0"]);
    }

    #[test]
    fn test_builder_rejects_duplicates() {
        let result = SequentialBuilder::new()
            .add_named("fc", Box::new(Dense::new(2, 3, Activation::Linear)))
            .add_named("fc", Box::new(Dense::new(3, 1, Activation::Linear)))
            .build();
        assert!(matches!(result, Err(ClassifierError::InvalidConfig(_))));
    }
}
