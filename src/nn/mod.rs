use crate::error::Result;
use crate::io::{StateDict, TensorData};
use crate::tensor::Tensor;

pub mod layers;
pub mod loss;
pub mod network;
pub mod optim;

pub use layers::{
    Activation, ActivationLayer, BatchNorm, Conv2d, Conv2dConfig, Dense, GlobalAveragePooling2d,
    LayerConfig, LayerEntry, MbConv, MbConvConfig, Normalization, Padding, Rescaling, Sequential,
    SequentialBuilder,
};
pub use loss::{Loss, Metric};
pub use network::Network;
pub use optim::{Adam, AdamConfig, AdamState};

pub trait Module {
    fn forward(&self, x: &Tensor) -> Tensor;

    /// Learnable parameters keyed by their state-dict names
    fn named_parameters(&self) -> Vec<(String, Tensor)>;

    fn parameters(&self) -> Vec<Tensor> {
        self.named_parameters().into_iter().map(|(_, t)| t).collect()
    }

    /// Parameters plus non-learnable buffers (e.g. batch-norm moving statistics)
    fn state_dict(&self) -> StateDict {
        self.named_parameters()
            .into_iter()
            .map(|(k, t)| (k, TensorData::from_tensor(&t)))
            .collect()
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        for (key, param) in self.named_parameters() {
            if let Some(t) = state.get(&key) {
                t.copy_into(&param);
            }
        }
    }

    fn zero_grad(&mut self) {
        for p in self.parameters() {
            p.borrow_mut().grad = None;
        }
    }

    /// Switch between training and inference behaviour.
    /// Only batch normalization currently cares.
    fn train(&mut self, _mode: bool) {}
    fn eval(&mut self) {
        self.train(false);
    }
}

/// A single entry of a network: a module that can report its shape and be
/// rebuilt from a [`LayerConfig`].
///
/// Shapes passed to [`Layer::output_shape`] exclude the batch axis, so an
/// image layer sees `[height, width, channels]`.
pub trait Layer: Module {
    /// Shape produced for a single sample of shape `input`.
    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>>;

    /// Architecture record used to persist and rebuild the layer.
    fn config(&self) -> LayerConfig;
}

/// Prefix every key of a sub-module's state dict with `prefix.`
pub(crate) fn prefixed(prefix: &str, state: StateDict) -> StateDict {
    state
        .into_iter()
        .map(|(k, v)| (format!("{}.{}", prefix, k), v))
        .collect()
}

/// Keys under `prefix.`, with the prefix removed
pub(crate) fn sub_state(prefix: &str, state: &StateDict) -> StateDict {
    let prefix = format!("{}.", prefix);
    state
        .iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(&prefix)
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest.to_string(), v.clone()))
        })
        .collect()
}
