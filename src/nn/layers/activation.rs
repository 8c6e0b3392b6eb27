use crate::error::Result;
use crate::nn::{Layer, Module};
use crate::nn::layers::LayerConfig;
use crate::tensor::{Tensor, TensorOps};
use bincode::{Decode, Encode};

#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
    /// x * sigmoid(x)
    Swish,
    /// Normalized over the last axis
    Softmax,
}

impl Activation {
    pub fn apply(self, x: &Tensor) -> Tensor {
        match self {
            Activation::Linear => x.clone(),
            Activation::Relu => x.relu(),
            Activation::Sigmoid => x.sigmoid(),
            Activation::Swish => x.swish(),
            Activation::Softmax => x.softmax(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Activation::Linear => "linear",
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Swish => "swish",
            Activation::Softmax => "softmax",
        }
    }
}

/// Stand-alone activation layer
pub struct ActivationLayer {
    activation: Activation,
}

impl ActivationLayer {
    pub fn new(activation: Activation) -> Self {
        ActivationLayer { activation }
    }
}

impl Module for ActivationLayer {
    fn forward(&self, x: &Tensor) -> Tensor {
        self.activation.apply(x)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![] // No learnable params
    }
}

impl Layer for ActivationLayer {
    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        Ok(input.to_vec())
    }

    fn config(&self) -> LayerConfig {
        LayerConfig::Activation(self.activation)
    }
}
