//! Input preprocessing layers baked into the backbone graph.

use crate::error::{ClassifierError, Result};
use crate::io::{StateDict, TensorData};
use crate::nn::{Layer, Module};
use crate::nn::layers::LayerConfig;
use crate::tensor::{RawTensor, Tensor};

/// `y = x * scale + offset`
pub struct Rescaling {
    scale: f32,
    offset: f32,
}

impl Rescaling {
    pub fn new(scale: f32, offset: f32) -> Self {
        Rescaling { scale, offset }
    }
}

impl Module for Rescaling {
    fn forward(&self, x: &Tensor) -> Tensor {
        let (scale, offset) = (self.scale, self.offset);
        RawTensor::map(x, |v| v * scale + offset)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![]
    }
}

impl Layer for Rescaling {
    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        Ok(input.to_vec())
    }

    fn config(&self) -> LayerConfig {
        LayerConfig::Rescaling {
            scale: self.scale,
            offset: self.offset,
        }
    }
}

/// Per-channel standardization with stored (non-learnable) mean and variance.
///
/// Defaults to the identity; pretrained weight sets supply the dataset statistics.
pub struct Normalization {
    channels: usize,
    mean: Tensor,
    variance: Tensor,
}

impl Normalization {
    pub fn new(channels: usize) -> Self {
        Normalization {
            channels,
            mean: RawTensor::zeros(&[channels]),
            variance: RawTensor::ones(&[channels]),
        }
    }
}

impl Module for Normalization {
    fn forward(&self, x: &Tensor) -> Tensor {
        let mean = self.mean.borrow();
        let variance = self.variance.borrow();
        let inv_std: Vec<f32> = variance
            .data
            .iter()
            .map(|v| 1.0 / v.sqrt().max(1e-7))
            .collect();

        let x = x.borrow();
        let mut out = x.data.clone();
        for px in out.chunks_mut(self.channels) {
            for ((v, m), s) in px.iter_mut().zip(&mean.data).zip(&inv_std) {
                *v = (*v - m) * s;
            }
        }
        RawTensor::new(out, &x.shape, false)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![]
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        state.insert("mean".to_string(), TensorData::from_tensor(&self.mean));
        state.insert(
            "variance".to_string(),
            TensorData::from_tensor(&self.variance),
        );
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        if let Some(t) = state.get("mean") {
            t.copy_into(&self.mean);
        }
        if let Some(t) = state.get("variance") {
            t.copy_into(&self.variance);
        }
    }
}

impl Layer for Normalization {
    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        if input.last().copied() != Some(self.channels) {
            return Err(ClassifierError::InvalidConfig(format!(
                "Normalization over {} channels got input {:?}",
                self.channels, input
            )));
        }
        Ok(input.to_vec())
    }

    fn config(&self) -> LayerConfig {
        LayerConfig::Normalization {
            channels: self.channels,
        }
    }
}
