use crate::error::{ClassifierError, Result};
use crate::io::{StateDict, TensorData};
use crate::nn::{Layer, Module};
use crate::nn::layers::LayerConfig;
use crate::tensor::{RawTensor, Tensor};

/// Batch normalization over the last (channel) axis.
///
/// In inference mode the moving statistics are used. In training mode the
/// batch statistics are used and folded into the moving statistics with
/// `moving = moving * momentum + batch * (1 - momentum)`.
pub struct BatchNorm {
    channels: usize,
    eps: f32,
    momentum: f32,
    training: bool,
    // Parameters (Learnable)
    gamma: Tensor,
    beta: Tensor,
    // Buffers (Non-learnable)
    moving_mean: Tensor,
    moving_variance: Tensor,
}

impl BatchNorm {
    pub fn new(channels: usize) -> Self {
        Self::new_with_params(channels, 1e-3, 0.99)
    }

    pub fn new_with_params(channels: usize, eps: f32, momentum: f32) -> Self {
        let gamma = RawTensor::ones(&[channels]);
        gamma.borrow_mut().requires_grad = true;

        let beta = RawTensor::zeros(&[channels]);
        beta.borrow_mut().requires_grad = true;

        BatchNorm {
            channels,
            eps,
            momentum,
            training: false,
            gamma,
            beta,
            moving_mean: RawTensor::zeros(&[channels]),
            moving_variance: RawTensor::ones(&[channels]),
        }
    }

    fn batch_statistics(&self, data: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let c = self.channels;
        let n = (data.len() / c).max(1) as f32;
        let mut mean = vec![0.0; c];
        for px in data.chunks(c) {
            for (m, &v) in mean.iter_mut().zip(px) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0; c];
        for px in data.chunks(c) {
            for ((s, &v), &m) in var.iter_mut().zip(px).zip(&mean) {
                *s += (v - m) * (v - m);
            }
        }
        var.iter_mut().for_each(|s| *s /= n);
        (mean, var)
    }
}

impl Module for BatchNorm {
    fn forward(&self, x: &Tensor) -> Tensor {
        let x = x.borrow();
        assert_eq!(
            x.shape.last().copied(),
            Some(self.channels),
            "BatchNorm channel mismatch"
        );

        let (mean, var) = if self.training {
            let (batch_mean, batch_var) = self.batch_statistics(&x.data);
            let mut mm = self.moving_mean.borrow_mut();
            let mut mv = self.moving_variance.borrow_mut();
            let m = self.momentum;
            for i in 0..self.channels {
                mm.data[i] = mm.data[i] * m + batch_mean[i] * (1.0 - m);
                mv.data[i] = mv.data[i] * m + batch_var[i] * (1.0 - m);
            }
            (batch_mean, batch_var)
        } else {
            (
                self.moving_mean.borrow().data.clone(),
                self.moving_variance.borrow().data.clone(),
            )
        };

        // Fold normalization and affine transform into one scale/shift per channel
        let gamma = self.gamma.borrow();
        let beta = self.beta.borrow();
        let scale: Vec<f32> = (0..self.channels)
            .map(|i| gamma.data[i] / (var[i] + self.eps).sqrt())
            .collect();
        let shift: Vec<f32> = (0..self.channels)
            .map(|i| beta.data[i] - mean[i] * scale[i])
            .collect();

        let mut out = x.data.clone();
        for px in out.chunks_mut(self.channels) {
            for ((v, &s), &t) in px.iter_mut().zip(&scale).zip(&shift) {
                *v = *v * s + t;
            }
        }
        RawTensor::new(out, &x.shape, false)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![
            ("gamma".to_string(), self.gamma.clone()),
            ("beta".to_string(), self.beta.clone()),
        ]
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        state.insert("gamma".to_string(), TensorData::from_tensor(&self.gamma));
        state.insert("beta".to_string(), TensorData::from_tensor(&self.beta));
        state.insert(
            "moving_mean".to_string(),
            TensorData::from_tensor(&self.moving_mean),
        );
        state.insert(
            "moving_variance".to_string(),
            TensorData::from_tensor(&self.moving_variance),
        );
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        let slots = [
            ("gamma", &self.gamma),
            ("beta", &self.beta),
            ("moving_mean", &self.moving_mean),
            ("moving_variance", &self.moving_variance),
        ];
        for (key, tensor) in slots {
            if let Some(t) = state.get(key) {
                t.copy_into(tensor);
            }
        }
    }

    fn train(&mut self, mode: bool) {
        self.training = mode;
    }
}

impl Layer for BatchNorm {
    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        if input.last().copied() != Some(self.channels) {
            return Err(ClassifierError::InvalidConfig(format!(
                "BatchNormalization over {} channels got input {:?}",
                self.channels, input
            )));
        }
        Ok(input.to_vec())
    }

    fn config(&self) -> LayerConfig {
        LayerConfig::BatchNorm {
            channels: self.channels,
            eps: self.eps,
            momentum: self.momentum,
        }
    }
}
