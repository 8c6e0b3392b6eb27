use crate::error::{ClassifierError, Result};
use crate::nn::{Layer, Module};
use crate::nn::layers::{Activation, LayerConfig};
use crate::tensor::{RawTensor, Tensor, TensorOps};

/// Fully-connected (dense) layer with a fused activation
///
/// Computes: y = activation(xW + b)
/// where x is (batch, in_features), W is (in_features, units), b is (units)
pub struct Dense {
    kernel: Tensor,
    bias: Tensor,
    activation: Activation,
}

impl Dense {
    /// Glorot-uniform kernel, zero bias
    pub fn new(in_features: usize, units: usize, activation: Activation) -> Self {
        let limit = (6.0 / (in_features + units) as f32).sqrt();
        let kernel = RawTensor::uniform(&[in_features, units], limit);
        kernel.borrow_mut().requires_grad = true;
        let bias = RawTensor::zeros(&[units]);
        bias.borrow_mut().requires_grad = true;
        Dense {
            kernel,
            bias,
            activation,
        }
    }

    fn dims(&self) -> (usize, usize) {
        let k = self.kernel.borrow();
        (k.shape[0], k.shape[1])
    }
}

impl Module for Dense {
    fn forward(&self, x: &Tensor) -> Tensor {
        let out = x.matmul(&self.kernel).add(&self.bias);
        self.activation.apply(&out)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![
            ("kernel".to_string(), self.kernel.clone()),
            ("bias".to_string(), self.bias.clone()),
        ]
    }
}

impl Layer for Dense {
    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let (in_features, units) = self.dims();
        if input != [in_features] {
            return Err(ClassifierError::InvalidConfig(format!(
                "Dense expects a ({},) feature vector, got {:?}",
                in_features, input
            )));
        }
        Ok(vec![units])
    }

    fn config(&self) -> LayerConfig {
        let (in_features, units) = self.dims();
        LayerConfig::Dense {
            in_features,
            units,
            activation: self.activation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_forward() {
        let layer = Dense::new(2, 2, Activation::Linear);
        layer.kernel.borrow_mut().data = vec![1.0, 2.0, 3.0, 4.0];
        layer.bias.borrow_mut().data = vec![0.5, -0.5];
        let x = RawTensor::from_vec(vec![1.0, 1.0], &[1, 2]);
        assert_eq!(layer.forward(&x).to_vec(), vec![4.5, 5.5]);
    }

    #[test]
    fn test_softmax_dense_outputs_distribution() {
        let layer = Dense::new(8, 3, Activation::Softmax);
        let x = RawTensor::randn(&[4, 8]);
        let y = layer.forward(&x);
        assert_eq!(y.shape(), vec![4, 3]);
        for row in y.to_vec().chunks(3) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }

    #[test]
    fn test_output_shape_checks_features() {
        let layer = Dense::new(1280, 3, Activation::Softmax);
        assert_eq!(layer.output_shape(&[1280]).unwrap(), vec![3]);
        assert!(layer.output_shape(&[7, 7, 1280]).is_err());
    }

    #[test]
    fn test_parameters_require_grad() {
        let layer = Dense::new(3, 2, Activation::Linear);
        let params = layer.parameters();
        assert_eq!(params.len(), 2);
        assert!(params.iter().all(|p| p.borrow().requires_grad));
    }
}
