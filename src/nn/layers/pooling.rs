use crate::error::Result;
use crate::nn::{Layer, Module};
use crate::nn::layers::{LayerConfig, image_dims};
use crate::tensor::{RawTensor, Tensor};

/// Averages each channel over all spatial positions: `(B, H, W, C) -> (B, C)`.
pub struct GlobalAveragePooling2d;

impl GlobalAveragePooling2d {
    /// Shared with squeeze-and-excitation, which keeps the spatial axes as `(B, 1, 1, C)`.
    pub(crate) fn pool(x: &Tensor, keepdims: bool) -> Tensor {
        let x = x.borrow();
        assert_eq!(
            x.shape.len(),
            4,
            "GlobalAveragePooling2D expects input shape (B, H, W, C)"
        );
        let (batch, height, width, channels) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3]);
        let positions = (height * width).max(1) as f32;

        let mut out = vec![0.0; batch * channels];
        for (b, sample) in x.data.chunks(height * width * channels).enumerate() {
            let acc = &mut out[b * channels..(b + 1) * channels];
            for px in sample.chunks(channels) {
                for (a, &v) in acc.iter_mut().zip(px) {
                    *a += v;
                }
            }
            acc.iter_mut().for_each(|a| *a /= positions);
        }

        if keepdims {
            RawTensor::new(out, &[batch, 1, 1, channels], false)
        } else {
            RawTensor::new(out, &[batch, channels], false)
        }
    }
}

impl Module for GlobalAveragePooling2d {
    fn forward(&self, x: &Tensor) -> Tensor {
        Self::pool(x, false)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![]
    }
}

impl Layer for GlobalAveragePooling2d {
    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let (_, _, c) = image_dims("GlobalAveragePooling2D", input)?;
        Ok(vec![c])
    }

    fn config(&self) -> LayerConfig {
        LayerConfig::GlobalAveragePooling2d
    }
}
