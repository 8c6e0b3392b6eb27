use crate::error::{ClassifierError, Result};
use crate::nn::{Layer, Module};
use crate::nn::layers::{LayerConfig, image_dims};
use crate::tensor::{RawTensor, Tensor};
use bincode::{Decode, Encode};

#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Padding {
    /// Output spatial size is `ceil(input / stride)`; extra padding goes bottom/right.
    Same,
    /// No padding
    Valid,
}

impl Padding {
    /// Output length and leading pad along one spatial axis
    fn resolve(self, input: usize, kernel: usize, stride: usize) -> Option<(usize, usize)> {
        match self {
            Padding::Same => {
                let out = input.div_ceil(stride);
                let total = ((out.saturating_sub(1)) * stride + kernel).saturating_sub(input);
                Some((out, total / 2))
            }
            Padding::Valid => {
                if input < kernel {
                    None
                } else {
                    Some(((input - kernel) / stride + 1, 0))
                }
            }
        }
    }
}

#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct Conv2dConfig {
    pub in_channels: usize,
    pub filters: usize,
    pub kernel_size: (usize, usize),
    pub strides: (usize, usize),
    pub padding: Padding,
    /// `groups == in_channels == filters` is a depthwise convolution
    pub groups: usize,
    pub use_bias: bool,
}

impl Conv2dConfig {
    pub fn new(in_channels: usize, filters: usize, kernel: usize, stride: usize) -> Self {
        Conv2dConfig {
            in_channels,
            filters,
            kernel_size: (kernel, kernel),
            strides: (stride, stride),
            padding: Padding::Same,
            groups: 1,
            use_bias: false,
        }
    }

    pub fn depthwise(channels: usize, kernel: usize, stride: usize) -> Self {
        Conv2dConfig {
            groups: channels,
            ..Self::new(channels, channels, kernel, stride)
        }
    }

    #[must_use]
    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let (kh, kw) = self.kernel_size;
        let (sh, sw) = self.strides;
        if kh == 0 || kw == 0 || sh == 0 || sw == 0 {
            return Err(ClassifierError::InvalidConfig(format!(
                "convolution kernel {:?} / strides {:?} must be positive",
                self.kernel_size, self.strides
            )));
        }
        if self.in_channels == 0
            || self.filters == 0
            || self.groups == 0
            || self.in_channels % self.groups != 0
            || self.filters % self.groups != 0
        {
            return Err(ClassifierError::InvalidConfig(format!(
                "convolution {} -> {} channels cannot be split into {} groups",
                self.in_channels, self.filters, self.groups
            )));
        }
        Ok(())
    }
}

/// 2D convolution over channels-last input `(B, H, W, C)`.
///
/// Kernel layout is `[kernel_h, kernel_w, in_channels / groups, filters]`.
pub struct Conv2d {
    config: Conv2dConfig,
    kernel: Tensor,
    bias: Option<Tensor>,
}

impl Conv2d {
    /// Square kernel, same padding, no bias
    pub fn new(in_ch: usize, filters: usize, kernel: usize, stride: usize) -> Self {
        Self::from_config(Conv2dConfig::new(in_ch, filters, kernel, stride))
    }

    /// Kernel initialized from N(0, 2 / fan_out), the EfficientNet conv initializer.
    ///
    /// # Panics
    /// Panics on an invalid config; use [`Conv2dConfig::validate`] first for untrusted input.
    pub fn from_config(config: Conv2dConfig) -> Self {
        if let Err(e) = config.validate() {
            panic!("{}", e);
        }
        let (kh, kw) = config.kernel_size;
        let in_per_group = config.in_channels / config.groups;
        let fan_out = kh * kw * config.filters / config.groups;
        let std = (2.0 / fan_out as f32).sqrt();

        let kernel = RawTensor::normal(&[kh, kw, in_per_group, config.filters], std);
        kernel.borrow_mut().requires_grad = true;
        let bias = if config.use_bias {
            let b = RawTensor::zeros(&[config.filters]);
            b.borrow_mut().requires_grad = true;
            Some(b)
        } else {
            None
        };
        Conv2d {
            config,
            kernel,
            bias,
        }
    }

    fn conv_forward(&self, x: &Tensor) -> Tensor {
        let x = x.borrow();
        assert_eq!(x.shape.len(), 4, "Conv2d expects input shape (B, H, W, C)");
        let (batch, height, width, channels) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3]);
        let c = &self.config;
        assert_eq!(channels, c.in_channels, "Conv2d channel mismatch");

        let (kh, kw) = c.kernel_size;
        let (sh, sw) = c.strides;
        let (h_out, pad_top) = c
            .padding
            .resolve(height, kh, sh)
            .unwrap_or_else(|| panic!("Kernel larger than input"));
        let (w_out, pad_left) = c
            .padding
            .resolve(width, kw, sw)
            .unwrap_or_else(|| panic!("Kernel larger than input"));

        let in_per_group = c.in_channels / c.groups;
        let out_per_group = c.filters / c.groups;
        let kernel = self.kernel.borrow();
        let w = &kernel.data;

        let mut out = vec![0.0; batch * h_out * w_out * c.filters];
        if let Some(bias) = &self.bias {
            let bias = bias.borrow();
            for px in out.chunks_mut(c.filters) {
                px.copy_from_slice(&bias.data);
            }
        }

        for b in 0..batch {
            for oh in 0..h_out {
                for ow in 0..w_out {
                    let out_base = ((b * h_out + oh) * w_out + ow) * c.filters;
                    for ky in 0..kh {
                        let Some(ih) = (oh * sh + ky).checked_sub(pad_top) else {
                            continue;
                        };
                        if ih >= height {
                            continue;
                        }
                        for kx in 0..kw {
                            let Some(iw) = (ow * sw + kx).checked_sub(pad_left) else {
                                continue;
                            };
                            if iw >= width {
                                continue;
                            }
                            let in_base = ((b * height + ih) * width + iw) * channels;
                            let k_base = (ky * kw + kx) * in_per_group * c.filters;
                            for g in 0..c.groups {
                                for ci in 0..in_per_group {
                                    let xv = x.data[in_base + g * in_per_group + ci];
                                    if xv == 0.0 {
                                        continue;
                                    }
                                    let k_row = k_base + ci * c.filters + g * out_per_group;
                                    let out_row = out_base + g * out_per_group;
                                    for co in 0..out_per_group {
                                        out[out_row + co] += xv * w[k_row + co];
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        RawTensor::new(out, &[batch, h_out, w_out, c.filters], false)
    }
}

impl Module for Conv2d {
    fn forward(&self, x: &Tensor) -> Tensor {
        self.conv_forward(x)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut p = vec![("kernel".to_string(), self.kernel.clone())];
        if let Some(ref b) = self.bias {
            p.push(("bias".to_string(), b.clone()));
        }
        p
    }
}

impl Layer for Conv2d {
    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let (h, w, ch) = image_dims("Conv2D", input)?;
        let c = &self.config;
        if ch != c.in_channels {
            return Err(ClassifierError::InvalidConfig(format!(
                "Conv2D expects {} input channels, got {}",
                c.in_channels, ch
            )));
        }
        let too_small = || {
            ClassifierError::InvalidConfig(format!(
                "input {}x{} is smaller than kernel {:?}",
                h, w, c.kernel_size
            ))
        };
        let (h_out, _) = c
            .padding
            .resolve(h, c.kernel_size.0, c.strides.0)
            .ok_or_else(too_small)?;
        let (w_out, _) = c
            .padding
            .resolve(w, c.kernel_size.1, c.strides.1)
            .ok_or_else(too_small)?;
        Ok(vec![h_out, w_out, c.filters])
    }

    fn config(&self) -> LayerConfig {
        LayerConfig::Conv2d(self.config.clone())
    }
}

#[cfg(test)]
mod conv2d_tests {
    use super::*;
    use crate::tensor::TensorOps;

    fn set_kernel(conv: &Conv2d, values: Vec<f32>) {
        let mut k = conv.kernel.borrow_mut();
        assert_eq!(k.data.len(), values.len());
        k.data = values;
    }

    #[test]
    fn test_conv2d_forward_shape() {
        // Input: (1, 32, 32, 3), 16 filters, 3x3, stride 1, same padding
        let conv = Conv2d::new(3, 16, 3, 1);
        let x = RawTensor::randn(&[1, 32, 32, 3]);
        assert_eq!(conv.forward(&x).shape(), vec![1, 32, 32, 16]);
        assert_eq!(conv.output_shape(&[32, 32, 3]).unwrap(), vec![32, 32, 16]);
    }

    #[test]
    fn test_conv2d_strided_same_padding() {
        let conv = Conv2d::new(3, 4, 3, 2);
        assert_eq!(conv.output_shape(&[225, 225, 3]).unwrap(), vec![113, 113, 4]);
        let x = RawTensor::randn(&[2, 7, 7, 3]);
        assert_eq!(conv.forward(&x).shape(), vec![2, 4, 4, 4]);
    }

    #[test]
    fn test_conv2d_valid_padding_rejects_small_input() {
        let mut config = Conv2dConfig::new(1, 1, 5, 1);
        config.padding = Padding::Valid;
        let conv = Conv2d::from_config(config);
        assert_eq!(conv.output_shape(&[5, 5, 1]).unwrap(), vec![1, 1, 1]);
        assert!(conv.output_shape(&[4, 4, 1]).is_err());
    }

    #[test]
    fn test_conv2d_identity_kernel() {
        // 1x1 conv with identity weights copies channels through
        let conv = Conv2d::new(2, 2, 1, 1);
        set_kernel(&conv, vec![1.0, 0.0, 0.0, 1.0]);
        let x = RawTensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]);
        assert_eq!(conv.forward(&x).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_conv2d_same_padding_sums_neighbourhood() {
        // 3x3 all-ones kernel over a 3x3 ones image: corners see 4, edges 6, centre 9
        let conv = Conv2d::new(1, 1, 3, 1);
        set_kernel(&conv, vec![1.0; 9]);
        let x = RawTensor::ones(&[1, 3, 3, 1]);
        assert_eq!(
            conv.forward(&x).to_vec(),
            vec![4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]
        );
    }

    #[test]
    fn test_depthwise_keeps_channels_separate() {
        let conv = Conv2d::from_config(Conv2dConfig::depthwise(2, 1, 1));
        // kernel [1, 1, 1, 2]: channel 0 scaled by 2, channel 1 by 3
        set_kernel(&conv, vec![2.0, 3.0]);
        let x = RawTensor::from_vec(vec![1.0, 1.0, 5.0, 5.0], &[1, 1, 2, 2]);
        assert_eq!(conv.forward(&x).to_vec(), vec![2.0, 3.0, 10.0, 15.0]);
    }

    #[test]
    fn test_conv2d_bias_is_added() {
        let conv = Conv2d::from_config(Conv2dConfig::new(1, 1, 1, 1).with_bias(true));
        set_kernel(&conv, vec![1.0]);
        conv.bias.as_ref().unwrap().borrow_mut().data = vec![0.5];
        let x = RawTensor::ones(&[1, 2, 2, 1]);
        assert_eq!(conv.forward(&x).to_vec(), vec![1.5; 4]);
        assert_eq!(conv.parameters().len(), 2);
    }

    #[test]
    fn test_channel_mismatch_is_invalid_config() {
        let conv = Conv2d::new(3, 8, 3, 1);
        assert!(matches!(
            conv.output_shape(&[32, 32, 1]),
            Err(ClassifierError::InvalidConfig(_))
        ));
    }

    #[test]
    #[should_panic]
    fn test_zero_kernel_panics() {
        let _ = Conv2d::new(3, 16, 0, 1);
    }
}
