use crate::error::{ClassifierError, Result};
use crate::io::StateDict;
use crate::nn::layers::{
    BatchNorm, Conv2d, Conv2dConfig, GlobalAveragePooling2d, LayerConfig, image_dims,
};
use crate::nn::{Layer, Module, prefixed, sub_state};
use crate::tensor::{Tensor, TensorOps};
use bincode::{Decode, Encode};

#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct MbConvConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub expand_ratio: usize,
    /// Squeeze-and-excitation width as a fraction of `in_channels`; 0 disables it
    pub se_ratio: f32,
}

impl MbConvConfig {
    pub fn expanded_channels(&self) -> usize {
        self.in_channels * self.expand_ratio
    }

    pub fn se_channels(&self) -> usize {
        ((self.in_channels as f32 * self.se_ratio) as usize).max(1)
    }

    pub fn has_se(&self) -> bool {
        self.se_ratio > 0.0 && self.se_ratio <= 1.0
    }

    /// Identity shortcut when the block keeps resolution and width
    pub fn has_residual(&self) -> bool {
        self.stride == 1 && self.in_channels == self.out_channels
    }

    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0
            || self.out_channels == 0
            || self.kernel_size == 0
            || self.stride == 0
            || self.expand_ratio == 0
            || !(0.0..=1.0).contains(&self.se_ratio)
        {
            return Err(ClassifierError::InvalidConfig(format!(
                "invalid MBConv block {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// Inverted-residual mobile block with squeeze-and-excitation:
///
/// expand (1x1) -> depthwise (kxk, stride) -> SE gate -> project (1x1) [+ input]
///
/// Every convolution except the SE pair is followed by batch norm; swish is
/// applied after expansion, after the depthwise stage and inside SE.
pub struct MbConv {
    config: MbConvConfig,
    expand: Option<(Conv2d, BatchNorm)>,
    depthwise: Conv2d,
    depthwise_bn: BatchNorm,
    se: Option<(Conv2d, Conv2d)>,
    project: Conv2d,
    project_bn: BatchNorm,
}

impl MbConv {
    pub fn new(config: MbConvConfig) -> Self {
        let filters = config.expanded_channels();
        let expand = (config.expand_ratio != 1).then(|| {
            (
                Conv2d::new(config.in_channels, filters, 1, 1),
                BatchNorm::new(filters),
            )
        });
        let se = config.has_se().then(|| {
            let squeezed = config.se_channels();
            (
                Conv2d::from_config(Conv2dConfig::new(filters, squeezed, 1, 1).with_bias(true)),
                Conv2d::from_config(Conv2dConfig::new(squeezed, filters, 1, 1).with_bias(true)),
            )
        });

        MbConv {
            depthwise: Conv2d::from_config(Conv2dConfig::depthwise(
                filters,
                config.kernel_size,
                config.stride,
            )),
            depthwise_bn: BatchNorm::new(filters),
            project: Conv2d::new(filters, config.out_channels, 1, 1),
            project_bn: BatchNorm::new(config.out_channels),
            expand,
            se,
            config,
        }
    }

    /// Sub-layers with the key prefix they use in the state dict
    fn sublayers(&self) -> Vec<(&'static str, &dyn Module)> {
        let mut layers: Vec<(&'static str, &dyn Module)> = Vec::new();
        if let Some((conv, bn)) = &self.expand {
            layers.push(("expand_conv", conv));
            layers.push(("expand_bn", bn));
        }
        layers.push(("dwconv", &self.depthwise));
        layers.push(("bn", &self.depthwise_bn));
        if let Some((reduce, expand)) = &self.se {
            layers.push(("se_reduce", reduce));
            layers.push(("se_expand", expand));
        }
        layers.push(("project_conv", &self.project));
        layers.push(("project_bn", &self.project_bn));
        layers
    }

    fn sublayers_mut(&mut self) -> Vec<(&'static str, &mut dyn Module)> {
        let mut layers: Vec<(&'static str, &mut dyn Module)> = Vec::new();
        if let Some((conv, bn)) = &mut self.expand {
            layers.push(("expand_conv", conv));
            layers.push(("expand_bn", bn));
        }
        layers.push(("dwconv", &mut self.depthwise));
        layers.push(("bn", &mut self.depthwise_bn));
        if let Some((reduce, expand)) = &mut self.se {
            layers.push(("se_reduce", reduce));
            layers.push(("se_expand", expand));
        }
        layers.push(("project_conv", &mut self.project));
        layers.push(("project_bn", &mut self.project_bn));
        layers
    }
}

impl Module for MbConv {
    fn forward(&self, x: &Tensor) -> Tensor {
        let mut h = x.clone();
        if let Some((conv, bn)) = &self.expand {
            h = bn.forward(&conv.forward(&h)).swish();
        }
        h = self
            .depthwise_bn
            .forward(&self.depthwise.forward(&h))
            .swish();

        if let Some((reduce, expand)) = &self.se {
            let squeezed = GlobalAveragePooling2d::pool(&h, true);
            let gate = expand.forward(&reduce.forward(&squeezed).swish()).sigmoid();
            h = h.elem_mul(&gate);
        }

        let out = self.project_bn.forward(&self.project.forward(&h));
        if self.config.has_residual() {
            out.add(x)
        } else {
            out
        }
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.sublayers()
            .into_iter()
            .flat_map(|(prefix, layer)| {
                layer
                    .named_parameters()
                    .into_iter()
                    .map(move |(k, t)| (format!("{}.{}", prefix, k), t))
            })
            .collect()
    }

    fn state_dict(&self) -> StateDict {
        self.sublayers()
            .into_iter()
            .flat_map(|(prefix, layer)| prefixed(prefix, layer.state_dict()))
            .collect()
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        for (prefix, layer) in self.sublayers_mut() {
            let sub = sub_state(prefix, state);
            if !sub.is_empty() {
                layer.load_state_dict(&sub);
            }
        }
    }

    fn train(&mut self, mode: bool) {
        for (_, layer) in self.sublayers_mut() {
            layer.train(mode);
        }
    }
}

impl Layer for MbConv {
    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let (h, w, c) = image_dims("MBConv", input)?;
        if c != self.config.in_channels {
            return Err(ClassifierError::InvalidConfig(format!(
                "MBConv expects {} input channels, got {}",
                self.config.in_channels, c
            )));
        }
        let s = self.config.stride;
        Ok(vec![h.div_ceil(s), w.div_ceil(s), self.config.out_channels])
    }

    fn config(&self) -> LayerConfig {
        LayerConfig::MbConv(self.config.clone())
    }
}
