use crate::error::{ClassifierError, Result};
use crate::nn::Layer;
use crate::nn::layers::{
    Activation, ActivationLayer, BatchNorm, Conv2d, Conv2dConfig, Dense, GlobalAveragePooling2d,
    MbConv, MbConvConfig, Normalization, Rescaling,
};
use bincode::{Decode, Encode};

/// Serializable description of a layer's architecture (no weights).
///
/// Saved models store one `LayerConfig` per layer; loading rebuilds the
/// layer from it and then restores its weights from the state dict.
#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub enum LayerConfig {
    Rescaling {
        scale: f32,
        offset: f32,
    },
    Normalization {
        channels: usize,
    },
    Conv2d(Conv2dConfig),
    BatchNorm {
        channels: usize,
        eps: f32,
        momentum: f32,
    },
    Activation(Activation),
    MbConv(MbConvConfig),
    GlobalAveragePooling2d,
    Dense {
        in_features: usize,
        units: usize,
        activation: Activation,
    },
}

impl LayerConfig {
    /// Short type name shown in model summaries
    pub fn kind(&self) -> &'static str {
        match self {
            LayerConfig::Rescaling { .. } => "Rescaling",
            LayerConfig::Normalization { .. } => "Normalization",
            LayerConfig::Conv2d(c) if c.groups > 1 && c.groups == c.in_channels => {
                "DepthwiseConv2D"
            }
            LayerConfig::Conv2d(_) => "Conv2D",
            LayerConfig::BatchNorm { .. } => "BatchNormalization",
            LayerConfig::Activation(_) => "Activation",
            LayerConfig::MbConv(_) => "MBConv",
            LayerConfig::GlobalAveragePooling2d => "GlobalAveragePooling2D",
            LayerConfig::Dense { .. } => "Dense",
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ClassifierError::InvalidConfig(msg));
        match self {
            LayerConfig::Rescaling { scale, offset } => {
                if !scale.is_finite() || !offset.is_finite() {
                    return invalid(format!("rescaling by {} + {}", scale, offset));
                }
            }
            LayerConfig::Normalization { channels } | LayerConfig::BatchNorm { channels, .. } => {
                if *channels == 0 {
                    return invalid(format!("{} over zero channels", self.kind()));
                }
            }
            LayerConfig::Conv2d(c) => c.validate()?,
            LayerConfig::MbConv(c) => c.validate()?,
            LayerConfig::Dense {
                in_features, units, ..
            } => {
                if *in_features == 0 || *units == 0 {
                    return invalid(format!("dense layer {} -> {}", in_features, units));
                }
            }
            LayerConfig::Activation(_) | LayerConfig::GlobalAveragePooling2d => {}
        }
        Ok(())
    }

    /// Instantiate a freshly initialized layer with this architecture.
    pub fn build(&self) -> Result<Box<dyn Layer>> {
        self.validate()?;
        let layer: Box<dyn Layer> = match self {
            LayerConfig::Rescaling { scale, offset } => Box::new(Rescaling::new(*scale, *offset)),
            LayerConfig::Normalization { channels } => Box::new(Normalization::new(*channels)),
            LayerConfig::Conv2d(c) => Box::new(Conv2d::from_config(c.clone())),
            LayerConfig::BatchNorm {
                channels,
                eps,
                momentum,
            } => Box::new(BatchNorm::new_with_params(*channels, *eps, *momentum)),
            LayerConfig::Activation(a) => Box::new(ActivationLayer::new(*a)),
            LayerConfig::MbConv(c) => Box::new(MbConv::new(c.clone())),
            LayerConfig::GlobalAveragePooling2d => Box::new(GlobalAveragePooling2d),
            LayerConfig::Dense {
                in_features,
                units,
                activation,
            } => Box::new(Dense::new(*in_features, *units, *activation)),
        };
        Ok(layer)
    }
}
