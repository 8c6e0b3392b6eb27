//! Named backbones the assembly stage can start from.

pub mod efficientnet;

use crate::error::{ClassifierError, Result};
use crate::io::pretrained::{
    apply_pretrained, load_weight_file, resolve_weight_file, weight_file_stem,
};
use crate::model::Model;
use crate::nn::Network;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Smallest spatial size the five stride-2 stages accept
pub const MIN_INPUT_SIZE: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Architecture {
    #[default]
    EfficientNetB0,
    EfficientNetB1,
    EfficientNetB2,
    EfficientNetB3,
}

impl Architecture {
    pub const ALL: [Architecture; 4] = [
        Architecture::EfficientNetB0,
        Architecture::EfficientNetB1,
        Architecture::EfficientNetB2,
        Architecture::EfficientNetB3,
    ];

    /// Lower-case name used for models and weight files, e.g. `efficientnetb0`
    pub fn slug(self) -> &'static str {
        match self {
            Architecture::EfficientNetB0 => "efficientnetb0",
            Architecture::EfficientNetB1 => "efficientnetb1",
            Architecture::EfficientNetB2 => "efficientnetb2",
            Architecture::EfficientNetB3 => "efficientnetb3",
        }
    }

    /// (width, depth) scaling coefficients
    pub fn coefficients(self) -> (f32, f32) {
        match self {
            Architecture::EfficientNetB0 => (1.0, 1.0),
            Architecture::EfficientNetB1 => (1.0, 1.1),
            Architecture::EfficientNetB2 => (1.1, 1.2),
            Architecture::EfficientNetB3 => (1.2, 1.4),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Architecture::EfficientNetB0 => "EfficientNetB0",
            Architecture::EfficientNetB1 => "EfficientNetB1",
            Architecture::EfficientNetB2 => "EfficientNetB2",
            Architecture::EfficientNetB3 => "EfficientNetB3",
        };
        f.write_str(name)
    }
}

impl FromStr for Architecture {
    type Err = ClassifierError;

    /// Case-insensitive; accepts `EfficientNetB0` as well as `efficientnetb0`.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Architecture::ALL
            .into_iter()
            .find(|a| a.slug() == wanted)
            .ok_or_else(|| {
                ClassifierError::InvalidConfig(format!("unknown architecture '{}'", s))
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WeightSet {
    /// Pretrained on ImageNet, loaded from the weights directory
    #[default]
    ImageNet,
    /// Random initialization
    Random,
}

impl WeightSet {
    pub fn name(self) -> &'static str {
        match self {
            WeightSet::ImageNet => "imagenet",
            WeightSet::Random => "none",
        }
    }
}

impl fmt::Display for WeightSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WeightSet {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "imagenet" => Ok(WeightSet::ImageNet),
            "none" | "random" => Ok(WeightSet::Random),
            _ => Err(ClassifierError::InvalidConfig(format!(
                "unknown weight set '{}' (expected imagenet or none)",
                s
            ))),
        }
    }
}

/// A backbone without its classification top.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackboneRequest {
    pub architecture: Architecture,
    /// (height, width, channels)
    pub input_shape: [usize; 3],
    pub weights: WeightSet,
}

impl BackboneRequest {
    pub fn validate(&self) -> Result<()> {
        let [h, w, c] = self.input_shape;
        if h < MIN_INPUT_SIZE || w < MIN_INPUT_SIZE {
            return Err(ClassifierError::InvalidConfig(format!(
                "{} needs inputs of at least {}x{}, got {}x{}",
                self.architecture, MIN_INPUT_SIZE, MIN_INPUT_SIZE, h, w
            )));
        }
        if c == 0 {
            return Err(ClassifierError::InvalidConfig(
                "input must have at least one channel".to_string(),
            ));
        }
        if self.weights == WeightSet::ImageNet && c != 3 {
            return Err(ClassifierError::InvalidConfig(format!(
                "{} weights need 3 input channels, got {}",
                self.weights, c
            )));
        }
        Ok(())
    }
}

/// Builds backbones and fills them with weight sets from a local directory.
#[derive(Clone, Debug)]
pub struct ModelCatalog {
    weights_dir: PathBuf,
}

impl ModelCatalog {
    pub fn new(weights_dir: impl Into<PathBuf>) -> Self {
        ModelCatalog {
            weights_dir: weights_dir.into(),
        }
    }

    pub fn weights_dir(&self) -> &Path {
        &self.weights_dir
    }

    /// Weight file that [`ModelCatalog::fetch`] would read for `request`
    pub fn weight_file(&self, request: &BackboneRequest) -> Result<PathBuf> {
        let stem = weight_file_stem(request.architecture.slug(), request.weights.name());
        resolve_weight_file(&self.weights_dir, &stem)
    }

    pub fn fetch(&self, request: &BackboneRequest) -> Result<Model> {
        request.validate()?;
        let mut model = efficientnet::build(request.architecture, request.input_shape)?;
        debug!(
            "Built {} with {} layers, output {:?}",
            request.architecture,
            model.layers().len(),
            model.output_shape()
        );

        if request.weights == WeightSet::ImageNet {
            let path = self.weight_file(request)?;
            info!("Loading {} weights from {}", request.weights, path.display());
            let state = load_weight_file(&path)?;
            apply_pretrained(&mut model, state, request.architecture.slug())?;
        }
        Ok(model)
    }
}
