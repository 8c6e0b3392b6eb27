//! YAML configuration for the base-model stage.
//!
//! Two files feed the stage: `config/config.yaml` holds artifact locations,
//! `params.yaml` holds the model hyper-parameters. [`ConfigurationManager`]
//! reads both, creates the artifact directories and hands out a validated
//! [`PrepareBaseModelConfig`].

use crate::catalog::{Architecture, BackboneRequest, WeightSet};
use crate::error::{ClassifierError, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_FILE_PATH: &str = "config/config.yaml";
pub const PARAMS_FILE_PATH: &str = "params.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub artifacts_root: PathBuf,
    pub prepare_base_model: PrepareBaseModelSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrepareBaseModelSection {
    pub root_dir: PathBuf,
    pub base_model_path: PathBuf,
    pub updated_base_model_path: PathBuf,
    #[serde(default)]
    pub weights_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Params {
    #[serde(default)]
    pub architecture: Option<String>,
    pub image_size: Vec<usize>,
    pub classes: usize,
    pub learning_rate: f32,
    #[serde(default)]
    pub weights: Option<String>,
}

/// Everything the base-model stage needs, already validated.
#[derive(Debug, Clone, PartialEq)]
pub struct PrepareBaseModelConfig {
    pub root_dir: PathBuf,
    pub base_model_path: PathBuf,
    pub updated_base_model_path: PathBuf,
    pub weights_dir: PathBuf,
    pub params_architecture: Architecture,
    /// (height, width, channels)
    pub params_image_size: [usize; 3],
    pub params_classes: usize,
    pub params_learning_rate: f32,
    pub params_weights: WeightSet,
}

impl PrepareBaseModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_model_path == self.updated_base_model_path {
            return Err(ClassifierError::InvalidConfig(format!(
                "base and updated model paths must differ, both are {}",
                self.base_model_path.display()
            )));
        }
        if self.params_image_size.contains(&0) {
            return Err(ClassifierError::InvalidConfig(format!(
                "IMAGE_SIZE {:?} must be positive",
                self.params_image_size
            )));
        }
        if self.params_classes == 0 {
            return Err(ClassifierError::InvalidConfig(
                "CLASSES must be at least 1".to_string(),
            ));
        }
        let lr = self.params_learning_rate;
        if !lr.is_finite() || lr <= 0.0 {
            return Err(ClassifierError::InvalidConfig(format!(
                "LEARNING_RATE must be positive and finite, got {}",
                lr
            )));
        }
        Ok(())
    }

    pub fn backbone_request(&self) -> BackboneRequest {
        BackboneRequest {
            architecture: self.params_architecture,
            input_shape: self.params_image_size,
            weights: self.params_weights,
        }
    }
}

/// Parse a YAML file into `T`.
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    let value = serde_yaml::from_str(&content)?;
    info!("yaml file: {} loaded successfully", path.display());
    Ok(value)
}

pub fn create_directories(paths: &[&Path]) -> Result<()> {
    for path in paths {
        fs::create_dir_all(path)?;
        info!("created directory at: {}", path.display());
    }
    Ok(())
}

/// `<user cache dir>/cnn-classifier/weights`, or `./weights` without one
pub fn default_weights_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("cnn-classifier").join("weights"))
        .unwrap_or_else(|| PathBuf::from("weights"))
}

pub struct ConfigurationManager {
    config: ConfigFile,
    params: Params,
}

impl ConfigurationManager {
    /// Read both files and create the artifacts root.
    pub fn new(config_path: impl AsRef<Path>, params_path: impl AsRef<Path>) -> Result<Self> {
        let config: ConfigFile = read_yaml(config_path.as_ref())?;
        let params: Params = read_yaml(params_path.as_ref())?;
        Self::from_parts(config, params)
    }

    pub fn from_parts(config: ConfigFile, params: Params) -> Result<Self> {
        create_directories(&[config.artifacts_root.as_path()])?;
        Ok(ConfigurationManager { config, params })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Stage configuration; creates the stage's `root_dir`.
    pub fn prepare_base_model_config(&self) -> Result<PrepareBaseModelConfig> {
        let section = &self.config.prepare_base_model;
        let params = &self.params;

        let params_image_size: [usize; 3] =
            params.image_size.as_slice().try_into().map_err(|_| {
                ClassifierError::InvalidConfig(format!(
                    "IMAGE_SIZE must be [height, width, channels], got {:?}",
                    params.image_size
                ))
            })?;
        let params_architecture = match &params.architecture {
            Some(name) => name.parse::<Architecture>()?,
            None => Architecture::default(),
        };
        let params_weights = match &params.weights {
            Some(name) => name.parse::<WeightSet>()?,
            None => WeightSet::default(),
        };

        let prepared = PrepareBaseModelConfig {
            root_dir: section.root_dir.clone(),
            base_model_path: section.base_model_path.clone(),
            updated_base_model_path: section.updated_base_model_path.clone(),
            weights_dir: section
                .weights_dir
                .clone()
                .unwrap_or_else(default_weights_dir),
            params_architecture,
            params_image_size,
            params_classes: params.classes,
            params_learning_rate: params.learning_rate,
            params_weights,
        };
        prepared.validate()?;

        create_directories(&[prepared.root_dir.as_path()])?;
        Ok(prepared)
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;
    use tempfile::TempDir;

    fn write_files(dir: &TempDir, params: &str) -> (PathBuf, PathBuf) {
        let root = dir.path().display();
        let config = format!(
            "artifacts_root: {root}/artifacts\n\
             prepare_base_model:\n  \
               root_dir: {root}/artifacts/prepare_base_model\n  \
               base_model_path: {root}/artifacts/prepare_base_model/base_model.bin\n  \
               updated_base_model_path: {root}/artifacts/prepare_base_model/base_model_updated.bin\n"
        );
        let config_path = dir.path().join("config.yaml");
        let params_path = dir.path().join("params.yaml");
        fs::write(&config_path, config).unwrap();
        fs::write(&params_path, params).unwrap();
        (config_path, params_path)
    }

    #[test]
    fn test_loads_stage_config_and_creates_directories() {
        let dir = TempDir::new().unwrap();
        let (config, params) = write_files(
            &dir,
            "IMAGE_SIZE: [224, 224, 3]\nCLASSES: 3\nLEARNING_RATE: 0.0001\n",
        );
        let manager = ConfigurationManager::new(&config, &params).unwrap();
        assert!(dir.path().join("artifacts").is_dir());

        let stage = manager.prepare_base_model_config().unwrap();
        assert!(stage.root_dir.is_dir());
        assert_eq!(stage.params_image_size, [224, 224, 3]);
        assert_eq!(stage.params_classes, 3);
        assert!((stage.params_learning_rate - 1e-4).abs() < 1e-9);
        assert_eq!(stage.params_architecture, Architecture::EfficientNetB0);
        assert_eq!(stage.params_weights, WeightSet::ImageNet);
        assert_eq!(stage.weights_dir, default_weights_dir());
        assert!(stage.base_model_path.ends_with("base_model.bin"));
    }

    #[test]
    fn test_optional_params() {
        let dir = TempDir::new().unwrap();
        let (config, params) = write_files(
            &dir,
            "ARCHITECTURE: EfficientNetB2\nIMAGE_SIZE: [64, 64, 1]\nCLASSES: 2\n\
             LEARNING_RATE: 0.01\nWEIGHTS: none\n",
        );
        let stage = ConfigurationManager::new(&config, &params)
            .unwrap()
            .prepare_base_model_config()
            .unwrap();
        assert_eq!(stage.params_architecture, Architecture::EfficientNetB2);
        assert_eq!(stage.params_weights, WeightSet::Random);
        assert_eq!(stage.backbone_request().input_shape, [64, 64, 1]);
    }

    #[test]
    fn test_invalid_params_are_rejected() {
        let dir = TempDir::new().unwrap();
        for params in [
            "IMAGE_SIZE: [224, 224]\nCLASSES: 3\nLEARNING_RATE: 0.001\n",
            "IMAGE_SIZE: [224, 224, 3]\nCLASSES: 0\nLEARNING_RATE: 0.001\n",
            "IMAGE_SIZE: [224, 224, 3]\nCLASSES: 3\nLEARNING_RATE: -1.0\n",
            "IMAGE_SIZE: [224, 224, 3]\nCLASSES: 3\nLEARNING_RATE: 0.001\nWEIGHTS: jft\n",
        ] {
            let (config, params_path) = write_files(&dir, params);
            let manager = ConfigurationManager::new(&config, &params_path).unwrap();
            assert!(matches!(
                manager.prepare_base_model_config(),
                Err(ClassifierError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_same_artifact_paths_are_rejected() {
        let stage = PrepareBaseModelConfig {
            root_dir: PathBuf::from("a"),
            base_model_path: PathBuf::from("a/model.bin"),
            updated_base_model_path: PathBuf::from("a/model.bin"),
            weights_dir: PathBuf::from("w"),
            params_architecture: Architecture::EfficientNetB0,
            params_image_size: [224, 224, 3],
            params_classes: 3,
            params_learning_rate: 1e-4,
            params_weights: WeightSet::ImageNet,
        };
        assert!(stage.validate().is_err());
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = TempDir::new().unwrap();
        let missing = ConfigurationManager::new(
            dir.path().join("nope.yaml"),
            dir.path().join("params.yaml"),
        );
        assert!(matches!(missing, Err(ClassifierError::Io(_))));

        let (config, params) = write_files(&dir, "IMAGE_SIZE: [224, 224, 3]\n");
        assert!(matches!(
            ConfigurationManager::new(&config, &params),
            Err(ClassifierError::Yaml(_))
        ));
    }
}
