use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    /// A pretrained weight set could not be found or does not fit the architecture.
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<Option<usize>>,
        actual: Vec<usize>,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ClassifierError>;

impl From<bincode::error::EncodeError> for ClassifierError {
    fn from(e: bincode::error::EncodeError) -> Self {
        ClassifierError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for ClassifierError {
    fn from(e: bincode::error::DecodeError) -> Self {
        ClassifierError::Serialization(e.to_string())
    }
}
