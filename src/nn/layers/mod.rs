pub mod activation;
pub mod batchnorm;
pub mod config;
pub mod conv;
pub mod dense;
pub mod mbconv;
pub mod pooling;
pub mod preprocessing;
pub mod sequential;
pub mod sequential_builder;

pub use activation::{Activation, ActivationLayer};
pub use batchnorm::BatchNorm;
pub use config::LayerConfig;
pub use conv::{Conv2d, Conv2dConfig, Padding};
pub use dense::Dense;
pub use mbconv::{MbConv, MbConvConfig};
pub use pooling::GlobalAveragePooling2d;
pub use preprocessing::{Normalization, Rescaling};
pub use sequential::{LayerEntry, Sequential};
pub use sequential_builder::SequentialBuilder;

use crate::error::{ClassifierError, Result};

/// Unpack a `[height, width, channels]` sample shape.
pub(crate) fn image_dims(layer: &str, input: &[usize]) -> Result<(usize, usize, usize)> {
    match input {
        &[h, w, c] => Ok((h, w, c)),
        _ => Err(ClassifierError::InvalidConfig(format!(
            "{} expects a (height, width, channels) input, got {:?}",
            layer, input
        ))),
    }
}
