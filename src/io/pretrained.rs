//! Pretrained weight sets on local disk.
//!
//! A weight set for architecture `efficientnetb0` and weights `imagenet`
//! lives in the weights directory as either
//! `efficientnetb0_imagenet_notop.safetensors` or
//! `efficientnetb0_imagenet_notop.bin` (a bincode [`StateDict`]).
//! Keys may be Keras variable names such as
//! `efficientnetb0/block1a_dwconv/depthwise_kernel:0`, which map to
//! `block1a.dwconv.kernel` (see [`StateDictMapper::keras_keys`]).

use crate::error::{ClassifierError, Result};
use crate::io::mapping::StateDictMapper;
use crate::io::{StateDict, TensorData, diff_state_dict, load_state_dict};
use crate::model::Model;
use safetensors::SafeTensors;
use safetensors::tensor::{Dtype, TensorView};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const EXTENSIONS: [&str; 2] = ["safetensors", "bin"];

/// File stem of a headless weight set, e.g. `efficientnetb0_imagenet_notop`
pub fn weight_file_stem(architecture: &str, weights: &str) -> String {
    format!("{}_{}_notop", architecture, weights)
}

/// First existing `<stem>.safetensors` / `<stem>.bin` under `dir`.
pub fn resolve_weight_file(dir: &Path, stem: &str) -> Result<PathBuf> {
    EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", stem, ext)))
        .find(|p| p.is_file())
        .ok_or_else(|| {
            ClassifierError::ResourceUnavailable(format!(
                "no weight file {}.{{{}}} in {}",
                stem,
                EXTENSIONS.join(","),
                dir.display()
            ))
        })
}

/// Read the `F32` tensors of a safetensors file into a state dict.
///
/// Tensors of other dtypes (Keras stores `normalization/count` as `I64`) are skipped.
pub fn load_safetensors(path: impl AsRef<Path>) -> Result<StateDict> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes).map_err(|e| {
        ClassifierError::ResourceUnavailable(format!(
            "invalid safetensors file {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut state = StateDict::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            warn!(
                "Skipping tensor '{}' in {} with dtype {:?}",
                name,
                path.display(),
                view.dtype()
            );
            continue;
        }
        let data: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
        state.insert(
            name,
            TensorData {
                data,
                shape: view.shape().to_vec(),
            },
        );
    }
    Ok(state)
}

/// Write a state dict as `F32` safetensors.
pub fn save_safetensors(state: &StateDict, path: impl AsRef<Path>) -> Result<()> {
    let views = state
        .iter()
        .map(|(name, td)| {
            TensorView::new(
                Dtype::F32,
                td.shape.clone(),
                bytemuck::cast_slice(&td.data),
            )
            .map(|view| (name.as_str(), view))
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ClassifierError::Serialization(e.to_string()))?;
    safetensors::serialize_to_file(views, &None, path.as_ref())
        .map_err(|e| ClassifierError::Serialization(e.to_string()))
}

/// Read a weight file, picking the format from its extension.
pub fn load_weight_file(path: &Path) -> Result<StateDict> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("safetensors") => load_safetensors(path),
        Some("bin") => load_state_dict(path).map_err(|e| match e {
            ClassifierError::Serialization(msg) => ClassifierError::ResourceUnavailable(format!(
                "invalid weight file {}: {}",
                path.display(),
                msg
            )),
            other => other,
        }),
        _ => Err(ClassifierError::ResourceUnavailable(format!(
            "unrecognized weight file format: {}",
            path.display()
        ))),
    }
}

/// Copy a pretrained state dict into `model`.
///
/// Every key the model expects must be present with a matching shape.
/// Extra keys (such as a dropped classification top) are skipped.
pub fn apply_pretrained(model: &mut Model, state: StateDict, prefix: &str) -> Result<()> {
    let state = StateDictMapper::new()
        .keras_keys()
        .strip_prefix(format!("{}.", prefix))
        .map(state);

    let diff = diff_state_dict(&model.state_dict(), &state);
    if !diff.is_compatible() {
        return Err(ClassifierError::ResourceUnavailable(format!(
            "weight set does not fit {}: missing {:?}, shape mismatches {:?}",
            prefix, diff.missing_keys, diff.shape_mismatches
        )));
    }
    if !diff.unexpected_keys.is_empty() {
        warn!(
            "Ignoring {} weight(s) not used by {}: {:?}",
            diff.unexpected_keys.len(),
            prefix,
            diff.unexpected_keys
        );
    }

    model.load_state_dict_checked(&state);
    debug!("Loaded {} pretrained tensors into {}", state.len(), prefix);
    Ok(())
}
