//! Weight and model persistence.
//!
//! - [`StateDict`]: flat `name -> tensor` map of every parameter and buffer
//! - [`archive`]: whole-model files (architecture + weights + optimizer state)
//! - [`pretrained`]: weight sets stored as safetensors or bincode state dicts
//! - [`mapping`]: key rewriting applied to foreign state dicts before loading

pub mod archive;
pub mod mapping;
pub mod pretrained;

use crate::error::Result;
use crate::nn::Module;
use crate::tensor::{RawTensor, Tensor};
use bincode::{Decode, Encode, config};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub use archive::{load_compiled_model, load_model, save_compiled_model, save_model};

pub type StateDict = BTreeMap<String, TensorData>;

// Serializable representation of tensor data
#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct TensorData {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

/// Summary of differences between two state dicts.
///
/// `expected` is usually taken from `model.state_dict()`, and `loaded` is
/// what was deserialized or passed in.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StateDictDiff {
    /// Keys that exist in `expected` but are missing from `loaded`.
    pub missing_keys: Vec<String>,
    /// Keys that exist in `loaded` but not in `expected`.
    pub unexpected_keys: Vec<String>,
    /// Keys present in both, but with differing shapes:
    /// `(key, expected_shape, loaded_shape)`.
    pub shape_mismatches: Vec<(String, Vec<usize>, Vec<usize>)>,
}

impl StateDictDiff {
    /// Returns true if there are no missing, unexpected, or shape-mismatched keys.
    pub fn is_empty(&self) -> bool {
        self.missing_keys.is_empty()
            && self.unexpected_keys.is_empty()
            && self.shape_mismatches.is_empty()
    }

    /// True when every expected key is present with the right shape.
    /// Extra keys in the loaded dict are tolerated.
    pub fn is_compatible(&self) -> bool {
        self.missing_keys.is_empty() && self.shape_mismatches.is_empty()
    }
}

impl TensorData {
    pub fn from_tensor(t: &Tensor) -> Self {
        let borrowed = t.borrow();
        TensorData {
            data: borrowed.data.clone(),
            shape: borrowed.shape.clone(),
        }
    }

    pub fn to_tensor(&self, requires_grad: bool) -> Tensor {
        RawTensor::new(self.data.clone(), &self.shape, requires_grad)
    }

    /// Overwrite `t` in place so every holder of the handle sees the new values.
    pub fn copy_into(&self, t: &Tensor) {
        let mut b = t.borrow_mut();
        b.data = self.data.clone();
        b.shape = self.shape.clone();
    }
}

/// Compute a diff between an "expected" and a "loaded" state dict.
///
/// This function **does not mutate any tensors** and is purely informational.
pub fn diff_state_dict(expected: &StateDict, loaded: &StateDict) -> StateDictDiff {
    let mut diff = StateDictDiff::default();

    for (key, expected_td) in expected.iter() {
        match loaded.get(key) {
            None => diff.missing_keys.push(key.clone()),
            Some(actual_td) => {
                if expected_td.shape != actual_td.shape {
                    diff.shape_mismatches.push((
                        key.clone(),
                        expected_td.shape.clone(),
                        actual_td.shape.clone(),
                    ));
                }
            }
        }
    }

    for key in loaded.keys() {
        if !expected.contains_key(key) {
            diff.unexpected_keys.push(key.clone());
        }
    }

    diff
}

/// Load a state dict only if it is compatible with the module.
///
/// Returns the diff either way; the module is left untouched when the diff
/// reports missing keys or shape mismatches.
pub fn load_state_dict_checked<M: Module + ?Sized>(
    module: &mut M,
    state: &StateDict,
) -> StateDictDiff {
    let expected = module.state_dict();
    let diff = diff_state_dict(&expected, state);
    if diff.is_compatible() {
        module.load_state_dict(state);
    }
    diff
}

pub fn save_state_dict(state: &StateDict, path: impl AsRef<Path>) -> Result<()> {
    let encoded = bincode::encode_to_vec(state, config::standard())?;
    fs::write(path, encoded)?;
    Ok(())
}

pub fn load_state_dict(path: impl AsRef<Path>) -> Result<StateDict> {
    let buffer = fs::read(path)?;
    let (state, _): (StateDict, _) = bincode::decode_from_slice(&buffer, config::standard())?;
    Ok(state)
}
