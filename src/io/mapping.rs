use crate::io::StateDict;

/// Builder for composable state dict transformations
///
/// Weight sets exported from other tools rarely use our key names verbatim.
/// Transformations are applied in the order they are added.
///
/// # Examples
///
/// ```
/// use cnn_classifier::io::mapping::StateDictMapper;
///
/// // "efficientnetb0/stem_conv/kernel:0" -> "stem_conv.kernel"
/// let mapper = StateDictMapper::new()
///     .keras_keys()
///     .strip_prefix("efficientnetb0.")
///     .exclude_prefix("predictions.");
/// # let _ = mapper;
/// ```
pub type TransformationBox = Box<dyn Fn(&mut StateDict)>;
pub struct StateDictMapper {
    transformations: Vec<TransformationBox>,
}

impl StateDictMapper {
    #[must_use]
    pub fn new() -> Self {
        Self {
            transformations: Vec::new(),
        }
    }

    /// Rewrite Keras variable names into our keys.
    ///
    /// - `/` separates key segments and a trailing `:N` slot suffix is dropped
    /// - a layer name repeated by h5 exports (`stem_conv/stem_conv/kernel`) is collapsed
    /// - block layers `block1a_se_reduce` become `block1a.se_reduce`
    /// - `depthwise_kernel` becomes `kernel`, reshaped from `(k, k, C, 1)` to `(k, k, 1, C)`
    ///
    /// Keys without a `/` only lose their slot suffix.
    #[must_use]
    pub fn keras_keys(self) -> Self {
        self.transform(|state: &mut StateDict| {
            let keys: Vec<String> = state.keys().cloned().collect();
            for key in keys {
                let (new_key, depthwise) = keras_variable_key(&key);
                if new_key == key {
                    continue;
                }
                if let Some(mut value) = state.remove(&key) {
                    // Same memory order, only the channel multiplier axis moves
                    if depthwise && value.shape.len() == 4 && value.shape[3] == 1 {
                        value.shape.swap(2, 3);
                    }
                    state.insert(new_key, value);
                }
            }
        })
    }

    /// Strip a prefix from all keys
    ///
    /// Example: `strip_prefix("model.")` changes "model.stem_conv.kernel" to "stem_conv.kernel"
    #[must_use]
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.transform(move |state: &mut StateDict| {
            let mut updates = Vec::new();
            for (key, value) in state.iter() {
                if let Some(stripped) = key.strip_prefix(&prefix) {
                    updates.push((key.clone(), stripped.to_string(), value.clone()));
                }
            }
            for (old_key, new_key, value) in updates {
                state.remove(&old_key);
                state.insert(new_key, value);
            }
        })
    }

    /// Drop every key starting with `prefix`
    #[must_use]
    pub fn exclude_prefix(self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.transform(move |state: &mut StateDict| {
            state.retain(|key, _| !key.starts_with(&prefix));
        })
    }

    /// Add a custom transformation
    #[must_use]
    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut StateDict) + 'static,
    {
        self.transformations.push(Box::new(f));
        self
    }

    pub fn apply(&self, state: &mut StateDict) {
        for transformation in &self.transformations {
            transformation(state);
        }
    }

    #[must_use]
    pub fn map(&self, mut state: StateDict) -> StateDict {
        self.apply(&mut state);
        state
    }
}

/// `block1a_se_reduce` -> `("block1a", "se_reduce")`
fn split_block_layer(segment: &str) -> Option<(&str, &str)> {
    let rest = segment.strip_prefix("block")?;
    let digits = rest.find(|c: char| !c.is_ascii_digit())?;
    if digits == 0 {
        return None;
    }
    let letter = rest[digits..].chars().next()?;
    if !letter.is_ascii_lowercase() {
        return None;
    }
    let split = "block".len() + digits + 1;
    let layer = segment[split..].strip_prefix('_')?;
    (!layer.is_empty()).then_some((&segment[..split], layer))
}

/// Our key for a Keras variable name, and whether it names a depthwise kernel
fn keras_variable_key(name: &str) -> (String, bool) {
    let name = match name.rfind(':') {
        Some(pos) if name[pos + 1..].chars().all(|c| c.is_ascii_digit()) => &name[..pos],
        _ => name,
    };
    if !name.contains('/') {
        return (name.to_string(), false);
    }

    let mut segments: Vec<&str> = name.split('/').collect();
    segments.dedup();
    let last = segments.len() - 1;
    let mut parts = Vec::with_capacity(segments.len() + 1);
    let mut depthwise = false;
    for (i, segment) in segments.into_iter().enumerate() {
        if i == last && segment == "depthwise_kernel" {
            depthwise = true;
            parts.push("kernel");
            continue;
        }
        match split_block_layer(segment) {
            Some((block, layer)) => {
                parts.push(block);
                parts.push(layer);
            }
            None => parts.push(segment),
        }
    }
    (parts.join("."), depthwise)
}

impl Default for StateDictMapper {
    fn default() -> Self {
        Self::new()
    }
}
