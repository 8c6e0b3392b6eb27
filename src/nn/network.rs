use crate::error::Result;
use crate::nn::LayerEntry;
use std::path::Path;

/// What the assembly stage needs from a built graph.
///
/// Shapes are batch-first with an unknown batch size, e.g. `[None, 224, 224, 3]`.
pub trait Network {
    fn name(&self) -> &str;

    fn layers(&self) -> &[LayerEntry];

    fn layers_mut(&mut self) -> &mut [LayerEntry];

    fn input_shape(&self) -> Vec<Option<usize>>;

    fn output_shape(&self) -> Vec<Option<usize>>;

    /// Persist the whole graph (architecture, weights, trainable flags).
    fn save(&self, path: &Path) -> Result<()>;

    fn trainable_layer_count(&self) -> usize {
        self.layers().iter().filter(|l| l.trainable()).count()
    }
}

/// Prepend the unknown batch axis to a per-sample shape
pub(crate) fn batched(shape: &[usize]) -> Vec<Option<usize>> {
    std::iter::once(None)
        .chain(shape.iter().map(|&d| Some(d)))
        .collect()
}
