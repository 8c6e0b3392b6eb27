use crate::nn::{LayerEntry, Network};
use tracing::debug;

/// Which layers of a backbone stop receiving updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreezePolicy {
    /// Every layer is frozen
    All,
    /// Every layer except the last `k` is frozen
    AllButLast(usize),
    /// Trainable flags are left as they are
    Unchanged,
}

impl FreezePolicy {
    /// `freeze_all` wins over `freeze_till`; `freeze_till` of zero changes nothing.
    pub fn resolve(freeze_all: bool, freeze_till: Option<usize>) -> Self {
        match (freeze_all, freeze_till) {
            (true, _) => FreezePolicy::All,
            (false, Some(k)) if k > 0 => FreezePolicy::AllButLast(k),
            _ => FreezePolicy::Unchanged,
        }
    }

    /// Layers this policy freezes are marked non-trainable; the rest are not touched.
    pub fn apply(self, layers: &mut [LayerEntry]) {
        let frozen = match self {
            FreezePolicy::All => layers.len(),
            FreezePolicy::AllButLast(k) => layers.len().saturating_sub(k),
            FreezePolicy::Unchanged => 0,
        };
        for layer in &mut layers[..frozen] {
            layer.set_trainable(false);
            debug!("Froze layer {}", layer.name());
        }
    }
}

/// Freeze the layers of `network` selected by the two flags.
pub fn apply_freeze_policy<N: Network + ?Sized>(
    network: &mut N,
    freeze_all: bool,
    freeze_till: Option<usize>,
) {
    FreezePolicy::resolve(freeze_all, freeze_till).apply(network.layers_mut());
}
