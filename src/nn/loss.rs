use crate::error::{ClassifierError, Result};
use crate::tensor::Tensor;
use bincode::{Decode, Encode};

/// Probabilities are clipped into `[EPSILON, 1 - EPSILON]` before the log
const EPSILON: f32 = 1e-7;

#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Loss {
    /// Mean over the batch of `-sum(y_true * log(y_pred))` for one-hot targets
    CategoricalCrossentropy,
}

#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    /// Fraction of samples whose predicted argmax matches the target argmax
    Accuracy,
}

/// Both tensors must be `(batch, classes)` with equal shapes.
fn rows(y_pred: &[f32], pred_shape: &[usize], true_shape: &[usize]) -> Result<usize> {
    if pred_shape.len() != 2 || pred_shape != true_shape || y_pred.is_empty() {
        return Err(ClassifierError::ShapeMismatch {
            expected: true_shape.iter().map(|&d| Some(d)).collect(),
            actual: pred_shape.to_vec(),
        });
    }
    Ok(pred_shape[1])
}

fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv { (i, v) } else { (bi, bv) }
        })
        .0
}

impl Loss {
    pub fn name(self) -> &'static str {
        match self {
            Loss::CategoricalCrossentropy => "categorical_crossentropy",
        }
    }

    pub fn compute(self, y_pred: &Tensor, y_true: &Tensor) -> Result<f32> {
        let (p, t) = (y_pred.borrow(), y_true.borrow());
        let classes = rows(&p.data, &p.shape, &t.shape)?;
        match self {
            Loss::CategoricalCrossentropy => {
                let mut total = 0.0;
                for (pr, tr) in p.data.chunks(classes).zip(t.data.chunks(classes)) {
                    // Keras rescales predictions so each row sums to one
                    let sum: f32 = pr.iter().sum::<f32>().max(EPSILON);
                    total -= pr
                        .iter()
                        .zip(tr)
                        .map(|(&q, &y)| y * (q / sum).clamp(EPSILON, 1.0 - EPSILON).ln())
                        .sum::<f32>();
                }
                Ok(total / p.shape[0] as f32)
            }
        }
    }
}

impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
        }
    }

    pub fn compute(self, y_pred: &Tensor, y_true: &Tensor) -> Result<f32> {
        let (p, t) = (y_pred.borrow(), y_true.borrow());
        let classes = rows(&p.data, &p.shape, &t.shape)?;
        match self {
            Metric::Accuracy => {
                let hits = p
                    .data
                    .chunks(classes)
                    .zip(t.data.chunks(classes))
                    .filter(|(pr, tr)| argmax(pr) == argmax(tr))
                    .count();
                Ok(hits as f32 / p.shape[0] as f32)
            }
        }
    }
}
