use crate::error::{ClassifierError, Result};
use crate::tensor::Tensor;
use bincode::{Decode, Encode};

/// Adam hyper-parameters.
///
/// Defaults follow the Keras optimizer: `betas = (0.9, 0.999)`, `eps = 1e-7`.
#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq)]
pub struct AdamConfig {
    pub learning_rate: f32,
    pub betas: (f32, f32),
    pub eps: f32,
    pub weight_decay: f32,
}

impl AdamConfig {
    pub fn with_learning_rate(learning_rate: f32) -> Self {
        AdamConfig {
            learning_rate,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let lr = self.learning_rate;
        if !lr.is_finite() || lr <= 0.0 {
            return Err(ClassifierError::InvalidConfig(format!(
                "learning rate must be positive and finite, got {}",
                lr
            )));
        }
        let (b1, b2) = self.betas;
        if !(0.0..1.0).contains(&b1) || !(0.0..1.0).contains(&b2) || self.eps <= 0.0 {
            return Err(ClassifierError::InvalidConfig(format!(
                "invalid Adam settings {:?}",
                self
            )));
        }
        Ok(())
    }
}

impl Default for AdamConfig {
    fn default() -> Self {
        AdamConfig {
            learning_rate: 1e-3,
            betas: (0.9, 0.999),
            eps: 1e-7,
            weight_decay: 0.0,
        }
    }
}

/// Persisted optimizer slots: step count plus first/second moments per parameter name.
#[derive(Encode, Decode, Clone, Debug, PartialEq, Default)]
pub struct AdamState {
    pub step: u64,
    pub moments: Vec<(String, Vec<f32>, Vec<f32>)>,
}

pub struct Adam {
    params: Vec<(String, Tensor)>,
    config: AdamConfig,
    m: Vec<Vec<f32>>, // 1st moment
    v: Vec<Vec<f32>>, // 2nd moment
    t: u64,           // timestep
}

impl Adam {
    /// Tracks `params`; only the ones flagged `requires_grad` are ever updated.
    #[must_use]
    pub fn new(params: Vec<(String, Tensor)>, config: AdamConfig) -> Self {
        let zeros = |p: &(String, Tensor)| vec![0.0; p.1.borrow().data.len()];
        let m = params.iter().map(zeros).collect();
        let v = params.iter().map(zeros).collect();
        Adam {
            params,
            config,
            m,
            v,
            t: 0,
        }
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    pub fn learning_rate(&self) -> f32 {
        self.config.learning_rate
    }

    pub fn iterations(&self) -> u64 {
        self.t
    }

    pub fn param_names(&self) -> Vec<&str> {
        self.params.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn zero_grad(&self) {
        for (_, param) in &self.params {
            param.borrow_mut().grad = None;
        }
    }

    pub fn step(&mut self) {
        self.t += 1;
        for i in 0..self.params.len() {
            self.step_param(i);
        }
    }

    fn step_param(&mut self, i: usize) {
        let AdamConfig {
            learning_rate: lr,
            betas: (b1, b2),
            eps,
            weight_decay,
        } = self.config;
        let mut p = self.params[i].1.borrow_mut();

        // Skip frozen parameters and parameters without gradients
        if !p.requires_grad {
            return;
        }
        let mut grad = match &p.grad {
            Some(g) => g.clone(),
            None => return,
        };

        if weight_decay != 0.0 {
            for (g, theta) in grad.iter_mut().zip(p.data.iter()) {
                *g += weight_decay * *theta;
            }
        }

        let m = &mut self.m[i];
        let v = &mut self.v[i];
        for ((m, v), g) in m.iter_mut().zip(v.iter_mut()).zip(&grad) {
            *m = b1 * *m + (1.0 - b1) * g;
            *v = b2 * *v + (1.0 - b2) * g * g;
        }

        // Bias correction
        let m_hat_scale = 1.0 / (1.0 - b1.powi(self.t as i32));
        let v_hat_scale = 1.0 / (1.0 - b2.powi(self.t as i32));

        for ((theta, m), v) in p.data.iter_mut().zip(m.iter()).zip(v.iter()) {
            let m_hat = m * m_hat_scale;
            let v_hat = v * v_hat_scale;
            *theta -= lr * m_hat / (v_hat.sqrt() + eps);
        }
    }

    /// Snapshot of the moments for persistence
    pub fn state(&self) -> AdamState {
        AdamState {
            step: self.t,
            moments: self
                .params
                .iter()
                .zip(self.m.iter().zip(&self.v))
                .map(|((name, _), (m, v))| (name.clone(), m.clone(), v.clone()))
                .collect(),
        }
    }

    /// Restore moments saved by [`Adam::state`]; every entry must match a tracked parameter.
    pub fn restore(&mut self, state: AdamState) -> Result<()> {
        for (name, m, v) in state.moments {
            let i = self
                .params
                .iter()
                .position(|(k, _)| *k == name)
                .ok_or_else(|| {
                    ClassifierError::Serialization(format!(
                        "optimizer state for unknown parameter '{}'",
                        name
                    ))
                })?;
            let len = self.m[i].len();
            if m.len() != len || v.len() != len {
                return Err(ClassifierError::Serialization(format!(
                    "optimizer state for '{}' has {} values, expected {}",
                    name,
                    m.len(),
                    len
                )));
            }
            self.m[i] = m;
            self.v[i] = v;
        }
        self.t = state.step;
        Ok(())
    }
}
