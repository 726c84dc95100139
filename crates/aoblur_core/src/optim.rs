//! Adaptive gradient steps over the parameter array.

use serde::{Deserialize, Serialize};

use crate::error::{AoError, AoResult};
use crate::params::NUM_PARAMS;

/// Update rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    /// Adam with Nesterov momentum.
    Nadam,
}

/// Optimizer hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    /// Step size. Default: 0.001
    pub learning_rate: f64,
    /// First moment decay. Default: 0.9
    pub beta1: f64,
    /// Second moment decay. Default: 0.999
    pub beta2: f64,
    /// Denominator stabilizer. Default: 1e-7
    pub epsilon: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Adam,
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }
}

impl OptimizerConfig {
    /// Validate the configuration parameters.
    pub fn validate(&self) -> AoResult<()> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(AoError::InvalidConfig(
                "learning_rate must be finite and > 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.beta1) {
            return Err(AoError::InvalidConfig("beta1 must be in [0, 1)".to_string()));
        }
        if !(0.0..1.0).contains(&self.beta2) {
            return Err(AoError::InvalidConfig("beta2 must be in [0, 1)".to_string()));
        }
        if self.epsilon.is_nan() || self.epsilon <= 0.0 {
            return Err(AoError::InvalidConfig("epsilon must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Moment estimates for every parameter plus the step counter.
#[derive(Debug, Clone)]
pub struct Optimizer {
    config: OptimizerConfig,
    m: [f64; NUM_PARAMS],
    v: [f64; NUM_PARAMS],
    t: i32,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            m: [0.0; NUM_PARAMS],
            v: [0.0; NUM_PARAMS],
            t: 0,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn steps_taken(&self) -> i32 {
        self.t
    }

    /// Apply one update in place. The whole gradient is consumed before any
    /// value changes.
    pub fn step(&mut self, params: &mut [f64; NUM_PARAMS], grad: &[f64; NUM_PARAMS]) {
        let OptimizerConfig {
            kind,
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.config;

        self.t += 1;
        let bias1 = 1.0 - beta1.powi(self.t);
        let bias2 = 1.0 - beta2.powi(self.t);

        let mut deltas = [0.0; NUM_PARAMS];
        for (i, delta) in deltas.iter_mut().enumerate() {
            let g = grad[i];
            self.m[i] = beta1 * self.m[i] + (1.0 - beta1) * g;
            self.v[i] = beta2 * self.v[i] + (1.0 - beta2) * g * g;

            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;
            let direction = match kind {
                OptimizerKind::Adam => m_hat,
                OptimizerKind::Nadam => beta1 * m_hat + (1.0 - beta1) * g / bias1,
            };
            *delta = learning_rate * direction / (v_hat.sqrt() + epsilon);
        }

        for (p, d) in params.iter_mut().zip(deltas.iter()) {
            *p -= d;
        }
    }
}
