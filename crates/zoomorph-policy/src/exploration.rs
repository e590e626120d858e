//! Action exploration: epsilon-greedy with a Boltzmann fallback.
//!
//! With probability epsilon a uniformly random action is taken. Otherwise
//! the action is drawn from a softmax over the model outputs at a fixed
//! temperature. Epsilon decays multiplicatively on every selection down to
//! a floor.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Exploration parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationConfig {
    /// Initial probability of a random action.
    pub epsilon: f64,
    /// Lower bound for epsilon.
    pub epsilon_min: f64,
    /// Multiplicative decay applied on every selection.
    pub epsilon_decay: f64,
    /// Softmax temperature for the non-random branch.
    pub temperature: f64,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.8,
            epsilon_min: 0.01,
            epsilon_decay: 0.999,
            temperature: 0.2,
        }
    }
}

/// Mutable exploration state owned by one policy runtime.
#[derive(Debug)]
pub struct Exploration {
    config: ExplorationConfig,
    epsilon: f64,
    rng: StdRng,
}

impl Exploration {
    /// Create exploration state seeded from `seed`.
    pub fn new(config: ExplorationConfig, seed: u64) -> Self {
        Self {
            config,
            epsilon: config.epsilon,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Current epsilon.
    pub const fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Decay epsilon, then decide whether this selection explores.
    ///
    /// Returns a random action index in `0..action_count` when exploring.
    pub fn explore(&mut self, action_count: usize) -> Option<usize> {
        let roll = self.rng.random::<f64>();
        let explore = roll < self.epsilon;
        self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.epsilon_min);
        if explore && action_count > 0 {
            Some(self.rng.random_range(0..action_count))
        } else {
            None
        }
    }

    /// Sample an index from a temperature-scaled softmax over `values`.
    ///
    /// Non-finite values get zero weight; if nothing has weight the
    /// greedy index is returned.
    pub fn boltzmann(&mut self, values: &[f32]) -> Option<usize> {
        let temperature = self.config.temperature.max(1e-6);
        let max = values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f32::NEG_INFINITY, f32::max);
        if !max.is_finite() {
            return None;
        }
        let weights: Vec<f64> = values
            .iter()
            .map(|&v| {
                if v.is_finite() {
                    (f64::from(v - max) / temperature).exp()
                } else {
                    0.0
                }
            })
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return greedy(values);
        }

        let mut point = self.rng.random::<f64>() * total;
        for (idx, weight) in weights.iter().enumerate() {
            if point < *weight {
                return Some(idx);
            }
            point -= weight;
        }
        weights.iter().rposition(|w| *w > 0.0)
    }
}

/// Index of the largest finite value.
pub fn greedy(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(idx, _)| idx)
}
