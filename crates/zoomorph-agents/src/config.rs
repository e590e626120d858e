//! Configuration for organisms.
//!
//! Mirrors the `organism` section of `zoomorph-config.yaml`. Every field
//! has a default so a partial section is valid.

use serde::{Deserialize, Serialize};
use zoomorph_policy::{ExplorationConfig, ModelSpec};
use zoomorph_replay::ReplayConfig;
use zoomorph_types::{Action, LearnHyperparams};

use crate::error::OrganismError;

/// Features the perception vector carries before the per-item block.
pub const SELF_FEATURES: usize = 4;

/// Features per tracked item: distance, direction, reward.
pub const ITEM_FEATURES: usize = 3;

/// Organism tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganismConfig {
    /// Energy at birth.
    pub starting_energy: f64,
    /// Nutrition at birth.
    pub starting_nutrition: f64,
    /// Distance moved per tick.
    pub movement_speed: f64,
    /// Distance the attention point moves per tick.
    pub attention_speed: f64,
    /// Radius of food perception and of the attention leash.
    pub detection_radius: f64,
    /// Energy burned per tick.
    pub energy_consumption: f64,
    /// Nutrition burned per tick.
    pub nutrition_consumption: f64,
    /// Decide on one tick out of this many; reuse the last action otherwise.
    pub frame_skip: u32,
    /// Items tracked at the start of the run.
    pub start_nearest_items: usize,
    /// Items tracked once the curriculum completes; fixes the input width.
    pub max_nearest_items: usize,
    /// Simulated seconds over which tracking grows to `max_nearest_items`.
    pub nearest_items_curriculum_seconds: f64,
    /// Reproduction thresholds and costs.
    pub reproduction: ReproductionConfig,
    /// Reward shaping.
    pub reward: RewardConfig,
    /// Width of each hidden layer.
    pub hidden_size: usize,
    /// Number of hidden layers.
    pub hidden_layers: usize,
    /// Hyperparameters sent with every learning request.
    pub learning: LearnHyperparams,
    /// Experience store sizing.
    pub replay: ReplayConfig,
    /// Exploration schedule.
    pub exploration: ExplorationConfig,
}

impl Default for OrganismConfig {
    fn default() -> Self {
        Self {
            starting_energy: 10.0,
            starting_nutrition: 0.0,
            movement_speed: 1.0,
            attention_speed: 3.0,
            detection_radius: 200.0,
            energy_consumption: 0.002,
            nutrition_consumption: 0.0001,
            frame_skip: 4,
            start_nearest_items: 1,
            max_nearest_items: 1,
            nearest_items_curriculum_seconds: 30.0 * 60.0,
            reproduction: ReproductionConfig::default(),
            reward: RewardConfig::default(),
            hidden_size: 64,
            hidden_layers: 2,
            learning: LearnHyperparams::default(),
            replay: ReplayConfig {
                batch_size: 4,
                ..ReplayConfig::default()
            },
            exploration: ExplorationConfig::default(),
        }
    }
}

impl OrganismConfig {
    /// Length of the perception vector.
    pub const fn input_size(&self) -> usize {
        SELF_FEATURES.saturating_add(self.max_nearest_items.saturating_mul(ITEM_FEATURES))
    }

    /// Network shape for one organism.
    pub const fn model_spec(&self, seed: u64) -> ModelSpec {
        ModelSpec {
            input_size: self.input_size(),
            hidden_size: self.hidden_size,
            hidden_layers: self.hidden_layers,
            output_size: Action::COUNT,
            seed,
        }
    }

    /// Reject settings no organism can run with.
    pub fn validate(&self) -> Result<(), OrganismError> {
        if self.frame_skip == 0 {
            return Err(OrganismError::InvalidConfig {
                reason: "frame_skip must be at least 1".to_owned(),
            });
        }
        if self.start_nearest_items > self.max_nearest_items {
            return Err(OrganismError::InvalidConfig {
                reason: format!(
                    "start_nearest_items ({}) exceeds max_nearest_items ({})",
                    self.start_nearest_items, self.max_nearest_items
                ),
            });
        }
        if self.replay.batch_size == 0 {
            return Err(OrganismError::InvalidConfig {
                reason: "replay.batch_size must be at least 1".to_owned(),
            });
        }
        self.model_spec(0).validate()?;
        Ok(())
    }
}

/// When an organism may reproduce and what it costs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReproductionConfig {
    /// Energy must exceed this.
    pub energy_threshold: f64,
    /// Nutrition must exceed this.
    pub nutrition_threshold: f64,
    /// Energy paid by the parent.
    pub energy_cost: f64,
    /// Nutrition paid by the parent.
    pub nutrition_cost: f64,
}

impl Default for ReproductionConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 100.0,
            nutrition_threshold: 30.0,
            energy_cost: 80.0,
            nutrition_cost: 20.0,
        }
    }
}

/// Reward shaping parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Initial weight of the proximity term.
    pub proximity_weight: f64,
    /// Initial weight of the direction term.
    pub direction_weight: f64,
    /// Initial weight of the focus bonuses.
    pub focus_weight: f64,
    /// Per-apply multiplicative decay of the proximity weight.
    pub proximity_decay: f64,
    /// Per-apply multiplicative decay of the direction weight.
    pub direction_decay: f64,
    /// Per-apply multiplicative decay of the focus weight.
    pub focus_decay: f64,
    /// Attention-to-target distance that earns the focus bonus.
    pub focus_radius: f64,
    /// Attention movement below which a focused organism counts as settled.
    pub settle_threshold: f64,
    /// Reward when no target is tracked.
    pub lost_target_reward: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            proximity_weight: 2.0,
            direction_weight: 1.0,
            focus_weight: 1.0,
            proximity_decay: 1e-4,
            direction_decay: 1e-5,
            focus_decay: 1e-6,
            focus_radius: 2.0,
            settle_threshold: 0.1,
            lost_target_reward: -0.666,
        }
    }
}
