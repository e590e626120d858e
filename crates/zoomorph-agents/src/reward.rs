//! Reward shaping.
//!
//! With a tracked target the reward is a weighted sum of a proximity term
//! (how close the attention point now is) and a direction term (how well
//! the attention step pointed at the target), plus focus bonuses once the
//! attention point sits on the target. Without a target the reward is a
//! flat penalty. The three weights fade multiplicatively on every
//! [`RewardShaper::decay`] call.

use std::f64::consts::{PI, TAU};

use zoomorph_world::Position;

use crate::config::RewardConfig;
use crate::perception::Perception;

/// Current shaping weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapingWeights {
    /// Weight of the proximity term.
    pub proximity: f64,
    /// Weight of the direction term.
    pub direction: f64,
    /// Weight of each focus bonus.
    pub focus: f64,
}

/// Scores attention moves for one organism.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardShaper {
    config: RewardConfig,
    weights: ShapingWeights,
}

impl RewardShaper {
    /// Shaper starting at the configured weights.
    pub const fn new(config: RewardConfig) -> Self {
        Self {
            weights: ShapingWeights {
                proximity: config.proximity_weight,
                direction: config.direction_weight,
                focus: config.focus_weight,
            },
            config,
        }
    }

    /// Current weights.
    pub const fn weights(&self) -> ShapingWeights {
        self.weights
    }

    /// Fade every weight by its own factor.
    pub fn decay(&mut self) {
        self.weights.proximity *= 1.0 - self.config.proximity_decay;
        self.weights.direction *= 1.0 - self.config.direction_decay;
        self.weights.focus *= 1.0 - self.config.focus_decay;
    }

    /// Reward for moving the attention point from `old_attention` to
    /// `new_attention` while tracking `target`.
    pub fn score(
        &self,
        old_attention: Position,
        new_attention: Position,
        target: Option<Position>,
        perception: &Perception,
    ) -> f64 {
        let Some(target) = target else {
            return self.config.lost_target_reward;
        };

        let normalized = perception.normalized_distance(new_attention, target);
        let proximity = 0.5 * 2.0f64.mul_add(-normalized, 1.0);

        let dx = new_attention.x - old_attention.x;
        let dy = new_attention.y - old_attention.y;
        let movement_angle = if dx == 0.0 && dy == 0.0 { 0.0 } else { dy.atan2(dx) };
        let target_angle = old_attention.angle_to(target);
        let delta = target_angle - movement_angle;
        let direction = direction_reward(delta.sin().atan2(delta.cos()));

        let mut reward = proximity.mul_add(
            self.weights.proximity,
            direction * self.weights.direction,
        );
        if new_attention.distance(target) <= self.config.focus_radius {
            reward += self.weights.focus;
            if old_attention.distance(new_attention) < self.config.settle_threshold {
                reward += self.weights.focus;
            }
        }
        reward
    }
}

/// Half the cosine of the angle between the step and the target bearing.
pub fn direction_reward(angle_diff: f64) -> f64 {
    let wrapped = (angle_diff + PI).rem_euclid(TAU) - PI;
    0.5 * wrapped.cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shaper() -> RewardShaper {
        RewardShaper::new(RewardConfig::default())
    }

    #[test]
    fn lost_target_is_flat_penalty() {
        let perception = Perception::new(100.0, 100.0);
        let reward = shaper().score(Position::new(0.0, 0.0), Position::new(3.0, 0.0), None, &perception);
        assert!((reward + 0.666).abs() < 1e-12);
    }

    #[test]
    fn stepping_toward_target_beats_stepping_away() {
        let perception = Perception::new(60.0, 80.0);
        let shaper = shaper();
        let target = Some(Position::new(50.0, 0.0));
        let start = Position::new(10.0, 0.0);
        let toward = shaper.score(start, Position::new(13.0, 0.0), target, &perception);
        let away = shaper.score(start, Position::new(7.0, 0.0), target, &perception);
        assert!(toward > away);

        // proximity 0.5 * (1 - 2 * 37/100) = 0.13, weighted 2.0; direction 0.5
        assert!((toward - (0.26 + 0.5)).abs() < 1e-9);
    }

    #[test]
    fn settling_on_target_earns_both_bonuses() {
        let perception = Perception::new(100.0, 0.0);
        let target = Position::new(5.0, 5.0);
        let reward = shaper().score(target, target, Some(target), &perception);
        // zero step and zero bearing: full direction term
        assert!((reward - (1.0 + 0.5 + 1.0 + 1.0)).abs() < 1e-9);
    }

    #[test]
    fn weights_decay_at_distinct_rates() {
        let mut shaper = shaper();
        shaper.decay();
        let weights = shaper.weights();
        assert!((weights.proximity - 2.0 * (1.0 - 1e-4)).abs() < 1e-15);
        assert!((weights.direction - (1.0 - 1e-5)).abs() < 1e-15);
        assert!((weights.focus - (1.0 - 1e-6)).abs() < 1e-15);
    }

    #[test]
    fn direction_reward_wraps() {
        assert!((direction_reward(0.0) - 0.5).abs() < 1e-12);
        assert!((direction_reward(PI) + 0.5).abs() < 1e-12);
        assert!((direction_reward(TAU) - 0.5).abs() < 1e-12);
    }
}
