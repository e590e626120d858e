//! Rolling learning statistics for one organism.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;
use zoomorph_types::Action;

use crate::learn::TrainMetrics;

const LOSS_WINDOW: usize = 100;
const ACTION_WINDOW: usize = 1000;

/// Fixed-window running mean.
#[derive(Debug, Clone)]
struct RollingMean {
    values: VecDeque<f32>,
    window: usize,
}

impl RollingMean {
    fn new(window: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(window),
            window,
        }
    }

    fn push(&mut self, value: f32) {
        if !value.is_finite() {
            return;
        }
        if self.values.len() >= self.window {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.values.iter().copied().map(f64::from).sum();
        sum / count_as_f64(self.values.len())
    }
}

/// Accumulates training, reward, and action statistics.
#[derive(Debug, Clone)]
pub struct LearningMetrics {
    losses: RollingMean,
    q_values: RollingMean,
    rewards: RollingMean,
    actions: VecDeque<Action>,
    training_steps: u64,
    target_updates: u64,
    inference_updates: u64,
}

impl Default for LearningMetrics {
    fn default() -> Self {
        Self {
            losses: RollingMean::new(LOSS_WINDOW),
            q_values: RollingMean::new(LOSS_WINDOW),
            rewards: RollingMean::new(LOSS_WINDOW),
            actions: VecDeque::with_capacity(ACTION_WINDOW),
            training_steps: 0,
            target_updates: 0,
            inference_updates: 0,
        }
    }
}

impl LearningMetrics {
    /// Fold in the statistics of one completed training step.
    pub fn record_training(&mut self, metrics: &TrainMetrics) {
        self.losses.push(metrics.loss);
        self.q_values.push(metrics.mean_q);
        self.training_steps = self.training_steps.saturating_add(1);
        if metrics.target_updated {
            self.target_updates = self.target_updates.saturating_add(1);
        }
        if metrics.weights_published {
            self.inference_updates = self.inference_updates.saturating_add(1);
        }
    }

    /// Record a completed reward.
    pub fn record_reward(&mut self, reward: f32) {
        self.rewards.push(reward);
    }

    /// Record a chosen action.
    pub fn record_action(&mut self, action: Action) {
        if self.actions.len() >= ACTION_WINDOW {
            self.actions.pop_front();
        }
        self.actions.push_back(action);
    }

    /// Point-in-time copy of the statistics.
    pub fn stats(&self) -> LearningStats {
        let mut counts: BTreeMap<Action, usize> = Action::ALL.iter().map(|a| (*a, 0)).collect();
        for action in &self.actions {
            if let Some(count) = counts.get_mut(action) {
                *count = count.saturating_add(1);
            }
        }
        let total = count_as_f64(self.actions.len()).max(1.0);
        let action_distribution = counts
            .into_iter()
            .map(|(action, count)| (action, count_as_f64(count) / total))
            .collect();

        LearningStats {
            avg_loss: self.losses.mean(),
            avg_q: self.q_values.mean(),
            avg_reward: self.rewards.mean(),
            training_steps: self.training_steps,
            target_updates: self.target_updates,
            inference_updates: self.inference_updates,
            action_distribution,
        }
    }
}

/// Snapshot of [`LearningMetrics`].
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LearningStats {
    /// Mean loss over the last 100 training steps.
    pub avg_loss: f64,
    /// Mean predicted action value over the last 100 training steps.
    pub avg_q: f64,
    /// Mean reward over the last 100 completed experiences.
    pub avg_reward: f64,
    /// Training steps whose results have been applied.
    pub training_steps: u64,
    /// Target network synchronisations reported by the learner.
    pub target_updates: u64,
    /// Inference weight publications reported by the learner.
    pub inference_updates: u64,
    /// Share of each action over the last 1000 selections.
    pub action_distribution: BTreeMap<Action, f64>,
}

pub(crate) fn count_as_f64(count: usize) -> f64 {
    f64::from(u32::try_from(count).unwrap_or(u32::MAX))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rolling_mean_forgets_old_values() {
        let mut mean = RollingMean::new(2);
        mean.push(10.0);
        mean.push(2.0);
        mean.push(4.0);
        assert!((mean.mean() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn training_counters_follow_flags() {
        let mut metrics = LearningMetrics::default();
        metrics.record_training(&TrainMetrics {
            loss: 1.0,
            mean_q: 0.5,
            step: 1,
            target_updated: true,
            weights_published: true,
        });
        metrics.record_training(&TrainMetrics {
            loss: 3.0,
            mean_q: 1.5,
            step: 2,
            target_updated: false,
            weights_published: true,
        });
        let stats = metrics.stats();
        assert_eq!(stats.training_steps, 2);
        assert_eq!(stats.target_updates, 1);
        assert_eq!(stats.inference_updates, 2);
        assert!((stats.avg_loss - 2.0).abs() < 1e-9);
        assert!((stats.avg_q - 1.0).abs() < 1e-9);
    }

    #[test]
    fn action_distribution_sums_to_one() {
        let mut metrics = LearningMetrics::default();
        for _ in 0..3 {
            metrics.record_action(Action::Up);
        }
        metrics.record_action(Action::NoMove);
        let stats = metrics.stats();
        assert!((stats.action_distribution.get(&Action::Up).copied().unwrap() - 0.75).abs() < 1e-9);
        assert!((stats.action_distribution.get(&Action::NoMove).copied().unwrap() - 0.25).abs() < 1e-9);
        let total: f64 = stats.action_distribution.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_metrics_report_zeroes() {
        let stats = LearningMetrics::default().stats();
        assert!(stats.avg_reward.abs() < f64::EPSILON);
        assert_eq!(stats.action_distribution.len(), Action::COUNT);
    }
}
