//! Tick callback that logs a population summary every few ticks.

use tracing::info;
use zoomorph_core::engine::{Engine, TickSummary};
use zoomorph_core::runner::TickCallback;

/// Logs the [`TickSummary`] at `info` every `interval` ticks.
#[derive(Debug, Clone)]
pub struct StatsCallback {
    interval: u64,
}

impl StatsCallback {
    /// `interval` of 0 disables the summaries.
    pub const fn new(interval: u64) -> Self {
        Self { interval }
    }

    const fn is_due(&self, tick: u64) -> bool {
        matches!(tick.checked_rem(self.interval), Some(0))
    }
}

impl TickCallback for StatsCallback {
    fn on_tick(&mut self, summary: &TickSummary, engine: &Engine) {
        if !self.is_due(summary.tick) {
            return;
        }
        info!(
            tick = summary.tick,
            elapsed = summary.elapsed,
            population = summary.population,
            deceased = summary.deceased,
            food_items = summary.food_items,
            backlog = summary.learning_backlog,
            avg_reward = summary.avg_reward,
            avg_loss = summary.avg_loss,
            worker_load = ?engine.worker_load(),
            "population summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_on_multiples_only() {
        let callback = StatsCallback::new(10);
        assert!(callback.is_due(10));
        assert!(callback.is_due(20));
        assert!(!callback.is_due(15));
    }

    #[test]
    fn zero_interval_never_fires() {
        let callback = StatsCallback::new(0);
        assert!(!callback.is_due(0));
        assert!(!callback.is_due(100));
    }
}
