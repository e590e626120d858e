//! Tick driver with run controls.
//!
//! [`run_simulation`] calls [`Engine::tick`] at the configured cadence
//! until one of these ends the run:
//!
//! - **Tick limit**: `max_ticks` reached
//! - **Time limit**: `max_real_time_seconds` of wall-clock time passed
//! - **Extinction**: no organism left
//! - **Stop**: [`ControlState::request_stop`] (Ctrl-C)
//! - **Learning pipeline failure**: the fatal flag raised by the pump
//!
//! Stop requests and the fatal flag are checked between ticks.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::control::{ControlState, SimulationEndReason};
use crate::engine::{Engine, TickError, TickSummary};

/// Errors that can occur during the simulation run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A tick execution failed.
    #[error("tick error: {source}")]
    Tick {
        /// The underlying tick error.
        #[from]
        source: TickError,
    },
}

/// Result of the simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The reason the simulation ended.
    pub end_reason: SimulationEndReason,
    /// The last tick summary, if any tick completed.
    pub final_summary: Option<TickSummary>,
    /// Total number of ticks executed.
    pub total_ticks: u64,
}

/// Callback invoked after each tick completes.
pub trait TickCallback: Send {
    /// Called after a tick completes successfully.
    fn on_tick(&mut self, summary: &TickSummary, engine: &Engine);
}

/// A callback that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&mut self, _summary: &TickSummary, _engine: &Engine) {}
}

/// Run the tick loop until a termination condition is met.
///
/// # Errors
///
/// Returns [`RunnerError`] if a tick fails fatally. The end reason is not
/// recorded in that case.
pub async fn run_simulation(
    engine: &mut Engine,
    control: &Arc<ControlState>,
    callback: &mut dyn TickCallback,
) -> Result<SimulationResult, RunnerError> {
    let mut last_summary: Option<TickSummary> = None;
    let mut total_ticks: u64 = 0;

    info!(
        organisms = engine.population(),
        entities = engine.entity_count(),
        tick_interval_ms = control.tick_interval_ms(),
        "Simulation starting"
    );

    loop {
        if let Some(reason) = halt_reason(control) {
            return Ok(finish(control, reason, last_summary, total_ticks));
        }

        if control.time_limit_reached() {
            info!(elapsed = control.elapsed_seconds(), "Real-time limit reached");
            return Ok(finish(
                control,
                SimulationEndReason::MaxRealTimeReached,
                last_summary,
                total_ticks,
            ));
        }

        let summary = engine.tick()?;
        total_ticks = total_ticks.saturating_add(1);
        callback.on_tick(&summary, engine);

        if summary.population == 0 {
            info!(tick = summary.tick, "No organisms left -- extinction");
            return Ok(finish(
                control,
                SimulationEndReason::Extinction,
                Some(summary),
                total_ticks,
            ));
        }

        if control.tick_limit_reached(summary.tick) {
            info!(tick = summary.tick, "Tick limit reached");
            return Ok(finish(
                control,
                SimulationEndReason::MaxTicksReached,
                Some(summary),
                total_ticks,
            ));
        }

        last_summary = Some(summary);

        let interval_ms = control.tick_interval_ms();
        if interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
}

fn halt_reason(control: &ControlState) -> Option<SimulationEndReason> {
    if control.is_fatal() {
        let reason = control.fatal_reason().unwrap_or_default();
        error!(%reason, "Learning pipeline failed");
        return Some(SimulationEndReason::LearningPipelineFailure { reason });
    }
    if control.is_stop_requested() {
        info!("Stop requested");
        return Some(SimulationEndReason::Stopped);
    }
    None
}

fn finish(
    control: &ControlState,
    end_reason: SimulationEndReason,
    final_summary: Option<TickSummary>,
    total_ticks: u64,
) -> SimulationResult {
    control.set_end_reason(end_reason.clone());
    SimulationResult {
        end_reason,
        final_summary,
        total_ticks,
    }
}

/// Log the end-of-run summary.
pub fn log_simulation_end(result: &SimulationResult) {
    info!(
        reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        final_tick = result.final_summary.as_ref().map(|s| s.tick),
        "Simulation ended"
    );

    if let Some(summary) = &result.final_summary {
        info!(
            tick = summary.tick,
            elapsed = summary.elapsed,
            population = summary.population,
            deceased = summary.deceased,
            food_items = summary.food_items,
            learning_backlog = summary.learning_backlog,
            avg_reward = summary.avg_reward,
            avg_loss = summary.avg_loss,
            "Final tick summary"
        );
    } else {
        warn!("Simulation ended with no ticks executed");
    }
}
