//! Shared run-control state.
//!
//! One [`ControlState`] is wrapped in [`std::sync::Arc`] and shared by the
//! tick loop, the learning pump thread, and the signal handler. The hot
//! path (stop / fatal checks) is lock-free.
//!
//! A fatal error is different from a stop request: it records a reason and
//! makes the run end with [`SimulationEndReason::LearningPipelineFailure`]
//! instead of a clean stop. It is raised from the pump thread, so it is
//! synchronous.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::config::SimulationBoundsConfig;

/// Reason why the simulation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationEndReason {
    /// Reached the configured `max_ticks` limit.
    MaxTicksReached,
    /// Reached the configured `max_real_time_seconds` limit.
    MaxRealTimeReached,
    /// A stop was requested (Ctrl-C or caller).
    Stopped,
    /// No organisms remain.
    Extinction,
    /// A training result or worker failure poisoned the learning pipeline.
    LearningPipelineFailure {
        /// The first fatal error reported.
        reason: String,
    },
}

/// Shared control state.
#[derive(Debug)]
pub struct ControlState {
    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Whether a fatal error has been raised.
    fatal: AtomicBool,

    /// First fatal reason.
    fatal_reason: Mutex<Option<String>>,

    /// Pause between ticks in milliseconds (0 = none).
    tick_interval_ms: u64,

    /// Wall-clock time when the simulation started.
    started_at: DateTime<Utc>,

    /// Maximum number of ticks (0 = unlimited).
    max_ticks: u64,

    /// Maximum wall-clock seconds (0 = unlimited).
    max_real_time_seconds: u64,

    /// Reason the simulation ended, if it has.
    end_reason: Mutex<Option<SimulationEndReason>>,
}

impl ControlState {
    /// Create control state from configuration.
    pub fn new(tick_interval_ms: u64, bounds: &SimulationBoundsConfig) -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
            fatal_reason: Mutex::new(None),
            tick_interval_ms,
            started_at: Utc::now(),
            max_ticks: bounds.max_ticks,
            max_real_time_seconds: bounds.max_real_time_seconds,
            end_reason: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Stop / Fatal
    // -----------------------------------------------------------------------

    /// Request a clean simulation stop.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Raise the global fatal flag. Only the first reason is kept.
    pub fn raise_fatal(&self, reason: impl Into<String>) {
        {
            let mut guard = self.fatal_reason.lock();
            if guard.is_none() {
                *guard = Some(reason.into());
            }
        }
        self.fatal.store(true, Ordering::Release);
    }

    /// Whether a fatal error has been raised.
    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }

    /// The first fatal reason, if any.
    pub fn fatal_reason(&self) -> Option<String> {
        self.fatal_reason.lock().clone()
    }

    /// Whether the tick loop must stop at the next boundary.
    pub fn should_halt(&self) -> bool {
        self.is_stop_requested() || self.is_fatal()
    }

    /// Record the reason the simulation ended.
    pub fn set_end_reason(&self, reason: SimulationEndReason) {
        *self.end_reason.lock() = Some(reason);
    }

    /// Get the reason the simulation ended, if it has.
    pub fn end_reason(&self) -> Option<SimulationEndReason> {
        self.end_reason.lock().clone()
    }

    // -----------------------------------------------------------------------
    // Tick Pacing
    // -----------------------------------------------------------------------

    /// Get the tick interval in milliseconds.
    pub const fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms
    }

    // -----------------------------------------------------------------------
    // Boundaries
    // -----------------------------------------------------------------------

    /// Returns `true` if `max_ticks > 0` and `current_tick >= max_ticks`.
    pub const fn tick_limit_reached(&self, current_tick: u64) -> bool {
        self.max_ticks > 0 && current_tick >= self.max_ticks
    }

    /// Returns `true` if `max_real_time_seconds > 0` and that many
    /// wall-clock seconds have passed since start.
    pub fn time_limit_reached(&self) -> bool {
        self.max_real_time_seconds > 0 && self.elapsed_seconds() >= self.max_real_time_seconds
    }

    /// Return the wall-clock start time.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Return elapsed seconds since simulation start.
    pub fn elapsed_seconds(&self) -> u64 {
        let elapsed = Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds();
        u64::try_from(elapsed.max(0)).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unbounded() -> SimulationBoundsConfig {
        SimulationBoundsConfig::default()
    }

    #[test]
    fn initial_state_is_running() {
        let state = ControlState::new(50, &unbounded());
        assert!(!state.should_halt());
        assert_eq!(state.tick_interval_ms(), 50);
        assert_eq!(state.end_reason(), None);
    }

    #[test]
    fn stop_request_is_not_fatal() {
        let state = ControlState::new(50, &unbounded());
        state.request_stop();
        assert!(state.is_stop_requested());
        assert!(state.should_halt());
        assert!(!state.is_fatal());
        assert_eq!(state.fatal_reason(), None);
    }

    #[test]
    fn first_fatal_reason_wins() {
        let state = ControlState::new(50, &unbounded());
        state.raise_fatal("worker 0 crashed");
        state.raise_fatal("worker 1 crashed");
        assert!(state.is_fatal());
        assert!(state.should_halt());
        assert!(!state.is_stop_requested());
        assert_eq!(state.fatal_reason().as_deref(), Some("worker 0 crashed"));
    }

    #[test]
    fn tick_limits() {
        let bounds = SimulationBoundsConfig {
            max_ticks: 100,
            max_real_time_seconds: 0,
        };
        let state = ControlState::new(50, &bounds);
        assert!(!state.tick_limit_reached(99));
        assert!(state.tick_limit_reached(100));
        assert!(!ControlState::new(50, &unbounded()).tick_limit_reached(u64::MAX));
        assert!(!state.time_limit_reached());
    }
}
