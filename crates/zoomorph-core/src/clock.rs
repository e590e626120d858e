//! Simulation clock.
//!
//! The tick counter is the single source of truth; simulated time is
//! derived from it as `tick * seconds_per_tick` and never accumulated
//! independently, so it cannot drift.

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,

    /// Invalid time configuration.
    #[error("invalid time configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

/// Tick counter plus the fixed simulated duration of one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationClock {
    /// Ticks completed so far.
    tick: u64,

    /// Simulated seconds per tick.
    seconds_per_tick: f64,
}

impl SimulationClock {
    /// Create a clock at tick 0.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] unless `seconds_per_tick` is
    /// positive and finite.
    pub fn new(seconds_per_tick: f64) -> Result<Self, ClockError> {
        if !seconds_per_tick.is_finite() || seconds_per_tick <= 0.0 {
            return Err(ClockError::InvalidConfig {
                reason: format!("seconds_per_tick must be positive, got {seconds_per_tick}"),
            });
        }
        Ok(Self {
            tick: 0,
            seconds_per_tick,
        })
    }

    /// Current tick.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Simulated seconds per tick.
    pub const fn dt(&self) -> f64 {
        self.seconds_per_tick
    }

    /// Simulated seconds since tick 0.
    pub fn elapsed(&self) -> f64 {
        tick_to_f64(self.tick) * self.seconds_per_tick
    }

    /// Advance by one tick and return the new tick number.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] at `u64::MAX`.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        self.tick = self.tick.checked_add(1).ok_or(ClockError::TickOverflow)?;
        Ok(self.tick)
    }
}

#[allow(clippy::cast_precision_loss)]
const fn tick_to_f64(tick: u64) -> f64 {
    tick as f64
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let clock = SimulationClock::new(0.5).unwrap();
        assert_eq!(clock.tick(), 0);
        assert!(clock.elapsed().abs() < f64::EPSILON);
    }

    #[test]
    fn elapsed_tracks_ticks() {
        let mut clock = SimulationClock::new(0.25).unwrap();
        for _ in 0..8 {
            clock.advance().unwrap();
        }
        assert_eq!(clock.tick(), 8);
        assert!((clock.elapsed() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_positive_step() {
        assert!(SimulationClock::new(0.0).is_err());
        assert!(SimulationClock::new(-1.0).is_err());
        assert!(SimulationClock::new(f64::NAN).is_err());
    }

    #[test]
    fn overflow_is_an_error() {
        let mut clock = SimulationClock {
            tick: u64::MAX,
            seconds_per_tick: 1.0,
        };
        assert!(matches!(clock.advance(), Err(ClockError::TickOverflow)));
        assert_eq!(clock.tick(), u64::MAX);
    }
}
