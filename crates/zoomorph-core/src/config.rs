//! Configuration loading and typed config structures.
//!
//! The canonical configuration lives in `zoomorph-config.yaml` at the
//! project root; `ZOOMORPH_CONFIG` points at another file. Every section
//! and field is optional and falls back to the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use zoomorph_agents::OrganismConfig;
use zoomorph_workers::{PoolConfig, WorkerMode};
use zoomorph_world::{FoodConfig, WorldBounds};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "ZOOMORPH_CONFIG";

/// Configuration file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "zoomorph-config.yaml";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but cannot run.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Grid, timing, and physics settings.
    #[serde(default)]
    pub world: WorldConfig,

    /// Organism counts.
    #[serde(default)]
    pub population: PopulationConfig,

    /// Food spawning.
    #[serde(default)]
    pub food: FoodConfig,

    /// Organism and learning hyperparameters.
    #[serde(default)]
    pub organism: OrganismConfig,

    /// Learning worker pool.
    #[serde(default)]
    pub learning: LearningConfig,

    /// Apply-phase fan-out.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Run boundaries.
    #[serde(default)]
    pub simulation: SimulationBoundsConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// Load from [`CONFIG_PATH_ENV`], or [`DEFAULT_CONFIG_PATH`] if unset.
    ///
    /// A missing default file yields the built-in defaults; a missing file
    /// named explicitly is an error.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(&PathBuf::from(path)),
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::from_file(path)
                } else {
                    let mut config = Self::default();
                    config.learning.apply_env_overrides();
                    config.validate()?;
                    Ok(config)
                }
            }
        }
    }

    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values for the worker pool:
    /// - `LEARNING_WORKERS` overrides `learning.workers`
    /// - `WORKER_MODE` overrides `learning.mode` (`process` / `in_process`)
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.learning.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.world.width == 0 || self.world.height == 0 {
            return Err(invalid(format!(
                "world must be at least 1x1, got {}x{}",
                self.world.width, self.world.height
            )));
        }
        if self.world.seconds_per_tick <= 0.0 || !self.world.seconds_per_tick.is_finite() {
            return Err(invalid("world.seconds_per_tick must be positive".to_owned()));
        }
        if self.learning.workers == 0 {
            return Err(invalid("learning.workers must be at least 1".to_owned()));
        }
        if self.food.spawners.iter().any(|spawner| spawner.spawn_frequency <= 0.0) {
            return Err(invalid("food spawner spawn_frequency must be positive".to_owned()));
        }
        self.organism
            .validate()
            .map_err(|err| invalid(err.to_string()))
    }
}

fn invalid(reason: String) -> ConfigError {
    ConfigError::Invalid { reason }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Grid, timing, and physics.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorldConfig {
    /// Columns.
    #[serde(default = "default_world_size")]
    pub width: u32,

    /// Rows.
    #[serde(default = "default_world_size")]
    pub height: u32,

    /// Seed for placement and spawning; `None` draws from the OS.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Real-time milliseconds between ticks (0 runs flat out).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Simulated seconds per tick.
    #[serde(default = "default_seconds_per_tick")]
    pub seconds_per_tick: f64,

    /// Distance within which a mover touches other entities.
    #[serde(default = "default_collision_range")]
    pub collision_range: f64,

    /// Retired snapshots kept in the history ring.
    #[serde(default = "default_history_length")]
    pub history_length: usize,

    /// Width of the extent perception distances are normalised by.
    #[serde(default = "default_perception_extent")]
    pub perception_width: f64,

    /// Height of the extent perception distances are normalised by.
    #[serde(default = "default_perception_extent")]
    pub perception_height: f64,
}

impl WorldConfig {
    /// World bounds.
    pub const fn bounds(&self) -> WorldBounds {
        WorldBounds::new(self.width, self.height)
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: default_world_size(),
            height: default_world_size(),
            seed: None,
            tick_interval_ms: default_tick_interval_ms(),
            seconds_per_tick: default_seconds_per_tick(),
            collision_range: default_collision_range(),
            history_length: default_history_length(),
            perception_width: default_perception_extent(),
            perception_height: default_perception_extent(),
        }
    }
}

/// Organism counts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PopulationConfig {
    /// Organisms placed at start-up.
    #[serde(default = "default_starting_organisms")]
    pub starting_organisms: usize,

    /// Reproduction is blocked at this many living organisms.
    #[serde(default = "default_max_organisms")]
    pub max_organisms: usize,

    /// Starting organisms are placed within this many cells of the centre.
    #[serde(default = "default_spawn_spread")]
    pub spawn_spread: i64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            starting_organisms: default_starting_organisms(),
            max_organisms: default_max_organisms(),
            spawn_spread: default_spawn_spread(),
        }
    }
}

/// Learning worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LearningConfig {
    /// Number of workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Child processes or in-process threads.
    #[serde(default)]
    pub mode: WorkerMode,

    /// Worker executable; defaults to the running binary.
    #[serde(default)]
    pub program: Option<PathBuf>,

    /// Total time allowed for workers to exit at shutdown.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Sleep between result polls when nothing arrived.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl LearningConfig {
    /// Override pool settings with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Some(workers) = std::env::var("LEARNING_WORKERS")
            .ok()
            .and_then(|val| val.trim().parse().ok())
        {
            self.workers = workers;
        }
        if let Ok(val) = std::env::var("WORKER_MODE") {
            match val.trim().to_lowercase().as_str() {
                "process" => self.mode = WorkerMode::Process,
                "in_process" | "thread" => self.mode = WorkerMode::InProcess,
                _ => {}
            }
        }
    }

    /// Settings for [`zoomorph_workers::WorkerPool::start`].
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            mode: self.mode,
            program: self.program.clone(),
            ..PoolConfig::default()
        }
    }

    /// Shutdown budget.
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Result poll interval.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            mode: WorkerMode::default(),
            program: None,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Apply-phase fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Run per-entity `apply` on a thread pool.
    #[serde(default = "default_true")]
    pub parallel_apply: bool,

    /// Size of that pool (0 lets rayon decide).
    #[serde(default = "default_apply_threads")]
    pub apply_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel_apply: true,
            apply_threads: default_apply_threads(),
        }
    }
}

/// Run boundaries. Zero means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SimulationBoundsConfig {
    /// Stop after this many ticks.
    #[serde(default)]
    pub max_ticks: u64,

    /// Stop after this many wall-clock seconds.
    #[serde(default)]
    pub max_real_time_seconds: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Ticks between `info` population summaries (0 disables them).
    #[serde(default = "default_summary_interval_ticks")]
    pub summary_interval_ticks: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            summary_interval_ticks: default_summary_interval_ticks(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_world_size() -> u32 {
    800
}
const fn default_tick_interval_ms() -> u64 {
    33
}
fn default_seconds_per_tick() -> f64 {
    0.033
}
fn default_collision_range() -> f64 {
    2.0
}
const fn default_history_length() -> usize {
    10
}
fn default_perception_extent() -> f64 {
    400.0
}
const fn default_starting_organisms() -> usize {
    10
}
const fn default_max_organisms() -> usize {
    12
}
const fn default_spawn_spread() -> i64 {
    20
}
const fn default_workers() -> usize {
    4
}
const fn default_shutdown_timeout_ms() -> u64 {
    5000
}
const fn default_poll_interval_ms() -> u64 {
    2
}
const fn default_true() -> bool {
    true
}
const fn default_apply_threads() -> usize {
    4
}
fn default_log_level() -> String {
    "info".to_owned()
}
const fn default_summary_interval_ticks() -> u64 {
    100
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let config: SimulationConfig = serde_yml::from_str("{}").unwrap();
        assert_eq!(config.world.width, 800);
        assert_eq!(config.population.max_organisms, 12);
        assert_eq!(config.food.max_food_items, 32);
        assert_eq!(config.organism.frame_skip, 4);
        assert_eq!(config.learning.mode, WorkerMode::Process);
        assert!(config.engine.parallel_apply);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.summary_interval_ticks, 100);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let yaml = r"
world:
  width: 64
  height: 32
  seed: 7
learning:
  mode: in_process
food:
  max_food_items: 5
organism:
  frame_skip: 2
";
        let config: SimulationConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.world.bounds(), WorldBounds::new(64, 32));
        assert_eq!(config.world.seed, Some(7));
        assert_eq!(config.learning.mode, WorkerMode::InProcess);
        assert_eq!(config.learning.workers, 4);
        assert_eq!(config.food.max_food_items, 5);
        assert_eq!(config.food.spawners.len(), 1);
        assert_eq!(config.organism.frame_skip, 2);
        assert!((config.world.collision_range - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn validation_rejects_empty_world() {
        let mut config = SimulationConfig::default();
        config.world.width = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn validation_rejects_bad_organism() {
        let mut config = SimulationConfig::default();
        config.organism.frame_skip = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn pool_config_follows_learning_section() {
        let learning = LearningConfig {
            workers: 2,
            mode: WorkerMode::InProcess,
            ..LearningConfig::default()
        };
        let pool = learning.pool_config();
        assert_eq!(pool.workers, 2);
        assert_eq!(pool.mode, WorkerMode::InProcess);
        assert_eq!(pool.args, vec!["worker".to_owned()]);
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let yaml = include_str!("../../../zoomorph-config.yaml");
        let config: SimulationConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config, SimulationConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn bad_yaml_is_a_parse_error() {
        assert!(matches!(
            SimulationConfig::parse("world: [unclosed"),
            Err(ConfigError::Yaml { .. })
        ));
    }
}
