//! Simulation binary for Zoomorph.
//!
//! Run without arguments it drives the simulation; run as
//! `zoomorph-engine worker` it becomes a learning worker that speaks the
//! line protocol on stdin/stdout (the pool starts these itself).
//!
//! # Startup Sequence
//!
//! 1. Load configuration (`ZOOMORPH_CONFIG` or `zoomorph-config.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Start the learning worker pool
//! 4. Create the engine and place spawners and starting organisms
//! 5. Start the learning result pump and the Ctrl-C handler
//! 6. Run the tick loop until a termination condition is met
//! 7. Stop the pump, shut the workers down, log the result

mod error;
mod stats_callback;

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use zoomorph_core::config::SimulationConfig;
use zoomorph_core::control::{ControlState, SimulationEndReason};
use zoomorph_core::engine::Engine;
use zoomorph_core::pump::{LearnerRegistry, LearningPump};
use zoomorph_core::runner;
use zoomorph_policy::{MlpFactory, ModelFactory};
use zoomorph_workers::WorkerPool;

use crate::error::EngineError;
use crate::stats_callback::StatsCallback;

/// Argument that switches the binary into learning worker mode.
const WORKER_ARG: &str = "worker";

fn main() -> ExitCode {
    let outcome = if std::env::args().nth(1).as_deref() == Some(WORKER_ARG) {
        run_worker()
    } else {
        run_engine()
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "zoomorph-engine failed");
            eprintln!("zoomorph-engine: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Serve learning requests for the parent process until told to stop.
fn run_worker() -> Result<(), EngineError> {
    init_logging("info")?;
    let factory: Arc<dyn ModelFactory> = Arc::new(MlpFactory);
    zoomorph_workers::serve_stdio(factory)?;
    Ok(())
}

fn run_engine() -> Result<(), EngineError> {
    // 1. Load configuration.
    let config = SimulationConfig::load()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging.level)?;
    info!(
        width = config.world.width,
        height = config.world.height,
        seed = config.world.seed,
        tick_interval_ms = config.world.tick_interval_ms,
        workers = config.learning.workers,
        mode = ?config.learning.mode,
        "Configuration loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("zoomorph-rt")
        .build()?;
    runtime.block_on(simulate(config))
}

async fn simulate(config: SimulationConfig) -> Result<(), EngineError> {
    // 3. Start the learning workers.
    let factory: Arc<dyn ModelFactory> = Arc::new(MlpFactory);
    let pool = WorkerPool::start(&config.learning.pool_config(), Arc::clone(&factory))?;
    info!(workers = config.learning.workers, "Learning worker pool started");

    // 4. Create and populate the world.
    let learners = Arc::new(LearnerRegistry::new());
    let shutdown_timeout = config.learning.shutdown_timeout();
    let mut engine = Engine::new(config.clone(), factory, pool, Arc::clone(&learners))?;
    if let Err(e) = engine.populate() {
        let report = engine.shutdown(shutdown_timeout);
        warn!(graceful = report.graceful, forced = report.forced, "Workers stopped after failed start-up");
        return Err(e.into());
    }

    // 5. Run controls, result pump, Ctrl-C.
    let control = Arc::new(ControlState::new(
        config.world.tick_interval_ms,
        &config.simulation,
    ));
    info!(
        max_ticks = config.simulation.max_ticks,
        max_real_time_seconds = config.simulation.max_real_time_seconds,
        "Run controls initialized"
    );
    let mut pump = LearningPump::spawn(
        Arc::clone(&learners),
        Arc::clone(&control),
        config.learning.poll_interval(),
    )?;
    let signal_control = Arc::clone(&control);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, stopping after the current tick");
                signal_control.request_stop();
            }
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
        }
    });

    // 6. Run the simulation.
    let mut callback = StatsCallback::new(config.logging.summary_interval_ticks);
    let result = runner::run_simulation(&mut engine, &control, &mut callback).await;

    // 7. Tear down, whatever the outcome.
    pump.stop();
    let report = engine.shutdown(shutdown_timeout);
    info!(
        graceful = report.graceful,
        forced = report.forced,
        "Learning workers stopped"
    );

    let result = result?;
    runner::log_simulation_end(&result);
    if let SimulationEndReason::LearningPipelineFailure { reason } = &result.end_reason {
        error!(%reason, "Simulation stopped by a learning pipeline failure");
    }
    info!(
        end_reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        deceased = engine.deceased(),
        "zoomorph-engine shutdown complete"
    );
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
///
/// Output goes to stderr: in worker mode stdout carries the protocol.
fn init_logging(default_level: &str) -> Result<(), EngineError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| EngineError::Logging {
            message: e.to_string(),
        })
}
