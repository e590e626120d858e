//! Learner registry and the learning result pump.
//!
//! Training results arrive on each organism's result channel in completion
//! order. The pump is a plain thread that drains every registered runtime
//! in a loop, so result processing never runs on the tick path. The first
//! pipeline failure raises the fatal flag on [`ControlState`] and stops the
//! pump; the tick driver sees the flag at the next tick boundary.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, error, info};
use zoomorph_policy::{PolicyError, PolicyRuntime};
use zoomorph_types::EntityId;

use crate::control::ControlState;

/// Policy runtimes of every living organism, shared by the engine and the
/// pump.
#[derive(Debug, Default)]
pub struct LearnerRegistry {
    runtimes: RwLock<BTreeMap<EntityId, Arc<PolicyRuntime>>>,
}

impl LearnerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a runtime under its agent id.
    pub fn insert(&self, runtime: Arc<PolicyRuntime>) {
        self.runtimes.write().insert(runtime.agent_id(), runtime);
    }

    /// Remove a runtime. Results still queued for it are dropped with it.
    pub fn remove(&self, agent_id: EntityId) -> Option<Arc<PolicyRuntime>> {
        self.runtimes.write().remove(&agent_id)
    }

    /// A runtime by agent id.
    pub fn get(&self, agent_id: EntityId) -> Option<Arc<PolicyRuntime>> {
        self.runtimes.read().get(&agent_id).cloned()
    }

    /// Number of registered runtimes.
    pub fn len(&self) -> usize {
        self.runtimes.read().len()
    }

    /// Whether no runtime is registered.
    pub fn is_empty(&self) -> bool {
        self.runtimes.read().is_empty()
    }

    /// Every runtime, in agent id order.
    pub fn runtimes(&self) -> Vec<Arc<PolicyRuntime>> {
        self.runtimes.read().values().cloned().collect()
    }

    /// Sum of the learning backlogs.
    pub fn total_backlog(&self) -> usize {
        self.runtimes
            .read()
            .values()
            .fold(0usize, |total, runtime| total.saturating_add(runtime.backlog()))
    }
}

/// Apply every result that has arrived for every registered runtime.
///
/// The registry lock is released before any result is applied. Returns the
/// number of results applied, or the first pipeline error.
pub fn drain_all(registry: &LearnerRegistry) -> Result<usize, PolicyError> {
    let mut applied = 0usize;
    for runtime in registry.runtimes() {
        applied = applied.saturating_add(runtime.drain_results()?);
    }
    Ok(applied)
}

/// Background thread running [`drain_all`] until stopped or a pipeline
/// failure.
#[derive(Debug)]
pub struct LearningPump {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LearningPump {
    /// Start the pump. `idle` is the sleep between polls that applied
    /// nothing.
    ///
    /// # Errors
    ///
    /// Fails if the OS refuses to spawn the thread.
    pub fn spawn(
        registry: Arc<LearnerRegistry>,
        control: Arc<ControlState>,
        idle: Duration,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("learning-pump".to_owned())
            .spawn(move || pump_loop(&registry, &control, &flag, idle))?;
        info!("learning pump started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Whether the pump thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the pump and join its thread.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("learning pump thread panicked");
        }
    }
}

impl Drop for LearningPump {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump_loop(registry: &LearnerRegistry, control: &ControlState, stop: &AtomicBool, idle: Duration) {
    let mut total = 0u64;
    while !stop.load(Ordering::Acquire) {
        match drain_all(registry) {
            Ok(0) => std::thread::sleep(idle),
            Ok(applied) => {
                total = total.saturating_add(u64::try_from(applied).unwrap_or(u64::MAX));
            }
            Err(e) => {
                error!(error = %e, fatal = e.is_fatal(), "learning pipeline failed, stopping simulation");
                control.raise_fatal(e.to_string());
                break;
            }
        }
    }
    debug!(results_applied = total, "learning pump exiting");
}
