//! Fixed-size learning worker pool.
//!
//! Each agent is registered exactly once and assigned to the worker with
//! the fewest agents, ties broken at random. Shutdown broadcasts terminate
//! to every worker, waits up to a shared deadline, and kills whatever is
//! still running.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use zoomorph_policy::{LearnerChannels, ModelFactory, ModelSpec};
use zoomorph_types::EntityId;

use crate::error::PoolError;
use crate::host::{WorkerHost, WorkerMode};

/// Pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers.
    pub workers: usize,
    /// Process or thread hosting.
    pub mode: WorkerMode,
    /// Executable for process workers (defaults to the current executable).
    pub program: Option<PathBuf>,
    /// Arguments passed to process workers.
    pub args: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            mode: WorkerMode::Process,
            program: None,
            args: vec!["worker".to_owned()],
        }
    }
}

/// Outcome of [`WorkerPool::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// Workers that exited on their own.
    pub graceful: usize,
    /// Workers that had to be killed or detached.
    pub forced: usize,
}

/// The set of learning workers and the agent-to-worker assignment.
#[derive(Debug)]
pub struct WorkerPool {
    hosts: Vec<WorkerHost>,
    assignments: BTreeMap<EntityId, usize>,
    rng: StdRng,
}

impl WorkerPool {
    /// Start `config.workers` workers.
    pub fn start(config: &PoolConfig, factory: Arc<dyn ModelFactory>) -> Result<Self, PoolError> {
        if config.workers == 0 {
            return Err(PoolError::NoWorkers);
        }
        let program = match (&config.mode, &config.program) {
            (WorkerMode::Process, None) => {
                Some(std::env::current_exe().map_err(|source| PoolError::Spawn { worker: 0, source })?)
            }
            (_, program) => program.clone(),
        };

        let mut hosts: Vec<WorkerHost> = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let host = match (config.mode, &program) {
                (WorkerMode::Process, Some(program)) => {
                    WorkerHost::spawn_process(index, program, &config.args)
                }
                _ => WorkerHost::spawn_in_process(index, Arc::clone(&factory)),
            };
            match host {
                Ok(host) => hosts.push(host),
                Err(e) => {
                    let deadline = deadline_in(Duration::from_secs(1));
                    for started in hosts {
                        started.terminate();
                        started.finish(deadline);
                    }
                    return Err(e);
                }
            }
        }
        info!(workers = hosts.len(), mode = ?config.mode, "learning worker pool started");
        Ok(Self {
            hosts,
            assignments: BTreeMap::new(),
            rng: StdRng::from_os_rng(),
        })
    }

    /// Number of workers.
    pub fn worker_count(&self) -> usize {
        self.hosts.len()
    }

    /// Number of agents on each worker, by worker index.
    pub fn load(&self) -> Vec<usize> {
        self.hosts.iter().map(WorkerHost::agent_count).collect()
    }

    /// Index of the worker `agent_id` is assigned to.
    pub fn assignment(&self, agent_id: EntityId) -> Option<usize> {
        self.assignments.get(&agent_id).copied()
    }

    /// Register `agent_id` on the least-loaded worker.
    pub fn register(&mut self, agent_id: EntityId, spec: ModelSpec) -> Result<LearnerChannels, PoolError> {
        if self.assignments.contains_key(&agent_id) {
            return Err(PoolError::AlreadyRegistered { agent_id });
        }
        let load = self.load();
        let Some(min) = load.iter().copied().min() else {
            return Err(PoolError::NoWorkers);
        };
        let candidates: Vec<usize> = load
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n == min)
            .map(|(index, _)| index)
            .collect();
        let pick = self.rng.random_range(0..candidates.len());
        let index = candidates.get(pick).copied().unwrap_or(0);
        let host = self.hosts.get(index).ok_or(PoolError::NoWorkers)?;

        let channels = host.register(agent_id, spec)?;
        self.assignments.insert(agent_id, index);
        Ok(channels)
    }

    /// Remove `agent_id` from its worker.
    pub fn unregister(&mut self, agent_id: EntityId) -> Result<(), PoolError> {
        let index = self
            .assignments
            .remove(&agent_id)
            .ok_or(PoolError::NotRegistered { agent_id })?;
        match self.hosts.get(index) {
            Some(host) => host.unregister(agent_id),
            None => Err(PoolError::NotRegistered { agent_id }),
        }
    }

    /// Terminate every worker, waiting at most `timeout` in total.
    pub fn shutdown(&mut self, timeout: Duration) -> ShutdownReport {
        let hosts = std::mem::take(&mut self.hosts);
        self.assignments.clear();
        for host in &hosts {
            host.terminate();
        }
        let deadline = deadline_in(timeout);
        let mut report = ShutdownReport::default();
        for host in hosts {
            if host.finish(deadline) {
                report.graceful = report.graceful.saturating_add(1);
            } else {
                report.forced = report.forced.saturating_add(1);
            }
        }
        if report.forced > 0 {
            warn!(forced = report.forced, "some learning workers were stopped forcibly");
        }
        info!(graceful = report.graceful, forced = report.forced, "learning worker pool stopped");
        report
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.hosts.is_empty() {
            self.shutdown(Duration::from_millis(500));
        }
    }
}

fn deadline_in(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now)
}
