//! Parent-side handle on one learning worker.
//!
//! A host owns the worker's command channel and a routing table from agent
//! id to that agent's result channel. Replies coming back from the worker
//! are routed by a dedicated thread; a reply for an agent that is no longer
//! registered is dropped.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};
use zoomorph_policy::{
    LearnOutcome, LearnRequest, LearnSink, LearnerChannels, ModelFactory, ModelSpec, PolicyError,
};
use zoomorph_types::EntityId;

use crate::error::PoolError;
use crate::protocol::{WorkerCommand, WorkerReply, decode_line, encode_line};
use crate::worker::WorkerCore;

/// Environment variable carrying a child worker's index.
pub const WORKER_INDEX_ENV: &str = "ZOOMORPH_WORKER_INDEX";

/// How workers are hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// One child process per worker.
    #[default]
    Process,
    /// One thread per worker inside the simulation process.
    InProcess,
}

type Routes = Arc<Mutex<BTreeMap<EntityId, UnboundedSender<LearnOutcome>>>>;

enum Backend {
    Process { child: Child },
    InProcess,
}

/// Handle on one worker.
pub struct WorkerHost {
    index: usize,
    commands: UnboundedSender<WorkerCommand>,
    routes: Routes,
    backend: Backend,
    threads: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHost")
            .field("index", &self.index)
            .field("agents", &self.agent_count())
            .finish_non_exhaustive()
    }
}

/// [`LearnSink`] that forwards requests to one worker.
struct WorkerLink {
    agent_id: EntityId,
    commands: UnboundedSender<WorkerCommand>,
}

impl LearnSink for WorkerLink {
    fn submit(&self, request: LearnRequest) -> Result<(), PolicyError> {
        self.commands
            .send(WorkerCommand::Learn {
                agent_id: self.agent_id,
                request,
            })
            .map_err(|e| PolicyError::Dispatch {
                agent_id: self.agent_id,
                reason: e.to_string(),
            })
    }
}

impl WorkerHost {
    /// Start a child worker process running `program args...`.
    pub fn spawn_process(index: usize, program: &Path, args: &[String]) -> Result<Self, PoolError> {
        let spawn_error = |source| PoolError::Spawn {
            worker: index,
            source,
        };
        let mut child = Command::new(program)
            .args(args)
            .env(WORKER_INDEX_ENV, index.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(spawn_error)?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(spawn_error(std::io::Error::other("worker pipes unavailable")));
        };

        let routes = Routes::default();
        let (commands, outbox) = mpsc::unbounded_channel();
        let writer = thread::Builder::new()
            .name(format!("worker-{index}-writer"))
            .spawn(move || write_commands(index, stdin, outbox))
            .map_err(spawn_error)?;
        let reader_routes = Arc::clone(&routes);
        let reader = thread::Builder::new()
            .name(format!("worker-{index}-reader"))
            .spawn(move || read_replies(index, stdout, &reader_routes))
            .map_err(spawn_error)?;

        info!(worker = index, pid = child.id(), "learning worker process started");
        Ok(Self {
            index,
            commands,
            routes,
            backend: Backend::Process { child },
            threads: vec![writer, reader],
        })
    }

    /// Start a worker on a thread of this process.
    pub fn spawn_in_process(index: usize, factory: Arc<dyn ModelFactory>) -> Result<Self, PoolError> {
        let spawn_error = |source| PoolError::Spawn {
            worker: index,
            source,
        };
        let routes = Routes::default();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (replies, reply_rx) = mpsc::unbounded_channel();

        let core = WorkerCore::new(factory, replies);
        let worker = thread::Builder::new()
            .name(format!("worker-{index}"))
            .spawn(move || core.run(command_rx))
            .map_err(spawn_error)?;
        let router_routes = Arc::clone(&routes);
        let router = thread::Builder::new()
            .name(format!("worker-{index}-router"))
            .spawn(move || route_replies(reply_rx, &router_routes))
            .map_err(spawn_error)?;

        info!(worker = index, "learning worker thread started");
        Ok(Self {
            index,
            commands,
            routes,
            backend: Backend::InProcess,
            threads: vec![worker, router],
        })
    }

    /// Position of this worker in the pool.
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Number of agents routed to this worker.
    pub fn agent_count(&self) -> usize {
        self.routes.lock().len()
    }

    /// Create a learner for `agent_id` and return its channel pair.
    pub fn register(&self, agent_id: EntityId, spec: ModelSpec) -> Result<LearnerChannels, PoolError> {
        let (results_tx, results) = mpsc::unbounded_channel();
        self.routes.lock().insert(agent_id, results_tx);
        if self
            .commands
            .send(WorkerCommand::Register { agent_id, spec })
            .is_err()
        {
            self.routes.lock().remove(&agent_id);
            return Err(PoolError::Disconnected { worker: self.index });
        }
        Ok(LearnerChannels {
            requests: Box::new(WorkerLink {
                agent_id,
                commands: self.commands.clone(),
            }),
            results,
        })
    }

    /// Stop the learner for `agent_id` and forget its route.
    pub fn unregister(&self, agent_id: EntityId) -> Result<(), PoolError> {
        self.routes.lock().remove(&agent_id);
        self.commands
            .send(WorkerCommand::Unregister { agent_id })
            .map_err(|_closed| PoolError::Disconnected { worker: self.index })
    }

    /// Ask the worker to stop every learner and exit.
    pub fn terminate(&self) {
        if self.commands.send(WorkerCommand::Terminate).is_err() {
            debug!(worker = self.index, "worker command channel already closed");
        }
    }

    fn has_exited(&mut self) -> bool {
        match &mut self.backend {
            Backend::Process { child } => matches!(child.try_wait(), Ok(Some(_)) | Err(_)),
            Backend::InProcess => self
                .threads
                .first()
                .is_none_or(JoinHandle::is_finished),
        }
    }

    /// Wait until the worker has exited or `deadline` passes.
    ///
    /// Returns `true` if the worker exited on its own. Stragglers are
    /// killed (process) or detached (thread).
    pub fn finish(mut self, deadline: Instant) -> bool {
        let mut exited = self.has_exited();
        while !exited && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
            exited = self.has_exited();
        }

        if !exited {
            match &mut self.backend {
                Backend::Process { child } => {
                    warn!(worker = self.index, "worker did not exit in time, killing");
                    if let Err(e) = child.kill() {
                        error!(worker = self.index, error = %e, "failed to kill worker");
                    }
                    let _ = child.wait();
                }
                Backend::InProcess => {
                    warn!(worker = self.index, "worker thread did not exit in time, detaching");
                    self.routes.lock().clear();
                    return false;
                }
            }
        }

        self.routes.lock().clear();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!(worker = self.index, "worker thread panicked");
            }
        }
        info!(worker = self.index, graceful = exited, "learning worker stopped");
        exited
    }
}

fn write_commands(index: usize, mut stdin: ChildStdin, mut outbox: UnboundedReceiver<WorkerCommand>) {
    while let Some(command) = outbox.blocking_recv() {
        let terminate = matches!(command, WorkerCommand::Terminate);
        let written = encode_line(&command).and_then(|line| {
            stdin.write_all(line.as_bytes())?;
            stdin.flush()?;
            Ok(())
        });
        if let Err(e) = written {
            error!(worker = index, error = %e, "failed to send command to worker");
            break;
        }
        if terminate {
            break;
        }
    }
}

fn read_replies(index: usize, stdout: ChildStdout, routes: &Routes) {
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!(worker = index, error = %e, "failed to read from worker");
                break;
            }
        };
        match decode_line::<WorkerReply>(&line) {
            Ok(reply) => route(routes, reply),
            Err(e) => error!(worker = index, error = %e, "malformed reply from worker"),
        }
    }
    debug!(worker = index, "worker output closed");
}

fn route_replies(mut replies: UnboundedReceiver<WorkerReply>, routes: &Routes) {
    while let Some(reply) = replies.blocking_recv() {
        route(routes, reply);
    }
}

fn route(routes: &Routes, reply: WorkerReply) {
    let agent_id = reply.agent_id();
    let sender = routes.lock().get(&agent_id).cloned();
    match sender {
        Some(sender) => {
            let _ = sender.send(reply.into_outcome());
        }
        None => debug!(%agent_id, "dropping reply for unregistered agent"),
    }
}
