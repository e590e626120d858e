//! The worker side of the learning pipeline.
//!
//! A [`WorkerCore`] owns one learner model and one handler thread per
//! registered agent. The handler pops requests from the agent's inbox,
//! runs the training step, and posts a [`WorkerReply`]. A `None` in the
//! inbox is the stop sentinel.
//!
//! [`serve_stdio`] wraps a core in the line protocol on stdin/stdout; it
//! is what a child worker process runs.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use zoomorph_policy::{LearnRequest, ModelFactory, ModelSpec, PolicyModel, TrainOutput};
use zoomorph_types::EntityId;

use crate::error::WorkerError;
use crate::protocol::{WorkerCommand, WorkerReply, decode_line, encode_line};

/// Whether the command loop should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep going.
    Continue,
    /// A terminate command was received.
    Terminate,
}

struct AgentHandler {
    inbox: UnboundedSender<Option<LearnRequest>>,
    thread: JoinHandle<()>,
}

/// Per-agent learners and their handler threads.
pub struct WorkerCore {
    factory: Arc<dyn ModelFactory>,
    replies: UnboundedSender<WorkerReply>,
    handlers: BTreeMap<EntityId, AgentHandler>,
}

impl std::fmt::Debug for WorkerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerCore")
            .field("agents", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl WorkerCore {
    /// Create an empty core posting replies to `replies`.
    pub fn new(factory: Arc<dyn ModelFactory>, replies: UnboundedSender<WorkerReply>) -> Self {
        Self {
            factory,
            replies,
            handlers: BTreeMap::new(),
        }
    }

    /// Number of agents with a live handler.
    pub fn agent_count(&self) -> usize {
        self.handlers.len()
    }

    /// Carry out one command.
    pub fn handle(&mut self, command: WorkerCommand) -> Result<Flow, WorkerError> {
        match command {
            WorkerCommand::Register { agent_id, spec } => {
                self.register(agent_id, &spec)?;
                Ok(Flow::Continue)
            }
            WorkerCommand::Learn { agent_id, request } => {
                self.enqueue(agent_id, request);
                Ok(Flow::Continue)
            }
            WorkerCommand::Unregister { agent_id } => {
                self.unregister(agent_id);
                Ok(Flow::Continue)
            }
            WorkerCommand::Terminate => {
                self.shutdown();
                Ok(Flow::Terminate)
            }
        }
    }

    fn register(&mut self, agent_id: EntityId, spec: &ModelSpec) -> Result<(), WorkerError> {
        if self.handlers.contains_key(&agent_id) {
            warn!(%agent_id, "agent registered twice, keeping existing learner");
            return Ok(());
        }
        let model = match self.factory.build(spec) {
            Ok(model) => model,
            Err(e) => {
                self.fail(agent_id, format!("failed to build learner: {e}"));
                return Ok(());
            }
        };
        let (inbox, requests) = mpsc::unbounded_channel();
        let replies = self.replies.clone();
        let thread = thread::Builder::new()
            .name(format!("learner-{}", agent_id.short()))
            .spawn(move || handler_loop(agent_id, model, requests, &replies))?;
        self.handlers.insert(agent_id, AgentHandler { inbox, thread });
        debug!(%agent_id, agents = self.handlers.len(), "learner registered");
        Ok(())
    }

    fn enqueue(&self, agent_id: EntityId, request: LearnRequest) {
        let delivered = self
            .handlers
            .get(&agent_id)
            .is_some_and(|handler| handler.inbox.send(Some(request)).is_ok());
        if !delivered {
            self.fail(agent_id, "no learner registered for agent".to_owned());
        }
    }

    fn unregister(&mut self, agent_id: EntityId) {
        if let Some(handler) = self.handlers.remove(&agent_id) {
            stop_handler(agent_id, handler);
            debug!(%agent_id, agents = self.handlers.len(), "learner unregistered");
        }
    }

    fn fail(&self, agent_id: EntityId, message: String) {
        warn!(%agent_id, %message, "learning command failed");
        let _ = self.replies.send(WorkerReply::Failed { agent_id, message });
    }

    /// Stop and join every handler thread.
    pub fn shutdown(&mut self) {
        let handlers = std::mem::take(&mut self.handlers);
        for (agent_id, handler) in handlers {
            stop_handler(agent_id, handler);
        }
    }

    /// Blocking command loop for an in-process worker thread.
    ///
    /// Returns when a terminate command arrives or the command channel
    /// closes.
    pub fn run(mut self, mut commands: UnboundedReceiver<WorkerCommand>) {
        while let Some(command) = commands.blocking_recv() {
            match self.handle(command) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Terminate) => return,
                Err(e) => warn!(error = %e, "worker command failed"),
            }
        }
        self.shutdown();
    }
}

fn stop_handler(agent_id: EntityId, handler: AgentHandler) {
    let _ = handler.inbox.send(None);
    drop(handler.inbox);
    if handler.thread.join().is_err() {
        warn!(%agent_id, "learner thread panicked");
    }
}

fn handler_loop(
    agent_id: EntityId,
    mut model: Box<dyn PolicyModel>,
    mut requests: UnboundedReceiver<Option<LearnRequest>>,
    replies: &UnboundedSender<WorkerReply>,
) {
    let mut step: u64 = 0;
    while let Some(Some(request)) = requests.blocking_recv() {
        step = step.saturating_add(1);
        let reply = match train(model.as_mut(), &request, step) {
            Ok(output) => WorkerReply::Trained { agent_id, output },
            Err(message) => WorkerReply::Failed { agent_id, message },
        };
        if replies.send(reply).is_err() {
            break;
        }
    }
}

fn train(model: &mut dyn PolicyModel, request: &LearnRequest, step: u64) -> Result<TrainOutput, String> {
    let result = model
        .train_step(&request.hyperparams, &request.batch, step)
        .map_err(|e| e.to_string())?;
    let errors = request
        .indices
        .iter()
        .copied()
        .zip(result.errors)
        .collect();
    Ok(TrainOutput {
        metrics: result.metrics,
        weights: result.weights,
        errors,
    })
}

/// Serve the worker protocol on stdin/stdout until terminated.
///
/// Replies are written by a dedicated thread so training results never wait
/// on the next command line.
pub fn serve_stdio(factory: Arc<dyn ModelFactory>) -> Result<(), WorkerError> {
    let (replies, mut outbox) = mpsc::unbounded_channel::<WorkerReply>();
    let writer = thread::Builder::new()
        .name("worker-stdout".to_owned())
        .spawn(move || -> Result<(), WorkerError> {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            while let Some(reply) = outbox.blocking_recv() {
                out.write_all(encode_line(&reply)?.as_bytes())?;
                out.flush()?;
            }
            Ok(())
        })?;

    info!(pid = std::process::id(), "learning worker started");
    let mut core = WorkerCore::new(factory, replies);
    let mut outcome = Ok(());
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                outcome = Err(WorkerError::from(e));
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let flow = decode_line::<WorkerCommand>(&line).and_then(|command| core.handle(command));
        match flow {
            Ok(Flow::Continue) => {}
            Ok(Flow::Terminate) => break,
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }

    core.shutdown();
    drop(core);
    let written = writer.join().map_err(|_panic| WorkerError::ThreadPanicked {
        name: "worker-stdout".to_owned(),
    })?;
    info!(pid = std::process::id(), "learning worker stopped");
    outcome.and(written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::{Duration, Instant};

    use zoomorph_policy::MlpFactory;
    use zoomorph_types::{Action, Experience, LearnHyperparams};

    use super::*;

    fn spec() -> ModelSpec {
        ModelSpec {
            input_size: 2,
            hidden_size: 4,
            hidden_layers: 1,
            output_size: Action::COUNT,
            seed: 5,
        }
    }

    fn request(indices: Vec<usize>) -> LearnRequest {
        let batch = indices
            .iter()
            .map(|_| Experience {
                state: vec![0.1, 0.2],
                action: 2,
                reward: 1.0,
                next_state: vec![0.2, 0.1],
            })
            .collect();
        LearnRequest {
            hyperparams: LearnHyperparams::default(),
            batch,
            indices,
        }
    }

    fn recv(rx: &mut UnboundedReceiver<WorkerReply>) -> WorkerReply {
        let deadline = Instant::now().checked_add(Duration::from_secs(5)).unwrap();
        loop {
            if let Ok(reply) = rx.try_recv() {
                return reply;
            }
            assert!(Instant::now() < deadline, "no reply within 5s");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn learn_reply_is_keyed_by_store_index() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut core = WorkerCore::new(Arc::new(MlpFactory), tx);
        let agent_id = EntityId::new();
        core.handle(WorkerCommand::Register { agent_id, spec: spec() })
            .unwrap();
        core.handle(WorkerCommand::Learn {
            agent_id,
            request: request(vec![4, 9]),
        })
        .unwrap();

        match recv(&mut rx) {
            WorkerReply::Trained { agent_id: id, output } => {
                assert_eq!(id, agent_id);
                let keys: Vec<usize> = output.errors.keys().copied().collect();
                assert_eq!(keys, vec![4, 9]);
                assert_eq!(output.metrics.step, 1);
                // Default cadence publishes weights every step.
                assert!(output.weights.is_some());
            }
            WorkerReply::Failed { message, .. } => panic!("unexpected failure: {message}"),
        }
        core.shutdown();
    }

    #[test]
    fn learn_for_unknown_agent_fails() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut core = WorkerCore::new(Arc::new(MlpFactory), tx);
        let agent_id = EntityId::new();
        core.handle(WorkerCommand::Learn {
            agent_id,
            request: request(vec![0]),
        })
        .unwrap();
        assert!(matches!(recv(&mut rx), WorkerReply::Failed { agent_id: id, .. } if id == agent_id));
    }

    #[test]
    fn bad_batch_reports_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut core = WorkerCore::new(Arc::new(MlpFactory), tx);
        let agent_id = EntityId::new();
        core.handle(WorkerCommand::Register { agent_id, spec: spec() })
            .unwrap();
        let mut bad = request(vec![0]);
        bad.batch[0].state = vec![1.0; 7];
        core.handle(WorkerCommand::Learn { agent_id, request: bad })
            .unwrap();
        assert!(matches!(recv(&mut rx), WorkerReply::Failed { .. }));
        core.shutdown();
    }

    #[test]
    fn unregister_and_terminate_stop_handlers() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut core = WorkerCore::new(Arc::new(MlpFactory), tx);
        let first = EntityId::new();
        let second = EntityId::new();
        core.handle(WorkerCommand::Register { agent_id: first, spec: spec() })
            .unwrap();
        core.handle(WorkerCommand::Register { agent_id: second, spec: spec() })
            .unwrap();
        assert_eq!(core.agent_count(), 2);

        core.handle(WorkerCommand::Unregister { agent_id: first })
            .unwrap();
        assert_eq!(core.agent_count(), 1);

        let flow = core.handle(WorkerCommand::Terminate).unwrap();
        assert_eq!(flow, Flow::Terminate);
        assert_eq!(core.agent_count(), 0);
    }

    #[test]
    fn run_loop_exits_on_terminate() {
        let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let core = WorkerCore::new(Arc::new(MlpFactory), reply_tx);
        let thread = thread::spawn(move || core.run(cmd_rx));
        cmd_tx
            .send(WorkerCommand::Register {
                agent_id: EntityId::new(),
                spec: spec(),
            })
            .unwrap();
        cmd_tx.send(WorkerCommand::Terminate).unwrap();
        thread.join().unwrap();
    }
}
