//! Per-organism policy runtime.
//!
//! Two model buffers hold inference weights. `current` names the one that
//! action selection reads. When a learning result carries new weights they
//! are loaded into the other buffer under that buffer's write lock, and
//! `current` is flipped under the exclusive swap lock. Readers take the swap
//! lock shared only while they load `current` and acquire that buffer's read
//! guard. A reader that picked a buffer before the flip keeps its read
//! guard, so it always sees a fully loaded model; the next load into that
//! buffer waits for the guard to drop.
//!
//! Requests are fire-and-forget: [`PolicyRuntime::request_learn`] hands the
//! batch to the worker pool and bumps the backlog counter. Outcomes are
//! applied by whichever thread calls [`PolicyRuntime::drain_results`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error};
use zoomorph_replay::{ExperienceStore, SampledBatch};
use zoomorph_types::{Action, EntityId, LearnHyperparams};

use crate::error::PolicyError;
use crate::exploration::{Exploration, ExplorationConfig, greedy};
use crate::learn::{LearnOutcome, LearnRequest, LearnSink, LearnerChannels, TrainOutput};
use crate::metrics::{LearningMetrics, LearningStats};
use crate::model::{ModelFactory, ModelSpec, PolicyModel};

type Buffer = RwLock<Box<dyn PolicyModel>>;

/// Double-buffered inference model plus asynchronous learning dispatch for
/// one organism.
pub struct PolicyRuntime {
    agent_id: EntityId,
    buffers: [Buffer; 2],
    current: AtomicUsize,
    swap_lock: RwLock<()>,
    swaps: AtomicU64,
    exploration: Mutex<Exploration>,
    store: Arc<ExperienceStore>,
    requests: Box<dyn LearnSink>,
    results: Mutex<UnboundedReceiver<LearnOutcome>>,
    backlog: AtomicUsize,
    metrics: Mutex<LearningMetrics>,
}

impl std::fmt::Debug for PolicyRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRuntime")
            .field("agent_id", &self.agent_id)
            .field("current", &self.current_buffer())
            .field("backlog", &self.backlog())
            .finish_non_exhaustive()
    }
}

impl PolicyRuntime {
    /// Build both buffers from `factory` and wire up the learner channels.
    ///
    /// The second buffer is initialised with a copy of the first so both
    /// start from identical weights.
    pub fn new(
        agent_id: EntityId,
        spec: &ModelSpec,
        factory: &dyn ModelFactory,
        store: Arc<ExperienceStore>,
        channels: LearnerChannels,
        exploration: ExplorationConfig,
    ) -> Result<Self, PolicyError> {
        let primary = factory.build(spec)?;
        let mut secondary = factory.build(spec)?;
        secondary.load_weights(&primary.weights())?;

        Ok(Self {
            agent_id,
            buffers: [RwLock::new(primary), RwLock::new(secondary)],
            current: AtomicUsize::new(0),
            swap_lock: RwLock::new(()),
            swaps: AtomicU64::new(0),
            exploration: Mutex::new(Exploration::new(exploration, spec.seed.wrapping_add(1))),
            store,
            requests: channels.requests,
            results: Mutex::new(channels.results),
            backlog: AtomicUsize::new(0),
            metrics: Mutex::new(LearningMetrics::default()),
        })
    }

    /// The organism this runtime belongs to.
    pub const fn agent_id(&self) -> EntityId {
        self.agent_id
    }

    /// The organism's experience store.
    pub const fn store(&self) -> &Arc<ExperienceStore> {
        &self.store
    }

    /// Index (0 or 1) of the buffer inference currently reads.
    pub fn current_buffer(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Number of completed buffer swaps.
    pub fn swaps(&self) -> u64 {
        self.swaps.load(Ordering::Relaxed)
    }

    /// Outstanding learning requests whose outcome has not been applied.
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }

    /// Current exploration rate.
    pub fn epsilon(&self) -> f64 {
        self.exploration.lock().epsilon()
    }

    /// Snapshot of the rolling learning statistics.
    pub fn stats(&self) -> LearningStats {
        self.metrics.lock().stats()
    }

    /// Record the reward of a completed experience for reporting.
    pub fn record_reward(&self, reward: f32) {
        self.metrics.lock().record_reward(reward);
    }

    fn buffer(&self, index: usize) -> &Buffer {
        let [first, second] = &self.buffers;
        if index == 0 { first } else { second }
    }

    /// Raw model outputs from the current buffer.
    pub fn infer(&self, input: &[f32]) -> Result<Vec<f32>, PolicyError> {
        let model = {
            let _swap = self.swap_lock.read();
            self.buffer(self.current_buffer()).read()
        };
        model.infer(input)
    }

    /// Choose an action for `input`.
    ///
    /// Exploration is decided first (and epsilon decayed) in a short
    /// critical section. Otherwise the current buffer is read and the
    /// action drawn from a softmax over its outputs.
    pub fn select_action(&self, input: &[f32]) -> Result<Action, PolicyError> {
        let explored = self.exploration.lock().explore(Action::COUNT);
        let index = match explored {
            Some(index) => index,
            None => {
                let values = self.infer(input)?;
                if values.len() != Action::COUNT {
                    return Err(PolicyError::ShapeMismatch {
                        what: "model output",
                        expected: Action::COUNT,
                        actual: values.len(),
                    });
                }
                let sampled = self.exploration.lock().boltzmann(&values);
                sampled.or_else(|| greedy(&values)).unwrap_or(0)
            }
        };
        let action = Action::from_index(index).unwrap_or(Action::NoMove);
        self.metrics.lock().record_action(action);
        Ok(action)
    }

    /// Submit a training request for `batch`. Never blocks.
    pub fn request_learn(
        &self,
        hyperparams: LearnHyperparams,
        batch: SampledBatch,
    ) -> Result<(), PolicyError> {
        if batch.is_empty() {
            return Ok(());
        }
        let request = LearnRequest {
            hyperparams,
            batch: batch.experiences,
            indices: batch.indices,
        };
        self.requests.submit(request)?;
        let backlog = self.backlog.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        debug!(agent_id = %self.agent_id, backlog, "learning request submitted");
        Ok(())
    }

    /// Apply one learning outcome.
    ///
    /// New weights go into the non-current buffer, which then becomes
    /// current. TD errors always feed the store's priorities. A failed
    /// outcome or a weight blob that cannot be loaded is a
    /// [`PolicyError::LearningPipeline`] error.
    pub fn on_learn_result(&self, outcome: LearnOutcome) -> Result<(), PolicyError> {
        self.release_backlog();
        match outcome {
            LearnOutcome::Trained(output) => self.apply_output(output),
            LearnOutcome::Failed { message } => {
                error!(agent_id = %self.agent_id, %message, "learning worker reported failure");
                Err(PolicyError::LearningPipeline {
                    agent_id: self.agent_id,
                    reason: message,
                })
            }
        }
    }

    fn apply_output(&self, output: TrainOutput) -> Result<(), PolicyError> {
        if let Some(weights) = &output.weights {
            let next = 1usize.saturating_sub(self.current_buffer());
            self.buffer(next)
                .write()
                .load_weights(weights)
                .map_err(|e| PolicyError::LearningPipeline {
                    agent_id: self.agent_id,
                    reason: format!("failed to load published weights: {e}"),
                })?;
            {
                let _swap = self.swap_lock.write();
                self.current.store(next, Ordering::Release);
            }
            self.swaps.fetch_add(1, Ordering::Relaxed);
        }

        self.store.update_priorities(
            output
                .errors
                .iter()
                .map(|(&index, &error)| (index, f64::from(error))),
        );
        self.metrics.lock().record_training(&output.metrics);
        debug!(
            agent_id = %self.agent_id,
            step = output.metrics.step,
            loss = output.metrics.loss,
            swapped = output.weights.is_some(),
            "learning result applied"
        );
        Ok(())
    }

    fn release_backlog(&self) {
        let _ = self
            .backlog
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Apply every outcome that has arrived so far.
    ///
    /// Outcomes are pulled off the channel under the receiver lock and
    /// applied after it is released. Returns the number applied, or the
    /// first pipeline error.
    pub fn drain_results(&self) -> Result<usize, PolicyError> {
        let pending: Vec<LearnOutcome> = {
            let mut results = self.results.lock();
            std::iter::from_fn(|| results.try_recv().ok()).collect()
        };
        let applied = pending.len();
        for outcome in pending {
            self.on_learn_result(outcome)?;
        }
        Ok(applied)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::thread;
    use std::time::Duration;

    use tokio::sync::mpsc::{self, UnboundedSender};
    use zoomorph_replay::ReplayConfig;
    use zoomorph_types::Experience;

    use super::*;
    use crate::learn::TrainMetrics;
    use crate::mlp::{MlpFactory, MlpQNetwork};
    use crate::model::ModelWeights;

    struct ChannelSink(UnboundedSender<LearnRequest>);

    impl LearnSink for ChannelSink {
        fn submit(&self, request: LearnRequest) -> Result<(), PolicyError> {
            self.0.send(request).map_err(|e| PolicyError::Dispatch {
                agent_id: EntityId::new(),
                reason: e.to_string(),
            })
        }
    }

    struct Harness {
        runtime: PolicyRuntime,
        requests: mpsc::UnboundedReceiver<LearnRequest>,
        results: UnboundedSender<LearnOutcome>,
    }

    fn spec(seed: u64) -> ModelSpec {
        ModelSpec {
            input_size: 4,
            hidden_size: 6,
            hidden_layers: 1,
            output_size: Action::COUNT,
            seed,
        }
    }

    fn harness(exploration: ExplorationConfig) -> Harness {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (res_tx, res_rx) = mpsc::unbounded_channel();
        let store = Arc::new(
            ExperienceStore::with_seed(
                ReplayConfig {
                    capacity: 16,
                    batch_size: 2,
                    ..ReplayConfig::default()
                },
                1,
            )
            .unwrap(),
        );
        let runtime = PolicyRuntime::new(
            EntityId::new(),
            &spec(11),
            &MlpFactory,
            store,
            LearnerChannels {
                requests: Box::new(ChannelSink(req_tx)),
                results: res_rx,
            },
            exploration,
        )
        .unwrap();
        Harness {
            runtime,
            requests: req_rx,
            results: res_tx,
        }
    }

    fn greedy_only() -> ExplorationConfig {
        ExplorationConfig {
            epsilon: 0.0,
            epsilon_min: 0.0,
            ..ExplorationConfig::default()
        }
    }

    fn trained(weights: Option<ModelWeights>, errors: BTreeMap<usize, f32>) -> LearnOutcome {
        LearnOutcome::Trained(TrainOutput {
            metrics: TrainMetrics {
                loss: 0.1,
                mean_q: 0.2,
                step: 1,
                target_updated: false,
                weights_published: weights.is_some(),
            },
            weights,
            errors,
        })
    }

    fn experience() -> Experience {
        Experience {
            state: vec![0.0; 4],
            action: 1,
            reward: 1.0,
            next_state: vec![0.0; 4],
        }
    }

    #[test]
    fn request_learn_counts_backlog() {
        let mut h = harness(greedy_only());
        h.runtime.store().add(experience());
        h.runtime.store().add(experience());
        let batch = h.runtime.store().sample();
        h.runtime
            .request_learn(LearnHyperparams::default(), batch)
            .unwrap();
        assert_eq!(h.runtime.backlog(), 1);
        let request = h.requests.try_recv().unwrap();
        assert_eq!(request.batch.len(), 2);
        assert_eq!(request.indices.len(), 2);
    }

    #[test]
    fn empty_batch_is_not_submitted() {
        let mut h = harness(greedy_only());
        h.runtime
            .request_learn(LearnHyperparams::default(), SampledBatch::default())
            .unwrap();
        assert_eq!(h.runtime.backlog(), 0);
        assert!(h.requests.try_recv().is_err());
    }

    #[test]
    fn result_with_weights_flips_buffer() {
        let h = harness(greedy_only());
        let donor = MlpQNetwork::new(&spec(99)).unwrap();
        let input = [0.1, 0.2, 0.3, 0.4];
        let before = h.runtime.infer(&input).unwrap();

        h.runtime
            .on_learn_result(trained(Some(donor.weights()), BTreeMap::new()))
            .unwrap();

        assert_eq!(h.runtime.current_buffer(), 1);
        assert_eq!(h.runtime.swaps(), 1);
        let after = h.runtime.infer(&input).unwrap();
        assert_eq!(after, donor.infer(&input).unwrap());
        assert_ne!(before, after);
    }

    #[test]
    fn result_without_weights_keeps_buffer() {
        let h = harness(greedy_only());
        h.runtime
            .on_learn_result(trained(None, BTreeMap::new()))
            .unwrap();
        assert_eq!(h.runtime.current_buffer(), 0);
        assert_eq!(h.runtime.stats().training_steps, 1);
    }

    #[test]
    fn errors_update_store_priorities() {
        let h = harness(greedy_only());
        h.runtime.store().add(experience());
        assert_eq!(h.runtime.store().sample().indices.first(), Some(&0));
        h.runtime
            .on_learn_result(trained(None, BTreeMap::from([(0, 2.0)])))
            .unwrap();
        let expected = (2.0_f64 + 1e-6).powf(0.6);
        assert!((h.runtime.store().priority(0).unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn failed_outcome_is_fatal() {
        let h = harness(greedy_only());
        let err = h
            .runtime
            .on_learn_result(LearnOutcome::Failed {
                message: "boom".to_owned(),
            })
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn unloadable_weights_are_fatal() {
        let h = harness(greedy_only());
        let err = h
            .runtime
            .on_learn_result(trained(Some(ModelWeights::default()), BTreeMap::new()))
            .unwrap_err();
        assert!(matches!(err, PolicyError::LearningPipeline { .. }));
        assert_eq!(h.runtime.current_buffer(), 0);
    }

    #[test]
    fn drain_applies_in_arrival_order() {
        let mut h = harness(greedy_only());
        for _ in 0..3 {
            h.runtime.store().add(experience());
            let batch = h.runtime.store().sample();
            h.runtime
                .request_learn(LearnHyperparams::default(), batch)
                .unwrap();
        }
        assert_eq!(h.runtime.backlog(), 3);
        while h.requests.try_recv().is_ok() {}

        h.results.send(trained(None, BTreeMap::new())).unwrap();
        h.results.send(trained(None, BTreeMap::new())).unwrap();
        assert_eq!(h.runtime.drain_results().unwrap(), 2);
        assert_eq!(h.runtime.backlog(), 1);
        assert_eq!(h.runtime.drain_results().unwrap(), 0);
    }

    #[test]
    fn select_action_is_recorded() {
        let h = harness(ExplorationConfig::default());
        for _ in 0..20 {
            h.runtime.select_action(&[0.5, 0.5, 0.5, 0.5]).unwrap();
        }
        let total: f64 = h.runtime.stats().action_distribution.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(h.runtime.epsilon() < 0.8);
    }

    #[test]
    fn concurrent_reads_only_see_loaded_buffers() {
        let h = harness(greedy_only());
        let input = [0.3, 0.1, 0.7, 0.2];
        let candidates: Vec<MlpQNetwork> =
            (0..20).map(|seed| MlpQNetwork::new(&spec(100 + seed)).unwrap()).collect();
        let mut allowed: Vec<Vec<f32>> = vec![h.runtime.infer(&input).unwrap()];
        allowed.extend(candidates.iter().map(|c| c.infer(&input).unwrap()));

        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        let out = h.runtime.infer(&input).unwrap();
                        assert!(allowed.contains(&out));
                    }
                });
            }
            for candidate in &candidates {
                h.runtime
                    .on_learn_result(trained(Some(candidate.weights()), BTreeMap::new()))
                    .unwrap();
            }
        });
        assert_eq!(h.runtime.swaps(), 20);
    }

    #[test]
    fn inference_waits_while_a_swap_is_in_progress() {
        let h = harness(greedy_only());
        let input = [0.3, 0.1, 0.7, 0.2];
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        thread::scope(|scope| {
            let flip = h.runtime.swap_lock.write();
            scope.spawn(|| {
                let out = h.runtime.infer(&input).unwrap();
                done_tx.send(out).unwrap();
            });
            assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
            drop(flip);
            assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        });
    }
}
