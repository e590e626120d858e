//! Hybrid recent/prioritized experience store.
//!
//! New experiences land in a bounded FIFO of recent samples. When the FIFO
//! overflows its oldest entry moves into the priority tree at the current
//! maximum priority. Sampling draws half the batch stratified from the
//! tree, then drains the recent FIFO (moving each drained experience into the
//! tree), then tops up from the tree. Every returned item carries its tree
//! slot index; TD errors reported later for that index become the slot's new
//! priority `(|error| + epsilon) ^ alpha`.
//!
//! All operations take one internal lock and are short; the store is shared
//! between the simulation thread (which adds) and the learning pump (which
//! samples and updates priorities).

use std::collections::VecDeque;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zoomorph_types::Experience;

use crate::error::ReplayError;
use crate::sum_tree::SumTree;

/// Sizing and prioritization parameters for an [`ExperienceStore`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Number of slots in the priority tree.
    pub capacity: usize,
    /// Number of experiences returned by [`ExperienceStore::sample`].
    pub batch_size: usize,
    /// Recent FIFO holds `recent_multiple * batch_size` experiences.
    pub recent_multiple: usize,
    /// Priority exponent applied to absolute TD errors.
    pub alpha: f64,
    /// Floor added to absolute TD errors so no slot reaches zero priority.
    pub epsilon: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            batch_size: 64,
            recent_multiple: 2,
            alpha: 0.6,
            epsilon: 1e-6,
        }
    }
}

/// A batch drawn by [`ExperienceStore::sample`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampledBatch {
    /// Sampled experiences, in draw order.
    pub experiences: Vec<Experience>,
    /// Tree slot index of each experience, parallel to `experiences`.
    pub indices: Vec<usize>,
}

impl SampledBatch {
    /// Number of sampled experiences.
    pub fn len(&self) -> usize {
        self.experiences.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.experiences.is_empty()
    }
}

struct StoreInner {
    tree: SumTree<Experience>,
    recent: VecDeque<Experience>,
    max_priority: f64,
    rng: StdRng,
}

/// Per-organism experience store. See the module docs.
pub struct ExperienceStore {
    config: ReplayConfig,
    recent_capacity: usize,
    inner: Mutex<StoreInner>,
}

impl std::fmt::Debug for ExperienceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperienceStore")
            .field("config", &self.config)
            .field("tree_len", &self.tree_len())
            .field("recent_len", &self.recent_len())
            .finish_non_exhaustive()
    }
}

impl ExperienceStore {
    /// Create a store with an entropy-seeded sampler.
    pub fn new(config: ReplayConfig) -> Result<Self, ReplayError> {
        Self::build(config, StdRng::from_os_rng())
    }

    /// Create a store whose sampling is reproducible for a given seed.
    pub fn with_seed(config: ReplayConfig, seed: u64) -> Result<Self, ReplayError> {
        Self::build(config, StdRng::seed_from_u64(seed))
    }

    fn build(config: ReplayConfig, rng: StdRng) -> Result<Self, ReplayError> {
        if config.capacity == 0 {
            return Err(ReplayError::InvalidConfig {
                reason: "capacity must be at least 1".to_owned(),
            });
        }
        if config.batch_size == 0 {
            return Err(ReplayError::InvalidConfig {
                reason: "batch_size must be at least 1".to_owned(),
            });
        }
        if config.alpha.is_nan() || config.alpha < 0.0 {
            return Err(ReplayError::InvalidConfig {
                reason: format!("alpha must be non-negative, got {}", config.alpha),
            });
        }
        let recent_capacity = config
            .batch_size
            .saturating_mul(config.recent_multiple.max(1));
        Ok(Self {
            config,
            recent_capacity,
            inner: Mutex::new(StoreInner {
                tree: SumTree::new(config.capacity),
                recent: VecDeque::with_capacity(recent_capacity),
                max_priority: 1.0,
                rng,
            }),
        })
    }

    /// The configuration this store was built with.
    pub const fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Maximum number of experiences held in the recent FIFO.
    pub const fn recent_capacity(&self) -> usize {
        self.recent_capacity
    }

    /// Record a new experience.
    ///
    /// It is pushed onto the recent FIFO. If that overflows the FIFO, the
    /// oldest entry moves into the tree at the current maximum priority.
    pub fn add(&self, experience: Experience) {
        let mut inner = self.inner.lock();
        inner.recent.push_back(experience);
        if inner.recent.len() > self.recent_capacity
            && let Some(oldest) = inner.recent.pop_front()
        {
            let priority = inner.max_priority;
            let slot = inner.tree.add(priority, oldest);
            debug!(
                capacity = self.recent_capacity,
                slot, "recent experience buffer full, oldest moved to tree"
            );
        }
    }

    /// Whether a full batch can be drawn.
    pub fn can_sample(&self) -> bool {
        let inner = self.inner.lock();
        inner.recent.len() >= self.config.batch_size || inner.tree.len() >= self.config.batch_size
    }

    /// Draw up to `batch_size` experiences.
    ///
    /// Returns an empty batch when neither the tree nor the recent FIFO
    /// holds anything.
    pub fn sample(&self) -> SampledBatch {
        let batch_size = self.config.batch_size;
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut batch = SampledBatch {
            experiences: Vec::with_capacity(batch_size),
            indices: Vec::with_capacity(batch_size),
        };

        let tree_share = (batch_size / 2).min(inner.tree.len());
        draw_from_tree(inner, tree_share, &mut batch);

        while batch.len() < batch_size {
            let Some(experience) = inner.recent.pop_front() else {
                break;
            };
            let priority = inner.max_priority;
            let slot = inner.tree.add(priority, experience.clone());
            batch.experiences.push(experience);
            batch.indices.push(slot);
        }

        let shortfall = batch_size.saturating_sub(batch.len());
        draw_from_tree(inner, shortfall, &mut batch);
        batch
    }

    /// Apply TD errors reported for previously sampled slot indices.
    ///
    /// Each slot's priority becomes `(|error| + epsilon) ^ alpha` and the
    /// running maximum priority is raised if exceeded. Unknown or
    /// never-written slots are ignored.
    pub fn update_priorities<I>(&self, errors: I)
    where
        I: IntoIterator<Item = (usize, f64)>,
    {
        let mut inner = self.inner.lock();
        for (slot, error) in errors {
            if !inner.tree.is_occupied(slot) || !error.is_finite() {
                continue;
            }
            let priority = (error.abs() + self.config.epsilon).powf(self.config.alpha);
            if inner.tree.update(slot, priority) && priority > inner.max_priority {
                inner.max_priority = priority;
            }
        }
    }

    /// Number of experiences stored in the priority tree.
    pub fn tree_len(&self) -> usize {
        self.inner.lock().tree.len()
    }

    /// Number of experiences waiting in the recent FIFO.
    pub fn recent_len(&self) -> usize {
        self.inner.lock().recent.len()
    }

    /// Largest priority assigned so far (starts at 1.0).
    pub fn max_priority(&self) -> f64 {
        self.inner.lock().max_priority
    }

    /// Total priority mass in the tree.
    pub fn total_priority(&self) -> f64 {
        self.inner.lock().tree.total()
    }

    /// Priority of a tree slot, if it exists.
    pub fn priority(&self, slot: usize) -> Option<f64> {
        self.inner.lock().tree.priority(slot)
    }
}

/// Stratified draw of `count` items: the total mass is split into `count`
/// equal segments and one value is drawn uniformly from each.
fn draw_from_tree(inner: &mut StoreInner, count: usize, batch: &mut SampledBatch) {
    let total = inner.tree.total();
    if count == 0 || total <= 0.0 {
        return;
    }
    let segment = total / count_as_f64(count);
    let mut lower = 0.0;
    for _ in 0..count {
        let value = lower + inner.rng.random::<f64>() * segment;
        lower += segment;
        if let Some((slot, _, experience)) = inner.tree.get(value) {
            batch.experiences.push(experience.clone());
            batch.indices.push(slot);
        }
    }
}

fn count_as_f64(count: usize) -> f64 {
    f64::from(u32::try_from(count).unwrap_or(u32::MAX))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn experience(tag: f32) -> Experience {
        Experience {
            state: vec![tag],
            action: 0,
            reward: tag,
            next_state: vec![tag],
        }
    }

    fn store(capacity: usize, batch_size: usize) -> ExperienceStore {
        ExperienceStore::with_seed(
            ReplayConfig {
                capacity,
                batch_size,
                ..ReplayConfig::default()
            },
            7,
        )
        .unwrap()
    }

    #[test]
    fn rejects_zero_sizes() {
        let cfg = ReplayConfig {
            capacity: 0,
            ..ReplayConfig::default()
        };
        assert!(ExperienceStore::new(cfg).is_err());
        let cfg = ReplayConfig {
            batch_size: 0,
            ..ReplayConfig::default()
        };
        assert!(ExperienceStore::new(cfg).is_err());
    }

    #[test]
    fn empty_store_samples_nothing() {
        let store = store(8, 4);
        assert!(!store.can_sample());
        let batch = store.sample();
        assert!(batch.is_empty());
        assert!(batch.indices.is_empty());
    }

    #[test]
    fn add_fills_recent_before_the_tree() {
        let store = store(8, 2);
        store.add(experience(1.0));
        store.add(experience(2.0));
        assert_eq!(store.recent_len(), 2);
        assert_eq!(store.tree_len(), 0);
        assert!(store.total_priority().abs() < 1e-12);
    }

    #[test]
    fn recent_overflow_moves_oldest_into_tree() {
        let store = store(4, 2);
        for tag in [1.0, 2.0, 3.0, 4.0, 5.0] {
            store.add(experience(tag));
        }
        assert_eq!(store.recent_capacity(), 4);
        assert_eq!(store.recent_len(), 4);
        assert_eq!(store.tree_len(), 1);
        assert!((store.total_priority() - 1.0).abs() < 1e-12);
        {
            let inner = store.inner.lock();
            let (slot, _, oldest) = inner.tree.get(0.5).unwrap();
            assert_eq!(slot, 0);
            assert!((oldest.reward - 1.0).abs() < f32::EPSILON);
            let recent: Vec<f32> = inner.recent.iter().map(|e| e.reward).collect();
            assert_eq!(recent, vec![2.0, 3.0, 4.0, 5.0]);
        }

        assert!(store.can_sample());
        let batch = store.sample();
        assert_eq!(batch.len(), 2);
        let rewards: Vec<f32> = batch.experiences.iter().map(|e| e.reward).collect();
        for reward in &rewards {
            assert!([1.0, 2.0, 3.0, 4.0].contains(reward), "unexpected {reward}");
        }
        // One stratified draw from the single tree entry, then the oldest recent.
        assert_eq!(rewards, vec![1.0, 2.0]);
        assert_eq!(batch.indices, vec![0, 1]);
        assert_eq!(store.recent_len(), 3);
        assert_eq!(store.tree_len(), 2);
    }

    #[test]
    fn tree_total_matches_leaves_after_mixed_operations() {
        let store = store(8, 3);
        for round in 0..12u8 {
            store.add(experience(f32::from(round)));
            if matches!(round.checked_rem(3), Some(2)) {
                let batch = store.sample();
                let errors: Vec<(usize, f64)> = batch
                    .indices
                    .iter()
                    .map(|&slot| (slot, f64::from(round) * 0.25 - 1.0))
                    .collect();
                store.update_priorities(errors);
            }
            let inner = store.inner.lock();
            assert!((inner.tree.total() - inner.tree.leaf_sum()).abs() < 1e-9);
        }
        assert!(store.tree_len() <= 8);
    }

    #[test]
    fn recent_buffer_is_bounded() {
        let store = store(64, 2);
        for i in 0..10u8 {
            store.add(experience(f32::from(i)));
        }
        assert_eq!(store.recent_capacity(), 4);
        assert_eq!(store.recent_len(), 4);
    }

    #[test]
    fn sampling_drains_recent_into_tree() {
        let store = store(64, 4);
        for i in 0..4u8 {
            store.add(experience(f32::from(i)));
        }
        let before = store.tree_len();
        let batch = store.sample();
        assert_eq!(batch.len(), 4);
        assert!(store.recent_len() < 4);
        assert!(store.tree_len() > before);
    }

    #[test]
    fn priority_update_uses_alpha_and_tracks_max() {
        let store = store(8, 2);
        store.add(experience(1.0));
        store.add(experience(2.0));
        assert_eq!(store.sample().indices, vec![0, 1]);
        store.update_priorities([(0, 3.0), (1, -0.5)]);

        let expected_first = (3.0_f64 + 1e-6).powf(0.6);
        let expected_second = (0.5_f64 + 1e-6).powf(0.6);
        assert!((store.priority(0).unwrap() - expected_first).abs() < 1e-9);
        assert!((store.priority(1).unwrap() - expected_second).abs() < 1e-9);
        assert!((store.max_priority() - expected_first).abs() < 1e-9);
    }

    #[test]
    fn priority_update_ignores_unknown_slots() {
        let store = store(8, 2);
        store.add(experience(1.0));
        let _ = store.sample();
        store.update_priorities([(5, 10.0), (100, 10.0), (0, f64::NAN)]);
        assert!((store.total_priority() - 1.0).abs() < 1e-12);
        assert!((store.max_priority() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn high_priority_items_dominate_samples() {
        let store = store(16, 2);
        for i in 0..16u8 {
            store.add(experience(f32::from(i)));
        }
        // Drain the recent FIFO so later draws come only from the tree.
        for _ in 0..8 {
            let _ = store.sample();
        }
        let errors: Vec<(usize, f64)> = (0..16)
            .map(|slot| (slot, if slot == 5 { 1000.0 } else { 0.0 }))
            .collect();
        store.update_priorities(errors);

        let mut hits = 0;
        for _ in 0..50 {
            let batch = store.sample();
            hits += batch.indices.iter().filter(|&&i| i == 5).count();
        }
        assert!(hits > 60, "slot 5 drawn only {hits} times");
    }
}
