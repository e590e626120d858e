//! Perception vector, nearest-items curriculum, and item memory.
//!
//! The vector layout is fixed for a given `max_items`:
//!
//! | Slot | Feature |
//! |---|---|
//! | 0 | attention to target distance |
//! | 1 | attention to target direction |
//! | 2 | organism to attention distance |
//! | 3 | organism to attention direction |
//! | 4.. | `(distance, direction, reward)` per tracked item, zero padded |
//!
//! Distances are divided by the diagonal of the perception extent and
//! directions are bearings mapped onto `[0, 1]`.

use zoomorph_types::{EntityId, EntityKind};
use zoomorph_world::fields::names;
use zoomorph_world::{Position, Snapshot};

use crate::config::{ITEM_FEATURES, SELF_FEATURES};

/// What the organism sees of one tracked item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemView {
    /// Item position.
    pub position: Position,
    /// Reward the item grants on consumption.
    pub reward: f64,
}

impl ItemView {
    /// Read a live item from `snapshot`.
    pub fn lookup(snapshot: &Snapshot, id: EntityId) -> Option<Self> {
        let record = snapshot.get(id).filter(|record| !record.marked_for_deletion)?;
        Some(Self {
            position: record.position,
            reward: record.float(names::REWARD).unwrap_or(0.0),
        })
    }
}

/// Normalises distances and assembles perception vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Perception {
    diagonal: f64,
}

impl Perception {
    /// Perception over an extent of `width x height` world units.
    pub fn new(width: f64, height: f64) -> Self {
        let diagonal = width.hypot(height);
        Self {
            diagonal: if diagonal > 0.0 { diagonal } else { 1.0 },
        }
    }

    /// Distance divided by the extent diagonal.
    pub fn normalized_distance(&self, from: Position, to: Position) -> f64 {
        from.distance(to) / self.diagonal
    }

    /// Build the perception vector.
    ///
    /// `items` beyond `max_items` are ignored; missing slots are zeros.
    pub fn observe(
        &self,
        organism: Position,
        attention: Position,
        target: Option<Position>,
        items: &[ItemView],
        max_items: usize,
    ) -> Vec<f32> {
        let width = SELF_FEATURES.saturating_add(max_items.saturating_mul(ITEM_FEATURES));
        let mut features = Vec::with_capacity(width);

        match target {
            Some(target) => {
                features.push(feature(self.normalized_distance(attention, target)));
                features.push(feature(attention.normalized_angle_to(target)));
            }
            None => features.extend([0.0, 0.0]),
        }
        features.push(feature(self.normalized_distance(organism, attention)));
        features.push(feature(organism.normalized_angle_to(attention)));

        for item in items.iter().take(max_items) {
            features.push(feature(self.normalized_distance(organism, item.position)));
            features.push(feature(organism.normalized_angle_to(item.position)));
            features.push(feature(item.reward));
        }
        features.resize(width, 0.0);
        features
    }
}

#[allow(clippy::cast_possible_truncation)]
fn feature(value: f64) -> f32 {
    value as f32
}

/// Number of items to track after `elapsed` simulated seconds.
///
/// Grows linearly (floored) from `start` to `max` over `period`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn curriculum_items(elapsed: f64, start: usize, max: usize, period: f64) -> usize {
    if period <= 0.0 || elapsed >= period || max <= start {
        return max.max(start);
    }
    let span = u32::try_from(max.saturating_sub(start)).unwrap_or(u32::MAX);
    let progress = (elapsed / period).clamp(0.0, 1.0);
    let grown = (progress * f64::from(span)).floor() as usize;
    start.saturating_add(grown).min(max)
}

/// Every food id an organism has perceived, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemMemory {
    ids: Vec<EntityId>,
}

impl ItemMemory {
    /// Empty memory.
    pub const fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Remember ids not seen before.
    pub fn remember(&mut self, ids: &[EntityId]) {
        for id in ids {
            if !self.ids.contains(id) {
                self.ids.push(*id);
            }
        }
    }

    /// The nearest remembered food that still exists. Ids without a live
    /// record are forgotten.
    pub fn recall(&mut self, from: Position, snapshot: &Snapshot) -> Option<EntityId> {
        self.ids.retain(|id| {
            snapshot
                .get(*id)
                .is_some_and(|record| record.kind == EntityKind::Food && !record.marked_for_deletion)
        });
        self.ids
            .iter()
            .filter_map(|id| snapshot.get(*id).map(|record| (*id, from.distance(record.position))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Number of remembered ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
