//! Synchronizable field values and the per-entity sync schema.
//!
//! Only scalar values travel between an entity and its snapshot record:
//! numbers, booleans, strings, fixed pairs, colours, and (possibly null)
//! entity ids. Containers and nested objects have no [`FieldValue`]
//! representation, so they can never be copied into a snapshot.

use serde::{Deserialize, Serialize};
use zoomorph_types::EntityId;

/// Well-known field names shared between entities and the engine.
pub mod names {
    /// Organism energy; food energy content.
    pub const ENERGY: &str = "energy";
    /// Organism nutrition; food nutrition content.
    pub const NUTRITION: &str = "nutrition";
    /// Reward granted to whoever consumes a food item.
    pub const REWARD: &str = "reward";
    /// One-off reward accumulated by an organism during the current tick.
    pub const PENDING_REWARD: &str = "pending_reward";
    /// Horizontal coordinate of an organism's attention point.
    pub const ATTENTION_X: &str = "attention_x";
    /// Vertical coordinate of an organism's attention point.
    pub const ATTENTION_Y: &str = "attention_y";
    /// Display colour.
    pub const COLOR: &str = "color";
    /// Simulated seconds until a perishable item expires.
    pub const EXPIRATION_TIMER: &str = "expiration_timer";
}

/// A scalar value held in a snapshot record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Floating point number.
    Float(f64),
    /// Integer.
    Int(i64),
    /// Boolean flag.
    Bool(bool),
    /// Short string.
    Text(String),
    /// Fixed pair of numbers.
    Pair(f64, f64),
    /// RGBA colour.
    Color([u8; 4]),
    /// Entity reference, possibly null.
    Id(Option<EntityId>),
}

impl FieldValue {
    /// Numeric value, widening integers.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Boolean value.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Entity reference.
    pub const fn as_id(&self) -> Option<Option<EntityId>> {
        match self {
            Self::Id(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Option<EntityId>> for FieldValue {
    fn from(value: Option<EntityId>) -> Self {
        Self::Id(value)
    }
}

/// Cached list of an entity's synchronizable fields.
///
/// The list is rebuilt when the entity's declared field count changes.
/// Fields added with [`SyncSchema::register`] survive rebuilds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSchema {
    fields: Vec<&'static str>,
    extra: Vec<&'static str>,
    declared_count: Option<usize>,
}

impl SyncSchema {
    /// Empty, not yet computed schema.
    pub const fn new() -> Self {
        Self {
            fields: Vec::new(),
            extra: Vec::new(),
            declared_count: None,
        }
    }

    /// Whether the cache must be rebuilt for an entity declaring
    /// `declared` fields.
    pub fn is_stale(&self, declared: usize) -> bool {
        self.declared_count != Some(declared)
    }

    /// Replace the cached list.
    pub fn rebuild(&mut self, scalar_fields: Vec<&'static str>, declared: usize) {
        self.fields = scalar_fields;
        self.fields.retain(|name| !self.extra.contains(name));
        self.declared_count = Some(declared);
    }

    /// Add a field outside the declared list. Returns `false` if it was
    /// already synchronized.
    pub fn register(&mut self, name: &'static str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.extra.push(name);
        true
    }

    /// Whether `name` is synchronized.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains(&name) || self.extra.contains(&name)
    }

    /// Every synchronized field: declared scalars, then registered extras.
    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().chain(&self.extra).copied()
    }

    /// Number of synchronized fields.
    pub fn len(&self) -> usize {
        self.fields.len().saturating_add(self.extra.len())
    }

    /// Whether nothing is synchronized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
