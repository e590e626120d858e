//! The entity capability trait and per-tick effect records.
//!
//! During a tick every entity reads the frozen old snapshot in
//! [`Entity::update`] and answers with an [`Effects`] record instead of
//! writing to the world directly. The engine resolves those effects
//! against the new snapshot, pushes the resolved fields back onto the
//! entity, and finally calls [`Entity::apply`] with both snapshots.

use zoomorph_types::{EntityId, EntityKind};

use crate::error::WorldError;
use crate::fields::{FieldValue, SyncSchema};
use crate::geometry::Position;
use crate::snapshot::Snapshot;

/// Which world interactions an entity takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Eaten (and removed) when a mover reaches it.
    pub consumable: bool,
    /// Occupies its cell; non-consumable collidables block movement.
    pub collidable: bool,
    /// Expires on its own after a while.
    pub perishable: bool,
}

/// A nearest-neighbour query an entity wants answered before its update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerceptionRequest {
    /// Kind of entity to look for.
    pub kind: EntityKind,
    /// Maximum number of results.
    pub count: usize,
    /// Search radius around the entity.
    pub radius: f64,
}

/// Read-only tick context handed to [`Entity::update`].
#[derive(Debug, Clone, Copy)]
pub struct UpdateContext<'a> {
    /// Tick being computed.
    pub tick: u64,
    /// Simulated seconds since the start of the run, after this tick.
    pub elapsed: f64,
    /// Simulated seconds per tick.
    pub dt: f64,
    /// Living organisms at the start of the tick.
    pub population: usize,
    /// Organism cap.
    pub max_population: usize,
    /// Food items at the start of the tick.
    pub food_count: usize,
    /// Food cap.
    pub max_food: usize,
    /// Answer to the entity's [`PerceptionRequest`], nearest first.
    pub nearest: &'a [EntityId],
}

/// Something an entity wants created this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum SpawnRequest {
    /// A new organism next to the requester.
    Offspring,
    /// A food item at (or near) `position`.
    Food {
        /// Preferred position; the engine moves it to the nearest empty cell.
        position: Position,
        /// Energy content.
        energy: f64,
        /// Nutrition content.
        nutrition: f64,
        /// Whether this is the rarer high-energy variety.
        high_energy: bool,
    },
}

/// What an entity asks the engine to do on its behalf this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Effects {
    /// Requested displacement of the entity.
    pub movement: Option<(f64, f64)>,
    /// Requested displacement of the entity's attention point.
    pub attention: Option<(f64, f64)>,
    /// `false` removes the entity at the end of the tick.
    pub alive: bool,
    /// Entity to create.
    pub spawn: Option<SpawnRequest>,
}

impl Default for Effects {
    fn default() -> Self {
        Self {
            movement: None,
            attention: None,
            alive: true,
            spawn: None,
        }
    }
}

impl Effects {
    /// No effect at all.
    pub fn none() -> Self {
        Self::default()
    }
}

/// A simulated object owned by the engine.
///
/// The field methods describe the entity's declared schema: every name in
/// [`Entity::field_names`] that [`Entity::read_field`] can express as a
/// [`FieldValue`] is synchronized with the entity's snapshot record.
pub trait Entity: Send + Sync {
    /// Stable identifier.
    fn id(&self) -> EntityId;

    /// Entity kind.
    fn kind(&self) -> EntityKind;

    /// Interaction flags.
    fn capabilities(&self) -> Capabilities;

    /// Current position.
    fn position(&self) -> Position;

    /// Move the entity.
    fn set_position(&mut self, position: Position);

    /// Declared field names, scalar or not.
    fn field_names(&self) -> &[&'static str];

    /// Current value of a scalar field.
    fn read_field(&self, name: &str) -> Option<FieldValue>;

    /// Overwrite a scalar field. Returns `false` if the name or value type
    /// is not accepted.
    fn write_field(&mut self, name: &str, value: &FieldValue) -> bool;

    /// The entity's cached sync schema.
    fn sync_schema(&mut self) -> &mut SyncSchema;

    /// Neighbour query to run against the old snapshot before
    /// [`Entity::update`].
    fn perception_request(&self) -> Option<PerceptionRequest> {
        None
    }

    /// Decide this tick's effects from the frozen old snapshot.
    fn update(&mut self, old: &Snapshot, context: &UpdateContext<'_>) -> Result<Effects, WorldError>;

    /// React to the committed tick. Called after resolved fields have been
    /// pushed back onto the entity.
    fn apply(&mut self, old: &Snapshot, new: &Snapshot) -> Result<(), WorldError> {
        let _ = (old, new);
        Ok(())
    }
}
