//! Versioned world snapshots and the field synchronisation protocol.
//!
//! A [`Snapshot`] maps entity ids to [`Record`]s. Cloning it copies every
//! record one level deep (the header and the scalar field map), never the
//! entities, so mutating the clone cannot affect the source.
//!
//! Synchronisation runs in both directions:
//!
//! - [`Snapshot::synchronize_out`] copies an entity's scalar fields into its
//!   record. The first call creates the record and rebuilds the entity's
//!   cached schema; later calls copy only cached fields whose value changed.
//! - [`Snapshot::synchronize_in`] writes a record's values back onto the
//!   entity. A live entity without a record is a registration bug
//!   ([`WorldError::MissingState`]).

use std::collections::BTreeMap;

use tracing::warn;
use zoomorph_types::{EntityId, EntityKind};

use crate::entity::Entity;
use crate::error::WorldError;
use crate::fields::{FieldValue, names};
use crate::geometry::{Position, WorldBounds};

/// Anything that can say whether an entity id is still alive.
pub trait EntityDirectory {
    /// Whether an entity with this id exists.
    fn contains(&self, id: EntityId) -> bool;
}

impl<T> EntityDirectory for BTreeMap<EntityId, T> {
    fn contains(&self, id: EntityId) -> bool {
        self.contains_key(&id)
    }
}

/// One entity's state inside a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Entity kind.
    pub kind: EntityKind,
    /// Position.
    pub position: Position,
    /// Whether the entity occupies its cell.
    pub collidable: bool,
    /// Whether the entity is eaten on contact.
    pub consumable: bool,
    /// Set when the entity is to be removed at the end of the tick.
    pub marked_for_deletion: bool,
    /// Synchronized scalar fields.
    pub fields: BTreeMap<&'static str, FieldValue>,
}

impl Record {
    /// Empty record for an entity of `kind` at `position`.
    pub const fn new(kind: EntityKind, position: Position) -> Self {
        Self {
            kind,
            position,
            collidable: false,
            consumable: false,
            marked_for_deletion: false,
            fields: BTreeMap::new(),
        }
    }

    /// A field's value.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// A numeric field.
    pub fn float(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(FieldValue::as_f64)
    }

    /// Set a field.
    pub fn set(&mut self, name: &'static str, value: FieldValue) {
        self.fields.insert(name, value);
    }

    /// Add `delta` to a numeric field, treating a missing field as zero.
    pub fn add_float(&mut self, name: &'static str, delta: f64) {
        let current = self.float(name).unwrap_or(0.0);
        self.fields.insert(name, FieldValue::Float(current + delta));
    }

    /// Whether this record takes part in occupancy and collisions.
    pub const fn occupies_cell(&self) -> bool {
        self.collidable && !self.marked_for_deletion
    }
}

/// What a consumable hands to whoever eats it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Consumption {
    /// Energy gained.
    pub energy: f64,
    /// Nutrition gained.
    pub nutrition: f64,
    /// One-off reward gained.
    pub reward: f64,
}

impl Consumption {
    /// Read the declared amounts from a consumable's record.
    pub fn from_record(record: &Record) -> Self {
        Self {
            energy: record.float(names::ENERGY).unwrap_or(0.0),
            nutrition: record.float(names::NUTRITION).unwrap_or(0.0),
            reward: record.float(names::REWARD).unwrap_or(0.0),
        }
    }

    /// Credit the amounts to a consumer's record.
    pub fn apply_to(self, consumer: &mut Record) {
        consumer.add_float(names::ENERGY, self.energy);
        consumer.add_float(names::NUTRITION, self.nutrition);
        consumer.add_float(names::PENDING_REWARD, self.reward);
    }
}

/// World state at one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    tick: u64,
    elapsed: f64,
    bounds: WorldBounds,
    records: BTreeMap<EntityId, Record>,
}

impl Snapshot {
    /// Empty snapshot at tick 0.
    pub const fn new(bounds: WorldBounds) -> Self {
        Self {
            tick: 0,
            elapsed: 0.0,
            bounds,
            records: BTreeMap::new(),
        }
    }

    /// Tick this snapshot describes.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Simulated seconds since the start of the run.
    pub const fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// World size.
    pub const fn bounds(&self) -> WorldBounds {
        self.bounds
    }

    /// Set the logical clock.
    pub const fn set_time(&mut self, tick: u64, elapsed: f64) {
        self.tick = tick;
        self.elapsed = elapsed;
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// A record by id.
    pub fn get(&self, id: EntityId) -> Option<&Record> {
        self.records.get(&id)
    }

    /// A mutable record by id.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Record> {
        self.records.get_mut(&id)
    }

    /// Insert or replace a record.
    pub fn upsert(&mut self, id: EntityId, record: Record) {
        self.records.insert(id, record);
    }

    /// Remove a record.
    pub fn remove(&mut self, id: EntityId) -> Option<Record> {
        self.records.remove(&id)
    }

    /// Mark a record for deletion. Returns `false` if there is no record.
    pub fn mark_for_deletion(&mut self, id: EntityId) -> bool {
        let Some(record) = self.records.get_mut(&id) else {
            return false;
        };
        record.marked_for_deletion = true;
        true
    }

    /// Every record, unfiltered, in id order.
    pub fn records(&self) -> impl Iterator<Item = (EntityId, &Record)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    /// Live records of `kind` (or of every kind), skipping ones marked for
    /// deletion.
    pub fn entries(&self, kind: Option<EntityKind>) -> impl Iterator<Item = (EntityId, &Record)> {
        self.records()
            .filter(move |(_, record)| !record.marked_for_deletion && kind.is_none_or(|k| record.kind == k))
    }

    /// Ids of records marked for deletion.
    pub fn marked(&self) -> Vec<EntityId> {
        self.records()
            .filter(|(_, record)| record.marked_for_deletion)
            .map(|(id, _)| id)
            .collect()
    }

    /// Enumerate records whose entity still exists in `directory`.
    ///
    /// Records whose entity is gone are marked for deletion and left out.
    pub fn list(
        &mut self,
        directory: &dyn EntityDirectory,
        kind: Option<EntityKind>,
    ) -> Vec<(EntityId, &Record)> {
        for (id, record) in &mut self.records {
            if !record.marked_for_deletion && !directory.contains(*id) {
                record.marked_for_deletion = true;
            }
        }
        self.records
            .iter()
            .filter(|(id, record)| directory.contains(**id) && kind.is_none_or(|k| record.kind == k))
            .map(|(id, record)| (*id, record))
            .collect()
    }

    /// Copy an entity's synchronizable fields into its record.
    ///
    /// Creates the record (with a full schema rebuild) on first call.
    /// Afterwards only cached fields are visited, and only changed values
    /// are written; the schema is rebuilt if the entity's declared field
    /// count has changed.
    pub fn synchronize_out<E: Entity + ?Sized>(&mut self, entity: &mut E) {
        let id = entity.id();
        let declared = entity.field_names().len();
        let fresh = !self.records.contains_key(&id);
        if fresh || entity.sync_schema().is_stale(declared) {
            let scalars: Vec<&'static str> = entity
                .field_names()
                .iter()
                .copied()
                .filter(|name| entity.read_field(name).is_some())
                .collect();
            entity.sync_schema().rebuild(scalars, declared);
        }

        let caps = entity.capabilities();
        let record = self
            .records
            .entry(id)
            .or_insert_with(|| Record::new(entity.kind(), entity.position()));
        record.position = entity.position();
        record.collidable = caps.collidable;
        record.consumable = caps.consumable;

        let schema = entity.sync_schema().clone();
        for name in schema.iter() {
            let Some(value) = entity.read_field(name) else {
                continue;
            };
            if fresh || record.fields.get(name) != Some(&value) {
                record.fields.insert(name, value);
            }
        }
    }

    /// Write a record's synchronized values back onto its entity.
    pub fn synchronize_in<E: Entity + ?Sized>(&self, entity: &mut E) -> Result<(), WorldError> {
        let id = entity.id();
        let record = self.records.get(&id).ok_or(WorldError::MissingState { id })?;
        entity.set_position(record.position);
        let schema = entity.sync_schema().clone();
        for name in schema.iter() {
            if let Some(value) = record.fields.get(name) {
                entity.write_field(name, value);
            }
        }
        Ok(())
    }

    /// Start synchronizing a field outside the entity's declared schema and
    /// mirror its current value immediately.
    ///
    /// Returns `Ok(false)` if the field was already synchronized.
    pub fn synchronize_new_field<E: Entity + ?Sized>(
        &mut self,
        entity: &mut E,
        name: &'static str,
    ) -> Result<bool, WorldError> {
        let id = entity.id();
        if !self.records.contains_key(&id) {
            return Err(WorldError::MissingState { id });
        }
        let value = entity.read_field(name).ok_or_else(|| WorldError::UnknownField {
            id,
            field: name.to_owned(),
        })?;
        if !entity.sync_schema().register(name) {
            warn!(entity_id = %id, field = name, "field is already synchronized");
            return Ok(false);
        }
        if let Some(record) = self.records.get_mut(&id) {
            record.fields.insert(name, value);
        }
        Ok(true)
    }
}
