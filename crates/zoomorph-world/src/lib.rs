//! World state for the Zoomorph simulation.
//!
//! The world is a 2D grid of entities. Entities are owned by the engine;
//! what this crate models is the per-tick [`Snapshot`]: a map from entity id
//! to a flat [`Record`] of scalar fields, cloned once per tick so every
//! entity can read a frozen "old" view while the "new" view is built.
//!
//! # Modules
//!
//! - [`geometry`] -- Positions, grid cells, world bounds, angles
//! - [`fields`] -- Scalar field values and the per-entity sync schema
//! - [`snapshot`] -- [`Snapshot`], [`Record`], and the field synchronisation
//!   protocol between entities and records
//! - [`entity`] -- The [`Entity`] capability trait and per-tick [`Effects`]
//! - [`items`] -- Passive world objects: [`Food`] and [`FoodSpawner`]
//! - [`error`] -- Error types ([`WorldError`])

pub mod entity;
pub mod error;
pub mod fields;
pub mod geometry;
pub mod items;
pub mod snapshot;

pub use entity::{Capabilities, Effects, Entity, PerceptionRequest, SpawnRequest, UpdateContext};
pub use error::WorldError;
pub use fields::{FieldValue, SyncSchema};
pub use geometry::{Cell, Position, WorldBounds};
pub use items::{Food, FoodConfig, FoodParams, FoodSpawner, FoodSpawnerConfig};
pub use snapshot::{Consumption, EntityDirectory, Record, Snapshot};
