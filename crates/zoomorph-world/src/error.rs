//! Error types for the `zoomorph-world` crate.

use zoomorph_types::EntityId;

/// Errors raised by snapshot operations and entity callbacks.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// A live entity has no record in the snapshot. This is a registration
    /// bug and is never retried.
    #[error("no snapshot record for entity {id}")]
    MissingState {
        /// The entity.
        id: EntityId,
    },

    /// Every in-bounds cell is occupied.
    #[error("no empty cell in the {width}x{height} world")]
    NoEmptyCell {
        /// World width in cells.
        width: u32,
        /// World height in cells.
        height: u32,
    },

    /// A field was named for synchronisation but the entity cannot read it
    /// as a scalar.
    #[error("entity {id} has no synchronizable field '{field}'")]
    UnknownField {
        /// The entity.
        id: EntityId,
        /// The requested field.
        field: String,
    },

    /// An entity's own update or apply step failed.
    #[error("entity {id} failed: {reason}")]
    Entity {
        /// The entity.
        id: EntityId,
        /// What went wrong.
        reason: String,
    },
}
