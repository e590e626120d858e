//! Enumeration types for the Zoomorph simulation.

use serde::{Deserialize, Serialize};

/// A discrete action an organism can choose each decision tick.
///
/// The action index (the position of the variant in [`Action::ALL`]) is the
/// output index of the policy model, so the order here is part of the
/// model's contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Move the attention point up (negative y).
    Up,
    /// Move the attention point down (positive y).
    Down,
    /// Move the attention point left (negative x).
    Left,
    /// Move the attention point right (positive x).
    Right,
    /// Keep the attention point where it is.
    NoMove,
}

impl Action {
    /// Every action in model-output order.
    pub const ALL: [Self; 5] = [Self::Up, Self::Down, Self::Left, Self::Right, Self::NoMove];

    /// Number of distinct actions (the policy model's output width).
    pub const COUNT: usize = Self::ALL.len();

    /// Map a model output index back to an action.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// The model output index of this action.
    pub const fn index(self) -> usize {
        match self {
            Self::Up => 0,
            Self::Down => 1,
            Self::Left => 2,
            Self::Right => 3,
            Self::NoMove => 4,
        }
    }

    /// Short display name used in action distribution reports.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::NoMove => "NO_MOVE",
        }
    }
}

/// The kind of an entity living in the world.
///
/// Snapshot records carry their kind so spatial queries can filter without
/// touching the live entity objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A policy-driven agent.
    Organism,
    /// A consumable food item.
    Food,
    /// A passive object that periodically spawns food.
    FoodSpawner,
}

impl EntityKind {
    /// Whether this kind is a passive world object rather than an agent.
    pub const fn is_item(self) -> bool {
        matches!(self, Self::Food | Self::FoodSpawner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_index_roundtrip() {
        for action in Action::ALL {
            assert_eq!(Action::from_index(action.index()), Some(action));
        }
        assert_eq!(Action::from_index(Action::COUNT), None);
    }

    #[test]
    fn item_kinds() {
        assert!(EntityKind::Food.is_item());
        assert!(EntityKind::FoodSpawner.is_item());
        assert!(!EntityKind::Organism.is_item());
    }
}
