//! Spatial queries over a snapshot.
//!
//! Everything here reads snapshot records only, never live entities, so the
//! same functions serve the perceive phase (old snapshot) and the apply
//! phase (new snapshot).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use zoomorph_types::{EntityId, EntityKind};
use zoomorph_world::{Cell, Position, Snapshot, WorldError};

/// The eight ring-search directions.
const DIRECTIONS: [(i64, i64); 8] = [
    (0, 1),
    (1, 0),
    (0, -1),
    (-1, 0),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

// ---------------------------------------------------------------------------
// Nearest neighbours
// ---------------------------------------------------------------------------

/// Heap entry ordered by distance, then by insertion order.
#[derive(Debug)]
struct Candidate {
    distance: f64,
    seq: usize,
    id: EntityId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Up to `count` live records of `kind` within `radius` of `from`, nearest
/// first. Equal distances keep iteration order (id order).
///
/// A bounded max-heap keeps the current `count` best, so the cost is
/// `O(n log count)`.
pub fn nearest(
    snapshot: &Snapshot,
    from: Position,
    kind: Option<EntityKind>,
    count: usize,
    radius: f64,
    exclude: Option<EntityId>,
) -> Vec<EntityId> {
    if count == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(count.saturating_add(1));
    for (seq, (id, record)) in snapshot.entries(kind).enumerate() {
        if exclude == Some(id) {
            continue;
        }
        let distance = from.distance(record.position);
        if distance > radius {
            continue;
        }
        let candidate = Candidate { distance, seq, id };
        if heap.len() < count {
            heap.push(candidate);
        } else if let Some(mut worst) = heap.peek_mut()
            && candidate < *worst
        {
            *worst = candidate;
        }
    }
    heap.into_sorted_vec()
        .into_iter()
        .map(|candidate| candidate.id)
        .collect()
}

// ---------------------------------------------------------------------------
// Occupancy
// ---------------------------------------------------------------------------

/// In-bounds cells held by collidable, unmarked records.
pub fn occupied_cells(snapshot: &Snapshot) -> HashSet<Cell> {
    let bounds = snapshot.bounds();
    snapshot
        .records()
        .filter(|(_, record)| record.occupies_cell())
        .map(|(_, record)| record.position.cell())
        .filter(|cell| bounds.contains(*cell))
        .collect()
}

/// Whether `cell` is free of collidable, unmarked records.
pub fn is_cell_empty(snapshot: &Snapshot, cell: Cell) -> bool {
    !snapshot
        .records()
        .any(|(_, record)| record.occupies_cell() && record.position.cell() == cell)
}

/// The empty cell nearest to `position`.
///
/// The starting cell (clamped into the world) is returned when free.
/// Otherwise rings of growing radius are searched: the eight ray cells of
/// each ring first, in an order shuffled per call, then the rest of the
/// ring.
///
/// # Errors
///
/// [`WorldError::NoEmptyCell`] when every cell is occupied.
pub fn nearest_empty_cell(
    snapshot: &Snapshot,
    position: Position,
    rng: &mut StdRng,
) -> Result<Position, WorldError> {
    let bounds = snapshot.bounds();
    let full = WorldError::NoEmptyCell {
        width: bounds.width,
        height: bounds.height,
    };
    let occupied = occupied_cells(snapshot);
    if u64::try_from(occupied.len()).unwrap_or(u64::MAX) >= bounds.cell_count() {
        return Err(full);
    }

    let start = bounds.clamp_cell(position.cell());
    let free = |cell: Cell| bounds.contains(cell) && !occupied.contains(&cell);
    if free(start) {
        return Ok(start.position());
    }

    let mut directions = DIRECTIONS;
    directions.shuffle(rng);
    let max_distance = i64::from(bounds.width.max(bounds.height));
    for distance in 1..=max_distance {
        if let Some(cell) = directions
            .iter()
            .map(|&(dx, dy)| start.step(dx, dy, distance))
            .find(|cell| free(*cell))
        {
            return Ok(cell.position());
        }
        if let Some(cell) = ring(start, distance).find(|cell| free(*cell)) {
            return Ok(cell.position());
        }
    }
    Err(full)
}

/// Cells at Chebyshev distance `distance` from `centre`.
fn ring(centre: Cell, distance: i64) -> impl Iterator<Item = Cell> {
    let low = distance.saturating_neg();
    let horizontal = (low..=distance).flat_map(move |dx| {
        [
            centre.step(1, 0, dx).step(0, 1, low),
            centre.step(1, 0, dx).step(0, 1, distance),
        ]
    });
    let inner_low = low.saturating_add(1);
    let inner_high = distance.saturating_sub(1);
    let vertical = (inner_low..=inner_high).flat_map(move |dy| {
        [
            centre.step(0, 1, dy).step(1, 0, low),
            centre.step(0, 1, dy).step(1, 0, distance),
        ]
    });
    horizontal.chain(vertical)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use zoomorph_world::{Record, WorldBounds};

    use super::*;

    fn place(snapshot: &mut Snapshot, kind: EntityKind, x: f64, y: f64) -> EntityId {
        let id = EntityId::new();
        let mut record = Record::new(kind, Position::new(x, y));
        record.collidable = true;
        record.consumable = kind == EntityKind::Food;
        snapshot.upsert(id, record);
        id
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(11)
    }

    #[test]
    fn nearest_orders_by_distance_and_caps_count() {
        let mut snapshot = Snapshot::new(WorldBounds::new(100, 100));
        let far = place(&mut snapshot, EntityKind::Food, 40.0, 0.0);
        let near = place(&mut snapshot, EntityKind::Food, 10.0, 0.0);
        let mid = place(&mut snapshot, EntityKind::Food, 20.0, 0.0);
        place(&mut snapshot, EntityKind::Organism, 1.0, 0.0);

        let origin = Position::new(0.0, 0.0);
        let found = nearest(&snapshot, origin, Some(EntityKind::Food), 2, 100.0, None);
        assert_eq!(found, vec![near, mid]);

        let all = nearest(&snapshot, origin, Some(EntityKind::Food), 10, 100.0, None);
        assert_eq!(all, vec![near, mid, far]);
    }

    #[test]
    fn nearest_respects_radius_exclusion_and_marks() {
        let mut snapshot = Snapshot::new(WorldBounds::new(100, 100));
        let me = place(&mut snapshot, EntityKind::Organism, 0.0, 0.0);
        let eaten = place(&mut snapshot, EntityKind::Food, 1.0, 0.0);
        let kept = place(&mut snapshot, EntityKind::Food, 3.0, 4.0);
        place(&mut snapshot, EntityKind::Food, 50.0, 50.0);
        snapshot.mark_for_deletion(eaten);

        let found = nearest(&snapshot, Position::new(0.0, 0.0), None, 5, 5.0, Some(me));
        assert_eq!(found, vec![kept]);
        assert!(nearest(&snapshot, Position::new(0.0, 0.0), None, 0, 5.0, None).is_empty());
    }

    #[test]
    fn nearest_ties_keep_iteration_order() {
        let mut snapshot = Snapshot::new(WorldBounds::new(100, 100));
        place(&mut snapshot, EntityKind::Food, 10.0, 0.0);
        place(&mut snapshot, EntityKind::Food, 0.0, 10.0);
        place(&mut snapshot, EntityKind::Food, 10.0, 0.0);
        let in_order: Vec<EntityId> = snapshot.records().map(|(id, _)| id).collect();

        let found = nearest(&snapshot, Position::new(0.0, 0.0), None, 2, 20.0, None);
        assert_eq!(found, in_order.iter().take(2).copied().collect::<Vec<_>>());
        let found = nearest(&snapshot, Position::new(0.0, 0.0), None, 3, 20.0, None);
        assert_eq!(found, in_order);
    }

    #[test]
    fn free_start_cell_is_returned_clamped() {
        let snapshot = Snapshot::new(WorldBounds::new(10, 10));
        let cell = nearest_empty_cell(&snapshot, Position::new(25.0, -3.0), &mut rng()).unwrap();
        assert_eq!(cell, Position::new(9.0, 0.0));
    }

    #[test]
    fn occupied_start_moves_to_adjacent_cell() {
        let mut snapshot = Snapshot::new(WorldBounds::new(10, 10));
        place(&mut snapshot, EntityKind::Organism, 5.0, 5.0);
        let cell = nearest_empty_cell(&snapshot, Position::new(5.4, 5.6), &mut rng()).unwrap();
        assert!((cell.x - 5.0).abs() <= 1.0 && (cell.y - 5.0).abs() <= 1.0);
        assert_ne!(cell, Position::new(5.0, 5.0));
    }

    #[test]
    fn finds_last_free_cell_off_the_rays() {
        let mut snapshot = Snapshot::new(WorldBounds::new(5, 5));
        for x in 0..5_i32 {
            for y in 0..5_i32 {
                if (x, y) != (3, 0) {
                    place(&mut snapshot, EntityKind::Organism, f64::from(x), f64::from(y));
                }
            }
        }
        let cell = nearest_empty_cell(&snapshot, Position::new(0.0, 4.0), &mut rng()).unwrap();
        assert_eq!(cell, Position::new(3.0, 0.0));
    }

    #[test]
    fn full_two_by_two_world_has_no_empty_cell() {
        let mut snapshot = Snapshot::new(WorldBounds::new(2, 2));
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)] {
            place(&mut snapshot, EntityKind::Organism, x, y);
        }
        let result = nearest_empty_cell(&snapshot, Position::new(0.0, 0.0), &mut rng());
        assert!(matches!(
            result,
            Err(WorldError::NoEmptyCell { width: 2, height: 2 })
        ));
    }

    #[test]
    fn marked_and_non_collidable_records_do_not_occupy() {
        let mut snapshot = Snapshot::new(WorldBounds::new(4, 4));
        let gone = place(&mut snapshot, EntityKind::Organism, 1.0, 1.0);
        snapshot.mark_for_deletion(gone);
        snapshot.upsert(
            EntityId::new(),
            Record::new(EntityKind::FoodSpawner, Position::new(2.0, 2.0)),
        );
        assert!(is_cell_empty(&snapshot, Cell::new(1, 1)));
        assert!(is_cell_empty(&snapshot, Cell::new(2, 2)));
        assert!(occupied_cells(&snapshot).is_empty());
    }
}
