//! Positions, cells, and world bounds.
//!
//! Positions are continuous; occupancy is decided on the integer cell that
//! contains a position (`floor` of each coordinate).

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// A point in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate (grows downwards).
    pub y: f64,
}

impl Position {
    /// Build a position.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(self, other: Self) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Bearing from `self` to `other` in radians, in `(-pi, pi]`.
    pub fn angle_to(self, other: Self) -> f64 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    /// Bearing mapped from `[-pi, pi]` onto `[0, 1]`.
    pub fn normalized_angle_to(self, other: Self) -> f64 {
        (self.angle_to(other) + PI) / (2.0 * PI)
    }

    /// Translate by `(dx, dy)`.
    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    /// The grid cell containing this position.
    pub fn cell(self) -> Cell {
        Cell {
            x: floor_to_i64(self.x),
            y: floor_to_i64(self.y),
        }
    }
}

/// An integer grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cell {
    /// Column.
    pub x: i64,
    /// Row.
    pub y: i64,
}

impl Cell {
    /// Build a cell.
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// The cell `distance` steps away along `(dx, dy)`.
    pub const fn step(self, dx: i64, dy: i64, distance: i64) -> Self {
        Self {
            x: self.x.saturating_add(dx.saturating_mul(distance)),
            y: self.y.saturating_add(dy.saturating_mul(distance)),
        }
    }

    /// Top-left corner of the cell as a position.
    pub fn position(self) -> Position {
        Position::new(i64_to_f64(self.x), i64_to_f64(self.y))
    }
}

/// World extent in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldBounds {
    /// Number of columns.
    pub width: u32,
    /// Number of rows.
    pub height: u32,
}

impl WorldBounds {
    /// Build bounds.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Largest valid x coordinate.
    pub fn max_x(self) -> f64 {
        f64::from(self.width.saturating_sub(1))
    }

    /// Largest valid y coordinate.
    pub fn max_y(self) -> f64 {
        f64::from(self.height.saturating_sub(1))
    }

    /// Clamp a position into `[0, width - 1] x [0, height - 1]`.
    pub fn clamp(self, position: Position) -> Position {
        Position::new(
            position.x.clamp(0.0, self.max_x()),
            position.y.clamp(0.0, self.max_y()),
        )
    }

    /// Clamp a cell into the world.
    pub fn clamp_cell(self, cell: Cell) -> Cell {
        Cell::new(
            cell.x.clamp(0, i64::from(self.width.saturating_sub(1))),
            cell.y.clamp(0, i64::from(self.height.saturating_sub(1))),
        )
    }

    /// Whether `cell` lies inside the world.
    pub fn contains(self, cell: Cell) -> bool {
        (0..i64::from(self.width)).contains(&cell.x) && (0..i64::from(self.height)).contains(&cell.y)
    }

    /// Number of cells.
    pub fn cell_count(self) -> u64 {
        u64::from(self.width).saturating_mul(u64::from(self.height))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn floor_to_i64(value: f64) -> i64 {
    if value.is_nan() {
        return 0;
    }
    // Saturating float-to-int conversion.
    value.floor() as i64
}

#[allow(clippy::cast_precision_loss)]
fn i64_to_f64(value: i64) -> f64 {
    value as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_and_angle() {
        let origin = Position::new(0.0, 0.0);
        let target = Position::new(3.0, 4.0);
        assert!((origin.distance(target) - 5.0).abs() < 1e-12);
        let right = Position::new(1.0, 0.0);
        assert!(origin.angle_to(right).abs() < 1e-12);
        assert!((origin.normalized_angle_to(right) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn cell_floors_coordinates() {
        assert_eq!(Position::new(2.9, 3.1).cell(), Cell::new(2, 3));
        assert_eq!(Position::new(-0.5, 0.0).cell(), Cell::new(-1, 0));
    }

    #[test]
    fn clamp_keeps_inside() {
        let bounds = WorldBounds::new(10, 5);
        let clamped = bounds.clamp(Position::new(12.0, -3.0));
        assert_eq!(clamped.cell(), Cell::new(9, 0));
        assert!(bounds.contains(Cell::new(9, 4)));
        assert!(!bounds.contains(Cell::new(10, 4)));
        assert!(!bounds.contains(Cell::new(0, -1)));
    }

    #[test]
    fn cell_steps_along_direction() {
        assert_eq!(Cell::new(5, 5).step(-1, 1, 3), Cell::new(2, 8));
    }
}
