//! Axis-aligned face directions for 3D grid adjacency.
//!
//! Every cell has six face neighbors: east/west along X, north/south along Y,
//! and up/down along Z. There are no diagonal adjacencies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the six axis-aligned face directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    North,
    South,
    East,
    West,
}

/// All six directions, in a fixed iteration order.
pub const DIRECTIONS: [Direction; 6] = [
    Direction::Up,
    Direction::Down,
    Direction::North,
    Direction::South,
    Direction::East,
    Direction::West,
];

impl Direction {
    /// The direction pointing the opposite way.
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }

    /// Coordinate offset (dx, dy, dz) of the neighbor in this direction.
    pub fn offset(self) -> (i64, i64, i64) {
        match self {
            Direction::Up => (0, 0, 1),
            Direction::Down => (0, 0, -1),
            Direction::North => (0, 1, 0),
            Direction::South => (0, -1, 0),
            Direction::East => (1, 0, 0),
            Direction::West => (-1, 0, 0),
        }
    }

    /// True for the two Z-axis faces (up/down), which carry rotation-tagged
    /// connectors; the four horizontal faces carry symmetry-tagged ones.
    pub fn is_vertical(self) -> bool {
        matches!(self, Direction::Up | Direction::Down)
    }

    /// Stable index in `DIRECTIONS`, used for flat per-direction tables.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::North => 2,
            Direction::South => 3,
            Direction::East => 4,
            Direction::West => 5,
        }
    }

    /// Parse a lowercase face name as used in tileset files.
    pub fn from_name(name: &str) -> Option<Direction> {
        match name {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "north" => Some(Direction::North),
            "south" => Some(Direction::South),
            "east" => Some(Direction::East),
            "west" => Some(Direction::West),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_is_involution() {
        for dir in DIRECTIONS {
            assert_eq!(dir.opposite().opposite(), dir);
            assert_ne!(dir.opposite(), dir);
        }
    }

    #[test]
    fn test_offsets_cancel() {
        for dir in DIRECTIONS {
            let (dx, dy, dz) = dir.offset();
            let (ox, oy, oz) = dir.opposite().offset();
            assert_eq!((dx + ox, dy + oy, dz + oz), (0, 0, 0));
        }
    }

    #[test]
    fn test_vertical_split() {
        let vertical: Vec<_> = DIRECTIONS.iter().filter(|d| d.is_vertical()).collect();
        assert_eq!(vertical.len(), 2);
        assert!(Direction::Up.is_vertical());
        assert!(Direction::Down.is_vertical());
        assert!(!Direction::East.is_vertical());
    }

    #[test]
    fn test_index_matches_order() {
        for (i, dir) in DIRECTIONS.iter().enumerate() {
            assert_eq!(dir.index(), i);
        }
    }

    #[test]
    fn test_name_round_trip() {
        for dir in DIRECTIONS {
            assert_eq!(Direction::from_name(dir.name()), Some(dir));
        }
        assert_eq!(Direction::from_name("sideways"), None);
    }
}
