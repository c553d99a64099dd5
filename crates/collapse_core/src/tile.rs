//! Tile adjacency model: connectors, exclusions, and the validated tile set.
//!
//! A tile carries one connector per face. Two tiles may sit next to each other
//! in a direction when the facing connectors fit and neither tile excludes the
//! other across that face. `TileSet` validates a batch of tile configurations
//! up front and precomputes the full per-direction compatibility table as flat
//! bitmask rows, so the solver never re-evaluates connector logic in its inner
//! loop.

use crate::direction::{Direction, DIRECTIONS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Orientation tag for connectors on the two vertical faces (up/down).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    /// Fits any rotation of the same group.
    Invariant,
    Rot0,
    Rot90,
    Rot180,
    Rot270,
}

/// Mirror tag for connectors on the four horizontal faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symmetry {
    /// Fits both flipped and unflipped counterparts of the same group.
    Symmetric,
    Flipped,
    NotFlipped,
}

/// The orientation half of a connector: rotation on vertical faces,
/// symmetry on horizontal faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorTag {
    Rotation(Rotation),
    Symmetry(Symmetry),
}

/// Per-face compatibility descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connector {
    pub group: String,
    pub tag: ConnectorTag,
}

impl Connector {
    /// Whether this connector fits `other` across a shared face.
    ///
    /// Groups must match. Rotation tags fit when either side is invariant or
    /// both rotations are equal; symmetry tags fit when either side is
    /// symmetric or the sides are a flipped/not-flipped pair. A rotation tag
    /// never fits a symmetry tag.
    pub fn fits(&self, other: &Connector) -> bool {
        if self.group != other.group {
            return false;
        }
        match (self.tag, other.tag) {
            (ConnectorTag::Rotation(a), ConnectorTag::Rotation(b)) => {
                a == Rotation::Invariant || b == Rotation::Invariant || a == b
            }
            (ConnectorTag::Symmetry(a), ConnectorTag::Symmetry(b)) => {
                a == Symmetry::Symmetric
                    || b == Symmetry::Symmetric
                    || (a == Symmetry::Flipped && b == Symmetry::NotFlipped)
                    || (a == Symmetry::NotFlipped && b == Symmetry::Flipped)
            }
            _ => false,
        }
    }
}

/// Forbids a tile pair from being adjacent in one direction, regardless of
/// connector fit. Applied bidirectionally during table construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusion {
    pub tile: String,
    pub direction: Direction,
}

// ---------------------------------------------------------------------------
// Configuration input
// ---------------------------------------------------------------------------

/// One connector as it appears in configuration input. Exactly one of
/// `rotation`/`symmetry` must be present, matching the face it sits on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symmetry: Option<Symmetry>,
}

/// The six connector slots of a tile configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorSlots {
    pub up: Option<ConnectorConfig>,
    pub down: Option<ConnectorConfig>,
    pub north: Option<ConnectorConfig>,
    pub south: Option<ConnectorConfig>,
    pub east: Option<ConnectorConfig>,
    pub west: Option<ConnectorConfig>,
}

impl ConnectorSlots {
    pub fn get(&self, direction: Direction) -> Option<&ConnectorConfig> {
        match direction {
            Direction::Up => self.up.as_ref(),
            Direction::Down => self.down.as_ref(),
            Direction::North => self.north.as_ref(),
            Direction::South => self.south.as_ref(),
            Direction::East => self.east.as_ref(),
            Direction::West => self.west.as_ref(),
        }
    }

    pub fn set(&mut self, direction: Direction, connector: ConnectorConfig) {
        let slot = match direction {
            Direction::Up => &mut self.up,
            Direction::Down => &mut self.down,
            Direction::North => &mut self.north,
            Direction::South => &mut self.south,
            Direction::East => &mut self.east,
            Direction::West => &mut self.west,
        };
        *slot = Some(connector);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionConfig {
    pub tile: String,
    pub direction: Direction,
}

fn default_weight() -> f64 {
    1.0
}

/// Solver-facing tile configuration: id, weight, connectors, exclusions.
/// Any visual payload stays on the rendering side and never enters here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileConfig {
    pub id: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub connectors: ConnectorSlots,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<ExclusionConfig>,
}

impl TileConfig {
    /// Start a config with the given id and default weight; connectors are
    /// filled in with `ConnectorSlots::set` or the tileset loader.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            weight: 1.0,
            connectors: ConnectorSlots::default(),
            exclusions: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validated model
// ---------------------------------------------------------------------------

/// Errors raised while validating tile configurations. All of these are fatal
/// at construction; none can surface mid-solve.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    EmptyTileSet,
    DuplicateTile(String),
    MissingConnector {
        tile: String,
        direction: Direction,
    },
    /// Rotation tag on a horizontal face, symmetry tag on a vertical face,
    /// or a connector carrying neither/both tags.
    ConnectorTagMismatch {
        tile: String,
        direction: Direction,
    },
    NonPositiveWeight {
        tile: String,
        weight: f64,
    },
    UnknownExclusionTile {
        tile: String,
        target: String,
    },
    /// The built table disagrees with its mirror image; connector pairings in
    /// the configuration are asymmetric.
    AsymmetricCompatibility {
        a: String,
        direction: Direction,
        b: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyTileSet => write!(f, "tile set contains no tiles"),
            ConfigError::DuplicateTile(id) => write!(f, "duplicate tile id '{}'", id),
            ConfigError::MissingConnector { tile, direction } => {
                write!(f, "tile '{}' has no {} connector", tile, direction)
            }
            ConfigError::ConnectorTagMismatch { tile, direction } => write!(
                f,
                "tile '{}' {} connector must carry exactly one tag: a rotation on \
                 vertical faces, a symmetry on horizontal faces",
                tile, direction
            ),
            ConfigError::NonPositiveWeight { tile, weight } => {
                write!(f, "tile '{}' has non-positive weight {}", tile, weight)
            }
            ConfigError::UnknownExclusionTile { tile, target } => {
                write!(f, "tile '{}' excludes unknown tile '{}'", tile, target)
            }
            ConfigError::AsymmetricCompatibility { a, direction, b } => write!(
                f,
                "asymmetric compatibility: '{}' {} '{}' disagrees with the reverse check",
                a, direction, b
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A validated tile: six connectors, positive weight, resolved exclusions.
#[derive(Debug, Clone)]
pub struct Tile {
    pub id: String,
    pub weight: f64,
    connectors: [Connector; 6],
    exclusions: Vec<Exclusion>,
}

impl Tile {
    pub fn connector(&self, direction: Direction) -> &Connector {
        &self.connectors[direction.index()]
    }

    pub fn exclusions(&self) -> &[Exclusion] {
        &self.exclusions
    }

    fn excludes(&self, other_id: &str, direction: Direction) -> bool {
        self.exclusions
            .iter()
            .any(|e| e.direction == direction && e.tile == other_id)
    }
}

/// Whether `a` may have `b` as its neighbor in `direction`.
///
/// Connector fit is checked between `a`'s face and `b`'s opposite face, then
/// exclusions in both directions. The result is symmetric:
/// `compatible(a, d, b) == compatible(b, d.opposite(), a)`.
pub fn compatible(a: &Tile, direction: Direction, b: &Tile) -> bool {
    let facing = direction.opposite();
    if !a.connector(direction).fits(b.connector(facing)) {
        return false;
    }
    !a.excludes(&b.id, direction) && !b.excludes(&a.id, facing)
}

/// Validated tile registry with the precomputed compatibility table.
///
/// The table is stored as flat bitmask rows: `support(direction, tile)` is a
/// bitmask over all tiles that may sit on that side. The solver intersects
/// cell domains against unions of these rows during propagation.
#[derive(Debug, Clone)]
pub struct TileSet {
    tiles: Vec<Tile>,
    index: HashMap<String, usize>,
    /// Number of u64 blocks per bitmask row.
    blocks: usize,
    /// Row-major: `support[(d * len + tile) * blocks ..][..blocks]`.
    support: Vec<u64>,
}

impl TileSet {
    /// Validate configurations and build the registry.
    ///
    /// Fails fast on structural defects: empty set, duplicate ids, missing or
    /// mistagged connectors, non-positive weights, exclusions naming unknown
    /// tiles, and asymmetric compatibility.
    pub fn from_configs(configs: &[TileConfig]) -> Result<TileSet, ConfigError> {
        if configs.is_empty() {
            return Err(ConfigError::EmptyTileSet);
        }

        let mut index = HashMap::new();
        for (i, config) in configs.iter().enumerate() {
            if index.insert(config.id.clone(), i).is_some() {
                return Err(ConfigError::DuplicateTile(config.id.clone()));
            }
        }

        let mut tiles = Vec::with_capacity(configs.len());
        for config in configs {
            tiles.push(validate_tile(config, &index)?);
        }

        let len = tiles.len();
        let blocks = len.div_ceil(64);
        let mut support = vec![0u64; 6 * len * blocks];

        for dir in DIRECTIONS {
            for a in 0..len {
                let row = (dir.index() * len + a) * blocks;
                for b in 0..len {
                    if compatible(&tiles[a], dir, &tiles[b]) {
                        support[row + b / 64] |= 1 << (b % 64);
                    }
                }
            }
        }

        let set = TileSet {
            tiles,
            index,
            blocks,
            support,
        };
        set.verify_symmetry()?;
        log::debug!(
            "built tile set: {} tiles, {} support rows",
            set.tiles.len(),
            6 * set.tiles.len()
        );
        Ok(set)
    }

    /// Cross-check the table against its mirror: every pairing must read the
    /// same from both sides. A violation is a configuration defect, so it
    /// surfaces as a `ConfigError` here and never as a solver outcome.
    fn verify_symmetry(&self) -> Result<(), ConfigError> {
        for dir in DIRECTIONS {
            for a in 0..self.tiles.len() {
                for b in 0..self.tiles.len() {
                    if self.compatible_indices(a, dir, b)
                        != self.compatible_indices(b, dir.opposite(), a)
                    {
                        return Err(ConfigError::AsymmetricCompatibility {
                            a: self.tiles[a].id.clone(),
                            direction: dir,
                            b: self.tiles[b].id.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn get(&self, index: usize) -> &Tile {
        &self.tiles[index]
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn id_of(&self, index: usize) -> &str {
        &self.tiles[index].id
    }

    pub fn weight_of(&self, index: usize) -> f64 {
        self.tiles[index].weight
    }

    /// Bits per bitmask row (one per tile, rounded up to u64 blocks).
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Bitmask row of tiles allowed next to `tile` in `direction`.
    #[inline]
    pub fn support_row(&self, direction: Direction, tile: usize) -> &[u64] {
        let start = (direction.index() * self.tiles.len() + tile) * self.blocks;
        &self.support[start..start + self.blocks]
    }

    /// Table lookup form of the compatibility predicate.
    #[inline]
    pub fn compatible_indices(&self, a: usize, direction: Direction, b: usize) -> bool {
        self.support_row(direction, a)[b / 64] & (1 << (b % 64)) != 0
    }
}

fn validate_tile(config: &TileConfig, index: &HashMap<String, usize>) -> Result<Tile, ConfigError> {
    if !(config.weight.is_finite() && config.weight > 0.0) {
        return Err(ConfigError::NonPositiveWeight {
            tile: config.id.clone(),
            weight: config.weight,
        });
    }

    let mut connectors = Vec::with_capacity(6);
    for dir in DIRECTIONS {
        let slot = config
            .connectors
            .get(dir)
            .ok_or_else(|| ConfigError::MissingConnector {
                tile: config.id.clone(),
                direction: dir,
            })?;
        let tag = match (dir.is_vertical(), slot.rotation, slot.symmetry) {
            (true, Some(rotation), None) => ConnectorTag::Rotation(rotation),
            (false, None, Some(symmetry)) => ConnectorTag::Symmetry(symmetry),
            _ => {
                return Err(ConfigError::ConnectorTagMismatch {
                    tile: config.id.clone(),
                    direction: dir,
                })
            }
        };
        connectors.push(Connector {
            group: slot.group.clone(),
            tag,
        });
    }
    let connectors: [Connector; 6] = connectors.try_into().expect("six directions");

    let mut exclusions = Vec::with_capacity(config.exclusions.len());
    for exclusion in &config.exclusions {
        if !index.contains_key(&exclusion.tile) {
            return Err(ConfigError::UnknownExclusionTile {
                tile: config.id.clone(),
                target: exclusion.tile.clone(),
            });
        }
        exclusions.push(Exclusion {
            tile: exclusion.tile.clone(),
            direction: exclusion.direction,
        });
    }

    Ok(Tile {
        id: config.id.clone(),
        weight: config.weight,
        connectors,
        exclusions,
    })
}
