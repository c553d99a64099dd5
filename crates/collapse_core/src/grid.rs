//! Sparse grid of per-cell tile domains.
//!
//! The buffer maps linear cell indices (`x + y*W + z*W*H`) to cells. Presence
//! in the map, not the rectangular bounds, decides membership; bounds exist
//! for coordinate translation on expansion. This keeps non-rectangular
//! regions representable without changing the store.
//!
//! Domains are bitmasks over tile indices with a cached population count, so
//! propagation intersects whole rows of u64 blocks instead of walking sets.

use crate::direction::Direction;
use crate::tile::TileSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Set of still-possible tile indices for one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    bits: Vec<u64>,
    count: usize,
}

/// Outcome of an in-place domain intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainChange {
    Unchanged,
    Shrunk,
    Emptied,
}

impl Domain {
    /// Domain containing every tile index below `len`.
    pub fn full(len: usize) -> Domain {
        let blocks = len.div_ceil(64).max(1);
        let mut bits = vec![u64::MAX; blocks];
        let tail = len % 64;
        if tail != 0 {
            bits[blocks - 1] = (1u64 << tail) - 1;
        } else if len == 0 {
            bits[0] = 0;
        }
        Domain { bits, count: len }
    }

    /// Domain containing exactly one tile index.
    pub fn singleton(len: usize, index: usize) -> Domain {
        let blocks = len.div_ceil(64).max(1);
        let mut bits = vec![0u64; blocks];
        bits[index / 64] = 1u64 << (index % 64);
        Domain { bits, count: 1 }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.bits
            .get(index / 64)
            .is_some_and(|block| block & (1 << (index % 64)) != 0)
    }

    /// Tile indices in ascending order. Ascending iteration is what makes
    /// weighted draws deterministic for a given RNG stream.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().flat_map(|(block_idx, &block)| {
            let mut bits = block;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(block_idx * 64 + bit)
            })
        })
    }

    pub fn first(&self) -> Option<usize> {
        self.iter().next()
    }

    pub(crate) fn blocks(&self) -> &[u64] {
        &self.bits
    }

    /// Intersect with a bitmask of the same block width.
    pub(crate) fn intersect(&mut self, mask: &[u64]) -> DomainChange {
        debug_assert_eq!(self.bits.len(), mask.len());
        let mut count = 0;
        for (block, &allowed) in self.bits.iter_mut().zip(mask) {
            *block &= allowed;
            count += block.count_ones() as usize;
        }
        let change = if count == self.count {
            DomainChange::Unchanged
        } else if count == 0 {
            DomainChange::Emptied
        } else {
            DomainChange::Shrunk
        };
        self.count = count;
        change
    }

    fn restrict_to(&mut self, index: usize) {
        self.bits.fill(0);
        self.bits[index / 64] = 1u64 << (index % 64);
        self.count = 1;
    }
}

/// One grid cell: its domain and, once collapsed, the resolved tile index.
///
/// Invariants: a collapsed cell's domain is the singleton of its tile; an
/// empty domain on an uncollapsed cell is the contradiction state and is
/// never repaired in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    domain: Domain,
    tile: Option<usize>,
}

impl Cell {
    fn fresh(tile_count: usize) -> Cell {
        Cell {
            domain: Domain::full(tile_count),
            tile: None,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.tile.is_some()
    }

    pub fn tile(&self) -> Option<usize> {
        self.tile
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub(crate) fn collapse(&mut self, tile: usize) {
        self.domain.restrict_to(tile);
        self.tile = Some(tile);
    }

    pub(crate) fn intersect_domain(&mut self, mask: &[u64]) -> DomainChange {
        self.domain.intersect(mask)
    }
}

/// Per-axis growth amounts for `GridBuffer::expand`. `*_min` growth shifts
/// existing cells toward higher coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandDeltas {
    #[serde(default)]
    pub x_min: usize,
    #[serde(default)]
    pub x_max: usize,
    #[serde(default)]
    pub y_min: usize,
    #[serde(default)]
    pub y_max: usize,
    #[serde(default)]
    pub z_min: usize,
    #[serde(default)]
    pub z_max: usize,
}

/// Sparse store of cell domains plus the shared tile registry.
#[derive(Debug, Clone)]
pub struct GridBuffer {
    cells: HashMap<usize, Cell>,
    width: usize,
    height: usize,
    depth: usize,
    tiles: Arc<TileSet>,
}

impl GridBuffer {
    /// Dense buffer with every cell at full domain.
    pub fn new(width: usize, height: usize, depth: usize, tiles: Arc<TileSet>) -> GridBuffer {
        let mut cells = HashMap::with_capacity(width * height * depth);
        for index in 0..width * height * depth {
            cells.insert(index, Cell::fresh(tiles.len()));
        }
        GridBuffer {
            cells,
            width,
            height,
            depth,
            tiles,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn tiles(&self) -> &Arc<TileSet> {
        &self.tiles
    }

    /// Linear index for in-bounds coordinates.
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> Option<usize> {
        if x < self.width && y < self.height && z < self.depth {
            Some(x + y * self.width + z * self.width * self.height)
        } else {
            None
        }
    }

    /// Inverse of `index`.
    #[inline]
    pub fn coords(&self, index: usize) -> (usize, usize, usize) {
        let x = index % self.width;
        let y = (index / self.width) % self.height;
        let z = index / (self.width * self.height);
        (x, y, z)
    }

    /// The cell at (x, y, z): `None` when out of bounds or not materialized.
    pub fn cell(&self, x: usize, y: usize, z: usize) -> Option<&Cell> {
        self.index(x, y, z).and_then(|i| self.cells.get(&i))
    }

    pub(crate) fn cell_by_index(&self, index: usize) -> Option<&Cell> {
        self.cells.get(&index)
    }

    pub(crate) fn cell_by_index_mut(&mut self, index: usize) -> Option<&mut Cell> {
        self.cells.get_mut(&index)
    }

    /// Coordinate of the face neighbor in `direction`, `None` when it falls
    /// off the coordinate space. Whether a cell exists there is a separate
    /// question answered by `cell`.
    pub fn neighbor_coords(
        &self,
        x: usize,
        y: usize,
        z: usize,
        direction: Direction,
    ) -> Option<(usize, usize, usize)> {
        let (dx, dy, dz) = direction.offset();
        let nx = x as i64 + dx;
        let ny = y as i64 + dy;
        let nz = z as i64 + dz;
        if nx < 0
            || ny < 0
            || nz < 0
            || nx >= self.width as i64
            || ny >= self.height as i64
            || nz >= self.depth as i64
        {
            return None;
        }
        Some((nx as usize, ny as usize, nz as usize))
    }

    /// True iff every present cell is collapsed.
    pub fn is_complete(&self) -> bool {
        self.cells.values().all(Cell::is_collapsed)
    }

    /// True iff no present, uncollapsed cell has an empty domain.
    pub fn is_valid(&self) -> bool {
        self.cells
            .values()
            .all(|cell| cell.is_collapsed() || !cell.domain().is_empty())
    }

    pub fn total_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn collapsed_count(&self) -> usize {
        self.cells.values().filter(|c| c.is_collapsed()).count()
    }

    /// Iterate present cells with their coordinates.
    pub fn iter_cells(&self) -> impl Iterator<Item = (usize, usize, usize, &Cell)> + '_ {
        self.cells.iter().map(|(&index, cell)| {
            let (x, y, z) = self.coords(index);
            (x, y, z, cell)
        })
    }

    /// Grow the buffer, producing a new one. Every old cell is copied
    /// verbatim at its translated coordinate; coordinates that were outside
    /// the old footprint start at full domain. Old coordinates that were
    /// absent (sparse membership) stay absent.
    pub fn expand(&self, deltas: &ExpandDeltas) -> GridBuffer {
        let width = self.width + deltas.x_min + deltas.x_max;
        let height = self.height + deltas.y_min + deltas.y_max;
        let depth = self.depth + deltas.z_min + deltas.z_max;

        let mut cells = HashMap::with_capacity(width * height * depth);
        for z in 0..depth {
            for y in 0..height {
                for x in 0..width {
                    let index = x + y * width + z * width * height;
                    let old = (
                        x as i64 - deltas.x_min as i64,
                        y as i64 - deltas.y_min as i64,
                        z as i64 - deltas.z_min as i64,
                    );
                    let inside_old = old.0 >= 0
                        && old.1 >= 0
                        && old.2 >= 0
                        && (old.0 as usize) < self.width
                        && (old.1 as usize) < self.height
                        && (old.2 as usize) < self.depth;
                    if inside_old {
                        let old_index = old.0 as usize
                            + old.1 as usize * self.width
                            + old.2 as usize * self.width * self.height;
                        if let Some(cell) = self.cells.get(&old_index) {
                            cells.insert(index, cell.clone());
                        }
                    } else {
                        cells.insert(index, Cell::fresh(self.tiles.len()));
                    }
                }
            }
        }

        GridBuffer {
            cells,
            width,
            height,
            depth,
            tiles: Arc::clone(&self.tiles),
        }
    }

    /// Resolved tile ids in linear-index order over the bounds; `None` for
    /// absent or uncollapsed cells.
    pub fn flattened_tiles(&self) -> Vec<Option<String>> {
        (0..self.width * self.height * self.depth)
            .map(|index| {
                self.cells
                    .get(&index)
                    .and_then(Cell::tile)
                    .map(|tile| self.tiles.id_of(tile).to_string())
            })
            .collect()
    }

    /// Flatten to the wire record.
    pub fn serialize(&self) -> SerializedBuffer {
        let mut records: Vec<SerializedCell> = self
            .cells
            .iter()
            .map(|(&index, cell)| {
                let (x, y, z) = self.coords(index);
                SerializedCell {
                    x,
                    y,
                    z,
                    collapsed: cell.is_collapsed(),
                    tile: cell.tile().map(|t| self.tiles.id_of(t).to_string()),
                    possible: cell
                        .domain()
                        .iter()
                        .map(|t| self.tiles.id_of(t).to_string())
                        .collect(),
                }
            })
            .collect();
        records.sort_by_key(|c| (c.z, c.y, c.x));
        SerializedBuffer {
            width: self.width,
            height: self.height,
            depth: self.depth,
            cells: records,
        }
    }

    /// Rebuild a buffer from the wire record. Domains are reconstructed as
    /// fresh sets; nothing aliases the record.
    pub fn deserialize(record: &SerializedBuffer, tiles: Arc<TileSet>) -> Result<GridBuffer, WireError> {
        let mut cells = HashMap::with_capacity(record.cells.len());
        for cell in &record.cells {
            let index = if cell.x < record.width && cell.y < record.height && cell.z < record.depth
            {
                cell.x + cell.y * record.width + cell.z * record.width * record.height
            } else {
                return Err(WireError::OutOfBounds {
                    x: cell.x,
                    y: cell.y,
                    z: cell.z,
                });
            };

            let mut domain = Domain::full(tiles.len());
            let mut mask = vec![0u64; tiles.len().div_ceil(64).max(1)];
            for id in &cell.possible {
                let tile = tiles
                    .index_of(id)
                    .ok_or_else(|| WireError::UnknownTile(id.clone()))?;
                mask[tile / 64] |= 1 << (tile % 64);
            }
            domain.intersect(&mask);

            let tile = match (&cell.tile, cell.collapsed) {
                (Some(id), true) => {
                    let tile = tiles
                        .index_of(id)
                        .ok_or_else(|| WireError::UnknownTile(id.clone()))?;
                    if domain.len() != 1 || !domain.contains(tile) {
                        return Err(WireError::CollapseMismatch {
                            x: cell.x,
                            y: cell.y,
                            z: cell.z,
                        });
                    }
                    Some(tile)
                }
                (None, false) => None,
                _ => {
                    return Err(WireError::CollapseMismatch {
                        x: cell.x,
                        y: cell.y,
                        z: cell.z,
                    })
                }
            };

            if cells.insert(index, Cell { domain, tile }).is_some() {
                return Err(WireError::DuplicateCell {
                    x: cell.x,
                    y: cell.y,
                    z: cell.z,
                });
            }
        }

        Ok(GridBuffer {
            cells,
            width: record.width,
            height: record.height,
            depth: record.depth,
            tiles,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

/// Flattened, side-effect-free form of one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedCell {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    pub collapsed: bool,
    pub tile: Option<String>,
    pub possible: Vec<String>,
}

/// Wire-transferable form of a whole buffer, used for worker handoff and
/// test fixtures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedBuffer {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub cells: Vec<SerializedCell>,
}

impl SerializedBuffer {
    /// Compact binary form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<SerializedBuffer, WireError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Human-readable form.
    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<SerializedBuffer, WireError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Errors raised while moving buffers across the wire boundary.
#[derive(Debug)]
pub enum WireError {
    Bincode(bincode::Error),
    Json(serde_json::Error),
    UnknownTile(String),
    OutOfBounds { x: usize, y: usize, z: usize },
    DuplicateCell { x: usize, y: usize, z: usize },
    /// Collapsed flag, tile id, and domain disagree.
    CollapseMismatch { x: usize, y: usize, z: usize },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Bincode(e) => write!(f, "binary decode error: {}", e),
            WireError::Json(e) => write!(f, "JSON decode error: {}", e),
            WireError::UnknownTile(id) => write!(f, "unknown tile id '{}'", id),
            WireError::OutOfBounds { x, y, z } => {
                write!(f, "cell ({}, {}, {}) outside buffer bounds", x, y, z)
            }
            WireError::DuplicateCell { x, y, z } => {
                write!(f, "duplicate cell record at ({}, {}, {})", x, y, z)
            }
            WireError::CollapseMismatch { x, y, z } => write!(
                f,
                "cell ({}, {}, {}) collapsed state disagrees with its domain",
                x, y, z
            ),
        }
    }
}

impl std::error::Error for WireError {}

impl From<bincode::Error> for WireError {
    fn from(e: bincode::Error) -> Self {
        WireError::Bincode(e)
    }
}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        WireError::Json(e)
    }
}
