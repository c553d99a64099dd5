//! Core solving library for 3D tile collapse generation.
//!
//! This crate provides:
//! - `TileSet`: validated tile adjacency model (connectors + exclusions)
//! - `GridBuffer`: sparse per-cell domain store with wire serialization
//! - `Solver`: the entropy-driven collapse/propagate engine with incremental
//!   expansion
//! - `CollapseRng`: the injected random-source capability
//! - tileset loading from XML or JSON files
//!
//! ## Example
//!
//! ```ignore
//! use collapse_core::{GridBuffer, NullObserver, Solver, StdRandom, TileSet};
//! use std::sync::Arc;
//!
//! let configs = collapse_core::load_tileset("tilesets/meadow.xml")?;
//! let tiles = Arc::new(TileSet::from_configs(&configs)?);
//! let buffer = GridBuffer::new(16, 16, 4, tiles);
//! let mut solver = Solver::new(buffer, Box::new(StdRandom::from_seed(42)));
//! solver.generate(&mut NullObserver)?;
//! let resolved = solver.buffer().flattened_tiles();
//! ```

pub mod direction;
pub mod grid;
pub mod rng;
pub mod solver;
#[cfg(test)]
pub(crate) mod testutil;
pub mod tile;
pub mod tileset;

pub use direction::{Direction, DIRECTIONS};
pub use grid::{
    Cell, Domain, DomainChange, ExpandDeltas, GridBuffer, SerializedBuffer, SerializedCell,
    WireError,
};
pub use rng::{CollapseRng, StdRandom};
pub use solver::{
    NullObserver, Progress, SolveError, SolveErrorKind, SolveObserver, Solver, YIELD_INTERVAL,
};
pub use tile::{
    compatible, ConfigError, Connector, ConnectorConfig, ConnectorSlots, ConnectorTag, Exclusion,
    ExclusionConfig, Rotation, Symmetry, Tile, TileConfig, TileSet,
};
pub use tileset::{load_tileset, parse_tileset_json, parse_tileset_xml, TilesetError};
