//! Shared helpers for unit tests.

use crate::direction::DIRECTIONS;
use crate::tile::{ConnectorConfig, Rotation, Symmetry, TileConfig};

/// A tile compatible with itself on every face: one group everywhere,
/// invariant vertically, symmetric horizontally.
pub(crate) fn uniform_config(id: &str, group: &str) -> TileConfig {
    let mut config = TileConfig::new(id);
    for dir in DIRECTIONS {
        let slot = if dir.is_vertical() {
            ConnectorConfig {
                group: group.to_string(),
                rotation: Some(Rotation::Invariant),
                symmetry: None,
            }
        } else {
            ConnectorConfig {
                group: group.to_string(),
                rotation: None,
                symmetry: Some(Symmetry::Symmetric),
            }
        };
        config.connectors.set(dir, slot);
    }
    config
}
