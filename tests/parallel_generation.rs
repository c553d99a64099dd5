//! End-to-end generation through the worker pool.

use collapse_core::{
    ConnectorConfig, ExclusionConfig, Rotation, Symmetry, TileConfig, TileSet, DIRECTIONS,
};
use collapse_gen::{GeneratorConfig, GenerateError, ParallelGenerator};

/// Self-compatible tile: one group everywhere, invariant vertically,
/// symmetric horizontally.
fn uniform_config(id: &str, group: &str) -> TileConfig {
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

/// A small terrain set: connectors let everything touch, but water and grass
/// exclude each other outright, so sand has to buffer them. Always solvable
/// (sand fits anywhere) yet seams can genuinely conflict across regions.
fn terrain_tiles() -> Vec<TileConfig> {
    let grass = uniform_config("grass", "terrain");
    let sand = uniform_config("sand", "terrain");
    let mut water = uniform_config("water", "terrain");
    for dir in DIRECTIONS {
        water.exclusions.push(ExclusionConfig {
            tile: "grass".to_string(),
            direction: dir,
        });
    }
    vec![grass, sand, water]
}

fn assert_all_seams_compatible(grid: &collapse_gen::GeneratedGrid, tiles: &[TileConfig]) {
    let set = TileSet::from_configs(tiles).unwrap();
    for z in 0..grid.depth {
        for y in 0..grid.height {
            for x in 0..grid.width {
                let here = set.index_of(grid.tile_at(x, y, z)).unwrap();
                for dir in DIRECTIONS {
                    let (dx, dy, dz) = dir.offset();
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    let nz = z as i64 + dz;
                    if nx < 0
                        || ny < 0
                        || nz < 0
                        || nx >= grid.width as i64
                        || ny >= grid.height as i64
                        || nz >= grid.depth as i64
                    {
                        continue;
                    }
                    let there = set
                        .index_of(grid.tile_at(nx as usize, ny as usize, nz as usize))
                        .unwrap();
                    assert!(
                        set.compatible_indices(here, dir, there),
                        "incompatible pair {} -> {} at ({},{},{}) {}",
                        grid.tile_at(x, y, z),
                        grid.tile_at(nx as usize, ny as usize, nz as usize),
                        x,
                        y,
                        z,
                        dir
                    );
                }
            }
        }
    }
}

#[test]
fn multi_worker_generation_is_boundary_consistent() {
    let tiles = terrain_tiles();
    let config = GeneratorConfig::new(8, 8, 2).with_seed(42).with_workers(4);
    let generator = ParallelGenerator::new(config, tiles.clone()).unwrap();
    let grid = generator.generate().unwrap();

    assert_eq!(grid.tiles.len(), 8 * 8 * 2);
    assert_all_seams_compatible(&grid, &tiles);
}

#[test]
fn fixed_seed_reproduces_the_grid() {
    let tiles = terrain_tiles();
    let run = || {
        let config = GeneratorConfig::new(6, 6, 2).with_seed(7).with_workers(3);
        ParallelGenerator::new(config, tiles.clone())
            .unwrap()
            .generate()
            .unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn single_worker_matches_contract_too() {
    let tiles = vec![uniform_config("only", "g")];
    let config = GeneratorConfig::new(3, 3, 3).with_seed(42).with_workers(1);
    let grid = ParallelGenerator::new(config, tiles)
        .unwrap()
        .generate()
        .unwrap();
    assert_eq!(grid.tiles.len(), 27);
    assert!(grid.tiles.iter().all(|t| t == "only"));
}

#[test]
fn impossible_tileset_surfaces_region_failure() {
    // Every face of the tile has its own group: nothing can ever sit next to
    // anything, so any multi-cell volume fails every attempt.
    let mut config = uniform_config("hermit", "g");
    for dir in DIRECTIONS {
        let mut slot = config.connectors.get(dir).unwrap().clone();
        slot.group = format!("face-{}", dir);
        config.connectors.set(dir, slot);
    }

    let generator = ParallelGenerator::new(
        GeneratorConfig::new(4, 2, 1).with_seed(0).with_workers(2),
        vec![config],
    )
    .unwrap();

    match generator.generate() {
        Err(GenerateError::RegionFailed {
            attempts, error, ..
        }) => {
            assert_eq!(attempts, 3 + 1, "initial attempt plus max_retries");
            assert!(matches!(
                error.kind,
                collapse_gen::JobErrorKind::Contradiction
                    | collapse_gen::JobErrorKind::PropagationFailed
            ));
        }
        other => panic!("expected RegionFailed, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn expand_grows_a_generated_volume() {
    use collapse_core::{ExpandDeltas, GridBuffer, NullObserver, Solver, StdRandom};
    use std::sync::Arc;

    let tiles = terrain_tiles();
    let tile_set = Arc::new(TileSet::from_configs(&tiles).unwrap());
    let buffer = GridBuffer::new(4, 4, 1, Arc::clone(&tile_set));
    let mut solver = Solver::new(buffer, Box::new(StdRandom::from_seed(11)));
    solver.generate(&mut NullObserver).unwrap();
    let record = solver.buffer().serialize();

    let generator = ParallelGenerator::new(
        GeneratorConfig::new(4, 4, 1).with_seed(11).with_workers(1),
        tiles,
    )
    .unwrap();
    let grown = generator
        .expand(
            record,
            ExpandDeltas {
                x_max: 2,
                y_max: 2,
                ..Default::default()
            },
            Some(12),
        )
        .unwrap();

    assert_eq!(grown.len(), 6 * 6 * 1);
    assert!(grown.iter().all(Option::is_some));
}
