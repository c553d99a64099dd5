//! Parallel generation: split, dispatch, reconcile, retry, merge.
//!
//! The orchestrator cuts the requested volume into disjoint regions, hands
//! each to an independent worker (shared-nothing: every region solves against
//! its own private buffer), then checks every seam. Conflicting regions are
//! retried with a fresh seed and their boundary domains pinned to whatever
//! the kept neighbors resolved, so reconciliation converges instead of
//! re-rolling both sides blind. A region whose own solve fails retries alone.
//! Every region gets at most `max_retries` retries after its first attempt.

use crate::config::GeneratorConfig;
use crate::region::{boundary_pairs, split_volume, BoundaryPair, Region};
use crate::worker::{DomainConstraint, JobError, JobEvent, JobRequest, SolverWorker};
use collapse_core::{
    CollapseRng, ConfigError, ExpandDeltas, SerializedBuffer, StdRandom, TileConfig, TileSet,
};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// Final merged output: resolved tile ids for the whole volume, flattened in
/// `x + y*W + z*W*H` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedGrid {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub tiles: Vec<String>,
}

impl GeneratedGrid {
    pub fn tile_at(&self, x: usize, y: usize, z: usize) -> &str {
        &self.tiles[x + y * self.width + z * self.width * self.height]
    }
}

/// Orchestration failures surfaced to the caller.
#[derive(Debug)]
pub enum GenerateError {
    /// Tile configuration rejected up front.
    Config(ConfigError),
    /// A region kept failing its own solve; carries the last structured
    /// error from that region.
    RegionFailed {
        region: Region,
        attempts: usize,
        error: JobError,
    },
    /// A seam stayed incompatible after the retry budget; carries the
    /// offending regions and boundary coordinates.
    BoundaryConflict {
        a: Region,
        b: Region,
        coord_a: (usize, usize, usize),
        coord_b: (usize, usize, usize),
        attempts: usize,
    },
    /// A worker's event channel closed without a final event.
    WorkerLost { region: Region },
    /// A region reported success but left cells unresolved.
    IncompleteRegion { region: Region },
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateError::Config(e) => write!(f, "invalid tile configuration: {}", e),
            GenerateError::RegionFailed {
                region,
                attempts,
                error,
            } => write!(
                f,
                "region {} failed after {} attempts: {}",
                region, attempts, error
            ),
            GenerateError::BoundaryConflict {
                a,
                b,
                coord_a,
                coord_b,
                attempts,
            } => write!(
                f,
                "regions {} and {} stayed incompatible at {:?}/{:?} after {} attempts",
                a, b, coord_a, coord_b, attempts
            ),
            GenerateError::WorkerLost { region } => {
                write!(f, "worker solving region {} disappeared", region)
            }
            GenerateError::IncompleteRegion { region } => {
                write!(f, "region {} returned an incomplete result", region)
            }
        }
    }
}

impl std::error::Error for GenerateError {}

impl From<ConfigError> for GenerateError {
    fn from(e: ConfigError) -> Self {
        GenerateError::Config(e)
    }
}

/// Region solve results live here between dispatch rounds.
type RegionData = Vec<Option<String>>;

/// Multi-worker generator over a validated tile set.
pub struct ParallelGenerator {
    config: GeneratorConfig,
    tiles: Vec<TileConfig>,
    tile_set: Arc<TileSet>,
}

impl ParallelGenerator {
    /// Validate the tile configurations once; every defect aborts here, never
    /// mid-solve.
    pub fn new(config: GeneratorConfig, tiles: Vec<TileConfig>) -> Result<ParallelGenerator, GenerateError> {
        let tile_set = Arc::new(TileSet::from_configs(&tiles)?);
        Ok(ParallelGenerator {
            config,
            tiles,
            tile_set,
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Solve the configured volume across the worker pool and merge the
    /// regions into one grid.
    pub fn generate(&self) -> Result<GeneratedGrid, GenerateError> {
        let config = &self.config;
        let regions = split_volume(config.width, config.height, config.depth, config.worker_count);
        log::info!(
            "generating {}x{}x{} across {} regions",
            config.width,
            config.height,
            config.depth,
            regions.len()
        );

        // Face adjacencies, fixed for the whole run.
        let mut adjacency: Vec<(usize, usize, Vec<BoundaryPair>)> = Vec::new();
        for i in 0..regions.len() {
            for j in (i + 1)..regions.len() {
                let pairs = boundary_pairs(&regions[i], &regions[j]);
                if !pairs.is_empty() {
                    adjacency.push((i, j, pairs));
                }
            }
        }

        let workers: Vec<SolverWorker> = (0..config.worker_count.max(1).min(regions.len()))
            .map(|_| SolverWorker::new())
            .collect();
        let mut rng: Box<dyn CollapseRng> = match config.seed {
            Some(seed) => Box::new(StdRandom::from_seed(seed)),
            None => Box::new(StdRandom::from_entropy()),
        };

        let mut results: Vec<Option<RegionData>> = vec![None; regions.len()];
        let mut attempts = vec![0usize; regions.len()];
        let mut constraints: Vec<Vec<DomainConstraint>> = vec![Vec::new(); regions.len()];
        let mut pending: Vec<usize> = (0..regions.len()).collect();

        while !pending.is_empty() {
            let mut inflight: Vec<(usize, Receiver<JobEvent>)> = Vec::new();
            for (slot, &index) in pending.iter().enumerate() {
                let region = regions[index];
                attempts[index] += 1;
                let seed = rng.next_u64();
                log::debug!(
                    "dispatching region {} (attempt {}, {} pinned cells)",
                    region,
                    attempts[index],
                    constraints[index].len()
                );
                let request = JobRequest::Generate {
                    width: region.width,
                    height: region.height,
                    depth: region.depth,
                    tiles: self.tiles.clone(),
                    seed: Some(seed),
                    bounds: None,
                    presets: Vec::new(),
                    constraints: constraints[index].clone(),
                };
                inflight.push((index, workers[slot % workers.len()].submit(request)));
            }
            pending.clear();

            for (index, rx) in inflight {
                match await_outcome(rx) {
                    Some(Ok(data)) => results[index] = Some(data),
                    Some(Err(error)) => {
                        if attempts[index] > config.max_retries {
                            return Err(GenerateError::RegionFailed {
                                region: regions[index],
                                attempts: attempts[index],
                                error,
                            });
                        }
                        log::info!(
                            "region {} attempt {} failed ({}); retrying with a fresh seed",
                            regions[index],
                            attempts[index],
                            error
                        );
                        pending.push(index);
                    }
                    None => {
                        return Err(GenerateError::WorkerLost {
                            region: regions[index],
                        })
                    }
                }
            }

            // Reconcile every seam whose two regions both have results.
            let mut failed: BTreeSet<usize> = BTreeSet::new();
            let mut conflicts: Vec<(usize, usize, BoundaryPair)> = Vec::new();
            for (i, j, pairs) in &adjacency {
                if results[*i].is_none() || results[*j].is_none() {
                    continue;
                }
                for pair in pairs {
                    let tile_a = self.region_tile(&regions[*i], results[*i].as_ref(), pair.a)?;
                    let tile_b = self.region_tile(&regions[*j], results[*j].as_ref(), pair.b)?;
                    if !self
                        .tile_set
                        .compatible_indices(tile_a, pair.direction, tile_b)
                    {
                        // The later-indexed region owns the conflict and
                        // retries; its partner is kept.
                        failed.insert(*i.max(j));
                        conflicts.push((*i, *j, *pair));
                    }
                }
            }

            for &index in &failed {
                if attempts[index] > config.max_retries {
                    let (i, j, pair) = conflicts
                        .iter()
                        .find(|(i, j, _)| *i == index || *j == index)
                        .copied()
                        .expect("failed region has a recorded conflict");
                    return Err(GenerateError::BoundaryConflict {
                        a: regions[i],
                        b: regions[j],
                        coord_a: pair.a,
                        coord_b: pair.b,
                        attempts: attempts[index],
                    });
                }
                log::info!(
                    "region {} conflicts at its seams; retrying pinned to kept neighbors",
                    regions[index]
                );
                constraints[index] =
                    self.boundary_constraints(index, &regions, &adjacency, &results, &failed)?;
                results[index] = None;
                pending.push(index);
            }
        }

        self.merge(&regions, results)
    }

    /// Run one expand job (incremental growth is single-solver work) and
    /// return the grown, re-solved buffer data.
    pub fn expand(
        &self,
        buffer: SerializedBuffer,
        deltas: ExpandDeltas,
        seed: Option<u64>,
    ) -> Result<Vec<Option<String>>, GenerateError> {
        let worker = SolverWorker::new();
        let region = Region {
            x: 0,
            y: 0,
            z: 0,
            width: buffer.width + deltas.x_min + deltas.x_max,
            height: buffer.height + deltas.y_min + deltas.y_max,
            depth: buffer.depth + deltas.z_min + deltas.z_max,
        };
        let rx = worker.submit(JobRequest::Expand {
            buffer,
            deltas,
            tiles: self.tiles.clone(),
            seed,
        });
        match await_outcome(rx) {
            Some(Ok(data)) => Ok(data),
            Some(Err(error)) => Err(GenerateError::RegionFailed {
                region,
                attempts: 1,
                error,
            }),
            None => Err(GenerateError::WorkerLost { region }),
        }
    }

    /// Resolved tile index at a global coordinate inside a region's result.
    fn region_tile(
        &self,
        region: &Region,
        data: Option<&RegionData>,
        coord: (usize, usize, usize),
    ) -> Result<usize, GenerateError> {
        let data = data.expect("caller checked presence");
        let (x, y, z) = region
            .to_local(coord.0, coord.1, coord.2)
            .expect("boundary coordinate inside owning region");
        let id = data[x + y * region.width + z * region.width * region.height]
            .as_deref()
            .ok_or(GenerateError::IncompleteRegion { region: *region })?;
        self.tile_set
            .index_of(id)
            .ok_or(GenerateError::IncompleteRegion { region: *region })
    }

    /// Constraints pinning a retried region's boundary cells to tiles
    /// compatible with what its kept neighbors resolved.
    fn boundary_constraints(
        &self,
        index: usize,
        regions: &[Region],
        adjacency: &[(usize, usize, Vec<BoundaryPair>)],
        results: &[Option<RegionData>],
        failed: &BTreeSet<usize>,
    ) -> Result<Vec<DomainConstraint>, GenerateError> {
        let mut constraints = Vec::new();
        for (i, j, pairs) in adjacency {
            let (other, mine_is_a) = if *i == index {
                (*j, true)
            } else if *j == index {
                (*i, false)
            } else {
                continue;
            };
            if failed.contains(&other) || results[other].is_none() {
                continue;
            }

            for pair in pairs {
                let (my_coord, their_coord, to_neighbor) = if mine_is_a {
                    (pair.a, pair.b, pair.direction)
                } else {
                    (pair.b, pair.a, pair.direction.opposite())
                };
                let neighbor_tile =
                    self.region_tile(&regions[other], results[other].as_ref(), their_coord)?;

                let allowed: Vec<String> = (0..self.tile_set.len())
                    .filter(|&t| {
                        self.tile_set
                            .compatible_indices(t, to_neighbor, neighbor_tile)
                    })
                    .map(|t| self.tile_set.id_of(t).to_string())
                    .collect();

                let (x, y, z) = regions[index]
                    .to_local(my_coord.0, my_coord.1, my_coord.2)
                    .expect("boundary coordinate inside owning region");
                constraints.push(DomainConstraint { x, y, z, allowed });
            }
        }
        Ok(constraints)
    }

    /// Concatenate per-region results into the global grid.
    fn merge(
        &self,
        regions: &[Region],
        mut results: Vec<Option<RegionData>>,
    ) -> Result<GeneratedGrid, GenerateError> {
        let config = &self.config;
        let mut tiles: Vec<Option<String>> =
            vec![None; config.width * config.height * config.depth];

        for (index, region) in regions.iter().enumerate() {
            let data = results[index]
                .take()
                .ok_or(GenerateError::IncompleteRegion { region: *region })?;
            for z in 0..region.depth {
                for y in 0..region.height {
                    for x in 0..region.width {
                        let local = x + y * region.width + z * region.width * region.height;
                        let tile = data[local]
                            .clone()
                            .ok_or(GenerateError::IncompleteRegion { region: *region })?;
                        let (gx, gy, gz) = region.to_global(x, y, z);
                        let global = gx + gy * config.width + gz * config.width * config.height;
                        tiles[global] = Some(tile);
                    }
                }
            }
        }

        // Regions cover the volume exactly, so nothing is left unset.
        let total = tiles.len();
        let tiles: Vec<String> = tiles.into_iter().flatten().collect();
        debug_assert_eq!(tiles.len(), total);

        log::info!("generation complete: {} cells merged", tiles.len());
        Ok(GeneratedGrid {
            width: config.width,
            height: config.height,
            depth: config.depth,
            tiles,
        })
    }
}

/// Drain a job's events down to its final outcome. `None` means the channel
/// closed without one.
fn await_outcome(rx: Receiver<JobEvent>) -> Option<Result<RegionData, JobError>> {
    for event in rx {
        match event {
            JobEvent::Complete { data, .. } => return Some(Ok(data)),
            JobEvent::Error { error } => return Some(Err(error)),
            JobEvent::Progress { .. } | JobEvent::TileUpdate { .. } => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::uniform_config;

    #[test]
    fn test_generated_grid_indexing() {
        let grid = GeneratedGrid {
            width: 2,
            height: 2,
            depth: 1,
            tiles: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        };
        assert_eq!(grid.tile_at(0, 0, 0), "a");
        assert_eq!(grid.tile_at(1, 1, 0), "d");
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let mut broken = uniform_config("t", "g");
        broken.connectors.down = None;
        let result = ParallelGenerator::new(GeneratorConfig::new(4, 4, 1), vec![broken]);
        assert!(matches!(result, Err(GenerateError::Config(_))));
    }
}
