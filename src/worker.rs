//! Asynchronous solve jobs over a background worker thread.
//!
//! The message shapes here are the external contract: requests describe a
//! whole solve (`Generate`) or incremental growth of a previously serialized
//! buffer (`Expand`); events stream progress, per-cell tile updates, and the
//! final outcome. They are all serde types, so the same contract works over
//! any channel, not just the in-process one used here.
//!
//! `SolverWorker` runs jobs on its own thread: one solver with a privately
//! owned grid buffer per job, events forwarded through an `mpsc` channel.

use crate::region::Region;
use collapse_core::{
    CollapseRng, ExpandDeltas, GridBuffer, Progress, SerializedBuffer, SolveError, SolveErrorKind,
    SolveObserver, Solver, StdRandom, TileConfig, TileSet,
};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A cell to collapse to a fixed tile before solving starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetCell {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    pub tile: String,
}

/// Restrict one cell's starting domain to an explicit tile list. Used by the
/// orchestrator to pin region boundaries during reconciliation retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConstraint {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    pub allowed: Vec<String>,
}

/// A solve job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobRequest {
    Generate {
        width: usize,
        height: usize,
        depth: usize,
        /// Solver-relevant tile fields only; no rendering payload.
        tiles: Vec<TileConfig>,
        /// Deterministic seed; `None` draws from OS entropy.
        seed: Option<u64>,
        /// Return only this sub-region of the solved volume.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bounds: Option<Region>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        presets: Vec<PresetCell>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        constraints: Vec<DomainConstraint>,
    },
    Expand {
        buffer: SerializedBuffer,
        deltas: ExpandDeltas,
        tiles: Vec<TileConfig>,
        seed: Option<u64>,
    },
}

/// Events streamed back while a job runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    Progress {
        fraction: f64,
    },
    /// One cell resolved; emitted once per successful collapse.
    TileUpdate {
        x: usize,
        y: usize,
        z: usize,
        tile: String,
    },
    Complete {
        success: bool,
        /// Resolved tile ids, flattened in `x + y*W + z*W*H` order.
        data: Vec<Option<String>>,
    },
    Error {
        error: JobError,
    },
}

/// Serializable mirror of the solver error taxonomy, extended with the two
/// job-level failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    Contradiction,
    NoValidTile,
    PropagationFailed,
    /// Tile configuration rejected before solving.
    InvalidConfig,
    /// Serialized buffer rejected while rebuilding.
    InvalidBuffer,
}

/// Structured job failure: kind, human message, offending coordinate when
/// known, and the progress counters at failure time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
    pub coord: Option<(usize, usize, usize)>,
    pub collapsed: usize,
    pub total: usize,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for JobError {}

impl From<SolveError> for JobError {
    fn from(e: SolveError) -> Self {
        JobError {
            kind: match e.kind {
                SolveErrorKind::Contradiction => JobErrorKind::Contradiction,
                SolveErrorKind::NoValidTile => JobErrorKind::NoValidTile,
                SolveErrorKind::PropagationFailed => JobErrorKind::PropagationFailed,
            },
            message: e.to_string(),
            coord: e.coord,
            collapsed: e.collapsed,
            total: e.total,
        }
    }
}

impl JobError {
    fn invalid_config(message: String) -> JobError {
        JobError {
            kind: JobErrorKind::InvalidConfig,
            message,
            coord: None,
            collapsed: 0,
            total: 0,
        }
    }

    fn invalid_buffer(message: String) -> JobError {
        JobError {
            kind: JobErrorKind::InvalidBuffer,
            message,
            coord: None,
            collapsed: 0,
            total: 0,
        }
    }
}

struct Job {
    request: JobRequest,
    events: Sender<JobEvent>,
}

/// Background solve service: one thread, one solver per submitted job.
pub struct SolverWorker {
    tx: Sender<Job>,
    _handle: Arc<JoinHandle<()>>,
}

impl SolverWorker {
    pub fn new() -> SolverWorker {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = thread::spawn(move || {
            Self::worker_loop(rx);
        });
        SolverWorker {
            tx,
            _handle: Arc::new(handle),
        }
    }

    /// Submit a job; events arrive on the returned receiver, ending with
    /// `Complete` or `Error`.
    pub fn submit(&self, request: JobRequest) -> Receiver<JobEvent> {
        let (events, rx) = mpsc::channel();
        if self.tx.send(Job { request, events }).is_err() {
            log::error!("solver worker thread is gone; job dropped");
        }
        rx
    }

    fn worker_loop(rx: Receiver<Job>) {
        for job in rx {
            match run_job(job.request, &job.events) {
                Ok(data) => {
                    let _ = job.events.send(JobEvent::Complete {
                        success: true,
                        data,
                    });
                }
                Err(error) => {
                    log::warn!("solve job failed: {}", error);
                    let _ = job.events.send(JobEvent::Error { error });
                }
            }
        }
    }
}

impl Default for SolverWorker {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer that forwards solve output onto the event channel. Progress is
/// emitted at yield points (every few collapses) to keep event volume
/// proportional; tile updates go out one per collapse.
struct ChannelObserver<'a> {
    events: &'a Sender<JobEvent>,
    last: Option<Progress>,
}

impl SolveObserver for ChannelObserver<'_> {
    fn tile_collapsed(&mut self, x: usize, y: usize, z: usize, tile: &str) {
        let _ = self.events.send(JobEvent::TileUpdate {
            x,
            y,
            z,
            tile: tile.to_string(),
        });
    }

    fn progress(&mut self, progress: Progress) {
        self.last = Some(progress);
    }

    fn yield_point(&mut self) {
        if let Some(progress) = self.last.take() {
            let _ = self.events.send(JobEvent::Progress {
                fraction: progress.fraction(),
            });
        }
        thread::yield_now();
    }
}

fn rng_for(seed: Option<u64>) -> Box<dyn CollapseRng> {
    match seed {
        Some(seed) => Box::new(StdRandom::from_seed(seed)),
        None => Box::new(StdRandom::from_entropy()),
    }
}

fn run_job(request: JobRequest, events: &Sender<JobEvent>) -> Result<Vec<Option<String>>, JobError> {
    match request {
        JobRequest::Generate {
            width,
            height,
            depth,
            tiles,
            seed,
            bounds,
            presets,
            constraints,
        } => {
            let tile_set = Arc::new(
                TileSet::from_configs(&tiles).map_err(|e| JobError::invalid_config(e.to_string()))?,
            );
            let buffer = GridBuffer::new(width, height, depth, Arc::clone(&tile_set));
            let mut solver = Solver::new(buffer, rng_for(seed));

            for preset in &presets {
                let tile = tile_set.index_of(&preset.tile).ok_or_else(|| {
                    JobError::invalid_config(format!("preset names unknown tile '{}'", preset.tile))
                })?;
                solver.seed_cell(preset.x, preset.y, preset.z, tile)?;
            }
            for constraint in &constraints {
                let allowed = resolve_ids(&tile_set, &constraint.allowed)?;
                solver.apply_constraint(constraint.x, constraint.y, constraint.z, &allowed)?;
            }

            let mut observer = ChannelObserver { events, last: None };
            solver.generate(&mut observer)?;

            let buffer = solver.buffer();
            match bounds {
                None => Ok(buffer.flattened_tiles()),
                Some(region) => {
                    let mut data = Vec::with_capacity(region.volume());
                    for z in region.z..region.z + region.depth {
                        for y in region.y..region.y + region.height {
                            for x in region.x..region.x + region.width {
                                data.push(
                                    buffer
                                        .cell(x, y, z)
                                        .and_then(|cell| cell.tile())
                                        .map(|t| buffer.tiles().id_of(t).to_string()),
                                );
                            }
                        }
                    }
                    Ok(data)
                }
            }
        }
        JobRequest::Expand {
            buffer,
            deltas,
            tiles,
            seed,
        } => {
            let tile_set = Arc::new(
                TileSet::from_configs(&tiles).map_err(|e| JobError::invalid_config(e.to_string()))?,
            );
            let buffer = GridBuffer::deserialize(&buffer, tile_set)
                .map_err(|e| JobError::invalid_buffer(e.to_string()))?;
            let mut solver = Solver::new(buffer, rng_for(seed));

            let mut observer = ChannelObserver { events, last: None };
            solver.expand(&deltas, &mut observer)?;
            Ok(solver.buffer().flattened_tiles())
        }
    }
}

fn resolve_ids(tile_set: &TileSet, ids: &[String]) -> Result<Vec<usize>, JobError> {
    ids.iter()
        .map(|id| {
            tile_set
                .index_of(id)
                .ok_or_else(|| JobError::invalid_config(format!("unknown tile id '{}'", id)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::uniform_config;
    use collapse_core::DIRECTIONS;

    fn drain(rx: Receiver<JobEvent>) -> (Vec<JobEvent>, Option<Vec<Option<String>>>, Option<JobError>) {
        let mut events = Vec::new();
        let mut data = None;
        let mut error = None;
        for event in rx {
            match &event {
                JobEvent::Complete { data: d, .. } => data = Some(d.clone()),
                JobEvent::Error { error: e } => error = Some(e.clone()),
                _ => {}
            }
            events.push(event);
        }
        (events, data, error)
    }

    #[test]
    fn test_generate_job_completes() {
        let worker = SolverWorker::new();
        let rx = worker.submit(JobRequest::Generate {
            width: 3,
            height: 3,
            depth: 3,
            tiles: vec![uniform_config("only", "g")],
            seed: Some(42),
            bounds: None,
            presets: Vec::new(),
            constraints: Vec::new(),
        });

        let (events, data, error) = drain(rx);
        assert!(error.is_none());
        let data = data.unwrap();
        assert_eq!(data.len(), 27);
        assert!(data.iter().all(|t| t.as_deref() == Some("only")));

        let updates = events
            .iter()
            .filter(|e| matches!(e, JobEvent::TileUpdate { .. }))
            .count();
        assert_eq!(updates, 27);

        let fractions: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Progress { fraction } => Some(*fraction),
                _ => None,
            })
            .collect();
        assert!(!fractions.is_empty());
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_generate_job_reports_structured_error() {
        // Per-face unique groups make every adjacency impossible, including
        // the tile against itself.
        let mut config = uniform_config("hermit", "g");
        for dir in DIRECTIONS {
            let mut slot = config.connectors.get(dir).unwrap().clone();
            slot.group = format!("face-{}", dir);
            config.connectors.set(dir, slot);
        }

        let worker = SolverWorker::new();
        let rx = worker.submit(JobRequest::Generate {
            width: 2,
            height: 1,
            depth: 1,
            tiles: vec![config],
            seed: Some(0),
            bounds: None,
            presets: Vec::new(),
            constraints: Vec::new(),
        });

        let (_, data, error) = drain(rx);
        assert!(data.is_none());
        let error = error.unwrap();
        assert!(matches!(
            error.kind,
            JobErrorKind::Contradiction | JobErrorKind::PropagationFailed
        ));
        assert_eq!(error.total, 2);
    }

    #[test]
    fn test_invalid_config_rejected_before_solving() {
        let mut config = uniform_config("broken", "g");
        config.connectors.up = None;

        let worker = SolverWorker::new();
        let rx = worker.submit(JobRequest::Generate {
            width: 2,
            height: 2,
            depth: 1,
            tiles: vec![config],
            seed: Some(1),
            bounds: None,
            presets: Vec::new(),
            constraints: Vec::new(),
        });

        let (_, data, error) = drain(rx);
        assert!(data.is_none());
        assert_eq!(error.unwrap().kind, JobErrorKind::InvalidConfig);
    }

    #[test]
    fn test_presets_and_bounds() {
        let tiles = vec![uniform_config("a", "ga"), uniform_config("b", "gb")];
        let worker = SolverWorker::new();
        let rx = worker.submit(JobRequest::Generate {
            width: 4,
            height: 1,
            depth: 1,
            tiles,
            seed: Some(3),
            bounds: Some(Region {
                x: 2,
                y: 0,
                z: 0,
                width: 2,
                height: 1,
                depth: 1,
            }),
            presets: vec![PresetCell {
                x: 0,
                y: 0,
                z: 0,
                tile: "b".into(),
            }],
            constraints: Vec::new(),
        });

        let (_, data, error) = drain(rx);
        assert!(error.is_none());
        // Disjoint groups propagate the preset everywhere; only the
        // requested sub-region comes back.
        let data = data.unwrap();
        assert_eq!(data.len(), 2);
        assert!(data.iter().all(|t| t.as_deref() == Some("b")));
    }

    #[test]
    fn test_expand_job_round_trip() {
        let tiles = vec![uniform_config("a", "ga"), uniform_config("b", "gb")];
        let tile_set = Arc::new(TileSet::from_configs(&tiles).unwrap());
        let buffer = GridBuffer::new(2, 2, 1, Arc::clone(&tile_set));
        let mut solver = Solver::new(buffer, Box::new(StdRandom::from_seed(9)));
        solver.generate(&mut collapse_core::NullObserver).unwrap();
        let before = solver.buffer().flattened_tiles();
        let record = solver.buffer().serialize();

        let worker = SolverWorker::new();
        let rx = worker.submit(JobRequest::Expand {
            buffer: record,
            deltas: ExpandDeltas {
                x_max: 2,
                ..Default::default()
            },
            tiles,
            seed: Some(10),
        });

        let (_, data, error) = drain(rx);
        assert!(error.is_none());
        let data = data.unwrap();
        assert_eq!(data.len(), 4 * 2);
        // Old cells keep their assignment at the same (untranslated) spot.
        for y in 0..2 {
            for x in 0..2 {
                assert_eq!(data[x + y * 4], before[x + y * 2]);
            }
        }
        assert!(data.iter().all(Option::is_some));
    }

    #[test]
    fn test_constraints_pin_cells() {
        let tiles = vec![uniform_config("a", "ga"), uniform_config("b", "gb")];
        let worker = SolverWorker::new();
        let rx = worker.submit(JobRequest::Generate {
            width: 3,
            height: 1,
            depth: 1,
            tiles,
            seed: Some(4),
            bounds: None,
            presets: Vec::new(),
            constraints: vec![DomainConstraint {
                x: 1,
                y: 0,
                z: 0,
                allowed: vec!["a".into()],
            }],
        });

        let (_, data, error) = drain(rx);
        assert!(error.is_none());
        let data = data.unwrap();
        assert!(data.iter().all(|t| t.as_deref() == Some("a")));
    }

    #[test]
    fn test_job_request_serializes() {
        let request = JobRequest::Generate {
            width: 2,
            height: 2,
            depth: 2,
            tiles: vec![uniform_config("t", "g")],
            seed: Some(5),
            bounds: None,
            presets: Vec::new(),
            constraints: Vec::new(),
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: JobRequest = serde_json::from_str(&json).unwrap();
        match back {
            JobRequest::Generate { width, seed, .. } => {
                assert_eq!(width, 2);
                assert_eq!(seed, Some(5));
            }
            _ => panic!("wrong variant"),
        }
    }
}
