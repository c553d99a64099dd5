//! Entropy-driven collapse loop and worklist-based constraint propagation.
//!
//! One solver owns one grid buffer and a tile set. Each attempt runs until
//! the buffer is complete or a structured failure ends it; there is no
//! backtracking, so recovery means a new attempt with a fresh seed. Within an
//! attempt the propagation worklist fully drains before the next cell is
//! selected, so a cell is never collapsed while a pending constraint could
//! still shrink its domain.

use crate::direction::DIRECTIONS;
use crate::grid::{DomainChange, ExpandDeltas, GridBuffer};
use crate::rng::CollapseRng;
use crate::tile::TileSet;
use std::fmt;
use std::sync::Arc;

/// Collapses between observer yield points.
pub const YIELD_INTERVAL: usize = 10;

/// Progress counters reported after every collapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub collapsed: usize,
    pub total: usize,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.collapsed as f64 / self.total as f64
        }
    }
}

/// Failure taxonomy for one solve attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveErrorKind {
    /// Grid incomplete but no cell is selectable.
    Contradiction,
    /// The weighted draw failed on a non-empty domain. A hardening check;
    /// positive weights make it unreachable in practice.
    NoValidTile,
    /// A neighbor's domain emptied during propagation.
    PropagationFailed,
}

impl SolveErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            SolveErrorKind::Contradiction => "contradiction",
            SolveErrorKind::NoValidTile => "no_valid_tile",
            SolveErrorKind::PropagationFailed => "propagation_failed",
        }
    }
}

/// Structured attempt failure: the kind, the offending coordinate when known,
/// and how far the attempt got. Returned, never panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveError {
    pub kind: SolveErrorKind,
    pub coord: Option<(usize, usize, usize)>,
    pub collapsed: usize,
    pub total: usize,
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SolveErrorKind::Contradiction => {
                write!(f, "contradiction: grid incomplete but no cell is selectable")?
            }
            SolveErrorKind::NoValidTile => {
                write!(f, "no valid tile: weighted draw failed on a non-empty domain")?
            }
            SolveErrorKind::PropagationFailed => {
                write!(f, "propagation failed: a cell domain emptied")?
            }
        }
        if let Some((x, y, z)) = self.coord {
            write!(f, " at ({}, {}, {})", x, y, z)?;
        }
        write!(f, " ({}/{} cells collapsed)", self.collapsed, self.total)
    }
}

impl std::error::Error for SolveError {}

/// Hook for consumers of incremental solve output. All methods default to
/// no-ops; worker threads map `yield_point` to `thread::yield_now`.
pub trait SolveObserver {
    /// One cell resolved. Fired once per successful collapse.
    fn tile_collapsed(&mut self, _x: usize, _y: usize, _z: usize, _tile: &str) {}

    /// Counters after a collapse and its propagation.
    fn progress(&mut self, _progress: Progress) {}

    /// Fired every `YIELD_INTERVAL` collapses so the host scheduler gets a
    /// chance to run. Cooperative cancellation also hooks in here.
    fn yield_point(&mut self) {}
}

/// Observer that ignores everything.
pub struct NullObserver;

impl SolveObserver for NullObserver {}

/// Single-instance constraint solver over one grid buffer.
pub struct Solver {
    buffer: GridBuffer,
    tiles: Arc<TileSet>,
    rng: Box<dyn CollapseRng>,
    /// LIFO worklist of cell indices whose domains changed.
    worklist: Vec<usize>,
    /// Scratch: union of support rows, one bitmask row wide.
    allowed: Vec<u64>,
    /// Scratch: tile indices of the cell currently propagating.
    source_tiles: Vec<usize>,
    collapsed: usize,
}

impl Solver {
    pub fn new(buffer: GridBuffer, rng: Box<dyn CollapseRng>) -> Solver {
        let tiles = Arc::clone(buffer.tiles());
        let collapsed = buffer.collapsed_count();
        let blocks = tiles.blocks();
        Solver {
            buffer,
            tiles,
            rng,
            worklist: Vec::new(),
            allowed: vec![0; blocks],
            source_tiles: Vec::new(),
            collapsed,
        }
    }

    pub fn buffer(&self) -> &GridBuffer {
        &self.buffer
    }

    pub fn into_buffer(self) -> GridBuffer {
        self.buffer
    }

    pub fn progress(&self) -> Progress {
        Progress {
            collapsed: self.collapsed,
            total: self.buffer.total_cells(),
        }
    }

    /// Run the collapse loop until the buffer is complete or the attempt
    /// fails. Observer receives a tile update per collapse, progress
    /// counters, and periodic yield points.
    pub fn generate(&mut self, observer: &mut dyn SolveObserver) -> Result<(), SolveError> {
        log::debug!(
            "generate: {}x{}x{}, {} tiles, {} cells",
            self.buffer.width(),
            self.buffer.height(),
            self.buffer.depth(),
            self.tiles.len(),
            self.buffer.total_cells()
        );

        while !self.buffer.is_complete() {
            let Some(index) = self.select_cell()? else {
                break;
            };
            let tile = self.choose_tile(index)?;
            self.collapse_and_propagate(index, tile, observer)?;
        }

        self.verify_valid()?;
        log::debug!("generate complete: {} cells collapsed", self.collapsed);
        Ok(())
    }

    /// Grow the buffer and re-solve incrementally: propagation is seeded from
    /// every already-collapsed cell that touches newly introduced volume, so
    /// resolved structure constrains the growth without re-solving it, then
    /// the normal loop finishes the remaining cells.
    pub fn expand(
        &mut self,
        deltas: &ExpandDeltas,
        observer: &mut dyn SolveObserver,
    ) -> Result<(), SolveError> {
        let old_width = self.buffer.width();
        let old_height = self.buffer.height();
        let old_depth = self.buffer.depth();

        self.buffer = self.buffer.expand(deltas);
        self.collapsed = self.buffer.collapsed_count();

        // A coordinate is newly introduced when its pre-translation position
        // fell outside the old footprint.
        let is_new = |x: usize, y: usize, z: usize| {
            let old_x = x as i64 - deltas.x_min as i64;
            let old_y = y as i64 - deltas.y_min as i64;
            let old_z = z as i64 - deltas.z_min as i64;
            old_x < 0
                || old_y < 0
                || old_z < 0
                || old_x as usize >= old_width
                || old_y as usize >= old_height
                || old_z as usize >= old_depth
        };

        self.worklist.clear();
        let mut seeds: Vec<usize> = self
            .buffer
            .iter_cells()
            .filter(|(x, y, z, cell)| {
                cell.is_collapsed()
                    && DIRECTIONS.iter().any(|&dir| {
                        self.buffer
                            .neighbor_coords(*x, *y, *z, dir)
                            .is_some_and(|(nx, ny, nz)| is_new(nx, ny, nz))
                    })
            })
            .map(|(x, y, z, _)| self.buffer.index(x, y, z).expect("iterated coordinate"))
            .collect();
        seeds.sort_unstable();
        log::debug!("expand: {} collapsed cells border new volume", seeds.len());

        self.worklist.extend(seeds);
        self.propagate()?;
        self.generate(observer)
    }

    /// Collapse one specific, currently-uncollapsed cell and propagate from
    /// it. Returns the chosen tile id, or `None` when the cell is absent,
    /// already collapsed, or in contradiction — the narrow operation used for
    /// cell-by-cell work assignment.
    pub fn collapse_cell(
        &mut self,
        x: usize,
        y: usize,
        z: usize,
    ) -> Result<Option<String>, SolveError> {
        let Some(index) = self.buffer.index(x, y, z) else {
            return Ok(None);
        };
        match self.buffer.cell_by_index(index) {
            Some(cell) if !cell.is_collapsed() && !cell.domain().is_empty() => {}
            _ => return Ok(None),
        }
        let tile = self.choose_tile(index)?;
        self.collapse_and_propagate(index, tile, &mut NullObserver)?;
        Ok(Some(self.tiles.id_of(tile).to_string()))
    }

    /// Pre-collapse a cell to a specific tile before solving (seed cells from
    /// the job request). Absent coordinates are ignored; a tile the cell's
    /// domain no longer allows fails the attempt.
    pub fn seed_cell(
        &mut self,
        x: usize,
        y: usize,
        z: usize,
        tile: usize,
    ) -> Result<(), SolveError> {
        let Some(index) = self.buffer.index(x, y, z) else {
            return Ok(());
        };
        let Some(cell) = self.buffer.cell_by_index(index) else {
            return Ok(());
        };
        if let Some(existing) = cell.tile() {
            if existing == tile {
                return Ok(());
            }
            return Err(self.error_at(SolveErrorKind::PropagationFailed, Some((x, y, z))));
        }
        if !cell.domain().contains(tile) {
            return Err(self.error_at(SolveErrorKind::PropagationFailed, Some((x, y, z))));
        }
        self.collapse_and_propagate(index, tile, &mut NullObserver)
    }

    /// Intersect one cell's domain with an explicit allowed set and
    /// propagate. Used to pin region boundaries during reconciliation.
    pub fn apply_constraint(
        &mut self,
        x: usize,
        y: usize,
        z: usize,
        allowed: &[usize],
    ) -> Result<(), SolveError> {
        let Some(index) = self.buffer.index(x, y, z) else {
            return Ok(());
        };
        let mut mask = vec![0u64; self.allowed.len()];
        for &tile in allowed {
            mask[tile / 64] |= 1 << (tile % 64);
        }
        let Some(cell) = self.buffer.cell_by_index_mut(index) else {
            return Ok(());
        };
        match cell.intersect_domain(&mask) {
            DomainChange::Unchanged => Ok(()),
            DomainChange::Shrunk => {
                self.worklist.push(index);
                self.propagate()
            }
            DomainChange::Emptied => {
                Err(self.error_at(SolveErrorKind::PropagationFailed, Some((x, y, z))))
            }
        }
    }

    // -- internals ---------------------------------------------------------

    fn collapse_and_propagate(
        &mut self,
        index: usize,
        tile: usize,
        observer: &mut dyn SolveObserver,
    ) -> Result<(), SolveError> {
        let (x, y, z) = self.buffer.coords(index);
        self.buffer
            .cell_by_index_mut(index)
            .expect("selected cell exists")
            .collapse(tile);
        self.collapsed += 1;
        observer.tile_collapsed(x, y, z, self.tiles.id_of(tile));

        self.worklist.push(index);
        self.propagate()?;

        observer.progress(self.progress());
        if self.collapsed % YIELD_INTERVAL == 0 {
            observer.yield_point();
        }
        Ok(())
    }

    /// Minimum-domain ("entropy") selection with a uniform draw among the
    /// tied cells. `Ok(None)` when nothing is left to select and the grid is
    /// complete; contradiction when uncollapsed cells remain but none is
    /// selectable.
    fn select_cell(&mut self) -> Result<Option<usize>, SolveError> {
        let mut min = usize::MAX;
        let mut ties: Vec<usize> = Vec::new();

        // Linear scan in index order keeps the tie list, and therefore the
        // draw below, deterministic for a given seed.
        let span = self.buffer.width() * self.buffer.height() * self.buffer.depth();
        for index in 0..span {
            let Some(cell) = self.buffer.cell_by_index(index) else {
                continue;
            };
            if cell.is_collapsed() {
                continue;
            }
            let size = cell.domain().len();
            if size == 0 {
                continue;
            }
            if size < min {
                min = size;
                ties.clear();
                ties.push(index);
            } else if size == min {
                ties.push(index);
            }
        }

        if ties.is_empty() {
            if self.buffer.is_complete() {
                return Ok(None);
            }
            let coord = self.first_contradiction();
            return Err(self.error_at(SolveErrorKind::Contradiction, coord));
        }

        let pick = self.rng.next_usize(ties.len());
        Ok(Some(ties[pick]))
    }

    /// Weight-proportional draw from the cell's domain. Ascending tile order
    /// makes the cumulative walk deterministic; exhausting it without a pick
    /// is the defensive `no_valid_tile` outcome.
    fn choose_tile(&mut self, index: usize) -> Result<usize, SolveError> {
        let cell = self.buffer.cell_by_index(index).expect("cell exists");
        let total: f64 = cell.domain().iter().map(|t| self.tiles.weight_of(t)).sum();
        if total > 0.0 {
            let target = self.rng.next_double() * total;
            let mut acc = 0.0;
            for tile in cell.domain().iter() {
                acc += self.tiles.weight_of(tile);
                if target < acc {
                    return Ok(tile);
                }
            }
        }
        let coord = self.buffer.coords(index);
        Err(self.error_at(SolveErrorKind::NoValidTile, Some(coord)))
    }

    /// Drain the worklist. For each popped cell, every existing uncollapsed
    /// neighbor's domain is intersected with the union of tiles supported by
    /// the popped cell's remaining domain; shrinkage re-queues the neighbor,
    /// an emptied domain fails the attempt.
    fn propagate(&mut self) -> Result<(), SolveError> {
        while let Some(index) = self.worklist.pop() {
            let (x, y, z) = self.buffer.coords(index);

            self.source_tiles.clear();
            {
                let cell = self.buffer.cell_by_index(index).expect("worklist cell");
                self.source_tiles.extend(cell.domain().iter());
            }

            for dir in DIRECTIONS {
                let Some((nx, ny, nz)) = self.buffer.neighbor_coords(x, y, z, dir) else {
                    continue;
                };
                let neighbor = self
                    .buffer
                    .index(nx, ny, nz)
                    .expect("neighbor coords in bounds");
                match self.buffer.cell_by_index(neighbor) {
                    Some(cell) if !cell.is_collapsed() => {}
                    _ => continue,
                }

                self.allowed.fill(0);
                for &tile in &self.source_tiles {
                    for (block, &support) in self
                        .allowed
                        .iter_mut()
                        .zip(self.tiles.support_row(dir, tile))
                    {
                        *block |= support;
                    }
                }

                let cell = self
                    .buffer
                    .cell_by_index_mut(neighbor)
                    .expect("neighbor exists");
                match cell.intersect_domain(&self.allowed) {
                    DomainChange::Unchanged => {}
                    DomainChange::Shrunk => self.worklist.push(neighbor),
                    DomainChange::Emptied => {
                        self.worklist.clear();
                        return Err(
                            self.error_at(SolveErrorKind::PropagationFailed, Some((nx, ny, nz)))
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn verify_valid(&self) -> Result<(), SolveError> {
        if self.buffer.is_valid() {
            Ok(())
        } else {
            let coord = self.first_contradiction();
            Err(self.error_at(SolveErrorKind::Contradiction, coord))
        }
    }

    fn first_contradiction(&self) -> Option<(usize, usize, usize)> {
        self.buffer
            .iter_cells()
            .find(|(_, _, _, cell)| !cell.is_collapsed() && cell.domain().is_empty())
            .map(|(x, y, z, _)| (x, y, z))
    }

    fn error_at(&self, kind: SolveErrorKind, coord: Option<(usize, usize, usize)>) -> SolveError {
        SolveError {
            kind,
            coord,
            collapsed: self.collapsed,
            total: self.buffer.total_cells(),
        }
    }
}
