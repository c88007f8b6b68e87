//! # Cell-linked list
//!
//! Uniform grid over the system domain with cells as large as the cutoff
//! radius. Each cell holds the indices of the particles whose position falls
//! in it, so the neighbor candidates of a particle are the particles of the
//! surrounding `(2r+1)^d` block of cells, with `r = 1` when the cell size equals
//! the cutoff. Candidate work per particle is then bounded by the local
//! density, not by the total particle count.
//!
//! ## Invariant
//! Every particle index sits in exactly one bucket: the cell containing its
//! position at its last assignment. Positions outside the domain are clamped
//! into the nearest boundary cell and counted in [`GridReport::clamped`].
//!
//! ## Maintenance
//! - [`CellLinkedList::rebuild`] reassigns every particle.
//! - [`CellLinkedList::update_after_motion`] only revisits particles that moved
//!   far enough to possibly leave their cell. Each particle keeps the distance
//!   from its assignment position to the nearest face of its cell or of the
//!   domain (its margin); a particle whose displacement plus the tolerance stays
//!   below that margin cannot have changed cell. Reaching a face exactly counts
//!   as leaving, since the upper face already belongs to the next cell.

use crate::error::{Result, SimulationError};
use crate::simulation::geometry::BoundingBox;
use crate::simulation::states::{Dimension, NVec3};

/// Integer cell coordinate (z is always 0 in 2D)
pub type CellCoord = [i64; 3];

/// Upper bound on the number of cells of one grid
pub const MAX_CELLS: usize = 1 << 26;

/// Candidate fraction above which an incremental update falls back to a rebuild
const REBUILD_FRACTION: f64 = 0.5;

/// Relative slack on the margin test, absorbs rounding between `margin` and `cell_of`
const FACE_SLACK: f64 = 1.0e-9;

/// Outcome of a build, rebuild or incremental update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GridReport {
    pub rebuilt: bool,        // true if every particle was reassigned
    pub clamped: usize,       // particles currently outside the domain
    pub migrated: usize,      // particles that changed bucket during an incremental update
    pub max_occupancy: usize, // largest bucket after the operation
}

#[derive(Debug, Clone)]
pub struct CellLinkedList {
    lower: NVec3,
    upper: NVec3,
    cell_size: f64,
    dims: [usize; 3],
    dimension: Dimension,
    cells: Vec<Vec<usize>>,      // particle indices per cell, x fastest
    assignments: Vec<usize>,     // linear cell index of each particle
    anchors: Vec<NVec3>,         // position at last assignment
    margins: Vec<f64>,           // distance from anchor to the nearest face of its cell
    outside: Vec<bool>,          // anchor lies outside the domain
    rebuild_positions: Vec<NVec3>, // positions at last full rebuild
}

impl CellLinkedList {
    /// Empty grid over `domain`
    pub fn new(domain: &BoundingBox, cell_size: f64, dimension: Dimension) -> Result<Self> {
        if !(cell_size > 0.0 && cell_size.is_finite()) {
            return Err(SimulationError::InvalidGrid(format!("cell size {cell_size} must be positive")));
        }
        if !domain.is_valid() {
            return Err(SimulationError::InvalidGrid(format!(
                "domain {:?} .. {:?} is not a valid box",
                domain.lower, domain.upper
            )));
        }

        let extent = domain.extent();
        let mut dims = [1usize; 3];
        for (k, d) in dims.iter_mut().enumerate().take(dimension.axes()) {
            *d = ((extent[k] / cell_size).ceil() as usize).max(1);
        }
        let total = dims[0]
            .checked_mul(dims[1])
            .and_then(|n| n.checked_mul(dims[2]))
            .filter(|&n| n <= MAX_CELLS)
            .ok_or_else(|| {
                SimulationError::InvalidGrid(format!(
                    "{dims:?} cells exceed the limit of {MAX_CELLS}; increase the cell size or shrink the domain"
                ))
            })?;

        Ok(Self {
            lower: domain.lower,
            upper: domain.upper,
            cell_size,
            dims,
            dimension,
            cells: vec![Vec::new(); total],
            assignments: Vec::new(),
            anchors: Vec::new(),
            margins: Vec::new(),
            outside: Vec::new(),
            rebuild_positions: Vec::new(),
        })
    }

    /// Grid over `domain` with every particle of `positions` assigned
    pub fn build(
        positions: &[NVec3],
        cell_size: f64,
        domain: &BoundingBox,
        dimension: Dimension,
    ) -> Result<(Self, GridReport)> {
        let mut grid = Self::new(domain, cell_size, dimension)?;
        let report = grid.rebuild(positions);
        Ok((grid, report))
    }

    /// Reassign every particle from scratch
    pub fn rebuild(&mut self, positions: &[NVec3]) -> GridReport {
        for bucket in self.cells.iter_mut() {
            bucket.clear();
        }
        let n = positions.len();
        self.assignments = Vec::with_capacity(n);
        self.anchors = positions.to_vec();
        self.margins = Vec::with_capacity(n);
        self.outside = Vec::with_capacity(n);
        self.rebuild_positions = positions.to_vec();

        let mut report = GridReport { rebuilt: true, ..Default::default() };
        for (i, x) in positions.iter().enumerate() {
            let (coord, clamped) = self.cell_of(x);
            if clamped {
                report.clamped += 1;
            }
            let cell = self.linear_index(coord);
            self.cells[cell].push(i);
            self.assignments.push(cell);
            self.margins.push(if clamped { 0.0 } else { self.margin(x, coord) });
            self.outside.push(clamped);
        }
        report.max_occupancy = self.max_occupancy();

        if report.clamped > 0 {
            log::warn!("{} particles outside the domain were clamped into boundary cells", report.clamped);
        }
        report
    }

    /// Incremental maintenance after particles moved.
    ///
    /// Only particles that moved and have `displacement + tolerance >= margin` are
    /// re-evaluated. Falls back to [`CellLinkedList::rebuild`] when the particle count changed
    /// or when most particles are candidates anyway.
    pub fn update_after_motion(&mut self, positions: &[NVec3], tolerance: f64) -> GridReport {
        let n = positions.len();
        if n != self.assignments.len() {
            log::debug!("particle count changed ({} -> {n}), rebuilding cell-linked list", self.assignments.len());
            return self.rebuild(positions);
        }

        let slack = FACE_SLACK * self.cell_size;
        let candidates: Vec<usize> = (0..n)
            .filter(|&i| {
                let d = (positions[i] - self.anchors[i]).norm();
                d > 0.0 && d + tolerance + slack >= self.margins[i]
            })
            .collect();
        if candidates.len() as f64 > REBUILD_FRACTION * n as f64 {
            log::debug!("{} of {n} particles near cell faces, rebuilding cell-linked list", candidates.len());
            return self.rebuild(positions);
        }

        let mut report = GridReport::default();
        for i in candidates {
            let x = positions[i];
            let (coord, clamped) = self.cell_of(&x);
            let cell = self.linear_index(coord);
            let old = self.assignments[i];
            if cell != old {
                let bucket = &mut self.cells[old];
                if let Some(k) = bucket.iter().position(|&j| j == i) {
                    bucket.swap_remove(k);
                }
                self.cells[cell].push(i);
                self.assignments[i] = cell;
                report.migrated += 1;
            }
            self.anchors[i] = x;
            self.margins[i] = if clamped { 0.0 } else { self.margin(&x, coord) };
            self.outside[i] = clamped;
        }
        report.clamped = self.outside.iter().filter(|&&o| o).count();
        report.max_occupancy = self.max_occupancy();

        if report.clamped > 0 {
            log::warn!("{} particles outside the domain were clamped into boundary cells", report.clamped);
        }
        report
    }

    /// Visit every particle of the `(2r+1)^d` cell block centred on `cell`.
    /// Cells outside the grid are skipped. This is the only candidate enumeration
    /// the relations use.
    pub fn for_each_neighbor_cell<F>(&self, cell: CellCoord, radius: usize, mut visitor: F)
    where
        F: FnMut(usize),
    {
        let r = radius as i64;
        let range = |axis: usize| {
            let lo = (cell[axis] - r).max(0);
            let hi = (cell[axis] + r).min(self.dims[axis] as i64 - 1);
            lo..=hi
        };
        let z_range = match self.dimension {
            Dimension::Two => 0..=0,
            Dimension::Three => range(2),
        };
        for z in z_range {
            for y in range(1) {
                for x in range(0) {
                    let idx = self.linear_index([x, y, z]);
                    for &j in &self.cells[idx] {
                        visitor(j);
                    }
                }
            }
        }
    }

    /// Cell coordinate of a position and whether it had to be clamped into the grid
    pub fn cell_of(&self, x: &NVec3) -> (CellCoord, bool) {
        let mut coord = [0i64; 3];
        let mut clamped = false;
        for k in 0..self.dimension.axes() {
            let outside = !x[k].is_finite() || x[k] < self.lower[k] || x[k] > self.upper[k];
            clamped |= outside;
            let raw = ((x[k] - self.lower[k]) / self.cell_size).floor() as i64;
            coord[k] = raw.clamp(0, self.dims[k] as i64 - 1);
        }
        (coord, clamped)
    }

    /// Number of cell rings needed to cover `cutoff`
    pub fn search_depth(&self, cutoff: f64) -> usize {
        ((cutoff / self.cell_size).ceil() as usize).max(1)
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_particles(&self) -> usize {
        self.assignments.len()
    }

    /// Particles currently bucketed in `cell`
    pub fn bucket(&self, cell: CellCoord) -> &[usize] {
        &self.cells[self.linear_index(cell)]
    }

    /// All buckets, x fastest
    pub fn buckets(&self) -> impl Iterator<Item = &[usize]> {
        self.cells.iter().map(|c| c.as_slice())
    }

    /// Cell the particle is currently bucketed in
    pub fn cell_of_particle(&self, i: usize) -> CellCoord {
        self.coord_of_index(self.assignments[i])
    }

    pub fn max_occupancy(&self) -> usize {
        self.cells.iter().map(|c| c.len()).max().unwrap_or(0)
    }

    /// Largest displacement since the last full rebuild.
    /// Infinite when the particle count no longer matches.
    pub fn max_displacement_since_rebuild(&self, positions: &[NVec3]) -> f64 {
        if positions.len() != self.rebuild_positions.len() {
            return f64::INFINITY;
        }
        positions
            .iter()
            .zip(&self.rebuild_positions)
            .map(|(x, x0)| (x - x0).norm())
            .fold(0.0, f64::max)
    }

    // helpers ==============================================================================

    fn linear_index(&self, c: CellCoord) -> usize {
        c[0] as usize + self.dims[0] * (c[1] as usize + self.dims[1] * c[2] as usize)
    }

    fn coord_of_index(&self, idx: usize) -> CellCoord {
        let x = idx % self.dims[0];
        let y = (idx / self.dims[0]) % self.dims[1];
        let z = idx / (self.dims[0] * self.dims[1]);
        [x as i64, y as i64, z as i64]
    }

    /// Distance from `x` to the nearest face of cell `c`, over the active axes.
    /// The last cell along an axis may reach past the domain; its upper face is the domain's.
    fn margin(&self, x: &NVec3, c: CellCoord) -> f64 {
        let mut m = f64::INFINITY;
        for k in 0..self.dimension.axes() {
            let lo = self.lower[k] + c[k] as f64 * self.cell_size;
            let hi = (lo + self.cell_size).min(self.upper[k]);
            m = m.min(x[k] - lo).min(hi - x[k]);
        }
        m.max(0.0)
    }
}
