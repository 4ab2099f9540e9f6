//! Grid batching and per-batch basis screening.

use crate::basis::GridBasis;
use crate::grid::GridPoint;

/// One batch of consecutive grid points together with its active-function
/// index map.
#[derive(Clone, Debug)]
pub struct GridBatch {
    /// First point (inclusive)
    pub start: usize,
    /// Last point (exclusive)
    pub end: usize,
    /// Reduced-to-full basis index map, ascending. `len() <= n_basis`.
    pub active: Vec<usize>,
}

impl GridBatch {
    pub fn n_points(&self) -> usize {
        self.end - self.start
    }

    pub fn n_active(&self) -> usize {
        self.active.len()
    }
}

/// Split the grid into ordered batches of at most `points_per_batch` points
/// and screen each batch against the basis with threshold `epsilon`.
///
/// Batches with an empty active set are kept in the partition (the point
/// ordering is part of the contract) and skipped by the assembly loop. Pure
/// function of its inputs.
pub fn partition_grid(
    grid: &[GridPoint],
    points_per_batch: usize,
    basis: &dyn GridBasis,
    epsilon: f64,
) -> Vec<GridBatch> {
    assert!(points_per_batch > 0);
    let mut batches = Vec::with_capacity(grid.len().div_ceil(points_per_batch));
    let mut start = 0;
    while start < grid.len() {
        let end = usize::min(start + points_per_batch, grid.len());
        let active = basis.active_functions(&grid[start..end], epsilon);
        batches.push(GridBatch { start, end, active });
        start = end;
    }
    batches
}
