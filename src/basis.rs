//! Basis-evaluation collaborator boundary.
//!
//! The integration engine never evaluates basis functions itself; it asks a
//! [`GridBasis`] for values (and Cartesian gradients, when a
//! gradient-corrected functional is in the mix) on the points of one batch,
//! restricted to a screened set of active functions. `GaussianBasis` is the
//! demonstration provider backing the driver binary and the tests.

extern crate nalgebra as na;

use na::{DMatrix, Vector3};

use crate::grid::GridPoint;

/// Basis values (and gradients) for one batch, restricted to the active
/// function set. Row = grid point, column = active function.
pub struct BasisBatch {
    pub values: DMatrix<f64>,
    /// d/dx, d/dy, d/dz value matrices, present only for gradient runs
    pub grad: Option<[DMatrix<f64>; 3]>,
}

impl BasisBatch {
    pub fn n_points(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_active(&self) -> usize {
        self.values.ncols()
    }
}

/// Evaluation of basis functions on grid points.
pub trait GridBasis: Send + Sync {
    fn n_basis(&self) -> usize;

    /// Indices of the functions whose magnitude exceeds `threshold` anywhere
    /// in the batch, in ascending order. This is the reduced-to-full index
    /// map used for the screened contraction.
    fn active_functions(&self, points: &[GridPoint], threshold: f64) -> Vec<usize>;

    /// Values (and gradients, if requested) of the functions in `active` at
    /// every point of the batch.
    fn evaluate_batch(
        &self,
        points: &[GridPoint],
        active: &[usize],
        with_gradients: bool,
    ) -> BasisBatch;
}

/// A normalized s-type Gaussian shell.
#[derive(Clone, Copy, Debug)]
pub struct GaussianShell {
    pub center: Vector3<f64>,
    pub alpha: f64,
    norm: f64,
}

impl GaussianShell {
    pub fn new(center: Vector3<f64>, alpha: f64) -> Self {
        // N^2 = (2 alpha / pi)^(3/2) for an s primitive
        let norm = (2.0 * alpha / std::f64::consts::PI).powf(0.75);
        Self { center, alpha, norm }
    }

    pub fn norm(&self) -> f64 {
        self.norm
    }

    pub fn evaluate(&self, r: &Vector3<f64>) -> f64 {
        let d = r - self.center;
        self.norm * (-self.alpha * d.norm_squared()).exp()
    }

    pub fn gradient(&self, r: &Vector3<f64>) -> Vector3<f64> {
        let d = r - self.center;
        d * (-2.0 * self.alpha * self.evaluate(r))
    }
}

/// Demonstration basis: a flat list of s-type Gaussian shells.
#[derive(Clone, Debug)]
pub struct GaussianBasis {
    shells: Vec<GaussianShell>,
}

impl GaussianBasis {
    pub fn new(shells: Vec<GaussianShell>) -> Self {
        Self { shells }
    }

    /// One shell per center with the paired exponent.
    pub fn from_centers(centers: &[Vector3<f64>], exponents: &[f64]) -> Self {
        let shells = centers
            .iter()
            .zip(exponents)
            .map(|(&c, &a)| GaussianShell::new(c, a))
            .collect();
        Self { shells }
    }

    pub fn shells(&self) -> &[GaussianShell] {
        &self.shells
    }
}

impl GridBasis for GaussianBasis {
    fn n_basis(&self) -> usize {
        self.shells.len()
    }

    fn active_functions(&self, points: &[GridPoint], threshold: f64) -> Vec<usize> {
        self.shells
            .iter()
            .enumerate()
            .filter(|(_, sh)| {
                points
                    .iter()
                    .any(|gp| sh.evaluate(&gp.r).abs() > threshold)
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn evaluate_batch(
        &self,
        points: &[GridPoint],
        active: &[usize],
        with_gradients: bool,
    ) -> BasisBatch {
        let npts = points.len();
        let nbe = active.len();
        let values = DMatrix::from_fn(npts, nbe, |p, m| {
            self.shells[active[m]].evaluate(&points[p].r)
        });
        let grad = with_gradients.then(|| {
            let mut g = [
                DMatrix::zeros(npts, nbe),
                DMatrix::zeros(npts, nbe),
                DMatrix::zeros(npts, nbe),
            ];
            for p in 0..npts {
                for m in 0..nbe {
                    let gv = self.shells[active[m]].gradient(&points[p].r);
                    g[0][(p, m)] = gv.x;
                    g[1][(p, m)] = gv.y;
                    g[2][(p, m)] = gv.z;
                }
            }
            g
        });
        BasisBatch { values, grad }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn point(x: f64, y: f64, z: f64) -> GridPoint {
        GridPoint {
            r: Vector3::new(x, y, z),
            w: 1.0,
        }
    }

    #[test]
    fn shell_value_at_center_is_norm() {
        let sh = GaussianShell::new(Vector3::zeros(), 0.5);
        assert_relative_eq!(sh.evaluate(&Vector3::zeros()), sh.norm());
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let sh = GaussianShell::new(Vector3::new(0.1, -0.2, 0.3), 0.8);
        let r = Vector3::new(0.5, 0.4, -0.1);
        let g = sh.gradient(&r);
        let h = 1e-6;
        for ax in 0..3 {
            let mut rp = r;
            let mut rm = r;
            rp[ax] += h;
            rm[ax] -= h;
            let fd = (sh.evaluate(&rp) - sh.evaluate(&rm)) / (2.0 * h);
            assert_relative_eq!(g[ax], fd, epsilon = 1e-8);
        }
    }

    #[test]
    fn screening_drops_distant_shells() {
        let basis = GaussianBasis::from_centers(
            &[Vector3::zeros(), Vector3::new(50.0, 0.0, 0.0)],
            &[1.0, 1.0],
        );
        let pts = [point(0.0, 0.0, 0.0), point(1.0, 0.0, 0.0)];
        let active = basis.active_functions(&pts, 1e-10);
        assert_eq!(active, vec![0]);
        let batch = basis.evaluate_batch(&pts, &active, true);
        assert_eq!(batch.n_points(), 2);
        assert_eq!(batch.n_active(), 1);
    }
}
