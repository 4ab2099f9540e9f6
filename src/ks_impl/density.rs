//! Density and density-gradient evaluation over one batch.

extern crate nalgebra as na;

use na::DMatrix;

use crate::basis::BasisBatch;

/// Density (and Cartesian gradient) of one density component at every point
/// of a batch.
pub struct PointDensity {
    pub value: Vec<f64>,
    pub grad: Option<[Vec<f64>; 3]>,
}

/// Evaluate `n(p) = sum_{mu,nu} P_{mu,nu} phi_mu(p) phi_nu(p)` and, when the
/// batch carries gradients, `grad n(p)`, with `p_sub` the density matrix
/// restricted to the batch's active functions.
///
/// Exact arithmetic makes the scalar component non-negative; small negative
/// values from round-off are passed through untouched and handled by the
/// density screen downstream.
pub fn eval_density(p_sub: &DMatrix<f64>, batch: &BasisBatch) -> PointDensity {
    let npts = batch.n_points();

    // Row p of scr holds sum_nu P_{mu,nu} phi_nu(p)
    let scr = &batch.values * p_sub.transpose();
    let mut value = vec![0.0; npts];
    for p in 0..npts {
        value[p] = batch.values.row(p).dot(&scr.row(p));
    }

    let grad = batch.grad.as_ref().map(|g| {
        // sum P_{mu,nu} (grad phi_mu phi_nu + phi_mu grad phi_nu); the two
        // terms coincide for symmetric P but are kept separate so the
        // contract holds for any square matrix
        let t = &scr + &batch.values * p_sub;
        let mut out = [vec![0.0; npts], vec![0.0; npts], vec![0.0; npts]];
        for (ax, out_ax) in out.iter_mut().enumerate() {
            for p in 0..npts {
                out_ax[p] = g[ax].row(p).dot(&t.row(p));
            }
        }
        out
    });

    PointDensity { value, grad }
}
