//! Batched assembly of the exchange-correlation potential and energy.

extern crate nalgebra as na;

use na::DMatrix;
use rayon::prelude::*;
use tracing::debug;

use crate::basis::GridBasis;
use crate::grid::GridPoint;

use super::{
    accumulate_derivatives, construct_z_vars, eval_density, form_z_matrix, mk_aux_var,
    partition_grid, DensityChannel, DensitySet, IntegrationParam, KsError, PointDensity,
    ReferenceKind, XcFunctional, XcOutput,
};

/// `sum_p w_p eps_p n_p` over one batch. Every quadrature weight enters
/// exactly; screening never drops points, only basis functions.
pub fn energy_vxc(points: &[GridPoint], eps: &[f64], den: &[f64]) -> f64 {
    points
        .iter()
        .zip(eps)
        .zip(den)
        .map(|((gp, &e), &n)| gp.w * e * n)
        .sum()
}

/// Density component restricted to a batch's active functions.
fn gather(p: &DMatrix<f64>, active: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(active.len(), active.len(), |a, b| {
        p[(active[a], active[b])]
    })
}

/// Integrate the exchange-correlation potential matrices and energy for one
/// density over the whole grid.
///
/// Batches are independent units of work: each one evaluates the screened
/// basis block, the densities, the auxiliary variables and the functional
/// derivatives, assembles the Z matrices and contracts them against the
/// basis values. The symmetrized sub-block scatter-adds into the thread's
/// partial potential at the positions of the batch's index map, and the
/// partials merge in an order-independent reduction. Any batch failure
/// aborts the whole build.
pub fn form_vxc(
    kind: ReferenceKind,
    functionals: &[Box<dyn XcFunctional>],
    param: &IntegrationParam,
    grid: &[GridPoint],
    basis: &dyn GridBasis,
    density: &DensitySet,
) -> Result<(Vec<DMatrix<f64>>, f64), KsError> {
    let nb = basis.n_basis();
    if density.n_basis() != nb {
        return Err(KsError::ShapeMismatch {
            context: "density matrix dimension",
            expected: nb,
            found: density.n_basis(),
        });
    }
    let ncomp = kind.n_components();
    let is_gga = functionals.iter().any(|f| f.is_gga());

    let batches = partition_grid(grid, param.points_per_batch(), basis, param.epsilon);
    debug!(
        "XC integration over {} points in {} batches",
        grid.len(),
        batches.len()
    );

    let identity = || (vec![DMatrix::<f64>::zeros(nb, nb); ncomp], 0.0_f64);

    batches
        .par_iter()
        .try_fold(identity, |(mut vxc, mut energy), b| {
            if b.n_active() == 0 {
                return Ok((vxc, energy));
            }
            let points = &grid[b.start..b.end];
            let bas = basis.evaluate_batch(points, &b.active, is_gga);

            let den: Vec<PointDensity> = density
                .components()
                .iter()
                .map(|p| eval_density(&gather(p, &b.active), &bas))
                .collect();
            let aux = mk_aux_var(kind, is_gga, param.epsilon, &den);

            let mut acc = XcOutput::zeros(aux.n_points);
            let mut scr = XcOutput::zeros(aux.n_points);
            accumulate_derivatives(functionals, &aux, &mut acc, &mut scr)?;

            for (c, vc) in vxc.iter_mut().enumerate() {
                let channel = DensityChannel::from_component(c);
                let z = construct_z_vars(channel, is_gga, &acc);
                let zmat = form_z_matrix(channel, points, &z, &aux, &bas);
                let v_sub = zmat.transpose() * &bas.values;
                for a in 0..b.n_active() {
                    for bb in 0..b.n_active() {
                        vc[(b.active[a], b.active[bb])] += v_sub[(a, bb)] + v_sub[(bb, a)];
                    }
                }
            }
            energy += energy_vxc(points, &acc.eps, &aux.n);
            Ok((vxc, energy))
        })
        .try_reduce(identity, |(mut va, ea), (vb, eb)| {
            for (a, b) in va.iter_mut().zip(vb) {
                *a += b;
            }
            Ok((va, ea + eb))
        })
}
