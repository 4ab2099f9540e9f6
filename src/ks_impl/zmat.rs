//! Z-matrix construction: functional derivatives and quadrature weights
//! folded into point-by-active-basis matrices ready for contraction.
//!
//! The spin-channel derivatives `(Vrho_a, Vrho_b)` rotate into
//! density-matrix-channel variables with the inverse of the decomposition
//! applied by the auxiliary-variable pass, and the GGA chain rule carries
//! `Vsigma` onto the total-density and magnetization gradients:
//!
//! ```text
//! de/d(grad n) = 1/2 (Vs_aa + Vs_bb + Vs_ab) grad n + 1/2 (Vs_aa - Vs_bb) grad m
//! de/d(grad m) = 1/2 (Vs_aa - Vs_bb) grad n + 1/2 (Vs_aa + Vs_bb - Vs_ab) grad m
//! ```

extern crate nalgebra as na;

use na::DMatrix;

use crate::basis::BasisBatch;
use crate::grid::GridPoint;

use super::{AuxVars, XcOutput};

/// Density-matrix component a Z matrix targets, in the S, Z, Y, X order of
/// the density set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DensityChannel {
    Scalar,
    Mz,
    My,
    Mx,
}

impl DensityChannel {
    pub fn from_component(i: usize) -> Self {
        match i {
            0 => DensityChannel::Scalar,
            1 => DensityChannel::Mz,
            2 => DensityChannel::My,
            3 => DensityChannel::Mx,
            _ => unreachable!("density sets carry at most four components"),
        }
    }

    /// Index into the `[kx, ky, kz]` direction-cosine triple.
    fn cosine_axis(self) -> Option<usize> {
        match self {
            DensityChannel::Scalar => None,
            DensityChannel::Mx => Some(0),
            DensityChannel::My => Some(1),
            DensityChannel::Mz => Some(2),
        }
    }
}

/// Per-point Z variables of one density channel.
pub struct ZVars {
    /// Coefficient of `phi_mu phi_nu`
    pub zrho: Vec<f64>,
    /// GGA coefficient of `grad n . grad(phi_mu phi_nu)`
    pub zsig_n: Option<Vec<f64>>,
    /// GGA coefficient of `grad m . grad(phi_mu phi_nu)`
    pub zsig_m: Option<Vec<f64>>,
}

/// Rotate the accumulated spin-channel derivatives into the Z variables of
/// one density-matrix channel.
pub fn construct_z_vars(channel: DensityChannel, is_gga: bool, out: &XcOutput) -> ZVars {
    let npts = out.n_points();
    let mut zrho = vec![0.0; npts];
    let magnetization = channel != DensityChannel::Scalar;
    for p in 0..npts {
        zrho[p] = if magnetization {
            0.5 * (out.vrho_a[p] - out.vrho_b[p])
        } else {
            0.5 * (out.vrho_a[p] + out.vrho_b[p])
        };
    }

    let (zsig_n, zsig_m) = if is_gga {
        let mut zn = vec![0.0; npts];
        let mut zm = vec![0.0; npts];
        for p in 0..npts {
            let (saa, sab, sbb) = (out.vsigma_aa[p], out.vsigma_ab[p], out.vsigma_bb[p]);
            if magnetization {
                zn[p] = 0.5 * (saa - sbb);
                zm[p] = 0.5 * (saa + sbb - sab);
            } else {
                zn[p] = 0.5 * (saa + sbb + sab);
                zm[p] = 0.5 * (saa - sbb);
            }
        }
        (Some(zn), Some(zm))
    } else {
        (None, None)
    };

    ZVars {
        zrho,
        zsig_n,
        zsig_m,
    }
}

/// Assemble the Z matrix of one density channel over one batch:
///
/// ```text
/// Z[p, mu] = 1/2 w_p d_p zrho_p phi_mu(p) + w_p d_p g_p . grad phi_mu(p)
/// ```
///
/// with `d_p` the channel's direction projection (1 for the scalar and
/// collinear channels, the direction cosine for generalized magnetization
/// channels — exactly zero where the magnetization is screened) and `g_p`
/// the chain-rule gradient coefficient. The symmetrized contraction
/// `Z^T Phi + (Z^T Phi)^T` then reproduces both halves of
/// `grad(phi_mu phi_nu)`. Screened points contribute zero rows.
pub fn form_z_matrix(
    channel: DensityChannel,
    points: &[GridPoint],
    z: &ZVars,
    aux: &AuxVars,
    basis: &BasisBatch,
) -> DMatrix<f64> {
    let npts = basis.n_points();
    let nbe = basis.n_active();
    let mut zmat = DMatrix::zeros(npts, nbe);

    for p in 0..npts {
        if aux.screened[p] {
            continue;
        }
        let w = points[p].w;
        let dir = match channel.cosine_axis() {
            None => 1.0,
            Some(ax) => match &aux.k {
                // generalized reference: project through the cosine, which
                // the auxiliary pass zeroed at small-magnetization points
                Some(k) => k[ax][p],
                // collinear reference: the z direction is fixed
                None => 1.0,
            },
        };
        if dir == 0.0 {
            continue;
        }

        let fac = 0.5 * w * dir * z.zrho[p];
        for m in 0..nbe {
            zmat[(p, m)] = fac * basis.values[(p, m)];
        }

        if let (Some(zn), Some(zm), Some(gn), Some(grad)) =
            (&z.zsig_n, &z.zsig_m, &aux.grad_n, basis.grad.as_ref())
        {
            let mut g = [0.0_f64; 3];
            for (ax, g_ax) in g.iter_mut().enumerate() {
                let gm = aux.grad_m.as_ref().map_or(0.0, |gm| gm[ax][p]);
                *g_ax = w * dir * (zn[p] * gn[ax][p] + zm[p] * gm);
            }
            for m in 0..nbe {
                zmat[(p, m)] += g[0] * grad[0][(p, m)]
                    + g[1] * grad[1][(p, m)]
                    + g[2] * grad[2][(p, m)];
            }
        }
    }

    zmat
}
