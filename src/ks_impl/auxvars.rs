//! Auxiliary-variable construction: spin channels, gradient invariants and
//! magnetization screening.
//!
//! The spin decomposition is `rho_a = (n + m)/2`, `rho_b = (n - m)/2` with
//! `m = mz` (signed) for collinear references and `m = |m|` for generalized
//! ones. The screening applied here is mirrored by the Z-matrix pass so that
//! potential and energy stay consistent: the same `msmall` flag that zeroes
//! the direction cosines also zeroes the magnetization-channel Z entries.

use super::{density::PointDensity, ReferenceKind};

/// Per-point variables consumed by the functional boundary and the Z-matrix
/// builder. Built fresh for every batch, discarded with it.
pub struct AuxVars {
    pub n_points: usize,
    /// Raw total density, used for the energy contraction
    pub n: Vec<f64>,
    pub rho_a: Vec<f64>,
    pub rho_b: Vec<f64>,
    pub sigma_aa: Option<Vec<f64>>,
    pub sigma_ab: Option<Vec<f64>>,
    pub sigma_bb: Option<Vec<f64>>,
    /// Signed `mz` (unrestricted) or `|m|` (generalized); zeros for
    /// restricted references
    pub mnorm: Vec<f64>,
    /// Magnetization direction cosines `[kx, ky, kz]`, generalized
    /// references only; forced to zero where `msmall`
    pub k: Option<[Vec<f64>; 3]>,
    /// Total-density gradient (gradient runs only)
    pub grad_n: Option<[Vec<f64>; 3]>,
    /// Collinear magnetization gradient: `grad mz` (unrestricted) or
    /// `grad |m|` (generalized, forced to zero where `msmall`)
    pub grad_m: Option<[Vec<f64>; 3]>,
    /// `|m|` below the screening threshold; direction-dependent quantities
    /// are exactly zero at these points
    pub msmall: Vec<bool>,
    /// Density below the screening threshold; the point contributes nothing
    pub screened: Vec<bool>,
}

/// Convert evaluated densities into the canonical variable set.
///
/// `den` holds one entry per density component in S, Z, Y, X order.
pub fn mk_aux_var(
    kind: ReferenceKind,
    is_gga: bool,
    epsilon: f64,
    den: &[PointDensity],
) -> AuxVars {
    debug_assert_eq!(den.len(), kind.n_components());
    let npts = den[0].value.len();
    let n = den[0].value.clone();
    let screened: Vec<bool> = n.iter().map(|&v| v < epsilon).collect();

    let mut rho_a = vec![0.0; npts];
    let mut rho_b = vec![0.0; npts];
    let mut mnorm = vec![0.0; npts];
    let mut msmall = vec![true; npts];
    let mut k = None;

    match kind {
        ReferenceKind::Restricted => {
            for p in 0..npts {
                let half = 0.5 * n[p].max(0.0);
                rho_a[p] = half;
                rho_b[p] = half;
            }
        }
        ReferenceKind::Unrestricted => {
            for p in 0..npts {
                let m = den[1].value[p];
                mnorm[p] = m;
                msmall[p] = m.abs() < epsilon;
                rho_a[p] = (0.5 * (n[p] + m)).max(0.0);
                rho_b[p] = (0.5 * (n[p] - m)).max(0.0);
            }
        }
        ReferenceKind::Generalized => {
            let mut kx = vec![0.0; npts];
            let mut ky = vec![0.0; npts];
            let mut kz = vec![0.0; npts];
            for p in 0..npts {
                let mz = den[1].value[p];
                let my = den[2].value[p];
                let mx = den[3].value[p];
                let norm = (mx * mx + my * my + mz * mz).sqrt();
                mnorm[p] = norm;
                if norm < epsilon {
                    // ill-defined direction: cosines stay at the zero default
                    msmall[p] = true;
                } else {
                    msmall[p] = false;
                    kx[p] = mx / norm;
                    ky[p] = my / norm;
                    kz[p] = mz / norm;
                }
                rho_a[p] = (0.5 * (n[p] + norm)).max(0.0);
                rho_b[p] = (0.5 * (n[p] - norm)).max(0.0);
            }
            k = Some([kx, ky, kz]);
        }
    }

    let grad_n = if is_gga { den[0].grad.clone() } else { None };
    let grad_m = if !is_gga {
        None
    } else {
        match kind {
            ReferenceKind::Restricted => None,
            ReferenceKind::Unrestricted => den[1].grad.clone(),
            ReferenceKind::Generalized => {
                match (&den[1].grad, &den[2].grad, &den[3].grad) {
                    (Some(gz), Some(gy), Some(gx)) => {
                        let mut h = [vec![0.0; npts], vec![0.0; npts], vec![0.0; npts]];
                        for (ax, h_ax) in h.iter_mut().enumerate() {
                            for p in 0..npts {
                                if msmall[p] {
                                    continue;
                                }
                                // grad |m| = (m . grad m) / |m|
                                h_ax[p] = (den[3].value[p] * gx[ax][p]
                                    + den[2].value[p] * gy[ax][p]
                                    + den[1].value[p] * gz[ax][p])
                                    / mnorm[p];
                            }
                        }
                        Some(h)
                    }
                    _ => None,
                }
            }
        }
    };

    let (sigma_aa, sigma_ab, sigma_bb) = if let Some(gn) = &grad_n {
        let mut saa = vec![0.0; npts];
        let mut sab = vec![0.0; npts];
        let mut sbb = vec![0.0; npts];
        for p in 0..npts {
            let mut aa = 0.0;
            let mut ab = 0.0;
            let mut bb = 0.0;
            for ax in 0..3 {
                let gm = grad_m.as_ref().map_or(0.0, |g| g[ax][p]);
                let ga = 0.5 * (gn[ax][p] + gm);
                let gb = 0.5 * (gn[ax][p] - gm);
                aa += ga * ga;
                ab += ga * gb;
                bb += gb * gb;
            }
            saa[p] = aa;
            sab[p] = ab;
            sbb[p] = bb;
        }
        (Some(saa), Some(sab), Some(sbb))
    } else {
        (None, None, None)
    };

    AuxVars {
        n_points: npts,
        n,
        rho_a,
        rho_b,
        sigma_aa,
        sigma_ab,
        sigma_bb,
        mnorm,
        k,
        grad_n,
        grad_m,
        msmall,
        screened,
    }
}
