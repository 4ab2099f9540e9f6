//! Tests for the exchange-correlation pipeline

use super::*;
use crate::basis::{BasisBatch, GaussianBasis, GridBasis};
use crate::grid::GridPoint;
use approx::assert_relative_eq;
use nalgebra::{DMatrix, Vector3};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

fn point(x: f64, w: f64) -> GridPoint {
    GridPoint {
        r: Vector3::new(x, 0.0, 0.0),
        w,
    }
}

// Mock implementations for testing

/// Linear mock functions phi_mu(r) = a_mu + b_mu * x, gradient (b_mu, 0, 0).
struct MockGridBasis {
    coeffs: Vec<(f64, f64)>,
}

impl GridBasis for MockGridBasis {
    fn n_basis(&self) -> usize {
        self.coeffs.len()
    }

    fn active_functions(&self, points: &[GridPoint], threshold: f64) -> Vec<usize> {
        self.coeffs
            .iter()
            .enumerate()
            .filter(|(_, &(a, b))| points.iter().any(|gp| (a + b * gp.r.x).abs() > threshold))
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
            let (a, b) = self.coeffs[active[m]];
            a + b * points[p].r.x
        });
        let grad = with_gradients.then(|| {
            [
                DMatrix::from_fn(npts, nbe, |_, m| self.coeffs[active[m]].1),
                DMatrix::zeros(npts, nbe),
                DMatrix::zeros(npts, nbe),
            ]
        });
        BasisBatch { values, grad }
    }
}

/// Mean-field mock: fixed matrices, call counting.
struct MockFockBuilder {
    h: Vec<DMatrix<f64>>,
    calls: AtomicUsize,
}

impl MockFockBuilder {
    fn zeros(n: usize, ncomp: usize) -> Self {
        Self {
            h: vec![DMatrix::zeros(n, n); ncomp],
            calls: AtomicUsize::new(0),
        }
    }
}

impl FockBuilder for MockFockBuilder {
    fn build_fock(
        &self,
        _pert: &EmPerturbation,
        _density: &DensitySet,
        _increment: bool,
        _hfx: f64,
    ) -> Result<Vec<DMatrix<f64>>, KsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.h.clone())
    }

    fn base_energy(&self, _density: &DensitySet, _hfx: f64) -> f64 {
        0.0
    }
}

/// Trivial functional with constant energy density per particle.
struct ConstEps {
    c: f64,
}

impl XcFunctional for ConstEps {
    fn name(&self) -> &str {
        "Const"
    }

    fn evaluate(&self, vars: &AuxVars, out: &mut XcOutput) {
        for p in 0..vars.n_points {
            if vars.screened[p] {
                continue;
            }
            out.eps[p] = self.c;
            out.vrho_a[p] = self.c;
            out.vrho_b[p] = self.c;
        }
    }
}

/// Capability-failure functional: returns NaN derivatives.
struct BrokenFunctional;

impl XcFunctional for BrokenFunctional {
    fn name(&self) -> &str {
        "Broken"
    }

    fn evaluate(&self, vars: &AuxVars, out: &mut XcOutput) {
        for p in 0..vars.n_points {
            out.vrho_a[p] = f64::NAN;
        }
    }
}

fn max_abs_diff(a: &DMatrix<f64>, b: &DMatrix<f64>) -> f64 {
    (a - b).abs().max()
}

fn restricted_aux(rho: &[f64]) -> AuxVars {
    let den = [PointDensity {
        value: rho.to_vec(),
        grad: None,
    }];
    mk_aux_var(ReferenceKind::Restricted, false, 1e-12, &den)
}

// ---------------------------------------------------------------------------
// configuration and shapes
// ---------------------------------------------------------------------------

#[test]
fn integration_param_defaults_are_valid() {
    let p = IntegrationParam::default();
    assert!(p.validate().is_ok());
    assert_eq!(p.points_per_batch(), 302 * 4);
}

#[test]
fn integration_param_rejects_bad_values() {
    let mut p = IntegrationParam::default();
    p.epsilon = 0.0;
    assert!(matches!(p.validate(), Err(KsError::InvalidParameter(_))));

    let mut p = IntegrationParam::default();
    p.epsilon = f64::NAN;
    assert!(p.validate().is_err());

    let mut p = IntegrationParam::default();
    p.n_rad_per_batch = 0;
    assert!(p.validate().is_err());
}

#[test]
fn density_set_validates_shapes() {
    let ok = DensitySet::new(
        ReferenceKind::Unrestricted,
        vec![DMatrix::zeros(3, 3), DMatrix::zeros(3, 3)],
    );
    assert!(ok.is_ok());

    let wrong_count = DensitySet::new(ReferenceKind::Unrestricted, vec![DMatrix::zeros(3, 3)]);
    assert!(matches!(
        wrong_count,
        Err(KsError::ShapeMismatch { expected: 2, .. })
    ));

    let not_square = DensitySet::new(ReferenceKind::Restricted, vec![DMatrix::zeros(3, 2)]);
    assert!(not_square.is_err());

    let mixed_dims = DensitySet::new(
        ReferenceKind::Unrestricted,
        vec![DMatrix::zeros(3, 3), DMatrix::zeros(2, 2)],
    );
    assert!(mixed_dims.is_err());
}

// ---------------------------------------------------------------------------
// batching and screening
// ---------------------------------------------------------------------------

#[test]
fn partition_covers_every_point_in_order() {
    let grid: Vec<GridPoint> = (0..10).map(|i| point(i as f64, 1.0)).collect();
    let basis = MockGridBasis {
        coeffs: vec![(1.0, 0.0)],
    };
    let batches = partition_grid(&grid, 4, &basis, 1e-12);
    assert_eq!(batches.len(), 3);
    assert_eq!((batches[0].start, batches[0].end), (0, 4));
    assert_eq!((batches[1].start, batches[1].end), (4, 8));
    assert_eq!((batches[2].start, batches[2].end), (8, 10));
    assert_eq!(batches[0].active, vec![0]);
}

#[test]
fn empty_active_set_is_kept_and_skippable() {
    let grid = vec![point(0.0, 1.0), point(1.0, 1.0)];
    // everything below threshold
    let basis = MockGridBasis {
        coeffs: vec![(1e-20, 0.0), (0.0, 1e-20)],
    };
    let batches = partition_grid(&grid, 2, &basis, 1e-10);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].n_active(), 0);

    // a zero-active batch contributes nothing
    let density = DensitySet::new(ReferenceKind::Restricted, vec![DMatrix::zeros(2, 2)]).unwrap();
    let functionals: Vec<Box<dyn XcFunctional>> = vec![Box::new(SlaterExchange::new())];
    let param = IntegrationParam {
        epsilon: 1e-10,
        n_ang: 1,
        n_rad: 1,
        n_rad_per_batch: 2,
    };
    let (vxc, e) = form_vxc(
        ReferenceKind::Restricted,
        &functionals,
        &param,
        &grid,
        &basis,
        &density,
    )
    .unwrap();
    assert_eq!(e, 0.0);
    assert_eq!(vxc[0], DMatrix::zeros(2, 2));
}

// ---------------------------------------------------------------------------
// density evaluation
// ---------------------------------------------------------------------------

#[test]
fn eval_density_matches_explicit_bilinear_form() {
    let basis = MockGridBasis {
        coeffs: vec![(0.5, 0.2), (-0.3, 0.7)],
    };
    let pts = vec![point(0.0, 1.0), point(0.6, 1.0), point(-1.1, 1.0)];
    let active = vec![0, 1];
    let batch = basis.evaluate_batch(&pts, &active, true);

    let p_sub = DMatrix::from_row_slice(2, 2, &[0.6, 0.2, 0.2, 0.4]);
    let den = eval_density(&p_sub, &batch);

    for p in 0..3 {
        let mut n_ref = 0.0;
        let mut g_ref = 0.0;
        for mu in 0..2 {
            for nu in 0..2 {
                let (phi_mu, phi_nu) = (batch.values[(p, mu)], batch.values[(p, nu)]);
                let (dmu, dnu) = (basis.coeffs[mu].1, basis.coeffs[nu].1);
                n_ref += p_sub[(mu, nu)] * phi_mu * phi_nu;
                g_ref += p_sub[(mu, nu)] * (dmu * phi_nu + phi_mu * dnu);
            }
        }
        assert_relative_eq!(den.value[p], n_ref, epsilon = 1e-12);
        let grad = den.grad.as_ref().unwrap();
        assert_relative_eq!(grad[0][p], g_ref, epsilon = 1e-12);
        assert_relative_eq!(grad[1][p], 0.0, epsilon = 1e-12);
    }
}

// ---------------------------------------------------------------------------
// auxiliary variables
// ---------------------------------------------------------------------------

#[test]
fn aux_vars_unrestricted_decomposition() {
    let den = [
        PointDensity {
            value: vec![1.0],
            grad: Some([vec![0.3], vec![0.0], vec![0.0]]),
        },
        PointDensity {
            value: vec![0.4],
            grad: Some([vec![0.1], vec![0.0], vec![0.0]]),
        },
    ];
    let aux = mk_aux_var(ReferenceKind::Unrestricted, true, 1e-12, &den);

    assert_relative_eq!(aux.rho_a[0], 0.7, epsilon = 1e-12);
    assert_relative_eq!(aux.rho_b[0], 0.3, epsilon = 1e-12);
    assert!(!aux.msmall[0]);
    assert!(!aux.screened[0]);

    // grad n_a = (0.3 + 0.1)/2 = 0.2, grad n_b = 0.1
    assert_relative_eq!(aux.sigma_aa.as_ref().unwrap()[0], 0.04, epsilon = 1e-14);
    assert_relative_eq!(aux.sigma_ab.as_ref().unwrap()[0], 0.02, epsilon = 1e-14);
    assert_relative_eq!(aux.sigma_bb.as_ref().unwrap()[0], 0.01, epsilon = 1e-14);
}

#[test]
fn aux_vars_generalized_direction_and_screening() {
    let den = [
        PointDensity {
            value: vec![0.8, 0.8],
            grad: None,
        },
        // mz
        PointDensity {
            value: vec![1e-20, 0.5],
            grad: None,
        },
        // my
        PointDensity {
            value: vec![0.0, 0.0],
            grad: None,
        },
        // mx
        PointDensity {
            value: vec![1e-20, 0.0],
            grad: None,
        },
    ];
    let aux = mk_aux_var(ReferenceKind::Generalized, false, 1e-12, &den);

    // point 0: magnetization below the screen, safe defaults
    assert!(aux.msmall[0]);
    let k = aux.k.as_ref().unwrap();
    assert_eq!(k[0][0], 0.0);
    assert_eq!(k[1][0], 0.0);
    assert_eq!(k[2][0], 0.0);
    assert_relative_eq!(aux.rho_a[0], 0.4, epsilon = 1e-12);
    assert_relative_eq!(aux.rho_b[0], 0.4, epsilon = 1e-12);

    // point 1: well-defined direction along z
    assert!(!aux.msmall[1]);
    assert_relative_eq!(k[2][1], 1.0, epsilon = 1e-12);
    assert_relative_eq!(aux.mnorm[1], 0.5, epsilon = 1e-12);
    assert_relative_eq!(aux.rho_a[1], 0.65, epsilon = 1e-12);
    assert_relative_eq!(aux.rho_b[1], 0.15, epsilon = 1e-12);
}

#[test]
fn aux_vars_flags_low_density_points() {
    let aux = restricted_aux(&[0.5, 1e-15, -1e-16]);
    assert!(!aux.screened[0]);
    assert!(aux.screened[1]);
    // small negative round-off is screened, not an error
    assert!(aux.screened[2]);
    assert_eq!(aux.rho_a[2], 0.0);
}

// ---------------------------------------------------------------------------
// functional driver
// ---------------------------------------------------------------------------

#[test]
fn slater_restricted_matches_unpolarized_form() {
    let rho = 0.3;
    let aux = restricted_aux(&[rho]);
    let mut out = XcOutput::zeros(1);
    SlaterExchange::new().evaluate(&aux, &mut out);

    let pi = std::f64::consts::PI;
    let e_ref = -0.75 * (3.0 / pi).cbrt() * rho.powf(4.0 / 3.0);
    let v_ref = -(3.0 / pi).cbrt() * rho.cbrt();
    assert_relative_eq!(out.eps[0] * rho, e_ref, epsilon = 1e-12);
    assert_relative_eq!(out.vrho_a[0], v_ref, epsilon = 1e-12);
    assert_relative_eq!(out.vrho_b[0], v_ref, epsilon = 1e-12);
}

#[test]
fn slater_vrho_matches_finite_difference() {
    let (ra, rb) = (0.21, 0.09);
    let delta = 1e-6;
    let eval = |ra: f64, rb: f64| {
        let mut aux = restricted_aux(&[ra + rb]);
        aux.rho_a = vec![ra];
        aux.rho_b = vec![rb];
        let mut out = XcOutput::zeros(1);
        SlaterExchange::new().evaluate(&aux, &mut out);
        (out.eps[0] * (ra + rb), out.vrho_a[0])
    };
    let (_, vrho) = eval(ra, rb);
    let (ep, _) = eval(ra + delta, rb);
    let (em, _) = eval(ra - delta, rb);
    assert_relative_eq!(vrho, (ep - em) / (2.0 * delta), max_relative = 1e-6);
}

#[test]
fn pbe_reduces_to_slater_at_zero_gradient() {
    let mut aux = restricted_aux(&[0.4]);
    aux.sigma_aa = Some(vec![0.0]);
    aux.sigma_ab = Some(vec![0.0]);
    aux.sigma_bb = Some(vec![0.0]);

    let mut lda = XcOutput::zeros(1);
    SlaterExchange::new().evaluate(&aux, &mut lda);
    let mut gga = XcOutput::zeros(1);
    PbeExchange::new().evaluate(&aux, &mut gga);

    assert_relative_eq!(gga.eps[0], lda.eps[0], epsilon = 1e-12);
    assert_relative_eq!(gga.vrho_a[0], lda.vrho_a[0], epsilon = 1e-12);
    assert!(gga.vsigma_aa[0].is_finite());
    assert!(gga.vsigma_aa[0] < 0.0); // gradient correction lowers the energy
}

#[test]
fn pbe_derivatives_match_finite_differences() {
    let (ra, rb) = (0.17, 0.11);
    let (saa, sbb) = (0.02, 0.015);
    let eval = |ra: f64, rb: f64, saa: f64, sbb: f64| {
        let mut aux = restricted_aux(&[ra + rb]);
        aux.rho_a = vec![ra];
        aux.rho_b = vec![rb];
        aux.sigma_aa = Some(vec![saa]);
        aux.sigma_ab = Some(vec![0.0]);
        aux.sigma_bb = Some(vec![sbb]);
        let mut out = XcOutput::zeros(1);
        PbeExchange::new().evaluate(&aux, &mut out);
        (
            out.eps[0] * (ra + rb),
            out.vrho_a[0],
            out.vsigma_aa[0],
        )
    };

    let (_, vrho, vsigma) = eval(ra, rb, saa, sbb);

    let dr = 1e-6;
    let (ep, _, _) = eval(ra + dr, rb, saa, sbb);
    let (em, _, _) = eval(ra - dr, rb, saa, sbb);
    assert_relative_eq!(vrho, (ep - em) / (2.0 * dr), max_relative = 1e-5);

    let ds = 1e-7;
    let (ep, _, _) = eval(ra, rb, saa + ds, sbb);
    let (em, _, _) = eval(ra, rb, saa - ds, sbb);
    assert_relative_eq!(vsigma, (ep - em) / (2.0 * ds), max_relative = 1e-4);
}

#[test]
fn mixing_coefficients_scale_contributions() {
    let aux = restricted_aux(&[0.25]);
    let full: Vec<Box<dyn XcFunctional>> = vec![Box::new(SlaterExchange::new())];
    let halves: Vec<Box<dyn XcFunctional>> = vec![
        Box::new(SlaterExchange::scaled(0.5)),
        Box::new(SlaterExchange::scaled(0.5)),
    ];

    let mut acc_full = XcOutput::zeros(1);
    let mut acc_half = XcOutput::zeros(1);
    let mut scr = XcOutput::zeros(1);
    accumulate_derivatives(&full, &aux, &mut acc_full, &mut scr).unwrap();
    accumulate_derivatives(&halves, &aux, &mut acc_half, &mut scr).unwrap();

    assert_relative_eq!(acc_full.eps[0], acc_half.eps[0], epsilon = 1e-12);
    assert_relative_eq!(acc_full.vrho_a[0], acc_half.vrho_a[0], epsilon = 1e-12);
}

#[test]
fn non_finite_functional_output_aborts() {
    let aux = restricted_aux(&[0.5]);
    let functionals: Vec<Box<dyn XcFunctional>> = vec![Box::new(BrokenFunctional)];
    let mut acc = XcOutput::zeros(1);
    let mut scr = XcOutput::zeros(1);
    let err = accumulate_derivatives(&functionals, &aux, &mut acc, &mut scr).unwrap_err();
    assert!(matches!(err, KsError::NonFiniteFunctional { point: 0, .. }));
}

#[test]
fn non_finite_output_at_screened_points_is_ignored() {
    // the broken value sits on a screened point, so it never propagates
    let aux = restricted_aux(&[1e-20]);
    let functionals: Vec<Box<dyn XcFunctional>> = vec![Box::new(BrokenFunctional)];
    let mut acc = XcOutput::zeros(1);
    let mut scr = XcOutput::zeros(1);
    accumulate_derivatives(&functionals, &aux, &mut acc, &mut scr).unwrap();
    assert_eq!(acc.vrho_a[0], 0.0);
}

// ---------------------------------------------------------------------------
// Z variables and Z matrix
// ---------------------------------------------------------------------------

#[test]
fn z_vars_rotate_spin_channels() {
    let mut out = XcOutput::zeros(1);
    out.vrho_a[0] = 0.8;
    out.vrho_b[0] = 0.2;
    out.vsigma_aa[0] = 0.3;
    out.vsigma_ab[0] = 0.1;
    out.vsigma_bb[0] = 0.2;

    let zs = construct_z_vars(DensityChannel::Scalar, true, &out);
    assert_relative_eq!(zs.zrho[0], 0.5, epsilon = 1e-12);
    assert_relative_eq!(zs.zsig_n.as_ref().unwrap()[0], 0.3, epsilon = 1e-12);
    assert_relative_eq!(zs.zsig_m.as_ref().unwrap()[0], 0.05, epsilon = 1e-12);

    let zm = construct_z_vars(DensityChannel::Mz, true, &out);
    assert_relative_eq!(zm.zrho[0], 0.3, epsilon = 1e-12);
    assert_relative_eq!(zm.zsig_n.as_ref().unwrap()[0], 0.05, epsilon = 1e-12);
    assert_relative_eq!(zm.zsig_m.as_ref().unwrap()[0], 0.2, epsilon = 1e-12);
}

#[test]
fn z_matrix_magnetization_channel_vanishes_under_screen() {
    // generalized reference with negligible magnetization everywhere
    let den = [
        PointDensity {
            value: vec![0.8],
            grad: None,
        },
        PointDensity {
            value: vec![1e-20],
            grad: None,
        },
        PointDensity {
            value: vec![0.0],
            grad: None,
        },
        PointDensity {
            value: vec![0.0],
            grad: None,
        },
    ];
    let aux = mk_aux_var(ReferenceKind::Generalized, false, 1e-12, &den);

    let mut out = XcOutput::zeros(1);
    out.vrho_a[0] = 0.9;
    out.vrho_b[0] = 0.1;

    let basis = MockGridBasis {
        coeffs: vec![(1.0, 0.0), (0.5, 0.0)],
    };
    let pts = vec![point(0.0, 0.3)];
    let batch = basis.evaluate_batch(&pts, &[0, 1], false);

    for channel in [DensityChannel::Mz, DensityChannel::My, DensityChannel::Mx] {
        let z = construct_z_vars(channel, false, &out);
        assert!(z.zrho[0] != 0.0);
        let zmat = form_z_matrix(channel, &pts, &z, &aux, &batch);
        assert_eq!(zmat, DMatrix::zeros(1, 2));
    }

    // the scalar channel is untouched by the magnetization screen
    let z = construct_z_vars(DensityChannel::Scalar, false, &out);
    let zmat = form_z_matrix(DensityChannel::Scalar, &pts, &z, &aux, &batch);
    assert!(zmat[(0, 0)] != 0.0);
}

#[test]
fn z_matrix_rows_vanish_for_screened_points() {
    let den = [PointDensity {
        value: vec![1e-18, 0.5],
        grad: None,
    }];
    let aux = mk_aux_var(ReferenceKind::Restricted, false, 1e-12, &den);

    // deliberately non-zero Z variables: the backward pass must apply the
    // same density screen as the forward pass
    let z = ZVars {
        zrho: vec![1.0, 1.0],
        zsig_n: None,
        zsig_m: None,
    };
    let basis = MockGridBasis {
        coeffs: vec![(1.0, 0.0)],
    };
    let pts = vec![point(0.0, 1.0), point(1.0, 1.0)];
    let batch = basis.evaluate_batch(&pts, &[0], false);
    let zmat = form_z_matrix(DensityChannel::Scalar, &pts, &z, &aux, &batch);
    assert_eq!(zmat[(0, 0)], 0.0);
    assert!(zmat[(1, 0)] != 0.0);
}

// ---------------------------------------------------------------------------
// potential assembly
// ---------------------------------------------------------------------------

fn small_system() -> (GaussianBasis, Vec<GridPoint>, DMatrix<f64>) {
    let basis = GaussianBasis::from_centers(
        &[Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.2)],
        &[0.6, 0.9],
    );
    let grid = vec![
        GridPoint {
            r: Vector3::new(0.1, 0.0, 0.2),
            w: 0.4,
        },
        GridPoint {
            r: Vector3::new(-0.3, 0.2, 0.8),
            w: 0.7,
        },
        GridPoint {
            r: Vector3::new(0.0, -0.1, 1.1),
            w: 0.5,
        },
        GridPoint {
            r: Vector3::new(0.4, 0.3, 0.5),
            w: 0.6,
        },
    ];
    let p = DMatrix::from_row_slice(2, 2, &[1.2, 0.4, 0.4, 0.8]);
    (basis, grid, p)
}

#[test]
fn constant_functional_reproduces_weighted_density_integral() {
    let (basis, grid, p) = small_system();
    let c = -0.5;
    let density = DensitySet::new(ReferenceKind::Restricted, vec![p.clone()]).unwrap();
    let functionals: Vec<Box<dyn XcFunctional>> = vec![Box::new(ConstEps { c })];
    let param = IntegrationParam {
        epsilon: 1e-14,
        n_ang: 2,
        n_rad: 1,
        n_rad_per_batch: 1,
    };
    let (vxc, e) = form_vxc(
        ReferenceKind::Restricted,
        &functionals,
        &param,
        &grid,
        &basis,
        &density,
    )
    .unwrap();

    // E = sum_p w C n(p)
    let mut e_ref = 0.0;
    let mut v_ref = DMatrix::zeros(2, 2);
    for gp in &grid {
        let phi: Vec<f64> = basis.shells().iter().map(|s| s.evaluate(&gp.r)).collect();
        let mut n = 0.0;
        for i in 0..2 {
            for j in 0..2 {
                n += p[(i, j)] * phi[i] * phi[j];
                v_ref[(i, j)] += gp.w * c * phi[i] * phi[j];
            }
        }
        e_ref += gp.w * c * n;
    }
    assert_relative_eq!(e, e_ref, epsilon = 1e-12);
    for i in 0..2 {
        for j in 0..2 {
            assert_relative_eq!(vxc[0][(i, j)], v_ref[(i, j)], epsilon = 1e-12);
        }
    }
}

#[test]
fn vxc_is_symmetric_for_symmetric_density() {
    let (basis, grid, p) = small_system();
    let density = DensitySet::new(ReferenceKind::Restricted, vec![p]).unwrap();
    let functionals: Vec<Box<dyn XcFunctional>> = vec![Box::new(PbeExchange::new())];
    let param = IntegrationParam {
        epsilon: 1e-14,
        n_ang: 2,
        n_rad: 1,
        n_rad_per_batch: 1,
    };
    let (vxc, _) = form_vxc(
        ReferenceKind::Restricted,
        &functionals,
        &param,
        &grid,
        &basis,
        &density,
    )
    .unwrap();
    for i in 0..2 {
        for j in 0..2 {
            assert_relative_eq!(vxc[0][(i, j)], vxc[0][(j, i)], epsilon = 1e-12);
        }
    }
}

#[test]
fn unrestricted_equal_spins_have_zero_magnetization_potential() {
    let (basis, grid, p) = small_system();
    let density = DensitySet::new(
        ReferenceKind::Unrestricted,
        vec![p.clone(), DMatrix::zeros(2, 2)],
    )
    .unwrap();
    let restricted = DensitySet::new(ReferenceKind::Restricted, vec![p]).unwrap();
    let functionals: Vec<Box<dyn XcFunctional>> = vec![Box::new(SlaterExchange::new())];
    let param = IntegrationParam {
        epsilon: 1e-14,
        n_ang: 4,
        n_rad: 1,
        n_rad_per_batch: 1,
    };

    let (vxc_u, e_u) = form_vxc(
        ReferenceKind::Unrestricted,
        &functionals,
        &param,
        &grid,
        &basis,
        &density,
    )
    .unwrap();
    let (vxc_r, e_r) = form_vxc(
        ReferenceKind::Restricted,
        &functionals,
        &param,
        &grid,
        &basis,
        &restricted,
    )
    .unwrap();

    assert_relative_eq!(e_u, e_r, epsilon = 1e-12);
    for i in 0..2 {
        for j in 0..2 {
            assert_relative_eq!(vxc_u[0][(i, j)], vxc_r[0][(i, j)], epsilon = 1e-12);
            assert_relative_eq!(vxc_u[1][(i, j)], 0.0, epsilon = 1e-12);
        }
    }
}

// ---------------------------------------------------------------------------
// orchestrator
// ---------------------------------------------------------------------------

/// Records observed phases for the hook test.
struct RecordingObserver {
    phases: Mutex<Vec<BuildPhase>>,
}

#[test]
fn form_fock_is_idempotent() {
    let (basis, grid, p) = small_system();
    let density = DensitySet::new(ReferenceKind::Restricted, vec![p]).unwrap();
    let functionals: Vec<Box<dyn XcFunctional>> = vec![Box::new(SlaterExchange::new())];
    let param = IntegrationParam {
        epsilon: 1e-14,
        n_ang: 2,
        n_rad: 1,
        n_rad_per_batch: 1,
    };
    let mut ks = KohnSham::new(
        ReferenceKind::Restricted,
        functionals,
        param,
        grid,
        std::sync::Arc::new(basis),
        Box::new(MockFockBuilder::zeros(2, 1)),
    )
    .unwrap();

    ks.form_fock(&EmPerturbation::none(), &density, false, 0.0)
        .unwrap();
    let fock_1 = ks.fock()[0].clone();
    let e_1 = ks.xc_energy();

    // no hidden accumulation across calls; the tolerance only absorbs the
    // nondeterministic merge order of the parallel reduction
    ks.form_fock(&EmPerturbation::none(), &density, false, 0.0)
        .unwrap();
    assert!(max_abs_diff(&ks.fock()[0], &fock_1) < 1e-13);
    assert_relative_eq!(ks.xc_energy(), e_1, epsilon = 1e-13);

    ks.compute_energy(&density).unwrap();
    assert_relative_eq!(ks.total_energy(), e_1, epsilon = 1e-14);
}

#[test]
fn shape_mismatch_is_detected_before_any_work() {
    let (basis, grid, _) = small_system();
    let functionals: Vec<Box<dyn XcFunctional>> = vec![Box::new(SlaterExchange::new())];
    let builder = Box::new(MockFockBuilder::zeros(2, 1));
    let mut ks = KohnSham::new(
        ReferenceKind::Restricted,
        functionals,
        IntegrationParam::default(),
        grid,
        std::sync::Arc::new(basis),
        builder,
    )
    .unwrap();

    let bad = DensitySet::new(ReferenceKind::Restricted, vec![DMatrix::zeros(5, 5)]).unwrap();
    let err = ks
        .form_fock(&EmPerturbation::none(), &bad, false, 0.0)
        .unwrap_err();
    assert!(matches!(err, KsError::ShapeMismatch { .. }));

    let wrong_kind = DensitySet::new(
        ReferenceKind::Unrestricted,
        vec![DMatrix::zeros(2, 2), DMatrix::zeros(2, 2)],
    )
    .unwrap();
    assert!(ks
        .form_fock(&EmPerturbation::none(), &wrong_kind, false, 0.0)
        .is_err());
}

#[test]
fn rejects_empty_functional_mix() {
    let (basis, grid, _) = small_system();
    let result = KohnSham::new(
        ReferenceKind::Restricted,
        Vec::new(),
        IntegrationParam::default(),
        grid,
        std::sync::Arc::new(basis),
        Box::new(MockFockBuilder::zeros(2, 1)),
    );
    assert!(matches!(result, Err(KsError::InvalidParameter(_))));
}

impl BuildObserver for RecordingObserver {
    fn phase_complete(&self, phase: BuildPhase, _elapsed: std::time::Duration) {
        self.phases.lock().unwrap().push(phase);
    }
}

#[test]
fn observer_sees_all_three_phases_in_order() {
    let (basis, grid, p) = small_system();
    let density = DensitySet::new(ReferenceKind::Restricted, vec![p]).unwrap();
    let functionals: Vec<Box<dyn XcFunctional>> = vec![Box::new(SlaterExchange::new())];
    let observer = std::sync::Arc::new(RecordingObserver {
        phases: Mutex::new(Vec::new()),
    });

    struct Fwd(std::sync::Arc<RecordingObserver>);
    impl BuildObserver for Fwd {
        fn phase_complete(&self, phase: BuildPhase, elapsed: std::time::Duration) {
            self.0.phase_complete(phase, elapsed);
        }
    }

    let mut ks = KohnSham::new(
        ReferenceKind::Restricted,
        functionals,
        IntegrationParam {
            epsilon: 1e-14,
            n_ang: 2,
            n_rad: 1,
            n_rad_per_batch: 1,
        },
        grid,
        std::sync::Arc::new(basis),
        Box::new(MockFockBuilder::zeros(2, 1)),
    )
    .unwrap()
    .with_observer(Box::new(Fwd(observer.clone())));

    ks.form_fock(&EmPerturbation::none(), &density, false, 0.0)
        .unwrap();
    assert_eq!(
        *observer.phases.lock().unwrap(),
        vec![
            BuildPhase::MeanField,
            BuildPhase::XcIntegration,
            BuildPhase::AddToFock
        ]
    );
}

#[test]
fn exact_exchange_fraction_sums_over_mix() {
    struct Hybrid;
    impl XcFunctional for Hybrid {
        fn name(&self) -> &str {
            "Hybrid"
        }
        fn exact_exchange(&self) -> f64 {
            0.25
        }
        fn evaluate(&self, _vars: &AuxVars, _out: &mut XcOutput) {}
    }

    let (basis, grid, _) = small_system();
    let functionals: Vec<Box<dyn XcFunctional>> =
        vec![Box::new(Hybrid), Box::new(SlaterExchange::scaled(0.75))];
    let ks = KohnSham::new(
        ReferenceKind::Restricted,
        functionals,
        IntegrationParam::default(),
        grid,
        std::sync::Arc::new(basis),
        Box::new(MockFockBuilder::zeros(2, 1)),
    )
    .unwrap();
    assert_relative_eq!(ks.exact_exchange_fraction(), 0.25, epsilon = 1e-14);
    assert_eq!(ks.reference_label(), "RKS (Hybrid + Slater)");
}
