//! Exchange-correlation functional boundary.
//!
//! The engine treats functional evaluation as an external capability: a
//! [`XcFunctional`] maps the auxiliary variables of one batch to an energy
//! density and its first derivatives, and the driver sums the contributions
//! of however many functionals are mixed. Two demonstration kernels are
//! provided, Slater (LDA) exchange and PBE (GGA) exchange.

use super::{AuxVars, KsError};

/// Per-point energy density (per particle) and first derivatives with
/// respect to the spin densities and gradient invariants. Accumulated
/// additively across the functional mix; `vsigma_*` stay zero for pure LDA
/// mixes.
pub struct XcOutput {
    pub eps: Vec<f64>,
    pub vrho_a: Vec<f64>,
    pub vrho_b: Vec<f64>,
    pub vsigma_aa: Vec<f64>,
    pub vsigma_ab: Vec<f64>,
    pub vsigma_bb: Vec<f64>,
}

impl XcOutput {
    pub fn zeros(n_points: usize) -> Self {
        Self {
            eps: vec![0.0; n_points],
            vrho_a: vec![0.0; n_points],
            vrho_b: vec![0.0; n_points],
            vsigma_aa: vec![0.0; n_points],
            vsigma_ab: vec![0.0; n_points],
            vsigma_bb: vec![0.0; n_points],
        }
    }

    pub fn n_points(&self) -> usize {
        self.eps.len()
    }

    pub fn reset(&mut self) {
        for v in [
            &mut self.eps,
            &mut self.vrho_a,
            &mut self.vrho_b,
            &mut self.vsigma_aa,
            &mut self.vsigma_ab,
            &mut self.vsigma_bb,
        ] {
            v.iter_mut().for_each(|x| *x = 0.0);
        }
    }

    fn is_finite_at(&self, p: usize) -> bool {
        self.eps[p].is_finite()
            && self.vrho_a[p].is_finite()
            && self.vrho_b[p].is_finite()
            && self.vsigma_aa[p].is_finite()
            && self.vsigma_ab[p].is_finite()
            && self.vsigma_bb[p].is_finite()
    }

    fn scaled_add(&mut self, other: &XcOutput, c: f64) {
        for p in 0..self.eps.len() {
            self.eps[p] += c * other.eps[p];
            self.vrho_a[p] += c * other.vrho_a[p];
            self.vrho_b[p] += c * other.vrho_b[p];
            self.vsigma_aa[p] += c * other.vsigma_aa[p];
            self.vsigma_ab[p] += c * other.vsigma_ab[p];
            self.vsigma_bb[p] += c * other.vsigma_bb[p];
        }
    }

    fn zero_point(&mut self, p: usize) {
        self.eps[p] = 0.0;
        self.vrho_a[p] = 0.0;
        self.vrho_b[p] = 0.0;
        self.vsigma_aa[p] = 0.0;
        self.vsigma_ab[p] = 0.0;
        self.vsigma_bb[p] = 0.0;
    }
}

/// One exchange-correlation kernel.
///
/// `eps` follows the energy-per-particle convention, so the batch energy
/// contraction is `sum_p w_p eps_p n_p`. Implementations may leave screened
/// points untouched; the driver zeroes them after accumulation.
pub trait XcFunctional: Send + Sync {
    fn name(&self) -> &str;

    fn is_gga(&self) -> bool {
        false
    }

    /// Linear mixing coefficient applied to this kernel's contributions.
    fn coefficient(&self) -> f64 {
        1.0
    }

    /// Fraction of exact exchange this kernel requests from the mean-field
    /// part of the Fock build.
    fn exact_exchange(&self) -> f64 {
        0.0
    }

    /// Evaluate energy density and derivatives into `out` (overwriting it).
    fn evaluate(&self, vars: &AuxVars, out: &mut XcOutput);
}

/// Evaluate every kernel of the mix on one batch and accumulate the scaled
/// contributions into `acc`; `scr` is the per-kernel scratch.
///
/// A non-finite value at an unscreened point is a capability failure: a
/// corrupted potential would silently corrupt the SCF trajectory, so the
/// whole Fock build aborts. The density screen is applied to the
/// accumulated derivatives here, and the same flag gates the Z-matrix pass.
pub fn accumulate_derivatives(
    functionals: &[Box<dyn XcFunctional>],
    vars: &AuxVars,
    acc: &mut XcOutput,
    scr: &mut XcOutput,
) -> Result<(), KsError> {
    acc.reset();
    for f in functionals {
        scr.reset();
        f.evaluate(vars, scr);
        for p in 0..vars.n_points {
            if !vars.screened[p] && !scr.is_finite_at(p) {
                return Err(KsError::NonFiniteFunctional {
                    name: f.name().to_owned(),
                    point: p,
                });
            }
        }
        acc.scaled_add(scr, f.coefficient());
    }
    for p in 0..vars.n_points {
        if vars.screened[p] {
            acc.zero_point(p);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Demonstration kernels
// ---------------------------------------------------------------------------

/// Spin-polarized Slater exchange prefactor, -(3/4)(6/pi)^(1/3)
#[inline]
fn cx_polarized() -> f64 {
    -0.75 * (6.0 / std::f64::consts::PI).cbrt()
}

/// Slater (Dirac) LDA exchange, spin-resolved:
/// `e_x = c_x (rho_a^(4/3) + rho_b^(4/3))`.
pub struct SlaterExchange {
    coeff: f64,
}

impl SlaterExchange {
    pub fn new() -> Self {
        Self { coeff: 1.0 }
    }

    pub fn scaled(coeff: f64) -> Self {
        Self { coeff }
    }
}

impl Default for SlaterExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl XcFunctional for SlaterExchange {
    fn name(&self) -> &str {
        "Slater"
    }

    fn coefficient(&self) -> f64 {
        self.coeff
    }

    fn evaluate(&self, vars: &AuxVars, out: &mut XcOutput) {
        let cx = cx_polarized();
        for p in 0..vars.n_points {
            if vars.screened[p] {
                continue;
            }
            let ra = vars.rho_a[p];
            let rb = vars.rho_b[p];
            let e = cx * (ra * ra.cbrt() + rb * rb.cbrt());
            out.eps[p] = e / vars.n[p];
            out.vrho_a[p] = 4.0 / 3.0 * cx * ra.cbrt();
            out.vrho_b[p] = 4.0 / 3.0 * cx * rb.cbrt();
        }
    }
}

/// PBE exchange (GGA), spin-resolved through the exact spin-scaling
/// relation `E_x[rho_a, rho_b] = (E_x[2 rho_a] + E_x[2 rho_b]) / 2`.
pub struct PbeExchange {
    coeff: f64,
}

impl PbeExchange {
    pub fn new() -> Self {
        Self { coeff: 1.0 }
    }

    pub fn scaled(coeff: f64) -> Self {
        Self { coeff }
    }

    /// Unpolarized energy density per volume and its partials with respect
    /// to `rho` and `sigma = |grad rho|^2`, written in terms of the squared
    /// reduced gradient `u = s^2` so that `sigma -> 0` stays regular.
    fn unpolarized(rho: f64, sigma: f64) -> (f64, f64, f64) {
        const KAPPA: f64 = 0.804;
        const MU: f64 = 0.219_514_972_764_517_1;

        if rho <= 0.0 {
            return (0.0, 0.0, 0.0);
        }

        let pi = std::f64::consts::PI;
        let cx = -0.75 * (3.0 / pi).cbrt();
        let rho13 = rho.cbrt();
        let e_l = cx * rho * rho13; // c_x rho^(4/3)
        let de_l = 4.0 / 3.0 * cx * rho13;

        // s = |grad rho| / (2 (3 pi^2)^(1/3) rho^(4/3)),  u = s^2
        let denom = 2.0 * (3.0 * pi * pi).cbrt() * rho * rho13;
        let d2 = denom * denom;
        let u = if d2 > 0.0 { sigma.max(0.0) / d2 } else { 0.0 };

        let t = 1.0 + (MU / KAPPA) * u;
        let fx = 1.0 + KAPPA - KAPPA / t;
        let dfx_du = MU / (t * t);

        let e = e_l * fx;
        let de_drho = de_l * fx + e_l * dfx_du * (-(8.0 / 3.0) * u / rho);
        let de_dsigma = if d2 > 0.0 { e_l * dfx_du / d2 } else { 0.0 };
        (e, de_drho, de_dsigma)
    }
}

impl Default for PbeExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl XcFunctional for PbeExchange {
    fn name(&self) -> &str {
        "PBE-X"
    }

    fn is_gga(&self) -> bool {
        true
    }

    fn coefficient(&self) -> f64 {
        self.coeff
    }

    fn evaluate(&self, vars: &AuxVars, out: &mut XcOutput) {
        for p in 0..vars.n_points {
            if vars.screened[p] {
                continue;
            }
            let saa = vars.sigma_aa.as_ref().map_or(0.0, |s| s[p]);
            let sbb = vars.sigma_bb.as_ref().map_or(0.0, |s| s[p]);
            let (ea, dra, dsa) = Self::unpolarized(2.0 * vars.rho_a[p], 4.0 * saa);
            let (eb, drb, dsb) = Self::unpolarized(2.0 * vars.rho_b[p], 4.0 * sbb);
            out.eps[p] = 0.5 * (ea + eb) / vars.n[p];
            out.vrho_a[p] = dra;
            out.vrho_b[p] = drb;
            out.vsigma_aa[p] = 2.0 * dsa;
            out.vsigma_bb[p] = 2.0 * dsb;
        }
    }
}
