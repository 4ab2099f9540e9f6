//! Demonstration mean-field (Coulomb + scaled exact-exchange) Fock builder
//! over s-type Gaussian shells.
//!
//! Closed-form overlap, kinetic, nuclear-attraction, dipole and two-electron
//! integrals for s primitives, precomputed once. The builder implements the
//! [`FockBuilder`] collaborator contract the orchestrator drives; it always
//! rebuilds from the full density and ignores the `increment` hint.

extern crate nalgebra as na;

use na::{DMatrix, Vector3};
use rayon::prelude::*;
use std::f64::consts::PI;

use crate::basis::GaussianShell;
use crate::ks_impl::{DensitySet, EmPerturbation, FockBuilder, KsError};

/// Boys function F0(t) = (1/2) sqrt(pi/t) erf(sqrt(t)).
fn boys_f0(t: f64) -> f64 {
    if t < 1e-12 {
        1.0 - t / 3.0
    } else {
        0.5 * (PI / t).sqrt() * libm::erf(t.sqrt())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Nucleus {
    pub center: Vector3<f64>,
    pub charge: f64,
}

fn overlap_ss(a: &GaussianShell, b: &GaussianShell) -> f64 {
    let p = a.alpha + b.alpha;
    let q = a.alpha * b.alpha / p;
    let r2 = (a.center - b.center).norm_squared();
    a.norm() * b.norm() * (PI / p).powf(1.5) * (-q * r2).exp()
}

fn kinetic_ss(a: &GaussianShell, b: &GaussianShell) -> f64 {
    let p = a.alpha + b.alpha;
    let q = a.alpha * b.alpha / p;
    let r2 = (a.center - b.center).norm_squared();
    q * (3.0 - 2.0 * q * r2) * overlap_ss(a, b)
}

fn nuclear_ss(a: &GaussianShell, b: &GaussianShell, nuc: &Nucleus) -> f64 {
    let p = a.alpha + b.alpha;
    let q = a.alpha * b.alpha / p;
    let r2 = (a.center - b.center).norm_squared();
    let gc = (a.center * a.alpha + b.center * b.alpha) / p;
    let t = p * (gc - nuc.center).norm_squared();
    -nuc.charge * a.norm() * b.norm() * (2.0 * PI / p) * (-q * r2).exp() * boys_f0(t)
}

/// Length-gauge dipole matrix element `<a| r |b>` (s primitives).
fn dipole_ss(a: &GaussianShell, b: &GaussianShell) -> Vector3<f64> {
    let p = a.alpha + b.alpha;
    let gc = (a.center * a.alpha + b.center * b.alpha) / p;
    gc * overlap_ss(a, b)
}

/// Two-electron repulsion integral (ab|cd) over s primitives.
fn eri_ssss(
    a: &GaussianShell,
    b: &GaussianShell,
    c: &GaussianShell,
    d: &GaussianShell,
) -> f64 {
    let p1 = a.alpha + b.alpha;
    let p2 = c.alpha + d.alpha;
    let q1 = a.alpha * b.alpha / p1;
    let q2 = c.alpha * d.alpha / p2;
    let gp = (a.center * a.alpha + b.center * b.alpha) / p1;
    let gq = (c.center * c.alpha + d.center * d.alpha) / p2;
    let r2ab = (a.center - b.center).norm_squared();
    let r2cd = (c.center - d.center).norm_squared();
    let rho = p1 * p2 / (p1 + p2);
    let t = rho * (gp - gq).norm_squared();

    let pref = 2.0 * PI.powf(2.5) / (p1 * p2 * (p1 + p2).sqrt());
    a.norm() * b.norm() * c.norm() * d.norm()
        * pref
        * (-q1 * r2ab - q2 * r2cd).exp()
        * boys_f0(t)
}

/// Precomputed-integral mean-field builder.
pub struct TwoElectronFock {
    n_basis: usize,
    overlap: DMatrix<f64>,
    h_core: DMatrix<f64>,
    dipole: [DMatrix<f64>; 3],
    eri: Vec<f64>,
    nuclear_repulsion: f64,
}

impl TwoElectronFock {
    pub fn new(shells: &[GaussianShell], nuclei: &[Nucleus]) -> Self {
        let n = shells.len();

        let overlap = DMatrix::from_fn(n, n, |i, j| overlap_ss(&shells[i], &shells[j]));
        let h_core = DMatrix::from_fn(n, n, |i, j| {
            let mut h = kinetic_ss(&shells[i], &shells[j]);
            for nuc in nuclei {
                h += nuclear_ss(&shells[i], &shells[j], nuc);
            }
            h
        });
        let dipole = [
            DMatrix::from_fn(n, n, |i, j| dipole_ss(&shells[i], &shells[j]).x),
            DMatrix::from_fn(n, n, |i, j| dipole_ss(&shells[i], &shells[j]).y),
            DMatrix::from_fn(n, n, |i, j| dipole_ss(&shells[i], &shells[j]).z),
        ];

        // (ij|kl) blocks, parallel over the ij pairs
        let ij_pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| (0..n).map(move |j| (i, j)))
            .collect();
        let blocks: Vec<Vec<f64>> = ij_pairs
            .par_iter()
            .map(|&(i, j)| {
                let mut block = Vec::with_capacity(n * n);
                for k in 0..n {
                    for l in 0..n {
                        block.push(eri_ssss(&shells[i], &shells[j], &shells[k], &shells[l]));
                    }
                }
                block
            })
            .collect();
        let mut eri = vec![0.0; n * n * n * n];
        for (idx, &(i, j)) in ij_pairs.iter().enumerate() {
            eri[(i * n + j) * n * n..(i * n + j + 1) * n * n].copy_from_slice(&blocks[idx]);
        }

        let mut nuclear_repulsion = 0.0;
        for i in 0..nuclei.len() {
            for j in (i + 1)..nuclei.len() {
                let r = (nuclei[i].center - nuclei[j].center).norm();
                if r > 1e-10 {
                    nuclear_repulsion += nuclei[i].charge * nuclei[j].charge / r;
                }
            }
        }

        Self {
            n_basis: n,
            overlap,
            h_core,
            dipole,
            eri,
            nuclear_repulsion,
        }
    }

    pub fn overlap(&self) -> &DMatrix<f64> {
        &self.overlap
    }

    pub fn h_core(&self) -> &DMatrix<f64> {
        &self.h_core
    }

    pub fn nuclear_repulsion(&self) -> f64 {
        self.nuclear_repulsion
    }

    #[inline]
    fn eri(&self, i: usize, j: usize, k: usize, l: usize) -> f64 {
        let n = self.n_basis;
        self.eri[((i * n + j) * n + k) * n + l]
    }

    /// J_ij = sum_kl P_kl (ij|kl)
    fn coulomb(&self, p: &DMatrix<f64>) -> DMatrix<f64> {
        let n = self.n_basis;
        DMatrix::from_fn(n, n, |i, j| {
            let mut s = 0.0;
            for k in 0..n {
                for l in 0..n {
                    s += p[(k, l)] * self.eri(i, j, k, l);
                }
            }
            s
        })
    }

    /// K_ij = sum_kl P_kl (ik|jl)
    fn exchange(&self, p: &DMatrix<f64>) -> DMatrix<f64> {
        let n = self.n_basis;
        DMatrix::from_fn(n, n, |i, j| {
            let mut s = 0.0;
            for k in 0..n {
                for l in 0..n {
                    s += p[(k, l)] * self.eri(i, k, j, l);
                }
            }
            s
        })
    }

    /// Two-electron part per component: `G_S = J(P_S) - hfx/2 K(P_S)`,
    /// `G_m = -hfx/2 K(P_m)` for the magnetization components.
    fn two_electron(&self, density: &DensitySet, hfx: f64) -> Vec<DMatrix<f64>> {
        let n = self.n_basis;
        density
            .components()
            .iter()
            .enumerate()
            .map(|(c, p)| {
                let mut g = if c == 0 {
                    self.coulomb(p)
                } else {
                    DMatrix::zeros(n, n)
                };
                if hfx != 0.0 {
                    g -= self.exchange(p) * (0.5 * hfx);
                }
                g
            })
            .collect()
    }
}

impl FockBuilder for TwoElectronFock {
    fn build_fock(
        &self,
        pert: &EmPerturbation,
        density: &DensitySet,
        _increment: bool,
        hfx: f64,
    ) -> Result<Vec<DMatrix<f64>>, KsError> {
        if density.n_basis() != self.n_basis {
            return Err(KsError::ShapeMismatch {
                context: "density matrix dimension",
                expected: self.n_basis,
                found: density.n_basis(),
            });
        }

        let mut h = self.h_core.clone();
        if !pert.is_empty() {
            let e = pert.total_dipole_amplitude();
            for ax in 0..3 {
                h += &self.dipole[ax] * e[ax];
            }
        }

        let mut fock = self.two_electron(density, hfx);
        fock[0] += h;
        Ok(fock)
    }

    fn base_energy(&self, density: &DensitySet, hfx: f64) -> f64 {
        // E = tr(P_S h) + 1/2 sum_c tr(P_c G_c) + E_nn
        let g = self.two_electron(density, hfx);
        let mut e = density.component(0).dot(&self.h_core);
        for (p, gc) in density.components().iter().zip(&g) {
            e += 0.5 * p.dot(gc);
        }
        e + self.nuclear_repulsion
    }
}
