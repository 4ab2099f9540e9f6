//! Kohn-Sham exchange-correlation engine.
//!
//! This module owns the grid-integration pipeline that turns a one-particle
//! density into the exchange-correlation potential matrices and energy:
//! batching and basis screening, density evaluation for 1-, 2- and
//! 4-component references, auxiliary-variable construction, the functional
//! capability boundary, Z-matrix assembly and the batched potential
//! contraction. The [`KohnSham`] orchestrator drives one Fock build end to
//! end, delegating the Coulomb/exact-exchange part to a [`FockBuilder`]
//! collaborator and adding the resulting potential into the Fock matrices.

extern crate nalgebra as na;

mod auxvars;
mod batch;
mod density;
mod functional;
#[cfg(test)]
mod tests;
mod vxc;
mod zmat;

pub use auxvars::{mk_aux_var, AuxVars};
pub use batch::{partition_grid, GridBatch};
pub use density::{eval_density, PointDensity};
pub use functional::{
    accumulate_derivatives, PbeExchange, SlaterExchange, XcFunctional, XcOutput,
};
pub use vxc::{energy_vxc, form_vxc};
pub use zmat::{construct_z_vars, form_z_matrix, DensityChannel, ZVars};

use std::sync::Arc;
use std::time::{Duration, Instant};

use na::{DMatrix, Vector3};
use thiserror::Error;
use tracing::info;

use crate::basis::GridBasis;
use crate::grid::GridPoint;

#[derive(Debug, Error)]
pub enum KsError {
    #[error("invalid integration parameter: {0}")]
    InvalidParameter(String),

    #[error("{context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("functional '{name}' returned a non-finite value at grid point {point}")]
    NonFiniteFunctional { name: String, point: usize },
}

/// Numerical-integration controls for the exchange-correlation quadrature.
///
/// Immutable after construction; supplied once to the orchestrator and read
/// by every stage of the pipeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntegrationParam {
    /// Screening threshold for basis values, densities and magnetization
    pub epsilon: f64,
    /// Angular points per radial shell
    pub n_ang: usize,
    /// Radial shells
    pub n_rad: usize,
    /// Radial shells per macro batch
    pub n_rad_per_batch: usize,
}

impl Default for IntegrationParam {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            n_ang: 302,
            n_rad: 100,
            n_rad_per_batch: 4,
        }
    }
}

impl IntegrationParam {
    pub fn validate(&self) -> Result<(), KsError> {
        if !(self.epsilon > 0.0) {
            return Err(KsError::InvalidParameter(
                "screening epsilon must be positive".into(),
            ));
        }
        if self.n_ang == 0 || self.n_rad == 0 || self.n_rad_per_batch == 0 {
            return Err(KsError::InvalidParameter(
                "grid point counts must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Number of grid points covered by one macro batch.
    pub fn points_per_batch(&self) -> usize {
        self.n_ang * self.n_rad_per_batch
    }
}

/// Shape of the single-determinant reference, which fixes the number of
/// density components carried through the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Closed-shell: scalar density only
    Restricted,
    /// Collinear spin: scalar density + z magnetization
    Unrestricted,
    /// Two-component spinor: scalar density + full magnetization vector
    Generalized,
}

impl ReferenceKind {
    pub fn n_components(self) -> usize {
        match self {
            ReferenceKind::Restricted => 1,
            ReferenceKind::Unrestricted => 2,
            ReferenceKind::Generalized => 4,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            ReferenceKind::Restricted => "R",
            ReferenceKind::Unrestricted => "U",
            ReferenceKind::Generalized => "G",
        }
    }
}

/// One-particle density components in the order S, Z, Y, X.
///
/// Owned by the SCF state; the engine borrows it read-only for the duration
/// of one Fock build. Construction validates the component count against the
/// reference shape and that all components are square matrices of one size.
pub struct DensitySet {
    kind: ReferenceKind,
    components: Vec<DMatrix<f64>>,
}

impl DensitySet {
    pub fn new(kind: ReferenceKind, components: Vec<DMatrix<f64>>) -> Result<Self, KsError> {
        if components.len() != kind.n_components() {
            return Err(KsError::ShapeMismatch {
                context: "density component count",
                expected: kind.n_components(),
                found: components.len(),
            });
        }
        let nb = components[0].nrows();
        for c in &components {
            if c.nrows() != nb || c.ncols() != nb {
                return Err(KsError::ShapeMismatch {
                    context: "density matrix dimension",
                    expected: nb,
                    found: if c.nrows() != nb { c.nrows() } else { c.ncols() },
                });
            }
        }
        Ok(Self { kind, components })
    }

    pub fn kind(&self) -> ReferenceKind {
        self.kind
    }

    pub fn n_basis(&self) -> usize {
        self.components[0].nrows()
    }

    pub fn components(&self) -> &[DMatrix<f64>] {
        &self.components
    }

    pub fn component(&self, i: usize) -> &DMatrix<f64> {
        &self.components[i]
    }
}

/// Electromagnetic-field perturbation carried through a Fock build.
///
/// Holds the instantaneous dipole-field amplitudes; consumed by the
/// mean-field builder, ignored by the field-independent XC part.
#[derive(Clone, Debug, Default)]
pub struct EmPerturbation {
    fields: Vec<Vector3<f64>>,
}

impl EmPerturbation {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_dipole_field(amplitude: Vector3<f64>) -> Self {
        Self {
            fields: vec![amplitude],
        }
    }

    pub fn add_dipole_field(&mut self, amplitude: Vector3<f64>) {
        self.fields.push(amplitude);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Net dipole amplitude over all active fields.
    pub fn total_dipole_amplitude(&self) -> Vector3<f64> {
        self.fields.iter().sum()
    }
}

/// Phases of one Fock build, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildPhase {
    MeanField,
    XcIntegration,
    AddToFock,
}

/// Optional observability hook invoked after each build phase.
pub trait BuildObserver: Send + Sync {
    fn phase_complete(&self, phase: BuildPhase, elapsed: Duration);
}

/// Coulomb / exact-exchange collaborator.
///
/// `density` is always the full current density; builders that support
/// incremental formation keep their own previous-density state and use
/// `increment` to decide whether to rebuild from scratch. `hfx` scales the
/// exact-exchange contribution.
pub trait FockBuilder: Send + Sync {
    fn build_fock(
        &self,
        pert: &EmPerturbation,
        density: &DensitySet,
        increment: bool,
        hfx: f64,
    ) -> Result<Vec<DMatrix<f64>>, KsError>;

    /// Mean-field total energy (one-electron + two-electron + nuclear) for
    /// the given density, excluding exchange-correlation.
    fn base_energy(&self, density: &DensitySet, hfx: f64) -> f64;
}

/// Orchestrates one Kohn-Sham Fock build per SCF iteration.
pub struct KohnSham {
    kind: ReferenceKind,
    n_basis: usize,
    functionals: Vec<Box<dyn XcFunctional>>,
    int_param: IntegrationParam,
    grid: Vec<GridPoint>,
    basis: Arc<dyn GridBasis>,
    fock_builder: Box<dyn FockBuilder>,
    observer: Option<Box<dyn BuildObserver>>,

    fock: Vec<DMatrix<f64>>,
    vxc: Vec<DMatrix<f64>>,
    xc_energy: f64,
    total_energy: f64,
    last_hfx: f64,
}

impl KohnSham {
    pub fn new(
        kind: ReferenceKind,
        functionals: Vec<Box<dyn XcFunctional>>,
        int_param: IntegrationParam,
        grid: Vec<GridPoint>,
        basis: Arc<dyn GridBasis>,
        fock_builder: Box<dyn FockBuilder>,
    ) -> Result<Self, KsError> {
        int_param.validate()?;
        if functionals.is_empty() {
            return Err(KsError::InvalidParameter(
                "at least one functional is required".into(),
            ));
        }
        let n_basis = basis.n_basis();
        let ncomp = kind.n_components();
        let zeros = vec![DMatrix::zeros(n_basis, n_basis); ncomp];
        let hfx = functionals
            .iter()
            .map(|f| f.coefficient() * f.exact_exchange())
            .sum();
        Ok(Self {
            kind,
            n_basis,
            functionals,
            int_param,
            grid,
            basis,
            fock_builder,
            observer: None,
            fock: zeros.clone(),
            vxc: zeros,
            xc_energy: 0.0,
            total_energy: 0.0,
            last_hfx: hfx,
        })
    }

    pub fn with_observer(mut self, observer: Box<dyn BuildObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn kind(&self) -> ReferenceKind {
        self.kind
    }

    pub fn n_basis(&self) -> usize {
        self.n_basis
    }

    /// Whether any functional in the mix is gradient-corrected.
    pub fn is_gga(&self) -> bool {
        self.functionals.iter().any(|f| f.is_gga())
    }

    /// Coefficient-weighted exact-exchange fraction of the functional mix.
    pub fn exact_exchange_fraction(&self) -> f64 {
        self.functionals
            .iter()
            .map(|f| f.coefficient() * f.exact_exchange())
            .sum()
    }

    /// Human-readable reference tag, e.g. "RKS (Slater)".
    pub fn reference_label(&self) -> String {
        let names: Vec<&str> = self.functionals.iter().map(|f| f.name()).collect();
        format!("{}KS ({})", self.kind.prefix(), names.join(" + "))
    }

    pub fn fock(&self) -> &[DMatrix<f64>] {
        &self.fock
    }

    pub fn vxc(&self) -> &[DMatrix<f64>] {
        &self.vxc
    }

    pub fn xc_energy(&self) -> f64 {
        self.xc_energy
    }

    pub fn total_energy(&self) -> f64 {
        self.total_energy
    }

    fn check_shapes(&self, density: &DensitySet) -> Result<(), KsError> {
        if density.kind() != self.kind {
            return Err(KsError::ShapeMismatch {
                context: "density component count",
                expected: self.kind.n_components(),
                found: density.kind().n_components(),
            });
        }
        if density.n_basis() != self.n_basis {
            return Err(KsError::ShapeMismatch {
                context: "density matrix dimension",
                expected: self.n_basis,
                found: density.n_basis(),
            });
        }
        Ok(())
    }

    fn phase_start(&self) -> Option<Instant> {
        self.observer.as_ref().map(|_| Instant::now())
    }

    fn phase_end(&self, phase: BuildPhase, started: Option<Instant>) {
        if let (Some(obs), Some(t0)) = (self.observer.as_deref(), started) {
            obs.phase_complete(phase, t0.elapsed());
        }
    }

    /// Build the Fock matrices for the given density: mean-field part via
    /// the collaborator, then the exchange-correlation potential, then the
    /// sum of the two.
    ///
    /// `hfx` is the exact-exchange fraction forwarded to the mean-field
    /// builder; a Kohn-Sham caller passes [`Self::exact_exchange_fraction`].
    /// The XC part is never incremental: `vxc` and `xc_energy` are reset and
    /// recomputed from the full density on every call, whatever `increment`
    /// says.
    pub fn form_fock(
        &mut self,
        pert: &EmPerturbation,
        density: &DensitySet,
        increment: bool,
        hfx: f64,
    ) -> Result<(), KsError> {
        self.check_shapes(density)?;
        self.last_hfx = hfx;

        let t = self.phase_start();
        let fock = self.fock_builder.build_fock(pert, density, increment, hfx)?;
        if fock.len() != self.kind.n_components() {
            return Err(KsError::ShapeMismatch {
                context: "mean-field Fock component count",
                expected: self.kind.n_components(),
                found: fock.len(),
            });
        }
        self.fock = fock;
        self.phase_end(BuildPhase::MeanField, t);

        let t = self.phase_start();
        let (vxc, xc_energy) = form_vxc(
            self.kind,
            &self.functionals,
            &self.int_param,
            &self.grid,
            self.basis.as_ref(),
            density,
        )?;
        self.vxc = vxc;
        self.xc_energy = xc_energy;
        self.phase_end(BuildPhase::XcIntegration, t);

        let t = self.phase_start();
        for (f, v) in self.fock.iter_mut().zip(&self.vxc) {
            *f += v;
        }
        self.phase_end(BuildPhase::AddToFock, t);

        info!("XC potential assembled, E_xc = {:.12} au", self.xc_energy);
        Ok(())
    }

    /// Total energy for the given density: mean-field base energy plus the
    /// XC energy accumulated by the last [`Self::form_fock`].
    pub fn compute_energy(&mut self, density: &DensitySet) -> Result<(), KsError> {
        self.check_shapes(density)?;
        let base = self.fock_builder.base_energy(density, self.last_hfx);
        self.total_energy = base + self.xc_energy;
        info!(
            "Total energy: {:.12} au (base {:.12}, XC {:.12})",
            self.total_energy, base, self.xc_energy
        );
        Ok(())
    }
}
