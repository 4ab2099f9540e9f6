//! Configuration for the demonstration Kohn-Sham driver.
//!
//! YAML configuration with `Option`-typed fields and explicit default
//! merging, plus command-line overrides.

mod args;

pub use args::Args;

use serde::{Deserialize, Serialize};

use crate::ks_impl::IntegrationParam;

/// Main configuration structure for a Kohn-Sham Fock build.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub geometry: Vec<Atom>,
    /// Functional selection: "lda" or "pbe"
    pub method: Option<String>,
    pub grid: Option<GridParams>,
    pub n_electrons: Option<usize>,
}

/// One atomic center of the demonstration system.
#[derive(Debug, Deserialize, Serialize)]
pub struct Atom {
    pub charge: f64,
    pub coords: [f64; 3],
    /// s-shell exponent of the demonstration basis on this center
    pub exponent: Option<f64>,
}

impl Atom {
    pub fn exponent(&self) -> f64 {
        self.exponent.unwrap_or(1.0)
    }
}

/// Quadrature and screening parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GridParams {
    pub epsilon: Option<f64>,
    pub n_ang: Option<usize>,
    pub n_rad: Option<usize>,
    pub n_rad_per_batch: Option<usize>,
}

impl Default for GridParams {
    fn default() -> Self {
        let p = IntegrationParam::default();
        GridParams {
            epsilon: Some(p.epsilon),
            n_ang: Some(p.n_ang),
            n_rad: Some(p.n_rad),
            n_rad_per_batch: Some(p.n_rad_per_batch),
        }
    }
}

impl GridParams {
    /// Apply default values to any missing parameters
    pub fn with_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.epsilon.is_none() {
            self.epsilon = defaults.epsilon;
        }
        if self.n_ang.is_none() {
            self.n_ang = defaults.n_ang;
        }
        if self.n_rad.is_none() {
            self.n_rad = defaults.n_rad;
        }
        if self.n_rad_per_batch.is_none() {
            self.n_rad_per_batch = defaults.n_rad_per_batch;
        }
        self
    }

    pub fn to_integration_param(&self) -> IntegrationParam {
        let d = IntegrationParam::default();
        IntegrationParam {
            epsilon: self.epsilon.unwrap_or(d.epsilon),
            n_ang: self.n_ang.unwrap_or(d.n_ang),
            n_rad: self.n_rad.unwrap_or(d.n_rad),
            n_rad_per_batch: self.n_rad_per_batch.unwrap_or(d.n_rad_per_batch),
        }
    }
}

impl Config {
    /// Apply defaults to all configuration sections
    pub fn with_defaults(mut self) -> Self {
        if self.method.is_none() {
            self.method = Some("lda".to_string());
        }
        self.grid = Some(self.grid.take().unwrap_or_default().with_defaults());
        self
    }

    pub fn method(&self) -> String {
        self.method.clone().unwrap_or_else(|| "lda".to_string())
    }

    pub fn grid_params(&self) -> GridParams {
        self.grid.clone().unwrap_or_default()
    }

    /// Electron count; defaults to the total nuclear charge.
    pub fn n_electrons(&self) -> usize {
        self.n_electrons.unwrap_or_else(|| {
            self.geometry
                .iter()
                .map(|a| a.charge.round().max(0.0) as usize)
                .sum()
        })
    }
}
