//! Demonstration Kohn-Sham Fock-build driver with YAML configuration.
//!
//! Builds the demo collaborators (s-Gaussian basis, Becke grid, two-electron
//! mean-field builder) from the configured geometry, runs one Fock build and
//! one energy evaluation, and reports the results.

use std::fs;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};
use nalgebra::{DMatrix, DVector, Vector3};
use tracing::info;

use ksdft::basis::{GaussianBasis, GridBasis};
use ksdft::config::{Args, Config};
use ksdft::fock::{Nucleus, TwoElectronFock};
use ksdft::grid::build_becke_atom_grid;
use ksdft::io::{print_build_summary, setup_output};
use ksdft::ks_impl::{
    DensitySet, EmPerturbation, KohnSham, PbeExchange, ReferenceKind, SlaterExchange,
    XcFunctional,
};

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    setup_output(args.output.as_ref());

    info!("Reading configuration from: {}", args.config_file);
    let content = fs::read_to_string(&args.config_file)
        .wrap_err_with(|| format!("Unable to read configuration file: {}", args.config_file))?;
    let config: Config = serde_yml::from_str::<Config>(&content)
        .wrap_err("Failed to parse configuration file")?
        .with_defaults();

    let mut param = config.grid_params().to_integration_param();
    if let Some(n) = args.n_rad {
        param.n_rad = n;
    }
    if let Some(n) = args.n_ang {
        param.n_ang = n;
    }
    if let Some(eps) = args.epsilon {
        param.epsilon = eps;
    }
    let method = args.method.clone().unwrap_or_else(|| config.method());

    // demo system: one s shell per atomic center
    let centers: Vec<Vector3<f64>> = config
        .geometry
        .iter()
        .map(|a| Vector3::new(a.coords[0], a.coords[1], a.coords[2]))
        .collect();
    let exponents: Vec<f64> = config.geometry.iter().map(|a| a.exponent()).collect();
    let nuclei: Vec<Nucleus> = config
        .geometry
        .iter()
        .zip(&centers)
        .map(|(a, &c)| Nucleus {
            center: c,
            charge: a.charge,
        })
        .collect();

    let basis = Arc::new(GaussianBasis::from_centers(&centers, &exponents));
    info!("Basis: {} s-type shells", basis.n_basis());

    let grid = build_becke_atom_grid(&centers, param.n_rad, param.n_ang);
    info!("Quadrature grid: {} points", grid.len());

    let functionals: Vec<Box<dyn XcFunctional>> = match method.as_str() {
        "lda" => vec![Box::new(SlaterExchange::new())],
        "pbe" => vec![Box::new(PbeExchange::new())],
        other => return Err(eyre!("Unknown method: {}", other)),
    };

    let builder = TwoElectronFock::new(basis.shells(), &nuclei);
    let n_occ = config.n_electrons() / 2;
    let guess = core_guess(builder.h_core(), builder.overlap(), n_occ)?;
    let density = DensitySet::new(ReferenceKind::Restricted, vec![guess])?;

    let mut ks = KohnSham::new(
        ReferenceKind::Restricted,
        functionals,
        param,
        grid,
        basis,
        Box::new(builder),
    )?;
    info!("Reference: {}", ks.reference_label());

    let hfx = ks.exact_exchange_fraction();
    ks.form_fock(&EmPerturbation::none(), &density, false, hfx)?;
    ks.compute_energy(&density)?;

    let label = ks.reference_label();
    let mut stdout = std::io::stdout();
    print_build_summary(&mut stdout, &label, ks.vxc(), ks.xc_energy(), ks.total_energy())?;

    Ok(())
}

/// Core-Hamiltonian guess density: symmetric orthogonalization, occupy the
/// lowest levels.
fn core_guess(h: &DMatrix<f64>, s: &DMatrix<f64>, n_occ: usize) -> Result<DMatrix<f64>> {
    let n = h.nrows();
    if n_occ > n {
        return Err(eyre!(
            "cannot occupy {} orbitals with only {} basis functions",
            n_occ,
            n
        ));
    }

    // S^(-1/2), discarding near-singular eigenvalues
    let eig_s = s.clone().symmetric_eigen();
    let threshold = 1e-10;
    let inv_sqrt_vals = DVector::from_fn(eig_s.eigenvalues.len(), |i, _| {
        let val = eig_s.eigenvalues[i];
        if val > threshold {
            1.0 / val.sqrt()
        } else {
            0.0
        }
    });
    let x = &eig_s.eigenvectors
        * DMatrix::from_diagonal(&inv_sqrt_vals)
        * eig_s.eigenvectors.transpose();

    let f_prime = x.transpose() * h * &x;
    let eig = f_prime.symmetric_eigen();

    let mut indices: Vec<usize> = (0..eig.eigenvalues.len()).collect();
    indices.sort_by(|&a, &b| {
        eig.eigenvalues[a]
            .partial_cmp(&eig.eigenvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let sorted_vecs = eig.eigenvectors.select_columns(&indices);
    let coeffs = x * sorted_vecs;

    let occupied = coeffs.columns(0, n_occ);
    Ok(2.0 * &occupied * occupied.transpose())
}
