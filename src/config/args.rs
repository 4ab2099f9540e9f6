//! Command-line argument parsing for the demonstration driver.

use clap::Parser;

/// One Kohn-Sham Fock build with YAML configuration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config_file: String,

    /// Override the functional ("lda" or "pbe")
    #[arg(long)]
    pub method: Option<String>,

    /// Override the number of radial shells
    #[arg(long)]
    pub n_rad: Option<usize>,

    /// Override the angular order
    #[arg(long)]
    pub n_ang: Option<usize>,

    /// Override the screening threshold
    #[arg(long)]
    pub epsilon: Option<f64>,

    /// Log output file (default stdout)
    #[arg(short, long)]
    pub output: Option<String>,
}
