//! Output formatting and logging utilities

use color_eyre::eyre::Result;
use nalgebra::DMatrix;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::time::SystemTime as StdSystemTime;
use tracing::info;
use tracing_subscriber::{
    fmt::format::Writer, fmt::layer, fmt::time::FormatTime, layer::SubscriberExt,
    util::SubscriberInitExt, Registry,
};

/// Custom time formatter that shows only seconds
struct SecondPrecisionTimer;

impl FormatTime for SecondPrecisionTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = StdSystemTime::now();
        let duration = now
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();

        // Format as HH:MM:SS (only seconds precision)
        let total_seconds = duration.as_secs();
        let hours = (total_seconds / 3600) % 24;
        let minutes = (total_seconds / 60) % 60;
        let seconds = total_seconds % 60;

        write!(w, "{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

/// Setup output logging to file or stdout
pub fn setup_output(output_path: Option<&String>) {
    match output_path {
        Some(path) => {
            if let Ok(log) = File::create(path) {
                let file_layer = layer()
                    .with_writer(log)
                    .with_timer(SecondPrecisionTimer)
                    .with_ansi(false);
                Registry::default().with(file_layer).init();
                info!("Output will be written to: {}", path);
            } else {
                eprintln!("Could not create output file: {}", path);
            }
        }
        None => {
            let stdout_layer = layer()
                .with_writer(std::io::stdout)
                .with_timer(SecondPrecisionTimer)
                .with_ansi(true);
            Registry::default().with(stdout_layer).init();
        }
    }
}

/// Print a summary of one Fock build to a writer.
pub fn print_build_summary<W: Write>(
    writer: &mut W,
    label: &str,
    vxc: &[DMatrix<f64>],
    xc_energy: f64,
    total_energy: f64,
) -> Result<()> {
    writeln!(writer, "Reference: {}", label)?;
    writeln!(writer, "XC energy:    {:.10} au", xc_energy)?;
    writeln!(writer, "Total energy: {:.10} au", total_energy)?;
    for (c, v) in vxc.iter().enumerate() {
        writeln!(
            writer,
            "  VXC component {}: {}x{}, |V| = {:.6e}",
            c,
            v.nrows(),
            v.ncols(),
            v.norm()
        )?;
    }
    Ok(())
}
