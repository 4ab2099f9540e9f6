//! Output and logging utilities for the demonstration driver.

mod output;

pub use output::{print_build_summary, setup_output};
