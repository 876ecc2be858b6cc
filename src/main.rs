//! # secm
//!
//! Command-line front end of the SECM control core.
//!
//! ## Usage
//!
//! ```bash
//! # Inspect a saved scan
//! secm info scan.secmdata
//! secm heatmap scan.secmdata --kind voltage:0.2
//!
//! # Preview an EIS waveform
//! secm waveform --f0 1 --f1 1000 -n 18 -o eis_10kHz_0.dat
//!
//! # Drive the workstation
//! secm scan -c secm.toml -o today.secmdata
//! ```

use anyhow::Result;
use clap::Parser;

mod cli;

use cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli::init_logging(cli.verbosity());
    cli::dispatch(cli)
}
