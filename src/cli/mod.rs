use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod config;
mod corrections;
mod export;
mod heatmap;
mod info;
mod instruments;
mod waveform;

/// secm - Scanning Electrochemical Microscopy workstation control
#[derive(Parser)]
#[command(name = "secm")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select EIS frequencies and optionally write the waveform template
    Waveform {
        /// Lowest frequency and spacing (Hz)
        #[arg(long)]
        f0: f64,

        /// Highest allowed frequency (Hz)
        #[arg(long)]
        f1: f64,

        /// Number of frequencies
        #[arg(short = 'n', long, default_value = "18")]
        n_pts: usize,

        /// Periods of the lowest frequency
        #[arg(long, default_value = "1")]
        n_cycles: usize,

        /// Peak amplitude (mV)
        #[arg(short = 'a', long, default_value = "20")]
        amplitude: f64,

        /// Seed for the random phases
        #[arg(long)]
        seed: Option<u64>,

        /// Template file to write (raw little-endian f32)
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Display information about a .secmdata experiment
    Info {
        /// Experiment file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Write every measured pixel of an experiment as a text file
    Export {
        /// Experiment file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output directory
        #[arg(value_name = "DIR")]
        folder: PathBuf,
    },

    /// Print a heatmap of an experiment as a table
    Heatmap {
        /// Experiment file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Scalar: max, average, voltage:<V>, time:<s>, z or analysis:<name>
        #[arg(short = 'k', long, default_value = "max")]
        kind: String,

        /// Measurement of composite pixels to use
        #[arg(short = 's', long)]
        sub: Option<usize>,

        /// Run a built-in analysis (peak_current, formal_potential, charge_passed) first
        #[arg(long)]
        analysis: Option<String>,
    },

    /// List the keys of an EIS correction table
    Corrections {
        /// Correction table file
        #[arg(value_name = "FILE")]
        table: PathBuf,
    },

    /// Approach the surface with the instruments described by a config file
    Approach {
        /// Workstation config (TOML)
        #[arg(short = 'c', long, value_name = "FILE")]
        config: PathBuf,

        /// Zero offsets, use the coarse stepper and record a reference CV
        #[arg(long)]
        automatic: bool,

        /// Run without hardware that cannot be opened
        #[arg(long)]
        test_mode: bool,
    },

    /// Run a hopping-mode scan with the instruments described by a config file
    Scan {
        /// Workstation config (TOML)
        #[arg(short = 'c', long, value_name = "FILE")]
        config: PathBuf,

        /// Where to save the experiment (defaults to the feedback save directory)
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Run without hardware that cannot be opened
        #[arg(long)]
        test_mode: bool,
    },
}

impl Cli {
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

pub fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

/// Section title, styled when colors are available.
pub(crate) fn heading(text: &str) -> String {
    #[cfg(feature = "colorized_output")]
    {
        console::style(text).bold().cyan().to_string()
    }
    #[cfg(not(feature = "colorized_output"))]
    {
        text.to_string()
    }
}

pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Waveform {
            f0,
            f1,
            n_pts,
            n_cycles,
            amplitude,
            seed,
            output,
        } => waveform::run(f0, f1, n_pts, n_cycles, amplitude, seed, output),
        Commands::Info { file } => info::run(file),
        Commands::Export { file, folder } => export::run(file, folder),
        Commands::Heatmap {
            file,
            kind,
            sub,
            analysis,
        } => heatmap::run(file, &kind, sub, analysis.as_deref()),
        Commands::Corrections { table } => corrections::run(table),
        Commands::Approach {
            config,
            automatic,
            test_mode,
        } => instruments::approach(config, automatic, test_mode),
        Commands::Scan {
            config,
            output,
            test_mode,
        } => instruments::scan(config, output, test_mode),
    }
}
