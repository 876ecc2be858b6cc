use anyhow::{Context, Result};
use log::info;
use std::path::PathBuf;

use secm::experiment::Experiment;

/// Write every measured pixel as `ii_jj_<Kind>.asc`
pub fn run(file: PathBuf, folder: PathBuf) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {}", file.display());
    }
    let experiment = Experiment::load(&file).context("Failed to read experiment")?;
    info!("Exporting {} to {}", file.display(), folder.display());
    let written = experiment
        .save_to_folder(&folder)
        .with_context(|| format!("Failed to export to {}", folder.display()))?;
    println!("Wrote {} files to {}", written.len(), folder.display());
    Ok(())
}
