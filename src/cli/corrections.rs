use anyhow::{Context, Result};
use std::path::PathBuf;

use secm::potentiostat::CorrectionTable;

use super::heading;

/// List the keys of a correction table
pub fn run(table: PathBuf) -> Result<()> {
    if !table.exists() {
        anyhow::bail!("File does not exist: {}", table.display());
    }
    let table = CorrectionTable::load(&table).context("Failed to read correction table")?;

    println!("{}", heading("EIS Correction Table"));
    println!("File: {}", table.path().display());
    println!("Entries: {}", table.len());
    for key in table.keys() {
        println!("  {}", key);
    }
    Ok(())
}
