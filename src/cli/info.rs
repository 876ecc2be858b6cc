use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

use secm::experiment::Experiment;

use super::heading;

/// Display information about a .secmdata experiment
pub fn run(file: PathBuf) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {}", file.display());
    }

    let experiment = Experiment::load(&file).context("Failed to read experiment")?;

    println!("{}", heading("SECM Experiment Information"));
    println!("File: {}", file.display());
    println!("Id: {}", experiment.id);
    println!("Started: {}", experiment.timestamp.to_rfc3339());
    println!();

    println!("{}", heading("Grid:"));
    println!("  Size: {0}x{0}", experiment.size);
    println!("  Side length: {} µm", experiment.length);
    println!("  Planned points: {}", experiment.order.len());
    println!(
        "  Measured: {} of {}",
        experiment.non_empty_count(),
        experiment.order.len()
    );
    println!("  Measurements per location: {}", experiment.max_points_per_loc());

    let mut kinds: BTreeMap<&str, usize> = BTreeMap::new();
    for point in experiment.grid().iter().flatten() {
        *kinds.entry(point.kind_name()).or_default() += 1;
    }
    for (kind, count) in &kinds {
        println!("    {:<13} {}", kind, count);
    }
    println!();

    let settings = experiment.settings().flatten();
    if !settings.is_empty() {
        println!("{}", heading("Settings:"));
        for (key, value) in settings {
            let preview = if value.chars().count() > 100 {
                let head: String = value.chars().take(100).collect();
                format!("{}... ({} bytes)", head, value.len())
            } else {
                value
            };
            println!("  {}: {}", key, preview);
        }
    }

    Ok(())
}
