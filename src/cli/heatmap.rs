use anyhow::{Context, Result};
use std::path::PathBuf;

use secm::experiment::{builtin_analysis, Experiment, HeatmapKind};

use super::heading;

/// Print a scalar map of the experiment, top row first
pub fn run(file: PathBuf, kind: &str, sub: Option<usize>, analysis: Option<&str>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {}", file.display());
    }
    let mut experiment = Experiment::load(&file).context("Failed to read experiment")?;

    let map = match analysis {
        Some(name) => {
            let analysis = builtin_analysis(name)
                .with_context(|| format!("Unknown analysis '{}'", name))?;
            experiment.do_analysis(analysis.as_ref())
        }
        None => {
            let kind: HeatmapKind = kind.parse().context("Invalid heatmap kind")?;
            experiment.get_heatmap_data(&kind, sub)
        }
    };

    println!(
        "{}",
        heading(&format!("{} ({}x{})", analysis.unwrap_or(kind), experiment.size, experiment.size))
    );
    // grid rows are j = 0 at the bottom
    for row in map.iter().rev() {
        let cells: Vec<String> = row.iter().map(|v| format!("{:>11.3e}", v)).collect();
        println!("{}", cells.join(" "));
    }
    Ok(())
}
