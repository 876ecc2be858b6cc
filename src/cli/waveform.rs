use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

use secm::waveform::{sample_rate_for, Waveform, WaveformRequest, Weighting};

use super::heading;

/// Print the selected frequencies and write the template when asked
pub fn run(
    f0: f64,
    f1: f64,
    n_pts: usize,
    n_cycles: usize,
    amplitude_mv: f64,
    seed: Option<u64>,
    output: Option<PathBuf>,
) -> Result<()> {
    let request = WaveformRequest {
        f0,
        f1,
        n_pts,
        n_cycles,
        amplitude_mv,
    };
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let waveform = Waveform::generate(&request, &Weighting::Pink, &mut rng)
        .context("Failed to generate waveform")?;

    println!("{}", heading("EIS Waveform"));
    println!("Frequencies ({}):", waveform.frequencies.len());
    for (k, (f, phase)) in waveform
        .frequencies
        .iter()
        .zip(&waveform.phases_deg)
        .enumerate()
    {
        println!("  {:3}. {:>10.1} Hz  phase {:>7.1}°", k + 1, f, phase);
    }
    let max_freq = waveform.frequencies.last().copied().unwrap_or(f1);
    println!(
        "Sample rate: {} Hz (for {} Hz)",
        sample_rate_for(max_freq),
        max_freq
    );
    println!("Duration: {:.3} s, {} samples", waveform.duration(), waveform.samples.len());
    println!("Peak: {:.4} mV", waveform.peak() * 1e3);

    if let Some(path) = output {
        let bytes = waveform
            .write_template(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Wrote {} bytes to {}", bytes, path.display());
    }
    Ok(())
}
