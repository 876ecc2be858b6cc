use super::error::WaveformError;

const MAINS_HZ: f64 = 60.0;

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

fn is_mains_harmonic(freq: f64) -> bool {
    let ratio = freq / MAINS_HZ;
    ratio.round() >= 1.0 && approx_eq(ratio, ratio.round())
}

fn is_rejected(candidate: f64, chosen: &[f64]) -> bool {
    is_mains_harmonic(candidate)
        || chosen.iter().any(|&f| {
            approx_eq(candidate, f) || approx_eq(candidate, 2.0 * f) || approx_eq(2.0 * candidate, f)
        })
}

/// `n` values spaced logarithmically from `start` to `stop` inclusive.
pub fn log_space(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let ratio = stop / start;
            (0..n)
                .map(|i| start * ratio.powf(i as f64 / (n - 1) as f64))
                .collect()
        }
    }
}

/// Pick `n_pts` harmonics of `f0` in `[f0, f1]` for a multi-sine perturbation.
///
/// The result is sorted ascending. Every value is an integer multiple of
/// `f0`, none is a multiple of 60 Hz, and no two chosen values are in a
/// 2:1 ratio.
///
/// # Errors
///
/// [`WaveformError::InvalidParameters`] when `f0 <= 0`, `f1 <= f0`,
/// `n_pts == 0`, `f1 <= n_pts * f0`, or the candidates run out before
/// `n_pts` frequencies are placed.
pub fn select_frequencies(f0: f64, f1: f64, n_pts: usize) -> Result<Vec<f64>, WaveformError> {
    if !(f0 > 0.0) || !f0.is_finite() {
        return Err(WaveformError::InvalidParameters(format!(
            "f0 must be positive, got {}",
            f0
        )));
    }
    if !(f1 > f0) || !f1.is_finite() {
        return Err(WaveformError::InvalidParameters(format!(
            "f1 ({}) must exceed f0 ({})",
            f1, f0
        )));
    }
    if n_pts == 0 {
        return Err(WaveformError::InvalidParameters(
            "at least one frequency is required".to_string(),
        ));
    }
    if f1 <= n_pts as f64 * f0 {
        return Err(WaveformError::InvalidParameters(format!(
            "not enough harmonic slots: f1 ({}) must exceed n_pts * f0 ({})",
            f1,
            n_pts as f64 * f0
        )));
    }

    let n_candidates = (f1 / f0 + 1e-9).floor() as usize;
    let candidates: Vec<f64> = (1..=n_candidates).map(|k| k as f64 * f0).collect();

    let mut chosen: Vec<f64> = Vec::with_capacity(n_pts);
    for target in log_space(f0, f1, n_pts) {
        let nearest = (target / f0).round().clamp(1.0, n_candidates as f64) as usize;
        let mut index = nearest - 1;
        loop {
            let candidate = *candidates.get(index).ok_or_else(|| {
                WaveformError::InvalidParameters(format!(
                    "ran out of harmonics of {} Hz below {} Hz after {} frequencies",
                    f0,
                    f1,
                    chosen.len()
                ))
            })?;
            if is_rejected(candidate, &chosen) {
                index += 1;
            } else {
                chosen.push(candidate);
                break;
            }
        }
    }

    chosen.sort_by(|a, b| a.total_cmp(b));
    Ok(chosen)
}
