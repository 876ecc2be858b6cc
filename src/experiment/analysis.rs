//! Per-point analyses whose results are memoized on the grid.

/// A scalar computed from one `(t, V, I)` record.
pub trait Analysis {
    /// Memo key; includes any arguments so different settings never collide.
    fn key(&self) -> String;

    /// Compute the result.
    fn compute(&self, t: &[f64], v: &[f64], i: &[f64]) -> f64;
}

/// Signed current with the largest magnitude.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeakCurrent;

impl Analysis for PeakCurrent {
    fn key(&self) -> String {
        "peak_current".to_string()
    }

    fn compute(&self, _t: &[f64], _v: &[f64], i: &[f64]) -> f64 {
        i.iter()
            .copied()
            .max_by(|a, b| a.abs().total_cmp(&b.abs()))
            .unwrap_or(0.0)
    }
}

/// Midpoint of the anodic and cathodic peak potentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormalPotential;

impl Analysis for FormalPotential {
    fn key(&self) -> String {
        "formal_potential".to_string()
    }

    fn compute(&self, _t: &[f64], v: &[f64], i: &[f64]) -> f64 {
        estimate_formal_potential(v, i).unwrap_or(0.0)
    }
}

/// Estimate E0 of a voltammogram as the mean of the potentials at maximum
/// and minimum current.
///
/// Returns `None` when there are no samples or the current never changes
/// sign, which means one of the two peaks is missing.
pub fn estimate_formal_potential(v: &[f64], i: &[f64]) -> Option<f64> {
    let n = v.len().min(i.len());
    if n == 0 {
        return None;
    }
    let (mut i_max, mut i_min) = (0usize, 0usize);
    for idx in 0..n {
        if i[idx] > i[i_max] {
            i_max = idx;
        }
        if i[idx] < i[i_min] {
            i_min = idx;
        }
    }
    if !(i[i_max] > 0.0 && i[i_min] < 0.0) {
        return None;
    }
    Some((v[i_max] + v[i_min]) / 2.0)
}

/// Charge passed (C), trapezoidal integral of I over t.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChargePassed;

impl Analysis for ChargePassed {
    fn key(&self) -> String {
        "charge_passed".to_string()
    }

    fn compute(&self, t: &[f64], _v: &[f64], i: &[f64]) -> f64 {
        t.windows(2)
            .zip(i.windows(2))
            .map(|(tw, iw)| (tw[1] - tw[0]) * (iw[0] + iw[1]) / 2.0)
            .sum()
    }
}

/// Built-in analysis by name.
pub fn builtin(name: &str) -> Option<Box<dyn Analysis>> {
    match name.trim() {
        "peak_current" => Some(Box::new(PeakCurrent)),
        "formal_potential" => Some(Box::new(FormalPotential)),
        "charge_passed" => Some(Box::new(ChargePassed)),
        _ => None,
    }
}
