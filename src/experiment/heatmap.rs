use std::fmt;
use std::str::FromStr;

use super::error::ExperimentError;

/// Scalar extracted from every pixel to draw a heatmap.
#[derive(Debug, Clone, PartialEq)]
pub enum HeatmapKind {
    /// Largest |I|
    MaxCurrent,
    /// Mean I
    AverageCurrent,
    /// I at the sample whose V is closest to the given potential (V)
    CurrentAtVoltage(f64),
    /// I at the sample closest to the given time (s)
    CurrentAtTime(f64),
    /// Probe height
    ZHeight,
    /// Memoized analysis result stored under this key
    Analysis(String),
}

impl fmt::Display for HeatmapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeatmapKind::MaxCurrent => write!(f, "max"),
            HeatmapKind::AverageCurrent => write!(f, "average"),
            HeatmapKind::CurrentAtVoltage(v) => write!(f, "voltage:{}", v),
            HeatmapKind::CurrentAtTime(t) => write!(f, "time:{}", t),
            HeatmapKind::ZHeight => write!(f, "z"),
            HeatmapKind::Analysis(key) => write!(f, "analysis:{}", key),
        }
    }
}

impl FromStr for HeatmapKind {
    type Err = ExperimentError;

    /// Parse `max`, `average`, `voltage:<V>`, `time:<s>`, `z` or `analysis:<key>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (head, arg) = match s.split_once(':') {
            Some((head, arg)) => (head, Some(arg.trim())),
            None => (s, None),
        };
        let number = |arg: Option<&str>| -> Result<f64, ExperimentError> {
            arg.and_then(|a| a.parse().ok()).ok_or_else(|| {
                ExperimentError::InvalidData(format!("heatmap kind '{}' needs a number", s))
            })
        };
        match head.to_ascii_lowercase().as_str() {
            "max" | "max_current" => Ok(HeatmapKind::MaxCurrent),
            "average" | "avg" | "average_current" => Ok(HeatmapKind::AverageCurrent),
            "voltage" => Ok(HeatmapKind::CurrentAtVoltage(number(arg)?)),
            "time" => Ok(HeatmapKind::CurrentAtTime(number(arg)?)),
            "z" | "height" => Ok(HeatmapKind::ZHeight),
            "analysis" => match arg {
                Some(key) if !key.is_empty() => Ok(HeatmapKind::Analysis(key.to_string())),
                _ => Err(ExperimentError::InvalidData(
                    "analysis heatmap needs a key".to_string(),
                )),
            },
            _ => Err(ExperimentError::InvalidData(format!(
                "unknown heatmap kind '{}'",
                s
            ))),
        }
    }
}

fn nearest_index(values: &[f64], target: f64) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - target).abs().total_cmp(&(b.1 - target).abs()))
        .map(|(idx, _)| idx)
}

/// Heatmap scalar of raw `(t, V, I)` data; zero when the arrays are empty.
pub(crate) fn scalar_from_echem(kind: &HeatmapKind, t: &[f64], v: &[f64], i: &[f64]) -> f64 {
    if i.is_empty() {
        return 0.0;
    }
    match kind {
        HeatmapKind::MaxCurrent => i.iter().fold(0.0f64, |acc, x| acc.max(x.abs())),
        HeatmapKind::AverageCurrent => i.iter().sum::<f64>() / i.len() as f64,
        HeatmapKind::CurrentAtVoltage(target) => nearest_index(v, *target)
            .and_then(|idx| i.get(idx))
            .copied()
            .unwrap_or(0.0),
        HeatmapKind::CurrentAtTime(target) => nearest_index(t, *target)
            .and_then(|idx| i.get(idx))
            .copied()
            .unwrap_or(0.0),
        HeatmapKind::ZHeight | HeatmapKind::Analysis(_) => 0.0,
    }
}
