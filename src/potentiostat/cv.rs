use serde::{Deserialize, Serialize};

use super::error::PotentiostatError;

/// First protocol parameter number of the CV values.
pub const CV_FIRST_PARAM: usize = 1;

/// Sequences with their sample rates, keyed by the largest scan rate (V/s)
/// each handles.
const CV_SEQUENCES: [(f64, &str); 3] = [(0.1, "CV_10Hz"), (0.5, "CV_100Hz"), (1.0, "CV_1kHz")];
const CV_FASTEST: &str = "CV_10kHz";

/// Triangular sweep E0 (quiet) → E1 → E2 → E3.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CvParameters {
    /// Holding potential during the quiet time (V)
    pub e0: f64,
    /// First vertex (V)
    pub e1: f64,
    /// Second vertex (V)
    pub e2: f64,
    /// Final potential (V)
    pub e3: f64,
    /// Sweep rate (V/s)
    pub scan_rate: f64,
    /// Quiet time at E0 (s)
    pub quiet_time: f64,
}

impl CvParameters {
    /// Check the sweep can be run.
    pub fn validate(&self) -> Result<(), PotentiostatError> {
        if !(self.scan_rate > 0.0) || !self.scan_rate.is_finite() {
            return Err(PotentiostatError::InvalidParameters(format!(
                "scan rate must be positive, got {}",
                self.scan_rate
            )));
        }
        if !(self.quiet_time >= 0.0) {
            return Err(PotentiostatError::InvalidParameters(format!(
                "quiet time must not be negative, got {}",
                self.quiet_time
            )));
        }
        Ok(())
    }

    fn ramps(&self) -> [f64; 3] {
        [
            (self.e1 - self.e0).abs() / self.scan_rate,
            (self.e2 - self.e1).abs() / self.scan_rate,
            (self.e3 - self.e2).abs() / self.scan_rate,
        ]
    }

    /// Protocol values `p1..p8`: hold V, hold t, then (target, ramp time)
    /// for each of the three segments.
    pub fn pgf_values(&self) -> [f64; 8] {
        let [r1, r2, r3] = self.ramps();
        [self.e0, self.quiet_time, self.e1, r1, self.e2, r2, self.e3, r3]
    }

    /// Nominal run time (s).
    pub fn duration(&self) -> f64 {
        self.quiet_time + self.ramps().iter().sum::<f64>()
    }

    /// Vendor sequence sampling fast enough for this scan rate.
    pub fn sequence(&self) -> &'static str {
        CV_SEQUENCES
            .iter()
            .find(|(limit, _)| self.scan_rate <= *limit)
            .map(|(_, name)| *name)
            .unwrap_or(CV_FASTEST)
    }
}

/// Last protocol values written to the vendor; only changes are resent.
#[derive(Debug, Clone, Default)]
pub struct PgfCache {
    values: Vec<Option<f64>>,
}

impl PgfCache {
    /// Commands that bring the stored protocol to `values`, starting at
    /// parameter index `first`. Empty when nothing changed.
    pub fn update(&mut self, first: usize, values: &[f64]) -> Vec<String> {
        let needed = first + values.len();
        if self.values.len() < needed {
            self.values.resize(needed, None);
        }

        let mut commands = Vec::new();
        for (offset, &value) in values.iter().enumerate() {
            let slot = &mut self.values[first + offset];
            if *slot != Some(value) {
                commands.push(format!("SetValue p{} {}", first + offset, value));
                *slot = Some(value);
            }
        }
        if !commands.is_empty() {
            commands.push("ExecuteProtocol _update_pgf_params_".to_string());
        }
        commands
    }

    /// Forget everything written, so the next update resends all values.
    pub fn invalidate(&mut self) {
        self.values.clear();
    }
}
