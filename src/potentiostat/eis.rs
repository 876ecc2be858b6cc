use serde::{Deserialize, Serialize};

use super::amplifier::{Filter1, Filter2, FilterResponse};
use super::error::PotentiostatError;
use crate::waveform::WaveformRequest;

/// First protocol parameter number of the EIS values (bias, duration).
pub const EIS_FIRST_PARAM: usize = 9;

/// Highest cutoff of the second filter stage in Bessel mode (Hz).
const FILTER2_BESSEL_MAX: f64 = 8e3;

/// Multi-sine impedance measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EisParameters {
    /// DC bias (V)
    pub e0: f64,
    /// Lowest frequency and spacing (Hz)
    pub f0: f64,
    /// Highest allowed frequency (Hz)
    pub f1: f64,
    /// Number of frequencies
    pub n_pts: usize,
    /// Periods of the lowest frequency
    pub n_cycles: usize,
    /// Peak amplitude (mV)
    pub amplitude_mv: f64,
    /// Rewrite the template even when the waveform did not change
    #[serde(default)]
    pub force_waveform: bool,
}

impl EisParameters {
    /// Waveform the parameters describe.
    pub fn request(&self) -> WaveformRequest {
        WaveformRequest {
            f0: self.f0,
            f1: self.f1,
            n_pts: self.n_pts,
            n_cycles: self.n_cycles,
            amplitude_mv: self.amplitude_mv,
        }
    }

    /// Whether `other` needs a different template.
    pub fn waveform_differs(&self, other: &EisParameters) -> bool {
        self.request() != other.request()
    }

    /// Protocol run time (s).
    pub fn duration(&self) -> Result<f64, PotentiostatError> {
        let lowest = self.f0.min(self.f1);
        if !(lowest > 0.0) || self.n_cycles == 0 {
            return Err(PotentiostatError::InvalidParameters(format!(
                "EIS needs positive frequencies and cycles, got f0={} f1={} n_cycles={}",
                self.f0, self.f1, self.n_cycles
            )));
        }
        Ok(self.n_cycles as f64 / lowest)
    }

    /// Protocol values `p9, p10`: bias and duration.
    pub fn pgf_values(&self) -> Result<[f64; 2], PotentiostatError> {
        Ok([self.e0, self.duration()?])
    }
}

/// First filter stage for a spectrum reaching `max_freq`.
pub fn filter1_for(max_freq: f64) -> Filter1 {
    Filter1::at_least(5.0 * max_freq)
}

/// Second filter stage for a spectrum reaching `max_freq`.
pub fn filter2_for(max_freq: f64) -> Filter2 {
    let cutoff = 5.0 * max_freq;
    if cutoff <= FILTER2_BESSEL_MAX {
        Filter2 {
            response: FilterResponse::Bessel,
            cutoff,
        }
    } else {
        Filter2 {
            response: FilterResponse::Butterworth,
            cutoff: FILTER2_BESSEL_MAX,
        }
    }
}
