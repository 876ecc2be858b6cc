//! Impedance spectra derived from raw multi-sine captures.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::error::ExperimentError;
use super::point::{check_arrays, Location};

/// Per-frequency instrument response recorded against a reference impedance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectionEntry {
    /// Frequency (Hz)
    pub freq: f64,
    /// Measured |Z| divided by the reference magnitude
    pub magnitude: f64,
    /// Measured phase of the reference (degrees)
    pub phase_deg: f64,
}

impl CorrectionEntry {
    /// Build an entry from the impedance measured on the reference.
    pub fn from_reference(freq: f64, measured: Complex64, reference_ohms: f64) -> Self {
        Self {
            freq,
            magnitude: measured.norm() / reference_ohms,
            phase_deg: measured.arg().to_degrees(),
        }
    }

    /// Remove this entry's gain and phase error from `z`.
    pub fn apply(&self, z: Complex64) -> Complex64 {
        let magnitude = if self.magnitude > 0.0 {
            z.norm() / self.magnitude
        } else {
            z.norm()
        };
        Complex64::from_polar(magnitude, z.arg() - self.phase_deg.to_radians())
    }
}

/// Frequency-domain layer of a spectrum.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImpedanceData {
    /// Bin frequencies (Hz)
    pub freqs: Vec<f64>,
    /// Voltage phasors (V, peak)
    pub v_hat: Vec<Complex64>,
    /// Current phasors (A, peak)
    pub i_hat: Vec<Complex64>,
    /// Impedance V/I after corrections (Ω)
    pub z: Vec<Complex64>,
}

impl ImpedanceData {
    /// |Z| per frequency.
    pub fn magnitude(&self) -> Vec<f64> {
        self.z.iter().map(|z| z.norm()).collect()
    }

    /// Phase of Z per frequency in degrees.
    pub fn phase_deg(&self) -> Vec<f64> {
        self.z.iter().map(|z| z.arg().to_degrees()).collect()
    }
}

/// An impedance measurement: raw capture plus derived spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Measurement position
    pub loc: Location,
    /// Volts-to-amps factor of the recorded current
    #[serde(with = "crate::experiment::float::scalar")]
    pub gain: f64,
    /// Time (s)
    #[serde(with = "crate::experiment::float::vec")]
    pub t: Vec<f64>,
    /// Applied potential (V)
    #[serde(with = "crate::experiment::float::vec")]
    pub v: Vec<f64>,
    /// Current (A)
    #[serde(with = "crate::experiment::float::vec")]
    pub i: Vec<f64>,
    /// Frequencies present in the perturbation (Hz)
    #[serde(with = "crate::experiment::float::vec")]
    pub applied_freqs: Vec<f64>,
    /// Corrections used for the last derivation
    #[serde(default)]
    pub corrections: Option<Vec<CorrectionEntry>>,
    /// Derived frequency-domain data
    #[serde(default)]
    pub impedance: Option<ImpedanceData>,
    /// Memoized analysis results
    #[serde(default, with = "crate::experiment::float::map")]
    pub analysis: BTreeMap<String, f64>,
}

impl Spectrum {
    /// Raw spectrum; call [`Spectrum::finalize`] to derive impedances.
    pub fn new(
        loc: Location,
        t: Vec<f64>,
        v: Vec<f64>,
        i: Vec<f64>,
        applied_freqs: Vec<f64>,
    ) -> Result<Self, ExperimentError> {
        check_arrays(&t, &v, &i)?;
        Ok(Self {
            loc,
            gain: 1.0,
            t,
            v,
            i,
            applied_freqs,
            corrections: None,
            impedance: None,
            analysis: BTreeMap::new(),
        })
    }

    /// Derive the frequency-domain layer and store it with `corrections`.
    ///
    /// Only the raw arrays feed the derivation, so repeated calls with the
    /// same corrections give identical results.
    pub fn finalize(
        &mut self,
        corrections: Option<&[CorrectionEntry]>,
    ) -> Result<&ImpedanceData, ExperimentError> {
        let data = derive(&self.t, &self.v, &self.i, &self.applied_freqs, corrections)?;
        self.corrections = corrections.map(<[CorrectionEntry]>::to_vec);
        Ok(self.impedance.insert(data))
    }
}

/// Coefficient of bin `k` of an `n`-point DFT, scaled to peak amplitude.
fn dft_bin(x: &[f64], k: usize) -> Complex64 {
    let n = x.len();
    let step = -2.0 * PI * k as f64 / n as f64;
    let sum = x
        .iter()
        .enumerate()
        .fold(Complex64::new(0.0, 0.0), |acc, (idx, &value)| {
            acc + Complex64::from_polar(value, step * idx as f64)
        });
    sum * (2.0 / n as f64)
}

fn find_correction(corrections: &[CorrectionEntry], freq: f64) -> Option<&CorrectionEntry> {
    corrections
        .iter()
        .filter(|c| (c.freq - freq).abs() <= 1e-6 * freq.abs().max(1.0))
        .min_by(|a, b| (a.freq - freq).abs().total_cmp(&(b.freq - freq).abs()))
}

/// Impedance at the DFT bins nearest to `applied_freqs`.
///
/// The sample rate is `1 / mean(Δt)`. When `corrections` holds an entry for
/// a frequency (matched to 1 ppm, by position when frequencies differ), |Z|
/// is divided by its magnitude factor and its phase offset is subtracted.
/// A bin without current response fails with
/// [`ExperimentError::DegenerateSignal`].
pub fn derive(
    t: &[f64],
    v: &[f64],
    i: &[f64],
    applied_freqs: &[f64],
    corrections: Option<&[CorrectionEntry]>,
) -> Result<ImpedanceData, ExperimentError> {
    check_arrays(t, v, i)?;
    let n = t.len();
    if n < 2 {
        return Err(ExperimentError::InvalidData(
            "a spectrum needs at least two samples".to_string(),
        ));
    }
    if applied_freqs.is_empty() {
        return Err(ExperimentError::InvalidData(
            "no applied frequencies to evaluate".to_string(),
        ));
    }
    let mean_dt = (t[n - 1] - t[0]) / (n - 1) as f64;
    let sample_rate = 1.0 / mean_dt;
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(ExperimentError::InvalidData(format!(
            "time span {} s to {} s gives no usable sample rate",
            t[0],
            t[n - 1]
        )));
    }

    let mut data = ImpedanceData::default();
    for (index, &freq) in applied_freqs.iter().enumerate() {
        let k = ((freq * n as f64 / sample_rate).round() as usize).clamp(1, n / 2);
        let v_hat = dft_bin(v, k);
        let i_hat = dft_bin(i, k);
        if i_hat.norm() == 0.0 || !i_hat.is_finite() || !v_hat.is_finite() {
            return Err(ExperimentError::DegenerateSignal(format!(
                "no finite current response at {} Hz",
                freq
            )));
        }
        let mut z = v_hat / i_hat;
        if let Some(table) = corrections {
            let entry = find_correction(table, freq).or_else(|| table.get(index));
            if let Some(entry) = entry {
                z = entry.apply(z);
            }
        }
        if !z.is_finite() {
            return Err(ExperimentError::DegenerateSignal(format!(
                "impedance at {} Hz is not finite",
                freq
            )));
        }
        data.freqs.push(k as f64 * sample_rate / n as f64);
        data.v_hat.push(v_hat);
        data.i_hat.push(i_hat);
        data.z.push(z);
    }
    Ok(data)
}
