use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::WaveformError;
use super::frequencies::select_frequencies;

/// Sample rates the stimulation DAC supports, ascending.
pub const SAMPLE_RATES: [f64; 4] = [10_000.0, 25_000.0, 100_000.0, 200_000.0];

/// Smallest supported sample rate of at least ten samples per period of
/// `max_freq`; the fastest rate when none is fast enough.
pub fn sample_rate_for(max_freq: f64) -> f64 {
    SAMPLE_RATES
        .iter()
        .copied()
        .find(|&rate| rate >= 10.0 * max_freq)
        .unwrap_or(SAMPLE_RATES[SAMPLE_RATES.len() - 1])
}

/// Template file name embedding the sample rate in kHz and a sequence index.
pub fn template_file_name(sample_rate: f64, index: usize) -> String {
    format!("eis_{}kHz_{}.dat", (sample_rate / 1000.0).round() as u64, index)
}

/// Parameters of a multi-sine perturbation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformRequest {
    /// Lowest frequency and frequency spacing (Hz)
    pub f0: f64,
    /// Highest allowed frequency (Hz)
    pub f1: f64,
    /// Number of frequencies
    pub n_pts: usize,
    /// Periods of the lowest frequency to synthesize
    pub n_cycles: usize,
    /// Peak amplitude of the summed signal (mV)
    pub amplitude_mv: f64,
}

impl WaveformRequest {
    /// Check the request and return its frequencies.
    pub fn frequencies(&self) -> Result<Vec<f64>, WaveformError> {
        if !(self.amplitude_mv > 0.0) {
            return Err(WaveformError::InvalidParameters(format!(
                "amplitude must be positive, got {} mV",
                self.amplitude_mv
            )));
        }
        if self.n_cycles == 0 {
            return Err(WaveformError::InvalidParameters(
                "at least one cycle is required".to_string(),
            ));
        }
        select_frequencies(self.f0, self.f1, self.n_pts)
    }
}

/// How the per-frequency amplitudes are weighted before peak scaling.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Weighting {
    /// 1/sqrt(f)
    #[default]
    Pink,
    /// 1/|Z|(f), with |Z| given as `(frequency, magnitude)` pairs and
    /// interpolated linearly in log-frequency.
    Impedance(Vec<(f64, f64)>),
}

impl Weighting {
    fn weight(&self, freq: f64) -> f64 {
        match self {
            Weighting::Pink => 1.0 / freq.sqrt(),
            Weighting::Impedance(table) => {
                let magnitude = interpolate_log(table, freq);
                if magnitude > 0.0 {
                    1.0 / magnitude
                } else {
                    1.0
                }
            }
        }
    }
}

fn interpolate_log(table: &[(f64, f64)], freq: f64) -> f64 {
    let Some(&(first_f, first_z)) = table.first() else {
        return 1.0;
    };
    if freq <= first_f {
        return first_z;
    }
    for pair in table.windows(2) {
        let (fa, za) = pair[0];
        let (fb, zb) = pair[1];
        if freq <= fb {
            let x = (freq.ln() - fa.ln()) / (fb.ln() - fa.ln());
            return za + x * (zb - za);
        }
    }
    table[table.len() - 1].1
}

/// A synthesized multi-sine perturbation.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Frequencies present in the signal (Hz), ascending
    pub frequencies: Vec<f64>,
    /// Phase of each sine (degrees, in [-180, 180))
    pub phases_deg: Vec<f64>,
    /// Amplitude of each sine after peak scaling (V)
    pub amplitudes: Vec<f64>,
    /// Sample rate (Hz)
    pub sample_rate: f64,
    /// Time-domain samples (V)
    pub samples: Vec<f64>,
}

impl Waveform {
    /// Synthesize the perturbation described by `request`.
    ///
    /// Phases are drawn from `rng`; the summed signal is scaled so that
    /// its largest absolute sample equals the requested amplitude.
    pub fn generate<R: Rng + ?Sized>(
        request: &WaveformRequest,
        weighting: &Weighting,
        rng: &mut R,
    ) -> Result<Self, WaveformError> {
        let frequencies = request.frequencies()?;
        let f_min = frequencies[0];
        let f_max = frequencies[frequencies.len() - 1];
        let sample_rate = sample_rate_for(f_max);
        let duration = request.n_cycles as f64 / f_min;
        let n_samples = ((duration * sample_rate).round() as usize).max(1);

        let phases_deg: Vec<f64> = frequencies
            .iter()
            .map(|_| rng.gen_range(-180.0..180.0))
            .collect();
        let mut amplitudes: Vec<f64> = frequencies.iter().map(|&f| weighting.weight(f)).collect();

        let mut samples = vec![0.0; n_samples];
        for ((&freq, &phase), &amp) in frequencies.iter().zip(&phases_deg).zip(&amplitudes) {
            let omega = 2.0 * PI * freq / sample_rate;
            let phi = phase.to_radians();
            for (n, sample) in samples.iter_mut().enumerate() {
                *sample += amp * (omega * n as f64 + phi).sin();
            }
        }

        let peak = samples.iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
        if peak <= 0.0 {
            return Err(WaveformError::InvalidParameters(
                "synthesized waveform is identically zero".to_string(),
            ));
        }
        let scale = request.amplitude_mv * 1e-3 / peak;
        samples.iter_mut().for_each(|s| *s *= scale);
        amplitudes.iter_mut().for_each(|a| *a *= scale);

        log::debug!(
            "generated {} Hz..{} Hz multi-sine: {} tones, {} samples at {} Hz",
            f_min,
            f_max,
            frequencies.len(),
            n_samples,
            sample_rate
        );

        Ok(Self {
            frequencies,
            phases_deg,
            amplitudes,
            sample_rate,
            samples,
        })
    }

    /// Signal duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate
    }

    /// Largest absolute sample (V).
    pub fn peak(&self) -> f64 {
        self.samples.iter().fold(0.0f64, |acc, s| acc.max(s.abs()))
    }

    /// Write the samples as raw little-endian f32. Returns the byte count.
    pub fn write_template<P: AsRef<Path>>(&self, path: P) -> Result<u64, WaveformError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = BufWriter::new(File::create(path)?);
        for &sample in &self.samples {
            writer.write_f32::<LittleEndian>(sample as f32)?;
        }
        writer.flush()?;
        Ok(4 * self.samples.len() as u64)
    }
}

/// Read a template written by [`Waveform::write_template`].
pub fn read_template<P: AsRef<Path>>(path: P) -> Result<Vec<f32>, WaveformError> {
    let mut bytes = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;
    let mut cursor = bytes.as_slice();
    let mut samples = Vec::with_capacity(bytes.len() / 4);
    while cursor.len() >= 4 {
        samples.push(cursor.read_f32::<LittleEndian>()?);
    }
    Ok(samples)
}
