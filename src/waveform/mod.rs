//! # Multi-sine EIS waveforms
//!
//! Electrochemical impedance spectra are measured with a single
//! sum-of-sines perturbation instead of a frequency sweep. This module
//! picks the frequencies, synthesizes the time-domain signal and writes it
//! as the raw template the potentiostat replays through its external
//! stimulation input.
//!
//! ## Frequency selection
//!
//! 1. Candidates are the integer multiples of `f0` up to `f1`.
//! 2. `n_pts` targets are spaced logarithmically between `f0` and `f1`.
//! 3. Each target snaps to the nearest candidate, advancing past any
//!    candidate that is already taken, a multiple of 60 Hz, or in a 2:1
//!    ratio with a chosen frequency (second harmonics would alias onto
//!    each other through electrode non-linearity).
//!
//! ## Template file
//!
//! ```text
//! eis_<kHz>kHz_<index>.dat   little-endian f32 samples in volts, no header
//! ```

mod error;
mod frequencies;
mod generator;


pub use error::WaveformError;
pub use frequencies::{log_space, select_frequencies};
pub use generator::{
    read_template, sample_rate_for, template_file_name, Waveform, WaveformRequest, Weighting,
    SAMPLE_RATES,
};
