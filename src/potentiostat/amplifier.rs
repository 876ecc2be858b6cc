use serde::{Deserialize, Serialize};

use super::error::PotentiostatError;

/// Amplifier gains selectable by index (mV/pA).
pub const GAIN_TABLE_MV_PER_PA: [f64; 18] = [
    0.005, 0.010, 0.020, 0.050, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0,
    500.0, 1000.0, 2000.0,
];

/// Command that returns the stimulus input to the internal DAC.
pub const STIM_INTERNAL: &str = "Set E TestDacToStim1 0";

/// First filter stage cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter1 {
    /// 10 kHz Bessel
    Bessel10k,
    /// 30 kHz Bessel
    Bessel30k,
    /// 100 kHz Bessel
    Bessel100k,
}

impl Filter1 {
    /// All stages, ascending.
    pub const ALL: [Filter1; 3] = [Filter1::Bessel10k, Filter1::Bessel30k, Filter1::Bessel100k];

    /// Cutoff frequency (Hz).
    pub fn cutoff(self) -> f64 {
        match self {
            Filter1::Bessel10k => 10e3,
            Filter1::Bessel30k => 30e3,
            Filter1::Bessel100k => 100e3,
        }
    }

    /// Vendor index.
    pub fn index(self) -> u8 {
        match self {
            Filter1::Bessel10k => 0,
            Filter1::Bessel30k => 1,
            Filter1::Bessel100k => 2,
        }
    }

    /// Smallest stage whose cutoff is at least `min_cutoff`, else the widest.
    pub fn at_least(min_cutoff: f64) -> Self {
        Self::ALL
            .into_iter()
            .find(|f| f.cutoff() >= min_cutoff)
            .unwrap_or(Filter1::Bessel100k)
    }
}

/// Second filter stage response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterResponse {
    /// Bessel
    Bessel,
    /// Butterworth
    Butterworth,
}

impl FilterResponse {
    fn index(self) -> u8 {
        match self {
            FilterResponse::Bessel => 0,
            FilterResponse::Butterworth => 1,
        }
    }
}

/// Second filter stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Filter2 {
    /// Response shape
    pub response: FilterResponse,
    /// Cutoff (Hz)
    pub cutoff: f64,
}

/// Amplifier fields to update; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmplifierSettings {
    /// Holding potential (V)
    pub hold_voltage: Option<f64>,
    /// First filter stage
    pub filter1: Option<Filter1>,
    /// Second filter stage
    pub filter2: Option<Filter2>,
    /// Stimulus filter index
    pub stim_filter: Option<u8>,
    /// Electrode mode index
    pub electrode_mode: Option<u8>,
    /// Index into [`GAIN_TABLE_MV_PER_PA`]
    pub gain_index: Option<usize>,
}

impl AmplifierSettings {
    /// Only the holding potential.
    pub fn hold(voltage: f64) -> Self {
        Self {
            hold_voltage: Some(voltage),
            ..Default::default()
        }
    }

    /// `Set E` commands for every present field, then [`STIM_INTERNAL`].
    pub fn commands(&self) -> Result<Vec<String>, PotentiostatError> {
        let mut commands = Vec::new();
        if let Some(v) = self.hold_voltage {
            commands.push(format!("Set E Vhold {}", v));
        }
        if let Some(f) = self.filter1 {
            commands.push(format!("Set E Filter1 {}", f.index()));
        }
        if let Some(f) = self.filter2 {
            if !(f.cutoff > 0.0) {
                return Err(PotentiostatError::InvalidParameters(format!(
                    "filter 2 cutoff must be positive, got {}",
                    f.cutoff
                )));
            }
            commands.push(format!("Set E F2Response {}", f.response.index()));
            commands.push(format!("Set E Filter2 {}", f.cutoff));
        }
        if let Some(s) = self.stim_filter {
            commands.push(format!("Set E StimFilter {}", s));
        }
        if let Some(m) = self.electrode_mode {
            commands.push(format!("Set E Mode {}", m));
        }
        if let Some(g) = self.gain_index {
            gain_for_index(g)?;
            commands.push(format!("Set E Gain {}", g));
        }
        commands.push(STIM_INTERNAL.to_string());
        Ok(commands)
    }
}

/// Gain (mV/pA) of a gain index.
pub fn gain_for_index(index: usize) -> Result<f64, PotentiostatError> {
    GAIN_TABLE_MV_PER_PA.get(index).copied().ok_or_else(|| {
        PotentiostatError::InvalidParameters(format!(
            "gain index {} outside 0..{}",
            index,
            GAIN_TABLE_MV_PER_PA.len()
        ))
    })
}

/// Amps per volt of the current monitor at `mv_per_pa`.
pub fn amps_per_volt(mv_per_pa: f64) -> f64 {
    1e-9 / mv_per_pa
}
