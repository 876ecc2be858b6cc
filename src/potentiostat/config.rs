use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::PotentiostatError;

/// Potentiostat settings, normally the `[potentiostat]` table of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PotentiostatConfig {
    /// Command file the vendor application watches
    pub inbox: PathBuf,
    /// Reply file the vendor application writes
    pub outbox: PathBuf,
    /// Root for exported measurements without an explicit destination
    pub data_dir: PathBuf,
    /// Directory of the multi-sine templates
    pub template_dir: PathBuf,
    /// Sequence index embedded in template file names
    pub template_index: usize,
    /// Correction table file
    pub correction_table: PathBuf,
    /// Sequence run for EIS
    pub eis_sequence: String,
    /// Sequence measuring the open-circuit potential
    pub ocp_sequence: String,
    /// Run time of the OCP sequence (s)
    pub ocp_duration_s: f64,
    /// Pause after each inbox write (s)
    pub command_dwell_s: f64,
    /// Outbox polling period (s)
    pub reader_interval_s: f64,
    /// Period of the `Query` status poll during a run (s)
    pub query_interval_s: f64,
    /// Wait for ordinary replies (s)
    pub reply_timeout_s: f64,
    /// Wait for `Reply_Export` (s)
    pub export_timeout_s: f64,
    /// Extra time allowed beyond the nominal measurement duration (s)
    pub completion_margin_s: f64,
    /// Reference resistor used for waveform calibration (Ω)
    pub reference_ohms: f64,
    /// Capacitor in parallel with the reference resistor (F)
    pub reference_capacitance: f64,
}

impl Default for PotentiostatConfig {
    fn default() -> Self {
        let root = std::env::temp_dir().join("secm");
        Self {
            inbox: root.join("vendor").join("inbox.txt"),
            outbox: root.join("vendor").join("outbox.txt"),
            data_dir: root.join("data"),
            template_dir: root.join("templates"),
            template_index: 1,
            correction_table: root.join("corrections.json"),
            eis_sequence: "EIS".to_string(),
            ocp_sequence: "OCP".to_string(),
            ocp_duration_s: 1.0,
            command_dwell_s: 0.1,
            reader_interval_s: 0.02,
            query_interval_s: 0.5,
            reply_timeout_s: 5.0,
            export_timeout_s: 30.0,
            completion_margin_s: 3.0,
            reference_ohms: 10e6,
            reference_capacitance: 4.7e-12,
        }
    }
}

pub(crate) fn secs(s: f64) -> Result<Duration, PotentiostatError> {
    crate::config_secs(s, 0.0).map_err(|e| {
        PotentiostatError::InvalidParameters(format!("{} s is not a usable duration: {}", s, e))
    })
}

impl PotentiostatConfig {
    /// Inbox dwell.
    pub fn command_dwell(&self) -> Result<Duration, PotentiostatError> {
        secs(self.command_dwell_s)
    }

    /// Outbox polling period.
    pub fn reader_interval(&self) -> Result<Duration, PotentiostatError> {
        secs(self.reader_interval_s)
    }

    /// Status poll period.
    pub fn query_interval(&self) -> Result<Duration, PotentiostatError> {
        secs(self.query_interval_s)
    }

    /// Ordinary reply wait.
    pub fn reply_timeout(&self) -> Result<Duration, PotentiostatError> {
        secs(self.reply_timeout_s)
    }

    /// Export reply wait.
    pub fn export_timeout(&self) -> Result<Duration, PotentiostatError> {
        secs(self.export_timeout_s)
    }

    /// Longest a measurement of nominal length `duration_s` may take.
    pub fn run_deadline(&self, duration_s: f64) -> Result<Duration, PotentiostatError> {
        secs(duration_s + self.completion_margin_s)
    }
}
