//! TOML configuration file describing the workstation.
//!
//! Hardware settings live in one table per instrument; the measurement
//! parameters a front end would normally collect go in `[parameters]`:
//!
//! ```toml
//! # secm.toml
//! test_mode = false
//!
//! [piezo.serial]
//! port = "/dev/ttyUSB0"
//!
//! [potentiostat]
//! inbox = "C:/Vendor/E9Batch.Input"
//!
//! [parameters.approach]
//! cutoff = 5
//!
//! [parameters.hopping]
//! length = 30
//! z_ceiling = 80
//! n_points = 3
//! kind = "cv"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use secm::adc::AdcConfig;
use secm::boundary::MapParameters;
use secm::feedback::FeedbackConfig;
use secm::master::MasterConfig;
use secm::motor::MotorConfig;
use secm::piezo::PiezoConfig;
use secm::potentiostat::PotentiostatConfig;

/// Root configuration structure for secm.toml files.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tolerate missing hardware.
    pub test_mode: bool,
    /// Piezo stage.
    pub piezo: PiezoConfig,
    /// Current ADC.
    pub adc: AdcConfig,
    /// Coarse stepper.
    pub motor: MotorConfig,
    /// Potentiostat file protocol.
    pub potentiostat: PotentiostatConfig,
    /// Approaches and scans.
    pub feedback: FeedbackConfig,
    /// Lifecycle supervisor.
    pub master: MasterConfig,
    /// Measurement parameters, dotted keys by nesting.
    pub parameters: toml::Table,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// Measurement parameters as a provider.
    pub fn parameters(&self) -> MapParameters {
        MapParameters::from_toml(&self.parameters)
    }
}
