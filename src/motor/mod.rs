//! # Coarse stepper
//!
//! A USB-HID picomotor controller moves the sample macroscopically when
//! the surface lies beyond the piezo's Z travel. Commands are short ASCII
//! strings (see [`MotorCommand`]) terminated by `\r`; only the version
//! query is answered, which doubles as the connection health check.

mod command;
mod error;

#[cfg(test)]
mod tests;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::lock;
use crate::master::ControlFlags;
use crate::transport::{find_hidraw, open_hidraw, read_until, BoxedTransport};

pub use command::MotorCommand;
pub use error::MotorError;

/// Most controllers enumerated by [`discover`].
pub const MAX_MOTORS: usize = 2;

/// Coarse stepper settings, normally the `[motor]` table of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    /// USB vendor id
    pub vendor_id: u16,
    /// USB product id
    pub product_id: u16,
    /// Driver moved by [`CoarseMotor::step`]
    pub axis: u8,
    /// Driver moved by [`CoarseMotor::step_y`]
    pub y_axis: u8,
    /// Steps per micrometer of travel
    pub steps_per_um: f64,
    /// Wait for a reply (s)
    pub reply_timeout_s: f64,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            vendor_id: 0x104d,
            product_id: 0x4000,
            axis: 1,
            y_axis: 2,
            steps_per_um: 1.0 / 0.03,
            reply_timeout_s: 1.0,
        }
    }
}

fn reply_timeout(config: &MotorConfig) -> Result<Duration, MotorError> {
    crate::config_secs(config.reply_timeout_s, 0.0).map_err(|e| {
        MotorError::InvalidParameters(format!("reply timeout {} s: {}", config.reply_timeout_s, e))
    })
}

/// One picomotor controller.
pub struct CoarseMotor {
    config: MotorConfig,
    name: String,
    port: Mutex<Option<BoxedTransport>>,
}

impl CoarseMotor {
    /// Open the hidraw node at `path`.
    pub fn open(config: MotorConfig, path: &Path) -> Result<Self, MotorError> {
        let port = open_hidraw(path)
            .map_err(|e| MotorError::DeviceUnavailable(format!("{}: {}", path.display(), e)))?;
        Ok(Self::with_transport(config, &path.display().to_string(), Some(port)))
    }

    /// Motor over an already opened transport; `None` drops every command.
    pub fn with_transport(config: MotorConfig, name: &str, port: Option<BoxedTransport>) -> Self {
        Self {
            config,
            name: name.to_string(),
            port: Mutex::new(port),
        }
    }

    /// Device name for logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send one command; returns the reply when the command has one.
    pub fn send(&self, command: MotorCommand) -> Result<Option<String>, MotorError> {
        let mut port = lock(&self.port);
        let Some(port) = port.as_mut() else {
            debug!("{}: no device, dropping '{}'", self.name, command);
            return Ok(None);
        };
        let timeout = reply_timeout(&self.config)?;
        write!(port, "{}\r", command)?;
        port.flush()?;
        if !command.expects_reply() {
            return Ok(None);
        }
        let reply = read_until(port.as_mut(), b'\n', timeout)?;
        Ok(Some(String::from_utf8_lossy(&reply).trim().to_string()))
    }

    /// Relative move of the main driver.
    pub fn step(&self, steps: i64) -> Result<(), MotorError> {
        self.send(MotorCommand::Relative {
            axis: self.config.axis,
            steps,
        })?;
        Ok(())
    }

    /// Relative move of the Y driver.
    pub fn step_y(&self, steps: i64) -> Result<(), MotorError> {
        self.send(MotorCommand::Relative {
            axis: self.config.y_axis,
            steps,
        })?;
        Ok(())
    }

    /// Stop all motion.
    pub fn halt(&self) -> Result<(), MotorError> {
        self.send(MotorCommand::Abort)?;
        Ok(())
    }

    /// Move the main driver by `distance` micrometers; returns the steps
    /// issued.
    pub fn move_micrometers(&self, distance: f64) -> Result<i64, MotorError> {
        let steps = (distance * self.config.steps_per_um).round() as i64;
        self.step(steps)?;
        debug!("{}: {} µm -> {} steps", self.name, distance, steps);
        Ok(steps)
    }

    /// Move the Y driver by `distance` micrometers; returns the steps issued.
    pub fn move_y_micrometers(&self, distance: f64) -> Result<i64, MotorError> {
        let steps = (distance * self.config.steps_per_um).round() as i64;
        self.step_y(steps)?;
        debug!("{}: {} µm -> {} steps", self.name, distance, steps);
        Ok(steps)
    }

    /// Firmware version string.
    pub fn version(&self) -> Result<String, MotorError> {
        Ok(self.send(MotorCommand::Version)?.unwrap_or_default())
    }

    /// Release the device.
    pub fn close(&self) {
        lock(&self.port).take();
    }
}

/// Open up to [`MAX_MOTORS`] controllers matching the configured USB ids.
///
/// Devices that fail to open or do not answer the version query are
/// skipped. Finding none is an error unless test mode is on.
pub fn discover(config: &MotorConfig, flags: &ControlFlags) -> Result<Vec<CoarseMotor>, MotorError> {
    let paths: Vec<PathBuf> = find_hidraw(config.vendor_id, config.product_id).unwrap_or_else(|e| {
        warn!("hidraw enumeration failed: {}", e);
        Vec::new()
    });

    let mut motors = Vec::new();
    for path in paths {
        if motors.len() == MAX_MOTORS {
            break;
        }
        let motor = match CoarseMotor::open(config.clone(), &path) {
            Ok(motor) => motor,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };
        match motor.version() {
            Ok(version) => {
                info!("coarse motor at {}: {}", path.display(), version);
                motors.push(motor);
            }
            Err(e) => warn!("{} did not answer the version query: {}", path.display(), e),
        }
    }

    if motors.is_empty() && !flags.test_mode() {
        return Err(MotorError::DeviceUnavailable(format!(
            "no controller with id {:04x}:{:04x}",
            config.vendor_id, config.product_id
        )));
    }
    Ok(motors)
}
