use serde::{Deserialize, Serialize};

use crate::transport::SerialSettings;

/// Linear correction between external coordinates and the values the
/// controller expects on one axis.
///
/// `forward(v) = (m(v) + offset) · range / (max + offset)` where
/// `m(v) = range − v` on a mirrored axis and `m(v) = v` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisCorrection {
    /// Offset added before scaling (µm)
    pub offset: f64,
    /// Reading of the uncorrected axis at full travel (µm)
    pub max: f64,
    /// Nominal travel (µm)
    pub range: f64,
    /// Whether the axis runs opposite to the external frame
    pub mirror: bool,
}

impl Default for AxisCorrection {
    fn default() -> Self {
        Self::identity(80.0)
    }
}

impl AxisCorrection {
    /// No correction over `range`.
    pub fn identity(range: f64) -> Self {
        Self {
            offset: 0.0,
            max: range,
            range,
            mirror: false,
        }
    }

    /// External coordinate to controller value.
    pub fn forward(&self, v: f64) -> f64 {
        let m = if self.mirror { self.range - v } else { v };
        (m + self.offset) * self.range / (self.max + self.offset)
    }

    /// Controller value to external coordinate.
    pub fn inverse(&self, d: f64) -> f64 {
        let m = d * (self.max + self.offset) / self.range - self.offset;
        if self.mirror {
            self.range - m
        } else {
            m
        }
    }
}

/// Piezo stage settings, normally the `[piezo]` table of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PiezoConfig {
    /// Serial line
    pub serial: SerialSettings,
    /// X axis correction
    pub x: AxisCorrection,
    /// Y axis correction
    pub y: AxisCorrection,
    /// Z axis correction
    pub z: AxisCorrection,
    /// Highest reachable Z (µm)
    pub max_height: f64,
    /// Period of the position monitor (s)
    pub monitor_interval_s: f64,
    /// Pause after every approach step (s)
    pub approach_dwell_s: f64,
    /// Upward step of a retract (µm)
    pub retract_step: f64,
    /// Pause after every retract step (s)
    pub retract_dwell_s: f64,
    /// Wait for a `measure` readout (s)
    pub readout_timeout_s: f64,
}

impl Default for PiezoConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings {
                baud: 19_200,
                xonxoff: true,
                read_timeout_s: 0.5,
                ..SerialSettings::default()
            },
            x: AxisCorrection {
                offset: 1.742,
                max: 82.090,
                range: 80.0,
                mirror: true,
            },
            y: AxisCorrection::identity(80.0),
            z: AxisCorrection::identity(80.0),
            max_height: 80.0,
            monitor_interval_s: 0.5,
            approach_dwell_s: 0.002,
            retract_step: 0.5,
            retract_dwell_s: 0.005,
            readout_timeout_s: 1.0,
        }
    }
}
