use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::transport::SerialSettings;

/// Static ADC settings, normally the `[adc]` table of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdcConfig {
    /// Serial line
    pub serial: SerialSettings,
    /// Device clock (Hz) the `srate` divisor is taken from
    pub clock_hz: f64,
    /// Per-channel base rate before decimation (Hz)
    pub base_rate: f64,
    /// Channels in the scan list (1 or 2)
    pub channels: usize,
    /// Packet size exponent `k`; packets are `2^(k+4)` bytes
    pub packet_exponent: u32,
    /// Largest primary decimation the device accepts
    pub max_decimation: u32,
    /// Sample rate applied when the port is opened (Hz)
    pub sample_rate: f64,
    /// Volts-to-amps factor of the current monitor channel
    pub gain: f64,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings {
                path: PathBuf::from("/dev/ttyACM0"),
                baud: 115_200,
                xonxoff: false,
                read_timeout_s: 0.05,
            },
            clock_hz: 60_000_000.0,
            base_rate: 5_000.0,
            channels: 2,
            packet_exponent: 1,
            max_decimation: 512,
            sample_rate: 1_000.0,
            gain: 1e-9,
        }
    }
}

/// Decimation pair chosen by [`solve_decimation`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decimation {
    /// Primary decimation (`dec`)
    pub dec: u32,
    /// Secondary multiplier (`deca`), one of 1, 10, 100, 1000
    pub deca: u32,
    /// Resulting rate `channels · base_rate / (dec · deca)`
    pub rate: f64,
}

/// Secondary multipliers tried in order.
pub const DECA_STEPS: [u32; 4] = [1, 10, 100, 1000];

/// Decimation factors giving approximately `freq`.
///
/// The primary factor is kept as large as the device allows before the
/// secondary multiplier is raised. Returns `None` when `freq` is not
/// positive or above the undecimated rate.
pub fn solve_decimation(
    channels: usize,
    base_rate: f64,
    max_decimation: u32,
    freq: f64,
) -> Option<Decimation> {
    let full = channels as f64 * base_rate;
    if !(freq > 0.0) || freq > full {
        return None;
    }
    let total = full / freq;
    DECA_STEPS.iter().find_map(|&deca| {
        let dec = (total / deca as f64).round();
        (dec >= 1.0 && dec <= max_decimation as f64).then(|| {
            let dec = dec as u32;
            Decimation {
                dec,
                deca,
                rate: full / (dec as f64 * deca as f64),
            }
        })
    })
}
