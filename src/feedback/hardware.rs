//! Hardware seams of the feedback loops.
//!
//! The controller only sees these traits, so approaches and scans can run
//! against simulated instruments.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::warn;

use crate::adc::Adc;
use crate::experiment::{Location, Point, ScanPoint};
use crate::motor::CoarseMotor;
use crate::piezo::{ApproachStop, Piezo};
use crate::potentiostat::{CvParameters, EisParameters, ExportFormat, Potentiostat, Status};

use super::error::FeedbackError;

/// Fine XYZ positioning.
pub trait Positioner: Send + Sync {
    /// Last known position (µm).
    fn position(&self) -> Location;

    /// Move all three axes.
    fn goto(&self, x: f64, y: f64, z: f64) -> Result<(), FeedbackError>;

    /// Lower Z in `step_size` increments until floor, halt or abort.
    fn approach(&self, step_size: f64) -> Result<ApproachStop, FeedbackError>;

    /// Raise Z to `height`, or by `height` when `relative`.
    fn retract(&self, height: f64, relative: bool) -> Result<ApproachStop, FeedbackError>;

    /// Stop the running approach or retract.
    fn halt(&self);

    /// Number of approach/retract loops that have ended.
    fn motion_count(&self) -> u64;

    /// Highest reachable Z (µm).
    fn max_height(&self) -> f64;

    /// Start the background position monitor.
    fn start_monitor(&self) -> Result<(), FeedbackError>;

    /// Stop the background position monitor.
    fn stop_monitor(&self);

    /// Scan traversal anchored at the scan origin.
    fn scan_coords(
        &self,
        length: f64,
        n_points: usize,
        mask: Option<&[Vec<bool>]>,
    ) -> Result<Vec<ScanPoint>, FeedbackError>;
}

/// Live current stream.
pub trait CurrentSampler: Send + Sync {
    /// Program the sample rate; returns the rate achieved.
    fn set_sample_rate(&self, freq: f64) -> Result<f64, FeedbackError>;

    /// Stream in the background until `timeout` or [`CurrentSampler::stop_polling`].
    fn start_polling(self: Arc<Self>, timeout: Duration) -> Result<JoinHandle<()>, FeedbackError>;

    /// Ask the running stream to finish.
    fn stop_polling(&self);

    /// The last `n` currents (A).
    fn last_currents(&self, n: usize) -> Vec<f64>;

    /// Mean current (A) over the last `window` seconds.
    fn mean_current(&self, window: f64) -> Option<f64>;
}

/// Electrochemical measurements at the probe position.
pub trait Electrochemistry: Send + Sync {
    /// Whether no measurement is running.
    fn is_idle(&self) -> bool;

    /// Zero offsets and capacitance, measure OCP, reapply the hold potential.
    fn zero_offsets(&self) -> Result<(), FeedbackError>;

    /// Undo measurement-specific amplifier overrides.
    fn reset_amplifier(&self) -> Result<(), FeedbackError>;

    /// Store CV parameters.
    fn setup_cv(&self, params: &CvParameters) -> Result<(), FeedbackError>;

    /// Store EIS parameters; returns the applied frequencies.
    fn setup_eis(&self, params: &EisParameters) -> Result<Vec<f64>, FeedbackError>;

    /// Run the stored CV.
    fn measure_cv(&self, loc: Location, format: ExportFormat) -> Result<Point, FeedbackError>;

    /// Run the stored EIS.
    fn measure_eis(&self, loc: Location, format: ExportFormat) -> Result<Point, FeedbackError>;

    /// Run a stored vendor sequence.
    fn measure_custom(
        &self,
        sequence: &str,
        duration_s: f64,
        loc: Location,
        format: ExportFormat,
    ) -> Result<Point, FeedbackError>;

    /// Stop the running measurement.
    fn abort(&self) -> Result<(), FeedbackError>;
}

/// Long-travel Z stepper.
pub trait CoarsePositioner: Send + Sync {
    /// Move toward the sample by `distance` micrometers.
    fn advance(&self, distance: f64) -> Result<(), FeedbackError>;

    /// Stop all motion.
    fn halt(&self) -> Result<(), FeedbackError>;
}

impl Positioner for Piezo {
    fn position(&self) -> Location {
        Piezo::position(self)
    }

    fn goto(&self, x: f64, y: f64, z: f64) -> Result<(), FeedbackError> {
        Ok(Piezo::goto(self, x, y, z)?)
    }

    fn approach(&self, step_size: f64) -> Result<ApproachStop, FeedbackError> {
        Ok(Piezo::approach(self, step_size)?)
    }

    fn retract(&self, height: f64, relative: bool) -> Result<ApproachStop, FeedbackError> {
        Ok(Piezo::retract(self, height, relative)?)
    }

    fn halt(&self) {
        Piezo::halt(self)
    }

    fn motion_count(&self) -> u64 {
        Piezo::motion_count(self)
    }

    fn max_height(&self) -> f64 {
        self.config().max_height
    }

    fn start_monitor(&self) -> Result<(), FeedbackError> {
        Ok(Piezo::start_monitor(self)?)
    }

    fn stop_monitor(&self) {
        Piezo::stop_monitor(self)
    }

    fn scan_coords(
        &self,
        length: f64,
        n_points: usize,
        mask: Option<&[Vec<bool>]>,
    ) -> Result<Vec<ScanPoint>, FeedbackError> {
        Ok(self.get_xy_coords(length, n_points, mask)?)
    }
}

impl CurrentSampler for Adc {
    fn set_sample_rate(&self, freq: f64) -> Result<f64, FeedbackError> {
        Ok(Adc::set_sample_rate(self, freq)?)
    }

    fn start_polling(self: Arc<Self>, timeout: Duration) -> Result<JoinHandle<()>, FeedbackError> {
        let handle = thread::Builder::new()
            .name("approach-adc".to_string())
            .spawn(move || {
                if let Err(e) = self.poll(timeout, None) {
                    warn!("ADC capture during approach failed: {}", e);
                }
            })?;
        Ok(handle)
    }

    fn stop_polling(&self) {
        Adc::stop_polling(self)
    }

    fn last_currents(&self, n: usize) -> Vec<f64> {
        Adc::last_currents(self, n)
    }

    fn mean_current(&self, window: f64) -> Option<f64> {
        Adc::mean_current(self, window)
    }
}

impl Electrochemistry for Potentiostat {
    fn is_idle(&self) -> bool {
        self.status() == Status::Idle
    }

    fn zero_offsets(&self) -> Result<(), FeedbackError> {
        Ok(Potentiostat::zero_offsets(self)?)
    }

    fn reset_amplifier(&self) -> Result<(), FeedbackError> {
        Ok(Potentiostat::reset_amplifier(self)?)
    }

    fn setup_cv(&self, params: &CvParameters) -> Result<(), FeedbackError> {
        Ok(Potentiostat::setup_cv(self, params)?)
    }

    fn setup_eis(&self, params: &EisParameters) -> Result<Vec<f64>, FeedbackError> {
        Ok(Potentiostat::setup_eis(self, params)?)
    }

    fn measure_cv(&self, loc: Location, format: ExportFormat) -> Result<Point, FeedbackError> {
        Ok(Potentiostat::measure_cv(self, loc, format)?)
    }

    fn measure_eis(&self, loc: Location, format: ExportFormat) -> Result<Point, FeedbackError> {
        Ok(Potentiostat::measure_eis(self, loc, format)?)
    }

    fn measure_custom(
        &self,
        sequence: &str,
        duration_s: f64,
        loc: Location,
        format: ExportFormat,
    ) -> Result<Point, FeedbackError> {
        Ok(Potentiostat::measure_custom(self, sequence, duration_s, loc, format)?)
    }

    fn abort(&self) -> Result<(), FeedbackError> {
        Ok(Potentiostat::abort(self)?)
    }
}

impl CoarsePositioner for CoarseMotor {
    fn advance(&self, distance: f64) -> Result<(), FeedbackError> {
        self.move_micrometers(distance)?;
        Ok(())
    }

    fn halt(&self) -> Result<(), FeedbackError> {
        Ok(CoarseMotor::halt(self)?)
    }
}
