//! # Feedback control
//!
//! Current-controlled approaches and hopping-mode scans, built on the
//! hardware seams in [`Positioner`], [`CurrentSampler`],
//! [`Electrochemistry`] and [`CoarsePositioner`].
//!
//! ## Single approach
//!
//! ```text
//! stop monitor -> ADC at 1 kHz -> [baseline over 800 ms]
//!   -> piezo approach on its own thread
//!   -> loop: abort? | piezo stopped itself? | |I - baseline| > cutoff?
//!   -> halt, stop ADC, restart monitor
//! ```
//!
//! ## Hopping scan
//!
//! Every pixel of the snake traversal is retracted to, approached and
//! measured with the configured [`ExperimentKind`] chain. A pixel whose
//! measurement fails is skipped; a failed approach ends the scan. The
//! experiment is saved after every pixel and when the scan stops early.

mod error;
mod hardware;
mod params;

#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::boundary::EventSink;
use crate::error::ErrorKind;
use crate::experiment::{
    estimate_formal_potential, Composite, Experiment, Location, Point, ScanPoint,
};
use crate::master::ControlFlags;
use crate::piezo::ApproachStop;
use crate::potentiostat::ExportFormat;

pub use error::FeedbackError;
pub use hardware::{CoarsePositioner, CurrentSampler, Electrochemistry, Positioner};
pub use params::{ApproachParameters, ExperimentKind, HoppingParameters, ScanRequest};

/// Amplitudes of the EIS series after a CV (mV).
pub const EIS_AMPLITUDES_MV: [f64; 5] = [10.0, 20.0, 50.0, 100.0, 200.0];

/// Approach and scan settings, normally the `[feedback]` table of the
/// config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Height commanded before an automatic approach (µm)
    pub safe_height: f64,
    /// ADC rate while approaching (Hz)
    pub approach_sample_rate: f64,
    /// Window averaged for the relative baseline (s)
    pub baseline_window_s: f64,
    /// Trailing samples checked against the cutoff
    pub detection_samples: usize,
    /// Upper bound on the ADC stream of one approach (s)
    pub approach_timeout_s: f64,
    /// Sleep of the detection loop (s)
    pub loop_interval_s: f64,
    /// Coarse travel between fine approaches (µm)
    pub coarse_advance_um: f64,
    /// Coarse advances before the automatic approach gives up
    pub max_coarse_advances: usize,
    /// Pause on the surface before the reference CV (s)
    pub settle_s: f64,
    /// Retract after an automatic approach (µm)
    pub post_approach_retract_um: f64,
    /// Retract between scan pixels (µm)
    pub hop_retract_um: f64,
    /// XY the probe is parked at after a scan (µm)
    pub rest_position: (f64, f64),
    /// EIS runs of the wait chain
    pub eis_repeats: usize,
    /// Pause between the EIS runs of the wait chain (s)
    pub eis_wait_s: f64,
    /// Directory scans are saved to; the system temp directory when unset
    pub save_dir: Option<PathBuf>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            safe_height: 80.0,
            approach_sample_rate: 1000.0,
            baseline_window_s: 0.8,
            detection_samples: 10,
            approach_timeout_s: 600.0,
            loop_interval_s: 0.001,
            coarse_advance_um: 60.0,
            max_coarse_advances: 50,
            settle_s: 0.5,
            post_approach_retract_um: 10.0,
            hop_retract_um: 6.0,
            rest_position: (0.0, 0.0),
            eis_repeats: EIS_AMPLITUDES_MV.len(),
            eis_wait_s: 5.0,
            save_dir: None,
        }
    }
}

/// Seconds from the config as a [`Duration`]; negative values clamp to zero.
fn secs(value: f64) -> Result<Duration, FeedbackError> {
    crate::config_secs(value, 0.0).map_err(|e| {
        FeedbackError::InvalidParameters(format!("{} s is not a usable duration: {}", value, e))
    })
}

/// Surface criterion: any of the trailing samples deviating from the
/// baseline by more than the cutoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceDetector {
    cutoff: f64,
    baseline: f64,
    window: usize,
}

impl SurfaceDetector {
    /// Detector for `cutoff_pa` around `baseline` (A), looking at the last
    /// `window` samples.
    pub fn new(cutoff_pa: f64, baseline: f64, window: usize) -> Self {
        Self {
            cutoff: cutoff_pa * 1e-12,
            baseline,
            window: window.max(1),
        }
    }

    /// Number of trailing samples inspected.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Whether `currents` (A, oldest first) show the surface.
    pub fn triggered(&self, currents: &[f64]) -> bool {
        let start = currents.len().saturating_sub(self.window);
        currents[start..]
            .iter()
            .any(|i| (i - self.baseline).abs() > self.cutoff)
    }
}

/// Time-remaining estimate from the last ten point durations.
#[derive(Debug, Clone, Default)]
pub struct ProgressEstimator {
    recent: VecDeque<Duration>,
}

impl ProgressEstimator {
    const WINDOW: usize = 10;

    /// Empty estimator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the duration of one finished point.
    pub fn record(&mut self, elapsed: Duration) {
        if self.recent.len() == Self::WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(elapsed);
    }

    /// Rolling mean point duration.
    pub fn mean(&self) -> Option<Duration> {
        if self.recent.is_empty() {
            return None;
        }
        Some(self.recent.iter().sum::<Duration>() / self.recent.len() as u32)
    }

    /// Estimated time for `points_left` more points.
    pub fn remaining(&self, points_left: usize) -> Option<Duration> {
        self.mean().map(|m| m * points_left as u32)
    }
}

/// Outcome of an approach.
#[derive(Debug, Clone, PartialEq)]
pub struct ApproachOutcome {
    /// Probe height when the approach ended (µm)
    pub z: f64,
    /// Whether the current criterion fired
    pub on_surface: bool,
    /// CV recorded on the surface by [`FeedbackController::automatic_approach`]
    pub reference: Option<Point>,
}

/// Runs approaches and scans against the attached instruments.
pub struct FeedbackController {
    config: FeedbackConfig,
    flags: ControlFlags,
    positioner: Arc<dyn Positioner>,
    sampler: Arc<dyn CurrentSampler>,
    echem: Arc<dyn Electrochemistry>,
    coarse: Option<Arc<dyn CoarsePositioner>>,
    sink: Arc<dyn EventSink>,
}

impl FeedbackController {
    /// Controller over the given instruments.
    pub fn new(
        config: FeedbackConfig,
        flags: ControlFlags,
        positioner: Arc<dyn Positioner>,
        sampler: Arc<dyn CurrentSampler>,
        echem: Arc<dyn Electrochemistry>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            flags,
            positioner,
            sampler,
            echem,
            coarse: None,
            sink,
        }
    }

    /// Attach the coarse stepper used by [`FeedbackController::automatic_approach`].
    pub fn with_coarse(mut self, coarse: Arc<dyn CoarsePositioner>) -> Self {
        self.coarse = Some(coarse);
        self
    }

    /// Controller settings.
    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    fn check_abort(&self) -> Result<(), FeedbackError> {
        if self.flags.is_aborted() {
            Err(FeedbackError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Sleep `duration` in short slices, returning early on abort.
    fn pause(&self, duration: Duration) -> Result<(), FeedbackError> {
        let end = Instant::now() + duration;
        loop {
            self.check_abort()?;
            let now = Instant::now();
            if now >= end {
                return Ok(());
            }
            thread::sleep((end - now).min(Duration::from_millis(20)));
        }
    }

    /// Lower the probe until the current crosses the cutoff or the piezo
    /// reaches the end of its travel.
    pub fn single_approach(&self, params: &ApproachParameters) -> Result<ApproachOutcome, FeedbackError> {
        params.validate()?;
        self.check_abort()?;
        self.positioner.stop_monitor();

        let result = self.approach_with_monitor_stopped(params);

        if let Err(e) = self.positioner.start_monitor() {
            warn!("could not restart the position monitor: {}", e);
        }
        result
    }

    fn approach_with_monitor_stopped(
        &self,
        params: &ApproachParameters,
    ) -> Result<ApproachOutcome, FeedbackError> {
        if params.start.is_some() || params.height.is_some() {
            let here = self.positioner.position();
            let (x, y) = params.start.unwrap_or((here.x, here.y));
            self.positioner.goto(x, y, params.height.unwrap_or(here.z))?;
        }

        self.sampler.set_sample_rate(self.config.approach_sample_rate)?;
        let timeout = secs(self.config.approach_timeout_s)?;
        let poller = Arc::clone(&self.sampler).start_polling(timeout)?;

        let result = self.watch_approach(params);

        self.sampler.stop_polling();
        if poller.join().is_err() {
            warn!("approach ADC thread panicked");
        }
        result
    }

    fn watch_approach(&self, params: &ApproachParameters) -> Result<ApproachOutcome, FeedbackError> {
        let baseline = if params.relative {
            self.pause(secs(self.config.baseline_window_s)?)?;
            self.sampler
                .mean_current(self.config.baseline_window_s)
                .unwrap_or(0.0)
        } else {
            0.0
        };
        let detector = SurfaceDetector::new(params.cutoff_pa, baseline, self.config.detection_samples);
        debug!(
            "approach: cutoff {} pA around {:.3e} A, step {} µm",
            params.cutoff_pa, baseline, params.step_size
        );

        let motions = self.positioner.motion_count();
        let positioner = Arc::clone(&self.positioner);
        let step = params.step_size;
        let mover = thread::Builder::new()
            .name("piezo-approach".to_string())
            .spawn(move || positioner.approach(step))?;

        let interval = secs(self.config.loop_interval_s)?;
        let mut on_surface = false;
        let mut aborted = false;
        loop {
            if self.flags.is_aborted() {
                self.positioner.halt();
                aborted = true;
                break;
            }
            if self.positioner.motion_count() != motions {
                break;
            }
            if detector.triggered(&self.sampler.last_currents(detector.window())) {
                self.positioner.halt();
                on_surface = true;
                break;
            }
            thread::sleep(interval);
        }

        let stop = match mover.join() {
            Ok(result) => result?,
            Err(_) => {
                return Err(FeedbackError::SurfaceNotFound(
                    "piezo approach thread panicked".to_string(),
                ))
            }
        };
        if aborted || stop == ApproachStop::Aborted {
            return Err(FeedbackError::Aborted);
        }

        let z = self.positioner.position().z;
        if on_surface {
            info!("surface found at z = {:.3} µm", z);
        } else {
            info!("approach ended without contact at z = {:.3} µm ({:?})", z, stop);
        }
        Ok(ApproachOutcome {
            z,
            on_surface,
            reference: None,
        })
    }

    /// Coarse and fine approach from a safe height.
    ///
    /// Offsets are zeroed first. Between fine approaches that miss the
    /// surface the coarse stepper advances. On contact a reference CV is
    /// recorded (when CV parameters are set up) and the probe retracts.
    pub fn automatic_approach(&self, params: &ApproachParameters) -> Result<ApproachOutcome, FeedbackError> {
        params.validate()?;
        self.positioner.retract(self.config.safe_height, false)?;
        self.echem.zero_offsets()?;

        let fine = ApproachParameters {
            height: None,
            start: None,
            ..params.clone()
        };
        let mut advances = 0;
        let mut outcome = loop {
            self.check_abort()?;
            let outcome = self.single_approach(&fine)?;
            if outcome.on_surface {
                break outcome;
            }
            let Some(coarse) = &self.coarse else {
                return Err(FeedbackError::SurfaceNotFound(
                    "fine travel exhausted and no coarse stepper attached".to_string(),
                ));
            };
            if advances >= self.config.max_coarse_advances {
                return Err(FeedbackError::SurfaceNotFound(format!(
                    "no contact after {} coarse advances",
                    advances
                )));
            }
            self.positioner.retract(self.config.safe_height, false)?;
            coarse.advance(self.config.coarse_advance_um)?;
            advances += 1;
            self.sink.log(
                &format!("coarse advance {} ({} µm)", advances, self.config.coarse_advance_um),
                true,
            );
        };

        self.pause(secs(self.config.settle_s)?)?;
        match self.echem.measure_cv(self.positioner.position(), ExportFormat::Ascii) {
            Ok(point) => outcome.reference = Some(point),
            Err(e) if e.kind() == ErrorKind::Aborted => return Err(e),
            Err(e) => warn!("reference CV after approach failed: {}", e),
        }

        self.positioner.stop_monitor();
        let retract = self
            .positioner
            .retract(self.config.post_approach_retract_um, true);
        self.positioner.start_monitor()?;
        retract?;
        self.sink.log(
            &format!("approach finished at z = {:.3} µm", outcome.z),
            false,
        );
        Ok(outcome)
    }

    /// Hopping-mode scan over the requested grid.
    ///
    /// Returns the experiment; on abort or a failed approach the partial
    /// experiment is saved and the error returned.
    pub fn hopping_scan(&self, request: &ScanRequest) -> Result<Experiment, FeedbackError> {
        request.validate()?;
        let hopping = &request.hopping;
        self.prepare_chain(request)?;

        let plan = self.positioner.scan_coords(
            hopping.length,
            hopping.n_points,
            hopping.mask.as_deref(),
        )?;
        let mut experiment = Experiment::new(hopping.length, hopping.n_points, &plan)?;
        experiment.set_settings(request.settings.clone());
        self.sink.notify_point_updated(&experiment);
        info!(
            "hopping scan: {} points over {} µm, '{}'",
            plan.len(),
            hopping.length,
            hopping.kind
        );

        let result = self.scan_points(request, &plan, &mut experiment);
        self.persist(&mut experiment);

        match result {
            Ok(skipped) => {
                self.park()?;
                self.sink.log(
                    &format!(
                        "scan finished: {} of {} points measured",
                        plan.len() - skipped,
                        plan.len()
                    ),
                    false,
                );
                Ok(experiment)
            }
            Err(e) => {
                if let Err(monitor) = self.positioner.start_monitor() {
                    warn!("could not restart the position monitor: {}", monitor);
                }
                self.sink.log(&format!("scan stopped: {}", e), false);
                Err(e)
            }
        }
    }

    /// Set up the potentiostat for the chain; for CV+EIS chains the EIS is
    /// set up first so the approach runs with CV settings active.
    fn prepare_chain(&self, request: &ScanRequest) -> Result<(), FeedbackError> {
        let kind = &request.hopping.kind;
        if let (true, Some(eis)) = (kind.uses_eis(), &request.eis) {
            self.echem.setup_eis(eis)?;
        }
        if let (true, Some(cv)) = (kind.uses_cv(), &request.cv) {
            self.echem.setup_cv(cv)?;
        }
        Ok(())
    }

    /// Measure every planned point; returns the number of skipped points.
    fn scan_points(
        &self,
        request: &ScanRequest,
        plan: &[ScanPoint],
        experiment: &mut Experiment,
    ) -> Result<usize, FeedbackError> {
        let hopping = &request.hopping;
        let approach = ApproachParameters {
            height: None,
            start: None,
            ..request.approach.clone()
        };
        let (first_height, first_relative) = if hopping.z_ceiling < 0.0 {
            (hopping.z_ceiling.abs(), true)
        } else {
            (hopping.z_ceiling, false)
        };
        let hop = if hopping.z_ceiling < 0.0 {
            hopping.z_ceiling.abs()
        } else {
            self.config.hop_retract_um
        };

        self.positioner.retract(first_height, first_relative)?;
        let mut progress = ProgressEstimator::new();
        let mut skipped = 0;

        for (k, point) in plan.iter().enumerate() {
            self.check_abort()?;
            let started = Instant::now();
            if k > 0 {
                self.positioner.retract(hop, true)?;
            }
            let z = self.positioner.position().z;
            self.positioner.goto(point.x, point.y, z)?;

            let outcome = self.single_approach(&approach)?;
            if !outcome.on_surface {
                return Err(FeedbackError::SurfaceNotFound(format!(
                    "no contact at pixel ({}, {})",
                    point.i, point.j
                )));
            }

            let loc = Location::new(point.x, point.y, outcome.z);
            match self.run_chain(&hopping.kind, request, loc) {
                Ok(measured) => {
                    experiment.set_datapoint((point.i, point.j), measured)?;
                    self.sink.notify_point_updated(experiment);
                    self.persist(experiment);
                }
                Err(e) if e.kind() == ErrorKind::Aborted => return Err(e),
                Err(e) if e.kind().is_pixel_recoverable() => {
                    skipped += 1;
                    warn!("skipping pixel ({}, {}): {}", point.i, point.j, e);
                    self.sink.log(
                        &format!("pixel ({}, {}) failed: {}", point.i, point.j, e),
                        true,
                    );
                }
                Err(e) => return Err(e),
            }

            progress.record(started.elapsed());
            self.sink
                .notify_progress(k + 1, plan.len(), progress.remaining(plan.len() - k - 1));
        }
        Ok(skipped)
    }

    /// Run the measurement chain of `kind` at `loc`.
    pub fn run_chain(
        &self,
        kind: &ExperimentKind,
        request: &ScanRequest,
        loc: Location,
    ) -> Result<Point, FeedbackError> {
        let format = ExportFormat::Mat;
        match kind {
            ExperimentKind::Cv => self.echem.measure_cv(loc, format),
            ExperimentKind::Eis => self.echem.measure_eis(loc, format),
            ExperimentKind::Custom {
                sequence,
                duration_s,
            } => self.echem.measure_custom(sequence, *duration_s, loc, format),
            ExperimentKind::CvThenEis
            | ExperimentKind::CvThenEisAmplitudes
            | ExperimentKind::CvThenEisWait => {
                let measured = self.measure_chain(kind, request, loc);
                let reset = self.echem.reset_amplifier();
                match (measured, reset) {
                    (Ok(children), Ok(())) => Ok(Composite::new(loc, children).into()),
                    (Ok(_), Err(e)) => Err(e),
                    (Err(e), reset) => {
                        if let Err(reset) = reset {
                            warn!("amplifier reset after failed chain: {}", reset);
                        }
                        Err(e)
                    }
                }
            }
        }
    }

    /// Members of a CV→EIS chain. The caller resets the amplifier whatever
    /// the outcome.
    fn measure_chain(
        &self,
        kind: &ExperimentKind,
        request: &ScanRequest,
        loc: Location,
    ) -> Result<Vec<Point>, FeedbackError> {
        let format = ExportFormat::Mat;
        let cv = self.echem.measure_cv(loc, format)?;
        let mut children = vec![cv];
        match kind {
            ExperimentKind::CvThenEis => {
                self.eis_at_formal_potential(request, &children[0], None)?;
                self.check_abort()?;
                children.push(self.echem.measure_eis(loc, format)?);
            }
            ExperimentKind::CvThenEisAmplitudes => {
                for amplitude in EIS_AMPLITUDES_MV {
                    self.check_abort()?;
                    self.eis_at_formal_potential(request, &children[0], Some(amplitude))?;
                    children.push(self.echem.measure_eis(loc, format)?);
                }
            }
            ExperimentKind::CvThenEisWait => {
                for k in 0..self.config.eis_repeats {
                    if k > 0 {
                        self.pause(secs(self.config.eis_wait_s)?)?;
                    }
                    self.check_abort()?;
                    children.push(self.echem.measure_eis(loc, format)?);
                }
            }
            _ => {}
        }
        Ok(children)
    }

    /// Re-set up the EIS biased at the formal potential estimated from
    /// `cv`, optionally with another amplitude. The stored bias is kept
    /// when no potential can be estimated.
    fn eis_at_formal_potential(
        &self,
        request: &ScanRequest,
        cv: &Point,
        amplitude_mv: Option<f64>,
    ) -> Result<(), FeedbackError> {
        let Some(mut eis) = request.eis.clone() else {
            return Err(FeedbackError::InvalidParameters(
                "chain needs EIS parameters".to_string(),
            ));
        };
        let e0 = cv
            .echem_data()
            .and_then(|(_, v, i)| estimate_formal_potential(v, i))
            .filter(|e0| *e0 != 0.0);
        if let Some(e0) = e0 {
            debug!("EIS biased at estimated E0 = {:.4} V", e0);
            eis.e0 = e0;
        }
        if let Some(amplitude_mv) = amplitude_mv {
            eis.amplitude_mv = amplitude_mv;
        }
        if e0.is_some() || amplitude_mv.is_some() {
            self.echem.setup_eis(&eis)?;
        }
        Ok(())
    }

    /// Retract fully and move to the rest position.
    fn park(&self) -> Result<(), FeedbackError> {
        self.positioner.retract(self.positioner.max_height(), false)?;
        let (x, y) = self.config.rest_position;
        self.positioner.goto(x, y, self.positioner.max_height())?;
        self.positioner.start_monitor()
    }

    fn persist(&self, experiment: &mut Experiment) {
        let result = match (&self.config.save_dir, experiment.path()) {
            (Some(dir), None) => {
                let name = experiment.default_save_path();
                let file = name.file_name().map(PathBuf::from).unwrap_or_default();
                experiment.save_as(dir.join(file)).map(|_| ())
            }
            _ => experiment.save().map(|_| ()),
        };
        if let Err(e) = result {
            warn!("could not save the experiment: {}", e);
        }
    }
}
