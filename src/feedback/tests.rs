use super::*;
use crate::boundary::MapParameters;
use crate::experiment::{ScanPoint, Voltammogram};
use crate::piezo::snake_coords;
use crate::potentiostat::{CvParameters, EisParameters, PotentiostatError};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::tempdir;

const PA: f64 = 1e-12;
const MAX_Z: f64 = 80.0;

// ---------------------------------------------------------------------------
// Simulated instruments
// ---------------------------------------------------------------------------

/// Stage whose Z moves one step per `step_delay`.
struct SimStage {
    flags: ControlFlags,
    position: Mutex<Location>,
    surface_z: Mutex<f64>,
    halt: AtomicBool,
    motions: AtomicU64,
    monitoring: AtomicBool,
    step_delay: Duration,
    visits: Mutex<Vec<(f64, f64)>>,
}

impl SimStage {
    fn new(flags: &ControlFlags, surface_z: f64) -> Arc<Self> {
        Arc::new(Self {
            flags: flags.clone(),
            position: Mutex::new(Location::new(0.0, 0.0, MAX_Z)),
            surface_z: Mutex::new(surface_z),
            halt: AtomicBool::new(false),
            motions: AtomicU64::new(0),
            monitoring: AtomicBool::new(true),
            step_delay: Duration::from_millis(1),
            visits: Mutex::new(Vec::new()),
        })
    }

    fn z(&self) -> f64 {
        self.position.lock().unwrap().z
    }

    fn touching(&self) -> bool {
        self.z() <= *self.surface_z.lock().unwrap()
    }
}

impl Positioner for SimStage {
    fn position(&self) -> Location {
        *self.position.lock().unwrap()
    }

    fn goto(&self, x: f64, y: f64, z: f64) -> Result<(), FeedbackError> {
        *self.position.lock().unwrap() = Location::new(x, y, z.clamp(0.0, MAX_Z));
        self.visits.lock().unwrap().push((x, y));
        Ok(())
    }

    fn approach(&self, step_size: f64) -> Result<ApproachStop, FeedbackError> {
        self.halt.store(false, Ordering::SeqCst);
        let stop = loop {
            if self.flags.is_aborted() {
                break ApproachStop::Aborted;
            }
            if self.halt.load(Ordering::SeqCst) {
                break ApproachStop::Halted;
            }
            let mut position = self.position.lock().unwrap();
            position.z -= step_size;
            if position.z <= 0.0 {
                position.z = 0.0;
                break ApproachStop::Floor;
            }
            drop(position);
            thread::sleep(self.step_delay);
        };
        self.motions.fetch_add(1, Ordering::SeqCst);
        Ok(stop)
    }

    fn retract(&self, height: f64, relative: bool) -> Result<ApproachStop, FeedbackError> {
        let mut position = self.position.lock().unwrap();
        let target = if relative { position.z + height } else { height };
        position.z = target.clamp(0.0, MAX_Z);
        self.motions.fetch_add(1, Ordering::SeqCst);
        Ok(ApproachStop::Target)
    }

    fn halt(&self) {
        self.halt.store(true, Ordering::SeqCst);
    }

    fn motion_count(&self) -> u64 {
        self.motions.load(Ordering::SeqCst)
    }

    fn max_height(&self) -> f64 {
        MAX_Z
    }

    fn start_monitor(&self) -> Result<(), FeedbackError> {
        self.monitoring.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_monitor(&self) {
        self.monitoring.store(false, Ordering::SeqCst);
    }

    fn scan_coords(
        &self,
        length: f64,
        n_points: usize,
        mask: Option<&[Vec<bool>]>,
    ) -> Result<Vec<ScanPoint>, FeedbackError> {
        Ok(snake_coords((0.0, 0.0), length, n_points, mask)?)
    }
}

/// Current reads 16 pA while the stage touches the surface, 10 pA otherwise.
struct SurfaceCurrent {
    stage: Arc<SimStage>,
}

impl CurrentSampler for SurfaceCurrent {
    fn set_sample_rate(&self, freq: f64) -> Result<f64, FeedbackError> {
        Ok(freq)
    }

    fn start_polling(self: Arc<Self>, _timeout: Duration) -> Result<thread::JoinHandle<()>, FeedbackError> {
        Ok(thread::spawn(|| {}))
    }

    fn stop_polling(&self) {}

    fn last_currents(&self, n: usize) -> Vec<f64> {
        let current = if self.stage.touching() { 16.0 * PA } else { 10.0 * PA };
        vec![current; n]
    }

    fn mean_current(&self, _window: f64) -> Option<f64> {
        Some(10.0 * PA)
    }
}

/// One new sample per read: 10 pA, then 16 pA from `jump_at` on.
struct ScriptedCurrent {
    jump_at: usize,
    samples: AtomicUsize,
}

impl CurrentSampler for ScriptedCurrent {
    fn set_sample_rate(&self, _freq: f64) -> Result<f64, FeedbackError> {
        Ok(1000.0)
    }

    fn start_polling(self: Arc<Self>, _timeout: Duration) -> Result<thread::JoinHandle<()>, FeedbackError> {
        Ok(thread::spawn(|| {}))
    }

    fn stop_polling(&self) {}

    fn last_currents(&self, n: usize) -> Vec<f64> {
        let total = self.samples.fetch_add(1, Ordering::SeqCst) + 1;
        let first = total.saturating_sub(n);
        (first..total)
            .map(|k| if k >= self.jump_at { 16.0 * PA } else { 10.0 * PA })
            .collect()
    }

    fn mean_current(&self, _window: f64) -> Option<f64> {
        Some(10.0 * PA)
    }
}

#[derive(Default)]
struct SimEchem {
    calls: Mutex<Vec<String>>,
    measurements: AtomicUsize,
    fail_at: Option<usize>,
    abort_at: Option<(usize, ControlFlags)>,
}

impl SimEchem {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn measurement(&self, loc: Location) -> Result<Voltammogram, FeedbackError> {
        let n = self.measurements.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(n) {
            return Err(PotentiostatError::MeasurementFailed("vendor stuck".to_string()).into());
        }
        if let Some((at, flags)) = &self.abort_at {
            if *at == n {
                flags.raise_abort();
                return Err(PotentiostatError::Aborted.into());
            }
        }
        Ok(Voltammogram::new(
            loc,
            vec![0.0, 0.1, 0.2, 0.3, 0.4],
            vec![0.0, 0.2, 0.4, 0.2, 0.0],
            vec![0.0, 1e-9, 0.0, -1e-9, 0.0],
        )?)
    }
}

impl Electrochemistry for SimEchem {
    fn is_idle(&self) -> bool {
        true
    }

    fn zero_offsets(&self) -> Result<(), FeedbackError> {
        self.record("zero_offsets".to_string());
        Ok(())
    }

    fn reset_amplifier(&self) -> Result<(), FeedbackError> {
        self.record("reset_amplifier".to_string());
        Ok(())
    }

    fn setup_cv(&self, _params: &CvParameters) -> Result<(), FeedbackError> {
        self.record("setup_cv".to_string());
        Ok(())
    }

    fn setup_eis(&self, params: &EisParameters) -> Result<Vec<f64>, FeedbackError> {
        self.record(format!("setup_eis {} {}", params.e0, params.amplitude_mv));
        Ok(vec![10.0, 30.0])
    }

    fn measure_cv(&self, loc: Location, _format: ExportFormat) -> Result<Point, FeedbackError> {
        self.record("cv".to_string());
        Ok(self.measurement(loc)?.into())
    }

    fn measure_eis(&self, loc: Location, _format: ExportFormat) -> Result<Point, FeedbackError> {
        self.record("eis".to_string());
        let v = self.measurement(loc)?;
        Ok(crate::experiment::Spectrum::new(loc, v.t, v.v, v.i, vec![10.0, 30.0])?.into())
    }

    fn measure_custom(
        &self,
        sequence: &str,
        _duration_s: f64,
        loc: Location,
        _format: ExportFormat,
    ) -> Result<Point, FeedbackError> {
        self.record(format!("custom {}", sequence));
        Ok(self.measurement(loc)?.into())
    }

    fn abort(&self) -> Result<(), FeedbackError> {
        self.record("abort".to_string());
        Ok(())
    }
}

#[derive(Default)]
struct CountingSink {
    updates: AtomicUsize,
    progress: Mutex<Vec<(usize, usize, Option<Duration>)>>,
}

impl EventSink for CountingSink {
    fn notify_point_updated(&self, _experiment: &Experiment) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }

    fn log(&self, _text: &str, _quiet: bool) {}

    fn ask_ok(&self, _prompt: &str) -> bool {
        true
    }

    fn notify_progress(&self, done: usize, total: usize, remaining: Option<Duration>) {
        self.progress.lock().unwrap().push((done, total, remaining));
    }
}

/// Moves the surface toward the probe by the advanced distance.
struct SimCoarse {
    stage: Arc<SimStage>,
    advances: AtomicUsize,
}

impl CoarsePositioner for SimCoarse {
    fn advance(&self, distance: f64) -> Result<(), FeedbackError> {
        *self.stage.surface_z.lock().unwrap() += distance;
        self.advances.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn halt(&self) -> Result<(), FeedbackError> {
        Ok(())
    }
}

fn fast_config() -> FeedbackConfig {
    FeedbackConfig {
        baseline_window_s: 0.01,
        settle_s: 0.0,
        eis_wait_s: 0.01,
        eis_repeats: 3,
        ..Default::default()
    }
}

struct Rig {
    flags: ControlFlags,
    stage: Arc<SimStage>,
    echem: Arc<SimEchem>,
    sink: Arc<CountingSink>,
    controller: FeedbackController,
}

fn rig(config: FeedbackConfig, surface_z: f64, echem: SimEchem, flags: ControlFlags) -> Rig {
    let stage = SimStage::new(&flags, surface_z);
    let sampler = Arc::new(SurfaceCurrent {
        stage: Arc::clone(&stage),
    });
    let echem = Arc::new(echem);
    let sink = Arc::new(CountingSink::default());
    let controller = FeedbackController::new(
        config,
        flags.clone(),
        stage.clone(),
        sampler,
        echem.clone(),
        sink.clone(),
    );
    Rig {
        flags,
        stage,
        echem,
        sink,
        controller,
    }
}

fn approach_params() -> ApproachParameters {
    ApproachParameters {
        step_size: 1.0,
        ..Default::default()
    }
}

fn cv_params() -> CvParameters {
    CvParameters {
        e0: 0.0,
        e1: 0.5,
        e2: -0.5,
        e3: 0.0,
        scan_rate: 0.1,
        quiet_time: 0.0,
    }
}

fn eis_params() -> EisParameters {
    EisParameters {
        e0: 0.0,
        f0: 10.0,
        f1: 1000.0,
        n_pts: 2,
        n_cycles: 1,
        amplitude_mv: 20.0,
        force_waveform: false,
    }
}

fn scan_request(kind: ExperimentKind, n_points: usize) -> ScanRequest {
    ScanRequest {
        hopping: HoppingParameters {
            length: 30.0,
            z_ceiling: 80.0,
            n_points,
            kind,
            mask: None,
        },
        approach: approach_params(),
        cv: Some(cv_params()),
        eis: Some(eis_params()),
        settings: Default::default(),
    }
}

// ---------------------------------------------------------------------------
// Building blocks
// ---------------------------------------------------------------------------

#[test]
fn test_surface_detector_window() {
    let detector = SurfaceDetector::new(5.0, 10.0 * PA, 3);
    assert!(!detector.triggered(&[10.0 * PA; 20]));
    assert!(detector.triggered(&[10.0 * PA, 10.0 * PA, 16.0 * PA]));
    assert!(detector.triggered(&[4.0 * PA]));

    // only the trailing window counts
    let mut old_spike = vec![16.0 * PA];
    old_spike.extend([10.0 * PA; 3]);
    assert!(!detector.triggered(&old_spike));
    assert!(!detector.triggered(&[]));
}

#[test]
fn test_progress_estimator_rolling_mean() {
    let mut progress = ProgressEstimator::new();
    assert_eq!(progress.remaining(3), None);
    for s in 1..=12 {
        progress.record(Duration::from_secs(s));
    }
    assert_eq!(progress.mean(), Some(Duration::from_millis(7500)));
    assert_eq!(progress.remaining(2), Some(Duration::from_secs(15)));
}

#[test]
fn test_experiment_kind_text() {
    for text in ["cv", "eis", "cv+eis", "cv+eis-amplitudes", "cv+eis-wait", "custom:Chrono:2.5"] {
        let kind: ExperimentKind = text.parse().unwrap();
        assert_eq!(kind.to_string(), text);
    }
    assert_eq!("CV+EIS".parse::<ExperimentKind>().unwrap(), ExperimentKind::CvThenEis);
    assert!("custom:x:-1".parse::<ExperimentKind>().is_err());
    assert!("spiral".parse::<ExperimentKind>().is_err());
    assert!(ExperimentKind::CvThenEisWait.uses_cv());
    assert!(!ExperimentKind::Cv.uses_eis());
}

#[test]
fn test_scan_request_from_parameters() {
    let params = MapParameters::new()
        .with("hopping.length", "30")
        .with("hopping.z_ceiling", "80")
        .with("hopping.n_points", "3")
        .with("hopping.kind", "cv")
        .with("approach.cutoff", "5")
        .with("cv.e0", "0")
        .with("cv.e1", "0.5")
        .with("cv.e2", "-0.5")
        .with("cv.e3", "0")
        .with("cv.scan_rate", "0.1");
    let request = ScanRequest::from_parameters(&params).unwrap();
    assert!(request.cv.is_some());
    assert!(request.eis.is_none());
    request.validate().unwrap();
    assert_eq!(request.settings.get("hopping.kind"), Some("cv"));

    let eis_kind = params.clone().with("hopping.kind", "cv+eis");
    assert!(ScanRequest::from_parameters(&eis_kind).is_err());

    let mut missing = request;
    missing.cv = None;
    assert_eq!(missing.validate().unwrap_err().kind(), ErrorKind::InvalidParameters);
}

// ---------------------------------------------------------------------------
// Approaches
// ---------------------------------------------------------------------------

#[test]
fn test_approach_halts_within_ten_samples_of_jump() {
    let flags = ControlFlags::new(true);
    let stage = SimStage::new(&flags, f64::NEG_INFINITY);
    let sampler = Arc::new(ScriptedCurrent {
        jump_at: 873,
        samples: AtomicUsize::new(0),
    });
    let controller = FeedbackController::new(
        FeedbackConfig {
            loop_interval_s: 0.0,
            ..fast_config()
        },
        flags,
        stage.clone(),
        sampler.clone(),
        Arc::new(SimEchem::default()),
        Arc::new(CountingSink::default()),
    );

    let params = ApproachParameters {
        cutoff_pa: 5.0,
        relative: true,
        step_size: 0.01,
        ..Default::default()
    };
    let outcome = controller.single_approach(&params).unwrap();
    assert!(outcome.on_surface);
    let seen = sampler.samples.load(Ordering::SeqCst);
    assert!(seen > 873 && seen - 873 <= 10, "halted after {} samples", seen);
    assert!(stage.halt.load(Ordering::SeqCst));
    assert!(stage.monitoring.load(Ordering::SeqCst));
}

#[test]
fn test_approach_to_floor_reports_no_contact() {
    let r = rig(fast_config(), f64::NEG_INFINITY, SimEchem::default(), ControlFlags::new(true));
    let outcome = r.controller.single_approach(&approach_params()).unwrap();
    assert!(!outcome.on_surface);
    assert_eq!(outcome.z, 0.0);
    assert!(r.stage.monitoring.load(Ordering::SeqCst));
}

#[test]
fn test_approach_moves_to_requested_start() {
    let r = rig(fast_config(), 40.0, SimEchem::default(), ControlFlags::new(true));
    let params = ApproachParameters {
        start: Some((12.0, 34.0)),
        height: Some(50.0),
        ..approach_params()
    };
    let outcome = r.controller.single_approach(&params).unwrap();
    assert!(outcome.on_surface);
    assert!(outcome.z <= 40.0 && outcome.z > 30.0);
    assert_eq!(r.stage.visits.lock().unwrap()[0], (12.0, 34.0));
}

#[test]
fn test_abort_during_approach() {
    let r = rig(fast_config(), f64::NEG_INFINITY, SimEchem::default(), ControlFlags::new(true));
    let flags = r.flags.clone();
    let raiser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        flags.raise_abort();
    });
    let err = r.controller.single_approach(&approach_params()).unwrap_err();
    raiser.join().unwrap();
    assert!(matches!(err, FeedbackError::Aborted));
    assert!(r.stage.monitoring.load(Ordering::SeqCst));
    assert!(r.stage.z() > 0.0);
}

#[test]
fn test_automatic_approach_advances_coarse_stepper() {
    let r = rig(fast_config(), -70.0, SimEchem::default(), ControlFlags::new(true));
    let coarse = Arc::new(SimCoarse {
        stage: Arc::clone(&r.stage),
        advances: AtomicUsize::new(0),
    });
    let controller = FeedbackController::new(
        fast_config(),
        r.flags.clone(),
        r.stage.clone(),
        Arc::new(SurfaceCurrent {
            stage: Arc::clone(&r.stage),
        }),
        r.echem.clone(),
        r.sink.clone(),
    )
    .with_coarse(coarse.clone());

    let outcome = controller.automatic_approach(&approach_params()).unwrap();
    assert_eq!(coarse.advances.load(Ordering::SeqCst), 2);
    assert!(outcome.on_surface);
    assert!(matches!(outcome.reference, Some(Point::Voltammogram(_))));
    assert!((r.stage.z() - (outcome.z + 10.0)).abs() < 1e-9);
    assert_eq!(r.echem.calls()[0], "zero_offsets");
    assert!(r.stage.monitoring.load(Ordering::SeqCst));
}

#[test]
fn test_automatic_approach_without_coarse_stepper_fails() {
    let r = rig(fast_config(), f64::NEG_INFINITY, SimEchem::default(), ControlFlags::new(true));
    let err = r.controller.automatic_approach(&approach_params()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MeasurementFailed);
}

// ---------------------------------------------------------------------------
// Hopping scans
// ---------------------------------------------------------------------------

#[test]
fn test_hopping_scan_visits_snake_order() {
    let dir = tempdir().unwrap();
    let config = FeedbackConfig {
        save_dir: Some(dir.path().to_path_buf()),
        rest_position: (5.0, 5.0),
        ..fast_config()
    };
    let r = rig(config, 5.0, SimEchem::default(), ControlFlags::new(true));

    let experiment = r.controller.hopping_scan(&scan_request(ExperimentKind::Cv, 3)).unwrap();

    let visits = r.stage.visits.lock().unwrap().clone();
    assert_eq!(
        &visits[..9],
        &[
            (0.0, 30.0),
            (15.0, 30.0),
            (30.0, 30.0),
            (30.0, 15.0),
            (15.0, 15.0),
            (0.0, 15.0),
            (0.0, 0.0),
            (15.0, 0.0),
            (30.0, 0.0)
        ]
    );
    assert_eq!(visits[9], (5.0, 5.0));
    assert_eq!(r.stage.z(), MAX_Z);

    assert_eq!(experiment.non_empty_count(), 9);
    assert_eq!(
        experiment.order[..3],
        [[0, 2], [1, 2], [2, 2]]
    );
    for j in 0..3 {
        for i in 0..3 {
            let point = experiment.get_datapoint((i, j)).unwrap();
            assert!(matches!(point, Point::Voltammogram(_)));
        }
    }
    assert_eq!(r.echem.calls().iter().filter(|c| *c == "setup_cv").count(), 1);
    assert!(r.sink.updates.load(Ordering::SeqCst) >= 10);
    let progress = r.sink.progress.lock().unwrap();
    assert_eq!(progress.len(), 9);
    assert_eq!(progress[8].0, 9);
    assert_eq!(progress[8].2, Some(Duration::ZERO));

    let saved: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(saved.len(), 1);
}

#[test]
fn test_failed_pixel_is_skipped() {
    let echem = SimEchem {
        fail_at: Some(4),
        ..Default::default()
    };
    let r = rig(fast_config(), 5.0, echem, ControlFlags::new(true));
    let experiment = r.controller.hopping_scan(&scan_request(ExperimentKind::Cv, 3)).unwrap();
    assert_eq!(experiment.non_empty_count(), 8);
    // fifth visit is the centre pixel
    assert!(experiment.get_datapoint((1, 1)).unwrap().is_empty());
}

#[test]
fn test_abort_mid_scan_persists_partial_grid() {
    let dir = tempdir().unwrap();
    let flags = ControlFlags::new(true);
    let echem = SimEchem {
        abort_at: Some((2, flags.clone())),
        ..Default::default()
    };
    let config = FeedbackConfig {
        save_dir: Some(dir.path().to_path_buf()),
        ..fast_config()
    };
    let r = rig(config, 5.0, echem, flags);

    let err = r.controller.hopping_scan(&scan_request(ExperimentKind::Cv, 3)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Aborted);
    assert!(r.stage.monitoring.load(Ordering::SeqCst));

    let saved = std::fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap().path();
    let loaded = Experiment::load(&saved).unwrap();
    assert_eq!(loaded.non_empty_count(), 2);
}

#[test]
fn test_cv_then_eis_chain() {
    let r = rig(fast_config(), 5.0, SimEchem::default(), ControlFlags::new(true));
    let experiment = r
        .controller
        .hopping_scan(&scan_request(ExperimentKind::CvThenEis, 1))
        .unwrap();

    let calls = r.echem.calls();
    // EIS set up before CV so the approach runs with CV settings
    assert_eq!(&calls[..2], ["setup_eis 0 20", "setup_cv"]);
    assert_eq!(&calls[2..], ["cv", "setup_eis 0.2 20", "eis", "reset_amplifier"]);

    let Point::Composite(composite) = experiment.get_datapoint((0, 0)).unwrap() else {
        panic!("expected a composite");
    };
    assert_eq!(composite.children.len(), 2);
    assert!(matches!(composite.children[1], Point::Spectrum(_)));
}

#[test]
fn test_failed_chain_still_resets_amplifier() {
    let request = scan_request(ExperimentKind::CvThenEis, 1);
    let loc = Location::new(0.0, 0.0, 5.0);
    // measurement 0 is the CV, the failure hits an EIS member
    for (kind, fail_at) in [
        (ExperimentKind::CvThenEis, 1),
        (ExperimentKind::CvThenEisAmplitudes, 2),
        (ExperimentKind::CvThenEisWait, 3),
    ] {
        let echem = SimEchem {
            fail_at: Some(fail_at),
            ..Default::default()
        };
        let r = rig(fast_config(), 5.0, echem, ControlFlags::new(true));
        let err = r.controller.run_chain(&kind, &request, loc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MeasurementFailed, "{}", kind);
        let calls = r.echem.calls();
        assert_eq!(calls.last().map(String::as_str), Some("reset_amplifier"), "{}", kind);
        assert_eq!(calls.iter().filter(|c| *c == "eis").count(), fail_at, "{}", kind);
    }
}

#[test]
fn test_non_finite_wait_is_invalid_and_resets() {
    let config = FeedbackConfig {
        eis_wait_s: f64::INFINITY,
        ..fast_config()
    };
    let r = rig(config, 5.0, SimEchem::default(), ControlFlags::new(true));
    let request = scan_request(ExperimentKind::CvThenEisWait, 1);
    let err = r
        .controller
        .run_chain(&ExperimentKind::CvThenEisWait, &request, Location::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameters);
    assert_eq!(r.echem.calls(), ["cv", "eis", "reset_amplifier"]);
}

#[test]
fn test_non_finite_baseline_window_fails_approach() {
    let config = FeedbackConfig {
        baseline_window_s: f64::NAN,
        ..fast_config()
    };
    let r = rig(config, 5.0, SimEchem::default(), ControlFlags::new(true));
    let err = r.controller.single_approach(&approach_params()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameters);
}

#[test]
fn test_eis_amplitude_series() {
    let r = rig(fast_config(), 5.0, SimEchem::default(), ControlFlags::new(true));
    let experiment = r
        .controller
        .hopping_scan(&scan_request(ExperimentKind::CvThenEisAmplitudes, 1))
        .unwrap();

    let setups: Vec<String> = r
        .echem
        .calls()
        .into_iter()
        .skip(2)
        .filter(|c| c.starts_with("setup_eis"))
        .collect();
    let expected: Vec<String> = EIS_AMPLITUDES_MV
        .iter()
        .map(|a| format!("setup_eis 0.2 {}", a))
        .collect();
    assert_eq!(setups, expected);
    assert_eq!(experiment.max_points_per_loc(), 1 + EIS_AMPLITUDES_MV.len());
}

#[test]
fn test_eis_wait_series_and_custom() {
    let r = rig(fast_config(), 5.0, SimEchem::default(), ControlFlags::new(true));
    let experiment = r
        .controller
        .hopping_scan(&scan_request(ExperimentKind::CvThenEisWait, 1))
        .unwrap();
    assert_eq!(experiment.max_points_per_loc(), 4);
    assert_eq!(r.echem.calls().iter().filter(|c| *c == "eis").count(), 3);

    let r = rig(fast_config(), 5.0, SimEchem::default(), ControlFlags::new(true));
    let custom = ExperimentKind::Custom {
        sequence: "Chrono".to_string(),
        duration_s: 1.0,
    };
    let mut request = scan_request(custom, 2);
    request.cv = None;
    request.eis = None;
    let experiment = r.controller.hopping_scan(&request).unwrap();
    assert_eq!(experiment.non_empty_count(), 4);
    assert!(r.echem.calls().iter().all(|c| c == "custom Chrono"));
}

#[test]
fn test_negative_ceiling_retracts_per_pixel() {
    let r = rig(fast_config(), 5.0, SimEchem::default(), ControlFlags::new(true));
    let mut request = scan_request(ExperimentKind::Cv, 2);
    request.hopping.z_ceiling = -3.0;
    r.stage.position.lock().unwrap().z = 20.0;
    r.controller.hopping_scan(&request).unwrap();
    assert_eq!(r.stage.visits.lock().unwrap().len(), 5);
}

#[test]
fn test_masked_scan_measures_selected_cells() {
    let r = rig(fast_config(), 5.0, SimEchem::default(), ControlFlags::new(true));
    let mut request = scan_request(ExperimentKind::Cv, 2);
    request.hopping.mask = Some(vec![vec![true, false], vec![false, true]]);
    let experiment = r.controller.hopping_scan(&request).unwrap();
    assert_eq!(experiment.non_empty_count(), 2);
    assert!(experiment.get_datapoint((1, 0)).unwrap().is_empty());
}
