//! # Potentiostat driver
//!
//! The potentiostat is controlled through its vendor application, which
//! watches a command file (the *inbox*) and answers in a reply file (the
//! *outbox*). See [`protocol`] for the file format.
//!
//! ## Measurement state machine
//!
//! ```text
//! idle --setup_*--> idle              protocol values updated
//! idle --run_*----> running           sequence dispatched, ADC polling
//! running --Query--> running | idle | timeout | aborted
//! idle --save_last_experiment--> idle export copied, path returned
//! aborted --Break/Stop/Store--> idle
//! ```
//!
//! A `run_*` call while another run is active fails with
//! [`PotentiostatError::Busy`]. Aborts are reported as
//! [`PotentiostatError::Aborted`].
//!
//! ## Exports
//!
//! Single measurements are exported as ASCII; scans export MATLAB files,
//! which the vendor writes considerably faster (see [`ExportFormat`]).

mod amplifier;
mod config;
mod correction;
mod cv;
mod eis;
mod error;
mod export;
mod matfile;
pub mod protocol;


use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::adc::Adc;
use crate::boundary::EventSink;
use crate::experiment::{
    derive_impedance, CorrectionEntry, Location, Point, Spectrum, Voltammogram,
};
use crate::lock;
use crate::master::ControlFlags;
use crate::waveform::{sample_rate_for, template_file_name, Waveform, Weighting};

pub use amplifier::{
    amps_per_volt, gain_for_index, AmplifierSettings, Filter1, Filter2, FilterResponse,
    GAIN_TABLE_MV_PER_PA, STIM_INTERNAL,
};
pub use config::PotentiostatConfig;
pub use correction::{CorrectionKey, CorrectionTable};
pub use cv::{CvParameters, PgfCache, CV_FIRST_PARAM};
pub use eis::{filter1_for, filter2_for, EisParameters, EIS_FIRST_PARAM};
pub use error::PotentiostatError;
pub use export::{default_save_path, export_path, parse_ascii, read_ascii, ExportFormat, ExportedTrace};
pub use matfile::{parse_mat, read_mat, read_mat_trace, traces_from_mat, MatVariable};
use protocol::{CommandFile, ReplyReader};

/// Gain index used until the amplifier gain is set (1 mV/pA).
pub const DEFAULT_GAIN_INDEX: usize = 7;

const EXT_STIM_ON: [&str; 2] = ["Set E TestDacToStim1 2", "Set E ExtScale 1"];
const BREAK_SEQUENCE: [&str; 3] = ["Break", "Stop", "Store"];

/// Whether a measurement is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Ready for setup or a run
    Idle,
    /// A sequence is executing
    Running,
}

#[derive(Debug, Default)]
struct DriverState {
    pgf: PgfCache,
    cv: Option<CvParameters>,
    eis: Option<EisParameters>,
    applied_freqs: Vec<f64>,
    corrections: Option<Vec<CorrectionEntry>>,
    amplifier: AmplifierSettings,
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Driver for the vendor-controlled potentiostat.
pub struct Potentiostat {
    config: PotentiostatConfig,
    flags: ControlFlags,
    adc: Option<Arc<Adc>>,
    sink: Arc<dyn EventSink>,
    inbox: Mutex<CommandFile>,
    reader: ReplyReader,
    exchange: Mutex<()>,
    state: Mutex<DriverState>,
    running: AtomicBool,
    cancel: AtomicBool,
    exports: AtomicU64,
    session: String,
}

impl Potentiostat {
    /// Truncate the protocol files and start the outbox reader.
    ///
    /// The vendor directory must exist; in test mode it is created.
    pub fn open(
        config: PotentiostatConfig,
        flags: ControlFlags,
        adc: Option<Arc<Adc>>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, PotentiostatError> {
        for file in [&config.inbox, &config.outbox] {
            let Some(dir) = file.parent().filter(|d| !d.as_os_str().is_empty()) else {
                continue;
            };
            if dir.is_dir() {
                continue;
            }
            if flags.test_mode() {
                fs::create_dir_all(dir)?;
            } else {
                return Err(PotentiostatError::DeviceUnavailable(format!(
                    "vendor directory {} does not exist",
                    dir.display()
                )));
            }
        }
        fs::create_dir_all(&config.data_dir)?;
        fs::create_dir_all(&config.template_dir)?;

        let inbox = CommandFile::create(&config.inbox, config.command_dwell()?)?;
        let reader = ReplyReader::spawn(&config.outbox, config.reader_interval()?)?;
        info!(
            "potentiostat protocol on {} / {}",
            config.inbox.display(),
            config.outbox.display()
        );

        Ok(Self {
            config,
            flags,
            adc,
            sink,
            inbox: Mutex::new(inbox),
            reader,
            exchange: Mutex::new(()),
            state: Mutex::new(DriverState::default()),
            running: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            exports: AtomicU64::new(0),
            session: chrono::Local::now().format("%Y%m%d_%H%M%S").to_string(),
        })
    }

    /// Driver settings.
    pub fn config(&self) -> &PotentiostatConfig {
        &self.config
    }

    /// Current status.
    pub fn status(&self) -> Status {
        if self.running.load(Ordering::SeqCst) {
            Status::Running
        } else {
            Status::Idle
        }
    }

    /// Most recent vendor reply.
    pub fn last_message(&self) -> Option<String> {
        self.reader.last_message()
    }

    /// Write one command.
    pub fn send(&self, command: &str) -> Result<u64, PotentiostatError> {
        lock(&self.inbox).send(command)
    }

    /// Write several commands as one block.
    pub fn send_multiple<S: AsRef<str>>(&self, commands: &[S]) -> Result<u64, PotentiostatError> {
        lock(&self.inbox).send_multiple(commands)
    }

    /// Send `command` and wait for a reply starting with `prefix`.
    pub fn query(&self, command: &str, prefix: &str) -> Result<String, PotentiostatError> {
        self.query_within(command, prefix, self.config.reply_timeout()?)
    }

    fn query_within(
        &self,
        command: &str,
        prefix: &str,
        timeout: Duration,
    ) -> Result<String, PotentiostatError> {
        let _exchange = lock(&self.exchange);
        self.reader.drain();
        self.send(command)?;
        self.reader.wait_for(prefix, timeout)
    }

    /// Update the given amplifier fields and remember them as the user's
    /// settings.
    pub fn set_amplifier(&self, settings: &AmplifierSettings) -> Result<(), PotentiostatError> {
        self.apply_amplifier(settings)?;
        let mut state = lock(&self.state);
        let stored = &mut state.amplifier;
        stored.hold_voltage = settings.hold_voltage.or(stored.hold_voltage);
        stored.filter1 = settings.filter1.or(stored.filter1);
        stored.filter2 = settings.filter2.or(stored.filter2);
        stored.stim_filter = settings.stim_filter.or(stored.stim_filter);
        stored.electrode_mode = settings.electrode_mode.or(stored.electrode_mode);
        stored.gain_index = settings.gain_index.or(stored.gain_index);
        Ok(())
    }

    fn apply_amplifier(&self, settings: &AmplifierSettings) -> Result<(), PotentiostatError> {
        let commands = settings.commands()?;
        self.send_multiple(&commands)?;
        Ok(())
    }

    /// Resend the user's amplifier settings, undoing measurement overrides.
    pub fn reset_amplifier(&self) -> Result<(), PotentiostatError> {
        let settings = lock(&self.state).amplifier.clone();
        self.apply_amplifier(&settings)
    }

    /// Current monitor gain (mV/pA).
    pub fn gain(&self) -> f64 {
        let index = lock(&self.state).amplifier.gain_index.unwrap_or(DEFAULT_GAIN_INDEX);
        gain_for_index(index).unwrap_or(GAIN_TABLE_MV_PER_PA[DEFAULT_GAIN_INDEX])
    }

    /// The user's holding potential (V).
    pub fn hold_voltage(&self) -> f64 {
        lock(&self.state).amplifier.hold_voltage.unwrap_or(0.0)
    }

    fn ensure_idle(&self) -> Result<(), PotentiostatError> {
        match self.status() {
            Status::Idle => Ok(()),
            Status::Running => Err(PotentiostatError::Busy),
        }
    }

    fn write_pgf(&self, first: usize, values: &[f64]) -> Result<(), PotentiostatError> {
        let commands = lock(&self.state).pgf.update(first, values);
        if commands.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.send_multiple(&commands) {
            lock(&self.state).pgf.invalidate();
            return Err(e);
        }
        Ok(())
    }

    /// Store the CV protocol values that changed since the last setup.
    pub fn setup_cv(&self, params: &CvParameters) -> Result<(), PotentiostatError> {
        params.validate()?;
        self.ensure_idle()?;
        self.write_pgf(CV_FIRST_PARAM, &params.pgf_values())?;
        lock(&self.state).cv = Some(*params);
        debug!(
            "CV set up: {:?}, {:.2} s on {}",
            params,
            params.duration(),
            params.sequence()
        );
        Ok(())
    }

    /// CV parameters of the last setup.
    pub fn cv_parameters(&self) -> Option<CvParameters> {
        lock(&self.state).cv
    }

    /// Run the CV set up last and export it.
    pub fn run_cv(&self, dest: Option<&Path>, format: ExportFormat) -> Result<PathBuf, PotentiostatError> {
        let params = self.cv_parameters().ok_or_else(|| {
            PotentiostatError::InvalidParameters("run_cv called before setup_cv".to_string())
        })?;
        self.run_sequence(params.sequence(), params.duration())?;
        self.save_last_experiment(dest, format)
    }

    /// Configure filters, external stimulation, bias and duration for an
    /// EIS run. The template is rewritten when the waveform changed (or
    /// `force_waveform` is set), which also refreshes the corrections.
    ///
    /// Returns the applied frequencies.
    pub fn setup_eis(&self, params: &EisParameters) -> Result<Vec<f64>, PotentiostatError> {
        self.ensure_idle()?;
        let request = params.request();
        let freqs = request.frequencies()?;
        let duration = params.duration()?;
        let max_freq = freqs.last().copied().unwrap_or(params.f1);

        self.apply_amplifier(&AmplifierSettings {
            filter1: Some(filter1_for(max_freq)),
            filter2: Some(filter2_for(max_freq)),
            ..Default::default()
        })?;
        self.send_multiple(&EXT_STIM_ON)?;
        self.write_pgf(EIS_FIRST_PARAM, &[params.e0, duration])?;

        let template = self.config.template_dir.join(template_file_name(
            sample_rate_for(max_freq),
            self.config.template_index,
        ));
        let regenerate = {
            let mut state = lock(&self.state);
            let changed = state.eis.as_ref().map_or(true, |old| old.waveform_differs(params));
            state.eis = Some(params.clone());
            state.applied_freqs = freqs.clone();
            changed || params.force_waveform || !template.exists()
        };

        if regenerate {
            let waveform = Waveform::generate(&request, &Weighting::Pink, &mut rand::thread_rng())?;
            let bytes = waveform.write_template(&template)?;
            info!(
                "wrote {} byte template {} ({} tones)",
                bytes,
                template.display(),
                freqs.len()
            );
            self.check_correction_table(false)?;
        }
        Ok(freqs)
    }

    /// EIS parameters of the last setup.
    pub fn eis_parameters(&self) -> Option<EisParameters> {
        lock(&self.state).eis.clone()
    }

    /// Frequencies of the current EIS template.
    pub fn applied_frequencies(&self) -> Vec<f64> {
        lock(&self.state).applied_freqs.clone()
    }

    /// Corrections matching the current EIS template.
    pub fn corrections(&self) -> Option<Vec<CorrectionEntry>> {
        lock(&self.state).corrections.clone()
    }

    /// Run the EIS set up last and export it.
    pub fn run_eis(&self, dest: Option<&Path>, format: ExportFormat) -> Result<PathBuf, PotentiostatError> {
        let params = self.eis_parameters().ok_or_else(|| {
            PotentiostatError::InvalidParameters("run_eis called before setup_eis".to_string())
        })?;
        self.run_sequence(&self.config.eis_sequence, params.duration()?)?;
        self.save_last_experiment(dest, format)
    }

    /// Run a stored vendor sequence as is and export it.
    pub fn run_custom(
        &self,
        sequence: &str,
        duration_s: f64,
        dest: Option<&Path>,
        format: ExportFormat,
    ) -> Result<PathBuf, PotentiostatError> {
        self.run_sequence(sequence, duration_s)?;
        self.save_last_experiment(dest, format)
    }

    /// Load the corrections for the current waveform, measuring them on the
    /// reference impedance when missing or when `force` is set.
    ///
    /// Returns `None` when the operator declines the reference measurement.
    pub fn check_correction_table(
        &self,
        force: bool,
    ) -> Result<Option<Vec<CorrectionEntry>>, PotentiostatError> {
        let (params, freqs) = {
            let state = lock(&self.state);
            let params = state.eis.clone().ok_or_else(|| {
                PotentiostatError::InvalidParameters("no EIS waveform set up".to_string())
            })?;
            (params, state.applied_freqs.clone())
        };
        let key = CorrectionKey::new(params.amplitude_mv, params.n_pts, &freqs);
        let mut table = CorrectionTable::load(&self.config.correction_table)?;

        if !force {
            if let Some(stored) = table.get(&key).filter(|c| c.len() == freqs.len()) {
                debug!("using stored corrections for {}", key.to_key_string());
                lock(&self.state).corrections = Some(stored.clone());
                return Ok(Some(stored));
            }
        }

        let prompt = format!(
            "No corrections for this waveform. Connect the {:.0} MOhm reference \
             (with {:.1} pF in parallel) and press OK to measure them.",
            self.config.reference_ohms / 1e6,
            self.config.reference_capacitance * 1e12
        );
        if !self.sink.ask_ok(&prompt) {
            warn!("correction measurement declined; impedances stay uncorrected");
            lock(&self.state).corrections = None;
            return Ok(None);
        }

        self.send(&format!("Set E CFastTot {}", self.config.reference_capacitance))?;
        self.run_sequence(&self.config.eis_sequence, params.duration()?)?;
        let dest = self
            .config
            .data_dir
            .join("corrections")
            .join(format!("correction_{}.asc", chrono::Local::now().format("%Y%m%d_%H%M%S")));
        let path = self.save_last_experiment(Some(&dest), ExportFormat::Ascii)?;
        let trace = read_ascii(&path)?;
        let measured = derive_impedance(&trace.t, &trace.v, &trace.i, &freqs, None)?;

        let entries: Vec<CorrectionEntry> = freqs
            .iter()
            .zip(&measured.z)
            .map(|(&f, &z)| CorrectionEntry::from_reference(f, z, self.config.reference_ohms))
            .collect();
        table.insert(&key, &entries);
        table.save()?;
        info!(
            "stored {} corrections under {}",
            entries.len(),
            key.to_key_string()
        );

        self.sink.log("Correction table updated.", false);
        self.sink.ask_ok("Reconnect the electrochemical cell and press OK.");
        lock(&self.state).corrections = Some(entries.clone());
        Ok(Some(entries))
    }

    /// Execute `sequence` and wait until the vendor reports idle.
    ///
    /// The ADC streams the current monitor for the whole run. Gives up
    /// after `duration_s` plus the completion margin.
    pub fn run_sequence(&self, sequence: &str, duration_s: f64) -> Result<(), PotentiostatError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PotentiostatError::Busy);
        }
        let _running = RunGuard(&self.running);
        self.cancel.store(false, Ordering::SeqCst);
        if self.flags.is_aborted() {
            return Err(PotentiostatError::Aborted);
        }

        let limit = self.config.run_deadline(duration_s)?;
        let poller = match &self.adc {
            Some(adc) => Some(adc.spawn_poll(limit, Some(amps_per_volt(self.gain())))?),
            None => None,
        };

        let result = self.wait_for_sequence(sequence, limit);

        if let Some(adc) = &self.adc {
            adc.stop_polling();
        }
        if let Some(handle) = poller {
            match handle.join() {
                Ok(Ok(scans)) => debug!("ADC captured {} scans during {}", scans, sequence),
                Ok(Err(e)) => warn!("ADC capture during {} failed: {}", sequence, e),
                Err(_) => warn!("ADC poll thread panicked"),
            }
        }

        if matches!(result, Err(PotentiostatError::Aborted)) && !self.cancel.load(Ordering::SeqCst) {
            self.send_multiple(&BREAK_SEQUENCE)?;
        }
        result
    }

    fn wait_for_sequence(&self, sequence: &str, limit: Duration) -> Result<(), PotentiostatError> {
        self.send(&format!("ExecuteSequence {}", sequence))?;
        info!("running {} (limit {:.1} s)", sequence, limit.as_secs_f64());
        let start = Instant::now();

        loop {
            if self.flags.is_aborted() || self.cancel.load(Ordering::SeqCst) {
                return Err(PotentiostatError::Aborted);
            }
            let elapsed = start.elapsed();
            if elapsed >= limit {
                return Err(PotentiostatError::MeasurementFailed(format!(
                    "{} did not finish within {:.1} s",
                    sequence,
                    limit.as_secs_f64()
                )));
            }
            thread::sleep(self.config.query_interval()?.min(limit - elapsed));

            let remaining = limit.saturating_sub(start.elapsed());
            let wait = self.config.reply_timeout()?.min(remaining).max(Duration::from_millis(1));
            match self.query_within("Query", "Query_", wait) {
                Ok(reply) if reply.starts_with("Query_Idle") => {
                    debug!("{} finished after {:.2} s", sequence, start.elapsed().as_secs_f64());
                    return Ok(());
                }
                Ok(reply) => trace!("{}: {}", sequence, reply),
                Err(PotentiostatError::Timeout { .. }) => debug!("no status reply yet"),
                Err(e) => return Err(e),
            }
        }
    }

    /// Stop the running measurement and return to idle.
    pub fn abort(&self) -> Result<(), PotentiostatError> {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(adc) = &self.adc {
            adc.stop_polling();
        }
        self.send_multiple(&BREAK_SEQUENCE)?;
        info!("potentiostat measurement aborted");
        Ok(())
    }

    /// Export the last series of the open data file and copy it to `dest`
    /// (or `<data_dir>/<series date>/<series time>` when `None`).
    pub fn save_last_experiment(
        &self,
        dest: Option<&Path>,
        format: ExportFormat,
    ) -> Result<PathBuf, PotentiostatError> {
        let reply = self.query("GetParameters DataFile", "Reply_GetParameters")?;
        let datafile = PathBuf::from(reply_payload(&reply, "Reply_GetParameters"));
        if datafile.as_os_str().is_empty() {
            return Err(PotentiostatError::InvalidExport(
                "vendor reports no open data file".to_string(),
            ));
        }

        let reply = self.query("GetTarget", "Reply_GetTarget")?;
        let target = parse_target(reply_payload(&reply, "Reply_GetTarget"))?;
        self.send(&format!("SetTarget {},{},0,0,2,FALSE,FALSE", target[0], target[1]))?;
        self.send_multiple(&["Set O Xmin 0", "Set O Xmax 100"])?;

        let exported = export_path(&datafile, format);
        self.query_within(
            &format!("Export overwrite, {}", exported.display()),
            "Reply_Export",
            self.config.export_timeout()?,
        )?;

        let dest = match dest {
            Some(path) => path.to_path_buf(),
            None => {
                let reply = self.query("GetParameters SeriesDate,SeriesTime", "Reply_GetParameters")?;
                let payload = reply_payload(&reply, "Reply_GetParameters");
                let (date, time) = payload.split_once(',').unwrap_or((payload, "series"));
                default_save_path(&self.config.data_dir, date, time).with_extension(format.extension())
            }
        };
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if dest != exported {
            fs::copy(&exported, &dest)?;
        }
        debug!("exported series to {}", dest.display());
        Ok(dest)
    }

    /// Zero the hold potential, auto-zero the offsets and the fast
    /// capacitance, measure the open-circuit potential and reapply the
    /// user's hold potential.
    pub fn zero_offsets(&self) -> Result<(), PotentiostatError> {
        let hold = self.hold_voltage();
        self.apply_amplifier(&AmplifierSettings::hold(0.0))?;
        self.send_multiple(&["Set E AutoZero", "Set E AutoCFast"])?;
        let ocp = self.run_sequence(&self.config.ocp_sequence, self.config.ocp_duration_s);
        self.apply_amplifier(&AmplifierSettings::hold(hold))?;
        ocp
    }

    fn point_export_path(&self, format: ExportFormat) -> PathBuf {
        let n = self.exports.fetch_add(1, Ordering::SeqCst);
        self.config
            .data_dir
            .join("points")
            .join(format!("{}_{:05}.{}", self.session, n, format.extension()))
    }

    fn read_export(path: &Path, format: ExportFormat) -> Result<ExportedTrace, PotentiostatError> {
        match format {
            ExportFormat::Ascii => read_ascii(path),
            ExportFormat::Mat => read_mat_trace(path),
        }
    }

    fn show(&self, point: &Point) {
        if let Some(adc) = &self.adc {
            adc.force_data(point.clone());
        }
    }

    /// Run the current CV and load it as a point at `loc`.
    pub fn measure_cv(&self, loc: Location, format: ExportFormat) -> Result<Point, PotentiostatError> {
        let dest = self.point_export_path(format);
        let path = self.run_cv(Some(&dest), format)?;
        let trace = Self::read_export(&path, format)?;
        let point: Point = Voltammogram::new(loc, trace.t, trace.v, trace.i)?.into();
        self.show(&point);
        Ok(point)
    }

    /// Run the current EIS and load it as a corrected spectrum at `loc`.
    pub fn measure_eis(&self, loc: Location, format: ExportFormat) -> Result<Point, PotentiostatError> {
        let dest = self.point_export_path(format);
        let path = self.run_eis(Some(&dest), format)?;
        let trace = Self::read_export(&path, format)?;
        let mut spectrum = Spectrum::new(loc, trace.t, trace.v, trace.i, self.applied_frequencies())?;
        spectrum.finalize(self.corrections().as_deref())?;
        let point: Point = spectrum.into();
        self.show(&point);
        Ok(point)
    }

    /// Run a stored sequence and load it as a voltammogram at `loc`.
    pub fn measure_custom(
        &self,
        sequence: &str,
        duration_s: f64,
        loc: Location,
        format: ExportFormat,
    ) -> Result<Point, PotentiostatError> {
        let dest = self.point_export_path(format);
        let path = self.run_custom(sequence, duration_s, Some(&dest), format)?;
        let trace = Self::read_export(&path, format)?;
        let point: Point = Voltammogram::new(loc, trace.t, trace.v, trace.i)?.into();
        self.show(&point);
        Ok(point)
    }

    /// Stop the outbox reader.
    pub fn close(&self) {
        self.reader.shutdown();
    }
}

/// Reply text after its prefix, without separators or quotes.
fn reply_payload<'a>(reply: &'a str, prefix: &str) -> &'a str {
    reply
        .strip_prefix(prefix)
        .unwrap_or(reply)
        .trim_start_matches([',', ' '])
        .trim()
        .trim_matches('"')
}

/// Group and series indices of a `GetTarget` reply.
fn parse_target(payload: &str) -> Result<[u32; 2], PotentiostatError> {
    let indices: Vec<u32> = payload
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect();
    match indices[..] {
        [group, series, ..] => Ok([group, series]),
        _ => Err(PotentiostatError::InvalidExport(format!(
            "cannot read target from '{}'",
            payload
        ))),
    }
}
