//! # Closed-loop XYZ piezo stage
//!
//! The stage controller speaks a line-oriented ASCII protocol over a
//! serial port (`\r` terminated, see [`PiezoCommand`]). Every coordinate
//! crossing the wire goes through the per-axis [`AxisCorrection`], so the
//! rest of the crate only ever sees external micrometers.
//!
//! ## Tasks
//!
//! - the **monitor** polls `measure` about twice a second and caches the
//!   position, skipping while a move is in flight or an abort is raised;
//! - **approach** and **retract** step Z in a loop that polls the local
//!   halt flag and the global abort between steps. Each exit bumps
//!   [`Piezo::motion_count`] so a watcher on another thread can tell the
//!   motion has ended.
//!
//! Without a port (test mode) moves update the cached position directly.

mod command;
mod config;
mod error;
mod scan;


use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::experiment::{Location, ScanPoint};
use crate::lock;
use crate::master::ControlFlags;
use crate::transport::{open_serial, read_until, BoxedTransport};

pub use command::{parse_readout, PiezoCommand};
pub use config::{AxisCorrection, PiezoConfig};
pub use error::PiezoError;
pub use scan::{scan_bounds, snake_coords};

/// Why an approach or retract loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproachStop {
    /// Approach reached z = 0
    Floor,
    /// Retract reached its target height
    Target,
    /// [`Piezo::halt`] was called
    Halted,
    /// The global abort was raised
    Aborted,
}

struct Shared {
    config: PiezoConfig,
    flags: ControlFlags,
    port: Mutex<Option<BoxedTransport>>,
    position: Mutex<Location>,
    moving: AtomicBool,
    halt: AtomicBool,
    motion_count: AtomicU64,
    monitor_stop: AtomicBool,
}

impl Shared {
    fn send(&self, command: PiezoCommand) -> Result<(), PiezoError> {
        if let Some(port) = lock(&self.port).as_mut() {
            write!(port, "{}\r", command)?;
            port.flush()?;
        }
        Ok(())
    }

    fn to_device(&self, loc: Location) -> (f64, f64, f64) {
        (
            self.config.x.forward(loc.x),
            self.config.y.forward(loc.y),
            self.config.z.forward(loc.z),
        )
    }

    fn clamp(&self, v: f64, axis: &AxisCorrection) -> Result<f64, PiezoError> {
        if !v.is_finite() {
            return Err(PiezoError::InvalidParameters(format!(
                "coordinate {} is not finite",
                v
            )));
        }
        Ok(v.clamp(0.0, axis.range))
    }

    fn goto(&self, x: f64, y: f64, z: f64) -> Result<(), PiezoError> {
        let target = Location::new(
            self.clamp(x, &self.config.x)?,
            self.clamp(y, &self.config.y)?,
            self.clamp(z, &self.config.z)?.min(self.config.max_height),
        );
        let (dx, dy, dz) = self.to_device(target);
        self.moving.store(true, Ordering::SeqCst);
        let result = self.send(PiezoCommand::SetAll(dx, dy, dz));
        if result.is_ok() {
            *lock(&self.position) = target;
        }
        self.moving.store(false, Ordering::SeqCst);
        result
    }

    fn goto_z(&self, z: f64) -> Result<(), PiezoError> {
        let z = self.clamp(z, &self.config.z)?.min(self.config.max_height);
        self.moving.store(true, Ordering::SeqCst);
        let result = self.send(PiezoCommand::SetZ(self.config.z.forward(z)));
        if result.is_ok() {
            lock(&self.position).z = z;
        }
        self.moving.store(false, Ordering::SeqCst);
        result
    }

    fn measure_location(&self) -> Result<Location, PiezoError> {
        let mut port = lock(&self.port);
        let Some(port) = port.as_mut() else {
            return Ok(*lock(&self.position));
        };
        write!(port, "{}\r", PiezoCommand::Measure)?;
        port.flush()?;
        let timeout = secs(self.config.readout_timeout_s, 0.0)?;
        let line = read_until(port.as_mut(), b'\r', timeout)?;
        let [dx, dy, dz] = parse_readout(&String::from_utf8_lossy(&line))?;
        let loc = Location::new(
            self.config.x.inverse(dx),
            self.config.y.inverse(dy),
            self.config.z.inverse(dz),
        );
        *lock(&self.position) = loc;
        Ok(loc)
    }

    fn interrupted(&self) -> Option<ApproachStop> {
        if self.flags.is_aborted() {
            Some(ApproachStop::Aborted)
        } else if self.halt.load(Ordering::SeqCst) {
            Some(ApproachStop::Halted)
        } else {
            None
        }
    }

    fn approach(&self, step_size: f64) -> Result<ApproachStop, PiezoError> {
        let dwell = secs(self.config.approach_dwell_s, 0.0)?;
        loop {
            if let Some(stop) = self.interrupted() {
                return Ok(stop);
            }
            let z = lock(&self.position).z - step_size;
            if z <= 0.0 {
                self.goto_z(0.0)?;
                return Ok(ApproachStop::Floor);
            }
            self.goto_z(z)?;
            thread::sleep(dwell);
        }
    }

    fn retract(&self, target: f64) -> Result<ApproachStop, PiezoError> {
        let dwell = secs(self.config.retract_dwell_s, 0.0)?;
        let step = self.config.retract_step.max(1e-3);
        loop {
            if let Some(stop) = self.interrupted() {
                return Ok(stop);
            }
            let z = lock(&self.position).z;
            if z >= target {
                return Ok(ApproachStop::Target);
            }
            self.goto_z((z + step).min(target))?;
            thread::sleep(dwell);
        }
    }
}

/// Piezo stage driver.
pub struct Piezo {
    shared: Arc<Shared>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    starting_coords: Mutex<(f64, f64)>,
}

impl Piezo {
    /// Open the configured serial port and put every axis under closed-loop
    /// remote control.
    pub fn open(config: PiezoConfig, flags: ControlFlags) -> Result<Self, PiezoError> {
        match open_serial(&config.serial) {
            Ok(port) => {
                let piezo = Self::with_transport(config, flags, Some(port));
                piezo.setup()?;
                Ok(piezo)
            }
            Err(e) if flags.test_mode() => {
                warn!(
                    "piezo port {} unavailable ({}), simulating moves",
                    config.serial.path.display(),
                    e
                );
                Ok(Self::with_transport(config, flags, None))
            }
            Err(e) => Err(PiezoError::DeviceUnavailable(format!(
                "{}: {}",
                config.serial.path.display(),
                e
            ))),
        }
    }

    /// Piezo over an already opened transport; `None` simulates moves.
    pub fn with_transport(
        config: PiezoConfig,
        flags: ControlFlags,
        port: Option<BoxedTransport>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                flags,
                port: Mutex::new(port),
                position: Mutex::new(Location::default()),
                moving: AtomicBool::new(false),
                halt: AtomicBool::new(false),
                motion_count: AtomicU64::new(0),
                monitor_stop: AtomicBool::new(true),
            }),
            monitor: Mutex::new(None),
            starting_coords: Mutex::new((0.0, 0.0)),
        }
    }

    /// Remote control, closed loop and position reporting on all channels.
    pub fn setup(&self) -> Result<(), PiezoError> {
        for ch in 0..3 {
            self.shared.send(PiezoCommand::Remote(ch))?;
            self.shared.send(PiezoCommand::ClosedLoop(ch))?;
        }
        self.shared.send(PiezoCommand::MonitorPosition)?;
        info!("piezo set to closed-loop remote control");
        Ok(())
    }

    /// Stage settings.
    pub fn config(&self) -> &PiezoConfig {
        &self.shared.config
    }

    /// Move all three axes.
    pub fn goto(&self, x: f64, y: f64, z: f64) -> Result<(), PiezoError> {
        debug!("piezo goto ({:.3}, {:.3}, {:.3})", x, y, z);
        self.shared.goto(x, y, z)
    }

    /// Move Z only.
    pub fn goto_z(&self, z: f64) -> Result<(), PiezoError> {
        self.shared.goto_z(z)
    }

    /// Read the position from the controller and refresh the cache.
    pub fn measure_location(&self) -> Result<Location, PiezoError> {
        self.shared.measure_location()
    }

    /// Last known position.
    pub fn position(&self) -> Location {
        *lock(&self.shared.position)
    }

    /// Whether a move command is in flight.
    pub fn is_moving(&self) -> bool {
        self.shared.moving.load(Ordering::SeqCst)
    }

    /// Start the background position monitor (no-op when running).
    pub fn start_monitor(&self) -> Result<(), PiezoError> {
        let mut slot = lock(&self.monitor);
        if slot.is_some() {
            return Ok(());
        }
        let interval = secs(self.shared.config.monitor_interval_s, 0.01)?;
        self.shared.monitor_stop.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("piezo-monitor".to_string())
            .spawn(move || monitor_loop(&shared, interval))?;
        *slot = Some(handle);
        debug!("piezo monitor started");
        Ok(())
    }

    /// Stop the position monitor and wait for it to exit.
    pub fn stop_monitor(&self) {
        self.shared.monitor_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = lock(&self.monitor).take() {
            if handle.join().is_err() {
                warn!("piezo monitor thread panicked");
            }
            debug!("piezo monitor stopped");
        }
    }

    /// Whether the monitor is running.
    pub fn is_monitoring(&self) -> bool {
        lock(&self.monitor).is_some()
    }

    /// Lower Z by `step_size` per iteration until z = 0, [`Piezo::halt`] or
    /// the global abort.
    pub fn approach(&self, step_size: f64) -> Result<ApproachStop, PiezoError> {
        if !(step_size > 0.0) {
            return Err(PiezoError::InvalidParameters(format!(
                "approach step must be positive, got {}",
                step_size
            )));
        }
        self.shared.halt.store(false, Ordering::SeqCst);
        let result = self.shared.approach(step_size);
        self.shared.motion_count.fetch_add(1, Ordering::SeqCst);
        debug!("approach ended: {:?} at z = {:.3}", result, self.position().z);
        result
    }

    /// Raise Z to `height` (or by `height` when `relative`), capped at the
    /// stage maximum.
    pub fn retract(&self, height: f64, relative: bool) -> Result<ApproachStop, PiezoError> {
        if !height.is_finite() {
            return Err(PiezoError::InvalidParameters(format!(
                "retract height {} is not finite",
                height
            )));
        }
        self.shared.halt.store(false, Ordering::SeqCst);
        let z = self.position().z;
        let target = if relative { z + height } else { height };
        let target = target.clamp(0.0, self.shared.config.max_height);
        let result = if target <= z {
            self.shared.goto_z(target).map(|_| ApproachStop::Target)
        } else {
            self.shared.retract(target)
        };
        self.shared.motion_count.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// Stop the running approach or retract.
    pub fn halt(&self) {
        self.shared.halt.store(true, Ordering::SeqCst);
    }

    /// Number of approach/retract loops that have ended.
    pub fn motion_count(&self) -> u64 {
        self.shared.motion_count.load(Ordering::SeqCst)
    }

    /// Snake traversal of the scan square anchored at the scan origin.
    pub fn get_xy_coords(
        &self,
        length: f64,
        n_points: usize,
        mask: Option<&[Vec<bool>]>,
    ) -> Result<Vec<ScanPoint>, PiezoError> {
        snake_coords(*lock(&self.starting_coords), length, n_points, mask)
    }

    /// Use the lowest corner as scan origin; returns the side length.
    pub fn set_new_scan_bounds(&self, corners: &[(f64, f64)]) -> Result<f64, PiezoError> {
        let (start, length) = scan_bounds(corners)?;
        *lock(&self.starting_coords) = start;
        info!(
            "scan origin ({:.2}, {:.2}), side {:.2} µm",
            start.0, start.1, length
        );
        Ok(length)
    }

    /// Scan origin.
    pub fn starting_coords(&self) -> (f64, f64) {
        *lock(&self.starting_coords)
    }

    /// Stop the monitor and release the port.
    pub fn close(&self) {
        self.halt();
        self.stop_monitor();
        lock(&self.shared.port).take();
    }
}

fn secs(value: f64, floor: f64) -> Result<Duration, PiezoError> {
    crate::config_secs(value, floor)
        .map_err(|e| PiezoError::InvalidParameters(format!("{} s: {}", value, e)))
}

fn monitor_loop(shared: &Shared, interval: Duration) {
    while !shared.monitor_stop.load(Ordering::SeqCst) {
        if !shared.moving.load(Ordering::SeqCst) && !shared.flags.is_aborted() {
            if let Err(e) = shared.measure_location() {
                warn!("piezo monitor readout failed: {}", e);
            }
        }
        let wake = Instant::now() + interval;
        while Instant::now() < wake && !shared.monitor_stop.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(10));
        }
    }
}
