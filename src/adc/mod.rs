//! # Auxiliary ADC streaming
//!
//! A two-channel serial sampler used for live current display and for the
//! current-based surface detection of the approach. Channel 0 carries the
//! potentiostat's current monitor output, channel 1 the applied potential.
//!
//! ## Wire format
//!
//! Commands are ASCII terminated by `\r`:
//!
//! ```text
//! stop | encode 0 | slist <i> <ch> | srate <n> | dec <n> | deca <n> | ps <k> | start
//! ```
//!
//! While started, the device streams scans of `2 · channels` bytes, each
//! channel a little-endian `i16` scaled by `10 / 2^15` volts.
//!
//! ## Timing
//!
//! Each read is stamped with the host clock before and after it; the scans
//! it returned are spread linearly over that interval. When polling ends
//! the whole capture is resampled to a uniform grid
//! ([`StreamBuffer::reset_times`]).

mod config;
mod error;
mod frame;

#[cfg(test)]
mod tests;

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::experiment::{Point, StreamBuffer};
use crate::lock;
use crate::master::ControlFlags;
use crate::transport::{open_serial, BoxedTransport};

pub use config::{solve_decimation, AdcConfig, Decimation, DECA_STEPS};
pub use error::AdcError;
pub use frame::{interpolate_times, Block, FrameDecoder, VOLTS_PER_COUNT};

/// Acquisition settings currently programmed into the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Acquisition {
    /// Channels in the scan list
    pub channels: usize,
    /// Per-channel base rate (Hz)
    pub base_rate: f64,
    /// Primary decimation
    pub dec: u32,
    /// Secondary decimation
    pub deca: u32,
    /// Packet size exponent
    pub packet_exponent: u32,
}

impl Acquisition {
    /// Effective sample rate (Hz).
    pub fn rate(&self) -> f64 {
        self.channels as f64 * self.base_rate / (self.dec as f64 * self.deca as f64)
    }

    /// Packet size in bytes.
    pub fn packet_bytes(&self) -> usize {
        1usize << (self.packet_exponent + 4)
    }
}

/// Serial ADC driver.
///
/// Share it as `Arc<Adc>`: polling blocks the calling thread while other
/// threads read the capture and request a stop.
pub struct Adc {
    config: AdcConfig,
    flags: ControlFlags,
    port: Mutex<Option<BoxedTransport>>,
    acquisition: Mutex<Acquisition>,
    data: Mutex<Point>,
    stop: AtomicBool,
    polling: AtomicBool,
    generation: AtomicU64,
    poll_lock: Mutex<()>,
}

impl Adc {
    /// Open the configured serial port and program the default rate.
    ///
    /// In test mode a missing port yields a disabled ADC whose polls idle
    /// until they are stopped.
    pub fn open(config: AdcConfig, flags: ControlFlags) -> Result<Self, AdcError> {
        match open_serial(&config.serial) {
            Ok(port) => {
                let rate = config.sample_rate;
                let adc = Self::with_transport(config, flags, Some(port));
                adc.set_sample_rate(rate)?;
                Ok(adc)
            }
            Err(e) if flags.test_mode() => {
                warn!(
                    "ADC port {} unavailable ({}), continuing without it",
                    config.serial.path.display(),
                    e
                );
                Ok(Self::with_transport(config, flags, None))
            }
            Err(e) => Err(AdcError::DeviceUnavailable(format!(
                "{}: {}",
                config.serial.path.display(),
                e
            ))),
        }
    }

    /// ADC over an already opened transport; `None` disables the device.
    pub fn with_transport(
        config: AdcConfig,
        flags: ControlFlags,
        port: Option<BoxedTransport>,
    ) -> Self {
        let acquisition = Acquisition {
            channels: config.channels.clamp(1, 2),
            base_rate: config.base_rate,
            dec: 1,
            deca: 1,
            packet_exponent: config.packet_exponent.max(1),
        };
        Self {
            data: Mutex::new(Point::Stream(StreamBuffer::with_gain(config.gain))),
            config,
            flags,
            port: Mutex::new(port),
            acquisition: Mutex::new(acquisition),
            stop: AtomicBool::new(false),
            polling: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            poll_lock: Mutex::new(()),
        }
    }

    /// Whether a serial port is attached.
    pub fn is_connected(&self) -> bool {
        lock(&self.port).is_some()
    }

    fn send(&self, command: &str) -> Result<(), AdcError> {
        let mut port = lock(&self.port);
        match port.as_mut() {
            Some(port) => {
                port.write_all(command.as_bytes())?;
                port.write_all(b"\r")?;
                port.flush()?;
            }
            None => debug!("ADC disabled, dropping command '{}'", command),
        }
        Ok(())
    }

    /// Reprogram scan list, rate and packet size.
    pub fn configure(
        &self,
        channels: usize,
        base_rate: f64,
        dec: u32,
        deca: u32,
        packet_exponent: u32,
    ) -> Result<(), AdcError> {
        if !(1..=2).contains(&channels) {
            return Err(AdcError::InvalidParameters(format!(
                "channel count must be 1 or 2, got {}",
                channels
            )));
        }
        if packet_exponent < 1 {
            return Err(AdcError::InvalidParameters(
                "packet size exponent must be at least 1".to_string(),
            ));
        }
        if dec == 0 || dec > self.config.max_decimation || !DECA_STEPS.contains(&deca) {
            return Err(AdcError::InvalidParameters(format!(
                "unsupported decimation dec={} deca={}",
                dec, deca
            )));
        }
        if !(base_rate > 0.0) {
            return Err(AdcError::InvalidParameters(format!(
                "base rate must be positive, got {}",
                base_rate
            )));
        }

        let srate = (self.config.clock_hz / base_rate).round() as u64;
        self.send("stop")?;
        self.send("encode 0")?;
        for ch in 0..channels {
            self.send(&format!("slist {} {}", ch, ch))?;
        }
        self.send(&format!("srate {}", srate))?;
        self.send(&format!("dec {}", dec))?;
        self.send(&format!("deca {}", deca))?;
        self.send(&format!("ps {}", packet_exponent))?;

        let acquisition = Acquisition {
            channels,
            base_rate,
            dec,
            deca,
            packet_exponent,
        };
        *lock(&self.acquisition) = acquisition;
        debug!(
            "ADC configured: {} channel(s) at {:.1} Hz, {} byte packets",
            channels,
            acquisition.rate(),
            acquisition.packet_bytes()
        );
        Ok(())
    }

    /// Choose decimation factors for `freq` and program them. Returns the
    /// rate actually achieved.
    pub fn set_sample_rate(&self, freq: f64) -> Result<f64, AdcError> {
        let current = *lock(&self.acquisition);
        let solved = solve_decimation(
            current.channels,
            self.config.base_rate,
            self.config.max_decimation,
            freq,
        )
        .ok_or_else(|| {
            AdcError::InvalidParameters(format!("cannot reach a sample rate of {} Hz", freq))
        })?;
        self.configure(
            current.channels,
            self.config.base_rate,
            solved.dec,
            solved.deca,
            current.packet_exponent,
        )?;
        info!("ADC sample rate set to {:.1} Hz (requested {} Hz)", solved.rate, freq);
        Ok(solved.rate)
    }

    /// Settings currently programmed.
    pub fn acquisition(&self) -> Acquisition {
        *lock(&self.acquisition)
    }

    /// Stream into a fresh [`StreamBuffer`] until `timeout`, a stop request
    /// or the global abort. Returns the number of scans captured.
    ///
    /// `gain` overrides the configured volts-to-amps factor. A poll that is
    /// already running is stopped first.
    pub fn poll(&self, timeout: Duration, gain: Option<f64>) -> Result<usize, AdcError> {
        let me = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = lock(&self.poll_lock);
        self.stop.store(false, Ordering::SeqCst);
        self.polling.store(true, Ordering::SeqCst);

        *lock(&self.data) = Point::Stream(StreamBuffer::with_gain(gain.unwrap_or(self.config.gain)));
        let result = self.poll_loop(me, timeout);

        if let Point::Stream(buffer) = &mut *lock(&self.data) {
            buffer.reset_times();
        }
        if let Err(e) = self.send("stop") {
            warn!("failed to stop ADC stream: {}", e);
        }
        self.polling.store(false, Ordering::SeqCst);
        result
    }

    fn keep_polling(&self, me: u64, deadline: Instant) -> bool {
        !self.stop.load(Ordering::SeqCst)
            && self.generation.load(Ordering::SeqCst) == me
            && !self.flags.is_aborted()
            && Instant::now() < deadline
    }

    fn poll_loop(&self, me: u64, timeout: Duration) -> Result<usize, AdcError> {
        let start = Instant::now();
        let deadline = start + timeout;
        let acquisition = self.acquisition();
        let mut decoder = FrameDecoder::new(acquisition.channels);
        let mut chunk = vec![0u8; acquisition.packet_bytes()];
        let mut captured = 0usize;

        if !self.is_connected() {
            while self.keep_polling(me, deadline) {
                thread::sleep(Duration::from_millis(10));
            }
            return Ok(0);
        }

        self.send("start")?;
        while self.keep_polling(me, deadline) {
            let before = start.elapsed().as_secs_f64();
            let n = match lock(&self.port).as_mut() {
                Some(port) => port.read(&mut chunk)?,
                None => 0,
            };
            let after = start.elapsed().as_secs_f64();
            if n == 0 {
                thread::sleep(Duration::from_millis(1));
                continue;
            }

            let block = decoder.decode(&chunk[..n]);
            if block.is_empty() {
                continue;
            }
            let times = interpolate_times(before, after, block.len());
            if let Point::Stream(buffer) = &mut *lock(&self.data) {
                buffer.extend(&times, &block.voltage, &block.current);
            }
            captured += block.len();
        }
        debug!(
            "ADC poll finished after {:.3} s with {} scans",
            start.elapsed().as_secs_f64(),
            captured
        );
        Ok(captured)
    }

    /// Run [`Adc::poll`] on a background thread.
    pub fn spawn_poll(
        self: &Arc<Self>,
        timeout: Duration,
        gain: Option<f64>,
    ) -> std::io::Result<JoinHandle<Result<usize, AdcError>>> {
        let adc = Arc::clone(self);
        thread::Builder::new()
            .name("adc-poll".to_string())
            .spawn(move || adc.poll(timeout, gain))
    }

    /// Ask the active poll to finish.
    pub fn stop_polling(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether a poll is running.
    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    /// Replace the live capture with a finished measurement for display.
    pub fn force_data(&self, point: Point) {
        *lock(&self.data) = point;
    }

    /// Copy of the current data.
    pub fn data(&self) -> Point {
        lock(&self.data).clone()
    }

    /// Copy of the live capture, if one is held.
    pub fn snapshot(&self) -> Option<StreamBuffer> {
        match &*lock(&self.data) {
            Point::Stream(buffer) => Some(buffer.clone()),
            _ => None,
        }
    }

    /// The last `n` currents (A) of the live capture.
    pub fn last_currents(&self, n: usize) -> Vec<f64> {
        match &*lock(&self.data) {
            Point::Stream(buffer) => buffer.last_currents(n),
            _ => Vec::new(),
        }
    }

    /// Mean current (A) over the last `window` seconds of the live capture.
    pub fn mean_current(&self, window: f64) -> Option<f64> {
        match &*lock(&self.data) {
            Point::Stream(buffer) => buffer.mean_current(window),
            _ => None,
        }
    }

    /// Number of scans in the live capture.
    pub fn sample_count(&self) -> usize {
        match &*lock(&self.data) {
            Point::Stream(buffer) => buffer.len(),
            _ => 0,
        }
    }

    /// Release the port.
    pub fn close(&self) {
        self.stop_polling();
        if let Err(e) = self.send("stop") {
            warn!("failed to stop ADC on close: {}", e);
        }
        lock(&self.port).take();
    }
}
