//! # secm - Scanning Electrochemical Microscopy Control Core
//!
//! `secm` drives the instruments of a scanning electrochemical microscopy
//! workstation and records what they measure: a closed-loop piezo stage, a
//! USB-serial ADC streaming the probe current, a coarse picomotor and a
//! potentiostat controlled through the vendor's inbox/outbox file protocol.
//!
//! ## Key Features
//!
//! - **Multi-sine EIS waveforms**: frequency selection that avoids mains
//!   harmonics and 2:1 ratios, pink or impedance weighting, raw f32 templates.
//!
//! - **Current-controlled approach**: the probe is lowered until the current
//!   deviates from its baseline, with coarse stepping when the piezo's travel
//!   is exhausted.
//!
//! - **Hopping-mode scans**: snake traversal of an `n × n` grid, one
//!   approach and one measurement chain (CV, EIS, CV→EIS at the estimated
//!   formal potential, ...) per pixel, saved after every pixel.
//!
//! - **Single-file experiments**: `.secmdata` ZIP containers holding the
//!   grid and a snapshot of every parameter, written atomically.
//!
//! - **Cooperative cancellation**: one global abort observed by every loop;
//!   partial scans are persisted and the stage is left monitored.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use secm::experiment::Experiment;
//! use secm::experiment::HeatmapKind;
//!
//! let experiment = Experiment::load("scan.secmdata")?;
//! println!("{} of {} pixels measured", experiment.non_empty_count(), experiment.size.pow(2));
//! let map = experiment.get_heatmap_data(&HeatmapKind::MaxCurrent, None);
//! println!("top row: {:?}", map.last());
//! # Ok::<(), secm::experiment::ExperimentError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! boundary (parameters, events)
//!     │
//!     ▼
//! feedback ──► piezo ──► transport/sys (serial)
//!     │   └──► adc ────► transport/sys (serial)
//!     │   └──► motor ──► transport/sys (hidraw)
//!     └──────► potentiostat ──► inbox/outbox files ──► vendor software
//!     │
//!     ▼
//! experiment (grid, points, .secmdata)        master (flags, lifecycle)
//! ```
//!
//! - [`waveform`]: multi-sine EIS waveform generation
//! - [`adc`]: streaming current capture
//! - [`piezo`]: XYZ stage with coordinate correction and approach loops
//! - [`motor`]: coarse stepper
//! - [`potentiostat`]: vendor file protocol, CV/EIS setup, exports, corrections
//! - [`experiment`]: points, grids, analyses and persistence
//! - [`feedback`]: approaches and hopping scans
//! - [`master`]: global flags and component lifecycle
//! - [`boundary`]: parameter provider and event sink seen by a front end

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![allow(clippy::too_many_arguments)]

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, TryFromFloatSecsError};

pub mod adc;
pub mod boundary;
pub mod error;
pub mod experiment;
pub mod feedback;
pub mod master;
pub mod motor;
pub mod piezo;
pub mod potentiostat;
pub mod sys;
pub mod transport;
pub mod waveform;

/// Lock `mutex`, taking over the data of a holder that panicked.
///
/// Instrument state stays usable after a worker thread dies; the data is
/// plain measurements and positions with no cross-field invariants.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Config seconds as a [`Duration`]. Values below `floor` become `floor`;
/// NaN and infinite values fail.
pub(crate) fn config_secs(value: f64, floor: f64) -> Result<Duration, TryFromFloatSecsError> {
    let clamped = if value < floor { floor } else { value };
    Duration::try_from_secs_f64(clamped)
}

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::adc::{Adc, AdcConfig, AdcError};
    pub use crate::boundary::{EventSink, LogSink, MapParameters, ParameterError, ParameterProvider};
    pub use crate::error::ErrorKind;
    pub use crate::experiment::{
        Composite, Experiment, ExperimentError, HeatmapKind, Location, Point, Settings, Spectrum,
        Voltammogram,
    };
    pub use crate::feedback::{
        ApproachParameters, ExperimentKind, FeedbackConfig, FeedbackController, FeedbackError,
        HoppingParameters, ScanRequest,
    };
    pub use crate::master::{Component, ControlFlags, Master, MasterConfig, MasterError};
    pub use crate::motor::{CoarseMotor, MotorConfig, MotorError};
    pub use crate::piezo::{Piezo, PiezoConfig, PiezoError};
    pub use crate::potentiostat::{
        CvParameters, EisParameters, ExportFormat, Potentiostat, PotentiostatConfig,
        PotentiostatError,
    };
    pub use crate::waveform::{select_frequencies, Waveform, WaveformRequest, Weighting};
}
