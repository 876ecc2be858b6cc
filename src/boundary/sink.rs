use std::time::Duration;

use log::{info, warn};

use crate::experiment::Experiment;

/// Notifications from the core to whatever front end is attached.
///
/// Implementations must not keep references to the points they are shown;
/// the experiment passed to [`EventSink::notify_point_updated`] is only
/// borrowed for the duration of the call.
pub trait EventSink: Send + Sync {
    /// A pixel of `experiment` changed.
    fn notify_point_updated(&self, experiment: &Experiment) {
        let _ = experiment;
    }

    /// The probe position or the selected pixel changed.
    fn notify_point_selected(&self, x: f64, y: f64, z: f64, value: f64) {
        let _ = (x, y, z, value);
    }

    /// A message for the operator; `quiet` messages are informational.
    fn log(&self, text: &str, quiet: bool);

    /// Ask the operator to confirm an action.
    fn ask_ok(&self, prompt: &str) -> bool;

    /// Scan progress with an estimate of the time left.
    fn notify_progress(&self, done: usize, total: usize, remaining: Option<Duration>) {
        let _ = (done, total, remaining);
    }
}

/// Sink that writes everything to the log and answers prompts with a fixed
/// answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink {
    confirm: bool,
}

impl LogSink {
    /// Sink answering every prompt with `confirm`.
    pub fn new(confirm: bool) -> Self {
        Self { confirm }
    }
}

impl EventSink for LogSink {
    fn notify_point_updated(&self, experiment: &Experiment) {
        log::debug!(
            "experiment updated: {} of {} pixels measured",
            experiment.non_empty_count(),
            experiment.size * experiment.size
        );
    }

    fn notify_point_selected(&self, x: f64, y: f64, z: f64, value: f64) {
        log::debug!("selected ({:.2}, {:.2}, {:.3}) = {:e}", x, y, z, value);
    }

    fn log(&self, text: &str, quiet: bool) {
        if quiet {
            log::debug!("{}", text);
        } else {
            info!("{}", text);
        }
    }

    fn ask_ok(&self, prompt: &str) -> bool {
        if self.confirm {
            info!("{} [confirmed]", prompt);
        } else {
            warn!("{} [declined]", prompt);
        }
        self.confirm
    }

    fn notify_progress(&self, done: usize, total: usize, remaining: Option<Duration>) {
        match remaining {
            Some(left) => info!("point {}/{}, about {:.0} s left", done, total, left.as_secs_f64()),
            None => info!("point {}/{}", done, total),
        }
    }
}
