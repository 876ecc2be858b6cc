//! # Lifecycle supervisor
//!
//! The [`Master`] owns the process-wide [`ControlFlags`] and a write-once
//! registry of instrument [`Component`]s. It is constructed once and handed
//! to whoever needs to abort or shut the system down.
//!
//! ```text
//! abort()      -> ABORT raised -> halt() on every component
//!                 -> cool-down -> make_ready(): ABORT cleared, components ready
//! run()        -> supervisor thread: a stop request or will_stop() -> end_state()
//! end_state()  -> STOP raised -> stop() on every component, once
//! ```

mod components;
mod error;
mod flags;


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::lock;

pub use error::MasterError;
pub use flags::ControlFlags;

/// Supervisor settings, normally the `[master]` table of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Delay between an abort and the automatic return to ready (s)
    pub cooldown_s: f64,
    /// How often the supervisor polls `will_stop` (s)
    pub supervise_interval_s: f64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            cooldown_s: 1.0,
            supervise_interval_s: 0.1,
        }
    }
}

fn secs(value: f64, floor: f64) -> Result<Duration, MasterError> {
    crate::config_secs(value, floor)
        .map_err(|e| MasterError::InvalidParameters(format!("{} s: {}", value, e)))
}

/// An instrument under supervision.
///
/// Every hook has a no-op default so components only implement what they
/// can do.
pub trait Component: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Release hardware for shutdown.
    fn stop(&self) {}

    /// Stop any motion or measurement right now.
    fn halt(&self) {}

    /// Return to normal operation after an abort.
    fn make_ready(&self) -> Result<(), MasterError> {
        Ok(())
    }

    /// Whether the component wants the system shut down.
    fn will_stop(&self) -> bool {
        false
    }
}

/// Why the supervisor was asked to end the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopRequest {
    /// Who asked
    pub source: String,
    /// Free-form reason for the log
    pub reason: String,
}

/// Lifecycle object holding the global flags and the component registry.
pub struct Master {
    config: MasterConfig,
    flags: ControlFlags,
    components: Mutex<Vec<Arc<dyn Component>>>,
    requests: (Sender<StopRequest>, Receiver<StopRequest>),
    ended: AtomicBool,
}

impl Master {
    /// Supervisor over `flags`.
    pub fn new(config: MasterConfig, flags: ControlFlags) -> Self {
        Self {
            config,
            flags,
            components: Mutex::new(Vec::new()),
            requests: unbounded(),
            ended: AtomicBool::new(false),
        }
    }

    /// Shared flags.
    pub fn flags(&self) -> &ControlFlags {
        &self.flags
    }

    /// Attach `component` under its name; a name can be taken only once.
    pub fn register(&self, component: Arc<dyn Component>) -> Result<(), MasterError> {
        let mut components = lock(&self.components);
        let name = component.name().to_string();
        if components.iter().any(|c| c.name() == name) {
            return Err(MasterError::AlreadyRegistered(name));
        }
        debug!("registered component '{}'", name);
        components.push(component);
        Ok(())
    }

    /// Component registered as `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Component>> {
        lock(&self.components)
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Names in registration order.
    pub fn component_names(&self) -> Vec<String> {
        lock(&self.components)
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    // Snapshot so hooks run without holding the registry lock.
    fn registered(&self) -> Vec<Arc<dyn Component>> {
        lock(&self.components).clone()
    }

    /// Ask the supervisor to end the run.
    pub fn request_stop(&self, source: &str, reason: &str) {
        let request = StopRequest {
            source: source.to_string(),
            reason: reason.to_string(),
        };
        // the receiver lives as long as self
        let _ = self.requests.0.send(request);
    }

    /// Start the supervisor thread.
    ///
    /// It ends the run on the first stop request, on the first component
    /// reporting `will_stop`, or returns when STOP is raised elsewhere.
    pub fn run(self: &Arc<Self>) -> Result<JoinHandle<()>, MasterError> {
        let master = Arc::clone(self);
        let interval = secs(self.config.supervise_interval_s, 0.001)?;
        let handle = thread::Builder::new()
            .name("master".to_string())
            .spawn(move || {
                while !master.flags.is_stopped() {
                    match master.requests.1.recv_timeout(interval) {
                        Ok(request) => {
                            info!("stop requested by {}: {}", request.source, request.reason);
                            master.end_state();
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            let stopping = master
                                .registered()
                                .into_iter()
                                .find(|c| c.will_stop());
                            if let Some(component) = stopping {
                                info!("{} is stopping, shutting down", component.name());
                                master.end_state();
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("supervisor finished");
            })?;
        Ok(handle)
    }

    /// Raise the global abort and halt every component; after the
    /// cool-down the system is made ready again unless it is stopping.
    pub fn abort(self: &Arc<Self>) -> Result<JoinHandle<()>, MasterError> {
        self.flags.raise_abort();
        warn!("global abort raised");
        for component in self.registered() {
            component.halt();
        }

        let master = Arc::clone(self);
        let cooldown = secs(self.config.cooldown_s, 0.0)?;
        let handle = thread::Builder::new()
            .name("master-cooldown".to_string())
            .spawn(move || {
                thread::sleep(cooldown);
                if master.flags.is_stopped() {
                    return;
                }
                if let Err(e) = master.make_ready() {
                    warn!("system not ready after abort: {}", e);
                }
            })?;
        Ok(handle)
    }

    /// Clear the global abort and call `make_ready` on every component.
    ///
    /// Every component is tried; the first failure is returned.
    pub fn make_ready(&self) -> Result<(), MasterError> {
        self.flags.clear_abort();
        let mut first_error = None;
        for component in self.registered() {
            if let Err(e) = component.make_ready() {
                warn!("{}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                info!("system ready");
                Ok(())
            }
        }
    }

    /// Raise STOP and release every component's hardware; later calls do
    /// nothing.
    pub fn end_state(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.flags.raise_stop();
        for component in self.registered().into_iter().rev() {
            debug!("stopping {}", component.name());
            component.stop();
        }
        info!("all components stopped");
    }

    /// Whether [`Master::end_state`] has run.
    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}
