//! File-based command/reply protocol of the vendor application.
//!
//! ```text
//! inbox (written here)        outbox (written by the vendor)
//! +<serial>                   +<serial>
//! <command 1>                 <reply text>
//! <command 2>
//! ```
//!
//! The vendor acts on the inbox only when the serial changes, and it polls
//! the file about every 100 ms, so each block is followed by a dwell.
//! Replies are matched by prefix, never by serial.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, trace, warn};

use super::error::PotentiostatError;
use crate::lock;

/// Writer of the vendor inbox.
#[derive(Debug)]
pub struct CommandFile {
    path: PathBuf,
    serial: u64,
    dwell: Duration,
}

impl CommandFile {
    /// Truncate the inbox and start counting serials at 0.
    pub fn create(path: &Path, dwell: Duration) -> Result<Self, PotentiostatError> {
        fs::File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            serial: 0,
            dwell,
        })
    }

    /// Serial the next block will carry.
    pub fn next_serial(&self) -> u64 {
        self.serial
    }

    /// Write a single-command block.
    pub fn send(&mut self, command: &str) -> Result<u64, PotentiostatError> {
        self.send_multiple(&[command])
    }

    /// Write one block holding every command, then dwell once.
    ///
    /// Returns the serial the block was written with. The serial only
    /// grows, even when the write fails.
    pub fn send_multiple<S: AsRef<str>>(&mut self, commands: &[S]) -> Result<u64, PotentiostatError> {
        let serial = self.serial;
        self.serial += 1;

        let mut block = format!("+{}\n", serial);
        for command in commands {
            block.push_str(command.as_ref());
            block.push('\n');
        }
        let mut file = fs::File::create(&self.path)?;
        file.write_all(block.as_bytes())?;
        file.flush()?;
        drop(file);

        trace!("inbox <- {:?}", block);
        thread::sleep(self.dwell);
        Ok(serial)
    }
}

/// Background reader of the vendor outbox.
///
/// A message is the pair (line 0, line 1) of the outbox; a new pair is a new
/// message even when its reply text repeats an earlier one. Line 1 of each
/// new message is forwarded over a channel.
///
/// # Thread Naming
///
/// The reader thread is named `"potentiostat-reader"`.
pub struct ReplyReader {
    receiver: Receiver<String>,
    last: Arc<Mutex<Option<String>>>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReplyReader {
    /// Truncate the outbox and start watching it every `interval`.
    pub fn spawn(path: &Path, interval: Duration) -> Result<Self, PotentiostatError> {
        fs::File::create(path)?;
        let (sender, receiver) = unbounded();
        let last = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));

        let watcher = OutboxWatcher {
            path: path.to_path_buf(),
            sender,
            last: Arc::clone(&last),
            seen: None,
        };
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("potentiostat-reader".to_string())
            .spawn(move || watcher.run(&stop_flag, interval))?;

        Ok(Self {
            receiver,
            last,
            stop,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Most recent reply text.
    pub fn last_message(&self) -> Option<String> {
        lock(&self.last).clone()
    }

    /// Discard replies that arrived before now.
    pub fn drain(&self) {
        while let Ok(stale) = self.receiver.try_recv() {
            trace!("discarding stale reply {:?}", stale);
        }
    }

    /// Wait for a reply starting with `prefix`, skipping any other replies.
    ///
    /// # Errors
    ///
    /// [`PotentiostatError::Timeout`] when no matching reply arrives within
    /// `timeout`.
    pub fn wait_for(&self, prefix: &str, timeout: Duration) -> Result<String, PotentiostatError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(reply) if reply.starts_with(prefix) => return Ok(reply),
                Ok(other) => debug!("waiting for '{}', skipping '{}'", prefix, other),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return Err(PotentiostatError::Timeout {
                        prefix: prefix.to_string(),
                        timeout_s: timeout.as_secs_f64(),
                    })
                }
            }
        }
    }

    /// Stop the reader thread.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = lock(&self.handle).take() {
            if handle.join().is_err() {
                warn!("potentiostat reader thread panicked");
            }
        }
    }
}

impl Drop for ReplyReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct OutboxWatcher {
    path: PathBuf,
    sender: Sender<String>,
    last: Arc<Mutex<Option<String>>>,
    seen: Option<(String, String)>,
}

impl OutboxWatcher {
    fn run(mut self, stop: &AtomicBool, interval: Duration) {
        while !stop.load(Ordering::SeqCst) {
            match fs::read_to_string(&self.path) {
                Ok(text) => {
                    if self.check(&text).is_err() {
                        return;
                    }
                }
                Err(e) => trace!("outbox not readable: {}", e),
            }
            thread::sleep(interval);
        }
    }

    /// Forward the reply if the outbox holds a new message. Errs only when
    /// the receiving side is gone.
    fn check(&mut self, text: &str) -> Result<(), ()> {
        let mut lines = text.lines().map(|l| l.trim_end_matches('\r'));
        let (Some(echo), Some(reply)) = (lines.next(), lines.next()) else {
            return Ok(());
        };
        if reply.trim().is_empty() {
            return Ok(());
        }
        let pair = (echo.to_string(), reply.trim().to_string());
        if self.seen.as_ref() == Some(&pair) {
            return Ok(());
        }
        debug!("outbox -> {} {}", pair.0, pair.1);
        *lock(&self.last) = Some(pair.1.clone());
        let result = self.sender.send(pair.1.clone()).map_err(|_| ());
        self.seen = Some(pair);
        result
    }
}
