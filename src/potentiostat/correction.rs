//! Persistent table of instrument corrections per waveform.
//!
//! ```text
//! { "<amplitude>_<n_pts>_<f1>_<f2>_...": [[f, |Z| factor, phase offset °], ...] }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use tempfile::NamedTempFile;

use super::error::PotentiostatError;
use crate::experiment::CorrectionEntry;

/// Identity of a multi-sine waveform as far as corrections are concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionKey {
    /// Peak amplitude (mV)
    pub amplitude_mv: f64,
    /// Number of frequencies
    pub n_pts: usize,
    /// Applied frequencies (Hz)
    pub freqs: Vec<f64>,
}

impl CorrectionKey {
    /// Key for a waveform.
    pub fn new(amplitude_mv: f64, n_pts: usize, freqs: &[f64]) -> Self {
        Self {
            amplitude_mv,
            n_pts,
            freqs: freqs.to_vec(),
        }
    }

    /// String form used in the table file.
    pub fn to_key_string(&self) -> String {
        let mut key = format!("{}_{}", self.amplitude_mv, self.n_pts);
        for f in &self.freqs {
            key.push('_');
            key.push_str(&f.to_string());
        }
        key
    }
}

/// Correction table backed by a JSON file.
#[derive(Debug, Clone, Default)]
pub struct CorrectionTable {
    path: PathBuf,
    entries: BTreeMap<String, Vec<[f64; 3]>>,
}

impl CorrectionTable {
    /// Load the table at `path`; a missing file is an empty table.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PotentiostatError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no correction table at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries })
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored waveforms.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored key strings, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Corrections stored for `key`.
    pub fn get(&self, key: &CorrectionKey) -> Option<Vec<CorrectionEntry>> {
        self.entries.get(&key.to_key_string()).map(|rows| {
            rows.iter()
                .map(|&[freq, magnitude, phase_deg]| CorrectionEntry {
                    freq,
                    magnitude,
                    phase_deg,
                })
                .collect()
        })
    }

    /// Store corrections for `key`, replacing any previous value.
    pub fn insert(&mut self, key: &CorrectionKey, corrections: &[CorrectionEntry]) {
        let rows = corrections
            .iter()
            .map(|c| [c.freq, c.magnitude, c.phase_deg])
            .collect();
        if self.entries.insert(key.to_key_string(), rows).is_some() {
            info!("replaced corrections for {}", key.to_key_string());
        }
    }

    /// Rewrite the backing file atomically.
    pub fn save(&self) -> Result<(), PotentiostatError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &self.entries)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        debug!("saved {} corrections to {}", self.entries.len(), self.path.display());
        Ok(())
    }
}
