//! # Experiment data model
//!
//! An [`Experiment`] is one scan session: an `n × n` grid of [`Point`]s,
//! the traversal order the probe follows, a settings snapshot and the
//! metadata needed to persist it.
//!
//! ## Grid layout
//!
//! The grid is stored row-major as `grid[j][i]`: scan order entry `(i, j)`
//! lands in row `j`, column `i`. Every accessor in this module takes
//! `(i, j)` and performs the transposition itself.
//!
//! ## Persistence
//!
//! Experiments are written as a single `.secmdata` ZIP container (see
//! [`container`]) and can be exported to per-pixel text files with
//! [`Experiment::save_to_folder`]:
//!
//! ```text
//! 00_02_Voltammogram.asc       t, V, I
//! 01_02_0_Voltammogram.asc     composite member 0
//! 01_02_1_Spectrum.asc         composite member 1, raw
//! 01_02_1_Impedance.asc        composite member 1, f, Re(Z), Im(Z)
//! ```

mod analysis;
pub mod container;
mod error;
mod export;
mod float;
mod heatmap;
mod point;
mod settings;
mod spectrum;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use analysis::{
    builtin as builtin_analysis, estimate_formal_potential, Analysis, ChargePassed,
    FormalPotential, PeakCurrent,
};
pub use container::{SECM_EXTENSION, SECM_MIMETYPE};
pub use error::ExperimentError;
pub use heatmap::HeatmapKind;
pub use point::{Composite, EmptyPoint, Location, Point, StreamBuffer, Voltammogram};
pub use settings::{SettingValue, Settings};
pub use spectrum::{derive as derive_impedance, CorrectionEntry, ImpedanceData, Spectrum};

/// One stop of a scan: grid indices and piezo XY in micrometers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    /// Column index
    pub i: usize,
    /// Row index
    pub j: usize,
    /// Piezo X (µm)
    pub x: f64,
    /// Piezo Y (µm)
    pub y: f64,
}

/// A scan session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    /// Unique identifier
    pub id: Uuid,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Side length of the scanned square (µm)
    pub length: f64,
    /// Grid side (points per row)
    pub size: usize,
    /// XY coordinates in visiting order (µm)
    pub points: Vec<[f64; 2]>,
    /// Grid indices `(i, j)` in visiting order
    pub order: Vec<[usize; 2]>,
    grid: Vec<Vec<Point>>,
    #[serde(skip)]
    settings: Settings,
    #[serde(skip)]
    path: Option<PathBuf>,
    #[serde(skip)]
    saved: bool,
}

impl Experiment {
    /// Blank experiment over the cells visited by `plan`.
    ///
    /// Every visited cell gets an [`EmptyPoint`] at its planned position;
    /// cells outside a masked plan keep a placeholder at the origin.
    pub fn new(length: f64, size: usize, plan: &[ScanPoint]) -> Result<Self, ExperimentError> {
        if size == 0 {
            return Err(ExperimentError::InvalidData(
                "grid size must be at least 1".to_string(),
            ));
        }
        let mut grid = vec![vec![Point::default(); size]; size];
        for p in plan {
            if p.i >= size || p.j >= size {
                return Err(ExperimentError::OutOfBounds { i: p.i, j: p.j, size });
            }
            grid[p.j][p.i] = Point::empty_at(Location::new(p.x, p.y, 0.0));
        }
        let experiment = Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            length,
            size,
            points: plan.iter().map(|p| [p.x, p.y]).collect(),
            order: plan.iter().map(|p| [p.i, p.j]).collect(),
            grid,
            settings: Settings::default(),
            path: None,
            saved: false,
        };
        experiment.validate()?;
        debug!(
            "new {}x{} experiment over {} µm with {} points",
            size,
            size,
            length,
            plan.len()
        );
        Ok(experiment)
    }

    /// Check the geometry invariants.
    pub fn validate(&self) -> Result<(), ExperimentError> {
        let n = self.size;
        if self.grid.len() != n || self.grid.iter().any(|row| row.len() != n) {
            return Err(ExperimentError::InvalidData(format!(
                "grid is not {}x{}",
                n, n
            )));
        }
        if self.points.len() != self.order.len() {
            return Err(ExperimentError::InvalidData(format!(
                "{} points but {} order entries",
                self.points.len(),
                self.order.len()
            )));
        }
        if self.order.len() > n * n {
            return Err(ExperimentError::InvalidData(format!(
                "{} order entries exceed {} cells",
                self.order.len(),
                n * n
            )));
        }
        let mut seen = vec![false; n * n];
        for &[i, j] in &self.order {
            if i >= n || j >= n {
                return Err(ExperimentError::OutOfBounds { i, j, size: n });
            }
            if std::mem::replace(&mut seen[j * n + i], true) {
                return Err(ExperimentError::InvalidData(format!(
                    "cell ({}, {}) visited twice",
                    i, j
                )));
            }
        }
        Ok(())
    }

    /// The scan plan as stored.
    pub fn scan_plan(&self) -> Vec<ScanPoint> {
        self.order
            .iter()
            .zip(&self.points)
            .map(|(&[i, j], &[x, y])| ScanPoint { i, j, x, y })
            .collect()
    }

    /// Rows of the grid, `grid[j][i]`.
    pub fn grid(&self) -> &[Vec<Point>] {
        &self.grid
    }

    /// Store `point` at cell `(i, j)`.
    pub fn set_datapoint(&mut self, (i, j): (usize, usize), point: Point) -> Result<(), ExperimentError> {
        let size = self.size;
        let cell = self
            .grid
            .get_mut(j)
            .and_then(|row| row.get_mut(i))
            .ok_or(ExperimentError::OutOfBounds { i, j, size })?;
        *cell = point;
        self.saved = false;
        Ok(())
    }

    /// Point at cell `(i, j)`.
    pub fn get_datapoint(&self, (i, j): (usize, usize)) -> Option<&Point> {
        self.grid.get(j).and_then(|row| row.get(i))
    }

    /// Scalar map `[j][i]` of `kind`; `sub` selects a composite member.
    pub fn get_heatmap_data(&self, kind: &HeatmapKind, sub: Option<usize>) -> Vec<Vec<f64>> {
        self.grid
            .iter()
            .map(|row| {
                row.iter()
                    .map(|point| match sub {
                        Some(k) => point.sub(k).map_or(0.0, |p| p.scalar(kind)),
                        None => point.scalar(kind),
                    })
                    .collect()
            })
            .collect()
    }

    /// Cell closest to `(x, y)` in the XY plane; the first in row-major
    /// order wins ties.
    pub fn get_nearest_datapoint(&self, x: f64, y: f64) -> Option<((usize, usize), &Point)> {
        let mut best: Option<((usize, usize), &Point, f64)> = None;
        for (j, row) in self.grid.iter().enumerate() {
            for (i, point) in row.iter().enumerate() {
                let distance = point.loc().xy_distance(x, y);
                if best.map_or(true, |(_, _, d)| distance < d) {
                    best = Some(((i, j), point, distance));
                }
            }
        }
        best.map(|(cell, point, _)| (cell, point))
    }

    /// Run `analysis` on every point, memoizing results under its key.
    ///
    /// Composites are analysed through their first voltammogram member and
    /// the result is lifted onto the composite. Returns the scalar map
    /// `[j][i]`; cells without data read 0.
    pub fn do_analysis(&mut self, analysis: &dyn Analysis) -> Vec<Vec<f64>> {
        let key = analysis.key();
        let mut changed = false;
        let result = self
            .grid
            .iter_mut()
            .map(|row| {
                row.iter_mut()
                    .map(|point| memoize(point, analysis, &key, &mut changed))
                    .collect()
            })
            .collect();
        if changed {
            self.saved = false;
        }
        result
    }

    /// Largest number of measurements stored at one location.
    pub fn max_points_per_loc(&self) -> usize {
        self.grid
            .iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .map(Point::count)
            .max()
            .unwrap_or(0)
    }

    /// Number of cells holding a measurement.
    pub fn non_empty_count(&self) -> usize {
        self.grid.iter().flatten().filter(|p| !p.is_empty()).count()
    }

    /// Settings snapshot.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings snapshot.
    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
        self.saved = false;
    }

    /// Whether every mutation has been persisted.
    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Path of the last save or load.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Default container path in the system temp directory.
    pub fn default_save_path(&self) -> PathBuf {
        let short_id = self.id.simple().to_string();
        std::env::temp_dir().join("secm").join(format!(
            "{}_{}.{}",
            self.timestamp.format("%Y%m%d_%H%M%S"),
            &short_id[..8],
            SECM_EXTENSION
        ))
    }

    /// Persist to the current path, or to [`Experiment::default_save_path`].
    pub fn save(&mut self) -> Result<PathBuf, ExperimentError> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => self.default_save_path(),
        };
        self.save_as(&path)?;
        Ok(path)
    }

    /// Persist to `path` (the `.secmdata` extension is added when missing)
    /// and remember it for later saves.
    pub fn save_as<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ExperimentError> {
        let mut path = path.as_ref().to_path_buf();
        if path.extension().map_or(true, |e| e != SECM_EXTENSION) {
            path.set_extension(SECM_EXTENSION);
        }
        container::write_container(&path, self)?;
        info!(
            "saved experiment ({} of {} cells measured) to {}",
            self.non_empty_count(),
            self.size * self.size,
            path.display()
        );
        self.path = Some(path);
        self.saved = true;
        Ok(())
    }

    /// Load a `.secmdata` container.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ExperimentError> {
        container::read_container(path.as_ref())
    }

    /// Export every measured cell as text files named `ii_jj_<Kind>.asc`.
    pub fn save_to_folder<P: AsRef<Path>>(&self, folder: P) -> Result<Vec<PathBuf>, ExperimentError> {
        let folder = folder.as_ref();
        std::fs::create_dir_all(folder)?;
        let mut written = Vec::new();
        for (j, row) in self.grid.iter().enumerate() {
            for (i, point) in row.iter().enumerate() {
                let stem = format!("{:02}_{:02}", i, j);
                written.extend(export::export_point(folder, &stem, point)?);
            }
        }
        info!("exported {} files to {}", written.len(), folder.display());
        Ok(written)
    }
}

fn memoize(point: &mut Point, analysis: &dyn Analysis, key: &str, changed: &mut bool) -> f64 {
    fn run(
        memo: &mut std::collections::BTreeMap<String, f64>,
        key: &str,
        changed: &mut bool,
        compute: impl FnOnce() -> f64,
    ) -> f64 {
        if let Some(&value) = memo.get(key) {
            return value;
        }
        let value = compute();
        memo.insert(key.to_string(), value);
        *changed = true;
        value
    }

    match point {
        Point::Voltammogram(cv) => run(&mut cv.analysis, key, changed, || {
            analysis.compute(&cv.t, &cv.v, &cv.i)
        }),
        Point::Spectrum(spectrum) => run(&mut spectrum.analysis, key, changed, || {
            analysis.compute(&spectrum.t, &spectrum.v, &spectrum.i)
        }),
        Point::Composite(composite) => {
            let lifted = composite.children.iter_mut().find_map(|child| match child {
                Point::Voltammogram(cv) => Some(run(&mut cv.analysis, key, changed, || {
                    analysis.compute(&cv.t, &cv.v, &cv.i)
                })),
                _ => None,
            });
            match lifted {
                Some(value) => {
                    if composite.analysis.insert(key.to_string(), value) != Some(value) {
                        *changed = true;
                    }
                    value
                }
                None => 0.0,
            }
        }
        Point::Empty(_) | Point::Stream(_) => 0.0,
    }
}
