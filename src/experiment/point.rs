//! Per-pixel data entities.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::ExperimentError;
use super::heatmap::{scalar_from_echem, HeatmapKind};
use super::spectrum::Spectrum;

/// Probe position in micrometers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    /// X (µm)
    #[serde(with = "crate::experiment::float::scalar")]
    pub x: f64,
    /// Y (µm)
    #[serde(with = "crate::experiment::float::scalar")]
    pub y: f64,
    /// Z (µm)
    #[serde(with = "crate::experiment::float::scalar")]
    pub z: f64,
}

impl Location {
    /// Build a location from its three coordinates.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance in the XY plane.
    pub fn xy_distance(&self, x: f64, y: f64) -> f64 {
        ((self.x - x).powi(2) + (self.y - y).powi(2)).sqrt()
    }
}

fn default_gain() -> f64 {
    1.0
}

pub(crate) fn check_arrays(t: &[f64], v: &[f64], i: &[f64]) -> Result<(), ExperimentError> {
    if t.len() != v.len() || t.len() != i.len() {
        return Err(ExperimentError::InvalidData(format!(
            "array lengths differ: t={}, V={}, I={}",
            t.len(),
            v.len(),
            i.len()
        )));
    }
    if let Some(w) = t.windows(2).find(|w| !(w[1] > w[0])) {
        return Err(ExperimentError::InvalidData(format!(
            "time is not strictly increasing ({} then {})",
            w[0], w[1]
        )));
    }
    Ok(())
}

/// Grid placeholder created before a pixel is measured.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EmptyPoint {
    /// Planned position
    pub loc: Location,
    /// Heatmap value (always zero)
    #[serde(with = "crate::experiment::float::scalar")]
    pub value: f64,
}

impl EmptyPoint {
    /// Placeholder at `loc`.
    pub fn at(loc: Location) -> Self {
        Self { loc, value: 0.0 }
    }
}

/// A time-resolved voltage/current record (CV, CA and similar).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voltammogram {
    /// Measurement position
    pub loc: Location,
    /// Volts-to-amps factor of the recorded current
    #[serde(default = "default_gain", with = "crate::experiment::float::scalar")]
    pub gain: f64,
    /// Time (s), strictly increasing
    #[serde(with = "crate::experiment::float::vec")]
    pub t: Vec<f64>,
    /// Applied potential (V)
    #[serde(with = "crate::experiment::float::vec")]
    pub v: Vec<f64>,
    /// Current (A)
    #[serde(with = "crate::experiment::float::vec")]
    pub i: Vec<f64>,
    /// Memoized analysis results keyed by analysis name
    #[serde(default, with = "crate::experiment::float::map")]
    pub analysis: BTreeMap<String, f64>,
}

impl Voltammogram {
    /// Build a voltammogram, checking array lengths and time ordering.
    pub fn new(
        loc: Location,
        t: Vec<f64>,
        v: Vec<f64>,
        i: Vec<f64>,
    ) -> Result<Self, ExperimentError> {
        check_arrays(&t, &v, &i)?;
        Ok(Self {
            loc,
            gain: 1.0,
            t,
            v,
            i,
            analysis: BTreeMap::new(),
        })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.t.len()
    }

    /// Whether the record holds no samples.
    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }
}

/// Growable live capture written by the ADC poller.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamBuffer {
    /// Position at which the capture was started
    pub loc: Location,
    /// Volts-to-amps factor applied to the current channel
    #[serde(default = "default_gain", with = "crate::experiment::float::scalar")]
    pub gain: f64,
    /// Host time (s) of each sample
    #[serde(with = "crate::experiment::float::vec")]
    pub t: Vec<f64>,
    /// Voltage channel (V)
    #[serde(with = "crate::experiment::float::vec")]
    pub v: Vec<f64>,
    /// Current channel, raw monitor volts
    #[serde(with = "crate::experiment::float::vec")]
    pub i: Vec<f64>,
}

impl StreamBuffer {
    /// Empty buffer with the given current gain.
    pub fn with_gain(gain: f64) -> Self {
        Self {
            gain,
            ..Default::default()
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.t.len()
    }

    /// Whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Append one block of samples.
    pub fn extend(&mut self, t: &[f64], v: &[f64], i: &[f64]) {
        self.t.extend_from_slice(t);
        self.v.extend_from_slice(v);
        self.i.extend_from_slice(i);
    }

    /// Current of sample `index` in amps.
    pub fn current(&self, index: usize) -> Option<f64> {
        self.i.get(index).map(|raw| raw * self.gain)
    }

    /// The last `n` currents in amps, oldest first.
    pub fn last_currents(&self, n: usize) -> Vec<f64> {
        let start = self.i.len().saturating_sub(n);
        self.i[start..].iter().map(|raw| raw * self.gain).collect()
    }

    /// Mean current (A) over samples no older than `window` seconds
    /// before the newest sample.
    pub fn mean_current(&self, window: f64) -> Option<f64> {
        let newest = *self.t.last()?;
        let start = self.t.partition_point(|&t| t < newest - window);
        let slice = &self.i[start..];
        if slice.is_empty() {
            return None;
        }
        Some(slice.iter().sum::<f64>() / slice.len() as f64 * self.gain)
    }

    /// Resample timestamps uniformly between the first and last host time.
    ///
    /// Per-block interpolation leaves steps at block boundaries; the
    /// uniform grid removes them while keeping the total span.
    pub fn reset_times(&mut self) {
        let n = self.t.len();
        if n < 2 {
            return;
        }
        let first = self.t[0];
        let last = self.t[n - 1];
        let step = (last - first) / (n - 1) as f64;
        for (k, t) in self.t.iter_mut().enumerate() {
            *t = first + k as f64 * step;
        }
    }

    /// Convert to a voltammogram with currents in amps.
    pub fn into_voltammogram(self) -> Result<Voltammogram, ExperimentError> {
        let gain = self.gain;
        let i = self.i.iter().map(|raw| raw * gain).collect();
        let mut cv = Voltammogram::new(self.loc, self.t, self.v, i)?;
        cv.gain = gain;
        Ok(cv)
    }

    /// Convert to a spectrum over `applied_freqs` with currents in amps.
    pub fn into_spectrum(self, applied_freqs: Vec<f64>) -> Result<Spectrum, ExperimentError> {
        let gain = self.gain;
        let i = self.i.iter().map(|raw| raw * gain).collect();
        let mut spectrum = Spectrum::new(self.loc, self.t, self.v, i, applied_freqs)?;
        spectrum.gain = gain;
        Ok(spectrum)
    }
}

/// Several measurements taken at one location, in acquisition order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Composite {
    /// Shared position
    pub loc: Location,
    /// Sub-measurements
    pub children: Vec<Point>,
    /// Analysis results lifted from the first voltammogram child
    #[serde(default, with = "crate::experiment::float::map")]
    pub analysis: BTreeMap<String, f64>,
}

impl Composite {
    /// Composite of `children` at `loc`.
    pub fn new(loc: Location, children: Vec<Point>) -> Self {
        Self {
            loc,
            children,
            analysis: BTreeMap::new(),
        }
    }

    /// The first sub-point, which answers default queries.
    pub fn first(&self) -> Option<&Point> {
        self.children.first()
    }
}

/// One grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Point {
    /// Not yet measured
    Empty(EmptyPoint),
    /// CV/CA record
    Voltammogram(Voltammogram),
    /// Impedance record
    Spectrum(Spectrum),
    /// Live capture in progress
    Stream(StreamBuffer),
    /// Several records at one location
    Composite(Composite),
}

impl Default for Point {
    fn default() -> Self {
        Point::Empty(EmptyPoint::default())
    }
}

impl Point {
    /// Placeholder at `loc`.
    pub fn empty_at(loc: Location) -> Self {
        Point::Empty(EmptyPoint::at(loc))
    }

    /// Position of the measurement.
    pub fn loc(&self) -> Location {
        match self {
            Point::Empty(p) => p.loc,
            Point::Voltammogram(p) => p.loc,
            Point::Spectrum(p) => p.loc,
            Point::Stream(p) => p.loc,
            Point::Composite(p) => p.loc,
        }
    }

    /// Move the point (and every composite member) to `loc`.
    pub fn set_loc(&mut self, loc: Location) {
        match self {
            Point::Empty(p) => p.loc = loc,
            Point::Voltammogram(p) => p.loc = loc,
            Point::Spectrum(p) => p.loc = loc,
            Point::Stream(p) => p.loc = loc,
            Point::Composite(p) => {
                p.loc = loc;
                p.children.iter_mut().for_each(|c| c.set_loc(loc));
            }
        }
    }

    /// Volts-to-amps factor, when the variant carries one.
    pub fn gain(&self) -> Option<f64> {
        match self {
            Point::Voltammogram(p) => Some(p.gain),
            Point::Spectrum(p) => Some(p.gain),
            Point::Stream(p) => Some(p.gain),
            Point::Composite(p) => p.first().and_then(Point::gain),
            Point::Empty(_) => None,
        }
    }

    /// Variant name used in file names and summaries.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Point::Empty(_) => "Empty",
            Point::Voltammogram(_) => "Voltammogram",
            Point::Spectrum(_) => "Spectrum",
            Point::Stream(_) => "Stream",
            Point::Composite(_) => "Composite",
        }
    }

    /// Whether this is a placeholder.
    pub fn is_empty(&self) -> bool {
        matches!(self, Point::Empty(_))
    }

    /// Number of measurements at this location.
    pub fn count(&self) -> usize {
        match self {
            Point::Composite(p) => p.children.len(),
            _ => 1,
        }
    }

    /// Sub-point `index` of a composite; other variants answer index 0 with themselves.
    pub fn sub(&self, index: usize) -> Option<&Point> {
        match self {
            Point::Composite(p) => p.children.get(index),
            other if index == 0 => Some(other),
            _ => None,
        }
    }

    /// Raw `(t, V, I)` arrays; composites answer with their first member.
    pub fn echem_data(&self) -> Option<(&[f64], &[f64], &[f64])> {
        match self {
            Point::Voltammogram(p) => Some((&p.t, &p.v, &p.i)),
            Point::Spectrum(p) => Some((&p.t, &p.v, &p.i)),
            Point::Stream(p) => Some((&p.t, &p.v, &p.i)),
            Point::Composite(p) => p.first().and_then(Point::echem_data),
            Point::Empty(_) => None,
        }
    }

    /// Memoized analysis results stored on this point.
    pub fn analysis(&self) -> Option<&BTreeMap<String, f64>> {
        match self {
            Point::Voltammogram(p) => Some(&p.analysis),
            Point::Spectrum(p) => Some(&p.analysis),
            Point::Composite(p) => Some(&p.analysis),
            Point::Stream(_) | Point::Empty(_) => None,
        }
    }

    /// Heatmap scalar of this point.
    pub fn scalar(&self, kind: &HeatmapKind) -> f64 {
        match (self, kind) {
            (_, HeatmapKind::ZHeight) => self.loc().z,
            (Point::Empty(p), _) => p.value,
            (_, HeatmapKind::Analysis(key)) => self
                .analysis()
                .and_then(|memo| memo.get(key))
                .copied()
                .unwrap_or(0.0),
            (Point::Stream(p), _) => {
                let currents: Vec<f64> = p.i.iter().map(|raw| raw * p.gain).collect();
                scalar_from_echem(kind, &p.t, &p.v, &currents)
            }
            _ => match self.echem_data() {
                Some((t, v, i)) => scalar_from_echem(kind, t, v, i),
                None => 0.0,
            },
        }
    }
}

impl From<Voltammogram> for Point {
    fn from(value: Voltammogram) -> Self {
        Point::Voltammogram(value)
    }
}

impl From<Spectrum> for Point {
    fn from(value: Spectrum) -> Self {
        Point::Spectrum(value)
    }
}

impl From<Composite> for Point {
    fn from(value: Composite) -> Self {
        Point::Composite(value)
    }
}
