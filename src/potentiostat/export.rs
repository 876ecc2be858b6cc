//! Vendor export files.
//!
//! ASCII exports carry free-form comment and header lines followed by rows
//! of the form
//!
//! ```text
//! idx, t/s, I/A, idx2, V/V
//! ```
//!
//! with one block per sweep. Every sweep restarts its clock at zero, so
//! sweeps are concatenated with a time offset that keeps `t` increasing.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use super::error::PotentiostatError;

/// Export file format requested from the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma separated text, used for single measurements
    Ascii,
    /// MATLAB level 5, used while scanning because it exports faster
    Mat,
}

impl ExportFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Ascii => "asc",
            ExportFormat::Mat => "mat",
        }
    }
}

/// Flat time series read back from an export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportedTrace {
    /// Time (s), strictly increasing
    pub t: Vec<f64>,
    /// Applied voltage (V)
    pub v: Vec<f64>,
    /// Current (A)
    pub i: Vec<f64>,
}

impl ExportedTrace {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.t.len()
    }

    /// True when no samples were read.
    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Append one sweep, shifting its times past the samples already held.
    pub fn append_sweep(&mut self, t: &[f64], v: &[f64], i: &[f64]) {
        let n = t.len().min(v.len()).min(i.len());
        if n == 0 {
            return;
        }
        let offset = match self.t.last() {
            Some(&last) if t[0] <= last => last + self.spacing() - t[0],
            _ => 0.0,
        };
        self.t.extend(t[..n].iter().map(|&x| x + offset));
        self.v.extend_from_slice(&v[..n]);
        self.i.extend_from_slice(&i[..n]);
    }

    fn spacing(&self) -> f64 {
        match self.t.as_slice() {
            [.., a, b] if b > a => b - a,
            _ => 0.0,
        }
    }
}

/// Where the vendor should write an export of `datafile`.
pub fn export_path(datafile: &Path, format: ExportFormat) -> PathBuf {
    datafile.with_extension(format!("export.{}", format.extension()))
}

/// `<data_dir>/<series date>/<series time>.asc`, with characters that are
/// not valid in file names replaced.
pub fn default_save_path(data_dir: &Path, series_date: &str, series_time: &str) -> PathBuf {
    data_dir
        .join(sanitize(series_date))
        .join(format!("{}.{}", sanitize(series_time), ExportFormat::Ascii.extension()))
}

fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// Parse an ASCII export.
pub fn parse_ascii<R: Read>(reader: R) -> Result<ExportedTrace, PotentiostatError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut trace = ExportedTrace::default();
    let (mut t, mut v, mut i) = (Vec::new(), Vec::new(), Vec::new());

    for record in csv_reader.records() {
        let record = record?;
        let row = parse_row(&record);
        match row {
            Some([time, current, voltage]) => {
                if t.last().is_some_and(|&last| time <= last) {
                    trace.append_sweep(&t, &v, &i);
                    t.clear();
                    v.clear();
                    i.clear();
                }
                t.push(time);
                i.push(current);
                v.push(voltage);
            }
            None if !t.is_empty() => {
                trace.append_sweep(&t, &v, &i);
                t.clear();
                v.clear();
                i.clear();
            }
            None => {}
        }
    }
    trace.append_sweep(&t, &v, &i);

    if trace.is_empty() {
        return Err(PotentiostatError::InvalidExport(
            "no data rows in ASCII export".to_string(),
        ));
    }
    Ok(trace)
}

/// `[t, I, V]` of a data row; `None` for comment and header lines.
fn parse_row(record: &csv::StringRecord) -> Option<[f64; 3]> {
    if record.len() < 5 {
        return None;
    }
    let field = |k: usize| record.get(k)?.parse::<f64>().ok().filter(|x| x.is_finite());
    Some([field(1)?, field(2)?, field(4)?])
}

/// Read an ASCII export file.
pub fn read_ascii<P: AsRef<Path>>(path: P) -> Result<ExportedTrace, PotentiostatError> {
    let file = File::open(path)?;
    parse_ascii(BufReader::new(file))
}
