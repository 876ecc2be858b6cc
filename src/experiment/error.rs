use crate::error::ErrorKind;

/// Errors that can occur while building, querying or persisting an experiment
#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error serializing/deserializing JSON
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Error from the ZIP container library
    #[error("ZIP error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    /// Error writing a per-pixel text export
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// The file is not a valid experiment container
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Arrays or grid geometry violate an invariant
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A recording carries no usable signal, e.g. a dead current channel
    #[error("Degenerate signal: {0}")]
    DegenerateSignal(String),

    /// Grid index outside the experiment
    #[error("Grid index ({i}, {j}) outside a {size}x{size} grid")]
    OutOfBounds {
        /// Column index
        i: usize,
        /// Row index
        j: usize,
        /// Grid side length
        size: usize,
    },
}

impl ExperimentError {
    /// Broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExperimentError::InvalidData(_) | ExperimentError::OutOfBounds { .. } => {
                ErrorKind::InvalidParameters
            }
            ExperimentError::DegenerateSignal(_) => ErrorKind::MeasurementFailed,
            _ => ErrorKind::Io,
        }
    }
}
