use crate::error::ErrorKind;

/// Errors that can occur while building a multi-sine waveform
#[derive(Debug, thiserror::Error)]
pub enum WaveformError {
    /// Frequency range, point count or amplitude violate a precondition
    #[error("Invalid waveform parameters: {0}")]
    InvalidParameters(String),

    /// I/O error while writing or reading a template file
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl WaveformError {
    /// Broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WaveformError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            WaveformError::IoError(_) => ErrorKind::Io,
        }
    }
}
