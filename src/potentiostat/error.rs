use crate::error::ErrorKind;

/// Errors that can occur while driving the potentiostat
#[derive(Debug, thiserror::Error)]
pub enum PotentiostatError {
    /// The vendor inbox/outbox files cannot be used
    #[error("Potentiostat unavailable: {0}")]
    DeviceUnavailable(String),

    /// Measurement parameters violate a precondition
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// A run was requested while another measurement is in progress
    #[error("A measurement is already running")]
    Busy,

    /// The vendor did not reply with the expected prefix in time
    #[error("No '{prefix}' reply within {timeout_s:.1} s")]
    Timeout {
        /// Expected reply prefix
        prefix: String,
        /// Wait that elapsed (s)
        timeout_s: f64,
    },

    /// The measurement ended without the vendor reporting idle
    #[error("Measurement failed: {0}")]
    MeasurementFailed(String),

    /// The measurement was cancelled
    #[error("Measurement aborted")]
    Aborted,

    /// A vendor export file could not be decoded
    #[error("Invalid export file: {0}")]
    InvalidExport(String),

    /// I/O error on the protocol or export files
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error reading an ASCII export
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// Error reading or writing the correction table
    #[error("JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Waveform generation failed
    #[error("Waveform error: {0}")]
    WaveformError(#[from] crate::waveform::WaveformError),

    /// Exported data did not form a valid record
    #[error("Data error: {0}")]
    ExperimentError(#[from] crate::experiment::ExperimentError),

    /// Live current capture failed
    #[error("ADC error: {0}")]
    AdcError(#[from] crate::adc::AdcError),
}

impl PotentiostatError {
    /// Broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PotentiostatError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            PotentiostatError::InvalidParameters(_) | PotentiostatError::Busy => {
                ErrorKind::InvalidParameters
            }
            PotentiostatError::Timeout { .. } => ErrorKind::ProtocolTimeout,
            PotentiostatError::MeasurementFailed(_) => ErrorKind::MeasurementFailed,
            PotentiostatError::Aborted => ErrorKind::Aborted,
            PotentiostatError::WaveformError(e) => e.kind(),
            PotentiostatError::ExperimentError(e) => e.kind(),
            PotentiostatError::AdcError(e) => e.kind(),
            PotentiostatError::InvalidExport(_)
            | PotentiostatError::IoError(_)
            | PotentiostatError::CsvError(_)
            | PotentiostatError::SerdeJsonError(_) => ErrorKind::Io,
        }
    }
}
