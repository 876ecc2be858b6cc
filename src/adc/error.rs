use crate::error::ErrorKind;

/// Errors that can occur while configuring or streaming the ADC
#[derive(Debug, thiserror::Error)]
pub enum AdcError {
    /// The serial port could not be opened
    #[error("ADC unavailable: {0}")]
    DeviceUnavailable(String),

    /// Channel count, packet size or rate outside what the device accepts
    #[error("Invalid ADC parameters: {0}")]
    InvalidParameters(String),

    /// Serial I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The captured samples could not form a record
    #[error("Capture error: {0}")]
    CaptureError(#[from] crate::experiment::ExperimentError),
}

impl AdcError {
    /// Broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdcError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            AdcError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            AdcError::IoError(_) | AdcError::CaptureError(_) => ErrorKind::Io,
        }
    }
}
