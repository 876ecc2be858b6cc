use crate::error::ErrorKind;

/// Errors that can occur while driving the coarse stepper
#[derive(Debug, thiserror::Error)]
pub enum MotorError {
    /// No matching USB device could be opened
    #[error("Coarse motor unavailable: {0}")]
    DeviceUnavailable(String),

    /// Text that is not a known controller command
    #[error("Invalid motor command: '{0}'")]
    InvalidCommand(String),

    /// Timing settings that cannot be turned into a duration
    #[error("Invalid motor settings: {0}")]
    InvalidParameters(String),

    /// USB I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl MotorError {
    /// Broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MotorError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            MotorError::InvalidCommand(_) | MotorError::InvalidParameters(_) => {
                ErrorKind::InvalidParameters
            }
            MotorError::IoError(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                ErrorKind::ProtocolTimeout
            }
            MotorError::IoError(_) => ErrorKind::Io,
        }
    }
}
