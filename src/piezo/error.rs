use crate::error::ErrorKind;

/// Errors that can occur while driving the piezo stage
#[derive(Debug, thiserror::Error)]
pub enum PiezoError {
    /// The serial port could not be opened
    #[error("Piezo unavailable: {0}")]
    DeviceUnavailable(String),

    /// Coordinates, step sizes or scan geometry are invalid
    #[error("Invalid piezo parameters: {0}")]
    InvalidParameters(String),

    /// The controller answered with something other than `aw,x,y,z`
    #[error("Invalid position readout: '{0}'")]
    InvalidReadout(String),

    /// Serial I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PiezoError {
    /// Broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PiezoError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            PiezoError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            PiezoError::InvalidReadout(_) | PiezoError::IoError(_) => ErrorKind::Io,
        }
    }
}
