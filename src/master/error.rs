use crate::error::ErrorKind;

/// Errors of the lifecycle supervisor
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    /// Registration is write-once per name
    #[error("A component named '{0}' is already registered")]
    AlreadyRegistered(String),

    /// Supervisor timing that cannot be turned into a duration
    #[error("Invalid master settings: {0}")]
    InvalidParameters(String),

    /// A component failed to return to its ready state after an abort
    #[error("Component '{name}' could not get ready: {reason}")]
    NotReady {
        /// Registry name
        name: String,
        /// Underlying failure
        reason: String,
    },

    /// Supervisor thread could not be started
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl MasterError {
    /// Broad category of the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MasterError::AlreadyRegistered(_) | MasterError::InvalidParameters(_) => {
                ErrorKind::InvalidParameters
            }
            MasterError::NotReady { .. } => ErrorKind::DeviceUnavailable,
            MasterError::IoError(_) => ErrorKind::Io,
        }
    }
}
