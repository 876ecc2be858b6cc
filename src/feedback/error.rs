use crate::error::ErrorKind;

/// Errors that can occur during approaches and scans
#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    /// Approach or scan settings are invalid
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// The probe reached the end of its travel without touching the sample
    #[error("Surface not found: {0}")]
    SurfaceNotFound(String),

    /// The global abort was raised
    #[error("Operation aborted")]
    Aborted,

    /// Piezo stage failure
    #[error("Piezo error: {0}")]
    PiezoError(#[from] crate::piezo::PiezoError),

    /// Current sampler failure
    #[error("ADC error: {0}")]
    AdcError(#[from] crate::adc::AdcError),

    /// Potentiostat failure
    #[error("Potentiostat error: {0}")]
    PotentiostatError(#[from] crate::potentiostat::PotentiostatError),

    /// Coarse stepper failure
    #[error("Motor error: {0}")]
    MotorError(#[from] crate::motor::MotorError),

    /// The experiment grid rejected a point or could not be saved
    #[error("Experiment error: {0}")]
    ExperimentError(#[from] crate::experiment::ExperimentError),

    /// Worker thread could not be started
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl FeedbackError {
    /// Broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FeedbackError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            FeedbackError::SurfaceNotFound(_) => ErrorKind::MeasurementFailed,
            FeedbackError::Aborted => ErrorKind::Aborted,
            FeedbackError::PiezoError(e) => e.kind(),
            FeedbackError::AdcError(e) => e.kind(),
            FeedbackError::PotentiostatError(e) => e.kind(),
            FeedbackError::MotorError(e) => e.kind(),
            FeedbackError::ExperimentError(e) => e.kind(),
            FeedbackError::IoError(_) => ErrorKind::Io,
        }
    }
}
