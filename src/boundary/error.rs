use crate::error::ErrorKind;

/// Errors that can occur while reading user parameters
#[derive(Debug, thiserror::Error)]
pub enum ParameterError {
    /// A required parameter has no value
    #[error("Missing parameter: {0}")]
    Missing(String),

    /// A parameter value cannot be converted
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        /// Dotted parameter key
        key: String,
        /// Raw value as provided
        value: String,
        /// What was expected
        reason: String,
    },

    /// The parameter file is not valid TOML
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl ParameterError {
    /// Broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidParameters
    }

    pub(crate) fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        ParameterError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
