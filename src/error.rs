//! Error classification shared by every instrument module.
//!
//! Each module owns a `thiserror` enum describing its own failures. The
//! scan loop and the boundary only care about the broad category of a
//! failure (is the pixel skippable, should the whole scan stop, must the
//! user fix a parameter), so every module error maps onto [`ErrorKind`].

use std::fmt;

/// Broad category of an instrument failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// User-supplied values are malformed or violate a precondition.
    InvalidParameters,
    /// A serial port, USB device or vendor file could not be opened.
    DeviceUnavailable,
    /// A vendor reply did not arrive within its bounded wait.
    ProtocolTimeout,
    /// The vendor reached a terminal state without reporting idle.
    MeasurementFailed,
    /// The global abort flag was observed.
    Aborted,
    /// Any other I/O or decoding failure.
    Io,
}

impl ErrorKind {
    /// Whether a scan may skip the current pixel and continue.
    pub fn is_pixel_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::ProtocolTimeout | ErrorKind::MeasurementFailed | ErrorKind::Io
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidParameters => "invalid parameters",
            ErrorKind::DeviceUnavailable => "device unavailable",
            ErrorKind::ProtocolTimeout => "protocol timeout",
            ErrorKind::MeasurementFailed => "measurement failed",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Io => "I/O error",
        };
        f.write_str(name)
    }
}
