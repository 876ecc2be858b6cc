use std::fmt;
use std::str::FromStr;

use super::error::MotorError;

/// Controller command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorCommand {
    /// `<axis>PR<steps>`: relative move of one driver
    Relative {
        /// Driver number (1-based)
        axis: u8,
        /// Signed step count
        steps: i64,
    },
    /// `AB`: abort all motion
    Abort,
    /// `VE?`: firmware version query
    Version,
}

impl MotorCommand {
    /// Whether the controller answers this command.
    pub fn expects_reply(&self) -> bool {
        matches!(self, MotorCommand::Version)
    }
}

impl fmt::Display for MotorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotorCommand::Relative { axis, steps } => write!(f, "{}PR{}", axis, steps),
            MotorCommand::Abort => write!(f, "AB"),
            MotorCommand::Version => write!(f, "VE?"),
        }
    }
}

impl FromStr for MotorCommand {
    type Err = MotorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let invalid = || MotorError::InvalidCommand(text.to_string());
        match text.to_ascii_uppercase().as_str() {
            "AB" => return Ok(MotorCommand::Abort),
            "VE?" => return Ok(MotorCommand::Version),
            _ => {}
        }
        let split = text.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        let (axis, rest) = text.split_at(split);
        let axis: u8 = axis.parse().map_err(|_| invalid())?;
        let steps = rest
            .strip_prefix("PR")
            .or_else(|| rest.strip_prefix("pr"))
            .ok_or_else(invalid)?;
        let steps = if steps.is_empty() {
            0
        } else {
            steps.parse().map_err(|_| invalid())?
        };
        Ok(MotorCommand::Relative { axis, steps })
    }
}
