use std::fmt;

use super::error::PiezoError;

/// One line of the controller protocol (sent with a trailing `\r`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PiezoCommand {
    /// `setk,<ch>,1`: put a channel under remote control
    Remote(u8),
    /// `cloop,<ch>,1`: close the position loop of a channel
    ClosedLoop(u8),
    /// `monwpa,0,1`: report actuator positions
    MonitorPosition,
    /// `setall,x,y,z`: move all axes (controller values)
    SetAll(f64, f64, f64),
    /// `set,2,z`: move Z only (controller value)
    SetZ(f64),
    /// `measure`: request an `aw,x,y,z` readout
    Measure,
}

impl fmt::Display for PiezoCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PiezoCommand::Remote(ch) => write!(f, "setk,{},1", ch),
            PiezoCommand::ClosedLoop(ch) => write!(f, "cloop,{},1", ch),
            PiezoCommand::MonitorPosition => write!(f, "monwpa,0,1"),
            PiezoCommand::SetAll(x, y, z) => write!(f, "setall,{:.3},{:.3},{:.3}", x, y, z),
            PiezoCommand::SetZ(z) => write!(f, "set,2,{:.3}", z),
            PiezoCommand::Measure => write!(f, "measure"),
        }
    }
}

/// Parse an `aw,x,y,z` readout into controller values.
pub fn parse_readout(line: &str) -> Result<[f64; 3], PiezoError> {
    let line = line.trim();
    let mut fields = line.split(',').map(str::trim);
    if fields.next() != Some("aw") {
        return Err(PiezoError::InvalidReadout(line.to_string()));
    }
    let mut xyz = [0.0; 3];
    for slot in xyz.iter_mut() {
        *slot = fields
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| PiezoError::InvalidReadout(line.to_string()))?;
    }
    if fields.next().is_some() {
        return Err(PiezoError::InvalidReadout(line.to_string()));
    }
    Ok(xyz)
}
