//! Byte transports for the serial and USB-HID instruments.
//!
//! Every hardware driver talks to its device through a boxed [`Transport`],
//! which is any `Read + Write + Send` byte stream. Real ports come from
//! [`open_serial`] and [`open_hidraw`]; unit tests substitute a scripted
//! in-memory port.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits};

/// A bidirectional byte stream to an instrument.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send> Transport for T {}

/// Owned transport handle held by the drivers.
pub type BoxedTransport = Box<dyn Transport>;

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Device node, e.g. `/dev/ttyUSB0`.
    pub path: PathBuf,
    /// Baud rate.
    pub baud: u32,
    /// Software (XON/XOFF) flow control.
    pub xonxoff: bool,
    /// Read timeout in seconds; a read returns no data once it elapses.
    pub read_timeout_s: f64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/ttyUSB0"),
            baud: 115_200,
            xonxoff: false,
            read_timeout_s: 0.5,
        }
    }
}

impl SerialSettings {
    /// Read timeout as a [`Duration`]; negative values mean "don't wait".
    pub fn read_timeout(&self) -> io::Result<Duration> {
        crate::config_secs(self.read_timeout_s, 0.0).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("read timeout {} s: {}", self.read_timeout_s, e),
            )
        })
    }

    fn flow_control(&self) -> FlowControl {
        if self.xonxoff {
            FlowControl::Software
        } else {
            FlowControl::None
        }
    }
}

/// Open a serial port in raw 8N1 mode and discard anything already buffered.
///
/// Reads block for at most the configured read timeout and then fail with
/// [`io::ErrorKind::TimedOut`].
pub fn open_serial(settings: &SerialSettings) -> io::Result<BoxedTransport> {
    let timeout = settings.read_timeout()?;
    let port = serialport::new(settings.path.to_string_lossy(), settings.baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(settings.flow_control())
        .timeout(timeout)
        .open()?;
    port.clear(ClearBuffer::All)?;
    log::trace!(
        "opened serial port {} at {} baud",
        settings.path.display(),
        settings.baud
    );
    Ok(Box::new(port))
}

/// Open a hidraw node.
pub fn open_hidraw(path: &Path) -> io::Result<BoxedTransport> {
    Ok(Box::new(crate::sys::imp::open_hidraw(path)?))
}

/// Find hidraw nodes for a USB vendor/product id pair.
pub fn find_hidraw(vendor_id: u16, product_id: u16) -> io::Result<Vec<PathBuf>> {
    crate::sys::imp::find_hidraw(vendor_id, product_id)
}

/// Read bytes until `terminator` (included in the result) or until `timeout`.
///
/// A zero-length read is treated as "no data yet", which is how a port
/// configured with a read timeout reports silence.
pub fn read_until(
    transport: &mut dyn Transport,
    terminator: u8,
    timeout: Duration,
) -> io::Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match transport.read(&mut byte) {
            Ok(1) => {
                line.push(byte[0]);
                if byte[0] == terminator {
                    return Ok(line);
                }
                continue;
            }
            Ok(_) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(e),
        }
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no terminator after {} bytes", line.len()),
            ));
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}


#[cfg(test)]
mod tests {
    use super::mock::ScriptedPort;
    use super::*;

    #[test]
    fn test_read_until_terminator() {
        let (mut port, log) = ScriptedPort::silent(b'\r');
        log.feed(b"aw,1,2,3\rtrailing");
        let line = read_until(&mut port, b'\r', Duration::from_millis(50)).unwrap();
        assert_eq!(line, b"aw,1,2,3\r");
    }

    #[test]
    fn test_read_timeout_keeps_milliseconds() {
        let mut settings = SerialSettings {
            read_timeout_s: 0.05,
            ..SerialSettings::default()
        };
        assert_eq!(settings.read_timeout().unwrap(), Duration::from_millis(50));
        settings.read_timeout_s = -1.0;
        assert_eq!(settings.read_timeout().unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_non_finite_read_timeout_is_rejected() {
        for bad in [f64::INFINITY, f64::NAN] {
            let settings = SerialSettings {
                read_timeout_s: bad,
                ..SerialSettings::default()
            };
            let err = settings.read_timeout().unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
            let err = open_serial(&settings).err().map(|e| e.kind());
            assert_eq!(err, Some(io::ErrorKind::InvalidInput));
        }
    }

    #[test]
    fn test_open_missing_serial_port_fails() {
        let settings = SerialSettings {
            path: PathBuf::from("/nonexistent/ttySECM0"),
            ..SerialSettings::default()
        };
        assert!(open_serial(&settings).is_err());
    }

    #[test]
    fn test_read_until_times_out() {
        let (mut port, log) = ScriptedPort::silent(b'\r');
        log.feed(b"partial");
        let err = read_until(&mut port, b'\r', Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
