//! Platform back end for USB-HID devices.
//!
//! HID devices are reached through hidraw nodes, so only Linux has a real
//! implementation. Other platforms get a stub that reports every device as
//! unavailable. Serial ports go through `serialport` on every platform.

#[cfg(target_os = "linux")]
#[path = "linux.rs"]
/// Platform-specific HID implementation.
pub mod imp;

#[cfg(not(target_os = "linux"))]
#[path = "stub.rs"]
/// Platform-specific HID implementation.
pub mod imp;
