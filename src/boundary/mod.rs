//! # Boundary
//!
//! The core never talks to a user interface directly. Parameters come in
//! through a [`ParameterProvider`] and everything the operator should see
//! goes out through an [`EventSink`]. Both are plain traits so the same
//! core serves the command line, a GUI, or a test harness.

mod error;
mod params;
mod sink;


pub use error::ParameterError;
pub use params::{clean, parse_mask, MapParameters, ParameterProvider};
pub use sink::{EventSink, LogSink};
