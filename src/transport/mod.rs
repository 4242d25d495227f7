//! Byte-stream transport abstraction over the receiver serial line
//!
//! The GNSS receiver is a framed byte stream: NMEA sentences flow out,
//! correction frames flow back in. Everything above this module works
//! against the [`Transport`] trait so the reader thread can run unchanged
//! over real hardware or a scripted mock.

mod mock;
mod serial;

pub use mock::MockTransport;
pub use serial::SerialTransport;

use crate::error::Result;

/// Transport trait for receiver communication
pub trait Transport: Send {
    /// Read available bytes into the buffer; returns 0 on timeout
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write bytes (correction frames) to the receiver
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush pending writes
    fn flush(&mut self) -> Result<()>;
}
