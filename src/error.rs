//! Error types for DishaNav
//!
//! # Error Recovery Strategies
//!
//! Different error types require different recovery approaches:
//!
//! ## Fatal Errors (Refuse to Start)
//!
//! - **`Config`**: The configuration file is missing a required section or
//!   contains an out-of-range safety value. Fix the configuration and restart.
//!   The supervisor never retries a bad configuration.
//!
//! - **`Serial`** at startup: The receiver port could not be opened. Surfaced
//!   as a fatal status; no silent retries.
//!
//! ## Transient Errors (Count and Continue)
//!
//! - **`Nmea`**: A sentence failed framing, checksum, or field parsing. The
//!   line is dropped and a counter incremented; the stream remains usable.
//!
//! - **`Io`** on the correction link: A single socket read/write failure
//!   triggers the reconnect path with backoff. Navigation continues on
//!   whatever fix class the receiver still produces.
//!
//! ## Session Errors (Autonomous Recovery)
//!
//! - **`Link`**: Handshake rejected or the caster went silent. The link
//!   thread closes the session and reconnects with exponential backoff.
//!
//! ## Safety Errors (Require Explicit Operator Action)
//!
//! - **`Motor`**: The controller is disarmed (emergency stop) or not running.
//!   Drive commands are refused until `clear_emergency()` / `start()`.

use thiserror::Error;

/// Errors that can occur in DishaNav
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("NMEA error: {0}")]
    Nmea(String),

    #[error("Correction link error: {0}")]
    Link(String),

    #[error("Motor error: {0}")]
    Motor(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<crate::gnss::NmeaError> for Error {
    fn from(e: crate::gnss::NmeaError) -> Self {
        Error::Nmea(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
