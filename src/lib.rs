//! DishaNav - RTK GNSS waypoint navigation for differential-drive rovers
//!
//! The onboard autonomy core of an outdoor rover: it conditions the NMEA
//! stream from a carrier-phase GNSS receiver, keeps an NTRIP correction
//! session alive, runs the waypoint-following state machine, and turns the
//! resulting drive commands into ramp-limited wheel outputs with an
//! emergency-stop watchdog over everything.
//!
//! ## Architecture
//!
//! One thread per blocking I/O source, one supervisor tick, shared state
//! limited to the latest-position slot and the waypoint queue:
//!
//! - **Receiver thread**: serial NMEA in, correction frames out
//! - **Correction link**: NTRIP session with adaptive position reports and
//!   backoff reconnect
//! - **Supervisor tick** (2 Hz): position → navigator → motor translator
//! - **Motor watchdog** (100 ms): emergency flag and dead-man timeout

pub mod app;
pub mod config;
pub mod error;
pub mod gnss;
pub mod motor;
pub mod nav;
pub mod ntrip;
pub mod position;
pub mod rover;
pub mod telemetry;
pub mod transport;

pub use app::RoverApp;
pub use config::RoverConfig;
pub use error::{Error, Result};
pub use rover::RoverSupervisor;
