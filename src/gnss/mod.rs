//! GNSS receiver stream handling
//!
//! Decodes the line-delimited NMEA 0183 stream from the receiver into
//! kinematic samples and feeds correction frames back over the same port.
//!
//! - [`types`]: fix quality, position, and sample data structures
//! - [`nmea`]: sentence parsing and the GGA/VTG sample composer
//! - [`reader`]: the receiver thread owning the serial transport

pub mod nmea;
pub mod reader;
pub mod types;

pub use nmea::{NmeaError, ParserStats, SampleComposer, Sentence};
pub use reader::{ReceiverThread, StreamEvent};
pub use types::{classify_hdop, FixQuality, GnssFix, KinematicSample};
