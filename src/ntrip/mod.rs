//! NTRIP correction link
//!
//! Maintains one long-lived TCP session to the correction caster, forwards
//! the correction stream to the receiver write channel, and reports the
//! rover position back to the caster on an adaptive interval.

mod client;

pub use client::{NtripClient, RECONNECT_CAP};

use serde::Serialize;
use std::time::Instant;

/// Connection state of the correction link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Streaming,
}

/// Link health, shared with the supervisor.
///
/// Exactly one session (or connection attempt) exists at any instant: the
/// link thread owns the socket end to end, so concurrent reconnect requests
/// cannot arise by construction.
#[derive(Debug, Clone)]
pub struct LinkMetrics {
    pub state: LinkState,
    pub disconnects: u32,
    pub bytes_down: u64,
    pub last_handshake_ms: Option<u64>,
    pub connected_since: Option<Instant>,
}

/// Serializable view of [`LinkMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct LinkSnapshot {
    pub state: LinkState,
    pub disconnects: u32,
    pub bytes_down: u64,
    pub last_handshake_ms: Option<u64>,
    pub connected_for_s: Option<f64>,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self {
            state: LinkState::Disconnected,
            disconnects: 0,
            bytes_down: 0,
            last_handshake_ms: None,
            connected_since: None,
        }
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            state: self.state,
            disconnects: self.disconnects,
            bytes_down: self.bytes_down,
            last_handshake_ms: self.last_handshake_ms,
            connected_for_s: self.connected_since.map(|t| t.elapsed().as_secs_f64()),
        }
    }
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}
