//! Receiver thread: owns the serial transport end to end
//!
//! One thread owns the port. NMEA lines flow out of it into the sample
//! composer and the position store; correction frames arrive over a bounded
//! channel and are written back to the receiver between reads. Keeping both
//! directions on one thread means no lock is ever held across serial I/O.
//!
//! Stall handling: when no valid sentence has arrived for the configured
//! window, a synthetic [`StreamEvent::Stalled`] is published (no position is
//! fabricated); the next valid sentence publishes [`StreamEvent::Recovered`].

use super::nmea::{NmeaError, ParserStats, SampleComposer, Sentence};
use crate::position::PositionStore;
use crate::telemetry::SessionMetrics;
use crate::transport::Transport;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Receiver liveness window; a quiet line this long counts as a read timeout
const LIVENESS_WINDOW: Duration = Duration::from_secs(1);

/// Longest sentence we accept before declaring the line buffer garbage
const MAX_LINE_LEN: usize = 1024;

/// Stream health transitions published to the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// No valid sentence for longer than the stall window
    Stalled,
    /// A valid sentence arrived after a stall
    Recovered,
}

/// The receiver thread state and loop.
pub struct ReceiverThread {
    transport: Box<dyn Transport>,
    composer: SampleComposer,
    store: Arc<PositionStore>,
    corrections_rx: Receiver<Vec<u8>>,
    events_tx: Sender<StreamEvent>,
    stats: Arc<Mutex<ParserStats>>,
    metrics: Arc<SessionMetrics>,
    shutdown: Arc<AtomicBool>,
    stream_stale: Duration,

    line_buf: Vec<u8>,
    last_valid: Option<Instant>,
    last_bytes: Instant,
    stalled: bool,
}

impl ReceiverThread {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Box<dyn Transport>,
        store: Arc<PositionStore>,
        corrections_rx: Receiver<Vec<u8>>,
        events_tx: Sender<StreamEvent>,
        stats: Arc<Mutex<ParserStats>>,
        metrics: Arc<SessionMetrics>,
        shutdown: Arc<AtomicBool>,
        stream_stale: Duration,
    ) -> Self {
        Self {
            transport,
            composer: SampleComposer::new(),
            store,
            corrections_rx,
            events_tx,
            stats,
            metrics,
            shutdown,
            stream_stale,
            line_buf: Vec::with_capacity(128),
            last_valid: None,
            last_bytes: Instant::now(),
            stalled: false,
        }
    }

    /// Main loop; returns when shutdown is signaled.
    pub fn run(&mut self) {
        log::info!("Receiver thread started");

        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.service(Instant::now()) {
                log::error!("Receiver I/O error: {}", e);
                std::thread::sleep(Duration::from_millis(100));
            }
        }

        log::info!("Receiver thread exiting");
    }

    /// One pass: forward corrections, read, parse, track stalls.
    fn service(&mut self, now: Instant) -> crate::error::Result<()> {
        self.forward_corrections();

        let mut buf = [0u8; 512];
        let n = self.transport.read(&mut buf)?;

        if n > 0 {
            self.last_bytes = now;
            self.consume_bytes(&buf[..n], now);
        } else if now.saturating_duration_since(self.last_bytes) >= LIVENESS_WINDOW {
            self.last_bytes = now;
            self.stats.lock().read_timeouts += 1;
        }

        // A GGA whose companion never arrived still has to go out
        if let Some(sample) = self.composer.poll(now) {
            self.store.update(sample);
        }

        self.check_stall(now);
        Ok(())
    }

    fn forward_corrections(&mut self) {
        for frame in self.corrections_rx.try_iter() {
            if let Err(e) = self
                .transport
                .write(&frame)
                .and_then(|_| self.transport.flush())
            {
                log::warn!("Failed to forward correction frame: {}", e);
                return;
            }
            log::trace!("Forwarded {} correction bytes to receiver", frame.len());
        }
    }

    fn consume_bytes(&mut self, bytes: &[u8], now: Instant) {
        for &b in bytes {
            if b == b'\n' {
                let line = String::from_utf8_lossy(&self.line_buf).into_owned();
                self.line_buf.clear();
                self.handle_line(line.trim_end_matches('\r'), now);
            } else {
                self.line_buf.push(b);
                if self.line_buf.len() > MAX_LINE_LEN {
                    // Binary garbage on the line; resync at the next newline
                    self.line_buf.clear();
                    self.stats.lock().malformed += 1;
                }
            }
        }
    }

    fn handle_line(&mut self, line: &str, now: Instant) {
        if line.is_empty() {
            return;
        }

        match Sentence::parse(line) {
            Ok(sentence) => {
                {
                    let mut stats = self.stats.lock();
                    stats.accepted += 1;
                    if let Sentence::Gga(gga) = &sentence {
                        if !gga.quality_known {
                            stats.unknown_quality += 1;
                        }
                    }
                }

                if let Sentence::Gga(gga) = &sentence {
                    if gga.position.is_some() {
                        self.store.set_raw_gga(gga.raw.clone());
                    }
                }

                self.last_valid = Some(now);
                if self.stalled {
                    self.stalled = false;
                    let _ = self.events_tx.try_send(StreamEvent::Recovered);
                    log::info!("Receiver stream recovered");
                }

                if let Some(sample) = self.composer.ingest(sentence, now) {
                    self.store.update(sample);
                }
            }
            Err(e) => {
                let mut stats = self.stats.lock();
                match e {
                    NmeaError::Checksum { .. } => stats.checksum_failures += 1,
                    NmeaError::OutOfRange(_) => stats.rejected_out_of_range += 1,
                    NmeaError::Framing | NmeaError::BadField(_) => stats.malformed += 1,
                }
                let dropped = stats.checksum_failures + stats.malformed;
                drop(stats);
                if dropped % 10 == 1 {
                    log::debug!("Dropped sentence ({}): {}", e, line);
                }
            }
        }
    }

    fn check_stall(&mut self, now: Instant) {
        if self.stalled {
            return;
        }
        if let Some(last) = self.last_valid {
            if now.saturating_duration_since(last) > self.stream_stale {
                self.stalled = true;
                self.metrics.add_stream_stall();
                let _ = self.events_tx.try_send(StreamEvent::Stalled);
                log::warn!(
                    "Receiver stream stalled ({} ms without a valid sentence)",
                    self.stream_stale.as_millis()
                );
            }
        }
    }
}
