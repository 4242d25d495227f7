//! NTRIP caster session management
//!
//! Protocol: NTRIP v1/v2 style. The handshake is an HTTP-like request with
//! Basic credentials; the caster answers `ICY 200 OK` (v1) or a regular
//! `HTTP/1.x 200` (v2) and then streams opaque correction frames until the
//! connection dies. We forward those frames verbatim to the receiver write
//! channel and send the receiver's own GGA sentence back upstream so
//! network casters can pick the nearest reference station.
//!
//! The GGA interval adapts to fix quality: a fixed RTK solution reports
//! often (the caster uses it to keep the baseline short), a floating or
//! single solution less often, and without any fix we only ping every 30 s.

use super::{LinkMetrics, LinkState};
use crate::config::CasterConfig;
use crate::error::{Error, Result};
use crate::gnss::{FixQuality, KinematicSample};
use crate::position::PositionStore;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use rand::Rng;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Largest downstream chunk forwarded in one write
const CHUNK_SIZE: usize = 4096;

/// Connect timeout for the caster socket
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Write timeout for upstream GGA reports
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Streaming read slice; short so the loop can service the GGA timer
const READ_SLICE_TIMEOUT: Duration = Duration::from_secs(1);

/// Downstream silence after which the session is considered dead
const IDLE_CUTOFF: Duration = Duration::from_secs(60);

/// Reconnect backoff cap
pub const RECONNECT_CAP: Duration = Duration::from_secs(30);

/// NTRIP client thread.
pub struct NtripClient {
    config: CasterConfig,
    corrections_tx: Sender<Vec<u8>>,
    store: Arc<PositionStore>,
    metrics: Arc<Mutex<LinkMetrics>>,
    shutdown: Arc<AtomicBool>,
}

impl NtripClient {
    pub fn new(
        config: CasterConfig,
        corrections_tx: Sender<Vec<u8>>,
        store: Arc<PositionStore>,
        metrics: Arc<Mutex<LinkMetrics>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            corrections_tx,
            store,
            metrics,
            shutdown,
        }
    }

    /// Main loop: connect, stream, reconnect with backoff, forever.
    pub fn run(&mut self) {
        log::info!(
            "Correction link starting for {}:{}/{}",
            self.config.host,
            self.config.port,
            self.config.mountpoint
        );

        let mut backoff = Backoff::new();

        while !self.shutdown.load(Ordering::Relaxed) {
            self.metrics.lock().state = LinkState::Connecting;

            match self.session() {
                Ok(streamed_bytes) => {
                    // A session that actually delivered corrections earns a
                    // fresh backoff schedule
                    if streamed_bytes > 0 {
                        backoff.reset();
                    }
                    log::warn!("Correction session ended ({} bytes)", streamed_bytes);
                }
                Err(e) => {
                    log::warn!("Correction session failed: {}", e);
                }
            }

            {
                let mut metrics = self.metrics.lock();
                metrics.state = LinkState::Disconnected;
                metrics.connected_since = None;
                metrics.disconnects += 1;
            }

            let delay = backoff.next_delay();
            log::info!("Reconnecting to caster in {:.1} s", delay.as_secs_f64());
            self.sleep_interruptible(delay);
        }

        log::info!("Correction link thread exiting");
    }

    /// One full connect-handshake-stream session.
    ///
    /// Returns the number of downstream bytes forwarded before the session
    /// ended; errors describe why it ended abnormally.
    fn session(&mut self) -> Result<u64> {
        let handshake_start = Instant::now();
        let mut stream = self.connect()?;
        let leftover = self.handshake(&mut stream)?;

        let latency = handshake_start.elapsed();
        {
            let mut metrics = self.metrics.lock();
            metrics.state = LinkState::Streaming;
            metrics.connected_since = Some(Instant::now());
            metrics.last_handshake_ms = Some(latency.as_millis() as u64);
        }
        log::info!(
            "Caster accepted {} (handshake {} ms)",
            self.config.mountpoint,
            latency.as_millis()
        );

        let mut session_bytes = 0u64;
        if !leftover.is_empty() {
            session_bytes += leftover.len() as u64;
            self.forward(leftover);
        }

        stream.set_read_timeout(Some(READ_SLICE_TIMEOUT))?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

        let mut buf = [0u8; CHUNK_SIZE];
        let mut last_data = Instant::now();
        let mut last_gga: Option<Instant> = None;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Ok(session_bytes);
            }

            match stream.read(&mut buf) {
                Ok(0) => {
                    return Err(Error::Link("caster closed the connection".to_string()));
                }
                Ok(n) => {
                    last_data = Instant::now();
                    session_bytes += n as u64;
                    self.metrics.lock().bytes_down += n as u64;
                    self.forward(buf[..n].to_vec());
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    if last_data.elapsed() > IDLE_CUTOFF {
                        return Err(Error::Link(format!(
                            "no downstream data for {} s",
                            IDLE_CUTOFF.as_secs()
                        )));
                    }
                }
                Err(e) => return Err(e.into()),
            }

            self.maybe_send_gga(&mut stream, &mut last_gga)?;
        }
    }

    fn connect(&self) -> Result<TcpStream> {
        let address = format!("{}:{}", self.config.host, self.config.port);
        let addr = address
            .to_socket_addrs()
            .map_err(|e| Error::Link(format!("cannot resolve {}: {}", address, e)))?
            .next()
            .ok_or_else(|| Error::Link(format!("no address for {}", address)))?;

        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_read_timeout(Some(CONNECT_TIMEOUT))?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        Ok(stream)
    }

    /// Send the mountpoint request and validate the response line.
    ///
    /// Returns any correction bytes that arrived in the same read as the
    /// response header.
    fn handshake(&self, stream: &mut TcpStream) -> Result<Vec<u8>> {
        let request = build_request(&self.config);
        stream.write_all(request.as_bytes())?;

        let mut buf = [0u8; 1024];
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(Error::Link("caster closed during handshake".to_string()));
        }

        let (accepted, body_start) = parse_handshake(&buf[..n]);
        if !accepted {
            let line = String::from_utf8_lossy(&buf[..n.min(128)]);
            return Err(Error::Link(format!(
                "caster rejected request: {}",
                line.lines().next().unwrap_or("")
            )));
        }

        Ok(buf[body_start..n].to_vec())
    }

    /// Forward a downstream chunk to the receiver write channel.
    ///
    /// The channel is bounded; when the receiver thread cannot keep up we
    /// drop the frame rather than stall the socket. Corrections age out in
    /// seconds anyway.
    fn forward(&self, data: Vec<u8>) {
        for chunk in data.chunks(CHUNK_SIZE) {
            if self.corrections_tx.try_send(chunk.to_vec()).is_err() {
                log::warn!("Correction channel full, dropping {} bytes", chunk.len());
            }
        }
    }

    fn maybe_send_gga(
        &self,
        stream: &mut TcpStream,
        last_gga: &mut Option<Instant>,
    ) -> Result<()> {
        let interval = adaptive_gga_interval(self.store.latest().as_ref());
        let due = match last_gga {
            Some(at) => at.elapsed() >= interval,
            None => true,
        };
        if !due {
            return Ok(());
        }

        // Withhold the report until the receiver has produced a sentence
        let Some(gga) = self.store.raw_gga() else {
            return Ok(());
        };

        stream
            .write_all(format!("{}\r\n", gga).as_bytes())
            .map_err(|e| Error::Link(format!("GGA upstream failed: {}", e)))?;
        *last_gga = Some(Instant::now());
        log::debug!(
            "Sent GGA upstream (next in {:.0} s)",
            interval.as_secs_f64()
        );
        Ok(())
    }

    fn sleep_interruptible(&self, total: Duration) {
        let step = Duration::from_millis(100);
        let deadline = Instant::now() + total;
        while Instant::now() < deadline && !self.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(step);
        }
    }
}

/// Compose the mountpoint request.
fn build_request(config: &CasterConfig) -> String {
    let credentials = BASE64.encode(format!("{}:{}", config.username, config.password));
    format!(
        "GET /{} HTTP/1.0\r\n\
         User-Agent: NTRIP DishaNav/{}\r\n\
         Ntrip-Version: Ntrip/2.0\r\n\
         Authorization: Basic {}\r\n\
         \r\n",
        config.mountpoint,
        env!("CARGO_PKG_VERSION"),
        credentials
    )
}

/// Check the handshake response; returns (accepted, offset of stream body).
fn parse_handshake(response: &[u8]) -> (bool, usize) {
    let text = String::from_utf8_lossy(response);
    let first_line = text.lines().next().unwrap_or("");

    let accepted = first_line.starts_with("ICY 200 OK")
        || (first_line.starts_with("HTTP/1.") && first_line.contains(" 200"));
    if !accepted {
        return (false, 0);
    }

    // Correction bytes may follow the headers within the same read. A v2
    // caster sends a header block ending in a blank line; a v1 caster sends
    // just the ICY line.
    let body_start = if let Some(i) = text.find("\r\n\r\n") {
        i + 4
    } else if first_line.starts_with("ICY") {
        text.find("\r\n").map(|i| i + 2).unwrap_or(response.len())
    } else {
        response.len()
    };
    (true, body_start.min(response.len()))
}

/// Position-report cadence by fix quality (§ adaptive GGA interval).
///
/// DGPS/single solutions scale linearly with HDOP between 2 and 6.
fn adaptive_gga_interval(sample: Option<&KinematicSample>) -> Duration {
    let Some(sample) = sample else {
        return Duration::from_secs(30);
    };
    match sample.fix.quality {
        FixQuality::RtkFixed => Duration::from_secs(8),
        FixQuality::RtkFloat => Duration::from_secs(12),
        FixQuality::Dgps | FixQuality::GpsSingle => {
            let hdop = sample.fix.hdop.unwrap_or(6.0);
            let t = ((hdop - 2.0) / 4.0).clamp(0.0, 1.0);
            Duration::from_secs_f64(15.0 + 5.0 * t)
        }
        FixQuality::NoFix => Duration::from_secs(30),
    }
}

/// Exponential reconnect backoff: 1 s, 2 s, 4 s, ... capped, ±10 % jitter.
struct Backoff {
    next_secs: f64,
}

impl Backoff {
    fn new() -> Self {
        Self { next_secs: 1.0 }
    }

    fn reset(&mut self) {
        self.next_secs = 1.0;
    }

    fn next_delay(&mut self) -> Duration {
        let base = self.next_secs;
        self.next_secs = (self.next_secs * 2.0).min(RECONNECT_CAP.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.9..=1.1);
        Duration::from_secs_f64(base * jitter)
    }
}
