//! Process-wide UACP counters.
//!
//! Every counter is a relaxed atomic, so recording never blocks the codec or
//! the handshake. Read them through [`Metrics::snapshot`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Monotonic relaxed counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn decr_saturating(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }
}

#[derive(Debug)]
pub struct Metrics {
    // connections
    pub connections_opened: Counter,
    pub connections_open: Counter,
    pub transport_errors: Counter,

    // handshake
    pub handshakes_started: Counter,
    pub handshakes_completed: Counter,
    pub handshakes_rejected: Counter,
    handshake_micros: Counter,
    timed_handshakes: Counter,

    // framing
    pub frames_decoded: Counter,
    pub frames_encoded: Counter,
    pub bytes_decoded: Counter,
    pub bytes_encoded: Counter,

    /// Violations detected locally, each answered with an Error message
    pub violations: Counter,
    /// Error messages received from the peer
    pub peer_errors: Counter,

    // security tokens
    pub tokens_installed: Counter,
    pub tokens_rejected: Counter,
    pub previous_token_fallbacks: Counter,

    started: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_opened: Counter::default(),
            connections_open: Counter::default(),
            transport_errors: Counter::default(),
            handshakes_started: Counter::default(),
            handshakes_completed: Counter::default(),
            handshakes_rejected: Counter::default(),
            handshake_micros: Counter::default(),
            timed_handshakes: Counter::default(),
            frames_decoded: Counter::default(),
            frames_encoded: Counter::default(),
            bytes_decoded: Counter::default(),
            bytes_encoded: Counter::default(),
            violations: Counter::default(),
            peer_errors: Counter::default(),
            tokens_installed: Counter::default(),
            tokens_rejected: Counter::default(),
            previous_token_fallbacks: Counter::default(),
            started: Instant::now(),
        }
    }

    pub fn connection_opened(&self) {
        self.connections_opened.incr();
        self.connections_open.incr();
    }

    pub fn connection_dropped(&self) {
        self.connections_open.decr_saturating();
    }

    pub fn transport_error(&self) {
        self.transport_errors.incr();
    }

    pub fn handshake_started(&self) {
        self.handshakes_started.incr();
    }

    pub fn handshake_completed(&self) {
        self.handshakes_completed.incr();
    }

    pub fn handshake_rejected(&self) {
        self.handshakes_rejected.incr();
    }

    /// Wall time from the first handshake message to `Open`.
    pub fn handshake_duration(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.handshake_micros.add(micros);
        self.timed_handshakes.incr();
    }

    pub fn frame_decoded(&self, len: usize) {
        self.frames_decoded.incr();
        self.bytes_decoded.add(len as u64);
    }

    pub fn frame_encoded(&self, len: usize) {
        self.frames_encoded.incr();
        self.bytes_encoded.add(len as u64);
    }

    pub fn violation(&self) {
        self.violations.incr();
    }

    pub fn peer_error(&self) {
        self.peer_errors.incr();
    }

    pub fn token_installed(&self) {
        self.tokens_installed.incr();
    }

    pub fn token_rejected(&self) {
        self.tokens_rejected.incr();
    }

    pub fn previous_token_fallback(&self) {
        self.previous_token_fallbacks.incr();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let timed = self.timed_handshakes.get();
        let mean_handshake_micros = match timed {
            0 => 0,
            n => self.handshake_micros.get() / n,
        };

        MetricsSnapshot {
            connections_opened: self.connections_opened.get(),
            connections_open: self.connections_open.get(),
            transport_errors: self.transport_errors.get(),
            handshakes_started: self.handshakes_started.get(),
            handshakes_completed: self.handshakes_completed.get(),
            handshakes_rejected: self.handshakes_rejected.get(),
            mean_handshake_micros,
            frames_decoded: self.frames_decoded.get(),
            frames_encoded: self.frames_encoded.get(),
            bytes_decoded: self.bytes_decoded.get(),
            bytes_encoded: self.bytes_encoded.get(),
            violations: self.violations.get(),
            peer_errors: self.peer_errors.get(),
            tokens_installed: self.tokens_installed.get(),
            tokens_rejected: self.tokens_rejected.get(),
            previous_token_fallbacks: self.previous_token_fallbacks.get(),
            uptime: self.started.elapsed(),
        }
    }

    /// Emit the current snapshot as one `info` event.
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            connections_open = s.connections_open,
            connections_opened = s.connections_opened,
            handshakes_completed = s.handshakes_completed,
            handshakes_rejected = s.handshakes_rejected,
            mean_handshake_micros = s.mean_handshake_micros,
            frames_decoded = s.frames_decoded,
            frames_encoded = s.frames_encoded,
            violations = s.violations,
            peer_errors = s.peer_errors,
            tokens_installed = s.tokens_installed,
            previous_token_fallbacks = s.previous_token_fallbacks,
            uptime_secs = s.uptime.as_secs(),
            "UACP metrics"
        );
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_opened: u64,
    pub connections_open: u64,
    pub transport_errors: u64,
    pub handshakes_started: u64,
    pub handshakes_completed: u64,
    pub handshakes_rejected: u64,
    pub mean_handshake_micros: u64,
    pub frames_decoded: u64,
    pub frames_encoded: u64,
    pub bytes_decoded: u64,
    pub bytes_encoded: u64,
    pub violations: u64,
    pub peer_errors: u64,
    pub tokens_installed: u64,
    pub tokens_rejected: u64,
    pub previous_token_fallbacks: u64,
    pub uptime: Duration,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

pub fn global_metrics() -> &'static Metrics {
    &METRICS
}
