//! Forwarding statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::frame::Frame;

/// Relay-wide counters
///
/// Shared between the forwarding loop and observers; updates are lock-free.
#[derive(Debug)]
pub struct RelayStats {
    forwarded: AtomicU64,
    bytes_forwarded: AtomicU64,
    started_at: Instant,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            forwarded: AtomicU64::new(0),
            bytes_forwarded: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Count one forwarded frame, returning its sequence number (1-based)
    pub fn record(&self, frame: &Frame) -> u64 {
        self.bytes_forwarded
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
        self.forwarded.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Total frames forwarded
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Total payload bytes forwarded
    pub fn bytes_forwarded(&self) -> u64 {
        self.bytes_forwarded.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            forwarded: self.forwarded(),
            bytes_forwarded: self.bytes_forwarded(),
            elapsed: self.started_at.elapsed(),
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub forwarded: u64,
    pub bytes_forwarded: u64,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    /// Frames per second since the relay started
    pub fn frames_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.forwarded as f64 / secs
        } else {
            0.0
        }
    }

    /// Bits per second since the relay started
    pub fn bitrate(&self) -> u64 {
        let secs = self.elapsed.as_secs();
        if secs > 0 {
            (self.bytes_forwarded * 8) / secs
        } else {
            0
        }
    }
}
