//! Fan-in relay
//!
//! Subscribes to every configured producer and republishes each frame,
//! unmodified, on a single downstream publisher. Two strategies share the
//! same contract:
//!
//! ```text
//!  Sequential                          FanIn
//!
//!  sub ─┐                              sub ─► worker ─┐
//!  sub ─┼─► poll loop ─► publisher     sub ─► worker ─┼─► queue ─► collector ─► publisher
//!  sub ─┘                              sub ─► worker ─┘
//! ```
//!
//! Both preserve per-producer order; neither orders frames across producers.

pub mod config;
pub mod fan_in;
pub mod sequential;

use std::str::FromStr;
use std::sync::Arc;

use crate::channel::Publisher;
use crate::error::Result;
use crate::frame::Frame;
use crate::shutdown::Shutdown;
use crate::stats::RelayStats;

pub use config::{ProducerEndpoint, RelayConfig};
pub use fan_in::FanInRelay;
pub use sequential::SequentialRelay;

/// Relay strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayMode {
    /// One thread polling every subscription
    #[default]
    Sequential,
    /// One thread per subscription feeding a collector thread
    FanIn,
}

impl FromStr for RelayMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" | "standard" | "single" => Ok(RelayMode::Sequential),
            "fan-in" | "fanin" | "threaded" | "parallel" => Ok(RelayMode::FanIn),
            other => Err(format!(
                "unknown relay mode '{}', expected 'sequential' or 'fan-in'",
                other
            )),
        }
    }
}

impl std::fmt::Display for RelayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayMode::Sequential => f.write_str("sequential"),
            RelayMode::FanIn => f.write_str("fan-in"),
        }
    }
}

/// A relay of either strategy
pub enum Relay {
    Sequential(SequentialRelay),
    FanIn(FanInRelay),
}

impl Relay {
    pub fn new(mode: RelayMode, config: RelayConfig, shutdown: Shutdown) -> Self {
        match mode {
            RelayMode::Sequential => Relay::Sequential(SequentialRelay::new(config, shutdown)),
            RelayMode::FanIn => Relay::FanIn(FanInRelay::new(config, shutdown)),
        }
    }

    pub fn mode(&self) -> RelayMode {
        match self {
            Relay::Sequential(_) => RelayMode::Sequential,
            Relay::FanIn(_) => RelayMode::FanIn,
        }
    }

    /// Shared forwarding counters
    pub fn stats(&self) -> Arc<RelayStats> {
        match self {
            Relay::Sequential(relay) => relay.stats(),
            Relay::FanIn(relay) => relay.stats(),
        }
    }

    /// Run on the calling thread until the shutdown handle is stopped
    ///
    /// Blocks; each variant drives its own runtime(s), so call this from a
    /// plain OS thread or `spawn_blocking`, never from inside an async task.
    pub fn run(self) -> Result<()> {
        match self {
            Relay::Sequential(relay) => relay.run(),
            Relay::FanIn(relay) => relay.run(),
        }
    }
}

/// Republish one frame and count it
///
/// Waits while downstream queues are full. Only frames the publisher
/// accepted are counted.
pub(crate) async fn forward(publisher: &Publisher, stats: &RelayStats, frame: Frame) {
    match publisher.send(frame.clone()).await {
        Ok(subscribers) => {
            let count = stats.record(&frame);
            tracing::debug!(
                count = count,
                topic = %frame.topic_lossy(),
                size = frame.len(),
                subscribers = subscribers,
                "Forwarded frame"
            );
        }
        Err(e) => {
            tracing::warn!(
                topic = %frame.topic_lossy(),
                size = frame.len(),
                error = %e,
                "Frame rejected by downstream publisher"
            );
        }
    }
}

/// Log the closing totals for a relay
pub(crate) fn log_totals(mode: RelayMode, stats: &RelayStats) {
    let snapshot = stats.snapshot();
    tracing::info!(
        mode = %mode,
        forwarded = snapshot.forwarded,
        bytes = snapshot.bytes_forwarded,
        elapsed_ms = snapshot.elapsed.as_millis() as u64,
        frames_per_sec = snapshot.frames_per_sec(),
        "Relay shut down"
    );
}

/// Current-thread runtime for one relay thread
pub(crate) fn thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("sequential".parse::<RelayMode>(), Ok(RelayMode::Sequential));
        assert_eq!("standard".parse::<RelayMode>(), Ok(RelayMode::Sequential));
        assert_eq!("fan-in".parse::<RelayMode>(), Ok(RelayMode::FanIn));
        assert_eq!("Threaded".parse::<RelayMode>(), Ok(RelayMode::FanIn));
        assert!("round-robin".parse::<RelayMode>().is_err());
    }

    #[test]
    fn test_mode_display_round_trips() {
        for mode in [RelayMode::Sequential, RelayMode::FanIn] {
            assert_eq!(mode.to_string().parse::<RelayMode>(), Ok(mode));
        }
    }

    #[test]
    fn test_relay_dispatch() {
        let relay = Relay::new(RelayMode::FanIn, RelayConfig::default(), Shutdown::new());
        assert_eq!(relay.mode(), RelayMode::FanIn);
        assert_eq!(relay.stats().forwarded(), 0);
    }
}
