//! Topic channels over TCP
//!
//! A [`Publisher`] binds one endpoint and fans every frame out to all
//! connected subscribers. A [`Subscriber`] connects to one publisher and
//! yields only the frames its [`TopicFilter`](crate::frame::TopicFilter)
//! accepts.
//!
//! # Architecture
//!
//! ```text
//!   Publisher::send(frame).await
//!          │
//!          ├──► bounded queue ──► writer task ──► TCP ──► Subscriber
//!          ├──► bounded queue ──► writer task ──► TCP ──► Subscriber
//!          └──► bounded queue ──► writer task ──► TCP ──► Subscriber
//! ```
//!
//! `send` waits for room in every queue, so nothing is dropped between the
//! publisher and a live subscriber. Each subscriber connection is owned by
//! exactly one task.

pub mod handshake;
pub mod publisher;
pub mod subscriber;

use std::time::Duration;

use crate::frame::codec::DEFAULT_MAX_FRAME_LEN;

pub use publisher::Publisher;
pub use subscriber::Subscriber;

/// Transport tuning shared by publishers and subscribers
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Frames queued per subscriber before `send` waits for its writer
    pub queue_capacity: usize,

    /// How long `send` waits on one full subscriber queue before
    /// disconnecting that subscriber
    pub send_timeout: Duration,

    /// Largest frame accepted on the wire
    pub max_frame_len: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Time allowed to establish the TCP connection
    pub connect_timeout: Duration,

    /// Time allowed for the publisher greeting
    pub handshake_timeout: Duration,

    /// Time writers get to flush queued frames on close
    pub linger: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            send_timeout: Duration::from_secs(2),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            tcp_nodelay: true,
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            linger: Duration::from_secs(1),
        }
    }
}

impl ChannelConfig {
    /// Set the per-subscriber queue depth
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set how long a send may wait on one stalled subscriber
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the TCP connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum frame length
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Set the handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the close grace period
    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }
}

/// Convert an endpoint string into a socket address string
///
/// Accepts `host:port`, `tcp://host:port` and `tcp://*:port`.
pub fn socket_addr(endpoint: &str) -> String {
    let addr = endpoint.strip_prefix("tcp://").unwrap_or(endpoint);
    match addr.strip_prefix("*:") {
        Some(port) => format!("0.0.0.0:{}", port),
        None => addr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();

        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.send_timeout, Duration::from_secs(2));
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
        assert!(config.tcp_nodelay);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_builder_chaining() {
        let config = ChannelConfig::default()
            .queue_capacity(0)
            .send_timeout(Duration::from_millis(300))
            .connect_timeout(Duration::from_millis(400))
            .max_frame_len(512)
            .handshake_timeout(Duration::from_millis(250))
            .linger(Duration::ZERO);

        // Capacity is clamped to at least one slot
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.send_timeout, Duration::from_millis(300));
        assert_eq!(config.connect_timeout, Duration::from_millis(400));
        assert_eq!(config.max_frame_len, 512);
        assert_eq!(config.handshake_timeout, Duration::from_millis(250));
        assert_eq!(config.linger, Duration::ZERO);
    }

    #[test]
    fn test_socket_addr_forms() {
        assert_eq!(socket_addr("127.0.0.1:5555"), "127.0.0.1:5555");
        assert_eq!(socket_addr("tcp://10.0.0.2:5560"), "10.0.0.2:5560");
        assert_eq!(socket_addr("tcp://*:5560"), "0.0.0.0:5560");
        assert_eq!(socket_addr("localhost:80"), "localhost:80");
    }
}
