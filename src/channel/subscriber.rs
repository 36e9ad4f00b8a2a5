//! Subscribe side of a topic channel
//!
//! A subscriber owns one TCP connection to one publisher. Frames are decoded
//! from an internal buffer and handed out only if they pass the filter.
//! [`poll_ready`](Subscriber::poll_ready) lets a single task wait on many
//! subscribers at once.

use std::future::poll_fn;
use std::io;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::frame::{codec, Frame, TopicFilter};

use super::{handshake, socket_addr, ChannelConfig};

const READ_CHUNK: usize = 8 * 1024;

/// Filtered connection to one publisher
#[derive(Debug)]
pub struct Subscriber {
    endpoint: String,
    filter: TopicFilter,
    stream: TcpStream,
    buf: BytesMut,
    max_frame_len: usize,
    received: u64,
}

impl Subscriber {
    /// Connect, complete the greeting and start filtering on `filter`
    ///
    /// Both the TCP connect and the greeting are bounded by the config's
    /// timeouts.
    pub async fn connect(
        endpoint: &str,
        filter: TopicFilter,
        config: &ChannelConfig,
    ) -> Result<Self> {
        let connect = TcpStream::connect(socket_addr(endpoint));
        let mut stream = match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(Error::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(Error::Connect {
                    endpoint: endpoint.to_string(),
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                })
            }
        };

        if config.tcp_nodelay {
            stream.set_nodelay(true)?;
        }

        let greeting = tokio::time::timeout(config.handshake_timeout, handshake::receive(&mut stream))
            .await
            .map_err(|_| Error::Handshake {
                endpoint: endpoint.to_string(),
                reason: "timed out waiting for greeting".into(),
            })?
            .map_err(|e| Error::Handshake {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        if let Err(reason) = greeting {
            return Err(Error::Handshake {
                endpoint: endpoint.to_string(),
                reason,
            });
        }

        tracing::info!(endpoint = %endpoint, filter = %filter, "Subscriber connected");

        Ok(Self {
            endpoint: endpoint.to_string(),
            filter,
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK),
            max_frame_len: config.max_frame_len,
            received: 0,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    /// Frames handed out so far (after filtering)
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Readiness check for multiplexed polling
    ///
    /// Ready when a complete frame is already buffered or the socket has
    /// data, an EOF or an error pending. A ready subscriber may still yield
    /// `Ok(None)` from [`try_recv`](Self::try_recv) if everything it read was
    /// filtered out.
    pub fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<()> {
        if codec::has_frame(&self.buf) {
            return Poll::Ready(());
        }
        self.stream.poll_read_ready(cx).map(|_| ())
    }

    /// Wait until [`try_recv`](Self::try_recv) has something to report
    pub async fn ready(&self) {
        poll_fn(|cx| self.poll_ready(cx)).await
    }

    /// Take the next matching frame without waiting
    ///
    /// Returns `Ok(None)` once the socket would block.
    pub fn try_recv(&mut self) -> Result<Option<Frame>> {
        loop {
            while let Some(frame) = codec::decode(&mut self.buf, self.max_frame_len)? {
                if self.filter.matches(&frame) {
                    self.received += 1;
                    return Ok(Some(frame));
                }
            }

            self.buf.reserve(READ_CHUNK);
            match self.stream.try_read_buf(&mut self.buf) {
                Ok(0) => {
                    return Err(Error::Disconnected {
                        endpoint: self.endpoint.clone(),
                    })
                }
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Wait for the next matching frame
    pub async fn recv(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.try_recv()? {
                return Ok(frame);
            }
            self.stream.readable().await?;
        }
    }

    /// Wait up to `timeout` for the next matching frame
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(frame) => frame.map(Some),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::channel::Publisher;

    async fn publisher() -> Publisher {
        Publisher::bind("127.0.0.1:0", &ChannelConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_frames_arrive_byte_identical() {
        let publisher = publisher().await;
        let endpoint = publisher.local_addr().to_string();
        let mut sub = Subscriber::connect(&endpoint, TopicFilter::all(), &ChannelConfig::default())
            .await
            .unwrap();

        let original = Frame::from_bytes(&b"camara {\"id\":\"CAM-A1\", \"x\": \"\xce\xbb\"}"[..]);
        assert_eq!(publisher.send(original.clone()).await.unwrap(), 1);

        let received = sub.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(received, Some(original));
        assert_eq!(sub.received(), 1);
    }

    #[tokio::test]
    async fn test_filter_isolates_topic() {
        let publisher = publisher().await;
        let endpoint = publisher.local_addr().to_string();
        let mut sub = Subscriber::connect(&endpoint, TopicFilter::from("gps"), &ChannelConfig::default())
            .await
            .unwrap();

        publisher.send(Frame::new("camara", "1")).await.unwrap();
        publisher.send(Frame::new("gps", "2")).await.unwrap();
        publisher.send(Frame::new("gpsx", "3")).await.unwrap();
        publisher.send(Frame::new("gps", "4")).await.unwrap();

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.as_bytes(), b"gps 2");
        assert_eq!(second.as_bytes(), b"gps 4");

        let none = sub.recv_timeout(Duration::from_millis(100)).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_recv_timeout_elapses() {
        let publisher = publisher().await;
        let endpoint = publisher.local_addr().to_string();
        let mut sub = Subscriber::connect(&endpoint, TopicFilter::all(), &ChannelConfig::default())
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let frame = assert_ok!(sub.recv_timeout(Duration::from_millis(50)).await);
        assert!(frame.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_try_recv_empty_socket() {
        let publisher = publisher().await;
        let endpoint = publisher.local_addr().to_string();
        let mut sub = Subscriber::connect(&endpoint, TopicFilter::all(), &ChannelConfig::default())
            .await
            .unwrap();

        assert!(assert_ok!(sub.try_recv()).is_none());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Grab a free port, then release it so nothing is listening there
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result =
            Subscriber::connect(&addr.to_string(), TopicFilter::all(), &ChannelConfig::default()).await;
        assert!(matches!(result, Err(Error::Connect { .. })));
    }

    #[tokio::test]
    async fn test_connect_to_unroutable_host_is_bounded() {
        // TEST-NET-1 is never routed; the SYN is dropped or refused
        let config = ChannelConfig::default().connect_timeout(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let result = Subscriber::connect("192.0.2.1:5555", TopicFilter::all(), &config).await;

        assert!(matches!(result, Err(Error::Connect { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_greeting_wait_is_bounded() {
        // Kernel completes the TCP handshake but nobody ever accepts
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ChannelConfig::default().handshake_timeout(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let result = Subscriber::connect(&addr.to_string(), TopicFilter::all(), &config).await;

        assert!(matches!(result, Err(Error::Handshake { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(listener);
    }

    #[tokio::test]
    async fn test_handshake_rejects_non_publisher() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;

            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"HTTP/").await.unwrap();
        });

        let result =
            Subscriber::connect(&addr.to_string(), TopicFilter::all(), &ChannelConfig::default()).await;
        assert!(matches!(result, Err(Error::Handshake { .. })));
    }

    #[tokio::test]
    async fn test_close_flushes_then_disconnects() {
        let publisher = publisher().await;
        let endpoint = publisher.local_addr().to_string();
        let mut sub = Subscriber::connect(&endpoint, TopicFilter::all(), &ChannelConfig::default())
            .await
            .unwrap();

        for i in 0..5 {
            publisher.send(Frame::new("espira", i.to_string())).await.unwrap();
        }
        publisher.close(Duration::from_secs(1)).await;

        for i in 0..5 {
            let frame = sub.recv().await.unwrap();
            assert_eq!(frame.body(), i.to_string().as_bytes());
        }

        let err = assert_err!(sub.recv().await);
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_ready_when_frame_buffered() {
        let publisher = publisher().await;
        let endpoint = publisher.local_addr().to_string();
        let mut sub = Subscriber::connect(&endpoint, TopicFilter::all(), &ChannelConfig::default())
            .await
            .unwrap();

        publisher.send(Frame::new("gps", "a")).await.unwrap();
        publisher.send(Frame::new("gps", "b")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), sub.ready())
            .await
            .unwrap();

        // Both frames keep their order whether they arrived together or apart
        assert_eq!(sub.recv().await.unwrap().body(), b"a");
        assert_eq!(sub.recv().await.unwrap().body(), b"b");
    }
}
