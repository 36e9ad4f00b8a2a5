//! Broadcast endpoint
//!
//! Binds one TCP listener; every accepted connection becomes a subscriber
//! served by its own writer task, fed through a bounded per-subscriber queue.
//! [`Publisher::send`] waits for queue space, so a burst is paced by the
//! slowest subscriber instead of overwriting frames it has not written yet.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::{JoinHandle, JoinSet};

use crate::error::{Error, Result};
use crate::frame::codec::{self, FrameError};
use crate::frame::Frame;

use super::{handshake, socket_addr, ChannelConfig};

/// Bytes gathered from queued frames before one socket write
const WRITE_BATCH: usize = 64 * 1024;

/// Registered subscriber connection
#[derive(Clone)]
struct SubscriberSlot {
    id: u64,
    peer: SocketAddr,
    tx: mpsc::Sender<Frame>,
}

type Subscribers = Arc<RwLock<Vec<SubscriberSlot>>>;

/// Publish side of a topic channel
///
/// Must be bound from within a tokio runtime; the accept loop and writer
/// tasks run on that runtime.
pub struct Publisher {
    endpoint: String,
    local_addr: SocketAddr,
    subscribers: Subscribers,
    max_frame_len: usize,
    send_timeout: Duration,
    stop_tx: Option<oneshot::Sender<Duration>>,
    accept_task: Option<JoinHandle<()>>,
}

impl Publisher {
    /// Bind the endpoint and start accepting subscribers
    pub async fn bind(endpoint: &str, config: &ChannelConfig) -> Result<Self> {
        let listener = TcpListener::bind(socket_addr(endpoint))
            .await
            .map_err(|source| Error::Bind {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let subscribers: Subscribers = Arc::new(RwLock::new(Vec::new()));
        let (stop_tx, stop_rx) = oneshot::channel();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&subscribers),
            stop_rx,
            config.clone(),
        ));

        tracing::info!(endpoint = %endpoint, addr = %local_addr, "Publisher bound");

        Ok(Self {
            endpoint: endpoint.to_string(),
            local_addr,
            subscribers,
            max_frame_len: config.max_frame_len,
            send_timeout: config.send_timeout,
            stop_tx: Some(stop_tx),
            accept_task: Some(accept_task),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue a frame for every connected subscriber
    ///
    /// Waits while a subscriber's queue is full. A subscriber that stays full
    /// for the whole send timeout is disconnected rather than skipped, so
    /// every connected subscriber sees an unbroken stream. Returns the number
    /// of subscribers the frame was queued for; with none it is dropped.
    ///
    /// Frames longer than the configured maximum are rejected here, since
    /// every peer would refuse them.
    pub async fn send(&self, frame: Frame) -> Result<usize> {
        if frame.len() > self.max_frame_len {
            return Err(FrameError::TooLarge {
                len: frame.len(),
                max: self.max_frame_len,
            }
            .into());
        }

        let targets = self.subscribers.read().await.clone();
        let mut delivered = 0;
        let mut gone = Vec::new();

        for slot in &targets {
            match slot.tx.send_timeout(frame.clone(), self.send_timeout).await {
                Ok(()) => delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => {
                    tracing::warn!(
                        peer = %slot.peer,
                        timeout_ms = self.send_timeout.as_millis() as u64,
                        "Subscriber stalled, disconnecting it"
                    );
                    gone.push(slot.id);
                }
                Err(SendTimeoutError::Closed(_)) => gone.push(slot.id),
            }
        }

        if !gone.is_empty() {
            self.subscribers
                .write()
                .await
                .retain(|slot| !gone.contains(&slot.id));
        }
        Ok(delivered)
    }

    /// Number of subscribers whose writer is still running
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .await
            .iter()
            .filter(|slot| !slot.tx.is_closed())
            .count()
    }

    /// Wait until at least `count` subscribers are registered
    pub async fn wait_for_subscribers(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.subscriber_count().await >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stop accepting, flush queued frames for up to `grace`, release the socket
    pub async fn close(mut self, grace: Duration) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(grace);
        }
        let Some(task) = self.accept_task.take() else {
            return;
        };
        drop(self);

        // The accept loop bounds its own drain by `grace`
        let _ = tokio::time::timeout(grace + Duration::from_millis(100), task).await;
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("endpoint", &self.endpoint)
            .field("local_addr", &self.local_addr)
            .field("max_frame_len", &self.max_frame_len)
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    subscribers: Subscribers,
    mut stop_rx: oneshot::Receiver<Duration>,
    config: ChannelConfig,
) {
    let mut writers = JoinSet::new();
    let mut next_id = 0u64;

    let grace = loop {
        tokio::select! {
            stop = &mut stop_rx => {
                // A dropped publisher counts as a stop with the default linger
                break stop.unwrap_or(config.linger);
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, peer_addr)) => {
                    if config.tcp_nodelay {
                        if let Err(e) = socket.set_nodelay(true) {
                            tracing::debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
                        }
                    }
                    // Register before greeting so no frame published after the
                    // subscriber's connect returns can be missed
                    let (tx, rx) = mpsc::channel(config.queue_capacity);
                    next_id += 1;
                    let count = {
                        let mut slots = subscribers.write().await;
                        slots.push(SubscriberSlot { id: next_id, peer: peer_addr, tx });
                        slots.len()
                    };
                    writers.spawn(write_loop(socket, peer_addr, rx));
                    tracing::debug!(peer = %peer_addr, subscribers = count, "Subscriber connected");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            },
            Some(_) = writers.join_next(), if !writers.is_empty() => {}
        }
    };

    drop(listener);
    // Writers finish once their queue is empty and its sender is gone
    subscribers.write().await.clear();

    let drained = tokio::time::timeout(grace, async {
        while writers.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        tracing::warn!(remaining = writers.len(), "Subscriber writers did not flush in time");
        writers.abort_all();
    }
}

async fn write_loop(mut socket: TcpStream, peer_addr: SocketAddr, mut rx: mpsc::Receiver<Frame>) {
    if let Err(e) = handshake::send(&mut socket).await {
        tracing::debug!(peer = %peer_addr, error = %e, "Greeting failed");
        return;
    }

    let mut buf = BytesMut::with_capacity(WRITE_BATCH);
    while let Some(frame) = rx.recv().await {
        buf.clear();
        encode_logged(&frame, &mut buf, peer_addr);
        // Coalesce whatever else is already queued into the same write
        while buf.len() < WRITE_BATCH {
            match rx.try_recv() {
                Ok(next) => encode_logged(&next, &mut buf, peer_addr),
                Err(_) => break,
            }
        }

        if let Err(e) = socket.write_all(&buf).await {
            tracing::debug!(peer = %peer_addr, error = %e, "Subscriber write failed");
            return;
        }
    }

    let _ = socket.shutdown().await;
    tracing::debug!(peer = %peer_addr, "Subscriber writer closed");
}

fn encode_logged(frame: &Frame, buf: &mut BytesMut, peer_addr: SocketAddr) {
    if let Err(e) = codec::encode(frame, buf) {
        tracing::warn!(peer = %peer_addr, error = %e, "Skipping frame that cannot be encoded");
    }
}
