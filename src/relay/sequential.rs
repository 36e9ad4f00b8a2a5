//! Single-threaded relay
//!
//! One control loop waits (bounded by the poll timeout) for any subscription
//! to become readable, drains every ready subscription, and republishes each
//! frame as soon as it is read. Publishing waits while a downstream queue is
//! full, which in turn leaves unread frames in the upstream sockets.

use std::future::poll_fn;
use std::sync::Arc;
use std::task::Poll;

use crate::channel::{Publisher, Subscriber};
use crate::error::Result;
use crate::shutdown::Shutdown;
use crate::stats::RelayStats;

use super::config::RelayConfig;
use super::{forward, log_totals, thread_runtime, RelayMode};

/// Relay running every subscription on one thread
pub struct SequentialRelay {
    config: RelayConfig,
    shutdown: Shutdown,
    stats: Arc<RelayStats>,
}

impl SequentialRelay {
    pub fn new(config: RelayConfig, shutdown: Shutdown) -> Self {
        Self {
            config,
            shutdown,
            stats: Arc::new(RelayStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Block the calling thread until stopped
    pub fn run(self) -> Result<()> {
        let runtime = thread_runtime()?;
        runtime.block_on(self.serve())
    }

    /// Bind, subscribe and forward until stopped
    ///
    /// Any bind or connect failure is fatal; so is a transport error while
    /// running, unless a stop was already requested.
    pub async fn serve(&self) -> Result<()> {
        self.config.validate()?;

        let publisher = Publisher::bind(&self.config.bind_addr, &self.config.channel).await?;

        let mut subscribers = Vec::with_capacity(self.config.producers.len());
        for producer in &self.config.producers {
            if self.shutdown.is_stopped() {
                break;
            }
            let connected = Subscriber::connect(
                &producer.endpoint,
                producer.filter.clone(),
                &self.config.channel,
            )
            .await;
            let sub = match connected {
                Ok(sub) => sub,
                Err(e) if self.shutdown.is_stopped() => {
                    tracing::debug!(producer = %producer.name, error = %e, "Ignoring error during shutdown");
                    break;
                }
                Err(e) => return Err(e),
            };
            tracing::info!(
                producer = %producer.name,
                endpoint = %producer.endpoint,
                filter = %producer.filter,
                "Subscribed to producer"
            );
            subscribers.push(sub);
        }

        tracing::info!(
            mode = %RelayMode::Sequential,
            producers = subscribers.len(),
            bind = %publisher.local_addr(),
            "Relay started"
        );

        let result = self.poll_loop(&publisher, &mut subscribers).await;

        drop(subscribers);
        publisher.close(self.config.channel.linger).await;
        log_totals(RelayMode::Sequential, &self.stats);

        result
    }

    async fn poll_loop(&self, publisher: &Publisher, subscribers: &mut [Subscriber]) -> Result<()> {
        while self.shutdown.should_continue() {
            let ready = match tokio::time::timeout(self.config.poll_timeout, ready_set(subscribers)).await
            {
                Ok(ready) => ready,
                Err(_) => continue,
            };

            for idx in ready {
                let sub = &mut subscribers[idx];
                while self.shutdown.should_continue() {
                    match sub.try_recv() {
                        Ok(Some(frame)) => forward(publisher, &self.stats, frame).await,
                        Ok(None) => break,
                        Err(e) if self.shutdown.is_stopped() => {
                            tracing::debug!(endpoint = %sub.endpoint(), error = %e, "Ignoring error during shutdown");
                            return Ok(());
                        }
                        Err(e) => {
                            tracing::error!(endpoint = %sub.endpoint(), error = %e, "Subscription failed");
                            return Err(e);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Indices of every subscription that is ready, once at least one is
async fn ready_set(subscribers: &[Subscriber]) -> Vec<usize> {
    poll_fn(|cx| {
        let ready: Vec<usize> = subscribers
            .iter()
            .enumerate()
            .filter(|(_, sub)| sub.poll_ready(cx).is_ready())
            .map(|(idx, _)| idx)
            .collect();

        if ready.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(ready)
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::channel::ChannelConfig;
    use crate::error::Error;
    use crate::frame::{Frame, TopicFilter};
    use crate::relay::ProducerEndpoint;

    #[tokio::test]
    async fn test_ready_set_reports_buffered_subscriptions() {
        let config = ChannelConfig::default();
        let a = Publisher::bind("127.0.0.1:0", &config).await.unwrap();
        let b = Publisher::bind("127.0.0.1:0", &config).await.unwrap();

        let subs = vec![
            Subscriber::connect(&a.local_addr().to_string(), TopicFilter::all(), &config)
                .await
                .unwrap(),
            Subscriber::connect(&b.local_addr().to_string(), TopicFilter::all(), &config)
                .await
                .unwrap(),
        ];

        b.send(Frame::new("topicB", "1")).await.unwrap();

        let ready = tokio::time::timeout(Duration::from_secs(2), ready_set(&subs))
            .await
            .unwrap();
        assert_eq!(ready, vec![1]);
    }

    #[tokio::test]
    async fn test_serve_fails_when_producer_missing() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = RelayConfig::with_bind("127.0.0.1:0")
            .producer(ProducerEndpoint::new("dead", dead, "topicA"));
        let relay = SequentialRelay::new(config, Shutdown::new());

        let result = relay.serve().await;
        assert!(matches!(result, Err(Error::Connect { .. })));
    }

    #[tokio::test]
    async fn test_serve_skips_connects_once_stopped() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = RelayConfig::with_bind("127.0.0.1:0")
            .producer(ProducerEndpoint::new("dead", dead, "topicA"));
        let shutdown = Shutdown::new();
        shutdown.request_stop();

        // A stopped relay never attempts the unreachable producer
        let relay = SequentialRelay::new(config, shutdown);
        assert!(relay.serve().await.is_ok());
    }

    #[tokio::test]
    async fn test_serve_returns_after_stop() {
        let producer = Publisher::bind("127.0.0.1:0", &ChannelConfig::default())
            .await
            .unwrap();

        let config = RelayConfig::with_bind("127.0.0.1:0")
            .producer(ProducerEndpoint::new(
                "a",
                producer.local_addr().to_string(),
                "topicA",
            ))
            .poll_timeout(Duration::from_millis(100));
        let shutdown = Shutdown::new();
        let relay = SequentialRelay::new(config, shutdown.clone());

        let started = Instant::now();
        let serve = tokio::spawn(async move { relay.serve().await });

        assert!(producer.wait_for_subscribers(1, Duration::from_secs(2)).await);
        shutdown.request_stop();

        let result = tokio::time::timeout(Duration::from_secs(3), serve)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
