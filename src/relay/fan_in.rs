//! Multi-threaded fan-in relay
//!
//! ```text
//!  worker-camera    (SUB camara) ──┐
//!  worker-inductive (SUB espira) ──┼──► mpsc queue ──► collector ──► Publisher
//!  worker-gps       (SUB gps)    ──┘
//! ```
//!
//! Every worker and the collector is an OS thread driving its own
//! current-thread runtime, so no socket is ever touched by two threads. The
//! queue is the only shared mutable resource.
//!
//! Startup is ordered by a readiness signal rather than a delay: the
//! collector binds the publish endpoint, then flips a `watch` channel to
//! [`CollectorState::Ready`]; workers subscribe first but send nothing until
//! they observe that state.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use crate::channel::{ChannelConfig, Publisher, Subscriber};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::shutdown::Shutdown;
use crate::stats::RelayStats;

use super::config::{ProducerEndpoint, RelayConfig};
use super::{forward, log_totals, thread_runtime, RelayMode};

/// Interval at which the supervisor re-checks thread state
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(50);

/// Collector lifecycle as seen by workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CollectorState {
    /// Publish endpoint not bound yet
    Starting,
    /// Bound; workers may send
    Ready,
    /// Bind failed; workers should exit
    Failed,
}

/// Relay with one thread per producer plus a collector thread
pub struct FanInRelay {
    config: RelayConfig,
    shutdown: Shutdown,
    stats: Arc<RelayStats>,
}

impl FanInRelay {
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

    /// Start all threads and block until stopped
    ///
    /// Returns the collector's bind error if the publish endpoint cannot be
    /// bound. Worker failures are logged and only end that worker.
    pub fn run(self) -> Result<()> {
        self.config.validate()?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(CollectorState::Starting);

        let collector = Collector {
            bind_addr: self.config.bind_addr.clone(),
            channel: self.config.channel.clone(),
            poll_timeout: self.config.poll_timeout,
            drain_timeout: self.config.join_timeout,
            shutdown: self.shutdown.clone(),
            stats: Arc::clone(&self.stats),
        };
        let collector = spawn_named("relay-collector".into(), move || {
            collector.run(queue_rx, state_tx)
        })?;

        let mut workers = Vec::with_capacity(self.config.producers.len());
        for producer in &self.config.producers {
            let worker = Worker {
                producer: producer.clone(),
                channel: self.config.channel.clone(),
                poll_timeout: self.config.poll_timeout,
                shutdown: self.shutdown.clone(),
                queue: queue_tx.clone(),
                collector: state_rx.clone(),
            };
            match spawn_named(format!("relay-worker-{}", producer.name), move || worker.run()) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    tracing::error!(worker = %producer.name, error = %e, "Failed to spawn worker")
                }
            }
        }
        // Only workers hold senders now; the queue closes when they all exit
        drop(queue_tx);

        let state = self.wait_for_collector(state_rx)?;
        if state == CollectorState::Ready {
            tracing::info!(
                mode = %RelayMode::FanIn,
                workers = workers.len(),
                bind = %self.config.bind_addr,
                "Relay started"
            );

            while self.shutdown.should_continue() && !collector.is_finished() {
                thread::sleep(SUPERVISE_INTERVAL.min(self.config.poll_timeout));
            }
            if self.shutdown.request_stop() {
                tracing::warn!("Collector exited on its own, stopping workers");
            }
        }

        tracing::info!("Waiting for relay threads to finish");
        let deadline = Instant::now() + self.config.join_timeout;
        for worker in workers {
            join_bounded(worker, deadline);
        }

        // The collector drains the queue for at most the join timeout itself
        let deadline = Instant::now() + self.config.join_timeout + self.config.poll_timeout;
        let result = match join_bounded(collector, deadline) {
            Some(result) => result,
            None => Err(Error::Startup("collector thread did not finish".into())),
        };

        if state == CollectorState::Ready {
            log_totals(RelayMode::FanIn, &self.stats);
        }
        result
    }

    /// Block until the collector leaves `Starting` or a stop is requested
    fn wait_for_collector(
        &self,
        mut state_rx: watch::Receiver<CollectorState>,
    ) -> Result<CollectorState> {
        let runtime = thread_runtime()?;
        runtime.block_on(async {
            while self.shutdown.should_continue() {
                let changed = tokio::time::timeout(
                    self.config.poll_timeout,
                    state_rx.wait_for(|state| *state != CollectorState::Starting),
                )
                .await;
                match changed {
                    Ok(Ok(state)) => return Ok(*state),
                    // Collector thread ended without reporting
                    Ok(Err(_)) => return Ok(CollectorState::Failed),
                    Err(_) => continue,
                }
            }
            Ok(*state_rx.borrow())
        })
    }
}

/// Sole owner of the queue receiver and the publish endpoint
struct Collector {
    bind_addr: String,
    channel: ChannelConfig,
    poll_timeout: Duration,
    drain_timeout: Duration,
    shutdown: Shutdown,
    stats: Arc<RelayStats>,
}

impl Collector {
    fn run(
        self,
        mut queue: mpsc::UnboundedReceiver<Frame>,
        state: watch::Sender<CollectorState>,
    ) -> Result<()> {
        let runtime = match thread_runtime() {
            Ok(runtime) => runtime,
            Err(e) => {
                state.send_replace(CollectorState::Failed);
                return Err(e);
            }
        };

        runtime.block_on(async {
            let publisher = match Publisher::bind(&self.bind_addr, &self.channel).await {
                Ok(publisher) => publisher,
                Err(e) => {
                    tracing::error!(bind = %self.bind_addr, error = %e, "Collector failed to bind");
                    state.send_replace(CollectorState::Failed);
                    return Err(e);
                }
            };
            state.send_replace(CollectorState::Ready);
            tracing::info!(bind = %publisher.local_addr(), "Collector ready");

            let result = self.collect(&publisher, &mut queue).await;

            publisher.close(self.channel.linger).await;
            tracing::info!(forwarded = self.stats.forwarded(), "Collector stopped");
            result
        })
    }

    async fn collect(
        &self,
        publisher: &Publisher,
        queue: &mut mpsc::UnboundedReceiver<Frame>,
    ) -> Result<()> {
        while self.shutdown.should_continue() {
            match tokio::time::timeout(self.poll_timeout, queue.recv()).await {
                Ok(Some(frame)) => forward(publisher, &self.stats, frame).await,
                Ok(None) if self.shutdown.is_stopped() => return Ok(()),
                Ok(None) => {
                    tracing::error!("All workers exited, nothing left to relay");
                    return Err(Error::WorkersExhausted);
                }
                Err(_) => {}
            }
        }

        // Workers exit within one poll timeout and drop their senders, which
        // closes the queue once it is empty
        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        loop {
            match tokio::time::timeout_at(deadline, queue.recv()).await {
                Ok(Some(frame)) => forward(publisher, &self.stats, frame).await,
                Ok(None) => return Ok(()),
                Err(_) => {
                    tracing::warn!("Queue drain timed out");
                    return Ok(());
                }
            }
        }
    }
}

/// Forwards one producer's frames into the queue
struct Worker {
    producer: ProducerEndpoint,
    channel: ChannelConfig,
    poll_timeout: Duration,
    shutdown: Shutdown,
    queue: mpsc::UnboundedSender<Frame>,
    collector: watch::Receiver<CollectorState>,
}

impl Worker {
    fn run(mut self) {
        let runtime = match thread_runtime() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(worker = %self.producer.name, error = %e, "Failed to start worker runtime");
                return;
            }
        };

        let mut forwarded = 0u64;
        let result = runtime.block_on(self.relay_frames(&mut forwarded));

        match result {
            Ok(()) => {}
            Err(e) if self.shutdown.is_stopped() => {
                tracing::debug!(worker = %self.producer.name, error = %e, "Ignoring error during shutdown");
            }
            Err(e) => {
                tracing::error!(worker = %self.producer.name, error = %e, "Worker failed");
            }
        }
        tracing::info!(worker = %self.producer.name, forwarded = forwarded, "Worker stopped");
    }

    async fn relay_frames(&mut self, forwarded: &mut u64) -> Result<()> {
        if self.shutdown.is_stopped() {
            return Ok(());
        }
        let mut sub = Subscriber::connect(
            &self.producer.endpoint,
            self.producer.filter.clone(),
            &self.channel,
        )
        .await?;
        tracing::info!(
            worker = %self.producer.name,
            endpoint = %self.producer.endpoint,
            filter = %self.producer.filter,
            "Worker subscribed"
        );

        if !self.wait_for_collector().await {
            return Ok(());
        }

        while self.shutdown.should_continue() {
            let Some(frame) = sub.recv_timeout(self.poll_timeout).await? else {
                continue;
            };
            if self.queue.send(frame).is_err() {
                tracing::debug!(worker = %self.producer.name, "Collector gone");
                return Ok(());
            }
            *forwarded += 1;
            tracing::trace!(worker = %self.producer.name, count = *forwarded, "Queued frame");
        }
        Ok(())
    }

    /// Whether the collector became ready before a stop or failure
    async fn wait_for_collector(&mut self) -> bool {
        while self.shutdown.should_continue() {
            let changed = tokio::time::timeout(
                self.poll_timeout,
                self.collector
                    .wait_for(|state| *state != CollectorState::Starting),
            )
            .await;
            match changed {
                Ok(Ok(state)) => return *state == CollectorState::Ready,
                Ok(Err(_)) => return false,
                Err(_) => continue,
            }
        }
        false
    }
}

fn spawn_named<F, T>(name: String, f: F) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(thread::Builder::new().name(name).spawn(f)?)
}

/// Join a thread if it finishes before `deadline`, otherwise abandon it
fn join_bounded<T>(handle: JoinHandle<T>, deadline: Instant) -> Option<T> {
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }

    let name = handle.thread().name().unwrap_or("relay-thread").to_string();
    if !handle.is_finished() {
        tracing::warn!(thread = %name, "Thread did not stop in time, abandoning it");
        return None;
    }

    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::error!(thread = %name, "Thread panicked");
            None
        }
    }
}
