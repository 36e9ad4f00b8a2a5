//! Cooperative shutdown
//!
//! Every relay loop and worker holds a clone of the same [`Shutdown`] handle
//! and re-checks it after each bounded wait. Stopping is a one-way latch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide stop signal
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    stopped: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request every holder to stop
    ///
    /// Idempotent. Returns `true` only for the call that flipped the flag.
    pub fn request_stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    /// Whether loops should keep running
    pub fn should_continue(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        !self.should_continue()
    }

    /// Wait for Ctrl-C (or SIGTERM on unix), then request a stop
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut terminate = signal(SignalKind::terminate())?;
            tokio::select! {
                res = tokio::signal::ctrl_c() => res?,
                _ = terminate.recv() => {}
            }
        }

        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await?;

        if self.request_stop() {
            tracing::info!("Shutdown signal received");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initially_running() {
        let shutdown = Shutdown::new();
        assert!(shutdown.should_continue());
        assert!(!shutdown.is_stopped());
    }

    #[test]
    fn test_request_stop_is_idempotent() {
        let shutdown = Shutdown::new();
        assert!(shutdown.request_stop());
        assert!(!shutdown.request_stop());
        assert!(shutdown.is_stopped());
    }

    #[test]
    fn test_clones_share_state() {
        let shutdown = Shutdown::new();
        let worker_view = shutdown.clone();

        let handle = std::thread::spawn(move || {
            while worker_view.should_continue() {
                std::thread::yield_now();
            }
        });

        shutdown.request_stop();
        handle.join().unwrap();
    }
}
