//! Shared, cheaply clonable server state.

use crate::server::{
    config::ServerConfig,
    telemetry::{decrement_streams_inflight, increment_streams_inflight},
};
use core::time::Duration;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// State handed to every handler.
///
/// The configuration is read-only. The in-flight counter and the draining
/// flag are the only mutable pieces, and both are atomics.
#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
    shutdown_token: CancellationToken,
    inflight: Arc<AtomicUsize>,
    draining: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            shutdown_token: CancellationToken::new(),
            inflight: Arc::new(AtomicUsize::new(0)),
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Cancelled once the drain period is over; running exports stop.
    pub const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown_token
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Downloads that are waiting out their delay or streaming.
    pub fn streams_inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    /// Counts a download as in flight until the returned guard is dropped.
    pub fn track(&self) -> InflightGuard {
        InflightGuard::new(Arc::clone(&self.inflight))
    }

    /// Stops accepting downloads and winds down the running ones.
    ///
    /// - Marks the server as draining: new downloads and health checks get
    ///   `503`.
    /// - Waits up to `shutdown_timeout` for in-flight downloads to finish.
    /// - Cancels whatever is still running.
    pub async fn shutdown(&self) {
        tracing::info!("Refusing new downloads");
        self.draining.store(true, Ordering::Release);

        tracing::info!(
            "Draining in-flight downloads ({} active)",
            self.streams_inflight()
        );
        let drain_result = timeout(self.config.shutdown_timeout, async {
            while self.streams_inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => tracing::debug!("All in-flight downloads drained"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} downloads still active)",
                self.streams_inflight()
            ),
        }

        tracing::debug!("Cancelling remaining downloads via shutdown token");
        self.shutdown_token.cancel();
    }
}

/// Keeps a download counted in [`AppState::streams_inflight`].
#[must_use]
pub struct InflightGuard {
    inflight: Arc<AtomicUsize>,
}

impl InflightGuard {
    fn new(inflight: Arc<AtomicUsize>) -> Self {
        inflight.fetch_add(1, Ordering::Relaxed);
        increment_streams_inflight();
        Self { inflight }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inflight.fetch_sub(1, Ordering::Relaxed);
        decrement_streams_inflight();
    }
}
