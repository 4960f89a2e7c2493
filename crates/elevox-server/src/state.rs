//! Application state shared across handlers.

use std::future::Future;
use std::sync::Arc;

use elevox_core::{BeaconRegistry, DetectionConfig, SchedulerHandle};
use tokio::sync::watch;

/// Shared application state.
///
/// Handlers only ever read the published reading and status; none of them
/// waits on the scan cycle.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    scheduler: SchedulerHandle,
    registry: Arc<BeaconRegistry>,
    detection: DetectionConfig,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Create application state around a running (or stopped) scheduler.
    #[must_use]
    pub fn new(
        scheduler: SchedulerHandle,
        registry: Arc<BeaconRegistry>,
        detection: DetectionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                scheduler,
                registry,
                detection,
                shutdown: watch::Sender::new(false),
            }),
        }
    }

    /// Reading, status and reset access to the scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.inner.scheduler
    }

    /// The beacon table in use.
    #[must_use]
    pub fn registry(&self) -> &BeaconRegistry {
        &self.inner.registry
    }

    /// Detection tuning in use.
    #[must_use]
    pub fn detection(&self) -> &DetectionConfig {
        &self.inner.detection
    }

    /// Tell long-lived responses that the server is going down.
    pub fn begin_shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// Resolves once [`begin_shutdown`](Self::begin_shutdown) has been called,
    /// including when it was called before this future was created.
    pub fn shutdown_requested(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut shutdown = self.inner.shutdown.subscribe();
        async move {
            // The sender lives in the state, so an error means it is gone too.
            let _ = shutdown.wait_for(|stopping| *stopping).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::api::test_support::server_state;

    #[tokio::test]
    async fn test_shutdown_wakes_waiters_registered_before_and_after() {
        let (state, _scheduler) = server_state();
        let early = tokio::spawn(state.shutdown_requested());

        state.begin_shutdown();

        tokio::time::timeout(Duration::from_secs(1), early)
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), state.shutdown_requested())
            .await
            .unwrap();
    }
}
