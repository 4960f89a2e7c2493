//! Scripted scanning adapter.
//!
//! Replays a fixed script of per-window outcomes. Used by the test suite and
//! by the server when it is built without the `bluetooth` feature.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::scanner::{RawAdvertisement, ScanAdapter, ScanError, ScanSession};

/// Outcome of one `open_scan` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedCycle {
    /// Opening the scan fails.
    Fail(ScanError),
    /// The scan opens and delivers these advertisements, then stays quiet.
    Advertise(Vec<RawAdvertisement>),
    /// The scan opens and hears nothing.
    Silent,
}

#[derive(Debug)]
struct Shared {
    script: Mutex<VecDeque<SimulatedCycle>>,
    open_delay: Mutex<Duration>,
    permissions: AtomicBool,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Adapter that replays a script; once the script runs out every scan is silent.
#[derive(Debug, Clone)]
pub struct SimulatedAdapter {
    shared: Arc<Shared>,
}

impl SimulatedAdapter {
    /// Adapter replaying `script` in order.
    #[must_use]
    pub fn new(script: Vec<SimulatedCycle>) -> Self {
        Self {
            shared: Arc::new(Shared {
                script: Mutex::new(script.into()),
                open_delay: Mutex::new(Duration::ZERO),
                permissions: AtomicBool::new(true),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            }),
        }
    }

    /// Append an outcome to the script.
    pub fn push(&self, cycle: SimulatedCycle) {
        self.shared
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(cycle);
    }

    /// Make every `open_scan` take `delay` before it resolves, like a slow radio.
    pub fn set_open_delay(&self, delay: Duration) {
        *self
            .shared
            .open_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Grant or revoke scanning permission.
    pub fn set_permissions(&self, granted: bool) {
        self.shared.permissions.store(granted, Ordering::SeqCst);
    }

    /// Sessions opened so far.
    #[must_use]
    pub fn opened_sessions(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Sessions closed so far.
    #[must_use]
    pub fn closed_sessions(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn next_cycle(&self) -> SimulatedCycle {
        self.shared
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(SimulatedCycle::Silent)
    }
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Session of a [`SimulatedAdapter`].
#[derive(Debug)]
pub struct SimulatedSession {
    feeder: JoinHandle<()>,
    shared: Arc<Shared>,
}

impl ScanSession for SimulatedSession {
    fn close(&mut self) {
        self.feeder.abort();
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl ScanAdapter for SimulatedAdapter {
    type Session = SimulatedSession;

    fn has_required_permissions(&self) -> bool {
        self.shared.permissions.load(Ordering::SeqCst)
    }

    async fn open_scan(
        &self,
        events: mpsc::Sender<RawAdvertisement>,
    ) -> Result<Self::Session, ScanError> {
        let delay = *self
            .shared
            .open_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let advertisements = match self.next_cycle() {
            SimulatedCycle::Fail(err) => {
                debug!(error = %err, "Simulated scan refused");
                return Err(err);
            }
            SimulatedCycle::Advertise(advertisements) => advertisements,
            SimulatedCycle::Silent => Vec::new(),
        };

        self.shared.opened.fetch_add(1, Ordering::SeqCst);

        // Hold the sender until aborted so the window runs to its deadline.
        let feeder = tokio::spawn(async move {
            for advertisement in advertisements {
                if events.send(advertisement).await.is_err() {
                    return;
                }
            }
            std::future::pending::<()>().await;
        });

        Ok(SimulatedSession {
            feeder,
            shared: Arc::clone(&self.shared),
        })
    }
}
