//! Windowed Bluetooth scanning.
//!
//! Platform scanners deliver advertisements by push. A [`ScanAdapter`] pushes
//! them into a bounded channel for as long as its session is open, and the
//! [`ScanDriver`] turns that channel into a pull sequence of [`Observation`]s
//! restricted to registered beacons. Sessions are always closed when their
//! [`ScanHandle`] is closed or dropped, so a cancelled window never leaves the
//! radio scanning.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::estimator::WindowObservations;
use crate::registry::BeaconRegistry;

/// Default bound of the advertisement queue between adapter and driver.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Reasons a scan window cannot be opened.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ScanError {
    /// The Bluetooth radio is off or could not be reached.
    #[error("Bluetooth adapter is unavailable or powered off")]
    AdapterUnavailable,

    /// The platform lacks Bluetooth LE scanning.
    #[error("Bluetooth LE scanning is not supported on this platform")]
    Unsupported,

    /// Scanning permission has not been granted.
    #[error("Permission to scan for Bluetooth devices was denied")]
    PermissionDenied,
}

impl ScanError {
    /// Whether the condition lasts for the lifetime of the process.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Unsupported)
    }
}

/// An advertisement as reported by the platform, before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAdvertisement {
    /// Advertised device name, if any.
    pub identifier: Option<String>,
    /// Hardware address of the advertiser.
    pub address: String,
    /// Received signal strength in dBm.
    pub rssi: i16,
}

impl RawAdvertisement {
    /// Advertisement from a named device.
    pub fn named(identifier: impl Into<String>, address: impl Into<String>, rssi: i16) -> Self {
        Self {
            identifier: Some(identifier.into()),
            address: address.into(),
            rssi,
        }
    }
}

/// A sighting of a registered beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Registered identifier of the beacon.
    pub beacon_identifier: String,
    /// Hardware address the advertisement came from.
    pub address: String,
    /// Received signal strength in dBm.
    pub signal_strength: i16,
}

/// An open scanning session on the platform adapter.
pub trait ScanSession: Send + 'static {
    /// Stop scanning and release the radio. Called exactly once per session.
    fn close(&mut self);
}

/// Platform scanning capability.
pub trait ScanAdapter: Send + Sync + 'static {
    /// Session type returned by [`ScanAdapter::open_scan`].
    type Session: ScanSession;

    /// Whether the process currently holds the permissions needed to scan.
    fn has_required_permissions(&self) -> bool;

    /// Start scanning, pushing every advertisement into `events` until the
    /// returned session is closed.
    fn open_scan(
        &self,
        events: mpsc::Sender<RawAdvertisement>,
    ) -> impl Future<Output = Result<Self::Session, ScanError>> + Send;
}

/// Opens scan windows on an adapter and filters them against the registry.
pub struct ScanDriver<A> {
    adapter: A,
    registry: Arc<BeaconRegistry>,
    channel_capacity: usize,
}

impl<A: ScanAdapter> ScanDriver<A> {
    /// Create a driver with the default queue bound.
    pub fn new(adapter: A, registry: Arc<BeaconRegistry>) -> Self {
        Self::with_capacity(adapter, registry, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a driver whose advertisement queue holds at most `capacity` events.
    pub fn with_capacity(adapter: A, registry: Arc<BeaconRegistry>, capacity: usize) -> Self {
        Self {
            adapter,
            registry,
            channel_capacity: capacity.max(1),
        }
    }

    /// The underlying adapter.
    pub const fn adapter(&self) -> &A {
        &self.adapter
    }

    /// The registry used for filtering.
    pub const fn registry(&self) -> &Arc<BeaconRegistry> {
        &self.registry
    }

    /// Open a scan window.
    ///
    /// Permissions are checked on every call since they can be revoked at
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::PermissionDenied`] without touching the adapter if
    /// permissions are missing, or whatever the adapter reports when opening.
    pub async fn open(&self) -> Result<ScanHandle<A::Session>, ScanError> {
        if !self.adapter.has_required_permissions() {
            return Err(ScanError::PermissionDenied);
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let session = self.adapter.open_scan(tx).await?;
        debug!("Scan session opened");

        Ok(ScanHandle {
            session: Some(session),
            events: rx,
            registry: Arc::clone(&self.registry),
        })
    }
}

/// A held scan window. Closing or dropping it stops the adapter session.
pub struct ScanHandle<S: ScanSession> {
    session: Option<S>,
    events: mpsc::Receiver<RawAdvertisement>,
    registry: Arc<BeaconRegistry>,
}

impl<S: ScanSession> ScanHandle<S> {
    /// Next sighting of a registered beacon, or `None` once the adapter stops.
    ///
    /// Cancel safe.
    pub async fn next_observation(&mut self) -> Option<Observation> {
        while let Some(raw) = self.events.recv().await {
            match raw.identifier {
                Some(identifier) if self.registry.is_known(&identifier) => {
                    return Some(Observation {
                        beacon_identifier: identifier,
                        address: raw.address,
                        signal_strength: raw.rssi,
                    });
                }
                other => {
                    trace!(name = ?other, address = %raw.address, "Ignoring unregistered device");
                }
            }
        }
        None
    }

    /// Collect observations until `window` has elapsed or the adapter stops.
    pub async fn collect_window(&mut self, window: Duration) -> WindowObservations {
        let deadline = Instant::now() + window;
        let mut observations = WindowObservations::new();

        loop {
            tokio::select! {
                () = sleep_until(deadline) => break,
                next = self.next_observation() => match next {
                    Some(observation) => observations.record(observation),
                    None => {
                        debug!("Adapter ended scan before window deadline");
                        break;
                    }
                },
            }
        }

        observations
    }

    /// Stop scanning and release the adapter.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            self.events.close();
            session.close();
            debug!("Scan session closed");
        }
    }
}

impl<S: ScanSession> Drop for ScanHandle<S> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BeaconDefinition;
    use crate::simulated::{SimulatedAdapter, SimulatedCycle};

    fn registry() -> Arc<BeaconRegistry> {
        Arc::new(
            BeaconRegistry::new(vec![
                BeaconDefinition::new("ground", 0),
                BeaconDefinition::new("one", 1),
            ])
            .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_devices_are_dropped() {
        let adapter = SimulatedAdapter::new(vec![SimulatedCycle::Advertise(vec![
            RawAdvertisement::named("headphones", "11:11:11:11:11:11", -40),
            RawAdvertisement {
                identifier: None,
                address: "22:22:22:22:22:22".into(),
                rssi: -30,
            },
            RawAdvertisement::named("one", "AA:AA:AA:AA:AA:01", -70),
        ])]);
        let driver = ScanDriver::new(adapter, registry());

        let mut handle = driver.open().await.unwrap();
        let observation = handle.next_observation().await.unwrap();
        assert_eq!(observation.beacon_identifier, "one");
        assert_eq!(observation.signal_strength, -70);
        handle.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_checked_before_opening() {
        let adapter = SimulatedAdapter::new(Vec::new());
        adapter.set_permissions(false);
        let driver = ScanDriver::new(adapter.clone(), registry());

        let result = driver.open().await;
        assert_eq!(result.err(), Some(ScanError::PermissionDenied));
        assert_eq!(adapter.opened_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_errors_propagate() {
        let adapter = SimulatedAdapter::new(vec![SimulatedCycle::Fail(ScanError::Unsupported)]);
        let driver = ScanDriver::new(adapter, registry());
        assert_eq!(driver.open().await.err(), Some(ScanError::Unsupported));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_collects_until_deadline_and_closes() {
        let adapter = SimulatedAdapter::new(vec![SimulatedCycle::Advertise(vec![
            RawAdvertisement::named("ground", "AA:AA:AA:AA:AA:00", -80),
            RawAdvertisement::named("ground", "AA:AA:AA:AA:AA:00", -65),
            RawAdvertisement::named("one", "AA:AA:AA:AA:AA:01", -75),
        ])]);
        let driver = ScanDriver::new(adapter.clone(), registry());

        let started = Instant::now();
        let mut handle = driver.open().await.unwrap();
        let window = handle.collect_window(Duration::from_secs(2)).await;
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(window.strength_of("ground"), Some(-65));
        assert_eq!(window.strength_of("one"), Some(-75));

        assert_eq!(adapter.closed_sessions(), 0);
        handle.close();
        assert_eq!(adapter.closed_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_closes_session() {
        let adapter = SimulatedAdapter::new(vec![SimulatedCycle::Silent]);
        let driver = ScanDriver::new(adapter.clone(), registry());

        {
            let mut handle = driver.open().await.unwrap();
            let collect = handle.collect_window(Duration::from_secs(60));
            let _ = tokio::time::timeout(Duration::from_millis(10), collect).await;
        }

        assert_eq!(adapter.opened_sessions(), 1);
        assert_eq!(adapter.closed_sessions(), 1);
    }
}
