//! BlueZ scanning adapter (Linux, `bluetooth` feature).
//!
//! Runs LE discovery through `bluer` and forwards every discovered or updated
//! device as a [`RawAdvertisement`]. Discovery stops when the session is
//! closed: the forwarding task is aborted, which drops the discovery stream.

use bluer::{Adapter, AdapterEvent, DiscoveryFilter, DiscoveryTransport, ErrorKind, Session};
use futures::{pin_mut, Stream, StreamExt};
use tokio::sync::{mpsc, OnceCell};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::scanner::{RawAdvertisement, ScanAdapter, ScanError, ScanSession};

/// Map a BlueZ error onto the scanning capability errors.
fn map_error(err: &bluer::Error) -> ScanError {
    match err.kind {
        ErrorKind::NotAuthorized | ErrorKind::NotPermitted => ScanError::PermissionDenied,
        ErrorKind::NotSupported => ScanError::Unsupported,
        _ => ScanError::AdapterUnavailable,
    }
}

/// Scanning adapter backed by the BlueZ daemon.
///
/// The D-Bus session is established on first use and kept afterwards, so a
/// daemon that is not up yet is retried on the next scan cycle.
pub struct BluerAdapter {
    session: OnceCell<Session>,
    adapter_name: Option<String>,
}

impl BluerAdapter {
    /// Adapter for `adapter_name` (e.g. `hci1`), or the default adapter when `None`.
    #[must_use]
    pub fn new(adapter_name: Option<String>) -> Self {
        Self {
            session: OnceCell::new(),
            adapter_name,
        }
    }

    async fn adapter(&self) -> Result<Adapter, ScanError> {
        let session = self
            .session
            .get_or_try_init(Session::new)
            .await
            .map_err(|err| {
                warn!(error = %err, "Failed to connect to BlueZ");
                map_error(&err)
            })?;

        let adapter = match &self.adapter_name {
            Some(name) => session.adapter(name),
            None => session.default_adapter().await,
        };
        adapter.map_err(|err| {
            debug!(error = %err, "Bluetooth adapter not available");
            map_error(&err)
        })
    }
}

/// Open BlueZ discovery session.
pub struct BluerSession {
    forwarder: JoinHandle<()>,
}

impl ScanSession for BluerSession {
    fn close(&mut self) {
        self.forwarder.abort();
    }
}

impl ScanAdapter for BluerAdapter {
    type Session = BluerSession;

    // BlueZ enforces its own D-Bus policy; failures show up when opening.
    fn has_required_permissions(&self) -> bool {
        true
    }

    async fn open_scan(
        &self,
        events: mpsc::Sender<RawAdvertisement>,
    ) -> Result<Self::Session, ScanError> {
        let adapter = self.adapter().await?;

        if !adapter.is_powered().await.map_err(|err| map_error(&err))? {
            return Err(ScanError::AdapterUnavailable);
        }

        adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..Default::default()
            })
            .await
            .map_err(|err| map_error(&err))?;

        let discovery = adapter
            .discover_devices_with_changes()
            .await
            .map_err(|err| map_error(&err))?;
        debug!(adapter = adapter.name(), "LE discovery started");

        let forwarder = tokio::spawn(forward_discoveries(adapter, discovery, events));
        Ok(BluerSession { forwarder })
    }
}

async fn forward_discoveries(
    adapter: Adapter,
    discovery: impl Stream<Item = AdapterEvent> + Send,
    events: mpsc::Sender<RawAdvertisement>,
) {
    pin_mut!(discovery);

    while let Some(event) = discovery.next().await {
        let AdapterEvent::DeviceAdded(address) = event else {
            continue;
        };

        let Ok(device) = adapter.device(address) else {
            continue;
        };
        let Ok(Some(rssi)) = device.rssi().await else {
            continue;
        };
        let identifier = device.name().await.ok().flatten();

        let advertisement = RawAdvertisement {
            identifier,
            address: address.to_string(),
            rssi,
        };
        match events.try_send(advertisement) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                trace!(address = %dropped.address, "Advertisement queue full, dropping");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }
}
