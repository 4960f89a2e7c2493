//! Status events published by the scheduler.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::registry::floor_label;
use crate::scanner::ScanError;

/// What the scan cycle is currently doing, for display and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanStatus {
    /// A scan window is open.
    Scanning,
    /// The last window produced a floor.
    FloorDetected {
        /// Floor that was persisted.
        floor: u32,
    },
    /// The last window heard no beacon above threshold.
    NoBeaconInRange,
    /// The Bluetooth radio is off or unreachable.
    AdapterDisabled,
    /// Bluetooth LE scanning is not supported; scanning has stopped for good.
    Unsupported,
    /// Scanning permission is missing.
    PermissionRevoked,
}

impl ScanStatus {
    /// Stable machine-readable name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Scanning => "scanning",
            Self::FloorDetected { .. } => "floor_detected",
            Self::NoBeaconInRange => "no_beacon_in_range",
            Self::AdapterDisabled => "adapter_disabled",
            Self::Unsupported => "unsupported",
            Self::PermissionRevoked => "permission_revoked",
        }
    }

    /// Short text suitable for a notification line.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Scanning => "Detecting floor...".to_string(),
            Self::FloorDetected { floor } => format!("Floor detected: {}", floor_label(*floor)),
            Self::NoBeaconInRange => "Searching for beacons...".to_string(),
            Self::AdapterDisabled => "Bluetooth disabled".to_string(),
            Self::Unsupported => "Bluetooth LE not supported on this device".to_string(),
            Self::PermissionRevoked => "Bluetooth permission required".to_string(),
        }
    }

    /// The scanning error behind a failure status, if this is one.
    #[must_use]
    pub const fn failure(&self) -> Option<ScanError> {
        match self {
            Self::AdapterDisabled => Some(ScanError::AdapterUnavailable),
            Self::Unsupported => Some(ScanError::Unsupported),
            Self::PermissionRevoked => Some(ScanError::PermissionDenied),
            Self::Scanning | Self::FloorDetected { .. } | Self::NoBeaconInRange => None,
        }
    }
}

impl From<ScanError> for ScanStatus {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::AdapterUnavailable => Self::AdapterDisabled,
            ScanError::Unsupported => Self::Unsupported,
            ScanError::PermissionDenied => Self::PermissionRevoked,
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
