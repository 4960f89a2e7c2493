//! # elevox-core
//!
//! Core logic for elevox: works out which floor of a building a device is on
//! from the Bluetooth beacons it can hear.
//!
//! ## Architecture
//!
//! Data flows in one direction:
//!
//! ```text
//! adapter events ─▶ ScanDriver ─▶ window ─▶ FloorEstimator ─▶ FloorScheduler ─▶ readers
//! ```
//!
//! - [`registry`] - Compiled-in beacon → floor table and detection constants
//! - [`scanner`] - Windowed scanning over a pluggable platform adapter
//! - [`estimator`] - Threshold and hysteresis floor estimation
//! - [`scheduler`] - Scan duty cycle, status events and the published reading
//! - [`reading`] - The floor reading cell and its on-disk copy
//! - [`status`] - Status events for display
//! - [`config`] - Configuration loading, saving and validation
//! - [`simulated`] - Scripted adapter for tests and hardware-less runs
//! - `bluetooth` - BlueZ adapter (`bluetooth` feature, Linux only)
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

#[cfg(all(feature = "bluetooth", target_os = "linux"))]
pub mod bluetooth;
pub mod config;
pub mod error;
pub mod estimator;
pub mod reading;
pub mod registry;
pub mod scanner;
pub mod scheduler;
pub mod simulated;
pub mod status;

// Re-export primary types for convenience
#[cfg(all(feature = "bluetooth", target_os = "linux"))]
pub use bluetooth::{BluerAdapter, BluerSession};
pub use config::{
    default_config_path, ConfigError, ConfigResult, DetectionConfig, ElevoxConfig, LoggingConfig,
    ScanConfig, ServerConfig, StorageConfig,
};
pub use error::{ElevoxError, Result};
pub use estimator::{
    BeaconSighting, DetectionState, Estimate, FloorChange, FloorEstimator, ReportEntry,
    WindowObservations, WindowReport,
};
pub use reading::{
    default_reading_path, reading_cell, FloorReading, ReadingHandle, ReadingPublisher,
    ReadingStore, StoreError,
};
pub use registry::{
    floor_label, BeaconDefinition, BeaconRegistry, RegistryError, HYSTERESIS_MARGIN_DB,
    RSSI_THRESHOLD, SCAN_INTERVAL, SCAN_WINDOW,
};
pub use scanner::{
    Observation, RawAdvertisement, ScanAdapter, ScanDriver, ScanError, ScanHandle, ScanSession,
};
pub use scheduler::{FloorScheduler, ScanTiming, SchedulerError, SchedulerHandle};
pub use simulated::{SimulatedAdapter, SimulatedCycle, SimulatedSession};
pub use status::ScanStatus;
