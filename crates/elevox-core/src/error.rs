//! Unified error types for the elevox core library.
//!
//! Each module has its own error type. [`ElevoxError`] folds the ones that
//! reach a caller ([`ScanError`], [`SchedulerError`], [`ConfigError`]) into
//! one type carrying the HTTP status and machine-readable code the server
//! answers with.
//!
//! Most conditions never surface as errors at all: a missing beacon or a weak
//! signal simply means no update this cycle, capability problems become
//! status events, and store failures are only logged.
//!
//! # Example
//!
//! ```rust
//! use elevox_core::error::{ElevoxError, Result};
//! use elevox_core::ScanError;
//!
//! fn require_scanning(outcome: std::result::Result<(), ScanError>) -> Result<()> {
//!     outcome.map_err(ElevoxError::from)
//! }
//!
//! let err = require_scanning(Err(ScanError::Unsupported)).unwrap_err();
//! assert!(err.is_terminal());
//! assert_eq!(err.http_status_code(), 501);
//! ```

use thiserror::Error;

use crate::config::ConfigError;
use crate::scanner::ScanError;
use crate::scheduler::SchedulerError;

/// The unified error type for all elevox operations.
#[derive(Debug, Error)]
pub enum ElevoxError {
    // =========================================================================
    // SCANNING CAPABILITY ERRORS
    // =========================================================================
    /// The Bluetooth radio is off or unreachable.
    #[error("Bluetooth adapter is unavailable. Turn Bluetooth on to resume floor detection.")]
    AdapterUnavailable,

    /// The platform cannot perform Bluetooth LE scans.
    #[error("Bluetooth LE scanning is not supported on this device")]
    Unsupported,

    /// Scanning permission is missing.
    #[error("Bluetooth scanning permission was denied. Grant it to resume floor detection.")]
    PermissionDenied,

    // =========================================================================
    // SCHEDULER ERRORS
    // =========================================================================
    /// The scan cycle is already running.
    #[error("Floor detection is already running")]
    AlreadyRunning,

    /// The scheduler halted permanently.
    #[error("Floor detection has stopped permanently because scanning is unsupported")]
    SchedulerTerminated,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE ERRORS
    // =========================================================================
    /// Writing persisted state failed.
    #[error("Persistence error: {0}")]
    PersistenceError(String),
}

/// A specialized [`Result`] type for elevox operations.
pub type Result<T> = std::result::Result<T, ElevoxError>;

impl ElevoxError {
    /// Returns `true` if retrying can never succeed in this process.
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Unsupported | Self::SchedulerTerminated)
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 403 Forbidden - permission missing
            Self::PermissionDenied => 403,

            // 409 Conflict - scheduler state
            Self::AlreadyRunning => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error
            Self::PersistenceError(_) => 500,

            // 501 Not Implemented - hardware lacks the capability
            Self::Unsupported | Self::SchedulerTerminated => 501,

            // 503 Service Unavailable - radio off
            Self::AdapterUnavailable => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AdapterUnavailable => "ADAPTER_UNAVAILABLE",
            Self::Unsupported => "SCAN_UNSUPPORTED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::AlreadyRunning => "ALREADY_RUNNING",
            Self::SchedulerTerminated => "SCHEDULER_TERMINATED",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<ScanError> for ElevoxError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::AdapterUnavailable => Self::AdapterUnavailable,
            ScanError::Unsupported => Self::Unsupported,
            ScanError::PermissionDenied => Self::PermissionDenied,
        }
    }
}

impl From<SchedulerError> for ElevoxError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::AlreadyRunning => Self::AlreadyRunning,
            SchedulerError::Terminated => Self::SchedulerTerminated,
        }
    }
}

impl From<ConfigError> for ElevoxError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Load(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Serialize(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Write { path, source } => {
                Self::PersistenceError(format!("Failed to write {path}: {source}"))
            }
            err @ (ConfigError::Validation { .. } | ConfigError::MultipleValidationErrors(_)) => {
                Self::ConfigValidationError(err.to_string())
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
