//! Custom error types and diagnostic reporting.
//!
//! This module defines the primary error type, [`SpectroError`], for the
//! entire crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure kinds a spectrometer session can
//! produce, from lifecycle misuse to transport-level faults.
//!
//! ## Error Hierarchy
//!
//! - **`NotReady`**: the registry has not discovered any device; nothing else
//!   may be called.
//! - **`InvalidIndex`** / **`AlreadyActive`** / **`NotActivated`**: session
//!   lifecycle misuse. These indicate programmer or configuration error and
//!   are reported immediately with no local recovery.
//! - **`IntegrationOutOfRange`**: requested integration time or averaging
//!   count lies outside the device limits.
//! - **`DarkMismatch`**: a strict-mode live capture does not match the stored
//!   dark frame's parameter pair.
//! - **`Hardware`**: a transport-level failure (I/O timeout, disconnect),
//!   wrapped via `#[from]`. The core never retries these; retry policy
//!   belongs to the caller.
//! - **`ShutdownFailed`**: aggregate of per-session close failures from
//!   `close_all`.
//!
//! Auto-exposure hitting its ceiling is deliberately *not* an error: it is
//! reported as [`SeekState::BoundsExceeded`](crate::autoexposure::SeekState)
//! alongside a usable result.
//!
//! ## Integer status codes
//!
//! Callers porting integer-status instrument code can map every error through
//! [`SpectroError::status_code`] (0 = success convention, negative = failure
//! kind) and translate any code back to a diagnostic string with
//! [`describe`], which never fails.

use crate::transport::TransportError;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type SpectroResult<T> = std::result::Result<T, SpectroError>;

/// Failure kinds reported by the acquisition core.
#[derive(Error, Debug)]
pub enum SpectroError {
    #[error("Device registry not initialized (no spectrometer found)")]
    NotReady,

    #[error("No device is known under index {0}")]
    InvalidIndex(u32),

    #[error("Device {0} is already activated")]
    AlreadyActive(u32),

    #[error("Device {0} is not activated")]
    NotActivated(u32),

    #[error(
        "Integration {integration_ms} ms x {averaging} outside device limits \
         [{min_ms}, {max_ms}] ms, averaging <= {max_averaging}"
    )]
    IntegrationOutOfRange {
        integration_ms: f64,
        averaging: u32,
        min_ms: f64,
        max_ms: f64,
        max_averaging: u32,
    },

    #[error(
        "Stored dark frame ({stored_ms} ms x {stored_avg}) does not match \
         live capture ({requested_ms} ms x {requested_avg})"
    )]
    DarkMismatch {
        stored_ms: f64,
        stored_avg: u32,
        requested_ms: f64,
        requested_avg: u32,
    },

    #[error("Hardware fault: {0}")]
    Hardware(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<SpectroError>),
}

// Integer status codes for callers porting integer-status instrument code.

/// Status code for success.
pub const STATUS_OK: i32 = 0;
/// Registry not initialized / no device found.
pub const STATUS_NOT_READY: i32 = -1;
/// Unknown device index.
pub const STATUS_INVALID_INDEX: i32 = -2;
/// Index re-activated without closing.
pub const STATUS_ALREADY_ACTIVE: i32 = -3;
/// Session below the Activated state.
pub const STATUS_NOT_ACTIVATED: i32 = -4;
/// Integration/averaging outside device limits.
pub const STATUS_INTEGRATION_OUT_OF_RANGE: i32 = -5;
/// Strict-mode dark frame parameter mismatch.
pub const STATUS_DARK_MISMATCH: i32 = -6;
/// Transport-level failure.
pub const STATUS_HARDWARE_FAULT: i32 = -7;
/// Configuration error.
pub const STATUS_CONFIG: i32 = -8;
/// Aggregate shutdown failure.
pub const STATUS_SHUTDOWN_FAILED: i32 = -9;
/// Advisory (non-fatal): auto-exposure hit its ceiling with a usable result.
pub const STATUS_BOUNDS_EXCEEDED: i32 = 1;

impl SpectroError {
    /// Map this error to its integer status code.
    pub fn status_code(&self) -> i32 {
        match self {
            SpectroError::NotReady => STATUS_NOT_READY,
            SpectroError::InvalidIndex(_) => STATUS_INVALID_INDEX,
            SpectroError::AlreadyActive(_) => STATUS_ALREADY_ACTIVE,
            SpectroError::NotActivated(_) => STATUS_NOT_ACTIVATED,
            SpectroError::IntegrationOutOfRange { .. } => STATUS_INTEGRATION_OUT_OF_RANGE,
            SpectroError::DarkMismatch { .. } => STATUS_DARK_MISMATCH,
            SpectroError::Hardware(_) => STATUS_HARDWARE_FAULT,
            SpectroError::Config(_) => STATUS_CONFIG,
            SpectroError::ShutdownFailed(_) => STATUS_SHUTDOWN_FAILED,
        }
    }
}

/// Translate an integer status code into a diagnostic message.
///
/// Pure function with no side effects; never fails. Unknown or foreign codes
/// degrade to a generic message instead of propagating a secondary error.
/// The device index is included so multi-device logs stay attributable.
pub fn describe(index: u32, code: i32) -> String {
    let diagnostic = match code {
        STATUS_OK => "operation completed successfully",
        STATUS_NOT_READY => "device registry not initialized; no spectrometer found",
        STATUS_INVALID_INDEX => "no device is known under this index",
        STATUS_ALREADY_ACTIVE => "device is already activated; close it first",
        STATUS_NOT_ACTIVATED => "device is not activated",
        STATUS_INTEGRATION_OUT_OF_RANGE => {
            "requested integration time or averaging count is outside device limits"
        }
        STATUS_DARK_MISMATCH => {
            "stored dark frame does not match the live capture parameters"
        }
        STATUS_HARDWARE_FAULT => "transport-level hardware fault (timeout or disconnect)",
        STATUS_CONFIG => "configuration error",
        STATUS_SHUTDOWN_FAILED => "one or more sessions failed to close cleanly",
        STATUS_BOUNDS_EXCEEDED => {
            "auto-exposure hit its integration/averaging ceiling; result is usable but degraded"
        }
        _ => "unknown error",
    };
    format!("device {index}: {diagnostic} (status {code})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SpectroError::NotActivated(3);
        assert_eq!(err.to_string(), "Device 3 is not activated");
    }

    #[test]
    fn test_status_codes_are_distinct() {
        let codes = [
            SpectroError::NotReady.status_code(),
            SpectroError::InvalidIndex(0).status_code(),
            SpectroError::AlreadyActive(0).status_code(),
            SpectroError::NotActivated(0).status_code(),
            SpectroError::DarkMismatch {
                stored_ms: 1.0,
                stored_avg: 1,
                requested_ms: 2.0,
                requested_avg: 1,
            }
            .status_code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
            assert!(*a < 0);
        }
    }

    #[test]
    fn test_describe_never_fails() {
        // Known, advisory, and foreign codes all produce a message.
        assert!(describe(0, STATUS_OK).contains("successfully"));
        assert!(describe(1, STATUS_DARK_MISMATCH).contains("dark frame"));
        assert!(describe(1, STATUS_BOUNDS_EXCEEDED).contains("usable"));
        assert!(describe(7, -9999).contains("unknown error"));
        assert!(describe(7, -9999).contains("device 7"));
    }

    #[test]
    fn test_shutdown_failed_aggregates() {
        let err = SpectroError::ShutdownFailed(vec![
            SpectroError::NotActivated(0),
            SpectroError::InvalidIndex(9),
        ]);
        assert!(err.to_string().contains("Shutdown failed"));
        assert_eq!(err.status_code(), STATUS_SHUTDOWN_FAILED);
    }
}
