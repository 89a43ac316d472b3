//! Per-device session state and serialization.
//!
//! A [`DeviceSession`] binds one device index to one open transport. All
//! mutable session state (lifecycle state, stored dark frame, calibration
//! factors, session defaults) lives behind a single `tokio::sync::Mutex`;
//! every hardware operation on the index locks it for its full duration,
//! which is what serializes concurrent calls on one device while leaving
//! distinct devices free to proceed in parallel.
//!
//! The auto-exposure controller holds the same lock across its entire
//! convergence loop, so no two runs on one device can interleave with each
//! other or with a primitive capture.

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::core::{
    CalibrationFactors, DarkFrame, DeviceLimits, SessionState,
};
use crate::error::{SpectroError, SpectroResult};
use crate::transport::Transport;

/// Auto-exposure ceilings for one session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AutoBounds {
    /// Longest integration time auto-exposure may select, in milliseconds
    pub max_integration_ms: f64,
    /// Largest averaging count auto-exposure may select
    pub max_averaging: u32,
}

impl AutoBounds {
    /// Clamp the bounds to what the device supports.
    pub fn clamped_to(self, limits: &DeviceLimits) -> Self {
        Self {
            max_integration_ms: self
                .max_integration_ms
                .clamp(limits.min_integration_ms, limits.max_integration_ms),
            max_averaging: self.max_averaging.clamp(1, limits.max_averaging),
        }
    }
}

/// Mutable state of one session, guarded by the per-index mutex.
#[derive(Debug)]
pub struct SessionInner {
    /// Lifecycle state
    pub state: SessionState,
    /// Session default integration time in milliseconds
    pub integration_ms: f64,
    /// Session default averaging count
    pub averaging: u32,
    /// Stored dark baseline, if one has been captured
    pub dark: Option<DarkFrame>,
    /// Per-session calibration factors
    pub calibration: CalibrationFactors,
    /// Auto-exposure ceilings (clamped to device limits)
    pub bounds: AutoBounds,
}

/// One activated device: an open transport plus its guarded state.
pub struct DeviceSession {
    index: u32,
    serial_number: String,
    transport: Arc<dyn Transport>,
    limits: DeviceLimits,
    inner: Mutex<SessionInner>,
}

impl DeviceSession {
    /// Create a session over an already-opened transport.
    pub fn new(index: u32, transport: Arc<dyn Transport>) -> Self {
        let limits = transport.limits();
        let serial_number = transport.serial_number().to_string();
        Self {
            index,
            serial_number,
            transport,
            limits,
            inner: Mutex::new(SessionInner {
                state: SessionState::Activated,
                integration_ms: 100.0,
                averaging: 1,
                dark: None,
                calibration: CalibrationFactors::default(),
                bounds: AutoBounds {
                    max_integration_ms: limits.max_integration_ms,
                    max_averaging: limits.max_averaging,
                },
            }),
        }
    }

    /// Device index this session is bound to.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Device serial number.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// The transport behind this session.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Static device limits.
    pub fn limits(&self) -> DeviceLimits {
        self.limits
    }

    /// Acquire exclusive ownership of the session for one operation.
    ///
    /// The guard must be held for the whole hardware transaction; composite
    /// operations (auto-exposure) hold it across their full loop.
    pub async fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().await
    }

    /// Acquire the session and verify it accepts hardware operations.
    pub async fn lock_active(&self) -> SpectroResult<MutexGuard<'_, SessionInner>> {
        let guard = self.inner.lock().await;
        if !guard.state.is_active() {
            return Err(SpectroError::NotActivated(self.index));
        }
        Ok(guard)
    }

    /// Validate a requested parameter pair against the device limits.
    pub fn validate(&self, integration_ms: f64, averaging: u32) -> SpectroResult<()> {
        if !self.limits.allows(integration_ms, averaging) {
            return Err(SpectroError::IntegrationOutOfRange {
                integration_ms,
                averaging,
                min_ms: self.limits.min_integration_ms,
                max_ms: self.limits.max_integration_ms,
                max_averaging: self.limits.max_averaging,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimulatedSpectrometer;

    fn session() -> DeviceSession {
        DeviceSession::new(0, Arc::new(SimulatedSpectrometer::new("SIM-100")))
    }

    #[tokio::test]
    async fn test_new_session_is_activated_and_dark_less() {
        let session = session();
        let inner = session.lock().await;
        assert_eq!(inner.state, SessionState::Activated);
        assert!(inner.dark.is_none());
        assert_eq!(inner.calibration, CalibrationFactors::default());
    }

    #[tokio::test]
    async fn test_bounds_clamp_to_limits() {
        let session = session();
        let bounds = AutoBounds {
            max_integration_ms: 1e9,
            max_averaging: u32::MAX,
        };
        let clamped = bounds.clamped_to(&session.limits());
        assert_eq!(clamped.max_integration_ms, session.limits().max_integration_ms);
        assert_eq!(clamped.max_averaging, session.limits().max_averaging);
    }

    #[tokio::test]
    async fn test_validate_rejects_out_of_range() {
        let session = session();
        assert!(session.validate(100.0, 4).is_ok());
        assert!(matches!(
            session.validate(-1.0, 4),
            Err(SpectroError::IntegrationOutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_lock_active_rejects_closed() {
        let session = session();
        session.lock().await.state = SessionState::Closed;
        assert!(matches!(
            session.lock_active().await,
            Err(SpectroError::NotActivated(0))
        ));
    }
}
