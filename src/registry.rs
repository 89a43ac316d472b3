//! Device registry: index-to-session mapping and lifecycle management.
//!
//! The registry is the only way to reach a [`DeviceSession`]; there is no
//! ambient global device table. It owns discovery results (one transport per
//! attached device, addressed by a dense integer index) and the set of
//! currently activated sessions.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                  DeviceRegistry                    │
//! │  index 0 ─> DeviceSession   index 1 ─> (inactive)  │
//! ├────────────────────────────────────────────────────┤
//! │                 Transport trait                    │
//! │        SimulatedSpectrometer | USB | serial        │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! A device must be activated before any measurement; closing a session
//! destroys its dark frame and calibration factors, so re-activation yields a
//! fresh session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::core::{DeviceParameter, SessionState};
use crate::error::{SpectroError, SpectroResult};
use crate::session::{AutoBounds, DeviceSession};
use crate::transport::{SimulatedSpectrometer, Transport};

/// Opaque activation payload.
///
/// Carries the vendor calibration-file path handed to activation; the file's
/// contents are external state and never parsed here.
#[derive(Clone, Debug, Default)]
pub struct ConnectionInfo {
    /// Path to the vendor calibration file for this device, if any
    pub calibration_file: Option<PathBuf>,
}

/// Central registry for spectrometer session management.
pub struct DeviceRegistry {
    /// Discovered devices, addressed by dense index
    transports: Vec<Arc<dyn Transport>>,
    /// Activated sessions by index
    sessions: RwLock<HashMap<u32, Arc<DeviceSession>>>,
}

impl DeviceRegistry {
    /// Initialize the registry over a set of discovered transports.
    ///
    /// Must succeed before any other operation. Fails with
    /// [`SpectroError::NotReady`] if no device was found.
    pub fn init(transports: Vec<Arc<dyn Transport>>) -> SpectroResult<Self> {
        if transports.is_empty() {
            return Err(SpectroError::NotReady);
        }
        info!(devices = transports.len(), "spectrometer registry initialized");
        Ok(Self {
            transports,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Initialize a registry over `count` simulated devices (for tests and
    /// offline development).
    pub fn simulated(count: usize) -> SpectroResult<Self> {
        let transports = (0..count)
            .map(|i| {
                Arc::new(SimulatedSpectrometer::new(&format!("SIM-{i:03}")))
                    as Arc<dyn Transport>
            })
            .collect();
        Self::init(transports)
    }

    /// Number of discovered devices.
    pub fn device_count(&self) -> usize {
        self.transports.len()
    }

    /// Whether the index currently has an activated session.
    pub async fn is_active(&self, index: u32) -> bool {
        self.sessions.read().await.contains_key(&index)
    }

    fn transport_for(&self, index: u32) -> SpectroResult<Arc<dyn Transport>> {
        self.transports
            .get(index as usize)
            .cloned()
            .ok_or(SpectroError::InvalidIndex(index))
    }

    /// Bind an index to its physical device and open the transport.
    ///
    /// # Errors
    /// - [`SpectroError::InvalidIndex`] if the index is unknown
    /// - [`SpectroError::AlreadyActive`] if re-activated without closing
    /// - [`SpectroError::Hardware`] if the transport fails to open
    pub async fn activate(&self, index: u32, info: ConnectionInfo) -> SpectroResult<()> {
        let transport = self.transport_for(index)?;

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&index) {
            return Err(SpectroError::AlreadyActive(index));
        }

        transport.open().await?;
        let session = DeviceSession::new(index, transport);
        info!(
            index,
            serial = session.serial_number(),
            calibration_file = ?info.calibration_file,
            "device activated"
        );
        sessions.insert(index, Arc::new(session));
        Ok(())
    }

    /// Look up the activated session for an index.
    ///
    /// Distinguishes an index that was never discovered
    /// ([`SpectroError::InvalidIndex`]) from one that is merely not activated
    /// ([`SpectroError::NotActivated`]).
    pub async fn session(&self, index: u32) -> SpectroResult<Arc<DeviceSession>> {
        self.transport_for(index)?;
        self.sessions
            .read()
            .await
            .get(&index)
            .cloned()
            .ok_or(SpectroError::NotActivated(index))
    }

    /// Release a session and close its transport.
    ///
    /// Closing an already-closed or unknown index fails with
    /// [`SpectroError::InvalidIndex`] but causes no side effect.
    pub async fn close(&self, index: u32) -> SpectroResult<()> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(&index)
                .ok_or(SpectroError::InvalidIndex(index))?
        };
        session.lock().await.state = SessionState::Closed;
        session.transport().close().await?;
        info!(index, "device closed");
        Ok(())
    }

    /// Release every session.
    ///
    /// The session table is always cleared; per-index close failures are
    /// aggregated into [`SpectroError::ShutdownFailed`].
    pub async fn close_all(&self) -> SpectroResult<()> {
        let drained: Vec<_> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().collect()
        };
        let mut failures = Vec::new();
        for (index, session) in drained {
            session.lock().await.state = SessionState::Closed;
            if let Err(e) = session.transport().close().await {
                warn!(index, error = %e, "session failed to close cleanly");
                failures.push(SpectroError::Hardware(e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SpectroError::ShutdownFailed(failures))
        }
    }

    /// Serial number of an activated device.
    pub async fn serial_number(&self, index: u32) -> SpectroResult<String> {
        Ok(self.session(index).await?.serial_number().to_string())
    }

    /// Store session-default integration parameters.
    ///
    /// Validates against the device limits and invalidates a stored dark
    /// frame whose parameters no longer match the new defaults (strict-mode
    /// darks are only valid for the exact pair they were captured under).
    pub async fn set_integration(
        &self,
        index: u32,
        integration_ms: f64,
        averaging: u32,
    ) -> SpectroResult<()> {
        let session = self.session(index).await?;
        session.validate(integration_ms, averaging)?;

        let mut inner = session.lock_active().await?;
        inner.integration_ms = integration_ms;
        inner.averaging = averaging;
        let stale = inner
            .dark
            .as_ref()
            .is_some_and(|d| !d.matches(integration_ms, averaging));
        if stale {
            inner.dark = None;
            if inner.state == SessionState::DarkEstablished {
                inner.state = SessionState::Activated;
            }
            info!(index, "stored dark frame invalidated by parameter change");
        }
        Ok(())
    }

    /// Set the auto-exposure ceilings for a session.
    ///
    /// The requested bounds are clamped to the device limits; the effective
    /// bounds are returned so the caller sees what auto-exposure will use.
    pub async fn set_auto_bounds(
        &self,
        index: u32,
        bounds: AutoBounds,
    ) -> SpectroResult<AutoBounds> {
        let session = self.session(index).await?;
        let clamped = bounds.clamped_to(&session.limits());
        session.lock_active().await?.bounds = clamped;
        Ok(clamped)
    }

    /// Numeric device parameter query.
    ///
    /// Textual-only parameters (the serial number) yield an empty vector;
    /// use [`parameter_text`](Self::parameter_text) for those.
    pub async fn parameter_values(
        &self,
        index: u32,
        param: DeviceParameter,
    ) -> SpectroResult<Vec<f64>> {
        let session = self.session(index).await?;
        let limits = session.limits();
        let wavelengths = session.transport().wavelengths();
        Ok(match param {
            DeviceParameter::SerialNumber => Vec::new(),
            DeviceParameter::ChannelCount => vec![wavelengths.len() as f64],
            DeviceParameter::WavelengthRange => match (wavelengths.first(), wavelengths.last()) {
                (Some(&lo), Some(&hi)) => vec![lo, hi],
                _ => Vec::new(),
            },
            DeviceParameter::IntegrationLimits => {
                vec![limits.min_integration_ms, limits.max_integration_ms]
            }
            DeviceParameter::MaxCounts => vec![limits.max_counts],
        })
    }

    /// Textual device parameter query.
    pub async fn parameter_text(
        &self,
        index: u32,
        param: DeviceParameter,
    ) -> SpectroResult<String> {
        let session = self.session(index).await?;
        let limits = session.limits();
        let wavelengths = session.transport().wavelengths();
        Ok(match param {
            DeviceParameter::SerialNumber => session.serial_number().to_string(),
            DeviceParameter::ChannelCount => wavelengths.len().to_string(),
            DeviceParameter::WavelengthRange => match (wavelengths.first(), wavelengths.last()) {
                (Some(lo), Some(hi)) => format!("{lo:.1}-{hi:.1} nm"),
                _ => String::new(),
            },
            DeviceParameter::IntegrationLimits => format!(
                "{}-{} ms",
                limits.min_integration_ms, limits.max_integration_ms
            ),
            DeviceParameter::MaxCounts => format!("{}", limits.max_counts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_requires_a_device() {
        assert!(matches!(
            DeviceRegistry::init(Vec::new()),
            Err(SpectroError::NotReady)
        ));
        assert!(DeviceRegistry::simulated(1).is_ok());
    }

    #[tokio::test]
    async fn test_activate_unknown_index() {
        let registry = DeviceRegistry::simulated(1).unwrap();
        assert!(matches!(
            registry.activate(5, ConnectionInfo::default()).await,
            Err(SpectroError::InvalidIndex(5))
        ));
    }

    #[tokio::test]
    async fn test_double_activation_fails() {
        let registry = DeviceRegistry::simulated(1).unwrap();
        registry.activate(0, ConnectionInfo::default()).await.unwrap();
        assert!(matches!(
            registry.activate(0, ConnectionInfo::default()).await,
            Err(SpectroError::AlreadyActive(0))
        ));
    }

    #[tokio::test]
    async fn test_close_unknown_index_has_no_side_effect() {
        let registry = DeviceRegistry::simulated(2).unwrap();
        registry.activate(0, ConnectionInfo::default()).await.unwrap();

        assert!(matches!(
            registry.close(1).await,
            Err(SpectroError::InvalidIndex(1))
        ));
        assert!(registry.is_active(0).await);
    }

    #[tokio::test]
    async fn test_serial_number_requires_activation() {
        let registry = DeviceRegistry::simulated(1).unwrap();
        assert!(matches!(
            registry.serial_number(0).await,
            Err(SpectroError::NotActivated(0))
        ));
        registry.activate(0, ConnectionInfo::default()).await.unwrap();
        assert_eq!(registry.serial_number(0).await.unwrap(), "SIM-000");
    }

    #[tokio::test]
    async fn test_close_all_clears_table() {
        let registry = DeviceRegistry::simulated(3).unwrap();
        for i in 0..3 {
            registry.activate(i, ConnectionInfo::default()).await.unwrap();
        }
        registry.close_all().await.unwrap();
        for i in 0..3 {
            assert!(!registry.is_active(i).await);
        }
    }

    #[tokio::test]
    async fn test_set_integration_invalidates_stale_dark() {
        use crate::core::DarkFrame;

        let registry = DeviceRegistry::simulated(1).unwrap();
        registry.activate(0, ConnectionInfo::default()).await.unwrap();

        let session = registry.session(0).await.unwrap();
        {
            let mut inner = session.lock().await;
            inner.dark = Some(DarkFrame {
                integration_ms: 100.0,
                averaging: 4,
                baseline: vec![0.0; 8],
                captured_at: chrono::Utc::now(),
            });
            inner.state = SessionState::DarkEstablished;
        }

        // Same pair keeps the dark; a different pair drops it.
        registry.set_integration(0, 100.0, 4).await.unwrap();
        assert!(session.lock().await.dark.is_some());

        registry.set_integration(0, 200.0, 4).await.unwrap();
        let inner = session.lock().await;
        assert!(inner.dark.is_none());
        assert_eq!(inner.state, SessionState::Activated);
    }

    #[tokio::test]
    async fn test_parameter_queries() {
        let registry = DeviceRegistry::simulated(1).unwrap();
        registry.activate(0, ConnectionInfo::default()).await.unwrap();

        let count = registry
            .parameter_values(0, DeviceParameter::ChannelCount)
            .await
            .unwrap();
        assert_eq!(count, vec![crate::transport::SimulatedSpectrometer::CHANNELS as f64]);

        let serial = registry
            .parameter_text(0, DeviceParameter::SerialNumber)
            .await
            .unwrap();
        assert_eq!(serial, "SIM-000");

        // Textual-only parameter has no numeric form.
        let none = registry
            .parameter_values(0, DeviceParameter::SerialNumber)
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
