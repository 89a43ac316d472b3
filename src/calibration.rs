//! Per-session calibration factor accessors.
//!
//! Downstream derived-quantity computations (XYZ transforms, CCT) consume
//! these factors; their formulas live outside this crate. Factors are keyed
//! under their session and destroyed with it, so a re-activated index starts
//! from defaults.

use std::sync::Arc;

use crate::error::SpectroResult;
use crate::registry::DeviceRegistry;

/// Key-value accessors for per-device calibration factors.
pub struct CalibrationStore {
    registry: Arc<DeviceRegistry>,
}

impl CalibrationStore {
    /// Create a store over a registry.
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// XYZ tristimulus factors of a session.
    pub async fn xyz_factor(&self, index: u32) -> SpectroResult<[f64; 3]> {
        let session = self.registry.session(index).await?;
        let inner = session.lock_active().await?;
        Ok(inner.calibration.xyz)
    }

    /// Set the XYZ tristimulus factors of a session.
    pub async fn set_xyz_factor(&self, index: u32, xyz: [f64; 3]) -> SpectroResult<()> {
        let session = self.registry.session(index).await?;
        session.lock_active().await?.calibration.xyz = xyz;
        Ok(())
    }

    /// Zoom/scale factor of a session.
    pub async fn zoom_factor(&self, index: u32) -> SpectroResult<f64> {
        let session = self.registry.session(index).await?;
        let inner = session.lock_active().await?;
        Ok(inner.calibration.zoom)
    }

    /// Set the zoom/scale factor of a session.
    pub async fn set_zoom_factor(&self, index: u32, zoom: f64) -> SpectroResult<()> {
        let session = self.registry.session(index).await?;
        session.lock_active().await?.calibration.zoom = zoom;
        Ok(())
    }

    /// Target saturation of the standard reference profile.
    pub async fn standard_target(&self, index: u32) -> SpectroResult<f64> {
        let session = self.registry.session(index).await?;
        let inner = session.lock_active().await?;
        Ok(inner.calibration.standard_target)
    }

    /// Set the standard reference target saturation (fraction in (0, 1]).
    pub async fn set_standard_target(&self, index: u32, target: f64) -> SpectroResult<()> {
        let session = self.registry.session(index).await?;
        session.lock_active().await?.calibration.standard_target = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpectroError;
    use crate::registry::ConnectionInfo;

    #[tokio::test]
    async fn test_accessors_require_session() {
        let registry = Arc::new(DeviceRegistry::simulated(1).unwrap());
        let store = CalibrationStore::new(registry.clone());

        assert!(matches!(
            store.xyz_factor(0).await,
            Err(SpectroError::NotActivated(0))
        ));

        registry.activate(0, ConnectionInfo::default()).await.unwrap();
        assert_eq!(store.xyz_factor(0).await.unwrap(), [1.0, 1.0, 1.0]);
    }

    #[tokio::test]
    async fn test_round_trip() {
        let registry = Arc::new(DeviceRegistry::simulated(1).unwrap());
        registry.activate(0, ConnectionInfo::default()).await.unwrap();
        let store = CalibrationStore::new(registry);

        store.set_xyz_factor(0, [0.2, 0.7, 0.1]).await.unwrap();
        store.set_zoom_factor(0, 2.5).await.unwrap();
        store.set_standard_target(0, 0.65).await.unwrap();

        assert_eq!(store.xyz_factor(0).await.unwrap(), [0.2, 0.7, 0.1]);
        assert_eq!(store.zoom_factor(0).await.unwrap(), 2.5);
        assert_eq!(store.standard_target(0).await.unwrap(), 0.65);
    }

    #[tokio::test]
    async fn test_factors_die_with_session() {
        let registry = Arc::new(DeviceRegistry::simulated(1).unwrap());
        registry.activate(0, ConnectionInfo::default()).await.unwrap();
        let store = CalibrationStore::new(registry.clone());

        store.set_zoom_factor(0, 9.0).await.unwrap();
        registry.close(0).await.unwrap();
        registry.activate(0, ConnectionInfo::default()).await.unwrap();

        assert_eq!(store.zoom_factor(0).await.unwrap(), 1.0);
    }
}
