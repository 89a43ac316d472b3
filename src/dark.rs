//! Dark-frame capture and model-based dark compensation.
//!
//! A dark frame is the sensor's baseline with no light input, captured with
//! the shutter closed and subtracted from live signal to remove the offset
//! and noise floor. Stored frames are valid only for the exact
//! (integration, averaging) pair they were captured under; the strict
//! [`DarkMode::Once`](crate::core::DarkMode) refuses mismatched live
//! captures, while `Auto` silently re-estimates.
//!
//! Where a full dark capture per measurement is impractical, a model-based
//! compensation approximates the baseline from the integration time alone:
//! the sensor dark signal is an offset plus a dark-current term that grows
//! linearly with integration time.

use std::sync::Arc;
use tracing::{debug, info};

use crate::acquisition::{raw_capture, subtract_clamped};
use crate::core::{DarkFrame, SessionState, SpectrumBuffer, UsageMode};
use crate::error::{SpectroError, SpectroResult};
use crate::registry::DeviceRegistry;
use crate::transport::{Transport, TransportError};

/// Nominal dark model per usage mode: (offset counts, counts per ms).
///
/// The warmed-up sensor accumulates more dark current than a cold one; the
/// single-shot profile assumes the sensor has not reached thermal
/// equilibrium.
const fn dark_model(usage: UsageMode) -> (f64, f64) {
    match usage {
        UsageMode::Continuous => (40.0, 0.5),
        UsageMode::SingleShot => (32.0, 0.4),
    }
}

/// Captures and stores per-device dark baselines.
pub struct DarkCorrection {
    registry: Arc<DeviceRegistry>,
}

impl DarkCorrection {
    /// Create a dark-correction front end over a registry.
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Perform one blocking dark capture with the shutter closed and store
    /// it keyed by the exact parameter pair.
    ///
    /// Replaces any previously stored frame and transitions the session to
    /// `DarkEstablished`.
    pub async fn capture_once(
        &self,
        index: u32,
        integration_ms: f64,
        averaging: u32,
    ) -> SpectroResult<DarkFrame> {
        let session = self.registry.session(index).await?;
        session.validate(integration_ms, averaging)?;

        let transport = session.transport().clone();
        let mut inner = session.lock_active().await?;
        let previous = inner.state;
        inner.state = SessionState::Measuring;

        let frame = match capture_frame(&*transport, integration_ms, averaging).await {
            Ok(frame) => frame,
            Err(e) => {
                inner.state = previous;
                return Err(e.into());
            }
        };

        info!(index, integration_ms, averaging, "dark baseline established");
        inner.dark = Some(frame.clone());
        inner.state = SessionState::DarkEstablished;
        Ok(frame)
    }

    /// Device-internal automatic dark capture.
    ///
    /// The averaging count is implied by the device firmware
    /// ([`DeviceLimits::auto_dark_averaging`](crate::core::DeviceLimits));
    /// storage contract is the same as [`capture_once`](Self::capture_once).
    pub async fn capture_auto(&self, index: u32, integration_ms: f64) -> SpectroResult<DarkFrame> {
        let session = self.registry.session(index).await?;
        let averaging = session.limits().auto_dark_averaging;
        session.validate(integration_ms, averaging)?;

        let transport = session.transport().clone();
        let mut inner = session.lock_active().await?;
        let previous = inner.state;
        inner.state = SessionState::Measuring;

        let result = auto_dark(&*transport, integration_ms, averaging).await;
        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                inner.state = previous;
                return Err(e.into());
            }
        };

        info!(index, integration_ms, averaging, "automatic dark baseline established");
        inner.dark = Some(frame.clone());
        inner.state = SessionState::DarkEstablished;
        Ok(frame)
    }

    /// Apply model-based dark compensation to a captured spectrum.
    ///
    /// Used when a full dark capture is impractical per measurement. The
    /// result is clamped at zero, so compensation is numerically stable over
    /// the sensor's full dynamic range. The input buffer is not modified; a
    /// corrected copy is returned.
    pub async fn apply_compensation(
        &self,
        index: u32,
        usage: UsageMode,
        integration_ms: f64,
        spectrum: &SpectrumBuffer,
    ) -> SpectroResult<SpectrumBuffer> {
        let session = self.registry.session(index).await?;
        let _guard = session.lock_active().await?;

        let mut intensities = spectrum.intensities.clone();
        compensate_in_place(&mut intensities, usage, integration_ms);
        debug!(index, ?usage, integration_ms, "model compensation applied");
        Ok(SpectrumBuffer::new(spectrum.wavelengths.clone(), intensities))
    }
}

/// Capture a dark frame: close the shutter, capture, reopen.
///
/// The shutter is reopened even though the next operation may close it
/// again; leaving it closed would silently darken a following live capture.
pub(crate) async fn capture_frame(
    transport: &dyn Transport,
    integration_ms: f64,
    averaging: u32,
) -> Result<DarkFrame, TransportError> {
    transport.set_shutter(false).await?;
    let result = raw_capture(transport, integration_ms, averaging).await;
    transport.set_shutter(true).await?;
    Ok(DarkFrame {
        integration_ms,
        averaging,
        baseline: result?,
        captured_at: chrono::Utc::now(),
    })
}

/// Firmware-averaged dark capture (single trigger with device-side averaging).
async fn auto_dark(
    transport: &dyn Transport,
    integration_ms: f64,
    averaging: u32,
) -> Result<DarkFrame, TransportError> {
    transport.set_shutter(false).await?;
    transport.set_integration(integration_ms).await?;
    transport.set_averaging(averaging).await?;
    let result = transport.trigger_capture().await;
    transport.set_shutter(true).await?;
    Ok(DarkFrame {
        integration_ms,
        averaging,
        baseline: result?,
        captured_at: chrono::Utc::now(),
    })
}

/// Subtract the modeled baseline for `usage` at `integration_ms`, clamping
/// at zero.
pub(crate) fn compensate_in_place(values: &mut [f64], usage: UsageMode, integration_ms: f64) {
    let (offset, rate) = dark_model(usage);
    let baseline = vec![offset + rate * integration_ms; values.len()];
    subtract_clamped(values, &baseline);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compensation_clamps_at_zero() {
        let mut values = vec![1000.0, 50.0, 0.0];
        compensate_in_place(&mut values, UsageMode::Continuous, 100.0);
        // Baseline at 100 ms is 40 + 0.5 * 100 = 90 counts.
        assert_eq!(values, vec![910.0, 0.0, 0.0]);
    }

    #[test]
    fn test_usage_modes_differ() {
        let mut continuous = vec![1000.0];
        let mut single = vec![1000.0];
        compensate_in_place(&mut continuous, UsageMode::Continuous, 100.0);
        compensate_in_place(&mut single, UsageMode::SingleShot, 100.0);
        assert!(continuous[0] < single[0]);
    }

    #[tokio::test]
    async fn test_capture_frame_reopens_shutter() {
        use crate::transport::SimulatedSpectrometer;

        let dev = SimulatedSpectrometer::new("SIM-DRK");
        dev.open().await.unwrap();

        let frame = capture_frame(&dev, 50.0, 2).await.unwrap();
        assert_eq!(frame.baseline.len(), SimulatedSpectrometer::CHANNELS);
        assert!(frame.matches(50.0, 2));

        // A follow-up capture sees light again.
        let lit = raw_capture(&dev, 50.0, 1).await.unwrap();
        let lit_peak = lit.iter().copied().fold(0.0, f64::max);
        let dark_peak = frame.baseline.iter().copied().fold(0.0, f64::max);
        assert!(lit_peak > dark_peak);
    }
}
