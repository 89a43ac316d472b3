//! Acquisition engine: raw capture, dark correction, smoothing, saturation.
//!
//! The engine orchestrates a single capture end to end:
//!
//! ```text
//! shutter open -> N x raw readout -> sample-wise mean -> dark correction
//!              -> optional smoothing -> optional aux read -> Measurement
//! ```
//!
//! Every operation locks the target session for its full duration, so
//! captures on one device serialize while distinct devices proceed in
//! parallel. A capture blocks for approximately `integration_ms x averaging`
//! plus fixed overhead; this is the dominant suspension point in the system.
//! Hardware faults are surfaced immediately and never retried here.

use std::sync::Arc;
use tracing::debug;

use crate::core::{
    AcquisitionParameters, DarkMode, Measurement, SessionState, SpectrumBuffer, UsageMode,
};
use crate::dark;
use crate::error::{SpectroError, SpectroResult};
use crate::registry::DeviceRegistry;
use crate::session::SessionInner;
use crate::transport::{Transport, TransportError};

/// Drives raw captures and applies the selected dark-correction mode.
pub struct AcquisitionEngine {
    registry: Arc<DeviceRegistry>,
}

impl AcquisitionEngine {
    /// Create an engine over a registry.
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this engine operates on.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Perform a full measurement.
    ///
    /// The smoothing window comes from `params.smoothing` (odd moving
    /// average; windows <= 1 are a no-op, even windows round up). In
    /// [`DarkMode::Compensated`] the continuous-usage compensation profile is
    /// applied; use [`crate::dark::DarkCorrection::apply_compensation`]
    /// directly to select another profile.
    ///
    /// # Errors
    /// `NotActivated`, `IntegrationOutOfRange`, `DarkMismatch` (strict mode),
    /// or `Hardware` propagated from the transport.
    pub async fn measure(
        &self,
        index: u32,
        params: AcquisitionParameters,
        include_aux: bool,
    ) -> SpectroResult<Measurement> {
        let session = self.registry.session(index).await?;
        session.validate(params.integration_ms, params.averaging)?;

        let transport = session.transport().clone();
        let mut inner = session.lock_active().await?;
        let previous = inner.state;
        inner.state = SessionState::Measuring;

        let result = self
            .capture_corrected(&*transport, &mut inner, params)
            .await;

        let spectrum = match result {
            Ok(s) => s,
            Err(e) => {
                inner.state = previous;
                return Err(e);
            }
        };

        let aux = if include_aux {
            match transport.read_aux().await {
                Ok(samples) => Some(samples),
                Err(e) => {
                    inner.state = previous;
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        inner.state = if inner.dark.is_some() {
            SessionState::DarkEstablished
        } else {
            SessionState::Activated
        };

        let intensities = smooth(&spectrum, params.smoothing);
        debug!(
            index,
            integration_ms = params.integration_ms,
            averaging = params.averaging,
            dark_mode = ?params.dark_mode,
            channels = intensities.len(),
            "measurement complete"
        );

        Ok(Measurement {
            timestamp: chrono::Utc::now(),
            spectrum: SpectrumBuffer::new(transport.wavelengths().to_vec(), intensities),
            aux,
        })
    }

    /// Capture a spectrum without aux read or smoothing.
    ///
    /// Same dark-correction contract as [`measure`](Self::measure).
    pub async fn spectrum(
        &self,
        index: u32,
        dark_mode: DarkMode,
        integration_ms: f64,
        averaging: u32,
    ) -> SpectroResult<SpectrumBuffer> {
        let params = AcquisitionParameters {
            integration_ms,
            averaging,
            dark_mode,
            smoothing: 0,
        };
        Ok(self.measure(index, params, false).await?.spectrum)
    }

    /// Estimate the peak-channel fill fraction for the given parameters.
    ///
    /// Uses a single un-averaged readout rather than a full capture. The
    /// estimate is monotonic non-decreasing in integration time for a fixed
    /// averaging count, which is the precondition the auto-exposure loop
    /// relies on.
    pub async fn saturation(
        &self,
        index: u32,
        integration_ms: f64,
        averaging: u32,
    ) -> SpectroResult<f64> {
        let session = self.registry.session(index).await?;
        session.validate(integration_ms, averaging)?;
        let transport = session.transport().clone();
        let _guard = session.lock_active().await?;
        let max_counts = session.limits().max_counts;
        Ok(estimate_saturation(&*transport, integration_ms, max_counts).await?)
    }

    /// Directly control the physical shutter.
    pub async fn shutter(&self, index: u32, open: bool) -> SpectroResult<()> {
        let session = self.registry.session(index).await?;
        let transport = session.transport().clone();
        let _guard = session.lock_active().await?;
        transport.set_shutter(open).await?;
        debug!(index, open, "shutter moved");
        Ok(())
    }

    /// Raw capture plus dark correction, with the session lock already held.
    async fn capture_corrected(
        &self,
        transport: &dyn Transport,
        inner: &mut SessionInner,
        params: AcquisitionParameters,
    ) -> SpectroResult<Vec<f64>> {
        // Auto mode re-establishes the baseline before the live capture
        // whenever the stored one is missing or stale.
        if params.dark_mode == DarkMode::Auto {
            let stale = inner
                .dark
                .as_ref()
                .map_or(true, |d| !d.matches(params.integration_ms, params.averaging));
            if stale {
                let frame =
                    dark::capture_frame(transport, params.integration_ms, params.averaging)
                        .await?;
                inner.dark = Some(frame);
            }
        }

        transport.set_shutter(true).await?;
        let mut live =
            raw_capture(transport, params.integration_ms, params.averaging).await?;

        match params.dark_mode {
            DarkMode::None => {}
            DarkMode::Once | DarkMode::Auto => {
                let frame = inner.dark.as_ref().ok_or(SpectroError::DarkMismatch {
                    stored_ms: 0.0,
                    stored_avg: 0,
                    requested_ms: params.integration_ms,
                    requested_avg: params.averaging,
                })?;
                if !frame.matches(params.integration_ms, params.averaging) {
                    return Err(SpectroError::DarkMismatch {
                        stored_ms: frame.integration_ms,
                        stored_avg: frame.averaging,
                        requested_ms: params.integration_ms,
                        requested_avg: params.averaging,
                    });
                }
                subtract_clamped(&mut live, &frame.baseline);
            }
            DarkMode::Compensated => {
                dark::compensate_in_place(
                    &mut live,
                    UsageMode::Continuous,
                    params.integration_ms,
                );
            }
        }
        Ok(live)
    }
}

/// Perform `averaging` readouts of `integration_ms` each and average them
/// sample-wise. Host-side averaging; firmware averaging stays at 1.
pub(crate) async fn raw_capture(
    transport: &dyn Transport,
    integration_ms: f64,
    averaging: u32,
) -> Result<Vec<f64>, TransportError> {
    transport.set_integration(integration_ms).await?;
    transport.set_averaging(1).await?;

    let mut accumulated: Vec<f64> = Vec::new();
    for _ in 0..averaging.max(1) {
        let samples = transport.trigger_capture().await?;
        if accumulated.is_empty() {
            accumulated = samples;
        } else {
            for (acc, s) in accumulated.iter_mut().zip(samples) {
                *acc += s;
            }
        }
    }
    let n = averaging.max(1) as f64;
    for v in &mut accumulated {
        *v /= n;
    }
    Ok(accumulated)
}

/// One un-averaged readout reduced to peak / full-scale, clamped to [0, 1].
pub(crate) async fn estimate_saturation(
    transport: &dyn Transport,
    integration_ms: f64,
    max_counts: f64,
) -> Result<f64, TransportError> {
    transport.set_integration(integration_ms).await?;
    transport.set_averaging(1).await?;
    let samples = transport.trigger_capture().await?;
    let peak = samples.iter().copied().fold(0.0, f64::max);
    Ok((peak / max_counts).clamp(0.0, 1.0))
}

/// Subtract a dark baseline sample-wise, clamping at zero so subtraction
/// never produces negative-intensity artifacts.
pub(crate) fn subtract_clamped(live: &mut [f64], baseline: &[f64]) {
    for (v, d) in live.iter_mut().zip(baseline) {
        *v = (*v - d).max(0.0);
    }
}

/// Odd-window moving average. Windows <= 1 are a no-op; even windows round
/// up to the next odd size. Edge channels average over the channels that
/// exist (shrinking half-window).
pub(crate) fn smooth(values: &[f64], window: u32) -> Vec<f64> {
    if window <= 1 || values.len() < 2 {
        return values.to_vec();
    }
    let window = if window % 2 == 0 { window + 1 } else { window } as usize;
    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            values[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smooth_window_one_is_noop() {
        let values = vec![1.0, 5.0, 3.0, 7.0];
        assert_eq!(smooth(&values, 0), values);
        assert_eq!(smooth(&values, 1), values);
    }

    #[test]
    fn test_smooth_window_three() {
        let values = vec![0.0, 3.0, 6.0, 9.0];
        let smoothed = smooth(&values, 3);
        assert_eq!(smoothed, vec![1.5, 3.0, 6.0, 7.5]);
    }

    #[test]
    fn test_smooth_even_window_rounds_up() {
        let values = vec![0.0, 3.0, 6.0, 9.0];
        assert_eq!(smooth(&values, 2), smooth(&values, 3));
    }

    #[test]
    fn test_subtract_clamps_at_zero() {
        let mut live = vec![10.0, 5.0, 2.0];
        subtract_clamped(&mut live, &[4.0, 5.0, 9.0]);
        assert_eq!(live, vec![6.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_raw_capture_averages_sample_wise() {
        use crate::transport::SimulatedSpectrometer;

        let dev = SimulatedSpectrometer::new("SIM-AVG");
        dev.open().await.unwrap();
        let averaged = raw_capture(&dev, 100.0, 8).await.unwrap();
        assert_eq!(averaged.len(), SimulatedSpectrometer::CHANNELS);
        assert!(averaged.iter().all(|v| v.is_finite() && *v >= 0.0));
    }
}
