//! A simulated spectrometer transport for tests and offline development.
//!
//! The simulated sensor produces a Gaussian emission profile over a
//! configurable channel count, with a dark floor that grows linearly with
//! integration time. Peak response is linear in integration time until the
//! ADC clips at full scale, so the saturation estimate is monotonic
//! non-decreasing in integration time — the precondition the auto-exposure
//! loop relies on.
//!
//! With real-time pacing enabled, `trigger_capture` sleeps for the configured
//! integration time (times the firmware averaging count), reproducing the
//! blocking behavior of the instrument for concurrency tests.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::time::Duration;
use tracing::debug;

use super::{Transport, TransportError};
use crate::core::DeviceLimits;

/// Mutable firmware state of the simulated device.
struct MockState {
    open: bool,
    shutter_open: bool,
    integration_ms: f64,
    averaging: u32,
    rng: StdRng,
}

/// A mock [`Transport`] backed by a synthetic sensor model.
pub struct SimulatedSpectrometer {
    serial: String,
    wavelengths: Vec<f64>,
    limits: DeviceLimits,
    /// Peak source level in counts per millisecond of integration
    source_rate: f64,
    /// Dark floor in counts, independent of integration time
    dark_offset: f64,
    /// Dark current in counts per millisecond of integration
    dark_rate: f64,
    realtime: bool,
    faulted: AtomicBool,
    state: Mutex<MockState>,
}

impl SimulatedSpectrometer {
    /// Default channel count of the simulated sensor.
    pub const CHANNELS: usize = 288;

    /// Create a simulated device with the given serial number.
    ///
    /// The wavelength table spans 380-780 nm over
    /// [`CHANNELS`](Self::CHANNELS) channels, matching a typical VIS
    /// spectrometer.
    pub fn new(serial: &str) -> Self {
        let channels = Self::CHANNELS;
        let wavelengths = (0..channels)
            .map(|i| 380.0 + 400.0 * i as f64 / (channels - 1) as f64)
            .collect();
        Self {
            serial: serial.to_string(),
            wavelengths,
            limits: DeviceLimits::default(),
            source_rate: 200.0,
            dark_offset: 40.0,
            dark_rate: 0.5,
            realtime: false,
            faulted: AtomicBool::new(false),
            state: Mutex::new(MockState {
                open: false,
                shutter_open: true,
                integration_ms: 100.0,
                averaging: 1,
                // Fixed seed keeps test captures reproducible
                rng: StdRng::seed_from_u64(0x51d_5eed),
            }),
        }
    }

    /// Override the peak source level (counts per ms of integration).
    pub fn with_source_rate(mut self, counts_per_ms: f64) -> Self {
        self.source_rate = counts_per_ms;
        self
    }

    /// Override the dark model (offset counts, counts per ms).
    ///
    /// Readout noise scales with the offset, so a zero offset gives an
    /// exactly-zero dark signal.
    pub fn with_dark(mut self, offset: f64, rate_per_ms: f64) -> Self {
        self.dark_offset = offset;
        self.dark_rate = rate_per_ms;
        self
    }

    /// Override the device limits.
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Enable real-time pacing: captures sleep for the integration time.
    pub fn with_realtime(mut self) -> Self {
        self.realtime = true;
        self
    }

    /// Inject a persistent hardware fault; all subsequent captures fail.
    pub fn inject_fault(&self) {
        self.faulted.store(true, Ordering::SeqCst);
    }

    /// Clear an injected fault.
    pub fn clear_fault(&self) {
        self.faulted.store(false, Ordering::SeqCst);
    }

    fn check_fault(&self) -> Result<(), TransportError> {
        if self.faulted.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected(format!(
                "simulated fault on {}",
                self.serial
            )));
        }
        Ok(())
    }

    /// Synthesize one readout under the current firmware state.
    fn synthesize(&self, state: &mut MockState) -> Vec<f64> {
        let ms = state.integration_ms;
        let channels = self.wavelengths.len();
        let center = (channels - 1) as f64 / 2.0;
        let sigma = channels as f64 / 6.0;
        (0..channels)
            .map(|i| {
                let profile = (-((i as f64 - center) / sigma).powi(2) / 2.0).exp();
                let dark = self.dark_offset + self.dark_rate * ms;
                let signal = if state.shutter_open {
                    self.source_rate * profile * ms
                } else {
                    0.0
                };
                let noise = state.rng.gen_range(-1.0..1.0) * self.dark_offset * 0.02;
                (dark + signal + noise).clamp(0.0, self.limits.max_counts)
            })
            .collect()
    }
}

#[async_trait]
impl Transport for SimulatedSpectrometer {
    async fn open(&self) -> Result<(), TransportError> {
        self.check_fault()?;
        let mut state = self.state.lock().map_err(poisoned)?;
        state.open = true;
        state.shutter_open = true;
        debug!(serial = %self.serial, "simulated transport opened");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state.open = false;
        debug!(serial = %self.serial, "simulated transport closed");
        Ok(())
    }

    async fn set_integration(&self, ms: f64) -> Result<(), TransportError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state.integration_ms = ms;
        Ok(())
    }

    async fn set_averaging(&self, count: u32) -> Result<(), TransportError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state.averaging = count.max(1);
        Ok(())
    }

    async fn set_shutter(&self, open: bool) -> Result<(), TransportError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state.shutter_open = open;
        Ok(())
    }

    async fn trigger_capture(&self) -> Result<Vec<f64>, TransportError> {
        self.check_fault()?;
        let (samples, wait) = {
            let mut state = self.state.lock().map_err(poisoned)?;
            if !state.open {
                return Err(TransportError::Protocol(format!(
                    "capture on closed transport {}",
                    self.serial
                )));
            }
            let wait = Duration::from_secs_f64(
                state.integration_ms * state.averaging as f64 / 1000.0,
            );
            (self.synthesize(&mut state), wait)
        };
        if self.realtime {
            tokio::time::sleep(wait).await;
        }
        Ok(samples)
    }

    async fn read_aux(&self) -> Result<Vec<f64>, TransportError> {
        self.check_fault()?;
        let mut state = self.state.lock().map_err(poisoned)?;
        if !state.open {
            return Err(TransportError::Protocol(format!(
                "aux read on closed transport {}",
                self.serial
            )));
        }
        // Aux reference detector: a short fixed vector with mild noise
        Ok((0..8)
            .map(|_| 1000.0 + state.rng.gen_range(-5.0..5.0))
            .collect())
    }

    fn serial_number(&self) -> &str {
        &self.serial
    }

    fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> TransportError {
    TransportError::Protocol("simulated device state poisoned".to_string())
}
