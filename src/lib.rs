//! Spectrometer acquisition and auto-exposure control.
//!
//! This library manages device sessions for attached spectrometers, drives
//! spectral acquisition (integration time, averaging, dark correction), and
//! auto-tunes exposure parameters to avoid sensor saturation. It targets
//! instrument-control applications (lab software, process monitors) that
//! need repeatable, calibrated spectral readings from one or more devices.
//!
//! # Architecture
//!
//! ```text
//! DeviceRegistry ──owns──> DeviceSession (per index, exclusive lock)
//!       │                        │
//!       │                  Transport trait (USB/serial boundary)
//!       │
//! AcquisitionEngine / DarkCorrection / AutoExposureController /
//! CalibrationStore  (front ends sharing the registry)
//! ```
//!
//! Operations against different device indices proceed concurrently;
//! operations on one index serialize through the session's lock, because a
//! capture is an inherently sequential blocking hardware transaction.
//!
//! # Example
//!
//! ```rust,no_run
//! use spectro_daq::acquisition::AcquisitionEngine;
//! use spectro_daq::autoexposure::AutoExposureController;
//! use spectro_daq::core::{AcquisitionParameters, DarkMode};
//! use spectro_daq::registry::{ConnectionInfo, DeviceRegistry};
//! use spectro_daq::session::AutoBounds;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let registry = Arc::new(DeviceRegistry::simulated(1)?);
//! registry.activate(0, ConnectionInfo::default()).await?;
//!
//! let tuner = AutoExposureController::new(registry.clone());
//! let bounds = AutoBounds { max_integration_ms: 2000.0, max_averaging: 16 };
//! let exposure = tuner.auto_integrate(0, 0.8, bounds).await?;
//!
//! let engine = AcquisitionEngine::new(registry);
//! let params = AcquisitionParameters {
//!     integration_ms: exposure.integration_ms,
//!     averaging: exposure.averaging,
//!     dark_mode: DarkMode::Auto,
//!     smoothing: 0,
//! };
//! let measurement = engine.measure(0, params, false).await?;
//! println!("{} channels", measurement.spectrum.len());
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod autoexposure;
pub mod calibration;
pub mod config;
pub mod core;
pub mod dark;
pub mod error;
pub mod registry;
pub mod session;
pub mod transport;

pub use error::{describe, SpectroError, SpectroResult};

/// Initialize tracing with an env-filter directive.
///
/// Falls back to the given directive when `RUST_LOG` is unset. Safe to call
/// once per process; typically fed from
/// [`Settings::log_level`](config::Settings).
pub fn init_tracing(default_directive: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
