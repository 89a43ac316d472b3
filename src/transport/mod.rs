//! Hardware transport abstraction.
//!
//! The physical link to the instrument firmware (USB, serial) is out of scope
//! for this crate; the acquisition core depends only on the capability set
//! defined by the [`Transport`] trait. Each transport instance represents one
//! attached spectrometer and is an inherently sequential blocking channel:
//! shutter state, integration timing, and readout order matter, so callers
//! must serialize access per device (the session layer enforces this).
//!
//! # Design
//!
//! Each transport:
//! - Is async (uses `#[async_trait]`)
//! - Is thread-safe (requires `Send + Sync`)
//! - Fails with [`TransportError`], which the core surfaces as a hardware
//!   fault without retrying

use async_trait::async_trait;
use thiserror::Error;

use crate::core::DeviceLimits;

pub mod mock;

pub use mock::SimulatedSpectrometer;

/// Transport-level failure (surfaced by the core as a hardware fault).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for the instrument: {0}")]
    Timeout(String),

    #[error("Instrument disconnected: {0}")]
    Disconnected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Opaque request/response channel to one spectrometer.
///
/// # Contract
///
/// - `open` must be called before any other operation; `close` releases the
///   link. Both are idempotent at the firmware level but the session layer
///   calls each exactly once per activation.
/// - `set_integration`/`set_averaging` configure the *next* capture; they do
///   not start one.
/// - `trigger_capture` blocks for approximately the configured integration
///   time (times the firmware-side averaging count) and returns one raw
///   readout, one sample per spectral channel.
/// - `set_shutter(false)` must precede a dark capture; the core brackets dark
///   captures with shutter transitions.
/// - No mid-integration abort exists; a caller needing a timeout wraps the
///   call externally and recovers with close + activate.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the hardware link.
    async fn open(&self) -> Result<(), TransportError>;

    /// Close the hardware link and release the device.
    async fn close(&self) -> Result<(), TransportError>;

    /// Configure the integration time for subsequent captures.
    ///
    /// # Arguments
    /// * `ms` - exposure duration of one raw readout, in milliseconds
    async fn set_integration(&self, ms: f64) -> Result<(), TransportError>;

    /// Configure firmware-side averaging for subsequent captures.
    ///
    /// Most captures average on the host side instead; firmware averaging is
    /// used where the device implies it (automatic dark capture).
    async fn set_averaging(&self, count: u32) -> Result<(), TransportError>;

    /// Open or close the physical shutter.
    async fn set_shutter(&self, open: bool) -> Result<(), TransportError>;

    /// Perform one blocking readout with the configured settings.
    ///
    /// Returns one raw sample per spectral channel, in counts.
    async fn trigger_capture(&self) -> Result<Vec<f64>, TransportError>;

    /// Read the auxiliary channel (reference detector).
    async fn read_aux(&self) -> Result<Vec<f64>, TransportError>;

    /// Device serial number (readable without activation).
    fn serial_number(&self) -> &str;

    /// Calibration-defined wavelength of each spectral channel, in nm.
    ///
    /// Fixed per device; its length is the channel count of every spectrum
    /// the device produces.
    fn wavelengths(&self) -> &[f64];

    /// Static hardware limits (integration range, averaging, full scale).
    fn limits(&self) -> DeviceLimits;
}
