//! Core data types for spectrometer acquisition.
//!
//! This module defines the foundational types shared across the crate:
//!
//! - [`SpectrumBuffer`]: a wavelength/intensity pair produced by every capture
//! - [`AcquisitionParameters`]: the immutable per-capture settings
//! - [`DarkMode`] / [`UsageMode`]: dark-correction selectors
//! - [`SessionState`]: per-device lifecycle state
//! - [`DeviceLimits`]: static hardware limits reported by a transport
//!
//! # Data Flow
//!
//! ```text
//! Transport --[raw counts]--> AcquisitionEngine --[SpectrumBuffer]--> caller
//! ```
//!
//! Buffers returned to the caller are independent copies; the engine retains
//! no reference to them after return.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Spectrum Data
// =============================================================================

/// A single captured spectrum: per-channel intensities over the device's
/// fixed, calibration-defined wavelength table.
///
/// `wavelengths` and `intensities` always have the same length. Intensities
/// are raw counts, before or after dark subtraction depending on the
/// [`DarkMode`] of the capture that produced the buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectrumBuffer {
    /// Wavelength of each channel in nanometers (fixed per device)
    pub wavelengths: Vec<f64>,
    /// Intensity of each channel in counts
    pub intensities: Vec<f64>,
}

impl SpectrumBuffer {
    /// Create a buffer from matching wavelength/intensity vectors.
    pub fn new(wavelengths: Vec<f64>, intensities: Vec<f64>) -> Self {
        debug_assert_eq!(wavelengths.len(), intensities.len());
        Self {
            wavelengths,
            intensities,
        }
    }

    /// Number of spectral channels.
    pub fn len(&self) -> usize {
        self.intensities.len()
    }

    /// Returns true if the buffer has no channels.
    pub fn is_empty(&self) -> bool {
        self.intensities.is_empty()
    }

    /// Peak intensity across all channels (0.0 for an empty buffer).
    pub fn peak(&self) -> f64 {
        self.intensities.iter().copied().fold(0.0, f64::max)
    }
}

/// Result of a full [`measure`](crate::acquisition::AcquisitionEngine::measure)
/// call: the corrected spectrum plus the auxiliary-channel samples when the
/// caller requested them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// UTC timestamp when the capture completed
    pub timestamp: DateTime<Utc>,
    /// Corrected (and optionally smoothed) spectrum
    pub spectrum: SpectrumBuffer,
    /// Auxiliary-channel samples, present when `include_aux` was set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aux: Option<Vec<f64>>,
}

// =============================================================================
// Acquisition Parameters
// =============================================================================

/// Dark-correction mode for a capture.
///
/// The discriminant values match the original firmware selector, so the enum
/// can round-trip through an integer API unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum DarkMode {
    /// No dark correction
    None = 0,
    /// Subtract the stored dark frame; the stored frame must match the live
    /// capture's exact (integration, averaging) pair
    Once = 1,
    /// Subtract a dark frame, re-capturing it automatically whenever the
    /// stored one is missing or its parameters no longer match
    Auto = 2,
    /// Apply a model-based compensation instead of a stored frame
    Compensated = 3,
}

/// Usage-mode selector for model-based dark compensation.
///
/// Chooses which compensation profile applies when a full dark capture is
/// impractical per-measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsageMode {
    /// Continuous monitoring: compensate with the warmed-up dark model
    Continuous,
    /// Single-shot: compensate with the cold-sensor dark model
    SingleShot,
}

/// Immutable per-capture settings.
///
/// Supplied by the caller or computed by the auto-exposure controller.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionParameters {
    /// Exposure duration of one raw readout, in milliseconds (positive)
    pub integration_ms: f64,
    /// Number of raw readouts averaged sample-wise into one spectrum (>= 1)
    pub averaging: u32,
    /// Dark-correction mode applied after the raw capture
    pub dark_mode: DarkMode,
    /// Moving-average window; windows <= 1 are a no-op
    pub smoothing: u32,
}

impl AcquisitionParameters {
    /// Parameters for a plain capture with no correction or smoothing.
    pub fn raw(integration_ms: f64, averaging: u32) -> Self {
        Self {
            integration_ms,
            averaging,
            dark_mode: DarkMode::None,
            smoothing: 0,
        }
    }
}

// =============================================================================
// Dark Frame
// =============================================================================

/// A stored dark baseline, valid for the exact parameter pair it was
/// captured under.
///
/// Created by an explicit dark-capture call or internally before a live
/// capture in [`DarkMode::Auto`]; replaced on every subsequent dark capture
/// and invalidated when the session's integration parameters change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DarkFrame {
    /// Integration time the baseline was captured with
    pub integration_ms: f64,
    /// Averaging count the baseline was captured with
    pub averaging: u32,
    /// Per-channel baseline counts (shutter closed)
    pub baseline: Vec<f64>,
    /// UTC timestamp of the capture
    pub captured_at: DateTime<Utc>,
}

impl DarkFrame {
    /// Whether this frame is valid for a live capture with the given
    /// parameters (strict mode requires an exact pair match).
    pub fn matches(&self, integration_ms: f64, averaging: u32) -> bool {
        self.integration_ms == integration_ms && self.averaging == averaging
    }
}

// =============================================================================
// Calibration Factors
// =============================================================================

/// Per-device calibration factors consumed by downstream derived-quantity
/// computations (colorimetry is out of scope here; this crate only stores
/// and serves the raw factors).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFactors {
    /// XYZ tristimulus factors
    pub xyz: [f64; 3],
    /// Optical zoom/scale factor
    pub zoom: f64,
    /// Target saturation fraction of the standard reference profile, used by
    /// the standard-target auto-exposure variant
    pub standard_target: f64,
}

impl Default for CalibrationFactors {
    fn default() -> Self {
        Self {
            xyz: [1.0, 1.0, 1.0],
            zoom: 1.0,
            standard_target: 0.8,
        }
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Device session lifecycle state.
///
/// # State Machine
///
/// ```text
/// Uninitialized ──activate──> Activated ──dark capture──> DarkEstablished
///                               │    ▲                      │    ▲
///                        measure│    │                      │    │measure
///                               ▼    │                      ▼    │
///                              Measuring                   Measuring
///                                    │
///                                  close
///                                    ▼
///                                  Closed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Device discovered but not yet activated
    Uninitialized,
    /// Transport open, session bound to the index
    Activated,
    /// A dark baseline is stored for this session
    DarkEstablished,
    /// A blocking capture is in progress
    Measuring,
    /// Session released; the index may be re-activated
    Closed,
}

impl SessionState {
    /// Whether the session accepts hardware operations.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Activated | SessionState::DarkEstablished | SessionState::Measuring
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "Uninitialized"),
            SessionState::Activated => write!(f, "Activated"),
            SessionState::DarkEstablished => write!(f, "DarkEstablished"),
            SessionState::Measuring => write!(f, "Measuring"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// Device Limits & Parameters
// =============================================================================

/// Static hardware limits reported by a transport at discovery time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceLimits {
    /// Shortest supported integration time in milliseconds
    pub min_integration_ms: f64,
    /// Longest supported integration time in milliseconds
    pub max_integration_ms: f64,
    /// Largest supported averaging count
    pub max_averaging: u32,
    /// Full-scale ADC count of the sensor (saturation reference)
    pub max_counts: f64,
    /// Averaging count the firmware applies during automatic dark capture
    pub auto_dark_averaging: u32,
}

impl DeviceLimits {
    /// Validate a requested (integration, averaging) pair against the limits.
    pub fn allows(&self, integration_ms: f64, averaging: u32) -> bool {
        integration_ms >= self.min_integration_ms
            && integration_ms <= self.max_integration_ms
            && averaging >= 1
            && averaging <= self.max_averaging
    }
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_integration_ms: 0.1,
            max_integration_ms: 10_000.0,
            max_averaging: 256,
            max_counts: 65_535.0,
            auto_dark_averaging: 4,
        }
    }
}

/// Device parameter selector for the registry's query operations.
///
/// The numeric and textual retrievals are exposed as two distinctly named
/// operations (`parameter_values` / `parameter_text`) rather than overloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceParameter {
    /// Serial number (textual only)
    SerialNumber,
    /// Number of spectral channels
    ChannelCount,
    /// First/last wavelength of the channel table, in nanometers
    WavelengthRange,
    /// Min/max integration time in milliseconds
    IntegrationLimits,
    /// Full-scale ADC count
    MaxCounts,
}
