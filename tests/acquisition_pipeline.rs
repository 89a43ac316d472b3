//! End-to-end acquisition against the simulated transport.
//!
//! Covers the full measurement path (raw capture, averaging, dark
//! correction, smoothing, aux read) and the dark-mode contracts: strict
//! frames refuse mismatched parameters, auto mode silently re-estimates.

use spectro_daq::acquisition::AcquisitionEngine;
use spectro_daq::core::{AcquisitionParameters, DarkMode};
use spectro_daq::dark::DarkCorrection;
use spectro_daq::error::SpectroError;
use spectro_daq::registry::{ConnectionInfo, DeviceRegistry};
use spectro_daq::transport::{SimulatedSpectrometer, Transport, TransportError};
use std::sync::Arc;

async fn engine_over(dev: SimulatedSpectrometer) -> AcquisitionEngine {
    let registry = Arc::new(
        DeviceRegistry::init(vec![Arc::new(dev) as Arc<dyn Transport>]).unwrap(),
    );
    registry.activate(0, ConnectionInfo::default()).await.unwrap();
    AcquisitionEngine::new(registry)
}

#[tokio::test]
async fn measurement_has_full_channel_count_and_bounded_values() {
    let engine = engine_over(SimulatedSpectrometer::new("SIM-PIPE")).await;

    let params = AcquisitionParameters {
        integration_ms: 100.0,
        averaging: 4,
        dark_mode: DarkMode::None,
        smoothing: 0,
    };
    let m = engine.measure(0, params, false).await.unwrap();

    assert_eq!(m.spectrum.len(), SimulatedSpectrometer::CHANNELS);
    assert_eq!(m.spectrum.wavelengths.len(), m.spectrum.intensities.len());
    assert_eq!(m.spectrum.wavelengths[0], 380.0);
    assert_eq!(*m.spectrum.wavelengths.last().unwrap(), 780.0);
    assert!(m
        .spectrum
        .intensities
        .iter()
        .all(|&v| (0.0..=65_535.0).contains(&v)));
    assert!(m.aux.is_none());
}

#[tokio::test]
async fn dark_sensor_with_no_source_reads_exact_zero() {
    let dev = SimulatedSpectrometer::new("SIM-NULL")
        .with_source_rate(0.0)
        .with_dark(0.0, 0.0);
    let engine = engine_over(dev).await;

    let spectrum = engine
        .spectrum(0, DarkMode::None, 50.0, 2)
        .await
        .unwrap();
    assert!(spectrum.intensities.iter().all(|&v| v == 0.0));
}

#[tokio::test]
async fn strict_dark_refuses_mismatched_parameters() {
    let engine = engine_over(SimulatedSpectrometer::new("SIM-STRICT")).await;
    let dark = DarkCorrection::new(engine.registry().clone());
    dark.capture_once(0, 50.0, 2).await.unwrap();

    // Matched pair applies the stored baseline.
    let uncorrected = engine.spectrum(0, DarkMode::None, 50.0, 2).await.unwrap();
    let corrected = engine.spectrum(0, DarkMode::Once, 50.0, 2).await.unwrap();
    assert!(corrected.peak() < uncorrected.peak() - 50.0);

    // Any mismatch is refused rather than silently miscorrected.
    let err = engine
        .spectrum(0, DarkMode::Once, 80.0, 2)
        .await
        .unwrap_err();
    match err {
        SpectroError::DarkMismatch {
            stored_ms,
            requested_ms,
            ..
        } => {
            assert_eq!(stored_ms, 50.0);
            assert_eq!(requested_ms, 80.0);
        }
        other => panic!("expected DarkMismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn strict_dark_without_baseline_is_refused() {
    let engine = engine_over(SimulatedSpectrometer::new("SIM-NOBASE")).await;
    let result = engine.spectrum(0, DarkMode::Once, 50.0, 1).await;
    assert!(matches!(result, Err(SpectroError::DarkMismatch { .. })));
}

#[tokio::test]
async fn auto_dark_re_estimates_and_stores_the_frame() {
    let engine = engine_over(SimulatedSpectrometer::new("SIM-AUTO")).await;

    // No baseline stored yet: auto mode captures one on the fly.
    let first = engine.spectrum(0, DarkMode::Auto, 50.0, 2).await.unwrap();
    assert_eq!(first.len(), SimulatedSpectrometer::CHANNELS);

    // The frame it captured now satisfies strict mode at the same pair.
    engine.spectrum(0, DarkMode::Once, 50.0, 2).await.unwrap();

    // A parameter change is absorbed silently by re-estimation.
    engine.spectrum(0, DarkMode::Auto, 120.0, 1).await.unwrap();
}

#[tokio::test]
async fn compensated_mode_lowers_the_baseline() {
    let engine = engine_over(SimulatedSpectrometer::new("SIM-COMP")).await;

    let raw = engine.spectrum(0, DarkMode::None, 100.0, 1).await.unwrap();
    let comp = engine
        .spectrum(0, DarkMode::Compensated, 100.0, 1)
        .await
        .unwrap();
    // Continuous-usage model at 100 ms removes 90 counts per channel.
    assert!(comp.peak() < raw.peak());
    assert!((raw.peak() - comp.peak() - 90.0).abs() < 5.0);
}

#[tokio::test]
async fn smoothing_preserves_channel_count() {
    let engine = engine_over(SimulatedSpectrometer::new("SIM-SMOOTH")).await;

    let params = AcquisitionParameters {
        integration_ms: 50.0,
        averaging: 1,
        dark_mode: DarkMode::None,
        smoothing: 5,
    };
    let m = engine.measure(0, params, false).await.unwrap();
    assert_eq!(m.spectrum.len(), SimulatedSpectrometer::CHANNELS);
}

#[tokio::test]
async fn aux_channel_rides_along_when_requested() {
    let engine = engine_over(SimulatedSpectrometer::new("SIM-AUX")).await;

    let m = engine
        .measure(0, AcquisitionParameters::raw(50.0, 1), true)
        .await
        .unwrap();
    let aux = m.aux.unwrap();
    assert!(!aux.is_empty());
    assert!(aux.iter().all(|&v| (900.0..1100.0).contains(&v)));
}

#[tokio::test]
async fn integration_outside_device_limits_is_rejected() {
    let engine = engine_over(SimulatedSpectrometer::new("SIM-LIMIT")).await;

    let result = engine
        .measure(0, AcquisitionParameters::raw(20_000.0, 1), false)
        .await;
    assert!(matches!(
        result,
        Err(SpectroError::IntegrationOutOfRange { .. })
    ));
}

#[tokio::test]
async fn hardware_fault_surfaces_and_session_recovers() {
    let dev = Arc::new(SimulatedSpectrometer::new("SIM-FAULT"));
    let registry = Arc::new(
        DeviceRegistry::init(vec![dev.clone() as Arc<dyn Transport>]).unwrap(),
    );
    registry.activate(0, ConnectionInfo::default()).await.unwrap();
    let engine = AcquisitionEngine::new(registry);

    dev.inject_fault();
    let err = engine
        .measure(0, AcquisitionParameters::raw(50.0, 1), false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SpectroError::Hardware(TransportError::Disconnected(_))
    ));

    // The session survives the fault and measures again once it clears.
    dev.clear_fault();
    engine
        .measure(0, AcquisitionParameters::raw(50.0, 1), false)
        .await
        .unwrap();
}

#[tokio::test]
async fn saturation_estimate_tracks_integration_time() {
    let engine = engine_over(SimulatedSpectrometer::new("SIM-SAT")).await;

    let short = engine.saturation(0, 10.0, 1).await.unwrap();
    let long = engine.saturation(0, 200.0, 1).await.unwrap();
    assert!((0.0..=1.0).contains(&short));
    assert!((0.0..=1.0).contains(&long));
    assert!(long > short);
}
