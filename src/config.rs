//! Configuration management.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `SPECTRO_*` environment variables (e.g. `SPECTRO_AUTO_EXPOSURE__TARGET`
//! overrides `auto_exposure.target`). Device-specific tables remain opaque
//! `toml::Value`s so transport implementations can carry their own keys.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::SpectroError;

/// Top-level crate settings.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Tracing filter directive (e.g. "info", "spectro_daq=debug")
    pub log_level: String,
    /// Default capture parameters
    pub acquisition: AcquisitionSettings,
    /// Auto-exposure policy defaults
    pub auto_exposure: AutoExposureSettings,
    /// Opaque per-device configuration tables
    #[serde(default)]
    pub devices: HashMap<String, toml::Value>,
}

/// Default capture parameters applied to new sessions.
#[derive(Debug, Deserialize, Clone)]
pub struct AcquisitionSettings {
    /// Default integration time in milliseconds
    pub integration_ms: f64,
    /// Default averaging count
    pub averaging: u32,
}

/// Auto-exposure policy defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct AutoExposureSettings {
    /// Target saturation fraction in (0, 1]
    pub target: f64,
    /// Tolerance band around the target (fraction of full scale)
    pub tolerance: f64,
    /// Iteration budget (settle periods)
    pub settle_periods: u32,
}

impl Settings {
    /// Load settings with defaults, an optional TOML file, and environment
    /// overrides.
    pub fn new(config_path: Option<&str>) -> Result<Self, SpectroError> {
        let mut builder = Config::builder()
            .set_default("log_level", "info")?
            .set_default("acquisition.integration_ms", 100.0)?
            .set_default("acquisition.averaging", 1)?
            .set_default("auto_exposure.target", 0.8)?
            .set_default("auto_exposure.tolerance", 0.05)?
            .set_default("auto_exposure.settle_periods", 16)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        let settings = builder
            .add_source(Environment::with_prefix("SPECTRO").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::new(None).unwrap();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.acquisition.integration_ms, 100.0);
        assert_eq!(settings.acquisition.averaging, 1);
        assert_eq!(settings.auto_exposure.target, 0.8);
        assert_eq!(settings.auto_exposure.settle_periods, 16);
        assert!(settings.devices.is_empty());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "log_level = \"debug\"\n\n\
             [auto_exposure]\ntarget = 0.6\n\n\
             [devices.sim_0]\nsource_rate = 150.0"
        )
        .unwrap();

        let settings = Settings::new(file.path().to_str()).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.auto_exposure.target, 0.6);
        // Untouched sections keep their defaults.
        assert_eq!(settings.auto_exposure.tolerance, 0.05);
        assert!(settings.devices.contains_key("sim_0"));
    }
}
