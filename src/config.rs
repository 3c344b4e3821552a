//! Persistent application configuration
//!
//! Stores device selection, measurement defaults and storage location in a
//! JSON file at `<data_dir>/roomeq/config.json`.

use crate::{AnalysisSettings, CaptureParameters, SignalType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_sample_rate() -> u32 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_duration() -> f64 {
    10.0
}

fn default_octave_fraction() -> f64 {
    crate::DEFAULT_OCTAVE_FRACTION
}

fn default_resolution() -> usize {
    200
}

fn data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("roomeq")
}

/// Persistent application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Capture device name (None = system default)
    #[serde(default)]
    pub input_device: Option<String>,
    /// Playback device name (None = system default)
    #[serde(default)]
    pub output_device: Option<String>,
    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Stimulus duration in seconds
    #[serde(default = "default_duration")]
    pub duration: f64,
    #[serde(default)]
    pub signal_type: SignalType,
    /// Logical output channel the stimulus plays on
    #[serde(default)]
    pub output_channel: usize,
    #[serde(default)]
    pub input_gain: f64,
    #[serde(default)]
    pub output_gain: f64,
    /// Smoothing width as 1/N octave
    #[serde(default = "default_octave_fraction")]
    pub octave_fraction: f64,
    /// Points on the stored log-frequency grid
    #[serde(default = "default_resolution")]
    pub resolution: usize,
    /// Microphone calibration file
    #[serde(default)]
    pub calibration_file: Option<PathBuf>,
    /// Record directory (None = `<data_dir>/roomeq/records`)
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: default_sample_rate(),
            duration: default_duration(),
            signal_type: SignalType::default(),
            output_channel: 0,
            input_gain: 0.0,
            output_gain: 0.0,
            octave_fraction: default_octave_fraction(),
            resolution: default_resolution(),
            calibration_file: None,
            storage_dir: None,
        }
    }
}

impl AppConfig {
    /// Config file path: `<data_dir>/roomeq/config.json`
    pub fn path() -> PathBuf {
        data_root().join("config.json")
    }

    /// Load config from disk, falling back to defaults on any error
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load from an explicit path, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Where capture records are kept
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir
            .clone()
            .unwrap_or_else(|| data_root().join("records"))
    }

    /// Measurement parameters from the stored defaults
    pub fn capture_parameters(&self) -> CaptureParameters {
        CaptureParameters {
            input_device: self.input_device.clone(),
            output_device: self.output_device.clone(),
            output_channel: self.output_channel,
            signal_type: self.signal_type,
            duration: self.duration,
            sample_rate: self.sample_rate,
            input_gain: self.input_gain,
            output_gain: self.output_gain,
        }
    }

    /// Analysis settings; unusable stored values fall back to the defaults
    pub fn analysis_settings(&self) -> AnalysisSettings {
        let defaults = AnalysisSettings::default();
        let mut settings = AnalysisSettings {
            octave_fraction: self.octave_fraction,
            resolution: self.resolution,
        };
        if settings.resolution < AnalysisSettings::MIN_RESOLUTION {
            tracing::warn!(resolution = self.resolution, "Config resolution too small, using default");
            settings.resolution = defaults.resolution;
        }
        if !settings.octave_fraction.is_finite() || settings.octave_fraction <= 0.0 {
            tracing::warn!(
                octave_fraction = self.octave_fraction,
                "Config octave fraction not positive, using default"
            );
            settings.octave_fraction = defaults.octave_fraction;
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.input_device, None);
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.octave_fraction, 3.0);
        assert_eq!(config.signal_type, SignalType::LogSweep);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"output_device": "Studio Monitors", "signal_type": "pink_noise"}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.output_device.as_deref(), Some("Studio Monitors"));
        assert_eq!(config.signal_type, SignalType::PinkNoise);
        assert_eq!(config.duration, 10.0);
        assert_eq!(config.resolution, 200);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_unusable_analysis_values_fall_back() {
        let json = r#"{"resolution": 1, "octave_fraction": 0}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        let settings = config.analysis_settings();
        assert_eq!(settings, AnalysisSettings::default());
        settings.validate().unwrap();

        let json = r#"{"resolution": 64, "octave_fraction": -6}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        let settings = config.analysis_settings();
        assert_eq!(settings.resolution, 64);
        assert_eq!(settings.octave_fraction, 3.0);
    }

    #[test]
    fn test_parameters_follow_config() {
        let config = AppConfig {
            duration: 4.0,
            output_channel: 1,
            ..Default::default()
        };
        let params = config.capture_parameters();
        assert_eq!(params.duration, 4.0);
        assert_eq!(params.output_channel, 1);
        params.validate().unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = AppConfig {
            input_device: Some("UMIK-1".to_string()),
            storage_dir: Some(dir.path().join("records")),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded, config);
        assert_eq!(loaded.storage_dir(), dir.path().join("records"));
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(AppConfig::load_from(&path), AppConfig::default());
    }
}
