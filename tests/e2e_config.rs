//! E2E tests for persistent configuration
//!
//! Tests config round-trip, defaults, backward compatibility, and that the
//! stored defaults drive a measurement.

use roomeq::config::AppConfig;
use roomeq::{
    CancelToken, CaptureOrchestrator, CaptureRouting, CaptureStorage, LoopbackBackend, SignalType,
};

#[test]
fn test_config_defaults() {
    let config = AppConfig::default();
    assert_eq!(config.sample_rate, 48000);
    assert_eq!(config.duration, 10.0);
    assert_eq!(config.signal_type, SignalType::LogSweep);
    assert_eq!(config.octave_fraction, 3.0);
    assert_eq!(config.resolution, 200);
    assert!(config.storage_dir().ends_with("records"));
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"duration": 2.5, "octave_fraction": 6}"#).unwrap();

    let config = AppConfig::load_from(&path);
    assert_eq!(config.duration, 2.5);
    assert_eq!(config.octave_fraction, 6.0);
    assert_eq!(config.sample_rate, 48000);
}

#[test]
fn test_unknown_fields_are_ignored() {
    let json = r#"{"sample_rate": 96000, "window_theme": "dark"}"#;
    let config: AppConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.sample_rate, 96000);
}

#[test]
fn test_config_drives_measurement() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig {
        duration: 0.5,
        resolution: 64,
        octave_fraction: 6.0,
        storage_dir: Some(dir.path().join("records")),
        ..Default::default()
    };
    let path = dir.path().join("config.json");
    config.save(&path).unwrap();
    let config = AppConfig::load_from(&path);

    let storage = CaptureStorage::open(config.storage_dir()).unwrap();
    let mut orch = CaptureOrchestrator::new(Box::new(LoopbackBackend::new()), storage)
        .with_settings(config.analysis_settings());
    let record = orch
        .measure(
            &config.capture_parameters(),
            &CaptureRouting::identity(2, 2),
            &CancelToken::new(),
        )
        .unwrap();

    assert_eq!(record.len(), 64);
    assert_eq!(record.duration, 0.5);
    assert!(dir.path().join("records").join(format!("{}.json", record.id)).exists());
}
