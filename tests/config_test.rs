use crabstream::config::CrabStreamConfig;
use crabstream::{BackendKind, CameraError, CameraSession, Resolution};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_config_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("crabstream.toml");

    let mut config = CrabStreamConfig::default();
    config.camera.backend = BackendKind::FrameByFrame;
    config.camera.still_resolution = Resolution::new(1920, 1080);
    config.server.stream_fps = 15;
    config.save_to_file(&path).unwrap();

    let loaded = CrabStreamConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_invalid_toml_is_config_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[camera\nbackend = ").unwrap();

    let result = CrabStreamConfig::load_from_file(&path);
    assert!(matches!(result, Err(CameraError::ConfigError(_))));
}

#[test]
fn test_unknown_backend_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("backend.toml");
    fs::write(&path, "[camera]\nbackend = \"picamera\"\n").unwrap();

    assert!(CrabStreamConfig::load_from_file(&path).is_err());
}

#[test]
fn test_layered_file_and_environment() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("layered.toml");
    fs::write(
        &path,
        r#"
[camera]
jpeg_quality = 70
max_fps = 12

[session]
still_timeout_ms = 2500
"#,
    )
    .unwrap();

    // Only this test touches CRABSTREAM_* variables.
    std::env::set_var("CRABSTREAM_CAMERA__MAX_FPS", "24");
    std::env::set_var("CRABSTREAM_SERVER__BIND", "127.0.0.1:9090");
    let layered = CrabStreamConfig::load_layered(&path);
    std::env::remove_var("CRABSTREAM_CAMERA__MAX_FPS");
    std::env::remove_var("CRABSTREAM_SERVER__BIND");

    let config = layered.unwrap();
    assert_eq!(config.camera.jpeg_quality, 70);
    assert_eq!(config.camera.max_fps, 24);
    assert_eq!(config.session.still_timeout_ms, 2500);
    assert_eq!(config.server.bind, "127.0.0.1:9090");
    // Untouched keys keep their defaults
    assert_eq!(config.camera.video_resolution, Resolution::new(320, 240));
}

#[test]
fn test_layered_missing_file_uses_defaults() {
    let dir = tempdir().unwrap();
    let config = CrabStreamConfig::load_layered(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.camera.still_resolution, Resolution::new(1024, 768));
}

#[test]
fn test_layered_rejects_invalid_values() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("invalid.toml");
    fs::write(&path, "[camera]\njpeg_quality = 0\n").unwrap();

    let result = CrabStreamConfig::load_layered(&path);
    assert!(matches!(result, Err(CameraError::ConfigError(_))));
}

#[test]
fn test_session_from_config_uses_configured_backend() {
    let config = CrabStreamConfig::default();
    let session = CameraSession::from_config(&config).unwrap();
    assert_eq!(session.backend_name(), "synthetic");
    assert_eq!(session.settings().video_resolution, config.camera.video_resolution);
}
