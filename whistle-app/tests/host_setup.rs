use whistle_app::backend;
use whistle_app::settings::{load_settings, save_settings, AppSettings};
use whistle_app::wav::read_wav;

#[test]
fn saved_settings_drive_the_engine_built_from_them() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("settings.json");
    let settings = AppSettings {
        preferred_input_device: Some("USB Mic".into()),
        detection_profile: "strict".into(),
        classifier_timeout_ms: 250,
        ..AppSettings::default()
    };
    save_settings(&path, &settings).expect("save");

    let loaded = load_settings(&path);
    assert_eq!(loaded, settings);

    let config = loaded.engine_config();
    let engine = backend::engine(&loaded, config.clone()).expect("engine");
    assert_eq!(engine.config(), &config);
    assert!(engine.config().detector.noise_gate.enabled);
    assert_eq!(engine.config().classifier_timeout_ms, Some(250));
    engine.warm_up().expect("warm up");
}

#[test]
fn unknown_classifier_falls_back_to_spectral_peak() {
    let settings = AppSettings {
        classifier: "does-not-exist".into(),
        ..AppSettings::default()
    };
    let mut normalized = settings.clone();
    normalized.normalize();
    let detector = normalized.engine_config().detector;
    let handle = backend::handle(&normalized, &detector);
    assert_eq!(handle.name(), "spectral-peak");
}

#[test]
fn wav_loader_is_reachable_from_the_library() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(read_wav(&dir.path().join("missing.wav")).is_err());
}
