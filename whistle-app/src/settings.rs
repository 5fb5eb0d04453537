//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use whistle_core::{DetectorConfig, EngineConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    /// `balanced`, `sensitive` or `strict`.
    pub detection_profile: String,
    /// `spectral` (built in) or `onnx`.
    pub classifier: String,
    pub model_path: Option<String>,
    pub models_dir: Option<String>,
    pub classifier_timeout_ms: u64,
    /// Full detector config; replaces the profile when present.
    pub detector: Option<DetectorConfig>,
    /// Print per-tick analysis events alongside detections.
    pub print_analysis: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            detection_profile: "balanced".into(),
            classifier: "spectral".into(),
            model_path: None,
            models_dir: None,
            classifier_timeout_ms: 500,
            detector: None,
            print_analysis: false,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.detection_profile = normalize_detection_profile(&self.detection_profile);
        self.classifier = normalize_classifier(&self.classifier);
        self.classifier_timeout_ms = self.classifier_timeout_ms.clamp(10, 10_000);
        self.detector = self.detector.take().map(DetectorConfig::normalized);
        for field in [
            &mut self.preferred_input_device,
            &mut self.model_path,
            &mut self.models_dir,
        ] {
            *field = field
                .as_ref()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
        }
    }

    /// Engine configuration derived from the profile (or explicit detector).
    pub fn engine_config(&self) -> EngineConfig {
        let detector = match &self.detector {
            Some(explicit) => explicit.clone(),
            None => {
                let mut detector = DetectorConfig::default();
                apply_detection_profile(&mut detector, &self.detection_profile);
                detector
            }
        };
        EngineConfig {
            detector,
            classifier_timeout_ms: Some(self.classifier_timeout_ms),
            ..EngineConfig::default()
        }
    }
}

pub fn normalize_detection_profile(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "sensitive" | "quiet" | "far" => "sensitive".into(),
        "strict" | "noisy" | "stadium" => "strict".into(),
        _ => "balanced".into(),
    }
}

pub fn normalize_classifier(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "onnx" | "model" => "onnx".into(),
        _ => "spectral".into(),
    }
}

pub fn apply_detection_profile(config: &mut DetectorConfig, profile: &str) {
    match profile {
        "sensitive" => {
            // Distant whistles: lower floors, react on the first pass.
            config.min_rms = 0.002;
            config.min_band_rms = 0.003;
            config.stage1_threshold = 0.4;
            config.stage2_threshold = 0.7;
            config.required_confirmations = 1;
        }
        "strict" => {
            config.noise_gate.enabled = true;
            config.stage1_threshold = 0.6;
            config.stage2_threshold = 0.9;
            config.required_confirmations = 2;
        }
        _ => {
            // balanced (default)
            config.stage1_threshold = 0.5;
            config.stage2_threshold = 0.8;
            config.required_confirmations = 1;
        }
    }
}

pub fn apply_runtime_env_from_settings(settings: &AppSettings) {
    if std::env::var("WHISTLE_MODELS_DIR").is_err() {
        if let Some(dir) = settings.models_dir.as_ref() {
            std::env::set_var("WHISTLE_MODELS_DIR", dir);
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Whistle")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("whistle")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| match serde_json::from_str::<AppSettings>(&raw) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(path = %path.display(), "malformed settings file, using defaults: {e}");
                None
            }
        })
        .unwrap_or_default();
    settings.normalize();
    settings
}

/// Write `settings` as pretty JSON, creating parent directories.
pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&dir.path().join("absent.json"));
        assert_eq!(settings, AppSettings::default());
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").expect("write");
        assert_eq!(load_settings(&path), AppSettings::default());
    }

    #[test]
    fn partial_file_fills_defaults_and_normalizes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{ "detectionProfile": " Stadium ", "preferredInputDevice": "  ", "classifierTimeoutMs": 1 }"#,
        )
        .expect("write");

        let settings = load_settings(&path);
        assert_eq!(settings.detection_profile, "strict");
        assert_eq!(settings.preferred_input_device, None);
        assert_eq!(settings.classifier_timeout_ms, 10);
        assert_eq!(settings.classifier, "spectral");
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("settings.json");
        let settings = AppSettings {
            preferred_input_device: Some("USB Mic".into()),
            detection_profile: "sensitive".into(),
            print_analysis: true,
            ..AppSettings::default()
        };
        save_settings(&path, &settings).expect("save");
        assert_eq!(load_settings(&path), settings);
    }

    #[test]
    fn profiles_shape_engine_config() {
        let mut settings = AppSettings {
            detection_profile: "strict".into(),
            ..AppSettings::default()
        };
        let strict = settings.engine_config();
        assert_eq!(strict.detector.required_confirmations, 2);
        assert!(strict.detector.noise_gate.enabled);
        assert_eq!(strict.classifier_timeout_ms, Some(500));
        assert!(strict.detector.validate().is_ok());

        settings.detector = Some(DetectorConfig {
            stage2_threshold: 0.95,
            ..DetectorConfig::default()
        });
        let explicit = settings.engine_config();
        assert_eq!(explicit.detector.stage2_threshold, 0.95);
        assert_eq!(explicit.detector.required_confirmations, 1);
    }
}
