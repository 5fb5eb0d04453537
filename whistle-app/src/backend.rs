//! Classifier selection shared by the host and the benchmark.

use tracing::info;
#[cfg(feature = "onnx")]
use tracing::warn;
use whistle_core::{
    ClassifierHandle, DetectorConfig, EngineConfig, SpectralPeakClassifier, WhistleEngine,
};

use crate::settings::AppSettings;

enum Backend {
    Spectral(SpectralPeakClassifier),
    #[cfg(feature = "onnx")]
    Onnx(whistle_core::OnnxClassifier),
}

fn select(settings: &AppSettings, detector: &DetectorConfig) -> Backend {
    #[cfg(feature = "onnx")]
    if settings.classifier == "onnx" {
        use std::path::PathBuf;
        use whistle_core::OnnxClassifier;

        let path = settings
            .model_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(OnnxClassifier::default_model_path);
        match OnnxClassifier::new(&path, detector.model_input_len) {
            Ok(model) => {
                info!(path = %path.display(), "using ONNX classifier");
                return Backend::Onnx(model);
            }
            Err(e) => warn!("ONNX classifier unavailable ({e}), using spectral-peak"),
        }
    }
    #[cfg(not(feature = "onnx"))]
    if settings.classifier == "onnx" {
        tracing::warn!("built without the onnx feature, using spectral-peak");
    }

    info!(
        band_low_hz = detector.band_low_hz,
        band_high_hz = detector.band_high_hz,
        "using spectral-peak classifier"
    );
    Backend::Spectral(SpectralPeakClassifier::new(
        detector.model_sample_rate,
        detector.band_low_hz,
        detector.band_high_hz,
    ))
}

/// Engine with the configured classifier behind the timeout wrapper.
pub fn engine(settings: &AppSettings, config: EngineConfig) -> anyhow::Result<WhistleEngine> {
    let engine = match select(settings, &config.detector) {
        Backend::Spectral(c) => WhistleEngine::with_classifier(config, c)?,
        #[cfg(feature = "onnx")]
        Backend::Onnx(c) => WhistleEngine::with_classifier(config, c)?,
    };
    Ok(engine)
}

/// Bare handle for in-thread use (no timeout wrapper).
pub fn handle(settings: &AppSettings, detector: &DetectorConfig) -> ClassifierHandle {
    match select(settings, detector) {
        Backend::Spectral(c) => ClassifierHandle::new(c),
        #[cfg(feature = "onnx")]
        Backend::Onnx(c) => ClassifierHandle::new(c),
    }
}
