use std::time::Duration;

use thiserror::Error;

/// All errors produced by whistle-core.
#[derive(Debug, Error)]
pub enum WhistleError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("chunk ring is full — pipeline cannot keep up")]
    ChunkRingFull,

    #[error("capture session is closed")]
    SessionClosed,

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error("classifier did not answer within {0:?}")]
    ClassifierTimeout(Duration),

    #[error("insufficient audio: need {required} slots, have {available}")]
    InsufficientAudio { required: usize, available: usize },

    #[error("rolling window has not been configured for this session")]
    WindowNotConfigured,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WhistleError>;
