//! # whistle-core
//!
//! Streaming whistle-blast detection engine.
//!
//! ## Architecture
//!
//! ```text
//! Microphone / IngestHandle → SPSC chunk ring → pipeline worker (std::thread)
//!                                                    │
//!                                   high-pass + noise gate (Preprocessor)
//!                                                    │
//!                        per-chunk energy / band / dominant frequency
//!                                                    │
//!                    every Nth chunk: rolling window slot → Stage 1 gate
//!                                                    │
//!                       Stage 2 (multi-window, conditioned) → hysteresis
//!                                                    │
//!                    broadcast::Sender<AnalysisEvent / DetectionEvent>
//! ```
//!
//! The capture callback only copies and pushes. All analysis and every
//! classifier call happens on the pipeline thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod analysis;
pub mod audio;
pub mod buffering;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod inference;
pub mod ipc;
pub mod preprocess;

// Convenience re-exports for downstream crates
pub use config::{DetectorConfig, NoiseGateConfig, Stage2Conditioning};
pub use detect::{DetectionPhase, DetectionReport, Detector, Rejection};
pub use engine::{EngineConfig, IngestHandle, WhistleEngine};
pub use error::{Result, WhistleError};
pub use inference::{BoundedClassifier, Classifier, ClassifierHandle, SpectralPeakClassifier};
pub use ipc::events::{AnalysisEvent, DetectionEvent, EngineStatus, EngineStatusEvent};

#[cfg(feature = "onnx")]
pub use inference::OnnxClassifier;
