//! Signal analysis used by the classifier gate.
//!
//! - `filters` — single-pole IIR stages shared with the preprocessor.
//! - `frequency` — RMS, band-pass RMS, FFT dominant frequency.
//! - `conditioning` — Stage 2 window shaping before re-scoring.

pub mod conditioning;
pub mod filters;
pub mod frequency;

pub use frequency::{FrequencyAnalyzer, SpectralSummary};
