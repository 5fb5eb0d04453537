//! Per-channel conditioning applied to every chunk before analysis.
//!
//! ```text
//! chunk ──► high-pass (per channel, state carried across chunks)
//!       ──► noise gate (optional, acts on the filtered signal)
//!       ──► new chunk (input untouched)
//! ```

pub mod noise_gate;

use tracing::{debug, warn};

use crate::analysis::filters::OnePoleHighPass;
use crate::buffering::chunk::AudioChunk;
use crate::config::NoiseGateConfig;

pub use noise_gate::NoiseGate;

/// Session-scoped filter state: one high-pass per channel plus the gate's
/// reference energy.
#[derive(Debug, Clone)]
pub struct FilterState {
    sample_rate: u32,
    highpass: Vec<OnePoleHighPass>,
    gate: NoiseGate,
}

impl FilterState {
    fn new(sample_rate: u32, channels: usize, cutoff_hz: f32, gate: NoiseGateConfig) -> Self {
        Self {
            sample_rate,
            highpass: (0..channels)
                .map(|_| OnePoleHighPass::new(cutoff_hz, sample_rate))
                .collect(),
            gate: NoiseGate::new(gate),
        }
    }

    fn matches(&self, chunk: &AudioChunk) -> bool {
        self.sample_rate == chunk.sample_rate() && self.highpass.len() == chunk.channel_count()
    }

    /// `(previous input, previous output)` of each channel's high-pass.
    pub fn highpass_state(&self) -> Vec<(f32, f32)> {
        self.highpass.iter().map(OnePoleHighPass::state).collect()
    }

    pub fn gate_reference(&self) -> Option<f32> {
        self.gate.reference()
    }
}

/// High-pass filter + noise gate with state carried across chunk boundaries.
#[derive(Debug, Clone)]
pub struct SignalPreprocessor {
    cutoff_hz: f32,
    gate_config: NoiseGateConfig,
    state: Option<FilterState>,
}

impl SignalPreprocessor {
    pub fn new(cutoff_hz: f32, gate_config: NoiseGateConfig) -> Self {
        Self {
            cutoff_hz,
            gate_config,
            state: None,
        }
    }

    /// Filter `chunk` into a new chunk of identical shape.
    ///
    /// Empty chunks are returned as-is without touching the filter state.
    pub fn process(&mut self, chunk: &AudioChunk) -> AudioChunk {
        if chunk.is_empty() {
            return chunk.clone();
        }

        let needs_state = match &self.state {
            Some(state) => !state.matches(chunk),
            None => true,
        };
        if needs_state {
            if self.state.is_some() {
                warn!(
                    sample_rate = chunk.sample_rate(),
                    channels = chunk.channel_count(),
                    "chunk format changed mid-session; resetting filter state"
                );
            } else {
                debug!(
                    sample_rate = chunk.sample_rate(),
                    channels = chunk.channel_count(),
                    cutoff_hz = self.cutoff_hz,
                    "filter state initialised"
                );
            }
            self.state = Some(FilterState::new(
                chunk.sample_rate(),
                chunk.channel_count(),
                self.cutoff_hz,
                self.gate_config.clone(),
            ));
        }
        let Some(state) = self.state.as_mut() else {
            return chunk.clone();
        };

        let mut channels: Vec<Vec<f32>> = chunk
            .channels()
            .iter()
            .zip(state.highpass.iter_mut())
            .map(|(samples, hp)| hp.process(samples))
            .collect();

        state.gate.apply(&mut channels, chunk.sample_rate());

        AudioChunk::new(channels, chunk.sample_rate())
    }

    pub fn state(&self) -> Option<&FilterState> {
        self.state.as_ref()
    }

    /// Forget all filter history (session restart).
    pub fn reset(&mut self) {
        self.state = None;
    }
}
