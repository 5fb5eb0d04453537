//! Detector tuning constants.
//!
//! Everything here is fixed for the lifetime of a session. Values are plain
//! serde structs so a host can load them from JSON; missing fields take the
//! defaults below, which are tuned for a referee-style whistle blast
//! (2–4.5 kHz, roughly 0.3–1.5 s long).

use serde::{Deserialize, Serialize};

use crate::error::{Result, WhistleError};

/// Adaptive noise gate applied after the high-pass filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct NoiseGateConfig {
    pub enabled: bool,
    /// Sub-frame length the gate decides on (ms).
    pub frame_ms: f32,
    /// Frames quieter than `reference × open_ratio` are attenuated.
    pub open_ratio: f32,
    /// Attenuation applied to closed frames (dB, positive).
    pub attenuation_db: f32,
    /// EMA smoothing factor for the reference energy, in (0, 1].
    pub ema_alpha: f32,
    /// Frames louder than `reference × update_ceiling_ratio` do not update the
    /// reference, so an event cannot pull the gate threshold up.
    pub update_ceiling_ratio: f32,
}

impl Default for NoiseGateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frame_ms: 20.0,
            open_ratio: 1.5,
            attenuation_db: 12.0,
            ema_alpha: 0.05,
            update_ceiling_ratio: 3.0,
        }
    }
}

/// Stage 2 signal conditioning before re-scoring a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Stage2Conditioning {
    /// Linear gain applied before band-passing.
    pub amplify_gain: f32,
    /// Compressor knee (linear amplitude).
    pub compressor_threshold: f32,
    /// Excess above the knee is divided by this ratio.
    pub compressor_ratio: f32,
    /// Gain applied to samples below the knee.
    pub below_knee_gain: f32,
    /// Target absolute peak after normalisation.
    pub normalize_peak: f32,
}

impl Default for Stage2Conditioning {
    fn default() -> Self {
        Self {
            amplify_gain: 2.0,
            compressor_threshold: 0.5,
            compressor_ratio: 4.0,
            below_knee_gain: 1.2,
            normalize_peak: 0.95,
        }
    }
}

/// Full detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct DetectorConfig {
    /// High-pass cutoff of the preprocessor (Hz).
    pub highpass_cutoff_hz: f32,
    pub noise_gate: NoiseGateConfig,

    /// Target band (Hz). The dominant frequency must fall inside it.
    pub band_low_hz: f32,
    pub band_high_hz: f32,
    /// Raw RMS floor below which a tick counts as silence.
    pub min_rms: f32,
    /// Band-passed RMS floor.
    pub min_band_rms: f32,

    /// Loose Stage 1 probability threshold.
    pub stage1_threshold: f32,
    /// Strict Stage 2 probability threshold.
    pub stage2_threshold: f32,
    /// Consecutive Stage 2 passes needed to confirm an event.
    pub required_confirmations: u32,
    /// Refractory period after a confirmed event (seconds).
    pub cooldown_secs: f32,

    /// Classification runs on every `decimation`-th ingested chunk.
    pub decimation: u32,
    /// Duration the rolling window must always cover (seconds).
    pub window_target_secs: f32,
    /// Lower bound on the rolling window slot count.
    pub min_window_slots: usize,
    /// Stage 2 snapshot lengths, each anchored to "now" (seconds).
    pub stage2_windows_secs: Vec<f32>,
    /// Re-derive the rolling window when the device buffer size changes.
    pub rederive_window_on_cadence_change: bool,
    pub stage2_conditioning: Stage2Conditioning,

    /// Sample rate the classifier expects (Hz).
    pub model_sample_rate: u32,
    /// Fixed input length the classifier expects (samples).
    pub model_input_len: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            highpass_cutoff_hz: 100.0,
            noise_gate: NoiseGateConfig::default(),
            band_low_hz: 2_000.0,
            band_high_hz: 4_500.0,
            min_rms: 0.005,
            min_band_rms: 0.008,
            stage1_threshold: 0.5,
            stage2_threshold: 0.8,
            required_confirmations: 1,
            cooldown_secs: 5.0,
            decimation: 4,
            window_target_secs: 1.0,
            min_window_slots: 4,
            stage2_windows_secs: vec![1.0, 0.7, 0.5],
            rederive_window_on_cadence_change: false,
            stage2_conditioning: Stage2Conditioning::default(),
            model_sample_rate: 16_000,
            model_input_len: 16_000,
        }
    }
}

impl DetectorConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(WhistleError::InvalidConfig(msg.to_string()));

        if !(self.highpass_cutoff_hz > 0.0) {
            return fail("highpassCutoffHz must be > 0");
        }
        if !(self.band_low_hz > 0.0 && self.band_high_hz > self.band_low_hz) {
            return fail("band must satisfy 0 < bandLowHz < bandHighHz");
        }
        if self.min_rms < 0.0 || self.min_band_rms < 0.0 {
            return fail("energy floors must be non-negative");
        }
        for (name, t) in [
            ("stage1Threshold", self.stage1_threshold),
            ("stage2Threshold", self.stage2_threshold),
        ] {
            if !(0.0..=1.0).contains(&t) {
                return Err(WhistleError::InvalidConfig(format!(
                    "{name} must lie in [0, 1], got {t}"
                )));
            }
        }
        if self.required_confirmations == 0 {
            return fail("requiredConfirmations must be >= 1");
        }
        if !(self.cooldown_secs >= 0.0) {
            return fail("cooldownSecs must be >= 0");
        }
        if self.decimation == 0 {
            return fail("decimation must be >= 1");
        }
        if !(self.window_target_secs > 0.0) {
            return fail("windowTargetSecs must be > 0");
        }
        if self.stage2_windows_secs.is_empty()
            || self.stage2_windows_secs.iter().any(|d| !(*d > 0.0))
        {
            return fail("stage2WindowsSecs must be a non-empty list of positive durations");
        }
        if self
            .stage2_windows_secs
            .iter()
            .any(|d| *d > self.window_target_secs + f32::EPSILON)
        {
            return fail("stage2WindowsSecs may not exceed windowTargetSecs");
        }
        if self.model_sample_rate == 0 || self.model_input_len == 0 {
            return fail("model sample rate and input length must be > 0");
        }
        if self.noise_gate.enabled
            && !(self.noise_gate.frame_ms > 0.0 && self.noise_gate.ema_alpha > 0.0)
        {
            return fail("noise gate needs frameMs > 0 and emaAlpha > 0");
        }
        Ok(())
    }

    /// Clamp soft ranges into sane bounds (used on values loaded from disk).
    pub fn normalized(mut self) -> Self {
        self.stage1_threshold = self.stage1_threshold.clamp(0.0, 1.0);
        self.stage2_threshold = self.stage2_threshold.clamp(0.0, 1.0);
        self.required_confirmations = self.required_confirmations.clamp(1, 32);
        self.decimation = self.decimation.clamp(1, 64);
        self.min_window_slots = self.min_window_slots.max(1);
        self.noise_gate.ema_alpha = self.noise_gate.ema_alpha.clamp(0.001, 1.0);
        self.noise_gate.open_ratio = self.noise_gate.open_ratio.max(0.0);
        self.noise_gate.attenuation_db = self.noise_gate.attenuation_db.abs();
        self.stage2_conditioning.compressor_ratio =
            self.stage2_conditioning.compressor_ratio.max(1.0);
        self
    }

    /// Shortest configured Stage 2 snapshot (seconds).
    pub fn shortest_stage2_window(&self) -> f32 {
        self.stage2_windows_secs
            .iter()
            .copied()
            .fold(f32::INFINITY, f32::min)
    }
}
