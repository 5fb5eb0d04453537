//! Stage 2 window conditioning: amplify → band-pass → compress → normalise.

use super::frequency::FrequencyAnalyzer;
use crate::config::Stage2Conditioning;

/// Peaks below this are treated as silence and left unnormalised.
const NORMALIZE_FLOOR: f32 = 1e-6;

/// Soft-knee compressor: excess above `threshold` is divided by `ratio`,
/// everything below the knee gets a small fixed gain.
pub fn compress(samples: &mut [f32], threshold: f32, ratio: f32, below_knee_gain: f32) {
    let ratio = ratio.max(1.0);
    for s in samples.iter_mut() {
        let mag = s.abs();
        *s = if mag > threshold {
            s.signum() * (threshold + (mag - threshold) / ratio)
        } else {
            *s * below_knee_gain
        };
    }
}

/// Scale so the largest absolute sample equals `target_peak`.
pub fn peak_normalize(samples: &mut [f32], target_peak: f32) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak < NORMALIZE_FLOOR {
        return;
    }
    let gain = target_peak / peak;
    for s in samples.iter_mut() {
        *s *= gain;
    }
}

/// Full Stage 2 chain on a copy of `samples`.
pub fn condition_window(
    samples: &[f32],
    sample_rate: u32,
    band_low_hz: f32,
    band_high_hz: f32,
    params: &Stage2Conditioning,
) -> Vec<f32> {
    let amplified: Vec<f32> = samples.iter().map(|s| s * params.amplify_gain).collect();
    let mut out = FrequencyAnalyzer::bandpass(&amplified, band_low_hz, band_high_hz, sample_rate);
    compress(
        &mut out,
        params.compressor_threshold,
        params.compressor_ratio,
        params.below_knee_gain,
    );
    peak_normalize(&mut out, params.normalize_peak);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressor_reduces_excess_above_knee() {
        let mut samples = vec![0.9, -0.9, 0.2];
        compress(&mut samples, 0.5, 4.0, 1.0);
        assert!((samples[0] - 0.6).abs() < 1e-6);
        assert!((samples[1] + 0.6).abs() < 1e-6);
        assert!((samples[2] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn compressor_boosts_below_knee() {
        let mut samples = vec![0.1];
        compress(&mut samples, 0.5, 4.0, 1.5);
        assert!((samples[0] - 0.15).abs() < 1e-6);
    }

    #[test]
    fn normalize_hits_target_peak() {
        let mut samples = vec![0.1, -0.25, 0.05];
        peak_normalize(&mut samples, 0.95);
        assert!((samples[1] + 0.95).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_silence_alone() {
        let mut samples = vec![0.0; 8];
        peak_normalize(&mut samples, 0.95);
        assert!(samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn condition_window_preserves_length_and_peak() {
        let samples: Vec<f32> = (0..1_600)
            .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 3_000.0 * i as f32 / 16_000.0).sin())
            .collect();
        let out = condition_window(
            &samples,
            16_000,
            2_000.0,
            4_500.0,
            &Stage2Conditioning::default(),
        );
        assert_eq!(out.len(), samples.len());
        let peak = out.iter().fold(0.0f32, |a, s| a.max(s.abs()));
        assert!((peak - 0.95).abs() < 1e-4, "peak={peak}");
    }
}
