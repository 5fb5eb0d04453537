//! `SpectralPeakClassifier`: model-free backend scoring tonal concentration.
//!
//! Runs without weights so the full pipeline can be exercised end-to-end
//! (tests, `--wav` replays, hosts built without the `onnx` feature). A whistle
//! is a narrow, loud spectral line; the score is the share of energy sitting
//! within `peak_halfwidth_hz` of the strongest bin, provided that bin lies in
//! the target band.

use tracing::debug;

use crate::analysis::FrequencyAnalyzer;
use crate::error::Result;
use crate::inference::Classifier;

/// Heuristic two-class scorer.
#[derive(Debug)]
pub struct SpectralPeakClassifier {
    sample_rate: u32,
    band_low_hz: f32,
    band_high_hz: f32,
    peak_halfwidth_hz: f32,
    /// Event logit = `sharpness × (concentration − 0.5)`.
    sharpness: f32,
    analyzer: FrequencyAnalyzer,
}

impl SpectralPeakClassifier {
    pub fn new(sample_rate: u32, band_low_hz: f32, band_high_hz: f32) -> Self {
        Self {
            sample_rate,
            band_low_hz,
            band_high_hz,
            peak_halfwidth_hz: 150.0,
            sharpness: 12.0,
            analyzer: FrequencyAnalyzer::new(),
        }
    }

    /// Width of the region around the peak counted as "tonal" energy.
    pub fn with_peak_halfwidth(mut self, hz: f32) -> Self {
        self.peak_halfwidth_hz = hz.max(0.0);
        self
    }

    /// Fraction of non-DC energy within the peak region, and the peak (Hz).
    fn concentration(&mut self, input: &[f32]) -> Option<(f32, f32)> {
        let (fft_size, mags) = self.analyzer.magnitude_spectrum(input);
        if fft_size < 2 || self.sample_rate == 0 {
            return None;
        }
        let power: Vec<f32> = mags.iter().map(|m| m * m).collect();
        let total: f32 = power[1..].iter().sum();
        if !(total > f32::EPSILON) {
            return None;
        }

        let (peak, _) = power
            .iter()
            .enumerate()
            .skip(1)
            .fold((1usize, f32::MIN), |best, (i, &p)| if p > best.1 { (i, p) } else { best });

        let bin_hz = self.sample_rate as f32 / fft_size as f32;
        let halfwidth_bins = (self.peak_halfwidth_hz / bin_hz).round() as usize;
        let lo = peak.saturating_sub(halfwidth_bins).max(1);
        let hi = (peak + halfwidth_bins).min(power.len() - 1);
        let tonal: f32 = power[lo..=hi].iter().sum();

        Some((tonal / total, peak as f32 * bin_hz))
    }
}

impl Classifier for SpectralPeakClassifier {
    fn score(&mut self, input: &[f32]) -> Result<(f32, f32)> {
        let floor = -0.5 * self.sharpness;
        let Some((concentration, peak_hz)) = self.concentration(input) else {
            return Ok((0.0, floor));
        };
        if peak_hz < self.band_low_hz || peak_hz > self.band_high_hz {
            debug!(peak_hz, "spectral peak outside band");
            return Ok((0.0, floor));
        }
        Ok((0.0, self.sharpness * (concentration - 0.5)))
    }

    fn name(&self) -> &str {
        "spectral-peak"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::event_probability;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f32::consts::PI;

    fn classifier() -> SpectralPeakClassifier {
        SpectralPeakClassifier::new(16_000, 2_000.0, 4_500.0)
    }

    fn tone(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / 16_000.0).sin())
            .collect()
    }

    #[test]
    fn in_band_tone_scores_high() {
        let mut c = classifier();
        let p = event_probability(c.score(&tone(3_000.0, 16_000)).expect("score"));
        assert!(p > 0.95, "p={p}");
    }

    #[test]
    fn short_tone_padded_with_zeros_still_scores_high() {
        let mut input = tone(3_000.0, 640);
        input.resize(16_000, 0.0);
        let mut c = classifier();
        let p = event_probability(c.score(&input).expect("score"));
        assert!(p > 0.9, "p={p}");
    }

    #[test]
    fn out_of_band_tone_scores_low() {
        let mut c = classifier();
        let p = event_probability(c.score(&tone(800.0, 16_000)).expect("score"));
        assert!(p < 0.01, "p={p}");
    }

    #[test]
    fn white_noise_scores_low() {
        let mut rng = StdRng::seed_from_u64(7);
        let noise: Vec<f32> = (0..16_000).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut c = classifier();
        let p = event_probability(c.score(&noise).expect("score"));
        assert!(p < 0.05, "p={p}");
    }

    #[test]
    fn zeros_score_floor() {
        let mut c = classifier();
        let p = event_probability(c.score(&[0.0; 1_024]).expect("score"));
        assert!(p < 0.01, "p={p}");
    }
}
