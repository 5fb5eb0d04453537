//! Model-ready input vectors.

use crate::audio::resample::resample_once;

/// Standard deviation below which a vector counts as digital silence: it is
/// neither normalised nor submitted to the classifier.
pub const SILENCE_STD_EPSILON: f32 = 1e-6;

/// Fixed-length, z-score-normalised classifier input.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationSample {
    values: Vec<f32>,
    silent: bool,
}

impl ClassificationSample {
    /// Resample `samples` to `model_rate`, pad/truncate to `model_len`, then
    /// z-score normalise.
    ///
    /// Short input is zero-padded at the end; long input keeps its newest
    /// `model_len` samples.
    pub fn prepare(samples: &[f32], source_rate: u32, model_rate: u32, model_len: usize) -> Self {
        let mut values = resample_once(samples, source_rate, model_rate);
        if values.len() > model_len {
            values.drain(..values.len() - model_len);
        }
        values.resize(model_len, 0.0);

        let silent = !zscore_in_place(&mut values);
        Self { values, silent }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// True when the input had (near-)zero variance.
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Returns `false` (and leaves `values` untouched) when the standard
/// deviation is below [`SILENCE_STD_EPSILON`].
fn zscore_in_place(values: &mut [f32]) -> bool {
    if values.is_empty() {
        return false;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let std = var.sqrt();
    if std < SILENCE_STD_EPSILON as f64 {
        return false;
    }
    for v in values.iter_mut() {
        *v = ((*v as f64 - mean) / std) as f32;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_is_padded_to_model_length() {
        let sample = ClassificationSample::prepare(&[0.5, -0.5, 0.25], 16_000, 16_000, 8);
        assert_eq!(sample.len(), 8);
        assert!(!sample.is_silent());
    }

    #[test]
    fn long_input_keeps_newest_samples() {
        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let sample = ClassificationSample::prepare(&input, 16_000, 16_000, 4);
        // The newest four samples (6..=9) survive; z-score keeps their order.
        let v = sample.values();
        assert_eq!(v.len(), 4);
        assert!(v.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn normalised_output_has_zero_mean_unit_variance() {
        let input: Vec<f32> = (0..400).map(|i| ((i * 37) % 11) as f32 * 0.01).collect();
        let sample = ClassificationSample::prepare(&input, 16_000, 16_000, 400);
        let v = sample.values();
        let mean = v.iter().sum::<f32>() / v.len() as f32;
        let var = v.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / v.len() as f32;
        assert!(mean.abs() < 1e-4, "mean={mean}");
        assert!((var - 1.0).abs() < 1e-3, "var={var}");
    }

    #[test]
    fn silence_is_flagged_and_not_normalised() {
        let sample = ClassificationSample::prepare(&[0.0; 320], 16_000, 16_000, 1_000);
        assert!(sample.is_silent());
        assert!(sample.values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn empty_input_yields_silent_zero_vector() {
        let sample = ClassificationSample::prepare(&[], 48_000, 16_000, 16);
        assert_eq!(sample.len(), 16);
        assert!(sample.is_silent());
    }

    #[test]
    fn resamples_to_model_rate() {
        let input = vec![0.1f32; 4_800];
        let sample = ClassificationSample::prepare(&input, 48_000, 16_000, 16_000);
        assert_eq!(sample.len(), 16_000);
    }
}
