//! One-shot sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Classifier inputs are whole windows rather than a continuous stream, so
//! each call builds a resampler sized to the window, flushes it, and drops
//! the filter delay. Equal rates are a copy.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::warn;

/// Below this many input frames rubato's interpolator has nothing to work
/// with; plain linear interpolation is used instead.
const MIN_RUBATO_FRAMES: usize = 16;

/// Convert mono `samples` from `from_rate` to `to_rate`.
///
/// The output length is `round(len × to_rate / from_rate)`. Never fails:
/// resampler errors fall back to linear interpolation and are logged.
pub fn resample_once(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let expected = (samples.len() as f64 * ratio).round() as usize;
    if samples.len() < MIN_RUBATO_FRAMES {
        return linear(samples, expected);
    }

    match rubato_once(samples, ratio, expected) {
        Ok(out) => out,
        Err(e) => {
            warn!(from_rate, to_rate, len = samples.len(), "resampler failed: {e}; using linear");
            linear(samples, expected)
        }
    }
}

fn rubato_once(samples: &[f32], ratio: f64, expected: usize) -> Result<Vec<f32>, String> {
    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0, // fixed ratio
        PolynomialDegree::Cubic,
        samples.len(),
        1, // mono
    )
    .map_err(|e| format!("init: {e}"))?;

    let delay = resampler.output_delay();
    let mut out = resampler
        .process(&[samples], None)
        .map_err(|e| format!("process: {e}"))?
        .into_iter()
        .next()
        .unwrap_or_default();
    let tail = resampler
        .process_partial::<Vec<f32>>(None, None)
        .map_err(|e| format!("flush: {e}"))?;
    if let Some(tail) = tail.into_iter().next() {
        out.extend(tail);
    }

    let start = delay.min(out.len());
    out.drain(..start);
    out.resize(expected, 0.0);
    Ok(out)
}

/// Linear interpolation to exactly `out_len` samples.
fn linear(samples: &[f32], out_len: usize) -> Vec<f32> {
    match (samples.len(), out_len) {
        (0, _) | (_, 0) => Vec::new(),
        (1, n) => vec![samples[0]; n],
        (len, 1) => vec![samples[len - 1]],
        (len, n) => {
            let step = (len - 1) as f64 / (n - 1) as f64;
            (0..n)
                .map(|i| {
                    let pos = i as f64 * step;
                    let lo = pos.floor() as usize;
                    let hi = (lo + 1).min(len - 1);
                    let frac = (pos - lo as f64) as f32;
                    samples[lo] + (samples[hi] - samples[lo]) * frac
                })
                .collect()
        }
    }
}
