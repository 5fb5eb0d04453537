//! RMS, band-pass RMS and dominant-frequency estimation.
//!
//! The dominant frequency is a coarse estimate (bin resolution is
//! `sample_rate / fft_size`); the detector only needs to know whether the
//! energy peak sits inside the target band.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::filters::{OnePoleHighPass, OnePoleLowPass};

/// Largest FFT used for dominant-frequency estimation. Longer windows keep
/// their newest samples.
pub const MAX_FFT_SIZE: usize = 1 << 16;

/// Per-window energy and spectral summary.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpectralSummary {
    pub rms: f32,
    pub band_rms: f32,
    pub dominant_hz: f32,
}

/// Reusable FFT planner plus scratch buffer.
pub struct FrequencyAnalyzer {
    planner: FftPlanner<f32>,
    cached: Option<(usize, Arc<dyn Fft<f32>>)>,
    buffer: Vec<Complex<f32>>,
}

impl FrequencyAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            cached: None,
            buffer: Vec::new(),
        }
    }

    /// Root-mean-square over the whole window, no windowing function.
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    /// Low-pass at `high_hz`, then high-pass at `low_hz`, both single-pole.
    pub fn bandpass(samples: &[f32], low_hz: f32, high_hz: f32, sample_rate: u32) -> Vec<f32> {
        if samples.is_empty() || sample_rate == 0 {
            return Vec::new();
        }
        let mut lp = OnePoleLowPass::new(high_hz, sample_rate);
        let mut hp = OnePoleHighPass::new(low_hz, sample_rate);
        samples
            .iter()
            .map(|&x| hp.process_sample(lp.process_sample(x)))
            .collect()
    }

    /// Magnitude spectrum of `samples` zero-padded to the next power of two.
    ///
    /// Returns `(fft_size, magnitudes[0..=fft_size/2])`. Empty input yields
    /// `(0, [])`.
    pub fn magnitude_spectrum(&mut self, samples: &[f32]) -> (usize, Vec<f32>) {
        if samples.is_empty() {
            return (0, Vec::new());
        }
        let fft_size = samples.len().next_power_of_two().min(MAX_FFT_SIZE);
        let start = samples.len().saturating_sub(fft_size);
        let window = &samples[start..];

        self.buffer.clear();
        self.buffer.extend(window.iter().map(|&s| Complex::new(s, 0.0)));
        self.buffer.resize(fft_size, Complex::new(0.0, 0.0));

        let fft = match &self.cached {
            Some((size, fft)) if *size == fft_size => Arc::clone(fft),
            _ => {
                let fft = self.planner.plan_fft_forward(fft_size);
                self.cached = Some((fft_size, Arc::clone(&fft)));
                fft
            }
        };
        fft.process(&mut self.buffer);

        let mags = self.buffer[..fft_size / 2 + 1]
            .iter()
            .map(|c| c.norm())
            .collect();
        (fft_size, mags)
    }

    /// Frequency (Hz) of the strongest non-DC bin.
    pub fn dominant_frequency(&mut self, samples: &[f32], sample_rate: u32) -> f32 {
        let (fft_size, mut mags) = self.magnitude_spectrum(samples);
        if fft_size < 2 || sample_rate == 0 {
            return 0.0;
        }
        mags[0] = 0.0;

        let mut best = 0usize;
        let mut best_mag = 0.0f32;
        for (i, &m) in mags.iter().enumerate() {
            if m > best_mag {
                best = i;
                best_mag = m;
            }
        }
        best as f32 * sample_rate as f32 / fft_size as f32
    }

    /// RMS, band-pass RMS and dominant frequency in one pass.
    pub fn analyze(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        band_low_hz: f32,
        band_high_hz: f32,
    ) -> SpectralSummary {
        if samples.is_empty() || sample_rate == 0 {
            return SpectralSummary::default();
        }
        let band = Self::bandpass(samples, band_low_hz, band_high_hz, sample_rate);
        SpectralSummary {
            rms: Self::rms(samples),
            band_rms: Self::rms(&band),
            dominant_hz: self.dominant_frequency(samples, sample_rate),
        }
    }
}

impl Default for FrequencyAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrequencyAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrequencyAnalyzer")
            .field("fft_size", &self.cached.as_ref().map(|(n, _)| *n))
            .finish_non_exhaustive()
    }
}
