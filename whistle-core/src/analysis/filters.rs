//! Single-pole IIR building blocks.
//!
//! ```text
//! high-pass: y[n] = a·(y[n-1] + x[n] - x[n-1]),   a = RC / (RC + dt)
//! low-pass:  y[n] = y[n-1] + α·(x[n] - y[n-1]),   α = dt / (RC + dt)
//! RC = 1 / (2π·fc), dt = 1 / sample_rate
//! ```

use std::f32::consts::PI;

fn rc_dt(cutoff_hz: f32, sample_rate: u32) -> (f32, f32) {
    let rc = 1.0 / (2.0 * PI * cutoff_hz.max(f32::MIN_POSITIVE));
    let dt = 1.0 / sample_rate.max(1) as f32;
    (rc, dt)
}

/// Stateful one-pole high-pass. The state (previous input and output) is
/// what keeps consecutive chunks continuous.
#[derive(Debug, Clone, PartialEq)]
pub struct OnePoleHighPass {
    a: f32,
    prev_input: f32,
    prev_output: f32,
}

impl OnePoleHighPass {
    pub fn new(cutoff_hz: f32, sample_rate: u32) -> Self {
        Self {
            a: Self::coefficient(cutoff_hz, sample_rate),
            prev_input: 0.0,
            prev_output: 0.0,
        }
    }

    pub fn coefficient(cutoff_hz: f32, sample_rate: u32) -> f32 {
        let (rc, dt) = rc_dt(cutoff_hz, sample_rate);
        rc / (rc + dt)
    }

    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        let y = self.a * (self.prev_output + x - self.prev_input);
        self.prev_input = x;
        self.prev_output = y;
        y
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        input.iter().map(|&x| self.process_sample(x)).collect()
    }

    /// `(previous input, previous output)`.
    pub fn state(&self) -> (f32, f32) {
        (self.prev_input, self.prev_output)
    }

    pub fn reset(&mut self) {
        self.prev_input = 0.0;
        self.prev_output = 0.0;
    }
}

/// Stateful one-pole low-pass.
#[derive(Debug, Clone, PartialEq)]
pub struct OnePoleLowPass {
    alpha: f32,
    prev_output: f32,
}

impl OnePoleLowPass {
    pub fn new(cutoff_hz: f32, sample_rate: u32) -> Self {
        let (rc, dt) = rc_dt(cutoff_hz, sample_rate);
        Self {
            alpha: dt / (rc + dt),
            prev_output: 0.0,
        }
    }

    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        self.prev_output += self.alpha * (x - self.prev_output);
        self.prev_output
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        input.iter().map(|&x| self.process_sample(x)).collect()
    }
}
