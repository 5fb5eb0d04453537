//! Adaptive noise gate.
//!
//! ## Algorithm (per ~20 ms sub-frame, all channels together)
//!
//! 1. Frame RMS `r`.
//! 2. Gate decision against the *current* reference: `r < reference × open_ratio`
//!    → attenuate by `attenuation_db`, otherwise pass. The first frame after
//!    a reset only seeds the reference and passes at unity gain.
//! 3. Update the reference EMA with `r`, unless `r` is already much louder than
//!    the reference (`r ≥ reference × update_ceiling_ratio`), so an event cannot
//!    drag the threshold up behind itself.

use crate::config::NoiseGateConfig;

#[derive(Debug, Clone)]
pub struct NoiseGate {
    config: NoiseGateConfig,
    closed_gain: f32,
    reference: Option<f32>,
}

impl NoiseGate {
    pub fn new(config: NoiseGateConfig) -> Self {
        let closed_gain = 10f32.powf(-config.attenuation_db.abs() / 20.0);
        Self {
            config,
            closed_gain,
            reference: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Current reference energy (`None` until the first frame is seen).
    pub fn reference(&self) -> Option<f32> {
        self.reference
    }

    pub fn reset(&mut self) {
        self.reference = None;
    }

    /// Gate `channels` in place. All channels share one decision per frame.
    pub fn apply(&mut self, channels: &mut [Vec<f32>], sample_rate: u32) {
        if !self.config.enabled || channels.is_empty() || sample_rate == 0 {
            return;
        }
        let frames = channels[0].len();
        let frame_len = ((self.config.frame_ms / 1000.0) * sample_rate as f32).round() as usize;
        let frame_len = frame_len.max(1);

        let mut start = 0;
        while start < frames {
            let end = (start + frame_len).min(frames);
            let rms = frame_rms(channels, start, end);

            let gain = match self.reference {
                Some(reference) if rms < reference * self.config.open_ratio => self.closed_gain,
                _ => 1.0,
            };
            if gain != 1.0 {
                for channel in channels.iter_mut() {
                    for s in &mut channel[start..end] {
                        *s *= gain;
                    }
                }
            }

            self.reference = Some(match self.reference {
                None => rms,
                Some(reference) if rms < reference * self.config.update_ceiling_ratio => {
                    let alpha = self.config.ema_alpha;
                    (1.0 - alpha) * reference + alpha * rms
                }
                Some(reference) => reference,
            });

            start = end;
        }
    }
}

fn frame_rms(channels: &[Vec<f32>], start: usize, end: usize) -> f32 {
    let mut sum_sq = 0.0f32;
    let mut count = 0usize;
    for channel in channels {
        for s in &channel[start..end] {
            sum_sq += s * s;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        (sum_sq / count as f32).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> NoiseGateConfig {
        NoiseGateConfig {
            enabled: true,
            frame_ms: 10.0,
            open_ratio: 1.5,
            attenuation_db: 20.0,
            ema_alpha: 0.5,
            update_ceiling_ratio: 3.0,
        }
    }

    #[test]
    fn disabled_gate_is_transparent() {
        let mut gate = NoiseGate::new(NoiseGateConfig::default());
        let mut channels = vec![vec![0.01; 320]];
        gate.apply(&mut channels, 16_000);
        assert!(channels[0].iter().all(|s| *s == 0.01));
        assert_eq!(gate.reference(), None);
    }

    #[test]
    fn steady_noise_is_attenuated_not_silenced() {
        let mut gate = NoiseGate::new(enabled());
        let mut channels = vec![vec![0.01; 1_600]];
        gate.apply(&mut channels, 16_000);
        let last = *channels[0].last().expect("non-empty");
        assert!((last - 0.001).abs() < 1e-6, "last={last}");
    }

    #[test]
    fn loud_frame_passes_and_does_not_raise_reference() {
        let mut gate = NoiseGate::new(enabled());
        let mut noise = vec![vec![0.01; 800]];
        gate.apply(&mut noise, 16_000);
        let before = gate.reference().expect("reference set");

        let mut loud = vec![vec![0.5; 160]];
        gate.apply(&mut loud, 16_000);
        assert!(loud[0].iter().all(|s| *s == 0.5));
        assert_eq!(gate.reference(), Some(before));
    }

    #[test]
    fn first_frame_seeds_reference_at_unity_gain() {
        let mut gate = NoiseGate::new(enabled());
        let mut channels = vec![vec![0.02; 160], vec![0.02; 160]];
        gate.apply(&mut channels, 16_000);
        assert!(channels.iter().flatten().all(|s| *s == 0.02));
        let reference = gate.reference().expect("seeded");
        assert!((reference - 0.02).abs() < 1e-6);

        // The same level afterwards sits under `reference × open_ratio`.
        let mut next = vec![vec![0.02; 160]];
        gate.apply(&mut next, 16_000);
        assert!((next[0][0] - 0.002).abs() < 1e-6);
    }

    #[test]
    fn first_frame_after_reset_is_not_attenuated() {
        let mut gate = NoiseGate::new(enabled());
        gate.apply(&mut [vec![0.01; 800]], 16_000);
        gate.reset();
        let mut channels = vec![vec![0.3; 160]];
        gate.apply(&mut channels, 16_000);
        assert!(channels[0].iter().all(|s| *s == 0.3));
    }

    #[test]
    fn reset_forgets_reference() {
        let mut gate = NoiseGate::new(enabled());
        gate.apply(&mut [vec![0.01; 160]], 16_000);
        gate.reset();
        assert_eq!(gate.reference(), None);
    }
}
