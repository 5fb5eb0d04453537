//! Per-session detection pipeline.
//!
//! ```text
//! AudioChunk ─► SignalPreprocessor ─► downmix ─► EventClassifierGate ─► DetectionStateMachine
//!                                                   │   (RollingAudioWindow, shared)
//!                                                   ▼
//!                                            DetectionReport
//! ```
//!
//! `Detector` is single-threaded and owned by the pipeline worker; only the
//! rolling window is shared with readers outside the worker.

pub mod gate;
pub mod state;

pub use gate::{EventClassifierGate, GateOutput, GateVerdict, Rejection};
pub use state::{DetectionPhase, DetectionStateMachine};

use std::sync::Arc;
use std::time::Duration;

use crate::buffering::chunk::AudioChunk;
use crate::buffering::rolling::RollingAudioWindow;
use crate::config::DetectorConfig;
use crate::inference::ClassifierHandle;
use crate::preprocess::SignalPreprocessor;

/// Everything the detector knows after one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionReport {
    /// Stream time at the end of the chunk.
    pub at: Duration,
    pub rms: f32,
    pub band_rms: f32,
    pub dominant_hz: f32,
    /// Probabilities from the most recent classification tick.
    pub stage1: f32,
    pub stage2: f32,
    /// True when this chunk triggered a classification tick.
    pub evaluated: bool,
    /// Why this tick did not count as a pass (`None` when not evaluated or
    /// every gate passed).
    pub rejection: Option<Rejection>,
    pub stage2_ran: bool,
    /// Rising edge: true only on the confirming observation.
    pub detected: bool,
    pub phase: DetectionPhase,
    pub classifier_errors: u32,
}

#[derive(Debug)]
pub struct Detector {
    preprocessor: SignalPreprocessor,
    gate: EventClassifierGate,
    state: DetectionStateMachine,
    clock: Duration,
    last_stage1: f32,
    last_stage2: f32,
}

impl Detector {
    pub fn new(
        config: DetectorConfig,
        classifier: Option<ClassifierHandle>,
        window: Arc<RollingAudioWindow>,
    ) -> Self {
        let preprocessor =
            SignalPreprocessor::new(config.highpass_cutoff_hz, config.noise_gate.clone());
        let cooldown =
            Duration::try_from_secs_f32(config.cooldown_secs.max(0.0)).unwrap_or(Duration::MAX);
        let state = DetectionStateMachine::new(
            config.stage2_threshold,
            config.required_confirmations,
            cooldown,
        );
        Self {
            preprocessor,
            gate: EventClassifierGate::new(config, classifier, window),
            state,
            clock: Duration::ZERO,
            last_stage1: 0.0,
            last_stage2: 0.0,
        }
    }

    /// Run one chunk through the pipeline. Empty chunks are ignored and
    /// return `None`.
    pub fn process(&mut self, chunk: &AudioChunk) -> Option<DetectionReport> {
        if chunk.is_empty() {
            return None;
        }

        let chunk_secs = chunk.duration_secs();
        self.clock += Duration::from_secs_f64(chunk_secs);
        let now = self.clock;

        let filtered = self.preprocessor.process(chunk);
        let mono = filtered.downmix();
        let cooldown = self.state.in_cooldown(now);
        let GateOutput {
            chunk_summary,
            verdict,
        } = self
            .gate
            .process(&mono, filtered.sample_rate(), chunk_secs, cooldown);

        let mut report = DetectionReport {
            at: now,
            rms: chunk_summary.rms,
            band_rms: chunk_summary.band_rms,
            dominant_hz: chunk_summary.dominant_hz,
            stage1: self.last_stage1,
            stage2: self.last_stage2,
            evaluated: false,
            rejection: None,
            stage2_ran: false,
            detected: false,
            phase: self.state.phase(),
            classifier_errors: 0,
        };

        if let Some(verdict) = verdict {
            self.last_stage1 = verdict.stage1;
            self.last_stage2 = verdict.stage2.unwrap_or(0.0);

            // Rejected ticks break a confirmation streak.
            let observed = if verdict.passed() { self.last_stage2 } else { 0.0 };
            report.detected = self.state.observe(observed, now);
            report.stage1 = self.last_stage1;
            report.stage2 = self.last_stage2;
            report.evaluated = true;
            report.rejection = verdict.rejection;
            report.stage2_ran = verdict.stage2.is_some();
            report.phase = self.state.phase();
            report.classifier_errors = verdict.classifier_errors;
        }

        Some(report)
    }

    /// Stream time consumed so far.
    pub fn clock(&self) -> Duration {
        self.clock
    }

    pub fn phase(&self) -> DetectionPhase {
        self.state.phase()
    }

    pub fn window(&self) -> &Arc<RollingAudioWindow> {
        self.gate.window()
    }

    /// Start a fresh session: filters, window, hysteresis and clock.
    pub fn reset(&mut self) {
        self.preprocessor.reset();
        self.gate.reset();
        self.state.reset();
        self.clock = Duration::ZERO;
        self.last_stage1 = 0.0;
        self.last_stage2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::inference::Classifier;

    struct AlwaysEvent;
    impl Classifier for AlwaysEvent {
        fn score(&mut self, _input: &[f32]) -> Result<(f32, f32)> {
            Ok((0.0, 8.0))
        }
        fn name(&self) -> &str {
            "always"
        }
    }

    fn detector(config: DetectorConfig) -> Detector {
        Detector::new(
            config,
            Some(ClassifierHandle::new(AlwaysEvent)),
            Arc::new(RollingAudioWindow::new()),
        )
    }

    fn tone(len: usize, offset: usize) -> AudioChunk {
        let samples = (0..len)
            .map(|i| {
                let n = (offset + i) as f32;
                0.5 * (2.0 * std::f32::consts::PI * 3_000.0 * n / 16_000.0).sin()
            })
            .collect();
        AudioChunk::mono(samples, 16_000)
    }

    #[test]
    fn empty_chunk_is_ignored() {
        let mut d = detector(DetectorConfig::default());
        assert!(d.process(&AudioChunk::mono(Vec::new(), 16_000)).is_none());
        assert_eq!(d.clock(), Duration::ZERO);
        assert!(d.window().geometry().is_none());
    }

    #[test]
    fn clock_advances_by_chunk_duration() {
        let mut d = detector(DetectorConfig::default());
        for i in 0..10 {
            d.process(&tone(160, i * 160));
        }
        assert_eq!(d.clock(), Duration::from_millis(100));
    }

    #[test]
    fn stereo_input_is_downmixed() {
        let mut d = detector(DetectorConfig::default());
        let left = tone(160, 0);
        let chunk = AudioChunk::new(
            vec![left.channels()[0].clone(), left.channels()[0].clone()],
            16_000,
        );
        let report = d.process(&chunk).expect("report");
        assert!(report.rms > 0.2);
    }

    #[test]
    fn confirms_again_only_after_cooldown() {
        let config = DetectorConfig {
            window_target_secs: 0.5,
            stage2_windows_secs: vec![0.5],
            cooldown_secs: 1.0,
            ..DetectorConfig::default()
        };
        let mut d = detector(config);
        let detections: Vec<Duration> = (0..200)
            .filter_map(|i| d.process(&tone(160, i * 160)))
            .filter(|r| r.detected)
            .map(|r| r.at)
            .collect();
        // 2 s of tone, first pass at 0.52 s, 1 s cooldown → 0.52 s and 1.52 s.
        assert_eq!(detections.len(), 2, "{detections:?}");
        assert!(detections[1] - detections[0] >= Duration::from_secs(1));
    }

    #[test]
    fn reset_restarts_the_session() {
        let mut d = detector(DetectorConfig::default());
        for i in 0..8 {
            d.process(&tone(160, i * 160));
        }
        d.reset();
        assert_eq!(d.clock(), Duration::ZERO);
        assert_eq!(d.window().slot_count(), 0);
        assert_eq!(d.phase(), DetectionPhase::Idle);
    }
}
