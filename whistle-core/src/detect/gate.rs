//! Cheap gates, Stage 1 and Stage 2 scoring for one classification tick.
//!
//! ```text
//! chunk (mono) ─► pending slot ──(every `decimation` chunks)──► tick
//!   tick: push slot into RollingAudioWindow
//!         summary = analyze(slot)            energy / band energy / peak Hz
//!         stage1  = score(slot)              always computed
//!         gates   : cooldown → silence → weak band → out of band → stage 1
//!         stage2  = max over snapshots(1.0, 0.7, 0.5 s) of score(condition(w))
//! ```
//!
//! Stage 2 runs when every signal gate passes, including while the cooldown
//! gate is the only failure (diagnostics only, the state machine ignores it).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::analysis::conditioning::condition_window;
use crate::analysis::{FrequencyAnalyzer, SpectralSummary};
use crate::buffering::rolling::{RollingAudioWindow, WindowGeometry};
use crate::config::DetectorConfig;
use crate::error::WhistleError;
use crate::inference::{event_probability, ClassificationSample, ClassifierHandle};

/// Relative chunk-duration change that counts as a new cadence.
const CADENCE_TOLERANCE: f64 = 0.01;

/// First gate that failed on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Rejection {
    Cooldown,
    Silence,
    WeakBand,
    OutOfBand,
    Stage1,
    InsufficientAudio,
}

/// Outcome of one classification tick.
#[derive(Debug, Clone, PartialEq)]
pub struct GateVerdict {
    /// Analysis of the slot that triggered the tick.
    pub summary: SpectralSummary,
    pub stage1: f32,
    /// `None` when Stage 2 did not run or no snapshot was available.
    pub stage2: Option<f32>,
    pub rejection: Option<Rejection>,
    /// Classifier calls that failed during this tick.
    pub classifier_errors: u32,
}

impl GateVerdict {
    pub fn passed(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Per-chunk output of [`EventClassifierGate::process`].
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutput {
    /// Analysis of the chunk itself, refreshed on every chunk.
    pub chunk_summary: SpectralSummary,
    /// Present on classification ticks only.
    pub verdict: Option<GateVerdict>,
}

pub struct EventClassifierGate {
    config: DetectorConfig,
    analyzer: FrequencyAnalyzer,
    classifier: Option<ClassifierHandle>,
    window: Arc<RollingAudioWindow>,
    chunks_seen: u64,
    pending: Vec<f32>,
}

impl EventClassifierGate {
    pub fn new(
        config: DetectorConfig,
        classifier: Option<ClassifierHandle>,
        window: Arc<RollingAudioWindow>,
    ) -> Self {
        if classifier.is_none() {
            warn!("no classifier attached; stage probabilities will read 0");
        }
        Self {
            config,
            analyzer: FrequencyAnalyzer::new(),
            classifier,
            window,
            chunks_seen: 0,
            pending: Vec::new(),
        }
    }

    pub fn window(&self) -> &Arc<RollingAudioWindow> {
        &self.window
    }

    /// Feed one preprocessed mono chunk.
    ///
    /// `cooldown_active` is the state machine's view at this chunk's
    /// timestamp.
    pub fn process(
        &mut self,
        mono: &[f32],
        sample_rate: u32,
        chunk_secs: f64,
        cooldown_active: bool,
    ) -> GateOutput {
        self.ensure_geometry(sample_rate, chunk_secs);

        let chunk_summary = self.analyzer.analyze(
            mono,
            sample_rate,
            self.config.band_low_hz,
            self.config.band_high_hz,
        );

        self.pending.extend_from_slice(mono);
        self.chunks_seen += 1;
        if self.chunks_seen % u64::from(self.config.decimation.max(1)) != 0 {
            return GateOutput {
                chunk_summary,
                verdict: None,
            };
        }

        let slot = std::mem::take(&mut self.pending);
        self.window.push(slot.clone());
        let verdict = self.evaluate(&slot, sample_rate, cooldown_active);
        GateOutput {
            chunk_summary,
            verdict: Some(verdict),
        }
    }

    /// Forget session state (pending samples, tick counter, window slots).
    pub fn reset(&mut self) {
        self.chunks_seen = 0;
        self.pending.clear();
        self.window.reset();
    }

    fn ensure_geometry(&mut self, sample_rate: u32, chunk_secs: f64) {
        let rederive = match self.window.geometry() {
            None => true,
            Some(g) if g.sample_rate != sample_rate => {
                warn!(
                    from = g.sample_rate,
                    to = sample_rate,
                    "sample rate changed mid-session; re-deriving window"
                );
                true
            }
            Some(g) => {
                self.config.rederive_window_on_cadence_change
                    && g.cadence_differs(chunk_secs, CADENCE_TOLERANCE)
            }
        };
        if !rederive {
            return;
        }
        let geometry = WindowGeometry::derive(
            sample_rate,
            chunk_secs,
            self.config.decimation,
            f64::from(self.config.window_target_secs),
            self.config.min_window_slots,
        );
        self.window.configure(geometry);
    }

    fn evaluate(&mut self, slot: &[f32], sample_rate: u32, cooldown_active: bool) -> GateVerdict {
        let mut errors = 0u32;
        let summary = self.analyzer.analyze(
            slot,
            sample_rate,
            self.config.band_low_hz,
            self.config.band_high_hz,
        );
        let stage1 = self.classify(slot, sample_rate, &mut errors);

        let signal_rejection = if summary.rms < self.config.min_rms {
            Some(Rejection::Silence)
        } else if summary.band_rms < self.config.min_band_rms {
            Some(Rejection::WeakBand)
        } else if summary.dominant_hz < self.config.band_low_hz
            || summary.dominant_hz > self.config.band_high_hz
        {
            Some(Rejection::OutOfBand)
        } else if stage1 < self.config.stage1_threshold {
            Some(Rejection::Stage1)
        } else {
            None
        };

        let mut rejection = if cooldown_active {
            Some(Rejection::Cooldown)
        } else {
            signal_rejection
        };

        let stage2 = if signal_rejection.is_none() {
            let stage2 = self.stage2(sample_rate, &mut errors);
            if stage2.is_none() && rejection.is_none() {
                rejection = Some(Rejection::InsufficientAudio);
            }
            stage2
        } else {
            None
        };

        debug!(
            rms = summary.rms,
            band_rms = summary.band_rms,
            dominant_hz = summary.dominant_hz,
            stage1,
            stage2 = stage2.unwrap_or(0.0),
            ?rejection,
            "classification tick"
        );

        GateVerdict {
            summary,
            stage1,
            stage2,
            rejection,
            classifier_errors: errors,
        }
    }

    /// Max conditioned score over every available snapshot. The tick's slot
    /// is already in the window, so snapshots end at "now".
    fn stage2(&mut self, sample_rate: u32, errors: &mut u32) -> Option<f32> {
        let mut best: Option<f32> = None;
        let durations = self.config.stage2_windows_secs.clone();
        for secs in durations {
            let window = match self.window.snapshot(f64::from(secs)) {
                Ok(w) => w,
                Err(WhistleError::InsufficientAudio {
                    required,
                    available,
                }) => {
                    debug!(secs, required, available, "stage 2 window not yet filled");
                    continue;
                }
                Err(e) => {
                    debug!(secs, "stage 2 snapshot unavailable: {e}");
                    continue;
                }
            };
            let conditioned = condition_window(
                &window,
                sample_rate,
                self.config.band_low_hz,
                self.config.band_high_hz,
                &self.config.stage2_conditioning,
            );
            let p = self.classify(&conditioned, sample_rate, errors);
            best = Some(best.map_or(p, |b: f32| b.max(p)));
        }
        best
    }

    /// Prepare and score `samples`; silence and failures read as 0.
    fn classify(&self, samples: &[f32], sample_rate: u32, errors: &mut u32) -> f32 {
        let sample = ClassificationSample::prepare(
            samples,
            sample_rate,
            self.config.model_sample_rate,
            self.config.model_input_len,
        );
        if sample.is_silent() {
            return 0.0;
        }
        let Some(classifier) = &self.classifier else {
            return 0.0;
        };
        match classifier.score(sample.values()) {
            Ok(logits) => event_probability(logits),
            Err(e) => {
                *errors += 1;
                error!("classifier failed: {e}");
                0.0
            }
        }
    }
}

impl std::fmt::Debug for EventClassifierGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventClassifierGate")
            .field("chunks_seen", &self.chunks_seen)
            .field("pending", &self.pending.len())
            .field("classifier", &self.classifier)
            .finish_non_exhaustive()
    }
}
