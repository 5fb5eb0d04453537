//! Blocking analysis loop.
//!
//! ## Pipeline stages (per iteration)
//!
//! ```text
//! 1. Pop one AudioChunk from the SPSC ring (sleep briefly when empty)
//! 2. Detector::process → preprocess, window, gates, stage 1/2, hysteresis
//! 3. Broadcast AnalysisEvent, store it as the latest snapshot
//! 4. On a confirmed event: count it, broadcast DetectionEvent
//! ```
//!
//! The loop runs on a dedicated worker thread and owns every piece of
//! per-session state except the rolling window. On stop it discards whatever
//! is still queued and logs the session counters.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, info_span, warn};

use crate::{
    buffering::{chunk::AudioChunk, ChunkConsumer, Consumer},
    detect::{DetectionReport, Detector},
    ipc::events::{AnalysisEvent, DetectionEvent},
};

/// Session counters, shared between the ingest handle, the worker and
/// readers. All updates are `Relaxed`: they are statistics, not
/// synchronisation.
#[derive(Debug, Default)]
pub struct PipelineDiagnostics {
    pub chunks_in: AtomicUsize,
    pub frames_in: AtomicUsize,
    pub chunks_dropped: AtomicUsize,
    pub chunks_processed: AtomicUsize,
    pub chunks_discarded: AtomicUsize,
    pub classification_ticks: AtomicUsize,
    pub stage2_runs: AtomicUsize,
    pub classifier_errors: AtomicUsize,
    pub detections: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.chunks_in.store(0, Ordering::Relaxed);
        self.frames_in.store(0, Ordering::Relaxed);
        self.chunks_dropped.store(0, Ordering::Relaxed);
        self.chunks_processed.store(0, Ordering::Relaxed);
        self.chunks_discarded.store(0, Ordering::Relaxed);
        self.classification_ticks.store(0, Ordering::Relaxed);
        self.stage2_runs.store(0, Ordering::Relaxed);
        self.classifier_errors.store(0, Ordering::Relaxed);
        self.detections.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            chunks_in: self.chunks_in.load(Ordering::Relaxed),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            chunks_discarded: self.chunks_discarded.load(Ordering::Relaxed),
            classification_ticks: self.classification_ticks.load(Ordering::Relaxed),
            stage2_runs: self.stage2_runs.load(Ordering::Relaxed),
            classifier_errors: self.classifier_errors.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
        }
    }

    fn record(&self, report: &DetectionReport) {
        self.chunks_processed.fetch_add(1, Ordering::Relaxed);
        if report.evaluated {
            self.classification_ticks.fetch_add(1, Ordering::Relaxed);
        }
        if report.stage2_ran {
            self.stage2_runs.fetch_add(1, Ordering::Relaxed);
        }
        if report.classifier_errors > 0 {
            self.classifier_errors
                .fetch_add(report.classifier_errors as usize, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub chunks_in: usize,
    pub frames_in: usize,
    pub chunks_dropped: usize,
    pub chunks_processed: usize,
    pub chunks_discarded: usize,
    pub classification_ticks: usize,
    pub stage2_runs: usize,
    pub classifier_errors: usize,
    pub detections: usize,
}

/// All context the worker needs, passed as one struct so the spawn stays tidy.
pub struct PipelineContext {
    pub detector: Detector,
    pub consumer: ChunkConsumer,
    pub running: Arc<AtomicBool>,
    pub detection_tx: broadcast::Sender<DetectionEvent>,
    pub analysis_tx: broadcast::Sender<AnalysisEvent>,
    pub latest: Arc<Mutex<Option<AnalysisEvent>>>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Minimum sleep when the ring is empty (avoids busy-wait burning a core).
const DEFAULT_SLEEP_EMPTY_MS: u64 = 2;

/// Processed chunks between two checks of the overflow counter (~1 s of
/// 10 ms chunks).
const DROP_REPORT_EVERY: usize = 100;

/// Batches ring-overflow reporting on the worker side. The capture callback
/// only bumps `chunks_dropped`; this turns the counter into at most one
/// warning per `DROP_REPORT_EVERY` processed chunks.
#[derive(Debug, Default)]
struct DropReporter {
    reported: usize,
    since_check: usize,
}

impl DropReporter {
    /// Drops not yet reported, if this is a check point and there are any.
    fn poll(&mut self, dropped_total: usize) -> Option<usize> {
        self.since_check += 1;
        if self.since_check < DROP_REPORT_EVERY {
            return None;
        }
        self.since_check = 0;
        let fresh = dropped_total.saturating_sub(self.reported);
        self.reported = dropped_total;
        (fresh > 0).then_some(fresh)
    }
}

/// Run the blocking pipeline until `ctx.running` becomes false.
pub fn run(mut ctx: PipelineContext) {
    let span = info_span!("session");
    let _enter = span.enter();
    info!("pipeline started");

    let mut analysis_seq = 0u64;
    let mut drops = DropReporter::default();

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        let Some(chunk) = ctx.consumer.try_pop() else {
            std::thread::sleep(Duration::from_millis(empty_sleep_ms()));
            continue;
        };

        handle_chunk(&mut ctx, &chunk, &mut analysis_seq);

        let dropped_total = ctx.diagnostics.chunks_dropped.load(Ordering::Relaxed);
        if let Some(dropped) = drops.poll(dropped_total) {
            warn!(dropped, dropped_total, "chunk ring overflowed: worker is behind capture");
        }
    }

    let mut discarded = 0usize;
    while ctx.consumer.try_pop().is_some() {
        discarded += 1;
    }
    if discarded > 0 {
        debug!(discarded, "discarded queued chunks on stop");
        ctx.diagnostics
            .chunks_discarded
            .fetch_add(discarded, Ordering::Relaxed);
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        chunks_in = snap.chunks_in,
        frames_in = snap.frames_in,
        chunks_dropped = snap.chunks_dropped,
        chunks_processed = snap.chunks_processed,
        chunks_discarded = snap.chunks_discarded,
        classification_ticks = snap.classification_ticks,
        stage2_runs = snap.stage2_runs,
        classifier_errors = snap.classifier_errors,
        detections = snap.detections,
        stream_secs = ctx.detector.clock().as_secs_f64(),
        "pipeline stopped — diagnostics"
    );
}

fn handle_chunk(ctx: &mut PipelineContext, chunk: &AudioChunk, analysis_seq: &mut u64) {
    let Some(report) = ctx.detector.process(chunk) else {
        // Empty chunk: nothing to analyse, nothing to publish.
        ctx.diagnostics.chunks_processed.fetch_add(1, Ordering::Relaxed);
        return;
    };
    ctx.diagnostics.record(&report);

    let analysis = AnalysisEvent::from_report(*analysis_seq, &report);
    *analysis_seq = analysis_seq.saturating_add(1);
    *ctx.latest.lock() = Some(analysis.clone());
    // No subscribers (or lagging ones) is fine.
    let _ = ctx.analysis_tx.send(analysis);

    if report.detected {
        let seq = ctx.diagnostics.detections.fetch_add(1, Ordering::SeqCst) as u64;
        let event = DetectionEvent::from_report(seq, &report);
        info!(
            seq,
            at_ms = event.at_ms,
            stage1 = event.stage1_probability,
            stage2 = event.stage2_probability,
            dominant_hz = event.dominant_hz,
            "whistle detected"
        );
        let _ = ctx.detection_tx.send(event);
    }
}

fn empty_sleep_ms() -> u64 {
    static EMPTY_SLEEP_MS: OnceLock<u64> = OnceLock::new();
    *EMPTY_SLEEP_MS.get_or_init(|| {
        std::env::var("WHISTLE_PIPELINE_EMPTY_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_SLEEP_EMPTY_MS)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{create_chunk_ring, Producer};

    #[test]
    fn drop_reporter_batches_overflow_warnings() {
        let mut reporter = DropReporter::default();
        // 40 drops spread over the first check interval: one report, then quiet.
        let reports: Vec<usize> = (1..=DROP_REPORT_EVERY * 3)
            .filter_map(|i| reporter.poll(i.min(40)))
            .collect();
        assert_eq!(reports, [40]);

        let later: Vec<usize> = (0..DROP_REPORT_EVERY)
            .filter_map(|_| reporter.poll(45))
            .collect();
        assert_eq!(later, [5]);
    }
    use crate::buffering::rolling::RollingAudioWindow;
    use crate::config::DetectorConfig;

    fn context(
        consumer: ChunkConsumer,
        running: Arc<AtomicBool>,
    ) -> (PipelineContext, broadcast::Receiver<AnalysisEvent>) {
        let (detection_tx, _) = broadcast::channel(16);
        let (analysis_tx, analysis_rx) = broadcast::channel(1_024);
        let ctx = PipelineContext {
            detector: Detector::new(
                DetectorConfig::default(),
                None,
                Arc::new(RollingAudioWindow::new()),
            ),
            consumer,
            running,
            detection_tx,
            analysis_tx,
            latest: Arc::new(Mutex::new(None)),
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        };
        (ctx, analysis_rx)
    }

    #[test]
    fn diagnostics_reset_zeroes_counters() {
        let d = PipelineDiagnostics::default();
        d.chunks_in.fetch_add(3, Ordering::Relaxed);
        d.detections.fetch_add(1, Ordering::Relaxed);
        d.reset();
        assert_eq!(d.snapshot(), PipelineDiagnostics::default().snapshot());
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let json = serde_json::to_value(PipelineDiagnostics::default().snapshot())
            .expect("serialize snapshot");
        assert_eq!(json["classificationTicks"], 0);
        assert_eq!(json["chunksDropped"], 0);
    }

    #[test]
    fn stopped_pipeline_discards_queued_chunks() {
        let (mut producer, consumer) = create_chunk_ring(8);
        for _ in 0..5 {
            assert!(producer
                .try_push(AudioChunk::mono(vec![0.1; 160], 16_000))
                .is_ok());
        }
        let running = Arc::new(AtomicBool::new(false));
        let (ctx, _rx) = context(consumer, running);
        let diagnostics = Arc::clone(&ctx.diagnostics);

        run(ctx);

        let snap = diagnostics.snapshot();
        assert_eq!(snap.chunks_processed, 0);
        assert_eq!(snap.chunks_discarded, 5);
    }

    #[test]
    fn chunks_are_processed_in_order_and_published() {
        let (mut producer, consumer) = create_chunk_ring(64);
        let running = Arc::new(AtomicBool::new(true));
        let (ctx, mut rx) = context(consumer, Arc::clone(&running));
        let latest = Arc::clone(&ctx.latest);
        let diagnostics = Arc::clone(&ctx.diagnostics);

        for i in 0..8 {
            let level = 0.01 * (i + 1) as f32;
            assert!(producer
                .try_push(AudioChunk::mono(vec![level; 160], 16_000))
                .is_ok());
        }
        let worker = std::thread::spawn(move || run(ctx));

        let mut seen = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while seen.len() < 8 && std::time::Instant::now() < deadline {
            match rx.try_recv() {
                Ok(event) => seen.push(event),
                Err(_) => std::thread::sleep(Duration::from_millis(2)),
            }
        }
        running.store(false, Ordering::SeqCst);
        worker.join().expect("pipeline thread");

        assert_eq!(seen.len(), 8);
        assert!(seen.windows(2).all(|w| w[0].seq + 1 == w[1].seq));
        assert!(seen.windows(2).all(|w| w[0].at_ms < w[1].at_ms));
        assert_eq!(seen.iter().filter(|e| e.evaluated).count(), 2);
        assert_eq!(latest.lock().as_ref().map(|e| e.seq), Some(7));
        assert_eq!(diagnostics.snapshot().classification_ticks, 2);
    }
}
