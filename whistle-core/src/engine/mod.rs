//! `WhistleEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! WhistleEngine::new()
//!     └─► warm_up()                 → classifier ready, status = WarmingUp → Idle
//!         └─► start_with_ingest()   → worker spawned, IngestHandle returned, status = Listening
//!         └─► start_capture(dev)    → worker + cpal capture thread, status = Listening
//!             └─► stop()            → session closed, threads joined, status = Stopped
//! ```
//!
//! Calling `start_*`/`stop()` in the wrong state returns an error rather
//! than panicking. Each session gets fresh filter, window and hysteresis
//! state; the rolling window is owned by the session, so a stale worker
//! can never write into (or reset) its successor's window.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS. `AudioCapture` is therefore
//! created *inside* the capture thread and dropped there when the session
//! closes. A sync oneshot channel propagates open-device errors back to the
//! `start_capture()` caller.

pub mod ingest;
pub mod pipeline;

pub use ingest::IngestHandle;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    audio::AudioCapture,
    buffering::{create_chunk_ring, rolling::RollingAudioWindow, DEFAULT_RING_CHUNKS},
    config::DetectorConfig,
    detect::Detector,
    error::{Result, WhistleError},
    inference::{BoundedClassifier, Classifier, ClassifierHandle},
    ipc::events::{AnalysisEvent, DetectionEvent, EngineStatus, EngineStatusEvent},
};

/// Broadcast channel capacity: events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// How often the capture thread checks whether its session closed.
const CAPTURE_POLL: Duration = Duration::from_millis(20);

/// Configuration for `WhistleEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct EngineConfig {
    pub detector: DetectorConfig,
    /// Chunks the ingest ring can hold before dropping. Default: 512.
    pub ring_capacity: usize,
    /// Per-call classifier deadline used by [`WhistleEngine::with_classifier`].
    /// `None` calls the classifier inline without a deadline.
    pub classifier_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            ring_capacity: DEFAULT_RING_CHUNKS,
            classifier_timeout_ms: Some(500),
        }
    }
}

struct Session {
    /// Per-session flag: cleared on stop so stale ingest handles are refused.
    open: Arc<AtomicBool>,
    window: Arc<RollingAudioWindow>,
    worker: JoinHandle<()>,
    capture: Option<JoinHandle<()>>,
}

impl Session {
    /// Close the session and wait for its threads.
    fn close(self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(capture) = self.capture {
            join_quietly(capture, "capture");
        }
        join_quietly(self.worker, "pipeline");
    }
}

/// The top-level engine handle.
///
/// `WhistleEngine` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<WhistleEngine>` to share between a host and event-forwarding
/// tasks.
pub struct WhistleEngine {
    config: EngineConfig,
    classifier: Option<ClassifierHandle>,
    session: Mutex<Option<Session>>,
    /// Canonical status (written via Mutex, read from hosts).
    status: Arc<Mutex<EngineStatus>>,
    detection_tx: broadcast::Sender<DetectionEvent>,
    analysis_tx: broadcast::Sender<AnalysisEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    latest: Arc<Mutex<Option<AnalysisEvent>>>,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
}

impl WhistleEngine {
    /// Create a new engine. Does not start a session.
    ///
    /// With `classifier = None` every stage probability reads 0 and nothing
    /// is ever detected; the energy and frequency diagnostics still flow.
    pub fn new(config: EngineConfig, classifier: Option<ClassifierHandle>) -> Self {
        let (detection_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (analysis_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config,
            classifier,
            session: Mutex::new(None),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            detection_tx,
            analysis_tx,
            status_tx,
            latest: Arc::new(Mutex::new(None)),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
        }
    }

    /// Create an engine around `classifier`, wrapped in a
    /// [`BoundedClassifier`] when `config.classifier_timeout_ms` is set.
    ///
    /// # Errors
    /// Returns `WhistleError::Io` if the classifier thread cannot be spawned.
    pub fn with_classifier<C: Classifier>(config: EngineConfig, classifier: C) -> Result<Self> {
        let handle = match config.classifier_timeout_ms {
            Some(ms) => {
                let bounded = BoundedClassifier::spawn(classifier, Duration::from_millis(ms))?;
                ClassifierHandle::new(bounded)
            }
            None => ClassifierHandle::new(classifier),
        };
        Ok(Self::new(config, Some(handle)))
    }

    /// Warm up the classifier (load weights, run dummy inference).
    ///
    /// Call once at startup, before starting a session.
    pub fn warm_up(&self) -> Result<()> {
        let Some(classifier) = &self.classifier else {
            return Ok(());
        };
        self.set_status(EngineStatus::WarmingUp, None);
        info!(classifier = %classifier.name(), "warming up classifier");
        if let Err(e) = classifier.warm_up() {
            self.set_status(EngineStatus::Error, Some(e.to_string()));
            return Err(e);
        }
        self.set_status(EngineStatus::Idle, None);
        info!("classifier ready");
        Ok(())
    }

    /// Start a session fed by the caller through the returned handle.
    ///
    /// # Errors
    /// - `WhistleError::AlreadyRunning` if a session is active.
    /// - `WhistleError::InvalidConfig` if the detector config is unusable.
    pub fn start_with_ingest(&self) -> Result<IngestHandle> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(WhistleError::AlreadyRunning);
        }
        let (ingest, started) = self.spawn_worker()?;
        *session = Some(started);
        self.set_status(EngineStatus::Listening, None);
        info!("engine started — ingest mode");
        Ok(ingest)
    }

    /// Start a session fed by a cpal input device.
    ///
    /// Blocks until the device is confirmed open (or fails) and returns its
    /// sample rate.
    ///
    /// # Errors
    /// - `WhistleError::AlreadyRunning` if a session is active.
    /// - `WhistleError::NoDefaultInputDevice` / `AudioDevice` / `AudioStream`
    ///   on device error.
    pub fn start_capture(&self, preferred_input_device: Option<String>) -> Result<u32> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(WhistleError::AlreadyRunning);
        }
        let (ingest, mut started) = self.spawn_worker()?;

        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let capture_open = Arc::clone(&started.open);
        let capture = thread::Builder::new()
            .name("whistle-capture".into())
            .spawn(move || {
                // Opened and dropped on this thread: cpal::Stream is !Send.
                let capture =
                    match AudioCapture::open_with_preference(ingest, preferred_input_device.as_deref()) {
                        Ok(c) => {
                            let _ = open_tx.send(Ok(c.sample_rate));
                            c
                        }
                        Err(e) => {
                            let _ = open_tx.send(Err(e));
                            return;
                        }
                    };
                while capture_open.load(Ordering::Relaxed) {
                    thread::sleep(CAPTURE_POLL);
                }
                drop(capture);
            });

        let capture = match capture {
            Ok(handle) => handle,
            Err(e) => {
                started.close();
                return Err(e.into());
            }
        };

        match open_rx.recv() {
            Ok(Ok(rate)) => {
                started.capture = Some(capture);
                *session = Some(started);
                self.set_status(EngineStatus::Listening, None);
                info!(sample_rate = rate, "engine started — capturing");
                Ok(rate)
            }
            Ok(Err(e)) => {
                started.capture = Some(capture);
                started.close();
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent — capture thread panicked?
                started.capture = Some(capture);
                started.close();
                self.set_status(EngineStatus::Error, Some("capture failed to start".into()));
                Err(WhistleError::Other(anyhow::anyhow!(
                    "capture thread died unexpectedly"
                )))
            }
        }
    }

    /// Stop the active session, discarding queued audio.
    ///
    /// Returns once the worker (and capture thread, if any) has exited.
    /// The session lock is held until then, so a concurrent `start_*` waits
    /// for the old worker instead of overlapping it.
    ///
    /// # Errors
    /// - `WhistleError::NotRunning` if no session is active.
    pub fn stop(&self) -> Result<()> {
        let mut slot = self.session.lock();
        let Some(session) = slot.take() else {
            return Err(WhistleError::NotRunning);
        };
        info!("engine stop requested");
        session.close();
        self.set_status(EngineStatus::Stopped, None);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to confirmed detections (rising edges only).
    pub fn subscribe_detections(&self) -> broadcast::Receiver<DetectionEvent> {
        self.detection_tx.subscribe()
    }

    /// Subscribe to per-chunk diagnostics.
    pub fn subscribe_analysis(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.analysis_tx.subscribe()
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Most recent per-chunk diagnostics of the current session.
    pub fn latest_analysis(&self) -> Option<AnalysisEvent> {
        self.latest.lock().clone()
    }

    /// Copy of the newest `secs` of preprocessed mono audio.
    ///
    /// # Errors
    /// - `WhistleError::NotRunning` outside a session.
    /// - `WhistleError::WindowNotConfigured` before the first chunk arrived.
    /// - `WhistleError::InsufficientAudio` until enough audio is buffered.
    pub fn recent_audio(&self, secs: f32) -> Result<Vec<f32>> {
        let window = self
            .session
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.window))
            .ok_or(WhistleError::NotRunning)?;
        window.snapshot(f64::from(secs))
    }

    /// Snapshot of pipeline counters for observability.
    pub fn pipeline_diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    /// Spawn the pipeline worker of a new session (capture not yet attached).
    fn spawn_worker(&self) -> Result<(IngestHandle, Session)> {
        self.config.detector.validate()?;

        self.diagnostics.reset();
        *self.latest.lock() = None;

        let open = Arc::new(AtomicBool::new(true));
        let window = Arc::new(RollingAudioWindow::new());
        let (producer, consumer) = create_chunk_ring(self.config.ring_capacity);
        let detector = Detector::new(
            self.config.detector.clone(),
            self.classifier.clone(),
            Arc::clone(&window),
        );

        let ctx = pipeline::PipelineContext {
            detector,
            consumer,
            running: Arc::clone(&open),
            detection_tx: self.detection_tx.clone(),
            analysis_tx: self.analysis_tx.clone(),
            latest: Arc::clone(&self.latest),
            diagnostics: Arc::clone(&self.diagnostics),
        };
        let worker = thread::Builder::new()
            .name("whistle-pipeline".into())
            .spawn(move || pipeline::run(ctx))?;

        let ingest = IngestHandle::new(producer, Arc::clone(&open), Arc::clone(&self.diagnostics));
        let session = Session {
            open,
            window,
            worker,
            capture: None,
        };
        Ok((ingest, session))
    }

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl Drop for WhistleEngine {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.close();
        }
    }
}

fn join_quietly(handle: JoinHandle<()>, name: &str) {
    if handle.join().is_err() {
        warn!(thread = name, "worker thread panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::chunk::AudioChunk;
    use std::time::Instant;

    fn engine() -> WhistleEngine {
        WhistleEngine::new(EngineConfig::default(), None)
    }

    fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn lifecycle_errors_instead_of_panicking() {
        let engine = engine();
        assert!(matches!(engine.stop(), Err(WhistleError::NotRunning)));

        let _ingest = engine.start_with_ingest().expect("start");
        assert!(engine.is_running());
        assert_eq!(engine.status(), EngineStatus::Listening);
        assert!(matches!(
            engine.start_with_ingest(),
            Err(WhistleError::AlreadyRunning)
        ));

        engine.stop().expect("stop");
        assert!(!engine.is_running());
        assert_eq!(engine.status(), EngineStatus::Stopped);
        assert!(matches!(engine.stop(), Err(WhistleError::NotRunning)));
    }

    #[test]
    fn invalid_config_refuses_to_start() {
        let mut config = EngineConfig::default();
        config.detector.decimation = 0;
        let engine = WhistleEngine::new(config, None);
        assert!(matches!(
            engine.start_with_ingest(),
            Err(WhistleError::InvalidConfig(_))
        ));
        assert!(!engine.is_running());
    }

    #[test]
    fn stale_ingest_handle_is_refused_after_restart() {
        let engine = engine();
        let mut first = engine.start_with_ingest().expect("first session");
        engine.stop().expect("stop");
        let _second = engine.start_with_ingest().expect("second session");

        assert!(!first.is_open());
        assert!(matches!(
            first.ingest(AudioChunk::mono(vec![0.0; 160], 16_000)),
            Err(WhistleError::SessionClosed)
        ));
        engine.stop().expect("stop");
    }

    #[test]
    fn ingested_audio_reaches_window_and_analysis() {
        let engine = engine();
        let mut analysis = engine.subscribe_analysis();
        let mut ingest = engine.start_with_ingest().expect("start");

        for _ in 0..120 {
            ingest
                .ingest(AudioChunk::mono(vec![0.05; 160], 16_000))
                .expect("ingest");
        }
        assert!(wait_for(|| engine.pipeline_diagnostics_snapshot().chunks_processed == 120));

        assert!(analysis.try_recv().is_ok());
        assert_eq!(engine.latest_analysis().map(|e| e.seq), Some(119));
        let recent = engine.recent_audio(0.5).expect("recent audio");
        assert_eq!(recent.len(), 8_000);

        let snap = engine.pipeline_diagnostics_snapshot();
        assert_eq!(snap.chunks_in, 120);
        assert_eq!(snap.frames_in, 120 * 160);
        assert_eq!(snap.detections, 0);

        engine.stop().expect("stop");
        assert!(matches!(
            engine.recent_audio(0.5),
            Err(WhistleError::NotRunning)
        ));
    }

    fn fill(ingest: &mut IngestHandle, engine: &WhistleEngine, chunks: usize) {
        for _ in 0..chunks {
            ingest
                .ingest(AudioChunk::mono(vec![0.05; 160], 16_000))
                .expect("ingest");
        }
        assert!(wait_for(|| engine.pipeline_diagnostics_snapshot().chunks_processed == chunks));
    }

    #[test]
    fn restart_begins_with_an_empty_window() {
        let engine = engine();
        let mut first = engine.start_with_ingest().expect("first session");
        fill(&mut first, &engine, 120);
        assert!(engine.recent_audio(0.5).is_ok());
        engine.stop().expect("stop");

        let _second = engine.start_with_ingest().expect("second session");
        assert!(matches!(
            engine.recent_audio(0.5),
            Err(WhistleError::WindowNotConfigured)
        ));
        engine.stop().expect("stop");
    }

    #[test]
    fn concurrent_stop_cannot_wipe_the_next_session() {
        let engine = Arc::new(engine());
        let mut first = engine.start_with_ingest().expect("first session");
        fill(&mut first, &engine, 120);

        let stopper = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.stop())
        };
        let mut second = loop {
            match engine.start_with_ingest() {
                Ok(ingest) => break ingest,
                Err(WhistleError::AlreadyRunning) => thread::yield_now(),
                Err(e) => panic!("unexpected start error: {e}"),
            }
        };
        stopper.join().expect("stopper thread").expect("stop");

        fill(&mut second, &engine, 120);
        let recent = engine.recent_audio(0.5).expect("second session audio");
        assert_eq!(recent.len(), 8_000);
        assert_eq!(engine.pipeline_diagnostics_snapshot().chunks_in, 120);
        engine.stop().expect("stop");
    }

    #[test]
    fn status_changes_are_broadcast() {
        let engine = engine();
        let mut status = engine.subscribe_status();
        let _ingest = engine.start_with_ingest().expect("start");
        engine.stop().expect("stop");

        let seen: Vec<EngineStatus> = std::iter::from_fn(|| status.try_recv().ok())
            .map(|e| e.status)
            .collect();
        assert_eq!(seen, [EngineStatus::Listening, EngineStatus::Stopped]);
    }

    #[test]
    fn drop_closes_running_session() {
        let engine = engine();
        let ingest = engine.start_with_ingest().expect("start");
        drop(engine);
        assert!(!ingest.is_open());
    }
}
