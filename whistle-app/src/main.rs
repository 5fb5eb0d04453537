//! `whistle` host binary: live capture or WAV replay, detections as JSON lines.
//!
//! ```text
//! whistle [--config <settings.json>] [--device <name>] [--analysis]
//! whistle --wav <file.wav> [--realtime]
//! whistle --list-devices
//! whistle [--config <settings.json>] [--device <name>] --save-config
//! ```
//!
//! Logs go to stderr (`RUST_LOG`, default `whistle=info`); stdout carries
//! only JSON events so it can be piped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{info, warn};
use whistle_app::backend;
use whistle_app::settings::{
    apply_runtime_env_from_settings, default_settings_path, load_settings, save_settings,
};
use whistle_app::wav;
use whistle_core::{
    audio::device::list_input_devices, AnalysisEvent, DetectionEvent, IngestHandle,
    WhistleEngine,
};

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    wav: Option<PathBuf>,
    device: Option<String>,
    realtime: bool,
    analysis: bool,
    list_devices: bool,
    save_config: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                let v = it.next().context("missing value for --config")?;
                args.config = Some(PathBuf::from(v));
            }
            "--wav" => {
                let v = it.next().context("missing value for --wav")?;
                args.wav = Some(PathBuf::from(v));
            }
            "--device" => {
                args.device = Some(it.next().context("missing value for --device")?);
            }
            "--realtime" => args.realtime = true,
            "--analysis" => args.analysis = true,
            "--list-devices" => args.list_devices = true,
            "--save-config" => args.save_config = true,
            "--help" | "-h" => {
                println!(
                    "Usage: whistle [--config <file.json>] [--device <name>] [--analysis]\n\
                     \x20      whistle --wav <file.wav> [--realtime] [--analysis]\n\
                     \x20      whistle --list-devices\n\
                     \x20      whistle [--config <file.json>] [--device <name>] --save-config"
                );
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("whistle=info")),
        )
        .init();

    let args = parse_args()?;

    if args.list_devices {
        for device in list_input_devices() {
            println!("{}", serde_json::to_string(&device)?);
        }
        return Ok(());
    }

    let settings_path = args.config.clone().unwrap_or_else(default_settings_path);
    let mut app_settings = load_settings(&settings_path);
    apply_runtime_env_from_settings(&app_settings);
    if args.device.is_some() {
        app_settings.preferred_input_device = args.device.clone();
    }
    app_settings.print_analysis |= args.analysis;

    if args.save_config {
        save_settings(&settings_path, &app_settings)
            .with_context(|| format!("writing {}", settings_path.display()))?;
        info!(settings_path = ?settings_path, "settings saved");
        return Ok(());
    }

    let config = app_settings.engine_config();
    info!(
        settings_path = ?settings_path,
        detection_profile = %app_settings.detection_profile,
        classifier = %app_settings.classifier,
        stage1_threshold = config.detector.stage1_threshold,
        stage2_threshold = config.detector.stage2_threshold,
        required_confirmations = config.detector.required_confirmations,
        cooldown_secs = config.detector.cooldown_secs,
        "runtime settings loaded"
    );

    // ── Engine setup ──────────────────────────────────────────────────────
    let engine = Arc::new(backend::engine(&app_settings, config)?);
    if let Err(e) = engine.warm_up() {
        tracing::error!("classifier warm-up failed: {e}");
    }

    let analysis_rx = app_settings
        .print_analysis
        .then(|| engine.subscribe_analysis());

    match args.wav {
        Some(path) => replay_wav(engine, path, args.realtime, analysis_rx).await,
        None => listen(engine, app_settings.preferred_input_device, analysis_rx).await,
    }
}

/// Live capture until Ctrl+C.
async fn listen(
    engine: Arc<WhistleEngine>,
    device: Option<String>,
    mut analysis_rx: Option<broadcast::Receiver<AnalysisEvent>>,
) -> anyhow::Result<()> {
    let mut detections = engine.subscribe_detections();
    let starter = Arc::clone(&engine);
    let sample_rate = tokio::task::spawn_blocking(move || starter.start_capture(device)).await??;
    info!(sample_rate, "listening — Ctrl+C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            res = detections.recv() => emit_detection(res),
            res = recv_analysis(&mut analysis_rx) => emit_analysis(res),
            _ = &mut ctrl_c => break,
        }
    }

    tokio::task::spawn_blocking(move || engine.stop()).await??;
    Ok(())
}

/// Push a WAV file through the ingest path, then stop once it is analysed.
async fn replay_wav(
    engine: Arc<WhistleEngine>,
    path: PathBuf,
    realtime: bool,
    mut analysis_rx: Option<broadcast::Receiver<AnalysisEvent>>,
) -> anyhow::Result<()> {
    let audio = wav::read_wav(&path)?;
    info!(
        file = %path.display(),
        sample_rate = audio.sample_rate,
        channels = audio.channels,
        duration_secs = audio.duration_secs(),
        realtime,
        "replaying"
    );

    let mut detections = engine.subscribe_detections();
    let mut ingest = engine.start_with_ingest()?;
    let feeder = tokio::task::spawn_blocking(move || feed(&mut ingest, &audio, realtime));
    tokio::pin!(feeder);

    let pushed = loop {
        tokio::select! {
            res = &mut feeder => break res??,
            res = detections.recv() => emit_detection(res),
            res = recv_analysis(&mut analysis_rx) => emit_analysis(res),
        }
    };

    // The worker may still be behind the feeder.
    while engine.pipeline_diagnostics_snapshot().chunks_processed < pushed {
        drain(&mut detections, &mut analysis_rx);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    drain(&mut detections, &mut analysis_rx);

    let stopper = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || stopper.stop()).await??;
    let snap = engine.pipeline_diagnostics_snapshot();
    info!(
        chunks = snap.chunks_processed,
        ticks = snap.classification_ticks,
        detections = snap.detections,
        "replay finished"
    );
    Ok(())
}

/// 10 ms blocks, as a sound card would deliver them. Returns chunks pushed.
fn feed(ingest: &mut IngestHandle, audio: &wav::WavAudio, realtime: bool) -> anyhow::Result<usize> {
    let frames = (audio.sample_rate as usize / 100).max(1);
    let block = Duration::from_secs_f64(frames as f64 / audio.sample_rate.max(1) as f64);
    let started = Instant::now();
    let mut pushed = 0usize;

    for data in audio.blocks(frames) {
        if realtime {
            let due = started + block * pushed as u32;
            if let Some(wait) = due.checked_duration_since(Instant::now()) {
                std::thread::sleep(wait);
            }
        } else {
            while ingest.vacant() == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        match ingest.ingest_interleaved(data, audio.channels, audio.sample_rate) {
            Ok(()) => pushed += 1,
            Err(whistle_core::WhistleError::ChunkRingFull) => {
                warn!("chunk ring full during real-time replay, chunk dropped")
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(pushed)
}

async fn recv_analysis(
    rx: &mut Option<broadcast::Receiver<AnalysisEvent>>,
) -> Result<AnalysisEvent, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn drain(
    detections: &mut broadcast::Receiver<DetectionEvent>,
    analysis: &mut Option<broadcast::Receiver<AnalysisEvent>>,
) {
    loop {
        match detections.try_recv() {
            Ok(event) => emit_detection(Ok(event)),
            Err(TryRecvError::Lagged(n)) => warn!(skipped = n, "detection output lagged"),
            Err(_) => break,
        }
    }
    if let Some(rx) = analysis {
        while let Ok(event) = rx.try_recv() {
            emit_analysis(Ok(event));
        }
    }
}

fn emit_detection(res: Result<DetectionEvent, RecvError>) {
    match res {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("failed to encode detection: {e}"),
        },
        Err(RecvError::Lagged(n)) => warn!(skipped = n, "detection output lagged"),
        Err(RecvError::Closed) => {}
    }
}

fn emit_analysis(res: Result<AnalysisEvent, RecvError>) {
    match res {
        // Per-chunk diagnostics between ticks carry no new probabilities.
        Ok(event) if event.evaluated => {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{line}");
            }
        }
        Ok(_) | Err(RecvError::Lagged(_)) | Err(RecvError::Closed) => {}
    }
}
