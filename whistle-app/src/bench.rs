//! `whistle-bench`: replay WAV fixtures through the detector and report
//! per-chunk processing latency and detection accuracy.
//!
//! Each `<name>.wav` may have a sidecar `<name>.txt` holding the expected
//! number of detections.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use serde::Serialize;
use whistle_app::{backend, settings, wav};
use whistle_core::buffering::chunk::AudioChunk;
use whistle_core::buffering::rolling::RollingAudioWindow;
use whistle_core::Detector;

#[derive(Debug)]
struct Args {
    fixtures_dir: PathBuf,
    iterations: usize,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
struct CaseResult {
    file: String,
    category: String,
    iteration: usize,
    audio_secs: f64,
    chunks: usize,
    p50_chunk_us: f64,
    p95_chunk_us: f64,
    max_chunk_us: f64,
    realtime_factor: f64,
    detections: usize,
    first_detection_ms: Option<u64>,
    expected_detections: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
struct CategorySummary {
    category: String,
    runs: usize,
    p50_chunk_us: f64,
    p95_chunk_us: f64,
    avg_realtime_factor: f64,
    miss_rate: f64,
    false_alarm_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
struct Summary {
    fixtures_dir: String,
    iterations: usize,
    total_runs: usize,
    total_files: usize,
    p50_chunk_us: f64,
    p95_chunk_us: f64,
    avg_realtime_factor: f64,
    miss_rate: f64,
    false_alarm_rate: f64,
    categories: Vec<CategorySummary>,
    cases: Vec<CaseResult>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("whistle=warn")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("benchmark failed: {e:#}");
        std::process::exit(1);
    }
}

fn parse_args() -> anyhow::Result<Args> {
    let mut fixtures_dir: Option<PathBuf> = None;
    let mut iterations: usize = 1;
    let mut output: Option<PathBuf> = None;
    let mut config: Option<PathBuf> = None;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--fixtures" => {
                fixtures_dir = Some(PathBuf::from(
                    it.next().context("missing value for --fixtures")?,
                ));
            }
            "--iterations" => {
                iterations = it
                    .next()
                    .context("missing value for --iterations")?
                    .parse::<usize>()
                    .context("invalid value for --iterations")?
                    .clamp(1, 10);
            }
            "--output" => {
                output = Some(PathBuf::from(it.next().context("missing value for --output")?));
            }
            "--config" => {
                config = Some(PathBuf::from(it.next().context("missing value for --config")?));
            }
            "--help" | "-h" => {
                println!(
                    "Usage: whistle-bench --fixtures <dir> [--iterations <n>] \
                     [--config <settings.json>] [--output <file.json>]"
                );
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    Ok(Args {
        fixtures_dir: fixtures_dir.unwrap_or_else(|| PathBuf::from("benchmarks/fixtures")),
        iterations,
        output,
        config,
    })
}

fn collect_wavs(dir: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_wavs(&path, out)?;
            continue;
        }
        let is_wav = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.eq_ignore_ascii_case("wav"));
        if is_wav {
            out.push(path);
        }
    }
    Ok(())
}

fn category_for(path: &Path) -> String {
    let joined = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("/");
    if joined.contains("whistle") {
        "whistle".into()
    } else if joined.contains("speech") || joined.contains("voice") {
        "speech".into()
    } else if joined.contains("noise") || joined.contains("crowd") {
        "noise".into()
    } else {
        "other".into()
    }
}

fn expected_detections_for(path: &Path) -> Option<usize> {
    std::fs::read_to_string(path.with_extension("txt"))
        .ok()
        .and_then(|v| v.trim().parse().ok())
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Fraction of runs with an expected count that found fewer / more detections.
fn error_rates(rows: &[&CaseResult]) -> (f64, f64) {
    let labelled: Vec<_> = rows
        .iter()
        .filter_map(|r| r.expected_detections.map(|e| (e, r.detections)))
        .collect();
    if labelled.is_empty() {
        return (0.0, 0.0);
    }
    let n = labelled.len() as f64;
    let misses = labelled.iter().filter(|(e, got)| got < e).count() as f64;
    let false_alarms = labelled.iter().filter(|(e, got)| got > e).count() as f64;
    (misses / n, false_alarms / n)
}

fn summarize(category: String, rows: &[&CaseResult]) -> CategorySummary {
    let (miss_rate, false_alarm_rate) = error_rates(rows);
    CategorySummary {
        category,
        runs: rows.len(),
        p50_chunk_us: percentile(&rows.iter().map(|r| r.p50_chunk_us).collect::<Vec<_>>(), 0.50),
        p95_chunk_us: percentile(&rows.iter().map(|r| r.p95_chunk_us).collect::<Vec<_>>(), 0.95),
        avg_realtime_factor: mean(rows.iter().map(|r| r.realtime_factor)),
        miss_rate,
        false_alarm_rate,
    }
}

fn run() -> anyhow::Result<()> {
    let args = parse_args()?;
    anyhow::ensure!(
        args.fixtures_dir.exists(),
        "fixtures directory not found: {}",
        args.fixtures_dir.display()
    );

    let mut wav_files = Vec::new();
    collect_wavs(&args.fixtures_dir, &mut wav_files)?;
    wav_files.sort();
    anyhow::ensure!(
        !wav_files.is_empty(),
        "no .wav fixtures found in {}",
        args.fixtures_dir.display()
    );

    let app_settings = settings::load_settings(
        &args
            .config
            .clone()
            .unwrap_or_else(settings::default_settings_path),
    );
    settings::apply_runtime_env_from_settings(&app_settings);
    let detector_config = app_settings.engine_config().detector;
    detector_config.validate()?;
    let classifier = backend::handle(&app_settings, &detector_config);
    classifier.warm_up()?;

    println!(
        "Running whistle benchmark on {} fixtures (iterations={}, classifier={})",
        wav_files.len(),
        args.iterations,
        classifier.name()
    );

    let mut cases = Vec::new();
    for path in &wav_files {
        let audio = wav::read_wav(path)?;
        let frames = (audio.sample_rate as usize / 100).max(1);
        let file = path
            .strip_prefix(&args.fixtures_dir)
            .unwrap_or(path)
            .display()
            .to_string();

        for iteration in 1..=args.iterations {
            let mut detector = Detector::new(
                detector_config.clone(),
                Some(classifier.clone()),
                Arc::new(RollingAudioWindow::new()),
            );
            let mut latencies_us = Vec::new();
            let mut detections = 0usize;
            let mut first_detection_ms = None;

            let run_started = Instant::now();
            for data in audio.blocks(frames) {
                let chunk = AudioChunk::from_interleaved(data, audio.channels, audio.sample_rate);
                let started = Instant::now();
                let report = detector.process(&chunk);
                latencies_us.push(started.elapsed().as_secs_f64() * 1e6);
                if let Some(report) = report.filter(|r| r.detected) {
                    detections += 1;
                    first_detection_ms.get_or_insert(report.at.as_millis() as u64);
                }
            }
            let wall = run_started.elapsed().as_secs_f64();

            let case = CaseResult {
                file: file.clone(),
                category: category_for(path),
                iteration,
                audio_secs: audio.duration_secs(),
                chunks: latencies_us.len(),
                p50_chunk_us: percentile(&latencies_us, 0.50),
                p95_chunk_us: percentile(&latencies_us, 0.95),
                max_chunk_us: latencies_us.iter().copied().fold(0.0, f64::max),
                realtime_factor: if wall > 0.0 { audio.duration_secs() / wall } else { 0.0 },
                detections,
                first_detection_ms,
                expected_detections: expected_detections_for(path),
            };
            println!(
                "{file} [{iteration}/{iters}] p95={p95:.0}us detections={detections}",
                iters = args.iterations,
                p95 = case.p95_chunk_us,
            );
            cases.push(case);
        }
    }

    let mut grouped: BTreeMap<String, Vec<&CaseResult>> = BTreeMap::new();
    for row in &cases {
        grouped.entry(row.category.clone()).or_default().push(row);
    }
    let categories = grouped
        .into_iter()
        .map(|(name, rows)| summarize(name, &rows))
        .collect();

    let all: Vec<&CaseResult> = cases.iter().collect();
    let (miss_rate, false_alarm_rate) = error_rates(&all);
    let summary = Summary {
        fixtures_dir: args.fixtures_dir.display().to_string(),
        iterations: args.iterations,
        total_runs: cases.len(),
        total_files: wav_files.len(),
        p50_chunk_us: percentile(&cases.iter().map(|r| r.p50_chunk_us).collect::<Vec<_>>(), 0.50),
        p95_chunk_us: percentile(&cases.iter().map(|r| r.p95_chunk_us).collect::<Vec<_>>(), 0.95),
        avg_realtime_factor: mean(cases.iter().map(|r| r.realtime_factor)),
        miss_rate,
        false_alarm_rate,
        categories,
        cases,
    };

    println!(
        "Done. runs={} p95={:.0}us realtime={:.0}x miss_rate={:.1}% false_alarms={:.1}%",
        summary.total_runs,
        summary.p95_chunk_us,
        summary.avg_realtime_factor,
        summary.miss_rate * 100.0,
        summary.false_alarm_rate * 100.0
    );

    let json = serde_json::to_string_pretty(&summary)?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&out, json)?;
        println!("Wrote benchmark report: {}", out.display());
    } else {
        println!("{json}");
    }

    Ok(())
}
