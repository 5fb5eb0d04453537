//! Events broadcast by the engine to subscribers.
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `DetectionEvent` | `WhistleEngine::subscribe_detections` |
//! | `AnalysisEvent` | `WhistleEngine::subscribe_analysis` |
//! | `EngineStatusEvent` | `WhistleEngine::subscribe_status` |
//!
//! Field names serialise in camelCase so hosts can forward them as JSON
//! unchanged.

use serde::{Deserialize, Serialize};

use crate::detect::{DetectionPhase, DetectionReport, Rejection};

// ---------------------------------------------------------------------------
// Detection events
// ---------------------------------------------------------------------------

/// A confirmed whistle blast (rising edge only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    /// Monotonically increasing detection number within the session.
    pub seq: u64,
    /// Stream time of the confirming chunk (ms since session start).
    pub at_ms: u64,
    pub stage1_probability: f32,
    pub stage2_probability: f32,
    pub dominant_hz: f32,
    pub rms: f32,
}

impl DetectionEvent {
    pub fn from_report(seq: u64, report: &DetectionReport) -> Self {
        Self {
            seq,
            at_ms: report.at.as_millis() as u64,
            stage1_probability: report.stage1,
            stage2_probability: report.stage2,
            dominant_hz: report.dominant_hz,
            rms: report.rms,
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis events
// ---------------------------------------------------------------------------

/// Per-chunk diagnostics: energy, dominant frequency, latest stage scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisEvent {
    pub seq: u64,
    pub at_ms: u64,
    pub rms: f32,
    pub band_rms: f32,
    pub dominant_hz: f32,
    pub stage1_probability: f32,
    pub stage2_probability: f32,
    /// True when this chunk ran a classification tick.
    pub evaluated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
    pub detected: bool,
    pub phase: DetectionPhase,
}

impl AnalysisEvent {
    pub fn from_report(seq: u64, report: &DetectionReport) -> Self {
        Self {
            seq,
            at_ms: report.at.as_millis() as u64,
            rms: report.rms,
            band_rms: report.band_rms,
            dominant_hz: report.dominant_hz,
            stage1_probability: report.stage1,
            stage2_probability: report.stage2,
            evaluated: report.evaluated,
            rejection: report.rejection,
            detected: report.detected,
            phase: report.phase,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Created, `start_*` not yet called.
    Idle,
    /// Warming up the classifier.
    WarmingUp,
    /// Ingesting and analysing audio.
    Listening,
    /// Session ended; the engine may be restarted.
    Stopped,
    /// Unrecoverable error — restart required.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn report() -> DetectionReport {
        DetectionReport {
            at: Duration::from_millis(1_520),
            rms: 0.31,
            band_rms: 0.2,
            dominant_hz: 3_000.0,
            stage1: 0.97,
            stage2: 0.91,
            evaluated: true,
            rejection: None,
            stage2_ran: true,
            detected: true,
            phase: DetectionPhase::Confirmed,
            classifier_errors: 0,
        }
    }

    #[test]
    fn detection_event_serializes_with_camel_case() {
        let event = DetectionEvent::from_report(4, &report());
        let json = serde_json::to_value(&event).expect("serialize detection event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["atMs"], 1_520);
        let p = json["stage2Probability"]
            .as_f64()
            .expect("stage2 should serialize as number");
        assert!((p - 0.91).abs() < 1e-5);
        assert!(json.get("stage2_probability").is_none());

        let round_trip: DetectionEvent =
            serde_json::from_value(json).expect("deserialize detection event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn analysis_event_omits_absent_rejection() {
        let event = AnalysisEvent::from_report(9, &report());
        let json = serde_json::to_value(&event).expect("serialize analysis event");
        assert!(json.get("rejection").is_none());
        assert_eq!(json["phase"], "confirmed");
        assert_eq!(json["bandRms"].as_f64().map(|v| (v - 0.2).abs() < 1e-6), Some(true));

        let rejected = AnalysisEvent {
            rejection: Some(Rejection::OutOfBand),
            detected: false,
            ..event
        };
        let json = serde_json::to_value(&rejected).expect("serialize analysis event");
        assert_eq!(json["rejection"], "outOfBand");
    }

    #[test]
    fn engine_status_event_serializes_with_lowercase_status() {
        let event = EngineStatusEvent {
            status: EngineStatus::WarmingUp,
            detail: Some("loading model".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "warmingup");
        assert_eq!(json["detail"], "loading model");

        let round_trip: EngineStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, EngineStatus::WarmingUp);
    }

    #[test]
    fn engine_status_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<EngineStatus>(r#""Listening""#);
        assert!(err.is_err(), "expected invalid casing to fail");
    }
}
