//! Confirmation hysteresis and post-detection cooldown.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Where the state machine currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectionPhase {
    Idle,
    /// At least one Stage 2 pass, not yet enough to confirm.
    Suspect,
    /// The observation that just emitted a detection.
    Confirmed,
    Cooldown,
}

/// `idle → suspect → confirmed → cooldown → idle` over the Stage 2 stream.
///
/// Timestamps are stream time supplied by the caller.
#[derive(Debug, Clone)]
pub struct DetectionStateMachine {
    threshold: f32,
    required: u32,
    cooldown: Duration,
    consecutive_confirmations: u32,
    last_confirmed_at: Option<Duration>,
    phase: DetectionPhase,
}

impl DetectionStateMachine {
    pub fn new(threshold: f32, required_confirmations: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            required: required_confirmations.max(1),
            cooldown,
            consecutive_confirmations: 0,
            last_confirmed_at: None,
            phase: DetectionPhase::Idle,
        }
    }

    /// True while `now` lies within `cooldown` of the last confirmation.
    pub fn in_cooldown(&self, now: Duration) -> bool {
        match self.last_confirmed_at {
            Some(at) => now.saturating_sub(at) < self.cooldown,
            None => false,
        }
    }

    /// Feed one Stage 2 probability; returns `true` exactly when this
    /// observation confirms an event.
    pub fn observe(&mut self, stage2: f32, now: Duration) -> bool {
        if self.in_cooldown(now) {
            self.consecutive_confirmations = 0;
            self.phase = DetectionPhase::Cooldown;
            return false;
        }

        if stage2 > self.threshold {
            self.consecutive_confirmations += 1;
        } else {
            self.consecutive_confirmations = 0;
        }

        if self.consecutive_confirmations >= self.required {
            info!(
                stage2,
                at_ms = now.as_millis() as u64,
                confirmations = self.consecutive_confirmations,
                "event confirmed"
            );
            self.consecutive_confirmations = 0;
            self.last_confirmed_at = Some(now);
            self.phase = DetectionPhase::Confirmed;
            return true;
        }

        let next = if self.consecutive_confirmations > 0 {
            DetectionPhase::Suspect
        } else {
            DetectionPhase::Idle
        };
        if next != self.phase {
            debug!(from = ?self.phase, to = ?next, stage2, "detection phase");
        }
        self.phase = next;
        false
    }

    pub fn phase(&self) -> DetectionPhase {
        self.phase
    }

    pub fn consecutive_confirmations(&self) -> u32 {
        self.consecutive_confirmations
    }

    pub fn last_confirmed_at(&self) -> Option<Duration> {
        self.last_confirmed_at
    }

    pub fn reset(&mut self) {
        self.consecutive_confirmations = 0;
        self.last_confirmed_at = None;
        self.phase = DetectionPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn three_confirmations_required() {
        let mut sm = DetectionStateMachine::new(0.8, 3, ms(5_000));
        assert!(!sm.observe(0.9, ms(0)));
        assert_eq!(sm.phase(), DetectionPhase::Suspect);
        assert!(!sm.observe(0.9, ms(40)));
        assert!(sm.observe(0.9, ms(80)));
        assert_eq!(sm.phase(), DetectionPhase::Confirmed);
        assert_eq!(sm.last_confirmed_at(), Some(ms(80)));
    }

    #[test]
    fn dip_resets_the_streak() {
        let mut sm = DetectionStateMachine::new(0.8, 3, ms(5_000));
        sm.observe(0.9, ms(0));
        sm.observe(0.9, ms(40));
        assert!(!sm.observe(0.5, ms(80)));
        assert_eq!(sm.phase(), DetectionPhase::Idle);
        assert!(!sm.observe(0.9, ms(120)));
        assert!(!sm.observe(0.9, ms(160)));
        assert!(sm.observe(0.9, ms(200)));
    }

    #[test]
    fn threshold_is_strict() {
        let mut sm = DetectionStateMachine::new(0.8, 1, ms(0));
        assert!(!sm.observe(0.8, ms(0)));
        assert!(sm.observe(0.8001, ms(10)));
    }

    #[test]
    fn cooldown_suppresses_then_expires() {
        let mut sm = DetectionStateMachine::new(0.8, 1, ms(1_000));
        assert!(sm.observe(0.95, ms(100)));
        assert!(sm.in_cooldown(ms(500)));
        assert!(!sm.observe(0.99, ms(500)));
        assert_eq!(sm.phase(), DetectionPhase::Cooldown);
        assert!(!sm.observe(0.99, ms(1_099)));

        assert!(!sm.in_cooldown(ms(1_100)));
        assert!(sm.observe(0.99, ms(1_100)));
    }

    #[test]
    fn passes_during_cooldown_do_not_carry_over() {
        let mut sm = DetectionStateMachine::new(0.8, 2, ms(1_000));
        sm.observe(0.9, ms(0));
        assert!(sm.observe(0.9, ms(10)));
        sm.observe(0.9, ms(500));
        sm.observe(0.9, ms(900));
        assert!(!sm.observe(0.9, ms(1_010)), "streak restarts after cooldown");
        assert!(sm.observe(0.9, ms(1_050)));
    }

    #[test]
    fn reset_clears_cooldown() {
        let mut sm = DetectionStateMachine::new(0.8, 1, ms(10_000));
        assert!(sm.observe(0.9, ms(0)));
        sm.reset();
        assert!(!sm.in_cooldown(ms(1)));
        assert_eq!(sm.phase(), DetectionPhase::Idle);
        assert!(sm.observe(0.9, ms(1)));
    }
}
