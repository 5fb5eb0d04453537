//! Time-bounded rolling window of recent mono audio.
//!
//! ## Sizing
//!
//! ```text
//! slot_secs        = frame_len / sample_rate        (one ingestion chunk)
//! classify_secs    = slot_secs × decimation         (one window slot)
//! capacity (slots) = max(ceil(target_secs / classify_secs), min_slots)
//! ```
//!
//! The geometry is derived once per session from the first observed chunk and
//! installed with [`RollingAudioWindow::configure`]. Each slot holds every
//! sample received during one classification interval, so the window stays
//! gap-free and always spans at least `target_secs`.
//!
//! Push (worker) and snapshot (worker Stage 2, external readers) share one
//! `parking_lot::Mutex`; snapshots copy out under the lock and never compute.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Result, WhistleError};

/// Immutable sizing of a rolling window for one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowGeometry {
    /// Sample rate of the mono samples stored in each slot (Hz).
    pub sample_rate: u32,
    /// Duration of the chunk the geometry was derived from (seconds).
    pub chunk_secs: f64,
    /// Audio time covered by one slot (seconds).
    pub slot_secs: f64,
    /// Maximum number of slots retained.
    pub capacity: usize,
}

impl WindowGeometry {
    /// Derive the slot capacity from the observed chunk cadence.
    ///
    /// Degenerate inputs (zero duration, zero decimation) fall back to
    /// `min_slots` with a one-chunk slot rather than dividing by zero.
    pub fn derive(
        sample_rate: u32,
        observed_chunk_secs: f64,
        decimation: u32,
        target_secs: f64,
        min_slots: usize,
    ) -> Self {
        let decimation = decimation.max(1);
        let slot_secs = observed_chunk_secs.max(0.0) * decimation as f64;
        let floor = min_slots.max(1);
        let capacity = if slot_secs > 0.0 && target_secs.is_finite() && target_secs > 0.0 {
            let calls_per_sec = 1.0 / slot_secs;
            tolerant_ceil(target_secs * calls_per_sec).max(floor)
        } else {
            floor
        };
        Self {
            sample_rate,
            chunk_secs: observed_chunk_secs.max(0.0),
            slot_secs,
            capacity,
        }
    }

    /// Slots needed to cover `duration_secs` of audio.
    pub fn slots_for(&self, duration_secs: f64) -> usize {
        if self.slot_secs <= 0.0 {
            return usize::MAX;
        }
        tolerant_ceil(duration_secs / self.slot_secs).max(1)
    }

    /// True when `chunk_secs` deviates from the geometry's cadence by more
    /// than `tolerance` (relative).
    pub fn cadence_differs(&self, chunk_secs: f64, tolerance: f64) -> bool {
        if self.chunk_secs <= 0.0 {
            return chunk_secs > 0.0;
        }
        ((chunk_secs - self.chunk_secs) / self.chunk_secs).abs() > tolerance
    }
}

/// `ceil` that snaps ratios within 1 ppm of an integer to that integer.
///
/// Durations arrive as widened `f32` (0.2f32 is 0.2000000029 as `f64`), so
/// 0.2 / 0.04 lands just above 5 and a plain `ceil` would ask for 6.
fn tolerant_ceil(x: f64) -> usize {
    if !x.is_finite() || x <= 0.0 {
        return 0;
    }
    let nearest = x.round();
    if (x - nearest).abs() <= 1e-6 * nearest.max(1.0) {
        nearest as usize
    } else {
        x.ceil() as usize
    }
}

#[derive(Debug, Default)]
struct WindowState {
    geometry: Option<WindowGeometry>,
    slots: VecDeque<Vec<f32>>,
}

/// Thread-safe FIFO of mono slots bounded by a time-derived capacity.
#[derive(Debug, Default)]
pub struct RollingAudioWindow {
    state: Mutex<WindowState>,
}

impl RollingAudioWindow {
    /// An unconfigured window; pushes are ignored until [`configure`] runs.
    ///
    /// [`configure`]: RollingAudioWindow::configure
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `geometry` and return its capacity.
    ///
    /// Re-configuring with a different geometry clears stored slots: slots
    /// recorded at another cadence would misstate their duration.
    pub fn configure(&self, geometry: WindowGeometry) -> usize {
        let mut state = self.state.lock();
        if state.geometry != Some(geometry) {
            if state.geometry.is_some() {
                info!(
                    capacity = geometry.capacity,
                    slot_secs = geometry.slot_secs,
                    "rolling window re-derived; clearing slots"
                );
            } else {
                info!(
                    capacity = geometry.capacity,
                    slot_secs = geometry.slot_secs,
                    sample_rate = geometry.sample_rate,
                    "rolling window configured"
                );
            }
            state.slots.clear();
            state.geometry = Some(geometry);
        }
        geometry.capacity
    }

    pub fn geometry(&self) -> Option<WindowGeometry> {
        self.state.lock().geometry
    }

    /// Append one slot, evicting the oldest when over capacity.
    pub fn push(&self, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        let Some(geometry) = state.geometry else {
            debug!(len = samples.len(), "push before configure — slot dropped");
            return;
        };
        state.slots.push_back(samples);
        while state.slots.len() > geometry.capacity {
            state.slots.pop_front();
        }
    }

    /// Newest `duration_secs` of audio, concatenated oldest → newest.
    ///
    /// # Errors
    /// - `WhistleError::WindowNotConfigured` before [`configure`].
    /// - `WhistleError::InsufficientAudio` while fewer slots than required exist.
    ///
    /// [`configure`]: RollingAudioWindow::configure
    pub fn snapshot(&self, duration_secs: f64) -> Result<Vec<f32>> {
        let state = self.state.lock();
        let geometry = state.geometry.ok_or(WhistleError::WindowNotConfigured)?;
        let required = geometry.slots_for(duration_secs);
        let available = state.slots.len();
        if required > available {
            return Err(WhistleError::InsufficientAudio {
                required,
                available,
            });
        }

        let total: usize = state.slots.iter().skip(available - required).map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for slot in state.slots.iter().skip(available - required) {
            out.extend_from_slice(slot);
        }
        drop(state);

        let wanted = (duration_secs * geometry.sample_rate as f64).round() as usize;
        if wanted > 0 && out.len() > wanted {
            out.drain(..out.len() - wanted);
        }
        Ok(out)
    }

    pub fn slot_count(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.state.lock().geometry.map(|g| g.capacity)
    }

    /// Drop all slots and the geometry (session end).
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.slots.clear();
        state.geometry = None;
    }
}
