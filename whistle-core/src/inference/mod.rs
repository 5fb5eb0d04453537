//! Event classifier abstraction.
//!
//! The pipeline treats the classifier as an opaque two-class scorer:
//! `score(fixed_length_normalized_vector) -> (non_event_logit, event_logit)`.
//! Everything needed to build that vector (resampling, padding, z-score) and
//! the softmax back to a probability lives on this side of the seam.
//!
//! `&mut self` on `score` expresses that backends may keep state (ONNX
//! session buffers, worker channels). All calls are serialised through
//! `ClassifierHandle`'s `parking_lot::Mutex`.

pub mod heuristic;
pub mod sample;
pub mod timeout;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;

pub use heuristic::SpectralPeakClassifier;
pub use sample::ClassificationSample;
pub use timeout::BoundedClassifier;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Contract for event classifier backends.
pub trait Classifier: Send + 'static {
    /// One-time preparation (load weights, dummy inference). Default: no-op.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Score one model-ready vector, returning `(non_event, event)` logits.
    ///
    /// # Errors
    /// Any error is treated by the caller as "probability 0" for this call.
    fn score(&mut self, input: &[f32]) -> Result<(f32, f32)>;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}

/// Thread-safe reference-counted handle to any `Classifier` implementor.
#[derive(Clone)]
pub struct ClassifierHandle(pub Arc<Mutex<dyn Classifier>>);

impl ClassifierHandle {
    /// Wrap any `Classifier` in a `ClassifierHandle`.
    pub fn new<C: Classifier>(classifier: C) -> Self {
        Self(Arc::new(Mutex::new(classifier)))
    }

    pub fn score(&self, input: &[f32]) -> Result<(f32, f32)> {
        self.0.lock().score(input)
    }

    pub fn warm_up(&self) -> Result<()> {
        self.0.lock().warm_up()
    }

    pub fn name(&self) -> String {
        self.0.lock().name().to_string()
    }
}

impl std::fmt::Debug for ClassifierHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierHandle").finish_non_exhaustive()
    }
}

/// Softmax over two logits, returning the event-class probability.
///
/// Non-finite logits collapse to probability 0.
pub fn event_probability((non_event, event): (f32, f32)) -> f32 {
    if !non_event.is_finite() || !event.is_finite() {
        return 0.0;
    }
    let max = non_event.max(event);
    let a = (non_event - max).exp();
    let b = (event - max).exp();
    b / (a + b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn softmax_of_equal_logits_is_half() {
        assert_abs_diff_eq!(event_probability((1.3, 1.3)), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn softmax_is_stable_for_large_logits() {
        let p = event_probability((0.0, 1_000.0));
        assert_abs_diff_eq!(p, 1.0, epsilon = 1e-6);
        let q = event_probability((1_000.0, 0.0));
        assert_abs_diff_eq!(q, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn softmax_matches_sigmoid_of_difference() {
        let p = event_probability((0.5, 2.0));
        let expected = 1.0 / (1.0 + (-1.5f32).exp());
        assert_abs_diff_eq!(p, expected, epsilon = 1e-6);
    }

    #[test]
    fn non_finite_logits_score_zero() {
        assert_eq!(event_probability((f32::NAN, 1.0)), 0.0);
        assert_eq!(event_probability((0.0, f32::INFINITY)), 0.0);
    }
}
