//! ONNX Runtime backend for a two-class audio event model.
//!
//! ## Model I/O
//!
//! | Name     | Shape      | DType | Direction |
//! |----------|------------|-------|-----------|
//! | `input`  | `[1, N]`   | f32   | in        |
//! | `logits` | `[1, 2]`   | f32   | out       |
//!
//! `N` is `DetectorConfig::model_input_len`. Index 0 of the output is the
//! non-event class, index 1 the event class. Names are resolved leniently;
//! the first input/output is used when none of the usual names match.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use ort::session::builder::SessionBuilder;
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use tracing::{debug, info};

use crate::error::{Result, WhistleError};
use crate::inference::Classifier;

pub struct OnnxClassifier {
    session: Session,
    input_name: String,
    output_name: String,
    input_len: usize,
}

impl OnnxClassifier {
    /// Load the model at `path` expecting `input_len` samples per call.
    ///
    /// # Errors
    /// `ModelNotFound` if the file is missing, `OnnxSession` if ONNX Runtime
    /// rejects it.
    pub fn new(path: impl AsRef<Path>, input_len: usize) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(WhistleError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let session = SessionBuilder::new()
            .map_err(|e| WhistleError::OnnxSession(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| WhistleError::OnnxSession(e.to_string()))?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();

        let input_name = pick_name(&input_names, &["input", "audio", "waveform", "x"], "inputs")?;
        let output_name = pick_name(&output_names, &["logits", "output", "scores"], "outputs")?;

        info!(
            path = %path.display(),
            input = %input_name,
            output = %output_name,
            input_len,
            "onnx classifier loaded"
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            input_len,
        })
    }

    /// Default location of the classifier model file.
    pub fn default_model_path() -> PathBuf {
        default_models_dir().join("whistle_classifier.onnx")
    }
}

impl Classifier for OnnxClassifier {
    fn warm_up(&mut self) -> Result<()> {
        let zeros = vec![0.0f32; self.input_len];
        let logits = self.score(&zeros)?;
        debug!(?logits, "onnx classifier warm-up");
        Ok(())
    }

    fn score(&mut self, input: &[f32]) -> Result<(f32, f32)> {
        if input.len() != self.input_len {
            return Err(WhistleError::Classifier(format!(
                "expected {} samples, got {}",
                self.input_len,
                input.len()
            )));
        }

        let input_arr = Array2::<f32>::from_shape_vec((1, self.input_len), input.to_vec())
            .map_err(|e| WhistleError::OnnxSession(e.to_string()))?;
        let input_val = Value::from_array(input_arr)
            .map_err(|e: ort::Error| WhistleError::OnnxSession(e.to_string()))?;
        let input_values: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), input_val.into())];

        let outputs = self
            .session
            .run(input_values)
            .map_err(|e| WhistleError::OnnxSession(e.to_string()))?;
        let logits = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            WhistleError::Classifier(format!("model returned no `{}` output", self.output_name))
        })?;
        let (_, data) = logits
            .try_extract_tensor::<f32>()
            .map_err(|e| WhistleError::OnnxSession(e.to_string()))?;
        logit_pair(data)
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

/// Preferred name if present, else the first declared one.
fn pick_name(candidates: &[String], preferred: &[&str], kind: &str) -> Result<String> {
    resolve_name(candidates, preferred)
        .or_else(|| candidates.first().cloned())
        .ok_or_else(|| WhistleError::OnnxSession(format!("model has no {kind}")))
}

/// `(non_event, event)` from the head of a logits tensor.
fn logit_pair(data: &[f32]) -> Result<(f32, f32)> {
    match data {
        [non_event, event, ..] => Ok((*non_event, *event)),
        _ => Err(WhistleError::Classifier(format!(
            "expected 2 logits, got {}",
            data.len()
        ))),
    }
}

fn resolve_name(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

/// Per-user model directory, overridable with `WHISTLE_MODELS_DIR`.
pub fn default_models_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("WHISTLE_MODELS_DIR") {
        return PathBuf::from(dir);
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(|p| PathBuf::from(p).join("Lattice Labs").join("Whistle").join("models"))
            .unwrap_or_else(|| PathBuf::from("models"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("whistle")
            .join("models")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_reported() {
        let err = OnnxClassifier::new("/definitely/not/here.onnx", 16_000)
            .err()
            .expect("missing file must fail");
        assert!(matches!(err, WhistleError::ModelNotFound { .. }));
    }

    #[test]
    fn resolve_name_is_case_insensitive() {
        let names = vec!["Input".to_string(), "LOGITS".to_string()];
        assert_eq!(resolve_name(&names, &["input"]).as_deref(), Some("Input"));
        assert_eq!(resolve_name(&names, &["logits"]).as_deref(), Some("LOGITS"));
        assert_eq!(resolve_name(&names, &["missing"]), None);
    }

    #[test]
    fn model_without_outputs_is_an_error_not_a_panic() {
        let err = pick_name(&[], &["logits"], "outputs").expect_err("no outputs");
        assert!(matches!(err, WhistleError::OnnxSession(ref m) if m == "model has no outputs"));

        let names = vec!["probs".to_string()];
        assert_eq!(pick_name(&names, &["logits"], "outputs").expect("first"), "probs");
    }

    #[test]
    fn short_logit_tensor_is_a_classifier_error() {
        assert_eq!(logit_pair(&[0.1, 2.0, 9.0]).expect("pair"), (0.1, 2.0));
        assert!(matches!(logit_pair(&[1.0]), Err(WhistleError::Classifier(_))));
        assert!(matches!(logit_pair(&[]), Err(WhistleError::Classifier(_))));
    }

    #[test]
    fn default_model_path_has_expected_file_name() {
        let path = OnnxClassifier::default_model_path();
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("whistle_classifier.onnx")
        );
    }
}
