use chrono::{DateTime, Utc};
use kidguard_storage::ClassificationResult;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::features::{FeatureVector, FEATURE_LEN};

/// Artifact format tag understood by [`LogisticModel`]
pub const LOGISTIC_FORMAT: &str = "kidguard-logistic/v1";

/// Classifier failures
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The model artifact is missing or malformed; the classification path cannot start
    #[error("Failed to load classifier model from {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    /// A feature vector of the wrong length reached the classifier
    #[error("Feature vector has {actual} values, classifier expects {expected}")]
    Arity { expected: usize, actual: usize },

    #[error("Classifier produced a non-finite probability: {0}")]
    InvalidOutput(f32),
}

/// Opaque pre-trained binary classifier
///
/// `predict` returns the model's raw probability for the adult class and
/// must be a pure function of its input.
pub trait BinaryModel: Send + Sync {
    fn input_len(&self) -> usize;

    fn predict(&self, input: &[f32]) -> f32;
}

/// Logistic regression over the feature vector: `sigmoid(w . x + b)`
#[derive(Debug, Clone)]
pub struct LogisticModel {
    weights: Vec<f32>,
    bias: f32,
}

#[derive(Deserialize)]
struct LogisticArtifact {
    format: String,
    weights: Vec<f32>,
    bias: f32,
}

impl LogisticModel {
    #[must_use]
    pub fn new(weights: Vec<f32>, bias: f32) -> Self {
        Self { weights, bias }
    }

    /// Parse a JSON artifact
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::ModelLoad`] if the JSON is invalid, the
    /// format tag is unknown, or a parameter is not finite
    pub fn from_json(path: &Path, raw: &str) -> Result<Self, ClassifierError> {
        let load_err = |reason: String| ClassifierError::ModelLoad {
            path: path.to_path_buf(),
            reason,
        };

        let artifact: LogisticArtifact =
            serde_json::from_str(raw).map_err(|e| load_err(format!("invalid artifact: {e}")))?;

        if artifact.format != LOGISTIC_FORMAT {
            return Err(load_err(format!(
                "unsupported format '{}' (expected '{LOGISTIC_FORMAT}')",
                artifact.format
            )));
        }
        if !artifact.bias.is_finite() || artifact.weights.iter().any(|w| !w.is_finite()) {
            return Err(load_err(String::from("parameters must be finite")));
        }

        Ok(Self::new(artifact.weights, artifact.bias))
    }
}

impl BinaryModel for LogisticModel {
    fn input_len(&self) -> usize {
        self.weights.len()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn predict(&self, input: &[f32]) -> f32 {
        let z: f64 = self
            .weights
            .iter()
            .zip(input)
            .map(|(w, x)| f64::from(*w) * f64::from(*x))
            .sum::<f64>()
            + f64::from(self.bias);
        (1.0 / (1.0 + (-z).exp())) as f32
    }
}

/// Wraps the loaded model; pure apart from the one-time load
pub struct ClassifierAdapter {
    model: Box<dyn BinaryModel>,
}

impl ClassifierAdapter {
    /// Load the classifier artifact
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::ModelLoad`] if the file is missing,
    /// malformed, or built for a different feature length
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ClassifierError::ModelLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let model = LogisticModel::from_json(path, &raw)?;
        let adapter = Self::with_model(model).map_err(|e| ClassifierError::ModelLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        log::info!("Loaded classifier model from {}", path.display());
        Ok(adapter)
    }

    /// Wrap an already-built model
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::Arity`] if the model does not take
    /// [`FEATURE_LEN`] inputs
    pub fn with_model(model: impl BinaryModel + 'static) -> Result<Self, ClassifierError> {
        if model.input_len() != FEATURE_LEN {
            return Err(ClassifierError::Arity {
                expected: FEATURE_LEN,
                actual: model.input_len(),
            });
        }
        Ok(Self {
            model: Box::new(model),
        })
    }

    /// Classify a raw feature payload, stamped with the current time
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::Arity`] for a payload of the wrong length and
    /// [`ClassifierError::InvalidOutput`] if the model output is not finite
    pub fn classify(&self, values: &[f32]) -> Result<ClassificationResult, ClassifierError> {
        self.classify_at(values, Utc::now())
    }

    /// Classify with an explicit decision time
    ///
    /// # Errors
    ///
    /// See [`ClassifierAdapter::classify`]
    pub fn classify_at(
        &self,
        values: &[f32],
        decided_at: DateTime<Utc>,
    ) -> Result<ClassificationResult, ClassifierError> {
        if values.len() != FEATURE_LEN {
            log::error!(
                "Classifier contract violation: got {} features, expected {FEATURE_LEN}",
                values.len()
            );
            return Err(ClassifierError::Arity {
                expected: FEATURE_LEN,
                actual: values.len(),
            });
        }

        let probability = self.model.predict(values);
        if !probability.is_finite() {
            return Err(ClassifierError::InvalidOutput(probability));
        }

        let result = ClassificationResult::new(probability, decided_at);
        log::debug!(
            "Classified: probability={probability:.4} label={}",
            result.label()
        );
        Ok(result)
    }

    /// Classify a well-formed feature vector
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::InvalidOutput`] if the model output is not finite
    pub fn classify_vector(
        &self,
        vector: &FeatureVector,
    ) -> Result<ClassificationResult, ClassifierError> {
        self.classify(vector.as_slice())
    }
}
