//! Model artifacts.
//!
//! Trained boosted-tree models arrive as ONNX files, optionally with a
//! `{stem}_scaler.json` standard-scaler sidecar. A handle is loaded once
//! at startup and shared read-only by every concurrent caller.

use crate::domain::errors::PredictionError;
use anyhow::{Context, Result};
use ort::session::{Session, builder::GraphOptimizationLevel};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

/// Interface every cascade tier predicts through.
pub trait InferenceModel: Send + Sync {
    /// Win probability in [0, 1] for an exact-width feature vector.
    fn predict(&self, features: &[f64]) -> Result<f64, PredictionError>;

    /// Input width the model was trained against.
    fn expected_features(&self) -> usize;

    /// Artifact identifier surfaced on prediction results.
    fn version(&self) -> &str;
}

/// Standard-scaler parameters exported by training.
#[derive(Debug, Clone, Deserialize)]
pub struct ScalerParams {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl ScalerParams {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scaler {:?}", path))?;
        let scaler: ScalerParams = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse scaler {:?}", path))?;
        if scaler.mean.len() != scaler.scale.len() {
            anyhow::bail!(
                "Scaler {:?} has {} means but {} scales",
                path,
                scaler.mean.len(),
                scaler.scale.len()
            );
        }
        Ok(scaler)
    }

    pub fn transform(&self, values: &mut [f32]) {
        for (i, v) in values.iter_mut().enumerate() {
            let mean = self.mean.get(i).copied().unwrap_or(0.0);
            let scale = self.scale.get(i).copied().unwrap_or(1.0);
            if scale.abs() > 1e-12 {
                *v = ((*v as f64 - mean) / scale) as f32;
            }
        }
    }
}

pub struct OnnxModel {
    session: Mutex<Session>,
    expected_features: usize,
    scaler: Option<ScalerParams>,
    version: String,
}

impl OnnxModel {
    /// Load an artifact and introspect its expected input width from the
    /// session's input tensor shape. A dynamic last dimension falls back
    /// to the scaler width, then to `fallback_width` (the schema width).
    pub fn load(model_path: &Path, fallback_width: usize) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .with_intra_threads(1)
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model {:?}", model_path))?;

        let version = model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("model")
            .to_string();

        let scaler = match Self::scaler_path(model_path) {
            Some(path) => Some(ScalerParams::load(&path)?),
            None => None,
        };

        let introspected = session.inputs().first().and_then(|input| match input.dtype() {
            ort::value::ValueType::Tensor { shape, .. } => shape.last().copied(),
            _ => None,
        });

        let expected_features = introspected
            .and_then(|d| usize::try_from(d).ok())
            .filter(|d| *d > 0)
            .or_else(|| scaler.as_ref().map(|s| s.mean.len()))
            .unwrap_or(fallback_width);

        info!(
            "Loaded model '{}' (expects {} features, scaler: {})",
            version,
            expected_features,
            scaler.is_some()
        );

        Ok(Self {
            session: Mutex::new(session),
            expected_features,
            scaler,
            version,
        })
    }

    fn scaler_path(model_path: &Path) -> Option<PathBuf> {
        let stem = model_path.file_stem()?.to_str()?;
        let candidate = model_path.with_file_name(format!("{}_scaler.json", stem));
        candidate.exists().then_some(candidate)
    }
}

impl InferenceModel for OnnxModel {
    fn predict(&self, features: &[f64]) -> Result<f64, PredictionError> {
        if features.len() != self.expected_features {
            return Err(PredictionError::FeatureMismatch {
                expected: self.expected_features,
                got: features.len(),
            });
        }

        let mut input: Vec<f32> = features.iter().map(|v| *v as f32).collect();
        if let Some(scaler) = &self.scaler {
            scaler.transform(&mut input);
        }

        let shape = vec![1usize, input.len()];
        let input_value = ort::value::Value::from_array((shape.as_slice(), input))
            .map_err(|e| PredictionError::Inference {
                reason: format!("input tensor creation failed: {}", e),
            })?;

        let mut session = self.session.lock().map_err(|e| PredictionError::Inference {
            reason: format!("session lock poisoned: {}", e),
        })?;

        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| PredictionError::Inference {
                reason: e.to_string(),
            })?;

        // Classifier artifacts emit an integer label tensor before the
        // probability tensor; take the first f32 output. A two-class
        // probability row is [loss, win].
        for (_, value) in outputs.iter() {
            if let Ok(data) = value.try_extract_tensor::<f32>() {
                let probs = data.1;
                let p = match probs.len() {
                    0 => continue,
                    1 => probs[0] as f64,
                    _ => probs[probs.len() - 1] as f64,
                };
                return Ok(p.clamp(0.0, 1.0));
            }
        }

        Err(PredictionError::Inference {
            reason: "no float output tensor in model outputs".to_string(),
        })
    }

    fn expected_features(&self) -> usize {
        self.expected_features
    }

    fn version(&self) -> &str {
        &self.version
    }
}
