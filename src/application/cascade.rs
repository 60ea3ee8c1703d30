//! Model selection.
//!
//! Models are registered at four tiers of specificity. A prediction uses
//! the most specific tier that has a model for the order, so a dedicated
//! `SPX_butterfly` artifact always wins over a generic default.

use crate::application::model::{InferenceModel, OnnxModel};
use crate::domain::errors::PredictionError;
use crate::domain::types::Strategy;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Exact,
    Symbol,
    Strategy,
    Default,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Exact => "exact",
            ModelTier::Symbol => "symbol",
            ModelTier::Strategy => "strategy",
            ModelTier::Default => "default",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CascadeOutput {
    pub probability: f64,
    pub model_version: String,
    pub tier: ModelTier,
    pub features_used: usize,
}

#[derive(Default)]
pub struct ModelCascade {
    exact: HashMap<(String, Strategy), Arc<dyn InferenceModel>>,
    by_symbol: HashMap<String, Arc<dyn InferenceModel>>,
    by_strategy: HashMap<Strategy, Arc<dyn InferenceModel>>,
    default_model: Option<Arc<dyn InferenceModel>>,
}

impl ModelCascade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan a directory for `{SYMBOL}_{strategy}.onnx`, `{SYMBOL}.onnx`,
    /// `{strategy}.onnx` and `default.onnx` artifacts. Scaler sidecars are
    /// picked up by the model loader, not registered here.
    pub fn load_dir(dir: &Path, fallback_width: usize) -> Result<Self> {
        let mut cascade = Self::new();

        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read model directory {:?}", dir))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("onnx") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let model = Arc::new(OnnxModel::load(&path, fallback_width)?);
            cascade.register_stem(stem, model);
        }

        if cascade.is_empty() {
            warn!("No model artifacts found in {:?}", dir);
        }
        Ok(cascade)
    }

    fn register_stem(&mut self, stem: &str, model: Arc<dyn InferenceModel>) {
        if stem.eq_ignore_ascii_case("default") {
            self.register_default(model);
            return;
        }
        if let Ok(strategy) = stem.parse::<Strategy>() {
            self.register_strategy(strategy, model);
            return;
        }
        if let Some((symbol, strategy_part)) = stem.split_once('_') {
            if let Ok(strategy) = strategy_part.parse::<Strategy>() {
                self.register_exact(symbol, strategy, model);
                return;
            }
        }
        // Anything else is a plain symbol artifact ("SPX.onnx").
        self.register_symbol(stem, model);
    }

    pub fn register_exact(
        &mut self,
        symbol: &str,
        strategy: Strategy,
        model: Arc<dyn InferenceModel>,
    ) {
        info!("Registered exact model {}_{}", symbol.to_uppercase(), strategy);
        self.exact
            .insert((symbol.to_uppercase(), strategy), model);
    }

    pub fn register_symbol(&mut self, symbol: &str, model: Arc<dyn InferenceModel>) {
        info!("Registered symbol model {}", symbol.to_uppercase());
        self.by_symbol.insert(symbol.to_uppercase(), model);
    }

    pub fn register_strategy(&mut self, strategy: Strategy, model: Arc<dyn InferenceModel>) {
        info!("Registered strategy model {}", strategy);
        self.by_strategy.insert(strategy, model);
    }

    pub fn register_default(&mut self, model: Arc<dyn InferenceModel>) {
        info!("Registered default model");
        self.default_model = Some(model);
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
            && self.by_symbol.is_empty()
            && self.by_strategy.is_empty()
            && self.default_model.is_none()
    }

    /// Registered artifact names, most specific tier first.
    pub fn inventory(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (symbol, strategy) in self.exact.keys() {
            names.push(format!("{}_{}", symbol, strategy));
        }
        names.extend(self.by_symbol.keys().cloned());
        names.extend(self.by_strategy.keys().map(|s| s.to_string()));
        if self.default_model.is_some() {
            names.push("default".to_string());
        }
        names
    }

    fn select(
        &self,
        symbol: &str,
        strategy: Strategy,
    ) -> Option<(&Arc<dyn InferenceModel>, ModelTier)> {
        let symbol = symbol.to_uppercase();
        if let Some(model) = self.exact.get(&(symbol.clone(), strategy)) {
            return Some((model, ModelTier::Exact));
        }
        if let Some(model) = self.by_symbol.get(&symbol) {
            return Some((model, ModelTier::Symbol));
        }
        if let Some(model) = self.by_strategy.get(&strategy) {
            return Some((model, ModelTier::Strategy));
        }
        self.default_model
            .as_ref()
            .map(|model| (model, ModelTier::Default))
    }

    /// Select the most specific model and run inference.
    ///
    /// A vector wider than the model expects is truncated to the model's
    /// width: schema evolution appends new features at the end, so an
    /// older model's input is a strict prefix of the current vector. A
    /// narrower vector cannot be repaired and fails.
    pub fn predict(
        &self,
        symbol: &str,
        strategy: Strategy,
        features: &[f64],
    ) -> Result<CascadeOutput, PredictionError> {
        let (model, tier) =
            self.select(symbol, strategy)
                .ok_or_else(|| PredictionError::NoModelAvailable {
                    symbol: symbol.to_uppercase(),
                    strategy: strategy.to_string(),
                })?;

        let expected = model.expected_features();
        let input = if features.len() > expected {
            warn!(
                "Truncating feature vector from {} to {} for model '{}'",
                features.len(),
                expected,
                model.version()
            );
            &features[..expected]
        } else if features.len() < expected {
            return Err(PredictionError::FeatureMismatch {
                expected,
                got: features.len(),
            });
        } else {
            features
        };

        let probability = model.predict(input)?.clamp(0.0, 1.0);

        Ok(CascadeOutput {
            probability,
            model_version: model.version().to_string(),
            tier,
            features_used: input.len(),
        })
    }
}
