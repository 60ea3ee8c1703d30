use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Ordered feature-name list persisted by training.
/// This is the binding contract between a trained model artifact and the
/// feature builder: any change to the order or count requires retraining.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureSchema {
    pub n_features: usize,
    pub feature_names: Vec<String>,
}

impl FeatureSchema {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read feature schema {:?}", path))?;
        let schema: FeatureSchema = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse feature schema {:?}", path))?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn from_names(names: Vec<String>) -> Self {
        Self {
            n_features: names.len(),
            feature_names: names,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.n_features != self.feature_names.len() {
            anyhow::bail!(
                "Schema declares n_features={} but lists {} names",
                self.n_features,
                self.feature_names.len()
            );
        }
        let mut seen = std::collections::HashSet::new();
        for name in &self.feature_names {
            if !seen.insert(name.as_str()) {
                anyhow::bail!("Duplicate feature name in schema: {}", name);
            }
        }
        Ok(())
    }

    /// Symbols the trained model knows about, recovered from the
    /// `{sym}_close` naming convention of the per-symbol feature block.
    pub fn tracked_symbols(&self) -> Vec<String> {
        let mut symbols = Vec::new();
        for name in &self.feature_names {
            if let Some(prefix) = name.strip_suffix("_close") {
                if prefix != "vix" && !prefix.is_empty() {
                    symbols.push(prefix.to_uppercase());
                }
            }
        }
        symbols
    }
}

/// Feature values keyed by name. Stays a named map until the final
/// projection so a reordered or partial computation cannot silently
/// produce a misaligned vector.
#[derive(Debug, Clone, Default)]
pub struct NamedFeatures {
    values: HashMap<String, f64>,
}

impl NamedFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value. Non-finite values are stored as 0.0 so a single
    /// bad upstream number cannot poison the vector.
    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        let value = if value.is_finite() { value } else { 0.0 };
        self.values.insert(name.into(), value);
    }

    pub fn set_flag(&mut self, name: impl Into<String>, on: bool) {
        self.set(name, if on { 1.0 } else { 0.0 });
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Project onto the schema order. Names the builder could not compute
    /// become 0.0; computed names absent from the schema are dropped.
    pub fn project(&self, schema: &FeatureSchema) -> Vec<f64> {
        schema
            .feature_names
            .iter()
            .map(|name| self.values.get(name).copied().unwrap_or(0.0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> FeatureSchema {
        FeatureSchema::from_names(vec![
            "hour".to_string(),
            "spx_close".to_string(),
            "spx_rsi_14".to_string(),
            "vix_level".to_string(),
        ])
    }

    #[test]
    fn test_projection_order_and_length() {
        let mut nf = NamedFeatures::new();
        nf.set("vix_level", 15.0);
        nf.set("hour", 10.0);
        nf.set("spx_close", 5800.0);
        nf.set("spx_rsi_14", 55.0);

        let v = nf.project(&schema());
        assert_eq!(v, vec![10.0, 5800.0, 55.0, 15.0]);
    }

    #[test]
    fn test_projection_zero_fills_missing() {
        let mut nf = NamedFeatures::new();
        nf.set("hour", 10.0);

        let v = nf.project(&schema());
        assert_eq!(v.len(), 4);
        assert_eq!(v, vec![10.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_projection_drops_unknown_names() {
        let mut nf = NamedFeatures::new();
        nf.set("hour", 10.0);
        nf.set("not_in_schema", 42.0);

        let v = nf.project(&schema());
        assert_eq!(v.len(), 4);
        assert!(!v.contains(&42.0));
    }

    #[test]
    fn test_non_finite_values_become_zero() {
        let mut nf = NamedFeatures::new();
        nf.set("hour", f64::NAN);
        nf.set("spx_close", f64::INFINITY);

        let v = nf.project(&schema());
        assert_eq!(v[0], 0.0);
        assert_eq!(v[1], 0.0);
    }

    #[test]
    fn test_tracked_symbols() {
        let schema = FeatureSchema::from_names(vec![
            "spx_close".to_string(),
            "spx_sma_20".to_string(),
            "ndx_close".to_string(),
            "vix_close".to_string(),
            "vix_level".to_string(),
            "hour".to_string(),
        ]);
        assert_eq!(schema.tracked_symbols(), vec!["SPX", "NDX"]);
    }

    #[test]
    fn test_schema_rejects_mismatched_count() {
        let schema = FeatureSchema {
            n_features: 3,
            feature_names: vec!["a".to_string(), "b".to_string()],
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_schema_rejects_duplicates() {
        let schema = FeatureSchema {
            n_features: 2,
            feature_names: vec!["a".to_string(), "a".to_string()],
        };
        assert!(schema.validate().is_err());
    }
}
