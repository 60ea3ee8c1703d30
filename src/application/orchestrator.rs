//! End-to-end prediction handling.
//!
//! The orchestrator ties resolver, builder and cascade into one
//! `predict` call, memoizes complete results by order fingerprint, and
//! shares a single market-data episode across a batch.

use crate::application::cascade::ModelCascade;
use crate::application::features::FeatureVectorBuilder;
use crate::application::resolver::{CachingResolver, MarketSnapshot};
use crate::domain::errors::PredictionError;
use crate::domain::schema::FeatureSchema;
use crate::domain::types::{
    BarInterval, OrderRequest, PredictionResult, Recommendation,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub min_win_probability: f64,
    pub prediction_ttl: Duration,
    pub prediction_cache_max: usize,
    pub bar_count: usize,
    pub bar_interval: BarInterval,
    pub batch_budget: Duration,
    /// With `skip_on_error` a failed order becomes a per-order error
    /// entry; without it the first failure aborts the whole batch.
    pub skip_on_error: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_win_probability: 0.55,
            prediction_ttl: Duration::from_secs(300),
            prediction_cache_max: 1000,
            bar_count: 40,
            bar_interval: BarInterval::FiveMin,
            batch_budget: Duration::from_secs(10),
            skip_on_error: true,
        }
    }
}

struct CachedPrediction {
    result: PredictionResult,
    stored_at: Instant,
}

/// Memoizes complete predictions by order fingerprint with TTL expiry and
/// an oldest-first sweep once the soft cap is exceeded.
struct PredictionCache {
    entries: RwLock<HashMap<String, CachedPrediction>>,
    ttl: Duration,
    max_entries: usize,
}

impl PredictionCache {
    fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    fn get(&self, fingerprint: &str) -> Option<PredictionResult> {
        let guard = match self.entries.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .get(fingerprint)
            .filter(|cached| cached.stored_at.elapsed() < self.ttl)
            .map(|cached| cached.result.clone())
    }

    fn store(&self, fingerprint: String, result: PredictionResult) {
        let mut guard = match self.entries.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(
            fingerprint,
            CachedPrediction {
                result,
                stored_at: Instant::now(),
            },
        );

        if guard.len() > self.max_entries {
            let mut by_age: Vec<(String, Instant)> = guard
                .iter()
                .map(|(k, v)| (k.clone(), v.stored_at))
                .collect();
            by_age.sort_by_key(|(_, stored_at)| *stored_at);

            let excess = guard.len() - self.max_entries;
            for (key, _) in by_age.into_iter().take(excess) {
                guard.remove(&key);
            }
            debug!("Prediction cache swept {} oldest entries", excess);
        }
    }

    fn len(&self) -> usize {
        match self.entries.read() {
            Ok(g) => g.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Per-order outcome of a batch call. A failed order carries its error
/// instead of a fabricated probability.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchEntry {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PredictionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchEntry {
    fn ok(result: PredictionResult) -> Self {
        Self {
            symbol: result.symbol.clone(),
            result: Some(result),
            error: None,
        }
    }

    fn failed(symbol: &str, error: &PredictionError) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            result: None,
            error: Some(error.to_string()),
        }
    }
}

pub struct PredictionOrchestrator {
    resolver: Arc<CachingResolver>,
    builder: FeatureVectorBuilder,
    cascade: Arc<ModelCascade>,
    cache: PredictionCache,
    schema: Arc<FeatureSchema>,
    cfg: OrchestratorConfig,
}

impl PredictionOrchestrator {
    pub fn new(
        resolver: Arc<CachingResolver>,
        cascade: Arc<ModelCascade>,
        schema: Arc<FeatureSchema>,
        cfg: OrchestratorConfig,
    ) -> Self {
        Self {
            resolver,
            builder: FeatureVectorBuilder::new(schema.clone()),
            cascade,
            cache: PredictionCache::new(cfg.prediction_ttl, cfg.prediction_cache_max),
            schema,
            cfg,
        }
    }

    pub fn resolver(&self) -> &Arc<CachingResolver> {
        &self.resolver
    }

    pub fn cascade(&self) -> &Arc<ModelCascade> {
        &self.cascade
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn cached_predictions(&self) -> usize {
        self.cache.len()
    }

    pub async fn predict(&self, order: &OrderRequest) -> Result<PredictionResult, PredictionError> {
        let started = Instant::now();
        let fingerprint = order.fingerprint();

        if let Some(hit) = self.cache.get(&fingerprint) {
            debug!("Prediction cache hit for {}", fingerprint);
            return Ok(hit);
        }

        let snapshot = self.fetch_episode(std::slice::from_ref(&order.symbol)).await;
        self.predict_with_snapshot(order, &snapshot, started)
    }

    /// Score a batch. With `share_market_data` one resolver episode covers
    /// every distinct symbol in the batch; per-order work then reuses that
    /// snapshot. The whole call observes a wall-clock budget; orders not
    /// reached in time fail individually rather than sinking the batch.
    pub async fn predict_batch(
        &self,
        orders: &[OrderRequest],
        share_market_data: bool,
    ) -> Vec<BatchEntry> {
        let deadline = Instant::now() + self.cfg.batch_budget;
        info!(
            "Batch of {} orders (share_market_data: {})",
            orders.len(),
            share_market_data
        );

        if !share_market_data {
            let mut entries = Vec::with_capacity(orders.len());
            for order in orders {
                if Instant::now() >= deadline {
                    entries.push(BatchEntry::failed(&order.symbol, &self.budget_error()));
                    continue;
                }
                match self.predict(order).await {
                    Ok(result) => entries.push(BatchEntry::ok(result)),
                    Err(e) if self.cfg.skip_on_error => {
                        entries.push(BatchEntry::failed(&order.symbol, &e));
                    }
                    Err(e) => return self.abort_batch(orders, &e),
                }
            }
            return entries;
        }

        let symbols: Vec<String> = orders.iter().map(|o| o.symbol.clone()).collect();
        let remaining = deadline.saturating_duration_since(Instant::now());
        let snapshot = match tokio::time::timeout(remaining, self.fetch_episode(&symbols)).await {
            Ok(snapshot) => snapshot,
            Err(_) => {
                warn!("Batch market-data episode exceeded the budget");
                return orders
                    .iter()
                    .map(|o| BatchEntry::failed(&o.symbol, &self.budget_error()))
                    .collect();
            }
        };

        let mut entries = Vec::with_capacity(orders.len());
        for order in orders {
            if Instant::now() >= deadline {
                entries.push(BatchEntry::failed(&order.symbol, &self.budget_error()));
                continue;
            }
            let started = Instant::now();
            let fingerprint = order.fingerprint();
            if let Some(hit) = self.cache.get(&fingerprint) {
                entries.push(BatchEntry::ok(hit));
                continue;
            }
            match self.predict_with_snapshot(order, &snapshot, started) {
                Ok(result) => entries.push(BatchEntry::ok(result)),
                Err(e) if self.cfg.skip_on_error => {
                    entries.push(BatchEntry::failed(&order.symbol, &e));
                }
                Err(e) => return self.abort_batch(orders, &e),
            }
        }
        entries
    }

    fn abort_batch(&self, orders: &[OrderRequest], error: &PredictionError) -> Vec<BatchEntry> {
        warn!("Aborting batch on first failure (skip_on_error off): {}", error);
        orders
            .iter()
            .map(|o| BatchEntry::failed(&o.symbol, error))
            .collect()
    }

    /// One market-data episode: the traded symbols plus every symbol the
    /// schema tracks, resolved concurrently.
    async fn fetch_episode(&self, order_symbols: &[String]) -> MarketSnapshot {
        let mut symbols: Vec<String> = order_symbols.to_vec();
        symbols.extend(self.schema.tracked_symbols());
        self.resolver
            .snapshot(&symbols, self.cfg.bar_count, self.cfg.bar_interval)
            .await
    }

    /// CPU side of a prediction: build the vector, run the cascade, derive
    /// the decision fields, store. No awaits past this point.
    fn predict_with_snapshot(
        &self,
        order: &OrderRequest,
        snapshot: &MarketSnapshot,
        started: Instant,
    ) -> Result<PredictionResult, PredictionError> {
        let features = self.builder.build(order, snapshot, Utc::now());
        let output = self
            .cascade
            .predict(&order.symbol, order.strategy, &features)?;

        let p = output.probability;
        let prediction = p >= self.cfg.min_win_probability;
        let result = PredictionResult {
            symbol: order.symbol.to_uppercase(),
            strategy: order.strategy,
            win_probability: p,
            prediction,
            confidence: ((p - 0.5).abs() * 2.0).clamp(0.0, 1.0),
            recommendation: if prediction {
                Recommendation::Take
            } else {
                Recommendation::Skip
            },
            risk_score: Self::risk_score(p, order),
            features_used: output.features_used,
            latency_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            model_version: output.model_version,
            data_source: snapshot.source_for(&order.symbol).to_string(),
        };

        self.cache.store(order.fingerprint(), result.clone());
        Ok(result)
    }

    /// Loss probability weighted by the capital share at risk. The full
    /// pricing calculator lives outside this service.
    fn risk_score(win_probability: f64, order: &OrderRequest) -> f64 {
        let exposure = match (order.risk, order.reward) {
            (Some(risk), Some(reward)) if risk + reward > 0.0 => risk / (risk + reward),
            _ => 0.5,
        };
        ((1.0 - win_probability) * exposure * 2.0).clamp(0.0, 1.0)
    }

    fn budget_error(&self) -> PredictionError {
        PredictionError::BatchBudgetExceeded {
            budget_ms: self.cfg.batch_budget.as_millis() as u64,
        }
    }
}
