//! End-to-end prediction flow against the deterministic mock chain.

use std::sync::Arc;
use std::time::{Duration, Instant};
use winprob::application::cascade::ModelCascade;
use winprob::application::model::InferenceModel;
use winprob::application::orchestrator::{OrchestratorConfig, PredictionOrchestrator};
use winprob::application::resolver::{CachingResolver, ResolverConfig};
use winprob::domain::errors::PredictionError;
use winprob::domain::schema::FeatureSchema;
use winprob::domain::types::{OrderRequest, Strategy};
use winprob::infrastructure::mock::MockSource;

struct AverageModel {
    width: usize,
}

impl InferenceModel for AverageModel {
    fn predict(&self, features: &[f64]) -> Result<f64, PredictionError> {
        // A stand-in inference: squash the mean feature into (0, 1).
        let mean = features.iter().sum::<f64>() / features.len().max(1) as f64;
        Ok(1.0 / (1.0 + (-mean / 1000.0).exp()))
    }

    fn expected_features(&self) -> usize {
        self.width
    }

    fn version(&self) -> &str {
        "avg-v1"
    }
}

/// The full serving schema: temporal block, per-symbol blocks for the
/// index universe, VIX block, trade-context block.
fn serving_schema() -> Arc<FeatureSchema> {
    let mut names: Vec<String> = [
        "hour",
        "minute",
        "day_of_week",
        "hour_sin",
        "hour_cos",
        "minute_sin",
        "minute_cos",
        "day_sin",
        "day_cos",
        "is_market_open",
        "is_premarket",
        "is_afterhours",
        "is_opening_hour",
        "is_closing_hour",
        "minutes_to_close",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    for symbol in ["spx", "spy", "ndx", "qqq", "rut", "iwm"] {
        names.push(format!("{}_close", symbol));
        names.push(format!("{}_sma_20", symbol));
        names.push(format!("{}_momentum_5", symbol));
        names.push(format!("{}_volatility_20", symbol));
        names.push(format!("{}_rsi_14", symbol));
        names.push(format!("{}_range_position", symbol));
    }

    names.extend(
        [
            "vix_level",
            "vix_sma_10",
            "vix_change",
            "vix_change_pct",
            "vix_range_position",
            "vix_regime_low",
            "vix_regime_normal",
            "vix_regime_elevated",
            "vix_regime_high",
            "strategy_butterfly",
            "strategy_iron_condor",
            "strategy_vertical",
            "strategy_sonar",
            "premium",
            "premium_normalized",
            "risk_reward_ratio",
            "predicted_price_diff",
            "strike_count",
            "strike_span",
            "bias_short_term",
            "bias_long_term",
            "bias_convergence",
            "bias_agreement",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    let schema = FeatureSchema::from_names(names);
    assert_eq!(schema.n_features, 74);
    Arc::new(schema)
}

fn orchestrator(mock: Arc<MockSource>) -> PredictionOrchestrator {
    let schema = serving_schema();
    let resolver = Arc::new(CachingResolver::new(
        vec![mock],
        ResolverConfig::default(),
    ));
    let mut cascade = ModelCascade::new();
    cascade.register_default(Arc::new(AverageModel {
        width: schema.n_features,
    }));
    PredictionOrchestrator::new(
        resolver,
        Arc::new(cascade),
        schema,
        OrchestratorConfig::default(),
    )
}

fn spx_butterfly() -> OrderRequest {
    OrderRequest {
        symbol: "SPX".to_string(),
        strategy: Strategy::Butterfly,
        strikes: vec![5800.0, 5850.0, 5900.0],
        premium: 1.50,
        risk: None,
        reward: None,
        predicted_price: 5850.0,
        expiry: Some("2026-08-21".to_string()),
        right: None,
        short_term_bias: None,
        long_term_bias: None,
        bias_convergence: None,
    }
}

#[tokio::test]
async fn spx_butterfly_on_mock_chain() {
    let mock = Arc::new(MockSource::new().with_vix(15.0));
    let orchestrator = orchestrator(mock);

    let result = orchestrator.predict(&spx_butterfly()).await.unwrap();

    assert!(
        (0.0..=1.0).contains(&result.win_probability),
        "probability {} out of range",
        result.win_probability
    );
    assert_eq!(result.features_used, orchestrator.schema().n_features);
    assert_eq!(result.data_source, "mock");
    assert!((0.0..=1.0).contains(&result.confidence));
    assert!((0.0..=1.0).contains(&result.risk_score));
}

#[tokio::test]
async fn repeated_predict_hits_cache_and_skips_fetch() {
    let mock = Arc::new(MockSource::new());
    let orchestrator = orchestrator(mock.clone());

    let first = orchestrator.predict(&spx_butterfly()).await.unwrap();
    let quote_calls = mock.quote_calls();
    let bars_calls = mock.bars_calls();

    let second = orchestrator.predict(&spx_butterfly()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(mock.quote_calls(), quote_calls);
    assert_eq!(mock.bars_calls(), bars_calls);
}

#[tokio::test]
async fn batch_same_symbol_shares_one_fetch() {
    let mock = Arc::new(MockSource::new());
    let orchestrator = orchestrator(mock.clone());

    let mut narrower = spx_butterfly();
    narrower.strikes = vec![5825.0, 5850.0, 5875.0];

    let entries = orchestrator
        .predict_batch(&[spx_butterfly(), narrower], true)
        .await;

    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.error.is_none()));
    assert_eq!(mock.quote_calls_for("SPX"), 1);
    assert_eq!(mock.bars_calls_for("SPX"), 1);
    assert_eq!(mock.vix_calls(), 1);
}

#[tokio::test]
async fn batch_different_symbols_fetch_in_parallel() {
    let mock = Arc::new(MockSource::new().with_latency(Duration::from_millis(80)));
    let resolver_cfg = ResolverConfig {
        fetch_timeout: Duration::from_millis(2000),
        ..Default::default()
    };
    let schema = serving_schema();
    let resolver = Arc::new(CachingResolver::new(vec![mock.clone()], resolver_cfg));
    let mut cascade = ModelCascade::new();
    cascade.register_default(Arc::new(AverageModel {
        width: schema.n_features,
    }));
    let orchestrator = PredictionOrchestrator::new(
        resolver,
        Arc::new(cascade),
        schema,
        OrchestratorConfig::default(),
    );

    let mut ndx = spx_butterfly();
    ndx.symbol = "NDX".to_string();
    ndx.predicted_price = 20600.0;

    let started = Instant::now();
    let entries = orchestrator
        .predict_batch(&[spx_butterfly(), ndx], true)
        .await;
    let elapsed = started.elapsed();

    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.result.is_some()));
    assert_eq!(mock.quote_calls_for("SPX"), 1);
    assert_eq!(mock.quote_calls_for("NDX"), 1);

    // The schema tracks six symbols; a fully sequential episode would
    // cost ~14 calls x 80ms. Parallel resolution stays near the latency
    // of one call pair.
    assert!(
        elapsed < Duration::from_millis(600),
        "batch took {:?}, expected parallel market-data fetches",
        elapsed
    );
}

#[tokio::test]
async fn missing_model_yields_error_entry_not_probability() {
    let schema = serving_schema();
    let resolver = Arc::new(CachingResolver::new(
        vec![Arc::new(MockSource::new())],
        ResolverConfig::default(),
    ));
    let orchestrator = PredictionOrchestrator::new(
        resolver,
        Arc::new(ModelCascade::new()),
        schema,
        OrchestratorConfig::default(),
    );

    let entries = orchestrator.predict_batch(&[spx_butterfly()], true).await;
    assert_eq!(entries.len(), 1);
    assert!(entries[0].result.is_none());
    assert!(
        entries[0]
            .error
            .as_deref()
            .unwrap()
            .contains("no model available")
    );
}
