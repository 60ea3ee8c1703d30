use crate::application::orchestrator::{BatchEntry, PredictionOrchestrator};
use crate::application::resolver::CacheStats;
use crate::domain::types::{OrderRequest, PredictionResult};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PredictionOrchestrator>,
}

#[derive(Serialize)]
pub struct PredictResponse {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub win_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features_used: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PredictResponse {
    fn from_result(result: PredictionResult) -> Self {
        Self {
            symbol: result.symbol.clone(),
            win_probability: Some(result.win_probability),
            prediction: Some(result.prediction),
            confidence: Some(result.confidence),
            recommendation: Some(result.recommendation.to_string()),
            risk_score: Some(result.risk_score),
            features_used: Some(result.features_used),
            latency_ms: Some(result.latency_ms),
            model_version: Some(result.model_version),
            data_source: Some(result.data_source),
            error: None,
        }
    }

    fn from_error(symbol: &str, error: String) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            win_probability: None,
            prediction: None,
            confidence: None,
            recommendation: None,
            risk_score: None,
            features_used: None,
            latency_ms: None,
            model_version: None,
            data_source: None,
            error: Some(error),
        }
    }
}

#[derive(Deserialize)]
pub struct BatchRequest {
    pub requests: Vec<OrderRequest>,
    #[serde(default = "default_share_market_data")]
    pub share_market_data: bool,
}

const fn default_share_market_data() -> bool {
    true
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub predictions: Vec<BatchEntry>,
}

#[derive(Serialize)]
pub struct MarketDiagnostics {
    pub symbol: String,
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
    pub bar_count: usize,
    pub source: String,
    pub cache: CacheStats,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub models: Vec<String>,
    pub sources: Vec<SourceStatus>,
    pub demoted: Vec<String>,
    pub cached_predictions: usize,
}

#[derive(Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub connected: bool,
}

/// A prediction failure is a domain outcome, not a transport fault: the
/// response carries an explicit error field instead of a probability.
async fn predict(
    State(state): State<AppState>,
    Json(order): Json<OrderRequest>,
) -> Json<PredictResponse> {
    match state.orchestrator.predict(&order).await {
        Ok(result) => Json(PredictResponse::from_result(result)),
        Err(e) => Json(PredictResponse::from_error(&order.symbol, e.to_string())),
    }
}

async fn predict_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Json<BatchResponse> {
    let predictions = state
        .orchestrator
        .predict_batch(&request.requests, request.share_market_data)
        .await;
    Json(BatchResponse { predictions })
}

/// Exposes the resolver directly for diagnostics.
async fn market(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<MarketDiagnostics>, StatusCode> {
    if symbol.is_empty() || symbol.len() > 12 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let resolver = state.orchestrator.resolver();
    let quote = resolver.get_quote(&symbol).await;
    let bars = resolver
        .get_bars(&symbol, 20, crate::domain::types::BarInterval::FiveMin)
        .await;

    Ok(Json(MarketDiagnostics {
        symbol: quote.symbol.clone(),
        last: quote.last,
        bid: quote.bid,
        ask: quote.ask,
        bar_count: bars.len(),
        source: resolver
            .last_source(&symbol)
            .unwrap_or_else(|| "unknown".to_string()),
        cache: resolver.stats(),
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let resolver = state.orchestrator.resolver();
    let sources = resolver
        .sources_status()
        .await
        .into_iter()
        .map(|(name, connected)| SourceStatus { name, connected })
        .collect();

    Json(HealthResponse {
        status: "ok",
        models: state.orchestrator.cascade().inventory(),
        sources,
        demoted: resolver
            .demoted_pairs()
            .into_iter()
            .map(|(source, symbol)| format!("{}/{}", source, symbol))
            .collect(),
        cached_predictions: state.orchestrator.cached_predictions(),
    })
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(orchestrator: Arc<PredictionOrchestrator>) -> Self {
        Self {
            state: AppState { orchestrator },
        }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/predict", post(predict))
            .route("/predict/batch", post(predict_batch))
            .route("/market/:symbol", get(market))
            .route("/health", get(health))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Binds and serves until shutdown.
    ///
    /// # Errors
    /// Returns an error if the listener cannot bind or the server fails.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Prediction API listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        Ok(())
    }
}
