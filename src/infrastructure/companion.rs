//! Companion sidecar source.
//!
//! The companion process keeps a live broker session and exposes its view
//! of the market over a small local HTTP API. This is the preferred
//! provider: cheapest, fastest, already entitled.

use crate::domain::errors::SourceError;
use crate::domain::ports::{MarketDataSource, SourceResult};
use crate::domain::types::{Bar, BarInterval, Quote, VixSnapshot};
use crate::infrastructure::core::http_client_factory::{HttpClientFactory, build_url_with_query};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CompanionQuote {
    symbol: String,
    last: f64,
    #[serde(default)]
    bid: f64,
    #[serde(default)]
    ask: f64,
    #[serde(default)]
    bid_size: f64,
    #[serde(default)]
    ask_size: f64,
    /// Epoch milliseconds.
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct CompanionBar {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct CompanionVix {
    last: f64,
    #[serde(default)]
    change: f64,
    #[serde(default)]
    change_pct: f64,
    #[serde(default)]
    high: f64,
    #[serde(default)]
    low: f64,
    timestamp: i64,
}

pub struct CompanionSource {
    client: ClientWithMiddleware,
    base_url: String,
    connected: AtomicBool,
}

impl CompanionSource {
    pub fn new(base_url: String, timeout: Duration, retry_attempts: u32) -> Self {
        Self {
            client: HttpClientFactory::create_client(timeout, retry_attempts),
            base_url: base_url.trim_end_matches('/').to_string(),
            connected: AtomicBool::new(false),
        }
    }

    fn epoch_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        symbol: &str,
    ) -> SourceResult<T> {
        debug!("CompanionSource: GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_send_error(&e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body, symbol));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::InvalidData {
                reason: e.to_string(),
            })
    }
}

/// Map a transport error string onto the taxonomy. reqwest folds timeouts
/// and connection failures into one error type, so this goes by message.
fn classify_send_error(message: &str) -> SourceError {
    if message.contains("timed out") || message.contains("timeout") {
        SourceError::Timeout { duration_ms: 0 }
    } else {
        SourceError::Unavailable {
            reason: message.to_string(),
        }
    }
}

fn classify_status(status: u16, body: &str, symbol: &str) -> SourceError {
    let lowered = body.to_lowercase();
    if lowered.contains("not subscribed")
        || lowered.contains("not entitled")
        || lowered.contains("subscription")
    {
        return SourceError::SubscriptionMissing {
            symbol: symbol.to_string(),
        };
    }
    SourceError::Unavailable {
        reason: format!("HTTP {}: {}", status, body),
    }
}

#[async_trait]
impl MarketDataSource for CompanionSource {
    fn name(&self) -> &'static str {
        "companion"
    }

    async fn connect(&self) -> SourceResult<()> {
        let url = format!("{}/health", self.base_url);
        self.get_json::<serde_json::Value>(&url, "").await?;
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn get_quote(&self, symbol: &str) -> SourceResult<Quote> {
        let url = format!("{}/market/quote/{}", self.base_url, symbol);
        let raw: CompanionQuote = self.get_json(&url, symbol).await?;

        if raw.last <= 0.0 {
            return Err(SourceError::InvalidData {
                reason: format!("non-positive last price {} for {}", raw.last, symbol),
            });
        }

        Ok(Quote {
            symbol: raw.symbol.to_uppercase(),
            last: raw.last,
            bid: raw.bid,
            ask: raw.ask,
            bid_size: raw.bid_size,
            ask_size: raw.ask_size,
            timestamp: Self::epoch_ms(raw.timestamp),
        })
    }

    async fn get_bars(
        &self,
        symbol: &str,
        count: usize,
        interval: BarInterval,
    ) -> SourceResult<Vec<Bar>> {
        let base = format!("{}/market/bars/{}", self.base_url, symbol);
        let url = build_url_with_query(
            &base,
            &[
                ("count", count.to_string().as_str()),
                ("interval", interval.as_str()),
            ],
        );
        let raw: Vec<CompanionBar> = self.get_json(&url, symbol).await?;

        let mut bars: Vec<Bar> = raw
            .into_iter()
            .map(|b| Bar {
                time: Self::epoch_ms(b.time),
                open: b.open,
                high: b.high,
                low: b.low,
                close: b.close,
                volume: b.volume,
            })
            .collect();
        bars.sort_by_key(|b| b.time);
        Ok(bars)
    }

    async fn get_vix(&self) -> SourceResult<VixSnapshot> {
        let url = format!("{}/market/vix", self.base_url);
        let raw: CompanionVix = self.get_json(&url, "VIX").await?;

        Ok(VixSnapshot {
            last: raw.last,
            change: raw.change,
            change_pct: raw.change_pct,
            high: raw.high,
            low: raw.low,
            timestamp: Self::epoch_ms(raw.timestamp),
        })
    }
}
