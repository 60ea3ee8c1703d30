//! Standalone broker gateway source.
//!
//! Talks to the broker's local gateway REST bridge directly, without the
//! companion in between. Used when the companion is down but the gateway
//! session is still alive. The gateway wire protocol stays opaque behind
//! this adapter.

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

/// Gateway snapshot payload. Field tags follow the gateway's own naming.
#[derive(Debug, Deserialize)]
struct GatewaySnapshot {
    symbol: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    last_price: f64,
    #[serde(default)]
    bid_price: f64,
    #[serde(default)]
    ask_price: f64,
    #[serde(default)]
    bid_size: f64,
    #[serde(default)]
    ask_size: f64,
    #[serde(default)]
    updated_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct GatewayHistory {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    bars: Vec<GatewayBar>,
}

#[derive(Debug, Deserialize)]
struct GatewayBar {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
}

pub struct BrokerSource {
    client: ClientWithMiddleware,
    base_url: String,
    connected: AtomicBool,
}

impl BrokerSource {
    pub fn new(host: &str, port: u16, timeout: Duration, retry_attempts: u32) -> Self {
        Self {
            client: HttpClientFactory::create_client(timeout, retry_attempts),
            base_url: format!("http://{}:{}", host, port),
            connected: AtomicBool::new(false),
        }
    }

    fn epoch_secs(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
    }

    /// The gateway reports entitlement problems inside a 200 response.
    fn check_payload_error(error: Option<&str>, symbol: &str) -> SourceResult<()> {
        let Some(error) = error else {
            return Ok(());
        };
        let lowered = error.to_lowercase();
        if lowered.contains("not_entitled")
            || lowered.contains("not entitled")
            || lowered.contains("no market data permissions")
        {
            return Err(SourceError::SubscriptionMissing {
                symbol: symbol.to_string(),
            });
        }
        Err(SourceError::Unavailable {
            reason: error.to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> SourceResult<T> {
        debug!("BrokerSource: GET {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            let message = e.to_string();
            if message.contains("timed out") || message.contains("timeout") {
                SourceError::Timeout { duration_ms: 0 }
            } else {
                SourceError::Unavailable { reason: message }
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Unavailable {
                reason: format!("HTTP {}: {}", status, body),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::InvalidData {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl MarketDataSource for BrokerSource {
    fn name(&self) -> &'static str {
        "broker"
    }

    async fn connect(&self) -> SourceResult<()> {
        let url = format!("{}/v1/session/status", self.base_url);
        self.get_json::<serde_json::Value>(&url).await?;
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn get_quote(&self, symbol: &str) -> SourceResult<Quote> {
        let url = format!("{}/v1/md/snapshot/{}", self.base_url, symbol);
        let raw: GatewaySnapshot = self.get_json(&url).await?;
        Self::check_payload_error(raw.error.as_deref(), symbol)?;

        if raw.last_price <= 0.0 {
            return Err(SourceError::InvalidData {
                reason: format!("non-positive last price {} for {}", raw.last_price, symbol),
            });
        }

        Ok(Quote {
            symbol: raw.symbol.to_uppercase(),
            last: raw.last_price,
            bid: raw.bid_price,
            ask: raw.ask_price,
            bid_size: raw.bid_size,
            ask_size: raw.ask_size,
            timestamp: raw
                .updated_at
                .map(Self::epoch_secs)
                .unwrap_or_else(Utc::now),
        })
    }

    async fn get_bars(
        &self,
        symbol: &str,
        count: usize,
        interval: BarInterval,
    ) -> SourceResult<Vec<Bar>> {
        let base = format!("{}/v1/md/history/{}", self.base_url, symbol);
        let url = build_url_with_query(
            &base,
            &[
                ("bars", count.to_string().as_str()),
                ("interval", interval.as_str()),
            ],
        );
        let raw: GatewayHistory = self.get_json(&url).await?;
        Self::check_payload_error(raw.error.as_deref(), symbol)?;

        let mut bars: Vec<Bar> = raw
            .bars
            .into_iter()
            .map(|b| Bar {
                time: Self::epoch_secs(b.t),
                open: b.o,
                high: b.h,
                low: b.l,
                close: b.c,
                volume: b.v,
            })
            .collect();
        bars.sort_by_key(|b| b.time);
        Ok(bars)
    }

    async fn get_vix(&self) -> SourceResult<VixSnapshot> {
        let quote = self.get_quote("VIX").await?;
        Ok(VixSnapshot {
            last: quote.last,
            change: 0.0,
            change_pct: 0.0,
            high: quote.last,
            low: quote.last,
            timestamp: quote.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_error_classification() {
        let err =
            BrokerSource::check_payload_error(Some("NOT_ENTITLED: CBOE one"), "SPX").unwrap_err();
        assert!(matches!(err, SourceError::SubscriptionMissing { .. }));

        let err = BrokerSource::check_payload_error(Some("pacing violation"), "SPX").unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }));

        assert!(BrokerSource::check_payload_error(None, "SPX").is_ok());
    }
}
