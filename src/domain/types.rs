use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Last traded price plus top-of-book, as returned by a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn mid(&self) -> f64 {
        if self.bid > 0.0 && self.ask > 0.0 {
            (self.bid + self.ask) / 2.0
        } else {
            self.last
        }
    }
}

/// OHLCV bar. Sources return bars ordered oldest to newest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VixSnapshot {
    pub last: f64,
    pub change: f64,
    pub change_pct: f64,
    pub high: f64,
    pub low: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarInterval {
    OneMin,
    FiveMin,
    FifteenMin,
    OneHour,
    OneDay,
}

impl BarInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarInterval::OneMin => "1m",
            BarInterval::FiveMin => "5m",
            BarInterval::FifteenMin => "15m",
            BarInterval::OneHour => "1h",
            BarInterval::OneDay => "1d",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            BarInterval::OneMin => 60,
            BarInterval::FiveMin => 300,
            BarInterval::FifteenMin => 900,
            BarInterval::OneHour => 3600,
            BarInterval::OneDay => 86400,
        }
    }
}

impl std::str::FromStr for BarInterval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1m" | "1min" => Ok(BarInterval::OneMin),
            "5m" | "5min" => Ok(BarInterval::FiveMin),
            "15m" | "15min" => Ok(BarInterval::FifteenMin),
            "1h" | "60min" => Ok(BarInterval::OneHour),
            "1d" | "day" => Ok(BarInterval::OneDay),
            _ => anyhow::bail!("Invalid bar interval: {}. Must be 1m, 5m, 15m, 1h or 1d", s),
        }
    }
}

impl fmt::Display for BarInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options strategies the trained models know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Butterfly,
    IronCondor,
    Vertical,
    Sonar,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Butterfly => "butterfly",
            Strategy::IronCondor => "iron_condor",
            Strategy::Vertical => "vertical",
            Strategy::Sonar => "sonar",
        }
    }

    pub fn all() -> [Strategy; 4] {
        [
            Strategy::Butterfly,
            Strategy::IronCondor,
            Strategy::Vertical,
            Strategy::Sonar,
        ]
    }
}

impl std::str::FromStr for Strategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "butterfly" => Ok(Strategy::Butterfly),
            "iron_condor" | "ironcondor" => Ok(Strategy::IronCondor),
            "vertical" => Ok(Strategy::Vertical),
            "sonar" => Ok(Strategy::Sonar),
            _ => anyhow::bail!(
                "Invalid strategy: {}. Must be butterfly, iron_condor, vertical or sonar",
                s
            ),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A trade order submitted for scoring. Read-only within the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub strategy: Strategy,
    #[serde(default)]
    pub strikes: Vec<f64>,
    pub premium: f64,
    #[serde(default)]
    pub risk: Option<f64>,
    #[serde(default)]
    pub reward: Option<f64>,
    pub predicted_price: f64,
    #[serde(default)]
    pub expiry: Option<String>,
    #[serde(default)]
    pub right: Option<String>,
    #[serde(default)]
    pub short_term_bias: Option<f64>,
    #[serde(default)]
    pub long_term_bias: Option<f64>,
    #[serde(default)]
    pub bias_convergence: Option<f64>,
}

impl OrderRequest {
    /// Canonical cache key. Two orders differing only in size (premium,
    /// risk, reward) share a cached decision.
    pub fn fingerprint(&self) -> String {
        let mut strikes = self.strikes.clone();
        strikes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let strikes_key = strikes
            .iter()
            .map(|s| format!("{:.2}", s))
            .collect::<Vec<_>>()
            .join(",");

        format!(
            "{}|{}|{}|{}|{}",
            self.symbol.to_uppercase(),
            self.strategy,
            strikes_key,
            self.expiry.as_deref().unwrap_or("-"),
            self.right.as_deref().unwrap_or("-"),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Take,
    Skip,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::Take => write!(f, "TAKE"),
            Recommendation::Skip => write!(f, "SKIP"),
        }
    }
}

/// Completed prediction. Created once per request, cached by value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub symbol: String,
    pub strategy: Strategy,
    pub win_probability: f64,
    pub prediction: bool,
    pub confidence: f64,
    pub recommendation: Recommendation,
    pub risk_score: f64,
    pub features_used: usize,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub model_version: String,
    pub data_source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(symbol: &str, strategy: Strategy) -> OrderRequest {
        OrderRequest {
            symbol: symbol.to_string(),
            strategy,
            strikes: vec![5850.0, 5800.0, 5900.0],
            premium: 1.50,
            risk: Some(350.0),
            reward: Some(150.0),
            predicted_price: 5850.0,
            expiry: Some("2026-08-21".to_string()),
            right: None,
            short_term_bias: None,
            long_term_bias: None,
            bias_convergence: None,
        }
    }

    #[test]
    fn test_fingerprint_ignores_sizing_fields() {
        let a = order("SPX", Strategy::Butterfly);
        let mut b = a.clone();
        b.premium = 3.25;
        b.risk = None;
        b.reward = Some(999.0);

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_sorts_strikes() {
        let a = order("SPX", Strategy::Butterfly);
        let mut b = a.clone();
        b.strikes = vec![5900.0, 5850.0, 5800.0];

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_strategy() {
        let a = order("SPX", Strategy::Butterfly);
        let b = order("SPX", Strategy::IronCondor);

        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_strategy_round_trip() {
        for strategy in Strategy::all() {
            let parsed: Strategy = strategy.as_str().parse().unwrap();
            assert_eq!(parsed, strategy);
        }
        assert!("ironcondor".parse::<Strategy>().is_ok());
        assert!("calendar".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_quote_mid_falls_back_to_last() {
        let quote = Quote {
            symbol: "SPX".to_string(),
            last: 5800.0,
            bid: 0.0,
            ask: 0.0,
            bid_size: 0.0,
            ask_size: 0.0,
            timestamp: Utc::now(),
        };
        assert_eq!(quote.mid(), 5800.0);
    }
}
