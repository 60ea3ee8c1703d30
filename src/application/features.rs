//! Feature vector assembly.
//!
//! The builder computes a named feature map from the order and the
//! resolved market snapshot, then projects it onto the training schema.
//! The projection is the only place a bare numeric vector is produced;
//! everything upstream stays keyed by name.

use crate::application::indicators;
use crate::application::resolver::MarketSnapshot;
use crate::domain::schema::{FeatureSchema, NamedFeatures};
use crate::domain::types::{OrderRequest, Strategy};
use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::US::Eastern;
use std::f64::consts::PI;
use std::sync::Arc;

const MARKET_OPEN_MINUTE: u32 = 9 * 60 + 30;
const MARKET_CLOSE_MINUTE: u32 = 16 * 60;

const SMA_PERIOD: usize = 20;
const MOMENTUM_PERIOD: usize = 5;
const VOLATILITY_PERIOD: usize = 20;
const RSI_PERIOD: usize = 14;
const RANGE_PERIOD: usize = 20;
const VIX_SMA_PERIOD: usize = 10;

pub struct FeatureVectorBuilder {
    schema: Arc<FeatureSchema>,
}

impl FeatureVectorBuilder {
    pub fn new(schema: Arc<FeatureSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Deterministic mapping of (order, snapshot, now) to the schema-ordered
    /// vector. Missing inputs become 0.0 through the projection, never an
    /// error and never NaN.
    pub fn build(
        &self,
        order: &OrderRequest,
        snapshot: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<f64> {
        let mut nf = NamedFeatures::new();

        self.temporal_features(&mut nf, now);
        self.price_features(&mut nf, snapshot);
        self.vix_features(&mut nf, snapshot);
        self.trade_features(&mut nf, order, snapshot);

        nf.project(&self.schema)
    }

    fn temporal_features(&self, nf: &mut NamedFeatures, now: DateTime<Utc>) {
        let local = now.with_timezone(&Eastern);
        let hour = local.hour();
        let minute = local.minute();
        // Monday = 0, matching the training data encoding.
        let day_of_week = local.weekday().num_days_from_monday();

        nf.set("hour", hour as f64);
        nf.set("minute", minute as f64);
        nf.set("day_of_week", day_of_week as f64);

        nf.set("hour_sin", (2.0 * PI * hour as f64 / 24.0).sin());
        nf.set("hour_cos", (2.0 * PI * hour as f64 / 24.0).cos());
        nf.set("minute_sin", (2.0 * PI * minute as f64 / 60.0).sin());
        nf.set("minute_cos", (2.0 * PI * minute as f64 / 60.0).cos());
        nf.set("day_sin", (2.0 * PI * day_of_week as f64 / 7.0).sin());
        nf.set("day_cos", (2.0 * PI * day_of_week as f64 / 7.0).cos());

        let minute_of_day = hour * 60 + minute;
        let is_weekday = day_of_week < 5;
        let is_open = is_weekday
            && minute_of_day >= MARKET_OPEN_MINUTE
            && minute_of_day < MARKET_CLOSE_MINUTE;

        nf.set_flag("is_market_open", is_open);
        nf.set_flag(
            "is_premarket",
            is_weekday && minute_of_day < MARKET_OPEN_MINUTE,
        );
        nf.set_flag(
            "is_afterhours",
            is_weekday && minute_of_day >= MARKET_CLOSE_MINUTE,
        );
        nf.set_flag(
            "is_opening_hour",
            is_open && minute_of_day < MARKET_OPEN_MINUTE + 60,
        );
        nf.set_flag(
            "is_closing_hour",
            is_open && minute_of_day >= MARKET_CLOSE_MINUTE - 60,
        );
        nf.set(
            "minutes_to_close",
            if is_open {
                (MARKET_CLOSE_MINUTE - minute_of_day) as f64
            } else {
                0.0
            },
        );
    }

    fn price_features(&self, nf: &mut NamedFeatures, snapshot: &MarketSnapshot) {
        for symbol in self.schema.tracked_symbols() {
            let prefix = symbol.to_lowercase();

            let closes: Vec<f64> = snapshot
                .bars
                .get(&symbol)
                .map(|bars| bars.iter().map(|b| b.close).collect())
                .unwrap_or_default();

            let last = snapshot
                .quotes
                .get(&symbol)
                .map(|q| q.last)
                .or_else(|| closes.last().copied());

            // Symbols the resolver produced nothing for are left unset and
            // zero-fill through the projection.
            if last.is_none() && closes.is_empty() {
                continue;
            }

            if let Some(last) = last {
                nf.set(format!("{}_close", prefix), last);
            }
            if let Some(v) = indicators::sma(&closes, SMA_PERIOD) {
                nf.set(format!("{}_sma_{}", prefix, SMA_PERIOD), v);
            }
            if let Some(v) = indicators::momentum(&closes, MOMENTUM_PERIOD) {
                nf.set(format!("{}_momentum_{}", prefix, MOMENTUM_PERIOD), v);
            }
            if let Some(v) = indicators::realized_volatility(&closes, VOLATILITY_PERIOD) {
                nf.set(format!("{}_volatility_{}", prefix, VOLATILITY_PERIOD), v);
            }
            if let Some(v) = indicators::rsi(&closes, RSI_PERIOD) {
                nf.set(format!("{}_rsi_{}", prefix, RSI_PERIOD), v);
            }
            if let Some(v) = indicators::range_position(&closes, RANGE_PERIOD) {
                nf.set(format!("{}_range_position", prefix), v);
            }
        }
    }

    fn vix_features(&self, nf: &mut NamedFeatures, snapshot: &MarketSnapshot) {
        let Some(vix) = &snapshot.vix else {
            return;
        };

        nf.set("vix_level", vix.last);
        nf.set("vix_change", vix.change);
        nf.set("vix_change_pct", vix.change_pct);

        let closes: Vec<f64> = snapshot.vix_bars.iter().map(|b| b.close).collect();
        if let Some(v) = indicators::sma(&closes, VIX_SMA_PERIOD) {
            nf.set(format!("vix_sma_{}", VIX_SMA_PERIOD), v);
        }
        if let Some(v) = indicators::range_position(&closes, VIX_SMA_PERIOD) {
            nf.set("vix_range_position", v);
        }

        // Regime buckets at the fixed 15/20/25 thresholds used in training.
        nf.set_flag("vix_regime_low", vix.last < 15.0);
        nf.set_flag("vix_regime_normal", (15.0..20.0).contains(&vix.last));
        nf.set_flag("vix_regime_elevated", (20.0..25.0).contains(&vix.last));
        nf.set_flag("vix_regime_high", vix.last >= 25.0);
    }

    fn trade_features(
        &self,
        nf: &mut NamedFeatures,
        order: &OrderRequest,
        snapshot: &MarketSnapshot,
    ) {
        for strategy in Strategy::all() {
            nf.set_flag(
                format!("strategy_{}", strategy.as_str()),
                order.strategy == strategy,
            );
        }

        nf.set("premium", order.premium);

        let last = snapshot
            .quotes
            .get(&order.symbol.to_uppercase())
            .map(|q| q.last)
            .unwrap_or(0.0);

        if last > 0.0 {
            nf.set("premium_normalized", order.premium / last);
            nf.set(
                "predicted_price_diff",
                (order.predicted_price - last) / last,
            );
        }

        match (order.risk, order.reward) {
            (Some(risk), Some(reward)) if reward.abs() > 1e-10 => {
                nf.set("risk_reward_ratio", risk / reward);
            }
            _ => {}
        }

        nf.set("strike_count", order.strikes.len() as f64);
        if order.strikes.len() >= 2 {
            let high = order.strikes.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let low = order.strikes.iter().cloned().fold(f64::INFINITY, f64::min);
            nf.set("strike_span", high - low);
        }

        if let Some(v) = order.short_term_bias {
            nf.set("bias_short_term", v);
        }
        if let Some(v) = order.long_term_bias {
            nf.set("bias_long_term", v);
        }
        if let Some(v) = order.bias_convergence {
            nf.set("bias_convergence", v);
        }
        if let (Some(short), Some(long)) = (order.short_term_bias, order.long_term_bias) {
            nf.set_flag(
                "bias_agreement",
                short != 0.0 && long != 0.0 && short.signum() == long.signum(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Bar, Quote, VixSnapshot};
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    fn schema() -> Arc<FeatureSchema> {
        Arc::new(FeatureSchema::from_names(
            [
                "hour",
                "minute",
                "day_of_week",
                "hour_sin",
                "hour_cos",
                "is_market_open",
                "minutes_to_close",
                "spx_close",
                "spx_sma_20",
                "spx_momentum_5",
                "spx_volatility_20",
                "spx_rsi_14",
                "spx_range_position",
                "ndx_close",
                "ndx_sma_20",
                "vix_level",
                "vix_sma_10",
                "vix_change",
                "vix_regime_low",
                "vix_regime_normal",
                "vix_regime_elevated",
                "vix_regime_high",
                "strategy_butterfly",
                "strategy_iron_condor",
                "strategy_vertical",
                "strategy_sonar",
                "premium_normalized",
                "risk_reward_ratio",
                "predicted_price_diff",
                "bias_short_term",
                "bias_long_term",
                "bias_agreement",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        ))
    }

    fn bars(base: f64, count: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let close = base + (i as f64 * 0.37).sin();
                Bar {
                    time: start + Duration::minutes(5 * i as i64),
                    open: close - 0.5,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1000.0,
                }
            })
            .collect()
    }

    fn snapshot() -> MarketSnapshot {
        let mut quotes = HashMap::new();
        quotes.insert(
            "SPX".to_string(),
            Quote {
                symbol: "SPX".to_string(),
                last: 5800.0,
                bid: 5799.5,
                ask: 5800.5,
                bid_size: 10.0,
                ask_size: 10.0,
                timestamp: Utc::now(),
            },
        );

        let mut bar_map = HashMap::new();
        bar_map.insert("SPX".to_string(), bars(5800.0, 30));

        MarketSnapshot {
            quotes,
            bars: bar_map,
            vix: Some(VixSnapshot {
                last: 15.0,
                change: -0.3,
                change_pct: -1.96,
                high: 15.4,
                low: 14.8,
                timestamp: Utc::now(),
            }),
            vix_bars: bars(15.0, 12),
            sources: HashMap::new(),
        }
    }

    fn order() -> OrderRequest {
        OrderRequest {
            symbol: "SPX".to_string(),
            strategy: Strategy::Butterfly,
            strikes: vec![5750.0, 5800.0, 5850.0],
            premium: 1.50,
            risk: Some(350.0),
            reward: Some(150.0),
            predicted_price: 5850.0,
            expiry: None,
            right: None,
            short_term_bias: None,
            long_term_bias: None,
            bias_convergence: None,
        }
    }

    // Tuesday 2026-03-03 10:15 ET == 15:15 UTC.
    fn mid_session() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 3, 15, 15, 0).unwrap()
    }

    #[test]
    fn test_output_matches_schema_width_and_order() {
        let schema = schema();
        let builder = FeatureVectorBuilder::new(schema.clone());
        let v = builder.build(&order(), &snapshot(), mid_session());

        assert_eq!(v.len(), schema.n_features);
        // hour is the first schema name; 10:15 ET.
        assert_eq!(v[0], 10.0);
        assert_eq!(v[1], 15.0);
    }

    #[test]
    fn test_optional_fields_default_to_zero() {
        let schema = schema();
        let builder = FeatureVectorBuilder::new(schema.clone());
        let mut order = order();
        order.risk = None;
        order.short_term_bias = None;
        order.long_term_bias = None;

        let v = builder.build(&order, &snapshot(), mid_session());
        assert_eq!(v.len(), schema.n_features);

        let idx = |name: &str| {
            schema
                .feature_names
                .iter()
                .position(|n| n == name)
                .unwrap()
        };
        assert_eq!(v[idx("risk_reward_ratio")], 0.0);
        assert_eq!(v[idx("bias_short_term")], 0.0);
        assert_eq!(v[idx("bias_agreement")], 0.0);
        assert!(v.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_untracked_symbol_block_is_zero_filled() {
        let schema = schema();
        let builder = FeatureVectorBuilder::new(schema.clone());
        // Snapshot has no NDX data at all.
        let v = builder.build(&order(), &snapshot(), mid_session());

        let idx = |name: &str| {
            schema
                .feature_names
                .iter()
                .position(|n| n == name)
                .unwrap()
        };
        assert_eq!(v[idx("ndx_close")], 0.0);
        assert_eq!(v[idx("ndx_sma_20")], 0.0);
    }

    #[test]
    fn test_strategy_one_hot() {
        let schema = schema();
        let builder = FeatureVectorBuilder::new(schema.clone());
        let v = builder.build(&order(), &snapshot(), mid_session());

        let idx = |name: &str| {
            schema
                .feature_names
                .iter()
                .position(|n| n == name)
                .unwrap()
        };
        assert_eq!(v[idx("strategy_butterfly")], 1.0);
        assert_eq!(v[idx("strategy_iron_condor")], 0.0);
        assert_eq!(v[idx("strategy_vertical")], 0.0);
        assert_eq!(v[idx("strategy_sonar")], 0.0);
    }

    #[test]
    fn test_vix_regime_buckets() {
        let schema = schema();
        let builder = FeatureVectorBuilder::new(schema.clone());
        let mut snap = snapshot();

        let idx = |name: &str| {
            schema
                .feature_names
                .iter()
                .position(|n| n == name)
                .unwrap()
        };

        let v = builder.build(&order(), &snap, mid_session());
        assert_eq!(v[idx("vix_regime_normal")], 1.0);
        assert_eq!(v[idx("vix_regime_low")], 0.0);

        snap.vix.as_mut().unwrap().last = 27.5;
        let v = builder.build(&order(), &snap, mid_session());
        assert_eq!(v[idx("vix_regime_high")], 1.0);
        assert_eq!(v[idx("vix_regime_normal")], 0.0);
    }

    #[test]
    fn test_premium_normalization_and_price_diff() {
        let schema = schema();
        let builder = FeatureVectorBuilder::new(schema.clone());
        let v = builder.build(&order(), &snapshot(), mid_session());

        let idx = |name: &str| {
            schema
                .feature_names
                .iter()
                .position(|n| n == name)
                .unwrap()
        };
        assert!((v[idx("premium_normalized")] - 1.50 / 5800.0).abs() < 1e-12);
        assert!((v[idx("predicted_price_diff")] - 50.0 / 5800.0).abs() < 1e-12);
    }

    #[test]
    fn test_market_session_flags() {
        let schema = schema();
        let builder = FeatureVectorBuilder::new(schema.clone());
        let idx = |name: &str| {
            schema
                .feature_names
                .iter()
                .position(|n| n == name)
                .unwrap()
        };

        let v = builder.build(&order(), &snapshot(), mid_session());
        assert_eq!(v[idx("is_market_open")], 1.0);
        assert_eq!(v[idx("minutes_to_close")], 345.0);

        // Saturday 2026-03-07 10:15 ET.
        let weekend = Utc.with_ymd_and_hms(2026, 3, 7, 15, 15, 0).unwrap();
        let v = builder.build(&order(), &snapshot(), weekend);
        assert_eq!(v[idx("is_market_open")], 0.0);
        assert_eq!(v[idx("minutes_to_close")], 0.0);
    }

    #[test]
    fn test_bias_agreement_flag() {
        let schema = schema();
        let builder = FeatureVectorBuilder::new(schema.clone());
        let idx = |name: &str| {
            schema
                .feature_names
                .iter()
                .position(|n| n == name)
                .unwrap()
        };

        let mut order = order();
        order.short_term_bias = Some(0.8);
        order.long_term_bias = Some(0.3);
        let v = builder.build(&order, &snapshot(), mid_session());
        assert_eq!(v[idx("bias_agreement")], 1.0);

        order.long_term_bias = Some(-0.3);
        let v = builder.build(&order, &snapshot(), mid_session());
        assert_eq!(v[idx("bias_agreement")], 0.0);
    }
}
