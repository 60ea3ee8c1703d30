//! Rolling indicator math over close series.
//!
//! Every function returns `None` when the series is too short for the
//! requested period; the feature builder maps that to 0.0.

/// Simple moving average of the trailing `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Percent change over the trailing `period` values.
pub fn momentum(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }
    let prev = values[values.len() - 1 - period];
    if prev.abs() < 1e-10 {
        return None;
    }
    let last = values[values.len() - 1];
    Some((last - prev) / prev)
}

/// Standard deviation of simple returns over the trailing `period` bars.
pub fn realized_volatility(values: &[f64], period: usize) -> Option<f64> {
    if period < 2 || values.len() < period + 1 {
        return None;
    }
    let window = &values[values.len() - period - 1..];
    let mut returns = Vec::with_capacity(period);
    for i in 1..window.len() {
        if window[i - 1].abs() < 1e-10 {
            return None;
        }
        returns.push((window[i] - window[i - 1]) / window[i - 1]);
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt())
}

/// Wilder RSI over the trailing `period` values.
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }
    let window = &values[values.len() - period - 1..];

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..window.len() {
        let delta = window[i] - window[i - 1];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss < 1e-10 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Position of the last value inside the trailing `period` range,
/// 0.0 at the low, 1.0 at the high.
pub fn range_position(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let high = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let low = window.iter().cloned().fold(f64::INFINITY, f64::min);

    let range = high - low;
    if range < 1e-10 {
        return Some(0.5);
    }
    Some((window[window.len() - 1] - low) / range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&values, 3), Some(4.0));
        assert_eq!(sma(&values, 5), Some(3.0));
        assert_eq!(sma(&values, 6), None);
    }

    #[test]
    fn test_momentum() {
        let values = vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0];
        let m = momentum(&values, 5).unwrap();
        assert!((m - 0.05).abs() < 1e-10);
        assert_eq!(momentum(&values, 6), None);
    }

    #[test]
    fn test_rsi_all_gains() {
        let values: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&values, 14), Some(100.0));
    }

    #[test]
    fn test_rsi_all_losses_near_zero() {
        let values: Vec<f64> = (0..20).map(|i| 200.0 - i as f64).collect();
        let r = rsi(&values, 14).unwrap();
        assert!(r < 1.0, "RSI for a falling series should be ~0, got {}", r);
    }

    #[test]
    fn test_rsi_balanced() {
        let mut values = vec![100.0];
        for i in 0..20 {
            let last = *values.last().unwrap();
            values.push(last + if i % 2 == 0 { 1.0 } else { -1.0 });
        }
        let r = rsi(&values, 14).unwrap();
        assert!((r - 50.0).abs() < 10.0, "Balanced RSI should be near 50, got {}", r);
    }

    #[test]
    fn test_realized_volatility_flat_series() {
        let values = vec![100.0; 30];
        assert_eq!(realized_volatility(&values, 20), Some(0.0));
    }

    #[test]
    fn test_realized_volatility_insufficient() {
        let values = vec![100.0; 10];
        assert_eq!(realized_volatility(&values, 20), None);
    }

    #[test]
    fn test_range_position() {
        let values = vec![10.0, 20.0, 15.0];
        assert_eq!(range_position(&values, 3), Some(0.5));

        let values = vec![10.0, 20.0, 20.0];
        assert_eq!(range_position(&values, 3), Some(1.0));

        let flat = vec![10.0; 5];
        assert_eq!(range_position(&flat, 5), Some(0.5));
    }
}
