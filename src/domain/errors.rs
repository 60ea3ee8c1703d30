use thiserror::Error;

/// Errors raised by a market data source. The resolver absorbs all of
/// these and degrades down its fallback chain.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("no market data subscription for {symbol}")]
    SubscriptionMissing { symbol: String },

    #[error("request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("invalid payload from source: {reason}")]
    InvalidData { reason: String },
}

impl SourceError {
    /// Terminal errors demote the source for that symbol until the
    /// cool-down elapses. Everything else is transient and retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SourceError::SubscriptionMissing { .. })
    }
}

/// Errors raised past the resolver. These are not recoverable locally and
/// surface to the orchestrator as a typed failed prediction.
#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("no model available for {symbol}/{strategy}")]
    NoModelAvailable { symbol: String, strategy: String },

    #[error("feature vector has {got} features, model expects {expected}")]
    FeatureMismatch { expected: usize, got: usize },

    #[error("inference failed: {reason}")]
    Inference { reason: String },

    #[error("batch budget exceeded after {budget_ms}ms")]
    BatchBudgetExceeded { budget_ms: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(
            SourceError::SubscriptionMissing {
                symbol: "SPX".to_string()
            }
            .is_terminal()
        );
        assert!(
            !SourceError::Timeout { duration_ms: 1500 }.is_terminal()
        );
        assert!(
            !SourceError::Unavailable {
                reason: "connection refused".to_string()
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_prediction_error_formatting() {
        let err = PredictionError::FeatureMismatch {
            expected: 74,
            got: 60,
        };
        let msg = err.to_string();
        assert!(msg.contains("74"));
        assert!(msg.contains("60"));

        let err = PredictionError::NoModelAvailable {
            symbol: "SPX".to_string(),
            strategy: "butterfly".to_string(),
        };
        assert!(err.to_string().contains("SPX/butterfly"));
    }
}
