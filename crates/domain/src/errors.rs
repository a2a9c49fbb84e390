//! Error taxonomy for order processing.
//!
//! Each reliability layer reports its own failure kind; the orchestrator is
//! the sole converter into this taxonomy and the HTTP layer maps it onto
//! status codes in exactly one place. No layer swallows an error.

use thiserror::Error;

/// Failures surfaced by the order workflow.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Request validation failed; never reaches the payment stack.
    #[error("invalid request: {0}")]
    BadInput(String),

    /// The bulkhead refused the call, either because the concurrency limit
    /// was reached or the request was cancelled while waiting for a permit.
    #[error("too many concurrent payment calls in flight")]
    BulkheadRejected,

    /// The circuit breaker shed the call without invoking it.
    #[error("{dependency} circuit breaker is open")]
    BreakerOpen { dependency: String },

    /// Every retry attempt failed; carries the final attempt's failure.
    #[error("payment failed after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: String },

    /// The request deadline or the caller's cancellation fired.
    #[error("payment call cancelled before completion")]
    Cancelled,

    /// The dependency answered with a terminal, non-retryable status.
    #[error("payment service rejected the charge ({status}): {message}")]
    Dependency { status: u16, message: String },

    /// Service misconfiguration detected at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invariant violation; a bug rather than an operational condition.
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrderError {
    /// HTTP status the route layer answers with.
    ///
    /// Bulkhead rejection and breaker-open stay 500 rather than 503;
    /// callers do not distinguish overload from dependency failure.
    pub fn status_code(&self) -> u16 {
        match self {
            OrderError::BadInput(_) => 400,
            _ => 500,
        }
    }

    /// Whether the client could reasonably submit the same request again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrderError::BulkheadRejected
                | OrderError::BreakerOpen { .. }
                | OrderError::RetryExhausted { .. }
                | OrderError::Cancelled
        )
    }

    /// Stable label for structured log fields and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            OrderError::BadInput(_) => "bad_input",
            OrderError::BulkheadRejected => "bulkhead_rejected",
            OrderError::BreakerOpen { .. } => "breaker_open",
            OrderError::RetryExhausted { .. } => "retry_exhausted",
            OrderError::Cancelled => "cancelled",
            OrderError::Dependency { .. } => "dependency",
            OrderError::Config(_) => "config",
            OrderError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_input_maps_to_400_everything_else_to_500() {
        assert_eq!(OrderError::BadInput("x".into()).status_code(), 400);
        assert_eq!(OrderError::BulkheadRejected.status_code(), 500);
        assert_eq!(OrderError::BreakerOpen { dependency: "p".into() }.status_code(), 500);
        assert_eq!(OrderError::RetryExhausted { attempts: 3, last: "x".into() }.status_code(), 500);
        assert_eq!(OrderError::Cancelled.status_code(), 500);
        assert_eq!(OrderError::Dependency { status: 404, message: "x".into() }.status_code(), 500);
    }

    #[test]
    fn display_carries_operator_facing_detail() {
        let err = OrderError::RetryExhausted { attempts: 3, last: "payment returned 500".into() };
        assert!(err.to_string().contains("3 attempts"));
        assert!(err.to_string().contains("payment returned 500"));

        let err = OrderError::BreakerOpen { dependency: "payment-service".into() };
        assert!(err.to_string().contains("payment-service"));
    }

    #[test]
    fn retryability_classification() {
        assert!(OrderError::BulkheadRejected.is_retryable());
        assert!(OrderError::Cancelled.is_retryable());
        assert!(!OrderError::BadInput("x".into()).is_retryable());
        assert!(!OrderError::Dependency { status: 400, message: String::new() }.is_retryable());
    }
}
