//! Service configuration sourced from the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use orderflow_domain::OrderError;

/// Order service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// TCP port the HTTP server binds.
    pub port: u16,
    /// Base URL of the payment dependency.
    pub payment_service_url: String,
    /// OTLP collector endpoint spans are exported to.
    pub otel_collector_endpoint: String,
    /// Hard budget for one payment call, retries and backoffs included.
    pub payment_budget_ms: u64,
    /// Maximum concurrent payment calls.
    pub max_concurrent_payments: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            payment_service_url: "http://payment-service:8081".to_string(),
            otel_collector_endpoint: "otel-collector:4317".to_string(),
            payment_budget_ms: 500,
            max_concurrent_payments: 10,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// Recognized variables: `PORT`, `PAYMENT_SERVICE_URL`,
    /// `OTEL_COLLECTOR_ENDPOINT`.
    pub fn from_env() -> Result<Self, OrderError> {
        let defaults = Self::default();

        let port = match std::env::var("PORT") {
            Ok(raw) if !raw.is_empty() => raw.parse().map_err(|_| {
                OrderError::Config(format!("PORT must be a TCP port number, got {raw:?}"))
            })?,
            _ => defaults.port,
        };

        Ok(Self {
            port,
            payment_service_url: env_or("PAYMENT_SERVICE_URL", defaults.payment_service_url),
            otel_collector_endpoint: env_or(
                "OTEL_COLLECTOR_ENDPOINT",
                defaults.otel_collector_endpoint,
            ),
            ..defaults
        })
    }

    pub fn payment_budget(&self) -> Duration {
        Duration::from_millis(self.payment_budget_ms)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).ok().filter(|value| !value.is_empty()).unwrap_or(default)
}
