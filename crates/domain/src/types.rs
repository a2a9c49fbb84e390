//! Request, response, and cached-record payloads.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Incoming order creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub merchant_id: String,
    pub amount: f64,
    pub currency: String,
}

impl CreateOrderRequest {
    /// Validate business constraints before any downstream work happens.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.merchant_id.trim().is_empty() {
            return Err("merchant_id is required".to_string());
        }
        if self.amount <= 0.0 {
            return Err(format!("amount must be greater than 0, got {}", self.amount));
        }
        if self.currency.trim().is_empty() {
            return Err("currency is required".to_string());
        }
        Ok(())
    }
}

/// Successful order creation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order_id: String,
    pub status: String,
    /// RFC 3339 UTC timestamp of first completion.
    pub created_at: String,
}

/// Payload POSTed to the payment dependency's `/charge` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub order_id: String,
    pub merchant_id: String,
    pub amount: f64,
    pub currency: String,
}

/// Response record cached under an idempotency key after an order completes.
///
/// Replays render the same `order_id` and `created_at` the first completion
/// produced, so a client retrying a submission observes one order, not two.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedOrder {
    pub order_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl CachedOrder {
    /// Render the cached record as the wire response.
    pub fn to_response(&self) -> CreateOrderResponse {
        CreateOrderResponse {
            order_id: self.order_id.clone(),
            status: self.status.clone(),
            created_at: format_created_at(self.created_at),
        }
    }
}

/// Canonical `created_at` rendering; fresh responses and cached replays must
/// produce byte-identical strings for the same instant.
pub fn format_created_at(created_at: DateTime<Utc>) -> String {
    created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn validate_accepts_well_formed_request() {
        let request = CreateOrderRequest {
            merchant_id: "m-1".to_string(),
            amount: 10.0,
            currency: "USD".to_string(),
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_merchant() {
        let request = CreateOrderRequest {
            merchant_id: "  ".to_string(),
            amount: 10.0,
            currency: "USD".to_string(),
        };
        let err = request.validate().unwrap_err();
        assert!(err.contains("merchant_id"));
    }

    #[test]
    fn validate_rejects_non_positive_amount() {
        let request = CreateOrderRequest {
            merchant_id: "m-1".to_string(),
            amount: 0.0,
            currency: "USD".to_string(),
        };
        assert!(request.validate().is_err());

        let request = CreateOrderRequest { amount: -3.5, ..request };
        assert!(request.validate().is_err());
    }

    #[test]
    fn validate_rejects_missing_currency() {
        let request = CreateOrderRequest {
            merchant_id: "m-1".to_string(),
            amount: 10.0,
            currency: String::new(),
        };
        assert!(request.validate().is_err());
    }

    /// A cached replay must serialize `created_at` byte-identically to the
    /// response produced on first completion.
    #[test]
    fn cached_order_replays_identical_timestamp() {
        let created_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap();
        let cached = CachedOrder {
            order_id: "o-1".to_string(),
            status: "completed".to_string(),
            created_at,
        };

        let replay = cached.to_response();
        assert_eq!(replay.created_at, format_created_at(created_at));
        assert_eq!(replay.created_at, "2024-03-01T12:30:45Z");
    }

    #[test]
    fn charge_request_serializes_expected_fields() {
        let charge = ChargeRequest {
            order_id: "o-1".to_string(),
            merchant_id: "m-1".to_string(),
            amount: 12.5,
            currency: "EUR".to_string(),
        };

        let value = serde_json::to_value(&charge).unwrap();
        assert_eq!(value["order_id"], "o-1");
        assert_eq!(value["merchant_id"], "m-1");
        assert_eq!(value["amount"], 12.5);
        assert_eq!(value["currency"], "EUR");
    }
}
