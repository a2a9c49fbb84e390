//! Order creation workflow.
//!
//! Composes the reliability stack around the payment call in a fixed order:
//! the idempotency cache first, so duplicates take the shortest path and
//! consume no permits or breaker budget; then the bulkhead, so saturation is
//! never counted as a dependency fault; then the circuit breaker, so one
//! breaker failure is one completed retry cycle; then the retry executor and
//! the HTTP call, bounded together by the payment deadline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{field, info_span, warn, Instrument, Span};
use uuid::Uuid;

use orderflow_common::context::RequestContext;
use orderflow_common::idempotency::IdempotencyStore;
use orderflow_common::resilience::{
    BreakerError, BreakerPolicy, Bulkhead, BulkheadError, CircuitBreaker, RetryError,
    RetryExecutor, RetryPolicy,
};
use orderflow_domain::types::format_created_at;
use orderflow_domain::{
    CachedOrder, ChargeRequest, CreateOrderRequest, CreateOrderResponse, OrderError,
};

use crate::payment::{ChargeError, PaymentClient};

/// Simulated persistence latency; stands in for a durable write.
const PERSIST_LATENCY: Duration = Duration::from_millis(10);

/// Order workflow with its per-dependency reliability state.
///
/// One instance lives for the process lifetime; the breaker, bulkhead, and
/// idempotency store inside it are shared by every request.
pub struct OrderService {
    payment: PaymentClient,
    payment_budget: Duration,
    retry: RetryExecutor,
    breaker: CircuitBreaker,
    bulkhead: Bulkhead,
    idempotency: Arc<IdempotencyStore<CachedOrder>>,
}

impl OrderService {
    pub fn new(
        payment: PaymentClient,
        payment_budget: Duration,
        retry: RetryPolicy,
        breaker: BreakerPolicy,
        max_concurrent: usize,
        idempotency: Arc<IdempotencyStore<CachedOrder>>,
    ) -> Self {
        Self {
            payment,
            payment_budget,
            retry: RetryExecutor::new(retry),
            breaker: CircuitBreaker::new(breaker),
            bulkhead: Bulkhead::new(max_concurrent),
            idempotency,
        }
    }

    /// Create an order: consult the idempotency cache, charge the payment
    /// dependency through the reliability stack, persist, cache, respond.
    pub async fn create_order(
        &self,
        ctx: &RequestContext,
        request: CreateOrderRequest,
        idempotency_key: &str,
    ) -> Result<CreateOrderResponse, OrderError> {
        let span = info_span!(
            "createOrder",
            merchant.id = %request.merchant_id,
            order.amount = request.amount,
            order.currency = %request.currency,
            order.id = field::Empty,
            idempotency.key = field::Empty,
            otel.status_code = field::Empty,
        );

        let result = self
            .create_order_inner(ctx, request, idempotency_key)
            .instrument(span.clone())
            .await;

        if let Err(error) = &result {
            span.record("otel.status_code", "ERROR");
            warn!(parent: &span, error = %error, kind = error.label(), "order creation failed");
        }
        result
    }

    async fn create_order_inner(
        &self,
        ctx: &RequestContext,
        request: CreateOrderRequest,
        idempotency_key: &str,
    ) -> Result<CreateOrderResponse, OrderError> {
        // duplicates return the original outcome before any permit or
        // breaker budget is consumed
        if !idempotency_key.is_empty() {
            Span::current().record("idempotency.key", idempotency_key);
            if let Some(cached) = self.idempotency.get(idempotency_key).await {
                tracing::info!(order.id = %cached.order_id, "idempotent_request_cached");
                return Ok(cached.to_response());
            }
        }

        let order_id = Uuid::new_v4().to_string();
        Span::current().record("order.id", order_id.as_str());

        let charge = ChargeRequest {
            order_id: order_id.clone(),
            merchant_id: request.merchant_id.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
        };

        self.call_payment(ctx, &charge).await?;
        self.persist_order(&order_id).await;

        let created_at = Utc::now();
        let response = CreateOrderResponse {
            order_id: order_id.clone(),
            status: "completed".to_string(),
            created_at: format_created_at(created_at),
        };

        if !idempotency_key.is_empty() {
            let cached =
                CachedOrder { order_id, status: "completed".to_string(), created_at };
            self.idempotency.set(idempotency_key, cached).await;
        }

        Ok(response)
    }

    /// Charge the payment dependency through the composed stack:
    /// `bulkhead(parent ctx) → breaker → retry(deadline ctx) → HTTP`.
    async fn call_payment(
        &self,
        ctx: &RequestContext,
        charge: &ChargeRequest,
    ) -> Result<(), OrderError> {
        let span = info_span!(
            "callPayment",
            timeout_ms = self.payment_budget.as_millis() as u64,
            cb.state = field::Empty,
            cb.open = field::Empty,
            bulkhead.max = field::Empty,
            bulkhead.rejected = field::Empty,
            retry.attempt = field::Empty,
            retry.backoff_ms = field::Empty,
            retry.succeeded = field::Empty,
            retry.exhausted = field::Empty,
            otel.status_code = field::Empty,
        );

        // the budget clock starts before the bulkhead: time spent waiting
        // for a permit comes out of the payment deadline
        let payment_ctx = ctx.with_budget(self.payment_budget);

        let result = self
            .bulkhead
            .execute(ctx, || async {
                self.breaker
                    .execute(|| async {
                        self.retry
                            .execute(&payment_ctx, |_attempt| self.payment.charge(charge))
                            .await
                    })
                    .await
            })
            .instrument(span.clone())
            .await;

        match result {
            Ok(_status) => Ok(()),
            Err(error) => {
                span.record("otel.status_code", "ERROR");
                Err(flatten_stack_error(error))
            }
        }
    }

    /// Simulated durable write; real persistence is outside this service.
    async fn persist_order(&self, order_id: &str) {
        let span = info_span!("persistOrder", order.id = %order_id);
        async {
            tokio::time::sleep(PERSIST_LATENCY).await;
        }
        .instrument(span)
        .await;
    }

    /// The breaker the payment stack runs behind; exposed for observability.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The bulkhead the payment stack runs behind; exposed for observability.
    pub fn bulkhead(&self) -> &Bulkhead {
        &self.bulkhead
    }
}

/// Collapse the layered stack error into the taxonomy the HTTP surface
/// exposes. Each layer's failure maps to exactly one kind; nothing is
/// swallowed.
fn flatten_stack_error(
    error: BulkheadError<BreakerError<RetryError<ChargeError>>>,
) -> OrderError {
    match error {
        BulkheadError::Rejected => OrderError::BulkheadRejected,
        BulkheadError::Operation(BreakerError::Open { dependency }) => {
            OrderError::BreakerOpen { dependency }
        }
        BulkheadError::Operation(BreakerError::Operation(retry)) => match retry {
            RetryError::Cancelled => OrderError::Cancelled,
            RetryError::Exhausted { attempts, last } => {
                OrderError::RetryExhausted { attempts, last: last.to_string() }
            }
            RetryError::NonRetryable(ChargeError::Rejected { status, body }) => {
                OrderError::Dependency { status, message: body }
            }
            RetryError::NonRetryable(other) => {
                // retryable classes never surface here; keep the detail
                OrderError::Internal(format!("unexpected terminal failure: {other}"))
            }
        },
    }
}
