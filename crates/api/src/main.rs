//! Order service entry point.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use orderflow_api::config::Config;
use orderflow_api::payment::PaymentClient;
use orderflow_api::routes::{router, AppContext};
use orderflow_api::service::OrderService;
use orderflow_api::telemetry;
use orderflow_common::idempotency::{
    IdempotencyStore, DEFAULT_RETENTION, DEFAULT_SWEEP_INTERVAL,
};
use orderflow_common::resilience::{BreakerPolicy, RetryPolicy};
use orderflow_domain::OrderError;

#[tokio::main]
async fn main() -> Result<(), OrderError> {
    let config = Config::from_env()?;
    let guard = telemetry::init("order-service", &config.otel_collector_endpoint)?;

    let payment = PaymentClient::new(&config.payment_service_url)?;
    let idempotency = Arc::new(IdempotencyStore::new(DEFAULT_RETENTION));
    let shutdown = CancellationToken::new();
    let sweeper = idempotency.spawn_sweeper(DEFAULT_SWEEP_INTERVAL, shutdown.clone());

    let orders = OrderService::new(
        payment,
        config.payment_budget(),
        RetryPolicy::default(),
        BreakerPolicy::new("payment-service"),
        config.max_concurrent_payments,
        Arc::clone(&idempotency),
    );

    let app = router(Arc::new(AppContext { orders }));
    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .map_err(|err| OrderError::Config(format!("binding port {}: {err}", config.port)))?;

    info!(
        port = config.port,
        payment_url = %config.payment_service_url,
        "order service listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .map_err(|err| OrderError::Internal(format!("http server failed: {err}")))?;

    shutdown.cancel();
    let _ = sweeper.await;
    guard.shutdown();
    info!("order service stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install the SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
