//! # Orderflow API
//!
//! The order service: HTTP surface, environment configuration, telemetry
//! bootstrap, and the request orchestrator that wraps the outbound payment
//! call in the reliability stack (idempotency cache, bulkhead, circuit
//! breaker, retry, deadline).
//!
//! ## Architecture
//! - `config` reads the environment once at startup
//! - `telemetry` installs the tracing subscriber and OTLP export
//! - `payment` is the leaf HTTP client with per-attempt classification
//! - `service` composes the stack; it is the only place errors are converted
//!   into the domain taxonomy
//! - `routes` binds the axum surface and maps errors onto status codes

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod config;
pub mod payment;
pub mod routes;
pub mod service;
pub mod telemetry;

pub use config::Config;
pub use routes::AppContext;
pub use service::OrderService;
