//! # Orderflow Domain
//!
//! Plain domain types shared across the orderflow services: request and
//! response payloads, the cached idempotent response record, and the error
//! taxonomy. No I/O, no async, no framework types.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod errors;
pub mod types;

pub use errors::OrderError;
pub use types::{CachedOrder, ChargeRequest, CreateOrderRequest, CreateOrderResponse};

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, OrderError>;
