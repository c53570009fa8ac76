//! # Utility Modules
//!
//! Supporting utilities shared by the relay and peers.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe relay counters

pub mod logging;
pub mod metrics;

pub use metrics::{MetricsSnapshot, RelayMetrics};
