//! Observability: structured logging and operational counters.
//!
//! The system degrades by dropping low-priority data, never by crashing, so
//! capacity pressure and link failures must be visible from the outside:
//! every such event increments a monotonic counter and emits one structured
//! log line.

mod logger;
mod metrics;

pub use logger::{Logger, Severity};
pub use metrics::MetricsRegistry;
