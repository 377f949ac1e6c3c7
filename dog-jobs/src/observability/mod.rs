pub mod metrics;

#[cfg(feature = "tracing-basic")]
pub mod tracing;

pub use metrics::{LiveMetrics, MetricsSnapshot, QueueMetrics};

#[cfg(feature = "tracing-basic")]
pub use self::tracing::{init_tracing, LogFormat};
