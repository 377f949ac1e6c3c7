use tracing_subscriber::{fmt, EnvFilter};

use crate::{QueueError, QueueResult};

/// Log output format for [`init_tracing`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install a global subscriber filtered by `RUST_LOG`, falling back to `default_filter`.
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(default_filter: &str, format: LogFormat) -> QueueResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| QueueError::Configuration(format!("invalid log filter: {}", e)))?;

    let builder = fmt().with_env_filter(filter).with_target(true);
    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| QueueError::Internal(format!("failed to install tracing subscriber: {}", e)))
}
