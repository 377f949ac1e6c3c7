use std::sync::Arc;

use tracing::info;

use crate::{
    BrokerError, QueueError, QueueResult,
    registry::QueueRegistry,
    types::JobCounts,
};

/// Operator controls for registered queues.
///
/// Broker errors are surfaced as-is; nothing here retries.
#[derive(Clone)]
pub struct QueueControl {
    registry: Arc<QueueRegistry>,
}

impl QueueControl {
    pub fn new(registry: Arc<QueueRegistry>) -> Self {
        Self { registry }
    }

    /// Stop handing out jobs; already active jobs run to completion
    pub async fn pause(&self, queue: &str) -> QueueResult<()> {
        let handle = self.registry.resolve(queue)?;
        handle.pause().await.map_err(|e| broker_error(queue, e))?;
        info!(queue = %queue, "Queue paused");
        Ok(())
    }

    pub async fn resume(&self, queue: &str) -> QueueResult<()> {
        let handle = self.registry.resolve(queue)?;
        handle.resume().await.map_err(|e| broker_error(queue, e))?;
        info!(queue = %queue, "Queue resumed");
        Ok(())
    }

    pub async fn is_paused(&self, queue: &str) -> QueueResult<bool> {
        let handle = self.registry.resolve(queue)?;
        handle.is_paused().await.map_err(|e| broker_error(queue, e))
    }

    pub async fn counts(&self, queue: &str) -> QueueResult<JobCounts> {
        let handle = self.registry.resolve(queue)?;
        handle.counts().await.map_err(|e| broker_error(queue, e))
    }
}

fn broker_error(queue: &str, source: BrokerError) -> QueueError {
    QueueError::Broker {
        queue: queue.to_string(),
        source,
    }
}
