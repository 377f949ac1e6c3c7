use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    QueueError, QueueResult,
    bridge::EventBridge,
    broker::Broker,
    bus::EventBus,
    cleaner::{CleanerHandle, LifecycleCleaner},
    config::QueueConfig,
    control::QueueControl,
    dispatcher::JobDispatcher,
    observability::LiveMetrics,
    processor::{JobProcessor, ProcessorRegistry},
    registry::QueueRegistry,
    worker::{WorkerHandle, WorkerPool},
};

/// Wires every component together from one [`QueueConfig`].
///
/// `start` registers the configured queues, subscribes the event bridge to
/// each of them and starts the sweep schedule. `shutdown` stops workers,
/// then the cleaner, then closes every broker subscription.
pub struct QueueEngine {
    config: QueueConfig,
    bus: EventBus,
    registry: Arc<QueueRegistry>,
    metrics: Arc<LiveMetrics>,
    dispatcher: JobDispatcher,
    bridge: Arc<EventBridge>,
    cleaner: Arc<LifecycleCleaner>,
    control: QueueControl,
    processors: ProcessorRegistry,
    cleaner_handle: Mutex<Option<CleanerHandle>>,
    worker_handle: Mutex<Option<WorkerHandle>>,
}

impl QueueEngine {
    pub async fn start(broker: Arc<dyn Broker>, config: QueueConfig) -> QueueResult<Self> {
        config.validate()?;

        let bus = EventBus::new(config.event_bus_capacity);
        let metrics = Arc::new(LiveMetrics::new());
        let registry = Arc::new(QueueRegistry::new(broker));
        registry.register_all(config.queues.clone()).await?;

        let bridge = Arc::new(EventBridge::new(registry.clone(), bus.clone()));
        if let Err(err) = bridge.ensure_subscribed_all().await {
            bridge.close_all().await;
            return Err(err);
        }

        let cleaner = Arc::new(LifecycleCleaner::new(registry.clone(), metrics.clone()));
        let cleaner_handle = if config.cleaner.enabled {
            match cleaner.clone().spawn(config.cleaner.schedule.clone()) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    bridge.close_all().await;
                    return Err(err);
                }
            }
        } else {
            None
        };

        info!(queues = registry.len(), cleaner = config.cleaner.enabled, "Queue engine started");

        Ok(Self {
            dispatcher: JobDispatcher::new(registry.clone(), bus.clone(), metrics.clone()),
            control: QueueControl::new(registry.clone()),
            processors: ProcessorRegistry::new(registry.clone()),
            cleaner_handle: Mutex::new(cleaner_handle),
            worker_handle: Mutex::new(None),
            config,
            bus,
            registry,
            metrics,
            bridge,
            cleaner,
        })
    }

    /// Bind a processor to a queue; takes effect on the next `start_workers`
    pub fn register_processor(
        &self,
        queue: &str,
        processor: Arc<dyn JobProcessor>,
        concurrency: Option<usize>,
    ) -> QueueResult<()> {
        self.processors.register(queue, processor, concurrency)
    }

    /// Start one worker loop per queue with a processor
    pub async fn start_workers(&self) -> QueueResult<()> {
        let mut slot = self.worker_handle.lock().await;
        if slot.is_some() {
            return Err(QueueError::configuration("workers are already running"));
        }
        if self.processors.is_empty() {
            warn!("Starting workers with no processors registered");
        }
        *slot = Some(WorkerPool::start(
            &self.processors,
            self.config.worker.clone(),
            self.metrics.clone(),
        )?);
        Ok(())
    }

    /// Stop everything the engine started. Safe to call more than once.
    pub async fn shutdown(&self) -> QueueResult<()> {
        let workers = self.worker_handle.lock().await.take();
        if let Some(workers) = workers {
            workers.shutdown().await?;
        }

        let cleaner = self.cleaner_handle.lock().await.take();
        if let Some(cleaner) = cleaner {
            cleaner.shutdown().await?;
        }

        self.bridge.close_all().await;
        info!("Queue engine stopped");
        Ok(())
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    pub fn control(&self) -> &QueueControl {
        &self.control
    }

    pub fn cleaner(&self) -> &Arc<LifecycleCleaner> {
        &self.cleaner
    }

    pub fn bridge(&self) -> &Arc<EventBridge> {
        &self.bridge
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<QueueRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<LiveMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::cleaner::SweepSchedule;
    use crate::config::CleanerConfig;
    use crate::processor::processor_fn;
    use crate::types::{Job, QueueDefinition};
    use serde_json::Value;

    #[tokio::test]
    async fn test_start_subscribes_every_stock_queue() {
        let broker = MemoryBroker::new();
        let engine = QueueEngine::start(Arc::new(broker.clone()), QueueConfig::default())
            .await
            .unwrap();

        assert_eq!(engine.registry().len(), 5);
        assert_eq!(engine.bridge().subscription_count().await, 5);
        for name in engine.registry().names() {
            assert_eq!(broker.listener_count(&name), 1);
        }

        engine.shutdown().await.unwrap();
        for name in engine.registry().names() {
            assert_eq!(broker.listener_count(&name), 0);
        }
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_fatal() {
        let config = QueueConfig::empty()
            .with_queue(QueueDefinition::new("a"))
            .with_queue(QueueDefinition::new("a"));
        let result = QueueEngine::start(Arc::new(MemoryBroker::new()), config).await;
        assert!(matches!(result, Err(QueueError::Configuration(_))));

        let config = QueueConfig::empty().with_cleaner(CleanerConfig {
            enabled: true,
            schedule: SweepSchedule::cron("every tuesday"),
        });
        let result = QueueEngine::start(Arc::new(MemoryBroker::new()), config).await;
        assert!(matches!(result, Err(QueueError::Configuration(_))));

        let config = QueueConfig::default().with_cleaner(CleanerConfig {
            enabled: true,
            schedule: SweepSchedule::Every { interval_secs: u64::MAX },
        });
        let result = QueueEngine::start(Arc::new(MemoryBroker::new()), config).await;
        assert!(matches!(result, Err(QueueError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_workers_start_once() {
        let engine = QueueEngine::start(Arc::new(MemoryBroker::new()), QueueConfig::default())
            .await
            .unwrap();
        engine
            .register_processor("email-queue", processor_fn(|_job: Job| async move { Ok(Value::Null) }), None)
            .unwrap();

        engine.start_workers().await.unwrap();
        assert!(matches!(engine.start_workers().await, Err(QueueError::Configuration(_))));
        engine.shutdown().await.unwrap();
    }
}
