use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::info;

use crate::{
    JobError, QueueError, QueueResult,
    broker::QueueHandle,
    registry::QueueRegistry,
    types::{Job, MAX_CONCURRENCY},
};

/// Executes the jobs of one queue
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Run the job; the returned value is stored as the job's return value
    async fn process(&self, job: &Job) -> Result<Value, JobError>;
}

struct FnProcessor<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobProcessor for FnProcessor<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, JobError>> + Send,
{
    async fn process(&self, job: &Job) -> Result<Value, JobError> {
        (self.f)(job.clone()).await
    }
}

/// Wrap an async closure as a processor
pub fn processor_fn<F, Fut>(f: F) -> Arc<dyn JobProcessor>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
{
    Arc::new(FnProcessor { f })
}

/// A processor bound to a queue with its worker concurrency
#[derive(Clone)]
pub struct ProcessorBinding {
    pub processor: Arc<dyn JobProcessor>,
    pub concurrency: usize,
}

/// Explicit table of queue → processor
pub struct ProcessorRegistry {
    queues: Arc<QueueRegistry>,
    bindings: RwLock<HashMap<String, ProcessorBinding>>,
}

impl ProcessorRegistry {
    pub fn new(queues: Arc<QueueRegistry>) -> Self {
        Self {
            queues,
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Bind `processor` to a registered queue.
    /// Concurrency defaults to the queue's own.
    pub fn register(
        &self,
        queue: &str,
        processor: Arc<dyn JobProcessor>,
        concurrency: Option<usize>,
    ) -> QueueResult<()> {
        let handle = self.queues.resolve(queue)?;
        let concurrency = concurrency.unwrap_or_else(|| handle.concurrency());
        if concurrency == 0 || concurrency > MAX_CONCURRENCY {
            return Err(QueueError::Configuration(format!(
                "processor for '{}' needs a concurrency between 1 and {}",
                queue, MAX_CONCURRENCY
            )));
        }

        let mut bindings = self.bindings.write();
        if bindings.contains_key(queue) {
            return Err(QueueError::Configuration(format!(
                "queue '{}' already has a processor",
                queue
            )));
        }
        bindings.insert(queue.to_string(), ProcessorBinding { processor, concurrency });
        info!(queue = %queue, concurrency, "Registered processor");
        Ok(())
    }

    pub fn get(&self, queue: &str) -> Option<ProcessorBinding> {
        self.bindings.read().get(queue).cloned()
    }

    pub fn contains(&self, queue: &str) -> bool {
        self.bindings.read().contains_key(queue)
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Every binding with its queue handle, sorted by queue name
    pub fn bindings(&self) -> QueueResult<Vec<(QueueHandle, ProcessorBinding)>> {
        let bindings = self.bindings.read().clone();
        let mut resolved = bindings
            .into_iter()
            .map(|(queue, binding)| Ok((self.queues.resolve(&queue)?, binding)))
            .collect::<QueueResult<Vec<_>>>()?;
        resolved.sort_by(|a, b| a.0.name().cmp(b.0.name()));
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::types::{JobOptions, QueueDefinition};
    use chrono::Utc;
    use serde_json::json;

    async fn processors() -> ProcessorRegistry {
        let registry = Arc::new(QueueRegistry::new(Arc::new(MemoryBroker::new())));
        registry
            .register(QueueDefinition::new("email-queue").with_concurrency(5))
            .await
            .unwrap();
        ProcessorRegistry::new(registry)
    }

    fn echo() -> Arc<dyn JobProcessor> {
        processor_fn(|job: Job| async move { Ok(job.payload) })
    }

    #[tokio::test]
    async fn test_register_defaults_to_queue_concurrency() {
        let processors = processors().await;
        processors.register("email-queue", echo(), None).unwrap();

        assert_eq!(processors.get("email-queue").unwrap().concurrency, 5);
        assert_eq!(processors.bindings().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_rejections() {
        let processors = processors().await;

        assert!(matches!(
            processors.register("sms-queue", echo(), None),
            Err(QueueError::QueueNotFound(_))
        ));
        for concurrency in [0, MAX_CONCURRENCY + 1, usize::MAX] {
            assert!(matches!(
                processors.register("email-queue", echo(), Some(concurrency)),
                Err(QueueError::Configuration(_))
            ));
        }

        processors.register("email-queue", echo(), Some(2)).unwrap();
        assert!(matches!(
            processors.register("email-queue", echo(), None),
            Err(QueueError::Configuration(_))
        ));
        assert_eq!(processors.get("email-queue").unwrap().concurrency, 2);
    }

    #[tokio::test]
    async fn test_processor_fn_runs_closure() {
        let def = QueueDefinition::new("email-queue");
        let job = Job {
            id: crate::JobId::new(),
            queue_name: "email-queue".to_string(),
            job_type: "welcome-email".to_string(),
            payload: json!({"to": "a@b.c"}),
            options: JobOptions::new().resolve(&def),
            enqueued_at: Utc::now(),
        };

        let result = echo().process(&job).await.unwrap();
        assert_eq!(result, json!({"to": "a@b.c"}));

        let failing = processor_fn(|_job: Job| async move { Err(JobError::permanent("bad address")) });
        assert!(!failing.process(&job).await.unwrap_err().is_retryable());
    }
}
