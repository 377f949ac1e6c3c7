use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, instrument};

use crate::{
    QueueError, QueueResult,
    bus::EventBus,
    observability::LiveMetrics,
    registry::QueueRegistry,
    types::{BulkItem, Job, JobId, JobOptions, JobPayload, JobRecord, JobSubmission, QueueEvent},
};

/// Accepts work for named queues.
///
/// Resolves per-job options against the queue defaults, submits through the
/// queue handle and announces accepted work on the event bus. Nothing is
/// announced when the broker refuses a submission.
#[derive(Clone)]
pub struct JobDispatcher {
    registry: Arc<QueueRegistry>,
    bus: EventBus,
    metrics: Arc<LiveMetrics>,
}

impl JobDispatcher {
    pub fn new(registry: Arc<QueueRegistry>, bus: EventBus, metrics: Arc<LiveMetrics>) -> Self {
        Self { registry, bus, metrics }
    }

    /// Enqueue one job and publish `job.added`
    #[instrument(skip(self, payload, options), fields(queue = %queue, job_type = %job_type))]
    pub async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: Value,
        options: Option<JobOptions>,
    ) -> QueueResult<Job> {
        let handle = self.registry.resolve(queue)?;
        let resolved = options.unwrap_or_default().resolve(handle.definition());
        let submission = JobSubmission {
            job_type: job_type.to_string(),
            payload,
            options: resolved,
            enqueued_at: Utc::now(),
        };

        let job_id = match handle.submit(submission.clone()).await {
            Ok(id) => id,
            Err(source) => {
                self.metrics.record_dispatch_failure(queue);
                error!(error = %source, "Failed to add job to queue");
                return Err(QueueError::Dispatch {
                    queue: queue.to_string(),
                    source,
                });
            }
        };

        let job = into_job(queue, job_id, submission);
        self.metrics.record_enqueued(queue, 1);
        info!(job_id = %job.id, "Job added to queue");
        self.bus.publish(QueueEvent::JobAdded {
            queue_name: job.queue_name.clone(),
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
        });

        Ok(job)
    }

    /// Enqueue a batch atomically and publish one `jobs.bulk_added`
    #[instrument(skip(self, items), fields(queue = %queue, count = items.len()))]
    pub async fn enqueue_bulk(&self, queue: &str, items: Vec<BulkItem>) -> QueueResult<Vec<Job>> {
        let handle = self.registry.resolve(queue)?;
        if items.is_empty() {
            debug!("Empty batch, nothing to submit");
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let submissions: Vec<JobSubmission> = items
            .into_iter()
            .map(|item| JobSubmission {
                options: item.options.unwrap_or_default().resolve(handle.definition()),
                job_type: item.job_type,
                payload: item.payload,
                enqueued_at: now,
            })
            .collect();

        let job_ids = match handle.submit_bulk(submissions.clone()).await {
            Ok(ids) => ids,
            Err(source) => {
                self.metrics.record_dispatch_failure(queue);
                error!(error = %source, "Failed to add bulk jobs to queue");
                return Err(QueueError::Dispatch {
                    queue: queue.to_string(),
                    source,
                });
            }
        };

        if job_ids.len() != submissions.len() {
            return Err(QueueError::Internal(format!(
                "broker returned {} ids for {} jobs on queue '{}'",
                job_ids.len(),
                submissions.len(),
                queue
            )));
        }

        let jobs: Vec<Job> = job_ids
            .into_iter()
            .zip(submissions)
            .map(|(id, submission)| into_job(queue, id, submission))
            .collect();

        self.metrics.record_enqueued(queue, jobs.len() as u64);
        info!(count = jobs.len(), "Bulk jobs added to queue");
        self.bus.publish(QueueEvent::JobsBulkAdded {
            queue_name: queue.to_string(),
            count: jobs.len(),
        });

        Ok(jobs)
    }

    /// Serialize a typed payload and enqueue it on the queue it names
    pub async fn enqueue_typed<J: JobPayload>(&self, job: &J, options: Option<JobOptions>) -> QueueResult<Job> {
        let payload = serde_json::to_value(job)?;
        let options = options.or_else(|| job.options());
        self.enqueue(J::QUEUE, J::JOB_TYPE, payload, options).await
    }

    pub async fn get_job(&self, queue: &str, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        let handle = self.registry.resolve(queue)?;
        handle.get(job_id).await.map_err(|source| QueueError::Broker {
            queue: queue.to_string(),
            source,
        })
    }

    /// Best-effort removal; `false` when the job is absent or anything fails
    pub async fn remove_job(&self, queue: &str, job_id: &JobId) -> bool {
        let handle = match self.registry.resolve(queue) {
            Ok(handle) => handle,
            Err(err) => {
                error!(queue = %queue, job_id = %job_id, error = %err, "Failed to remove job");
                return false;
            }
        };

        match handle.get(job_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return false,
            Err(err) => {
                error!(queue = %queue, job_id = %job_id, error = %err, "Failed to remove job");
                return false;
            }
        }

        match handle.remove(job_id).await {
            Ok(removed) => {
                if removed {
                    info!(queue = %queue, job_id = %job_id, "Job removed from queue");
                }
                removed
            }
            Err(err) => {
                error!(queue = %queue, job_id = %job_id, error = %err, "Failed to remove job");
                false
            }
        }
    }
}

fn into_job(queue: &str, id: JobId, submission: JobSubmission) -> Job {
    Job {
        id,
        queue_name: queue.to_string(),
        job_type: submission.job_type,
        payload: submission.payload,
        options: submission.options,
        enqueued_at: submission.enqueued_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{memory::MemoryBroker, Broker};
    use crate::types::{JobPriority, JobState, QueueDefinition, RetryPolicy};
    use crate::BrokerError;
    use serde::Serialize;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    struct Fixture {
        broker: MemoryBroker,
        dispatcher: JobDispatcher,
        bus: EventBus,
        metrics: Arc<LiveMetrics>,
    }

    async fn fixture() -> Fixture {
        let broker = MemoryBroker::new();
        let registry = Arc::new(QueueRegistry::new(Arc::new(broker.clone())));
        registry
            .register(
                QueueDefinition::new("email-queue")
                    .with_concurrency(5)
                    .with_priority(JobPriority::Normal)
                    .with_retry(RetryPolicy::new(3)),
            )
            .await
            .unwrap();

        let bus = EventBus::new(64);
        let metrics = Arc::new(LiveMetrics::new());
        Fixture {
            dispatcher: JobDispatcher::new(registry, bus.clone(), metrics.clone()),
            broker,
            bus,
            metrics,
        }
    }

    #[tokio::test]
    async fn test_enqueue_resolves_options_and_publishes() {
        let fx = fixture().await;
        let mut events = fx.bus.subscribe();

        let job = fx
            .dispatcher
            .enqueue(
                "email-queue",
                "welcome-email",
                json!({"to": "a@b.c"}),
                Some(JobOptions::new().with_priority(JobPriority::High)),
            )
            .await
            .unwrap();

        assert_eq!(job.options.priority, JobPriority::High);
        assert_eq!(job.options.attempts, 3);

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            QueueEvent::JobAdded {
                queue_name: "email-queue".to_string(),
                job_id: job.id.clone(),
                job_type: "welcome-email".to_string(),
            }
        );
        assert_eq!(fx.metrics.jobs_enqueued(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_unknown_queue() {
        let fx = fixture().await;
        let result = fx.dispatcher.enqueue("sms-queue", "x", json!({}), None).await;
        assert!(matches!(result, Err(QueueError::QueueNotFound(_))));
    }

    #[tokio::test]
    async fn test_broker_failure_publishes_nothing() {
        let fx = fixture().await;
        let mut events = fx.bus.subscribe();
        fx.broker.set_outage("email-queue", true);

        let result = fx.dispatcher.enqueue("email-queue", "welcome-email", json!({}), None).await;
        match result {
            Err(QueueError::Dispatch { queue, source }) => {
                assert_eq!(queue, "email-queue");
                assert!(matches!(source, BrokerError::Unavailable(_)));
            }
            other => panic!("expected dispatch error, got {:?}", other),
        }
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(fx.metrics.dispatch_failures(), 1);
    }

    #[tokio::test]
    async fn test_bulk_enqueue_one_event() {
        let fx = fixture().await;
        let mut events = fx.bus.subscribe();

        let jobs = fx
            .dispatcher
            .enqueue_bulk(
                "email-queue",
                vec![
                    BulkItem::new("a", json!(1)),
                    BulkItem::new("b", json!(2)).with_options(JobOptions::new().with_attempts(1)),
                    BulkItem::new("c", json!(3)),
                ],
            )
            .await
            .unwrap();

        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[1].options.attempts, 1);
        assert_eq!(jobs[0].options.attempts, 3);
        assert_eq!(
            events.recv().await.unwrap(),
            QueueEvent::JobsBulkAdded { queue_name: "email-queue".to_string(), count: 3 }
        );
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_empty_bulk_is_a_noop() {
        let fx = fixture().await;
        let mut events = fx.bus.subscribe();

        let jobs = fx.dispatcher.enqueue_bulk("email-queue", Vec::new()).await.unwrap();
        assert!(jobs.is_empty());
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_bulk_failure_stores_nothing() {
        let fx = fixture().await;
        fx.broker.set_outage("email-queue", true);

        let result = fx
            .dispatcher
            .enqueue_bulk("email-queue", vec![BulkItem::new("a", json!(1)), BulkItem::new("b", json!(2))])
            .await;
        assert!(matches!(result, Err(QueueError::Dispatch { .. })));

        fx.broker.set_outage("email-queue", false);
        assert_eq!(fx.broker.counts("email-queue").await.unwrap().total(), 0);
    }

    #[derive(Serialize)]
    struct WelcomeEmail {
        to: String,
    }

    impl JobPayload for WelcomeEmail {
        const QUEUE: &'static str = "email-queue";
        const JOB_TYPE: &'static str = "welcome-email";

        fn options(&self) -> Option<JobOptions> {
            Some(JobOptions::new().with_priority(JobPriority::Critical))
        }
    }

    #[tokio::test]
    async fn test_enqueue_typed() {
        let fx = fixture().await;
        let job = fx
            .dispatcher
            .enqueue_typed(&WelcomeEmail { to: "a@b.c".to_string() }, None)
            .await
            .unwrap();

        assert_eq!(job.job_type, "welcome-email");
        assert_eq!(job.payload, json!({"to": "a@b.c"}));
        assert_eq!(job.options.priority, JobPriority::Critical);
    }

    #[tokio::test]
    async fn test_get_and_remove_job() {
        let fx = fixture().await;
        let job = fx.dispatcher.enqueue("email-queue", "welcome-email", json!({}), None).await.unwrap();

        let record = fx.dispatcher.get_job("email-queue", &job.id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Waiting);

        assert!(fx.dispatcher.remove_job("email-queue", &job.id).await);
        assert!(fx.dispatcher.get_job("email-queue", &job.id).await.unwrap().is_none());
        assert!(!fx.dispatcher.remove_job("email-queue", &job.id).await);
        assert!(!fx.dispatcher.remove_job("sms-queue", &job.id).await);
    }

    #[tokio::test]
    async fn test_remove_job_swallows_broker_errors() {
        let fx = fixture().await;
        let job = fx.dispatcher.enqueue("email-queue", "welcome-email", json!({}), None).await.unwrap();
        fx.broker.set_outage("email-queue", true);

        assert!(!fx.dispatcher.remove_job("email-queue", &job.id).await);
        let lookup = fx.dispatcher.get_job("email-queue", &job.id).await;
        assert!(matches!(lookup, Err(QueueError::Broker { .. })));
    }
}
