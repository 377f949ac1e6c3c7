use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument};

use crate::{
    BrokerError, JobError, QueueError, QueueResult,
    broker::QueueHandle,
    observability::LiveMetrics,
    processor::{JobProcessor, ProcessorBinding, ProcessorRegistry},
    types::LeasedJob,
};

/// Worker loop tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pause between claims when a queue has nothing to hand out
    pub poll_interval_ms: u64,
    /// Pause after a failed claim
    pub error_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            error_backoff_ms: 1000,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Handle for managing worker lifecycle
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handles: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Stop claiming and wait for in-flight jobs to finish
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(true);
        for join_handle in self.join_handles {
            join_handle
                .await
                .map_err(|e| QueueError::Internal(format!("Worker join error: {}", e)))?;
        }
        Ok(())
    }

    /// Number of queue loops running
    pub fn queue_count(&self) -> usize {
        self.join_handles.len()
    }
}

/// Runs one claim loop per queue that has a processor
pub struct WorkerPool;

impl WorkerPool {
    pub fn start(
        processors: &ProcessorRegistry,
        config: WorkerConfig,
        metrics: Arc<LiveMetrics>,
    ) -> QueueResult<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let join_handles = processors
            .bindings()?
            .into_iter()
            .map(|(handle, binding)| {
                let worker = QueueWorker {
                    handle,
                    binding,
                    config: config.clone(),
                    metrics: metrics.clone(),
                };
                tokio::spawn(worker.run(shutdown_rx.clone()))
            })
            .collect::<Vec<_>>();

        info!(queues = join_handles.len(), "Started workers");
        Ok(WorkerHandle {
            shutdown_tx,
            join_handles,
        })
    }
}

struct QueueWorker {
    handle: QueueHandle,
    binding: ProcessorBinding,
    config: WorkerConfig,
    metrics: Arc<LiveMetrics>,
}

impl QueueWorker {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let queue = self.handle.name().to_string();
        let concurrency = self.binding.concurrency;
        let permits = Arc::new(Semaphore::new(concurrency));
        info!(queue = %queue, concurrency, "Worker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let permit = tokio::select! {
                _ = shutdown_rx.changed() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let pause = match self.handle.claim().await {
                Ok(Some(leased)) => {
                    let span = tracing::info_span!("job", queue = %queue, job_id = %leased.job_id());
                    tokio::spawn(
                        run_job(
                            self.handle.clone(),
                            self.binding.processor.clone(),
                            leased,
                            self.metrics.clone(),
                            permit,
                        )
                        .instrument(span),
                    );
                    continue;
                }
                Ok(None) => self.config.poll_interval(),
                Err(err) => {
                    error!(queue = %queue, error = %err, "Error claiming job");
                    self.config.error_backoff()
                }
            };
            drop(permit);

            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        // Every permit back means every in-flight job has been acknowledged
        match u32::try_from(concurrency) {
            Ok(total) => {
                let _ = permits.acquire_many(total).await;
            }
            Err(_) => {
                for _ in 0..concurrency {
                    match permits.acquire().await {
                        Ok(permit) => permit.forget(),
                        Err(_) => break,
                    }
                }
            }
        }
        info!(queue = %queue, "Worker stopped");
    }
}

async fn run_job(
    handle: QueueHandle,
    processor: Arc<dyn JobProcessor>,
    leased: LeasedJob,
    metrics: Arc<LiveMetrics>,
    _permit: OwnedSemaphorePermit,
) {
    let record = &leased.record;
    let will_retry_on_error = record.attempts_made + 1 < record.job.options.attempts;
    let lock = handle.definition().stall.stalled_interval();
    let started = Instant::now();
    debug!(job_type = %record.job.job_type, attempt = record.attempts_made + 1, "Processing job");

    let job = record.job.clone();
    let mut work = tokio::spawn(async move { processor.process(&job).await });

    let heartbeat_every = lock / 2;
    let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            result = &mut work => break result,
            _ = heartbeat.tick() => {
                if let Err(err) = handle.extend_lock(&leased, lock).await {
                    warn!(error = %err, "Failed to extend job lock");
                }
            }
        }
    };

    let outcome = outcome.unwrap_or_else(|join_error| {
        Err(JobError::retryable(format!("processor panicked: {}", join_error)))
    });

    match outcome {
        Ok(return_value) => match handle.ack_complete(&leased, return_value).await {
            Ok(()) => {
                metrics.record_completed(handle.name(), started.elapsed());
                info!("Job completed successfully");
            }
            Err(err) => log_ack_error(err),
        },
        Err(job_error) => {
            let retryable = job_error.is_retryable();
            match handle.ack_fail(&leased, job_error.message().to_string(), retryable).await {
                Ok(()) => {
                    let will_retry = retryable && will_retry_on_error;
                    metrics.record_failed(handle.name(), will_retry);
                    if will_retry {
                        warn!(error = %job_error, "Job failed, will retry");
                    } else {
                        error!(error = %job_error, "Job failed permanently");
                    }
                }
                Err(err) => log_ack_error(err),
            }
        }
    }
}

fn log_ack_error(err: BrokerError) {
    match err {
        BrokerError::JobNotFound(_) | BrokerError::Rejected(_) => {
            warn!(error = %err, "Job changed while processing, acknowledgement dropped");
        }
        other => error!(error = %other, "Failed to acknowledge job"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use serde_json::{json, Value};
    use tokio::time::{sleep, timeout};

    use crate::broker::{
        memory::{MemoryBroker, StallMonitor},
        Broker,
    };
    use crate::processor::processor_fn;
    use crate::registry::QueueRegistry;
    use crate::types::{
        BackoffSpec, Job, JobCounts, JobOptions, JobState, JobSubmission, QueueDefinition,
        RetryPolicy, StallSettings,
    };

    struct Fixture {
        broker: MemoryBroker,
        registry: Arc<QueueRegistry>,
        processors: ProcessorRegistry,
        metrics: Arc<LiveMetrics>,
    }

    async fn fixture(definition: QueueDefinition) -> Fixture {
        let broker = MemoryBroker::new();
        let registry = Arc::new(QueueRegistry::new(Arc::new(broker.clone())));
        registry.register(definition).await.unwrap();
        Fixture {
            processors: ProcessorRegistry::new(registry.clone()),
            broker,
            registry,
            metrics: Arc::new(LiveMetrics::new()),
        }
    }

    fn fast() -> WorkerConfig {
        WorkerConfig {
            poll_interval_ms: 5,
            error_backoff_ms: 5,
        }
    }

    async fn submit(fx: &Fixture, queue: &str) -> crate::JobId {
        let handle = fx.registry.resolve(queue).unwrap();
        handle
            .submit(JobSubmission {
                job_type: "test".to_string(),
                payload: json!({"n": 1}),
                options: JobOptions::new().resolve(handle.definition()),
                enqueued_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    async fn wait_for(fx: &Fixture, queue: &str, done: impl Fn(&JobCounts) -> bool) -> JobCounts {
        let handle = fx.registry.resolve(queue).unwrap();
        timeout(Duration::from_secs(5), async {
            loop {
                let counts = handle.counts().await.unwrap();
                if done(&counts) {
                    return counts;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_processes_jobs_to_completion() {
        let fx = fixture(QueueDefinition::new("email-queue")).await;
        fx.processors
            .register("email-queue", processor_fn(|_job: Job| async move { Ok(json!("sent")) }), None)
            .unwrap();
        let job_id = submit(&fx, "email-queue").await;

        let workers = WorkerPool::start(&fx.processors, fast(), fx.metrics.clone()).unwrap();
        wait_for(&fx, "email-queue", |c| c.completed == 1).await;
        workers.shutdown().await.unwrap();

        let record = fx.broker.get("email-queue", &job_id).await.unwrap().unwrap();
        assert_eq!(record.return_value, Some(json!("sent")));
        assert_eq!(fx.metrics.jobs_completed(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_bound_holds() {
        let fx = fixture(QueueDefinition::new("file-processing-queue").with_concurrency(2)).await;
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (r, p) = (running.clone(), peak.clone());
        fx.processors
            .register(
                "file-processing-queue",
                processor_fn(move |_job: Job| {
                    let (running, peak) = (r.clone(), p.clone());
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(30)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(Value::Null)
                    }
                }),
                None,
            )
            .unwrap();
        for _ in 0..6 {
            submit(&fx, "file-processing-queue").await;
        }

        let workers = WorkerPool::start(&fx.processors, fast(), fx.metrics.clone()).unwrap();
        wait_for(&fx, "file-processing-queue", |c| c.completed == 6).await;
        workers.shutdown().await.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried() {
        let def = QueueDefinition::new("notification-queue")
            .with_retry(RetryPolicy::new(2).with_backoff(BackoffSpec::none()));
        let fx = fixture(def).await;
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        fx.processors
            .register(
                "notification-queue",
                processor_fn(move |_job: Job| {
                    let calls = c.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(JobError::retryable("push gateway busy"))
                        } else {
                            Ok(json!("delivered"))
                        }
                    }
                }),
                None,
            )
            .unwrap();
        submit(&fx, "notification-queue").await;

        let workers = WorkerPool::start(&fx.processors, fast(), fx.metrics.clone()).unwrap();
        wait_for(&fx, "notification-queue", |c| c.completed == 1).await;
        workers.shutdown().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(fx.metrics.jobs_retried(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retries() {
        let fx = fixture(QueueDefinition::new("email-queue").with_retry(RetryPolicy::new(3))).await;
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        fx.processors
            .register(
                "email-queue",
                processor_fn(move |_job: Job| {
                    let calls = c.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(JobError::permanent("invalid address"))
                    }
                }),
                None,
            )
            .unwrap();
        let job_id = submit(&fx, "email-queue").await;

        let workers = WorkerPool::start(&fx.processors, fast(), fx.metrics.clone()).unwrap();
        wait_for(&fx, "email-queue", |c| c.failed == 1).await;
        workers.shutdown().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let record = fx.broker.get("email-queue", &job_id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.failed_reason.as_deref(), Some("invalid address"));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_jobs() {
        let fx = fixture(QueueDefinition::new("analytics-queue")).await;
        fx.processors
            .register(
                "analytics-queue",
                processor_fn(|_job: Job| async move {
                    sleep(Duration::from_millis(100)).await;
                    Ok(Value::Null)
                }),
                None,
            )
            .unwrap();
        submit(&fx, "analytics-queue").await;

        let workers = WorkerPool::start(&fx.processors, fast(), fx.metrics.clone()).unwrap();
        wait_for(&fx, "analytics-queue", |c| c.active == 1).await;
        workers.shutdown().await.unwrap();

        let counts = fx.broker.counts("analytics-queue").await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.active, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_long_jobs_from_stalling() {
        let def = QueueDefinition::new("file-processing-queue").with_stall(StallSettings {
            stalled_interval_ms: 200,
            max_stalled_count: 1,
        });
        let fx = fixture(def).await;
        fx.processors
            .register(
                "file-processing-queue",
                processor_fn(|_job: Job| async move {
                    sleep(Duration::from_millis(500)).await;
                    Ok(Value::Null)
                }),
                None,
            )
            .unwrap();
        submit(&fx, "file-processing-queue").await;

        let workers = WorkerPool::start(&fx.processors, fast(), fx.metrics.clone()).unwrap();
        wait_for(&fx, "file-processing-queue", |c| c.active == 1).await;
        sleep(Duration::from_millis(350)).await;
        assert_eq!(StallMonitor::new(fx.broker.clone()).check_stalled(), 0);

        wait_for(&fx, "file-processing-queue", |c| c.completed == 1).await;
        workers.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_processors_starts_nothing() {
        let fx = fixture(QueueDefinition::new("email-queue")).await;
        let workers = WorkerPool::start(&fx.processors, fast(), fx.metrics.clone()).unwrap();
        assert_eq!(workers.queue_count(), 0);
        workers.shutdown().await.unwrap();
    }
}
