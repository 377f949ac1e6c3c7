mod state;
pub mod stall;

pub use stall::{StallMonitor, StallMonitorHandle};

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use self::state::QueueState;
use crate::{
    BrokerError, BrokerResult, JobId,
    broker::{Broker, BrokerSubscription},
    types::{
        record::saturating_add_millis, BrokerNotification, CleanState, Job, JobCounts, JobRecord,
        JobState, JobSubmission, LeaseToken, LeasedJob, LifecycleKind, QueueDefinition,
    },
};

/// In-process broker for tests, demos and single-node deployments.
///
/// Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    pub(crate) queues: Arc<Mutex<HashMap<String, QueueState>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against one queue's state under the broker lock.
    /// Fails when the queue is unknown or in a simulated outage.
    fn with_queue<T>(
        &self,
        queue: &str,
        f: impl FnOnce(&mut QueueState) -> BrokerResult<T>,
    ) -> BrokerResult<T> {
        let mut queues = self.queues.lock();
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        state.ensure_available()?;
        f(state)
    }

    fn build_record(queue: &str, submission: JobSubmission) -> BrokerResult<JobRecord> {
        if submission.options.attempts == 0 {
            return Err(BrokerError::Rejected(format!(
                "job '{}' must allow at least one attempt",
                submission.job_type
            )));
        }

        Ok(JobRecord::new(Job {
            id: JobId::new(),
            queue_name: queue.to_string(),
            job_type: submission.job_type,
            payload: submission.payload,
            options: submission.options,
            enqueued_at: submission.enqueued_at,
        }))
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn create(&self, definition: &QueueDefinition) -> BrokerResult<()> {
        let mut queues = self.queues.lock();
        if !queues.contains_key(&definition.name) {
            queues.insert(definition.name.clone(), QueueState::new(definition.clone()));
            debug!(queue = %definition.name, concurrency = definition.concurrency, "Created queue");
        }
        Ok(())
    }

    async fn submit(&self, queue: &str, submission: JobSubmission) -> BrokerResult<JobId> {
        self.with_queue(queue, |state| {
            let record = Self::build_record(queue, submission)?;
            let job_id = record.id().clone();
            state.insert(record);
            Ok(job_id)
        })
    }

    async fn submit_bulk(&self, queue: &str, submissions: Vec<JobSubmission>) -> BrokerResult<Vec<JobId>> {
        self.with_queue(queue, |state| {
            // Build everything first so a bad entry rejects the whole batch
            let records = submissions
                .into_iter()
                .map(|submission| Self::build_record(queue, submission))
                .collect::<BrokerResult<Vec<_>>>()?;

            let ids = records.iter().map(|r| r.id().clone()).collect();
            for record in records {
                state.insert(record);
            }
            Ok(ids)
        })
    }

    async fn get(&self, queue: &str, job_id: &JobId) -> BrokerResult<Option<JobRecord>> {
        self.with_queue(queue, |state| Ok(state.jobs.get(job_id).cloned()))
    }

    async fn remove(&self, queue: &str, job_id: &JobId) -> BrokerResult<bool> {
        self.with_queue(queue, |state| Ok(state.remove(job_id)))
    }

    async fn pause(&self, queue: &str) -> BrokerResult<()> {
        self.with_queue(queue, |state| {
            state.paused = true;
            Ok(())
        })
    }

    async fn resume(&self, queue: &str) -> BrokerResult<()> {
        self.with_queue(queue, |state| {
            state.paused = false;
            Ok(())
        })
    }

    async fn is_paused(&self, queue: &str) -> BrokerResult<bool> {
        self.with_queue(queue, |state| Ok(state.paused))
    }

    async fn clean(
        &self,
        queue: &str,
        older_than: Duration,
        limit: usize,
        state: CleanState,
    ) -> BrokerResult<Vec<JobId>> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| BrokerError::Rejected(format!("invalid clean age: {}", e)))?;
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        self.with_queue(queue, |queue_state| Ok(queue_state.clean(cutoff, limit, state)))
    }

    async fn counts(&self, queue: &str) -> BrokerResult<JobCounts> {
        self.with_queue(queue, |state| Ok(state.counts()))
    }

    async fn subscribe(&self, queue: &str) -> BrokerResult<Box<dyn BrokerSubscription>> {
        self.with_queue(queue, |state| {
            let subscription: Box<dyn BrokerSubscription> = Box::new(MemorySubscription {
                queue: queue.to_string(),
                receiver: state.notifier.subscribe(),
                _listener: ListenerGuard::register(&state.listeners),
            });
            Ok(subscription)
        })
    }

    async fn claim(&self, queue: &str) -> BrokerResult<Option<LeasedJob>> {
        let now = Utc::now();
        self.with_queue(queue, |state| {
            state.promote_due(now);

            if state.paused || state.active.len() >= state.definition.concurrency {
                return Ok(None);
            }

            let Some(job_id) = state.waiting.pop_front() else {
                return Ok(None);
            };

            let locked_until = saturating_add_millis(now, state.definition.stall.stalled_interval_ms);
            let record = state
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| BrokerError::Internal(format!("waiting job {} has no record", job_id)))?;
            record.start_processing(now, locked_until);
            let claimed = LeasedJob {
                record: record.clone(),
                lease_token: LeaseToken::new(),
            };

            state.active.insert(job_id.clone(), claimed.lease_token.clone());
            state.notify(BrokerNotification::new(job_id, LifecycleKind::Active));
            Ok(Some(claimed))
        })
    }

    async fn extend_lock(
        &self,
        queue: &str,
        job_id: &JobId,
        lease_token: &LeaseToken,
        duration: Duration,
    ) -> BrokerResult<()> {
        let extension = chrono::Duration::from_std(duration)
            .map_err(|e| BrokerError::Rejected(format!("invalid lock duration: {}", e)))?;
        self.with_queue(queue, |state| {
            let record = state.active_record(job_id, lease_token)?;
            let locked_until = Utc::now()
                .checked_add_signed(extension)
                .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);
            record.locked_until = Some(locked_until);
            Ok(())
        })
    }

    async fn ack_complete(
        &self,
        queue: &str,
        job_id: &JobId,
        lease_token: &LeaseToken,
        return_value: Value,
    ) -> BrokerResult<()> {
        self.with_queue(queue, |state| state.complete(job_id, lease_token, return_value, Utc::now()))
    }

    async fn ack_fail(
        &self,
        queue: &str,
        job_id: &JobId,
        lease_token: &LeaseToken,
        reason: String,
        retryable: bool,
    ) -> BrokerResult<()> {
        self.with_queue(queue, |state| {
            state.fail(job_id, lease_token, reason, retryable, Utc::now())
        })
    }
}

/// Test and operations helpers
impl MemoryBroker {
    /// Make every call against `queue` fail with `Unavailable` until cleared
    pub fn set_outage(&self, queue: &str, outage: bool) {
        if let Some(state) = self.queues.lock().get_mut(queue) {
            state.outage = outage;
        }
    }

    /// Pretend a job was enqueued and finished `age` earlier than recorded
    pub fn backdate(&self, queue: &str, job_id: &JobId, age: Duration) {
        let Ok(age) = chrono::Duration::from_std(age) else {
            return;
        };
        if let Some(record) = self
            .queues
            .lock()
            .get_mut(queue)
            .and_then(|state| state.jobs.get_mut(job_id))
        {
            let back = |at: chrono::DateTime<Utc>| {
                at.checked_sub_signed(age).unwrap_or(chrono::DateTime::<Utc>::MIN_UTC)
            };
            record.job.enqueued_at = back(record.job.enqueued_at);
            record.finished_at = record.finished_at.map(back);
        }
    }

    /// Force the lock of an active job to expire
    pub fn force_lock_expiry(&self, queue: &str, job_id: &JobId) {
        if let Some(record) = self
            .queues
            .lock()
            .get_mut(queue)
            .and_then(|state| state.jobs.get_mut(job_id))
        {
            if record.state == JobState::Active {
                record.locked_until = Some(Utc::now() - chrono::Duration::seconds(1));
            }
        }
    }

    /// Open listener registrations for `queue`
    pub fn listener_count(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .get(queue)
            .map(|state| state.listeners.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

/// Counts one open listener registration for as long as it lives
struct ListenerGuard(Arc<AtomicUsize>);

impl ListenerGuard {
    fn register(listeners: &Arc<AtomicUsize>) -> Self {
        listeners.fetch_add(1, Ordering::SeqCst);
        Self(listeners.clone())
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Listener registration backed by the queue's broadcast channel.
/// Dropping it without `close` still releases the registration.
struct MemorySubscription {
    queue: String,
    receiver: broadcast::Receiver<BrokerNotification>,
    _listener: ListenerGuard,
}

#[async_trait]
impl BrokerSubscription for MemorySubscription {
    async fn next(&mut self) -> Option<BrokerNotification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(queue = %self.queue, skipped, "Subscription lagged, notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn close(self: Box<Self>) -> BrokerResult<()> {
        debug!(queue = %self.queue, "Closed broker subscription");
        Ok(())
    }
}
