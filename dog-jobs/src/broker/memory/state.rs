use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{
    BrokerError, BrokerResult, JobId,
    types::{
        BrokerNotification, CleanState, JobCounts, JobRecord, JobState, LeaseToken, LifecycleKind,
        QueueDefinition, Retention,
    },
};

const NOTIFICATION_CAPACITY: usize = 1024;

/// Storage and indexes of one queue inside the memory broker
pub(crate) struct QueueState {
    pub(crate) definition: QueueDefinition,
    pub(crate) paused: bool,
    /// Simulated outage: every call against this queue fails
    pub(crate) outage: bool,
    pub(crate) jobs: HashMap<JobId, JobRecord>,
    /// Claim order: priority rank ascending, FIFO within a rank
    pub(crate) waiting: VecDeque<JobId>,
    pub(crate) delayed: Vec<JobId>,
    /// Active jobs and the lease of their current claim
    pub(crate) active: HashMap<JobId, LeaseToken>,
    /// Finish order, oldest first
    pub(crate) completed: VecDeque<JobId>,
    pub(crate) failed: VecDeque<JobId>,
    pub(crate) notifier: broadcast::Sender<BrokerNotification>,
    pub(crate) listeners: Arc<AtomicUsize>,
}

impl QueueState {
    pub(crate) fn new(definition: QueueDefinition) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            definition,
            paused: false,
            outage: false,
            jobs: HashMap::new(),
            waiting: VecDeque::new(),
            delayed: Vec::new(),
            active: HashMap::new(),
            completed: VecDeque::new(),
            failed: VecDeque::new(),
            notifier,
            listeners: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn ensure_available(&self) -> BrokerResult<()> {
        if self.outage {
            return Err(BrokerError::Unavailable(format!(
                "queue '{}' is unreachable",
                self.definition.name
            )));
        }
        Ok(())
    }

    pub(crate) fn notify(&self, notification: BrokerNotification) {
        // No receivers is fine: nobody is listening yet
        let _ = self.notifier.send(notification);
    }

    /// Store a freshly accepted record and index it by state
    pub(crate) fn insert(&mut self, record: JobRecord) {
        let job_id = record.id().clone();
        let state = record.state;
        self.jobs.insert(job_id.clone(), record);

        match state {
            JobState::Delayed => self.delayed.push(job_id),
            _ => self.push_waiting(job_id),
        }
    }

    /// Insert into the waiting list in priority order and announce it
    pub(crate) fn push_waiting(&mut self, job_id: JobId) {
        let rank = match self.jobs.get(&job_id) {
            Some(record) => record.job.options.priority.rank(),
            None => return,
        };

        // Insert in priority order (lower rank first, then FIFO within the rank)
        let insert_pos = self
            .waiting
            .iter()
            .position(|existing| {
                self.jobs
                    .get(existing)
                    .map(|r| r.job.options.priority.rank() > rank)
                    .unwrap_or(true)
            })
            .unwrap_or(self.waiting.len());

        self.waiting.insert(insert_pos, job_id.clone());
        self.notify(BrokerNotification::new(job_id, LifecycleKind::Waiting));
    }

    /// Move delayed jobs whose time has come onto the waiting list
    pub(crate) fn promote_due(&mut self, now: DateTime<Utc>) {
        let (due, pending): (Vec<JobId>, Vec<JobId>) = self.delayed.drain(..).partition(|id| {
            self.jobs.get(id).map(|r| r.run_at <= now).unwrap_or(false)
        });
        self.delayed = pending;

        for job_id in due {
            if let Some(record) = self.jobs.get_mut(&job_id) {
                record.state = JobState::Waiting;
                self.push_waiting(job_id);
            }
        }
    }

    /// The record of an active job, provided `lease_token` is the current claim's
    pub(crate) fn active_record(
        &mut self,
        job_id: &JobId,
        lease_token: &LeaseToken,
    ) -> BrokerResult<&mut JobRecord> {
        let record = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| BrokerError::JobNotFound(job_id.to_string()))?;

        if record.state != JobState::Active {
            return Err(BrokerError::Rejected(format!(
                "job {} is {}, not active",
                job_id,
                record.state.name()
            )));
        }
        if self.active.get(job_id) != Some(lease_token) {
            return Err(BrokerError::Rejected(format!(
                "lease {} no longer holds job {}",
                lease_token, job_id
            )));
        }
        Ok(record)
    }

    pub(crate) fn complete(
        &mut self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        return_value: Value,
        now: DateTime<Utc>,
    ) -> BrokerResult<()> {
        let record = self.active_record(job_id, lease_token)?;
        record.complete(return_value.clone(), now);
        let retention = record.job.options.remove_on_complete;

        self.active.remove(job_id);
        self.notify(BrokerNotification::new(job_id.clone(), LifecycleKind::Completed).with_detail(return_value));
        self.retain(job_id.clone(), CleanState::Completed, retention);
        Ok(())
    }

    pub(crate) fn fail(
        &mut self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        reason: String,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> BrokerResult<()> {
        let record = self.active_record(job_id, lease_token)?;
        record.attempts_made += 1;

        if retryable && record.can_retry() {
            let delay = record.job.options.backoff.delay_for(record.attempts_made);
            let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
            let run_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
            record.failed_reason = Some(reason);
            record.schedule_retry(run_at, now);
            let state = record.state;

            self.active.remove(job_id);
            match state {
                JobState::Waiting => self.push_waiting(job_id.clone()),
                _ => self.delayed.push(job_id.clone()),
            }
            return Ok(());
        }

        self.fail_terminally(job_id.clone(), reason, now);
        Ok(())
    }

    /// Move an active job to failed, announce it, and apply retention
    pub(crate) fn fail_terminally(&mut self, job_id: JobId, reason: String, now: DateTime<Utc>) {
        let Some(record) = self.jobs.get_mut(&job_id) else {
            return;
        };
        record.fail(reason.clone(), now);
        let retention = record.job.options.remove_on_fail;

        self.active.remove(&job_id);
        self.notify(
            BrokerNotification::new(job_id.clone(), LifecycleKind::Failed).with_detail(Value::String(reason)),
        );
        self.retain(job_id, CleanState::Failed, retention);
    }

    /// Record a finished job and trim history per the job's retention
    fn retain(&mut self, job_id: JobId, state: CleanState, retention: Retention) {
        match retention {
            Retention::RemoveImmediately => {
                self.jobs.remove(&job_id);
            }
            Retention::KeepAll => self.finished_mut(state).push_back(job_id),
            Retention::KeepLast(keep) => {
                self.finished_mut(state).push_back(job_id);
                while self.finished_mut(state).len() > keep as usize {
                    if let Some(oldest) = self.finished_mut(state).pop_front() {
                        self.jobs.remove(&oldest);
                    }
                }
            }
        }
    }

    fn finished_mut(&mut self, state: CleanState) -> &mut VecDeque<JobId> {
        match state {
            CleanState::Completed => &mut self.completed,
            CleanState::Failed => &mut self.failed,
        }
    }

    /// Delete a job from storage and every index
    pub(crate) fn remove(&mut self, job_id: &JobId) -> bool {
        if self.jobs.remove(job_id).is_none() {
            return false;
        }
        self.waiting.retain(|id| id != job_id);
        self.delayed.retain(|id| id != job_id);
        self.active.remove(job_id);
        self.completed.retain(|id| id != job_id);
        self.failed.retain(|id| id != job_id);
        true
    }

    pub(crate) fn clean(&mut self, cutoff: DateTime<Utc>, limit: usize, state: CleanState) -> Vec<JobId> {
        let finished = match state {
            CleanState::Completed => &self.completed,
            CleanState::Failed => &self.failed,
        };
        let jobs = &self.jobs;

        let candidates: Vec<JobId> = finished
            .iter()
            .filter(|id| {
                jobs.get(*id)
                    .and_then(|r| r.finished_at)
                    .map(|finished_at| finished_at <= cutoff)
                    .unwrap_or(false)
            })
            .take(if limit == 0 { usize::MAX } else { limit })
            .cloned()
            .collect();

        for job_id in &candidates {
            self.remove(job_id);
        }
        candidates
    }

    pub(crate) fn counts(&self) -> JobCounts {
        JobCounts {
            waiting: self.waiting.len(),
            delayed: self.delayed.len(),
            active: self.active.len(),
            completed: self.completed.len(),
            failed: self.failed.len(),
        }
    }
}
