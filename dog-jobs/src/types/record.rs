use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{JobId, LeaseToken, ResolvedJobOptions};

/// `at + millis`, clamped to the latest representable instant
pub(crate) fn saturating_add_millis(at: DateTime<Utc>, millis: u64) -> DateTime<Utc> {
    i64::try_from(millis)
        .ok()
        .and_then(chrono::Duration::try_milliseconds)
        .and_then(|offset| at.checked_add_signed(offset))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// One unit of submitted work. The payload is opaque to this layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue_name: String,
    pub job_type: String,
    pub payload: Value,
    pub options: ResolvedJobOptions,
    pub enqueued_at: DateTime<Utc>,
}

/// Broker-side job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Ready to be claimed by a worker
    Waiting,
    /// Scheduled for later (initial delay or retry backoff)
    Delayed,
    /// Claimed by a worker and holding a lock
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Finished states the cleaner can sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanState {
    Completed,
    Failed,
}

impl CleanState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A job together with its runtime state as the broker sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: Job,
    pub state: JobState,
    /// Failed attempts so far
    pub attempts_made: u32,
    pub stalled_count: u32,
    /// Earliest time a delayed job becomes claimable
    pub run_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Lock expiry while active
    pub locked_until: Option<DateTime<Utc>>,
    pub return_value: Option<Value>,
    pub failed_reason: Option<String>,
}

impl JobRecord {
    /// Fresh record for a newly accepted job
    pub fn new(job: Job) -> Self {
        let run_at = saturating_add_millis(job.enqueued_at, job.options.delay_ms);
        let state = if job.options.delay_ms > 0 {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        Self {
            job,
            state,
            attempts_made: 0,
            stalled_count: 0,
            run_at,
            processed_at: None,
            finished_at: None,
            locked_until: None,
            return_value: None,
            failed_reason: None,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.job.id
    }

    /// Check if the lock has expired
    pub fn lock_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.state, self.locked_until) {
            (JobState::Active, Some(until)) => until < now,
            _ => false,
        }
    }

    /// Retries left after the attempts already made
    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.job.options.attempts
    }

    pub fn start_processing(&mut self, now: DateTime<Utc>, locked_until: DateTime<Utc>) {
        self.state = JobState::Active;
        self.processed_at = Some(now);
        self.locked_until = Some(locked_until);
    }

    pub fn complete(&mut self, return_value: Value, now: DateTime<Utc>) {
        self.state = JobState::Completed;
        self.return_value = Some(return_value);
        self.finished_at = Some(now);
        self.locked_until = None;
    }

    pub fn fail(&mut self, reason: String, now: DateTime<Utc>) {
        self.state = JobState::Failed;
        self.failed_reason = Some(reason);
        self.finished_at = Some(now);
        self.locked_until = None;
    }

    /// Move back to delayed (or waiting when `run_at` is now)
    pub fn schedule_retry(&mut self, run_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.state = if run_at > now { JobState::Delayed } else { JobState::Waiting };
        self.run_at = run_at;
        self.locked_until = None;
    }
}

/// A claimed job and the lease that proves the claim
#[derive(Debug, Clone, PartialEq)]
pub struct LeasedJob {
    pub record: JobRecord,
    pub lease_token: LeaseToken,
}

impl LeasedJob {
    pub fn job_id(&self) -> &JobId {
        self.record.id()
    }
}

/// Number of jobs per state in one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn total(&self) -> usize {
        self.waiting + self.delayed + self.active + self.completed + self.failed
    }
}
