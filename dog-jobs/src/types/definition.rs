use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{BackoffSpec, JobPriority, Retention};
use crate::{QueueError, QueueResult};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Upper bound on concurrent jobs per queue and per processor
pub const MAX_CONCURRENCY: usize = 10_000;

/// Upper bound on how long a lock may go unrenewed
pub const MAX_STALLED_INTERVAL_MS: u64 = DAY_MS;

/// Static definition of one named queue. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDefinition {
    pub name: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub default_priority: JobPriority,
    #[serde(default)]
    pub default_retry: RetryPolicy,
    /// Delay applied to every job that does not set its own
    #[serde(default)]
    pub default_delay_ms: u64,
    #[serde(default)]
    pub stall: StallSettings,
}

fn default_concurrency() -> usize {
    1
}

impl QueueDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concurrency: default_concurrency(),
            default_priority: JobPriority::default(),
            default_retry: RetryPolicy::default(),
            default_delay_ms: 0,
            stall: StallSettings::default(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.default_retry = retry;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.default_delay_ms = delay_ms;
        self
    }

    pub fn with_stall(mut self, stall: StallSettings) -> Self {
        self.stall = stall;
        self
    }

    /// Reject definitions the broker could never honor
    pub fn validate(&self) -> QueueResult<()> {
        if self.name.trim().is_empty() {
            return Err(QueueError::configuration("queue name must not be empty"));
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(QueueError::Configuration(format!(
                "queue '{}': concurrency must be between 1 and {}",
                self.name, MAX_CONCURRENCY
            )));
        }
        if self.default_retry.max_attempts == 0 {
            return Err(QueueError::Configuration(format!(
                "queue '{}': max_attempts must be at least 1",
                self.name
            )));
        }
        if self.stall.stalled_interval_ms == 0 || self.stall.stalled_interval_ms > MAX_STALLED_INTERVAL_MS {
            return Err(QueueError::Configuration(format!(
                "queue '{}': stalled_interval_ms must be between 1 and {}",
                self.name, MAX_STALLED_INTERVAL_MS
            )));
        }
        Ok(())
    }
}

/// Default retry and retention behaviour of a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffSpec,
    #[serde(default)]
    pub retain_completed: Retention,
    #[serde(default)]
    pub retain_failed: Retention,
    /// Age thresholds used by the scheduled sweep
    #[serde(default)]
    pub sweep: SweepPolicy,
}

fn default_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(default_attempts())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: BackoffSpec::default(),
            retain_completed: Retention::default(),
            retain_failed: Retention::default(),
            sweep: SweepPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffSpec) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retention(mut self, completed: Retention, failed: Retention) -> Self {
        self.retain_completed = completed;
        self.retain_failed = failed;
        self
    }

    pub fn with_sweep(mut self, sweep: SweepPolicy) -> Self {
        self.sweep = sweep;
        self
    }
}

/// Thresholds and per-call caps for the scheduled sweep of one queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepPolicy {
    pub completed_max_age_ms: u64,
    pub completed_limit: usize,
    pub failed_max_age_ms: u64,
    pub failed_limit: usize,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            completed_max_age_ms: DAY_MS,
            completed_limit: 100,
            failed_max_age_ms: 7 * DAY_MS,
            failed_limit: 50,
        }
    }
}

impl SweepPolicy {
    pub fn completed_max_age(&self) -> Duration {
        Duration::from_millis(self.completed_max_age_ms)
    }

    pub fn failed_max_age(&self) -> Duration {
        Duration::from_millis(self.failed_max_age_ms)
    }
}

/// Broker-side stalled job detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StallSettings {
    /// How long an active job may go without a lock renewal
    pub stalled_interval_ms: u64,
    /// Stalls tolerated before the job is failed
    pub max_stalled_count: u32,
}

impl Default for StallSettings {
    fn default() -> Self {
        Self {
            stalled_interval_ms: 30_000,
            max_stalled_count: 1,
        }
    }
}

impl StallSettings {
    pub fn stalled_interval(&self) -> Duration {
        Duration::from_millis(self.stalled_interval_ms)
    }
}
