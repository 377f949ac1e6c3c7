//! Static configuration for a [`QueueEngine`](crate::QueueEngine).
//!
//! `QueueConfig::default()` carries the stock queue set. Values can be
//! loaded from JSON and then overridden from the environment:
//!
//! ```bash
//! export DOG_JOBS__EVENT_BUS_CAPACITY=5000
//! export DOG_JOBS__CLEANER__CRON="0 30 3 * * *"
//! export DOG_JOBS__QUEUES__EMAIL_QUEUE__CONCURRENCY=12
//! ```
//!
//! Keys are the path below the prefix, `__`-separated and case-insensitive.
//! Queue names match with `-` written as `_`.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    QueueError, QueueResult,
    cleaner::SweepSchedule,
    types::{BackoffSpec, JobPriority, QueueDefinition, Retention, RetryPolicy},
    worker::WorkerConfig,
};

/// Environment variable prefix read by [`QueueConfig::from_env`]
pub const ENV_PREFIX: &str = "DOG_JOBS__";

/// Largest accepted event bus buffer
pub const MAX_EVENT_BUS_CAPACITY: usize = 1_000_000;

/// Background sweep settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    pub enabled: bool,
    pub schedule: SweepSchedule,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: SweepSchedule::default(),
        }
    }
}

/// Everything the engine needs to start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub queues: Vec<QueueDefinition>,
    pub cleaner: CleanerConfig,
    pub worker: WorkerConfig,
    pub event_bus_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queues: stock_queues(),
            cleaner: CleanerConfig::default(),
            worker: WorkerConfig::default(),
            event_bus_capacity: 10_000,
        }
    }
}

/// The five stock queues and their policies
pub fn stock_queues() -> Vec<QueueDefinition> {
    vec![
        QueueDefinition::new("email-queue").with_concurrency(5).with_retry(
            RetryPolicy::new(3)
                .with_backoff(BackoffSpec::exponential(5_000))
                .with_retention(Retention::KeepLast(100), Retention::KeepLast(50)),
        ),
        QueueDefinition::new("file-processing-queue").with_concurrency(2).with_retry(
            RetryPolicy::new(2)
                .with_backoff(BackoffSpec::fixed(10_000))
                .with_retention(Retention::KeepLast(50), Retention::KeepLast(25)),
        ),
        QueueDefinition::new("notification-queue").with_concurrency(10).with_retry(
            RetryPolicy::new(5)
                .with_backoff(BackoffSpec::exponential(2_000))
                .with_retention(Retention::KeepLast(200), Retention::KeepLast(100)),
        ),
        QueueDefinition::new("analytics-queue")
            .with_concurrency(3)
            .with_delay_ms(5_000)
            .with_retry(RetryPolicy::new(1).with_retention(Retention::KeepLast(1000), Retention::KeepLast(100))),
        QueueDefinition::new("user-activity-queue").with_concurrency(8).with_retry(
            RetryPolicy::new(2)
                .with_backoff(BackoffSpec::fixed(3_000))
                .with_retention(Retention::KeepLast(500), Retention::KeepLast(200)),
        ),
    ]
}

impl QueueConfig {
    /// Configuration with no queues, for callers that register their own
    pub fn empty() -> Self {
        Self {
            queues: Vec::new(),
            ..Self::default()
        }
    }

    pub fn with_queue(mut self, definition: QueueDefinition) -> Self {
        self.queues.push(definition);
        self
    }

    pub fn with_cleaner(mut self, cleaner: CleanerConfig) -> Self {
        self.cleaner = cleaner;
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    pub fn from_json(json: &str) -> QueueResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `DOG_JOBS__*` environment variables
    pub fn from_env() -> QueueResult<Self> {
        let mut config = Self::default();
        config.apply_overrides(std::env::vars(), ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PREFIX` + `SECTION__KEY` style overrides; other variables are ignored
    pub fn apply_overrides<I, K, V>(&mut self, vars: I, prefix: &str) -> QueueResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(stripped) = key.as_ref().strip_prefix(prefix) else {
                continue;
            };
            let path: Vec<String> = stripped.to_lowercase().split("__").map(str::to_string).collect();
            let path: Vec<&str> = path.iter().map(String::as_str).collect();
            let value = value.as_ref();

            if !self.apply_override(&path, value)? {
                warn!(key = %key.as_ref(), "Ignoring unknown queue config override");
            } else {
                debug!(key = %key.as_ref(), "Applied queue config override");
            }
        }
        Ok(())
    }

    fn apply_override(&mut self, path: &[&str], value: &str) -> QueueResult<bool> {
        match path {
            ["event_bus_capacity"] => self.event_bus_capacity = parse(path, value)?,
            ["cleaner", "enabled"] => self.cleaner.enabled = parse(path, value)?,
            ["cleaner", "cron"] => self.cleaner.schedule = SweepSchedule::cron(value),
            ["cleaner", "interval_secs"] => {
                self.cleaner.schedule = SweepSchedule::Every {
                    interval_secs: parse(path, value)?,
                }
            }
            ["worker", "poll_interval_ms"] => self.worker.poll_interval_ms = parse(path, value)?,
            ["worker", "error_backoff_ms"] => self.worker.error_backoff_ms = parse(path, value)?,
            ["queues", queue, field] => {
                let Some(definition) = self
                    .queues
                    .iter_mut()
                    .find(|d| d.name.to_lowercase().replace('-', "_") == *queue)
                else {
                    return Ok(false);
                };
                match *field {
                    "concurrency" => definition.concurrency = parse(path, value)?,
                    "priority" => definition.default_priority = parse::<JobPriority>(path, value)?,
                    "delay_ms" => definition.default_delay_ms = parse(path, value)?,
                    "attempts" => definition.default_retry.max_attempts = parse(path, value)?,
                    "stalled_interval_ms" => definition.stall.stalled_interval_ms = parse(path, value)?,
                    "max_stalled_count" => definition.stall.max_stalled_count = parse(path, value)?,
                    _ => return Ok(false),
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Check every queue, unique names and the sweep schedule
    pub fn validate(&self) -> QueueResult<()> {
        let mut seen = HashSet::new();
        for definition in &self.queues {
            definition.validate()?;
            if !seen.insert(definition.name.as_str()) {
                return Err(QueueError::Configuration(format!(
                    "queue '{}' is defined more than once",
                    definition.name
                )));
            }
        }
        if self.event_bus_capacity == 0 || self.event_bus_capacity > MAX_EVENT_BUS_CAPACITY {
            return Err(QueueError::Configuration(format!(
                "event_bus_capacity must be between 1 and {}",
                MAX_EVENT_BUS_CAPACITY
            )));
        }
        self.cleaner.schedule.validate()
    }

    pub fn queue(&self, name: &str) -> Option<&QueueDefinition> {
        self.queues.iter().find(|d| d.name == name)
    }
}

fn parse<T>(path: &[&str], value: &str) -> QueueResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| {
        QueueError::Configuration(format!("invalid value '{}' for {}: {}", value, path.join("."), e))
    })
}
