use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{JobPriority, QueueDefinition};

/// Delay strategy between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackoffSpec {
    pub kind: BackoffKind,
    pub base_delay_ms: u64,
}

impl BackoffSpec {
    pub fn fixed(base_delay_ms: u64) -> Self {
        Self { kind: BackoffKind::Fixed, base_delay_ms }
    }

    pub fn exponential(base_delay_ms: u64) -> Self {
        Self { kind: BackoffKind::Exponential, base_delay_ms }
    }

    /// No delay between attempts
    pub fn none() -> Self {
        Self::fixed(0)
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let millis = match self.kind {
            BackoffKind::Fixed => self.base_delay_ms,
            BackoffKind::Exponential => 2_u64
                .checked_pow(attempt.saturating_sub(1))
                .and_then(|factor| self.base_delay_ms.checked_mul(factor))
                .unwrap_or(u64::MAX),
        };
        Duration::from_millis(millis)
    }
}

impl Default for BackoffSpec {
    fn default() -> Self {
        Self::none()
    }
}

/// How many finished jobs the broker keeps around.
///
/// Serialized as `bool | int`: `false` keeps everything, `true` removes the job
/// as soon as it finishes, `n` keeps the newest `n` finished jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RetentionRepr", into = "RetentionRepr")]
pub enum Retention {
    KeepAll,
    RemoveImmediately,
    KeepLast(u32),
}

impl Default for Retention {
    fn default() -> Self {
        Self::KeepAll
    }
}

#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum RetentionRepr {
    Flag(bool),
    Count(u32),
}

impl From<RetentionRepr> for Retention {
    fn from(repr: RetentionRepr) -> Self {
        match repr {
            RetentionRepr::Flag(false) => Self::KeepAll,
            RetentionRepr::Flag(true) => Self::RemoveImmediately,
            RetentionRepr::Count(n) => Self::KeepLast(n),
        }
    }
}

impl From<Retention> for RetentionRepr {
    fn from(retention: Retention) -> Self {
        match retention {
            Retention::KeepAll => Self::Flag(false),
            Retention::RemoveImmediately => Self::Flag(true),
            Retention::KeepLast(n) => Self::Count(n),
        }
    }
}

/// Per-job overrides. Unset fields fall back to the owning queue's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<JobPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_on_complete: Option<Retention>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_on_fail: Option<Retention>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffSpec) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_remove_on_complete(mut self, retention: Retention) -> Self {
        self.remove_on_complete = Some(retention);
        self
    }

    pub fn with_remove_on_fail(mut self, retention: Retention) -> Self {
        self.remove_on_fail = Some(retention);
        self
    }

    /// Resolve every field independently against the queue defaults.
    /// Caller-supplied fields always win.
    pub fn resolve(&self, definition: &QueueDefinition) -> ResolvedJobOptions {
        let defaults = &definition.default_retry;
        ResolvedJobOptions {
            priority: self.priority.unwrap_or(definition.default_priority),
            delay_ms: self.delay_ms.unwrap_or(definition.default_delay_ms),
            attempts: self.attempts.unwrap_or(defaults.max_attempts),
            backoff: self.backoff.unwrap_or(defaults.backoff),
            remove_on_complete: self.remove_on_complete.unwrap_or(defaults.retain_completed),
            remove_on_fail: self.remove_on_fail.unwrap_or(defaults.retain_failed),
        }
    }
}

/// Fully resolved options handed to the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedJobOptions {
    pub priority: JobPriority,
    pub delay_ms: u64,
    pub attempts: u32,
    pub backoff: BackoffSpec,
    pub remove_on_complete: Retention,
    pub remove_on_fail: Retention,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QueueDefinition, RetryPolicy};
    use proptest::prelude::*;

    fn email_queue() -> QueueDefinition {
        QueueDefinition::new("email-queue")
            .with_concurrency(5)
            .with_retry(
                RetryPolicy::new(3)
                    .with_backoff(BackoffSpec::exponential(5000))
                    .with_retention(Retention::KeepLast(100), Retention::KeepLast(50)),
            )
    }

    #[test]
    fn unset_fields_take_queue_defaults() {
        let resolved = JobOptions::new().resolve(&email_queue());

        assert_eq!(resolved.attempts, 3);
        assert_eq!(resolved.backoff, BackoffSpec::exponential(5000));
        assert_eq!(resolved.priority, JobPriority::Normal);
        assert_eq!(resolved.delay_ms, 0);
        assert_eq!(resolved.remove_on_complete, Retention::KeepLast(100));
        assert_eq!(resolved.remove_on_fail, Retention::KeepLast(50));
    }

    #[test]
    fn exponential_backoff_doubles() {
        let backoff = BackoffSpec::exponential(5000);
        assert_eq!(backoff.delay_for(1), Duration::from_millis(5000));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(10_000));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(20_000));
        assert_eq!(BackoffSpec::fixed(3000).delay_for(7), Duration::from_millis(3000));
        assert_eq!(backoff.delay_for(200), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn retention_accepts_bool_or_count() {
        let opts: JobOptions = serde_json::from_str(
            r#"{"remove_on_complete": true, "remove_on_fail": 25}"#,
        )
        .unwrap();
        assert_eq!(opts.remove_on_complete, Some(Retention::RemoveImmediately));
        assert_eq!(opts.remove_on_fail, Some(Retention::KeepLast(25)));

        let json = serde_json::to_value(Retention::KeepAll).unwrap();
        assert_eq!(json, serde_json::json!(false));
    }

    fn any_priority() -> impl Strategy<Value = JobPriority> {
        prop::sample::select(JobPriority::all().to_vec())
    }

    fn any_retention() -> impl Strategy<Value = Retention> {
        prop_oneof![
            Just(Retention::KeepAll),
            Just(Retention::RemoveImmediately),
            (0u32..10_000).prop_map(Retention::KeepLast),
        ]
    }

    fn any_backoff() -> impl Strategy<Value = BackoffSpec> {
        (any::<bool>(), 0u64..600_000).prop_map(|(exp, ms)| {
            if exp { BackoffSpec::exponential(ms) } else { BackoffSpec::fixed(ms) }
        })
    }

    proptest! {
        #[test]
        fn each_field_resolves_independently(
            priority in proptest::option::of(any_priority()),
            delay_ms in proptest::option::of(0u64..1_000_000),
            attempts in proptest::option::of(1u32..20),
            backoff in proptest::option::of(any_backoff()),
            on_complete in proptest::option::of(any_retention()),
            on_fail in proptest::option::of(any_retention()),
        ) {
            let definition = email_queue();
            let options = JobOptions {
                priority,
                delay_ms,
                attempts,
                backoff,
                remove_on_complete: on_complete,
                remove_on_fail: on_fail,
            };
            let resolved = options.resolve(&definition);
            let defaults = &definition.default_retry;

            prop_assert_eq!(resolved.priority, priority.unwrap_or(definition.default_priority));
            prop_assert_eq!(resolved.delay_ms, delay_ms.unwrap_or(definition.default_delay_ms));
            prop_assert_eq!(resolved.attempts, attempts.unwrap_or(defaults.max_attempts));
            prop_assert_eq!(resolved.backoff, backoff.unwrap_or(defaults.backoff));
            prop_assert_eq!(resolved.remove_on_complete, on_complete.unwrap_or(defaults.retain_completed));
            prop_assert_eq!(resolved.remove_on_fail, on_fail.unwrap_or(defaults.retain_failed));
        }
    }
}
