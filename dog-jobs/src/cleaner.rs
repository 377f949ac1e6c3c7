use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::{
    QueueError, QueueResult,
    broker::QueueHandle,
    observability::LiveMetrics,
    registry::QueueRegistry,
    types::CleanState,
};

/// Default age for on-demand cleanup
pub const DEFAULT_MANUAL_CLEANUP_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Daily at 02:00 UTC (seconds-first cron syntax)
pub const DEFAULT_SWEEP_CRON: &str = "0 0 2 * * *";

/// Longest accepted fixed sweep interval (one year)
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// When the background sweep fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SweepSchedule {
    Cron { expression: String },
    Every { interval_secs: u64 },
}

impl Default for SweepSchedule {
    fn default() -> Self {
        Self::Cron {
            expression: DEFAULT_SWEEP_CRON.to_string(),
        }
    }
}

impl SweepSchedule {
    pub fn cron(expression: impl Into<String>) -> Self {
        Self::Cron {
            expression: expression.into(),
        }
    }

    pub fn every(interval: Duration) -> Self {
        Self::Every {
            interval_secs: interval.as_secs(),
        }
    }

    pub fn validate(&self) -> QueueResult<()> {
        match self {
            Self::Cron { expression } => parse_cron(expression).map(|_| ()),
            Self::Every { interval_secs } if (1..=MAX_SWEEP_INTERVAL_SECS).contains(interval_secs) => Ok(()),
            Self::Every { interval_secs } => Err(QueueError::Configuration(format!(
                "sweep interval must be between 1 and {} seconds, got {}",
                MAX_SWEEP_INTERVAL_SECS, interval_secs
            ))),
        }
    }

    /// Next firing strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> QueueResult<Option<DateTime<Utc>>> {
        match self {
            Self::Cron { expression } => Ok(parse_cron(expression)?.after(&after).next()),
            Self::Every { interval_secs } => {
                self.validate()?;
                Ok(i64::try_from(*interval_secs)
                    .ok()
                    .and_then(chrono::Duration::try_seconds)
                    .and_then(|step| after.checked_add_signed(step)))
            }
        }
    }

    fn trigger(&self) -> QueueResult<Trigger> {
        match self {
            Self::Cron { expression } => Ok(Trigger::Cron {
                schedule: parse_cron(expression)?,
                last: None,
            }),
            Self::Every { interval_secs } => {
                self.validate()?;
                let period = Duration::from_secs(*interval_secs);
                let start = Instant::now().checked_add(period).ok_or_else(|| {
                    QueueError::Configuration(format!("sweep interval of {}s is out of range", interval_secs))
                })?;
                let mut ticker = interval_at(start, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Ok(Trigger::Every(ticker))
            }
        }
    }
}

fn parse_cron(expression: &str) -> QueueResult<cron::Schedule> {
    cron::Schedule::from_str(expression)
        .map_err(|e| QueueError::Configuration(format!("invalid sweep cron '{}': {}", expression, e)))
}

enum Trigger {
    Every(Interval),
    Cron {
        schedule: cron::Schedule,
        last: Option<DateTime<Utc>>,
    },
}

impl Trigger {
    async fn wait(&mut self) {
        match self {
            Trigger::Every(ticker) => {
                ticker.tick().await;
            }
            Trigger::Cron { schedule, last } => {
                let now = Utc::now();
                let from = last.map(|l| l.max(now)).unwrap_or(now);
                let Some(next) = schedule.after(&from).next() else {
                    // Expression has no future firing
                    std::future::pending::<()>().await;
                    return;
                };
                let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(delay).await;
                *last = Some(next);
            }
        }
    }
}

/// Removed-job counts for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupCounts {
    pub completed: usize,
    pub failed: usize,
}

impl CleanupCounts {
    pub fn total(&self) -> usize {
        self.completed + self.failed
    }
}

/// Outcome of one sweep over every registered queue
#[derive(Debug, Default)]
pub struct SweepReport {
    pub cleaned: Vec<(String, CleanupCounts)>,
    pub failures: Vec<(String, QueueError)>,
}

impl SweepReport {
    pub fn total_removed(&self) -> usize {
        self.cleaned.iter().map(|(_, counts)| counts.total()).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn counts_for(&self, queue: &str) -> Option<CleanupCounts> {
        self.cleaned.iter().find(|(name, _)| name == queue).map(|(_, counts)| *counts)
    }
}

/// Reclaims finished job history, on a schedule or on demand
pub struct LifecycleCleaner {
    registry: Arc<QueueRegistry>,
    metrics: Arc<LiveMetrics>,
}

impl LifecycleCleaner {
    pub fn new(registry: Arc<QueueRegistry>, metrics: Arc<LiveMetrics>) -> Self {
        Self { registry, metrics }
    }

    /// Clean every registered queue by its sweep policy.
    ///
    /// A queue that fails is logged and reported; the rest still run.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for handle in self.registry.handles() {
            let policy = handle.definition().default_retry.sweep;
            let result = async {
                let completed = clean(&handle, policy.completed_max_age(), policy.completed_limit, CleanState::Completed).await?;
                let failed = clean(&handle, policy.failed_max_age(), policy.failed_limit, CleanState::Failed).await?;
                Ok::<_, QueueError>(CleanupCounts { completed, failed })
            }
            .await;

            match result {
                Ok(counts) => {
                    self.metrics.record_cleaned(handle.name(), counts.total() as u64);
                    debug!(
                        queue = %handle.name(),
                        completed = counts.completed,
                        failed = counts.failed,
                        "Cleaned queue"
                    );
                    report.cleaned.push((handle.name().to_string(), counts));
                }
                Err(err) => {
                    error!(queue = %handle.name(), error = %err, "Cleanup failed for queue");
                    report.failures.push((handle.name().to_string(), err));
                }
            }
        }

        info!(
            removed = report.total_removed(),
            failed_queues = report.failures.len(),
            "Completed job cleanup"
        );
        report
    }

    /// Remove finished jobs older than `older_than` (default one day), without a cap
    #[instrument(skip(self))]
    pub async fn manual_cleanup(&self, queue: &str, older_than: Option<Duration>) -> QueueResult<CleanupCounts> {
        let handle = self.registry.resolve(queue)?;
        let age = older_than.unwrap_or(DEFAULT_MANUAL_CLEANUP_AGE);

        let (completed, failed) = futures::try_join!(
            clean(&handle, age, 0, CleanState::Completed),
            clean(&handle, age, 0, CleanState::Failed),
        )?;

        let counts = CleanupCounts { completed, failed };
        self.metrics.record_cleaned(queue, counts.total() as u64);
        info!(completed, failed, "Manual cleanup completed");
        Ok(counts)
    }

    /// Run `sweep` in the background on `schedule`
    pub fn spawn(self: Arc<Self>, schedule: SweepSchedule) -> QueueResult<CleanerHandle> {
        let mut trigger = schedule.trigger()?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let join_handle = tokio::spawn(async move {
            info!(?schedule, "Starting lifecycle cleaner");
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = trigger.wait() => {
                        self.sweep().await;
                    }
                }
            }
            debug!("Lifecycle cleaner stopped");
        });

        Ok(CleanerHandle { shutdown_tx, join_handle })
    }
}

async fn clean(handle: &QueueHandle, age: Duration, limit: usize, state: CleanState) -> QueueResult<usize> {
    handle
        .clean(age, limit, state)
        .await
        .map(|removed| removed.len())
        .map_err(|source| QueueError::Cleanup {
            queue: handle.name().to_string(),
            source,
        })
}

/// Handle for stopping the scheduled sweep
pub struct CleanerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl CleanerHandle {
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Cleaner join error: {}", e)))
    }
}
