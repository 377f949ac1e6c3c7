use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::MemoryBroker;
use crate::{
    JobId, QueueError, QueueResult,
    types::{BrokerNotification, JobState, LifecycleKind},
};

/// Reclaims active jobs whose worker stopped renewing the lock
pub struct StallMonitor {
    broker: MemoryBroker,
    interval: Duration,
}

impl StallMonitor {
    pub fn new(broker: MemoryBroker) -> Self {
        Self {
            broker,
            interval: Duration::from_secs(30),
        }
    }

    pub fn with_interval(broker: MemoryBroker, interval: Duration) -> Self {
        Self { broker, interval }
    }

    /// Run the monitor in the background until the handle is shut down
    pub fn spawn(self) -> StallMonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let join_handle = tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            info!("Starting stall monitor with interval: {:?}", self.interval);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let reclaimed = self.check_stalled();
                        if reclaimed > 0 {
                            info!("Reclaimed {} stalled jobs", reclaimed);
                        } else {
                            debug!("No stalled jobs found");
                        }
                    }
                }
            }
        });

        StallMonitorHandle { shutdown_tx, join_handle }
    }

    /// Run one detection pass; returns how many jobs were found stalled
    pub fn check_stalled(&self) -> usize {
        let now = Utc::now();
        let mut queues = self.broker.queues.lock();
        let mut stalled = 0;

        for (name, state) in queues.iter_mut() {
            if state.outage {
                continue;
            }

            let expired: Vec<JobId> = state
                .active
                .keys()
                .filter(|id| state.jobs.get(*id).map(|r| r.lock_expired(now)).unwrap_or(false))
                .cloned()
                .collect();

            let max_stalled = state.definition.stall.max_stalled_count;
            for job_id in expired {
                let Some(record) = state.jobs.get_mut(&job_id) else {
                    continue;
                };
                record.stalled_count += 1;
                let exceeded = record.stalled_count > max_stalled;

                warn!(queue = %name, job_id = %job_id, stalled_count = record.stalled_count, "Job lock expired");
                state.notify(BrokerNotification::new(job_id.clone(), LifecycleKind::Stalled));

                if exceeded {
                    state.fail_terminally(job_id, "job stalled more than allowable limit".to_string(), now);
                } else {
                    record_waiting(state, job_id);
                }
                stalled += 1;
            }
        }

        stalled
    }
}

fn record_waiting(state: &mut super::state::QueueState, job_id: JobId) {
    state.active.remove(&job_id);
    if let Some(record) = state.jobs.get_mut(&job_id) {
        record.state = JobState::Waiting;
        record.locked_until = None;
    }
    state.push_waiting(job_id);
}

/// Handle for stopping a running stall monitor
pub struct StallMonitorHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl StallMonitorHandle {
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Stall monitor join error: {}", e)))
    }
}
