pub mod handle;
pub mod memory;

pub use handle::QueueHandle;

use async_trait::async_trait;
use futures_core::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

use crate::{
    BrokerResult, JobId,
    types::{
        BrokerNotification, CleanState, JobCounts, JobRecord, JobSubmission, LeaseToken, LeasedJob,
        QueueDefinition,
    },
};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Boundary with the durable queue store.
///
/// Every method addresses a queue by name; the queue must have been
/// `create`d first. Concurrency limits, retries, delays and retention are
/// the broker's responsibility.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a queue and its concurrency bound
    async fn create(&self, definition: &QueueDefinition) -> BrokerResult<()>;

    /// Accept one job and assign its id
    async fn submit(&self, queue: &str, submission: JobSubmission) -> BrokerResult<JobId>;

    /// Accept a batch atomically: either every job is stored or none is.
    /// Ids are returned in submission order.
    async fn submit_bulk(&self, queue: &str, submissions: Vec<JobSubmission>) -> BrokerResult<Vec<JobId>>;

    async fn get(&self, queue: &str, job_id: &JobId) -> BrokerResult<Option<JobRecord>>;

    /// Delete a job in any state. `false` when it does not exist.
    async fn remove(&self, queue: &str, job_id: &JobId) -> BrokerResult<bool>;

    /// Stop handing out jobs. Idempotent.
    async fn pause(&self, queue: &str) -> BrokerResult<()>;

    /// Resume handing out jobs. Idempotent.
    async fn resume(&self, queue: &str) -> BrokerResult<()>;

    async fn is_paused(&self, queue: &str) -> BrokerResult<bool>;

    /// Remove finished jobs older than `older_than`, oldest first.
    /// `limit == 0` means unbounded. Returns the removed ids in removal order.
    async fn clean(
        &self,
        queue: &str,
        older_than: Duration,
        limit: usize,
        state: CleanState,
    ) -> BrokerResult<Vec<JobId>>;

    async fn counts(&self, queue: &str) -> BrokerResult<JobCounts>;

    /// Open a listener registration for lifecycle notifications of one queue
    async fn subscribe(&self, queue: &str) -> BrokerResult<Box<dyn BrokerSubscription>>;

    /// Lease the next eligible job for a worker, honoring pause and concurrency.
    /// Every claim issues a fresh lease token.
    async fn claim(&self, queue: &str) -> BrokerResult<Option<LeasedJob>>;

    /// Renew the lock of an active job held under `lease_token`
    async fn extend_lock(
        &self,
        queue: &str,
        job_id: &JobId,
        lease_token: &LeaseToken,
        duration: Duration,
    ) -> BrokerResult<()>;

    /// Acknowledge job completion (lease token required)
    async fn ack_complete(
        &self,
        queue: &str,
        job_id: &JobId,
        lease_token: &LeaseToken,
        return_value: Value,
    ) -> BrokerResult<()>;

    /// Acknowledge job failure; the broker decides whether attempts remain.
    /// `retryable == false` fails the job regardless of remaining attempts.
    /// A stale `lease_token` is rejected.
    async fn ack_fail(
        &self,
        queue: &str,
        job_id: &JobId,
        lease_token: &LeaseToken,
        reason: String,
        retryable: bool,
    ) -> BrokerResult<()>;
}

/// One broker-side listener registration
#[async_trait]
pub trait BrokerSubscription: Send {
    /// Next notification in the order the broker raised it.
    /// `None` once the broker side is gone.
    async fn next(&mut self) -> Option<BrokerNotification>;

    /// Release the broker-side registration
    async fn close(self: Box<Self>) -> BrokerResult<()>;
}
