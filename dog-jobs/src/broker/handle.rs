use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{Broker, BrokerSubscription};
use crate::{
    BrokerResult, JobId,
    types::{CleanState, JobCounts, JobRecord, JobSubmission, LeasedJob, QueueDefinition},
};

/// Live binding of a registered queue to the broker.
///
/// Created only by the registry; clones share the same definition and
/// broker connection.
#[derive(Clone)]
pub struct QueueHandle {
    definition: Arc<QueueDefinition>,
    broker: Arc<dyn Broker>,
}

impl QueueHandle {
    pub(crate) fn new(definition: QueueDefinition, broker: Arc<dyn Broker>) -> Self {
        Self {
            definition: Arc::new(definition),
            broker,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &QueueDefinition {
        &self.definition
    }

    pub fn concurrency(&self) -> usize {
        self.definition.concurrency
    }

    /// Two handles refer to the same registration
    pub fn same_as(&self, other: &QueueHandle) -> bool {
        Arc::ptr_eq(&self.definition, &other.definition)
    }

    pub async fn submit(&self, submission: JobSubmission) -> BrokerResult<JobId> {
        self.broker.submit(self.name(), submission).await
    }

    pub async fn submit_bulk(&self, submissions: Vec<JobSubmission>) -> BrokerResult<Vec<JobId>> {
        self.broker.submit_bulk(self.name(), submissions).await
    }

    pub async fn get(&self, job_id: &JobId) -> BrokerResult<Option<JobRecord>> {
        self.broker.get(self.name(), job_id).await
    }

    pub async fn remove(&self, job_id: &JobId) -> BrokerResult<bool> {
        self.broker.remove(self.name(), job_id).await
    }

    pub async fn pause(&self) -> BrokerResult<()> {
        self.broker.pause(self.name()).await
    }

    pub async fn resume(&self) -> BrokerResult<()> {
        self.broker.resume(self.name()).await
    }

    pub async fn is_paused(&self) -> BrokerResult<bool> {
        self.broker.is_paused(self.name()).await
    }

    pub async fn clean(&self, older_than: Duration, limit: usize, state: CleanState) -> BrokerResult<Vec<JobId>> {
        self.broker.clean(self.name(), older_than, limit, state).await
    }

    pub async fn counts(&self) -> BrokerResult<JobCounts> {
        self.broker.counts(self.name()).await
    }

    pub async fn subscribe(&self) -> BrokerResult<Box<dyn BrokerSubscription>> {
        self.broker.subscribe(self.name()).await
    }

    pub async fn claim(&self) -> BrokerResult<Option<LeasedJob>> {
        self.broker.claim(self.name()).await
    }

    pub async fn extend_lock(&self, leased: &LeasedJob, duration: Duration) -> BrokerResult<()> {
        self.broker
            .extend_lock(self.name(), leased.job_id(), &leased.lease_token, duration)
            .await
    }

    pub async fn ack_complete(&self, leased: &LeasedJob, return_value: Value) -> BrokerResult<()> {
        self.broker
            .ack_complete(self.name(), leased.job_id(), &leased.lease_token, return_value)
            .await
    }

    pub async fn ack_fail(&self, leased: &LeasedJob, reason: String, retryable: bool) -> BrokerResult<()> {
        self.broker
            .ack_fail(self.name(), leased.job_id(), &leased.lease_token, reason, retryable)
            .await
    }
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("name", &self.definition.name)
            .field("concurrency", &self.definition.concurrency)
            .finish()
    }
}
