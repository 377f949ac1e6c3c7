//! # dog-jobs: multi-queue background job orchestration
//!
//! Named queues with their own concurrency, retry, backoff and retention
//! policies, sitting on top of a pluggable [`Broker`].
//!
//! - **[`QueueRegistry`]**: queue name → live [`QueueHandle`]
//! - **[`JobDispatcher`]**: option resolution, submission, `job.added` / `jobs.bulk_added`
//! - **[`EventBridge`]**: one broker subscription per queue, republished on the [`EventBus`]
//! - **[`LifecycleCleaner`]**: scheduled sweep and on-demand cleanup of finished jobs
//! - **[`QueueControl`]**: pause, resume and job counts
//! - **[`ProcessorRegistry`] / [`WorkerPool`]**: processors bound to queues and the workers running them
//!
//! [`QueueEngine`] wires them together from a [`QueueConfig`].
//! [`MemoryBroker`](broker::memory::MemoryBroker) is the in-process broker used
//! in tests and single-node setups.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dog_jobs::prelude::*;
//! use dog_jobs::broker::memory::MemoryBroker;
//! use serde_json::json;
//!
//! # async fn run() -> QueueResult<()> {
//! let engine = QueueEngine::start(Arc::new(MemoryBroker::new()), QueueConfig::default()).await?;
//!
//! engine.register_processor(
//!     "email-queue",
//!     processor_fn(|job: Job| async move {
//!         println!("sending {}", job.payload);
//!         Ok(json!({ "sent": true }))
//!     }),
//!     None,
//! )?;
//! engine.start_workers().await?;
//!
//! let mut events = engine.bus().stream_named("job.completed");
//! engine
//!     .dispatcher()
//!     .enqueue("email-queue", "welcome-email", json!({ "to": "ada@example.com" }), None)
//!     .await?;
//!
//! # use futures::StreamExt;
//! let completed = events.next().await;
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod broker;
pub mod bus;
pub mod cleaner;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod observability;
pub mod processor;
pub mod registry;
pub mod types;
pub mod worker;

pub use bridge::{EventBridge, SubscriptionHandle};
pub use broker::{Broker, BrokerSubscription, QueueHandle};
pub use bus::EventBus;
pub use cleaner::{CleanerHandle, CleanupCounts, LifecycleCleaner, SweepReport, SweepSchedule};
pub use config::{CleanerConfig, QueueConfig};
pub use control::QueueControl;
pub use dispatcher::JobDispatcher;
pub use engine::QueueEngine;
pub use error::{BrokerError, BrokerResult, JobError, QueueError, QueueResult};
pub use observability::LiveMetrics;
pub use processor::{processor_fn, JobProcessor, ProcessorRegistry};
pub use registry::QueueRegistry;
pub use types::{
    BackoffSpec, BulkItem, Job, JobCounts, JobId, JobOptions, JobPayload, JobPriority, JobRecord,
    JobState, LeaseToken, LeasedJob, LifecycleEvent, LifecycleKind, QueueDefinition, QueueEvent,
    Retention, RetryPolicy,
};
pub use worker::{WorkerConfig, WorkerHandle, WorkerPool};

#[cfg(feature = "tracing-basic")]
pub use observability::{init_tracing, LogFormat};

/// Everything needed to define queues, dispatch jobs and process them
pub mod prelude {
    pub use crate::{
        processor_fn, BulkItem, EventBus, Job, JobDispatcher, JobError, JobOptions, JobPayload,
        JobPriority, JobProcessor, QueueConfig, QueueDefinition, QueueEngine, QueueError,
        QueueEvent, QueueResult, RetryPolicy,
    };

    pub use async_trait::async_trait;
}
