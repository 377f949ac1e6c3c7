pub mod ids;
pub mod priority;
pub mod options;
pub mod definition;
pub mod message;
pub mod record;
pub mod events;

pub use ids::{JobId, LeaseToken, SubscriptionId};
pub use priority::JobPriority;
pub use options::{BackoffKind, BackoffSpec, JobOptions, ResolvedJobOptions, Retention};
pub use definition::{
    QueueDefinition, RetryPolicy, StallSettings, SweepPolicy, MAX_CONCURRENCY, MAX_STALLED_INTERVAL_MS,
};
pub use message::{BulkItem, JobPayload, JobSubmission};
pub use record::{CleanState, Job, JobCounts, JobRecord, JobState, LeasedJob};
pub use events::{BrokerNotification, LifecycleEvent, LifecycleKind, QueueEvent};
