use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{JobOptions, ResolvedJobOptions};

/// Submission data handed to the broker after option resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub job_type: String,
    pub payload: Value,
    pub options: ResolvedJobOptions,
    pub enqueued_at: DateTime<Utc>,
}

/// One entry of a bulk enqueue, options still unresolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItem {
    pub job_type: String,
    pub payload: Value,
    #[serde(default)]
    pub options: Option<JobOptions>,
}

impl BulkItem {
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            options: None,
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Typed payload bound to a queue and job type at compile time.
///
/// ```
/// use dog_jobs::JobPayload;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct WelcomeEmail {
///     to: String,
/// }
///
/// impl JobPayload for WelcomeEmail {
///     const QUEUE: &'static str = "email-queue";
///     const JOB_TYPE: &'static str = "welcome-email";
/// }
/// ```
pub trait JobPayload: Serialize + Send + Sync {
    /// Queue the payload is dispatched to
    const QUEUE: &'static str;

    /// Job type tag
    const JOB_TYPE: &'static str;

    /// Per-job overrides (default: queue defaults only)
    fn options(&self) -> Option<JobOptions> {
        None
    }
}
