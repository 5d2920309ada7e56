use crate::domain::jobs::Job;
use crate::error::QueueError;
use async_trait::async_trait;
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Lease one message, waiting at most `max_wait` for one to become visible.
    /// Returns `Ok(None)` when the wait elapses without a message.
    async fn lease(&self, max_wait: Duration) -> Result<Option<Job>, QueueError>;

    /// Permanently remove a leased message
    async fn delete(&self, job: &Job) -> Result<(), QueueError>;

    /// Push the lease deadline `duration` into the future
    async fn extend_visibility(&self, job: &Job, duration: Duration) -> Result<(), QueueError>;
}
