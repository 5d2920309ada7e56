use crate::config::MAX_LEASE_WAIT;
use crate::domain::jobs::Job;
use crate::error::QueueError;
use crate::ports::queue::JobSource;
use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::operation::change_message_visibility::ChangeMessageVisibilityError;
use aws_sdk_sqs::operation::delete_message::DeleteMessageError;
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName};
use aws_sdk_sqs::Client;
use std::time::Duration;
use tracing::warn;

/// SqsAdapter implements JobSource for AWS SQS.
#[derive(Clone)]
pub struct SqsAdapter {
    client: Client,
    queue_url: String,
    visibility_timeout: Duration,
}

impl SqsAdapter {
    pub fn new(client: Client, queue_url: String, visibility_timeout: Duration) -> Self {
        Self {
            client,
            queue_url,
            visibility_timeout,
        }
    }
}

/// Whole seconds for SQS, rounding up so short waits are not turned into zero.
fn ceil_secs(duration: Duration) -> i32 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    i32::try_from(secs).unwrap_or(i32::MAX)
}

fn into_job(msg: Message) -> Option<Job> {
    let receipt = msg.receipt_handle().filter(|r| !r.is_empty())?.to_string();
    let delivery_count = msg
        .attributes()
        .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|count| count.parse().ok())
        .unwrap_or(1);
    Some(Job {
        id: msg.message_id().unwrap_or_default().to_string(),
        receipt,
        body: msg.body().unwrap_or_default().to_string(),
        delivery_count,
    })
}

#[async_trait]
impl JobSource for SqsAdapter {
    async fn lease(&self, max_wait: Duration) -> Result<Option<Job>, QueueError> {
        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(ceil_secs(max_wait.min(MAX_LEASE_WAIT)))
            .visibility_timeout(ceil_secs(self.visibility_timeout))
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| QueueError::transport(DisplayErrorContext(&e)))?;

        if let Some(msg) = resp.messages.unwrap_or_default().into_iter().next() {
            let id = msg.message_id().unwrap_or_default().to_string();
            match into_job(msg) {
                Some(job) => return Ok(Some(job)),
                None => warn!(message_id = %id, "received message without receipt handle, skipping"),
            }
        }
        Ok(None)
    }

    async fn delete(&self, job: &Job) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&job.receipt)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(DeleteMessageError::ReceiptHandleIsInvalid(_))
                | Some(DeleteMessageError::InvalidIdFormat(_)) => QueueError::LeaseExpired(job.id.clone()),
                _ => QueueError::transport(DisplayErrorContext(&e)),
            })?;
        Ok(())
    }

    async fn extend_visibility(&self, job: &Job, duration: Duration) -> Result<(), QueueError> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(&job.receipt)
            .visibility_timeout(ceil_secs(duration))
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(ChangeMessageVisibilityError::MessageNotInflight(_))
                | Some(ChangeMessageVisibilityError::ReceiptHandleIsInvalid(_)) => {
                    QueueError::LeaseExpired(job.id.clone())
                }
                _ => QueueError::transport(DisplayErrorContext(&e)),
            })?;
        Ok(())
    }
}
