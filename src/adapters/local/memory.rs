//! In-process lease queue.

use crate::domain::jobs::Job;
use crate::error::QueueError;
use crate::ports::queue::JobSource;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// How often a waiting lease re-checks for messages whose visibility lapsed.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
struct Message {
    id: String,
    body: String,
    receive_count: u32,
    visible_at: Instant,
    receipt: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    messages: VecDeque<Message>,
    next_id: u64,
    next_receipt: u64,
}

/// MemoryQueue implements JobSource with visibility timeouts, in memory.
#[derive(Clone, Debug)]
pub struct MemoryQueue {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
    visibility_timeout: Duration,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            notify: Arc::new(Notify::new()),
            visibility_timeout,
        }
    }

    /// Add a message and return its id.
    pub fn push(&self, body: impl Into<String>) -> String {
        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = format!("msg-{}", state.next_id);
            state.messages.push_back(Message {
                id: id.clone(),
                body: body.into(),
                receive_count: 0,
                visible_at: Instant::now(),
                receipt: None,
            });
            id
        };
        self.notify.notify_waiters();
        id
    }

    /// Number of messages not yet deleted, leased or not.
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave State half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_lease(&self) -> Option<Job> {
        let mut state = self.lock();
        let now = Instant::now();
        state.next_receipt += 1;
        let receipt = format!("receipt-{}", state.next_receipt);
        let visibility = self.visibility_timeout;

        let message = state.messages.iter_mut().find(|m| m.visible_at <= now)?;
        message.receive_count += 1;
        message.visible_at = now + visibility;
        message.receipt = Some(receipt.clone());
        Some(Job {
            id: message.id.clone(),
            receipt,
            body: message.body.clone(),
            delivery_count: message.receive_count,
        })
    }

    fn owned_index(state: &State, job: &Job) -> Result<usize, QueueError> {
        let now = Instant::now();
        state
            .messages
            .iter()
            .position(|m| {
                m.id == job.id && m.receipt.as_deref() == Some(job.receipt.as_str()) && m.visible_at > now
            })
            .ok_or_else(|| QueueError::LeaseExpired(job.id.clone()))
    }
}

#[async_trait]
impl JobSource for MemoryQueue {
    async fn lease(&self, max_wait: Duration) -> Result<Option<Job>, QueueError> {
        let deadline = Instant::now() + max_wait;
        loop {
            let notified = self.notify.notified();
            if let Some(job) = self.try_lease() {
                return Ok(Some(job));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wake = deadline.min(now + POLL_INTERVAL);
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    async fn delete(&self, job: &Job) -> Result<(), QueueError> {
        let mut state = self.lock();
        let index = Self::owned_index(&state, job)?;
        state.messages.remove(index);
        Ok(())
    }

    async fn extend_visibility(&self, job: &Job, duration: Duration) -> Result<(), QueueError> {
        let mut state = self.lock();
        let index = Self::owned_index(&state, job)?;
        state.messages[index].visible_at = Instant::now() + duration;
        Ok(())
    }
}
