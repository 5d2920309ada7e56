//! The steady-state lease/process loop and a pool of such loops.

use super::worker::{JobOutcome, JobWorker};
use crate::config::WorkerConfig;
use crate::error::QueueError;
use crate::ports::queue::JobSource;
use crate::ports::storage::ObjectStore;
use crate::ports::transcoder::Transcoder;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

/// Exponential delay keyed by the number of consecutive failures.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// `base * 2^(failures - 1)`, capped at `max`; zero after a success.
    pub fn delay(&self) -> Duration {
        if self.failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(self.failures - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LoopSettings {
    pub lease_wait: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl From<&WorkerConfig> for LoopSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            lease_wait: config.lease_wait,
            backoff_base: config.backoff_base,
            backoff_max: config.backoff_max,
        }
    }
}

/// What a single loop iteration did.
#[derive(Debug)]
pub enum Iteration {
    /// The lease wait elapsed without a message.
    Idle,
    Processed(JobOutcome),
    LeaseFailed(QueueError),
    Cancelled,
}

/// Counters for one or more loops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub acked: u64,
    pub failed: u64,
    pub discarded: u64,
    pub lease_errors: u64,
}

impl AddAssign for LoopStats {
    fn add_assign(&mut self, other: Self) {
        self.acked += other.acked;
        self.failed += other.failed;
        self.discarded += other.discarded;
        self.lease_errors += other.lease_errors;
    }
}

pub struct WorkerLoop<Q, S, T> {
    id: usize,
    worker: Arc<JobWorker<Q, S, T>>,
    lease_wait: Duration,
    backoff: Backoff,
    stats: LoopStats,
}

impl<Q, S, T> WorkerLoop<Q, S, T>
where
    Q: JobSource + 'static,
    S: ObjectStore + 'static,
    T: Transcoder + 'static,
{
    pub fn new(id: usize, worker: Arc<JobWorker<Q, S, T>>, settings: LoopSettings) -> Self {
        Self {
            id,
            worker,
            lease_wait: settings.lease_wait,
            backoff: Backoff::new(settings.backoff_base, settings.backoff_max),
            stats: LoopStats::default(),
        }
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Run until `cancel` fires. Job failures never end the loop.
    pub async fn run(mut self, cancel: CancellationToken) -> LoopStats {
        let span = info_span!("worker", worker = self.id);
        async {
            info!("started");
            loop {
                if let Iteration::Cancelled = self.run_once(&cancel).await {
                    break;
                }
                let delay = self.backoff.delay();
                if !delay.is_zero() {
                    warn!(
                        failures = self.backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        "backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
            info!(stats = ?self.stats, "stopped");
            self.stats
        }
        .instrument(span)
        .await
    }

    /// Lease at most one job and process it.
    pub async fn run_once(&mut self, cancel: &CancellationToken) -> Iteration {
        if cancel.is_cancelled() {
            return Iteration::Cancelled;
        }

        let leased = tokio::select! {
            _ = cancel.cancelled() => return Iteration::Cancelled,
            leased = self.worker.source().lease(self.lease_wait) => leased,
        };
        let job = match leased {
            Ok(Some(job)) => job,
            Ok(None) => return Iteration::Idle,
            Err(e) => {
                warn!(error = %e, "lease failed");
                self.stats.lease_errors += 1;
                self.backoff.record_failure();
                return Iteration::LeaseFailed(e);
            }
        };

        // Dropping the job future on cancellation kills the encoder and removes scratch files.
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(job_id = %job.id, "cancelled mid-job; message will be redelivered");
                return Iteration::Cancelled;
            }
            outcome = self.worker.process(&job) => outcome,
        };

        match &outcome {
            JobOutcome::Acked => {
                self.stats.acked += 1;
                self.backoff.record_success();
            }
            JobOutcome::Discarded => {
                self.stats.discarded += 1;
                self.backoff.record_success();
            }
            JobOutcome::Failed(_) => {
                self.stats.failed += 1;
                self.backoff.record_failure();
            }
        }
        Iteration::Processed(outcome)
    }
}

/// Runs `size` independent loops over one shared worker.
pub struct WorkerPool<Q, S, T> {
    worker: Arc<JobWorker<Q, S, T>>,
    size: usize,
    settings: LoopSettings,
}

impl<Q, S, T> WorkerPool<Q, S, T>
where
    Q: JobSource + 'static,
    S: ObjectStore + 'static,
    T: Transcoder + 'static,
{
    pub fn new(worker: JobWorker<Q, S, T>, size: usize, settings: LoopSettings) -> Self {
        Self {
            worker: Arc::new(worker),
            size: size.max(1),
            settings,
        }
    }

    /// Spawn every loop. Returns handles to all worker tasks.
    pub fn start(&self, cancel: &CancellationToken) -> Vec<JoinHandle<LoopStats>> {
        (0..self.size)
            .map(|id| {
                let worker_loop = WorkerLoop::new(id, self.worker.clone(), self.settings);
                tokio::spawn(worker_loop.run(cancel.child_token()))
            })
            .collect()
    }

    /// Run every loop until `cancel` fires and sum their counters.
    pub async fn run(&self, cancel: CancellationToken) -> LoopStats {
        let mut total = LoopStats::default();
        for joined in futures::future::join_all(self.start(&cancel)).await {
            match joined {
                Ok(stats) => total += stats,
                Err(e) => warn!(error = %e, "worker task ended abnormally"),
            }
        }
        total
    }
}
