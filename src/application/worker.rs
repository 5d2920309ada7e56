use crate::config::WorkerConfig;
use crate::domain::jobs::{Job, JobState, WorkItem};
use crate::domain::profile::ProfileTable;
use crate::error::{JobError, QueueError};
use crate::ports::queue::JobSource;
use crate::ports::storage::{ObjectStore, PutOptions};
use crate::ports::transcoder::Transcoder;
use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Per-job policy shared by every loop in the process.
#[derive(Clone, Debug)]
pub struct JobSettings {
    pub work_dir: PathBuf,
    pub default_profile: String,
    pub profiles: ProfileTable,
    pub upload: PutOptions,
    pub visibility_timeout: Duration,
    pub lease_renewal: Option<Duration>,
    pub max_deliveries: Option<u32>,
}

impl From<&WorkerConfig> for JobSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            default_profile: config.default_profile.clone(),
            profiles: config.profiles.clone(),
            upload: config.upload,
            visibility_timeout: config.visibility_timeout,
            lease_renewal: config.lease_renewal,
            max_deliveries: config.max_deliveries,
        }
    }
}

/// How a leased job left the worker.
#[derive(Debug)]
pub enum JobOutcome {
    /// Every step succeeded and the message was deleted.
    Acked,
    /// A step failed. The message was left on the queue for redelivery.
    Failed(JobError),
    /// Delivered more than `max_deliveries` times; deleted without processing.
    Discarded,
}

impl JobOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failed(_))
    }
}

/// Runs one leased job through fetch, transcode, upload and acknowledge.
pub struct JobWorker<Q, S, T> {
    source: Q,
    storage: S,
    transcoder: T,
    settings: JobSettings,
}

impl<Q, S, T> JobWorker<Q, S, T>
where
    Q: JobSource,
    S: ObjectStore,
    T: Transcoder,
{
    pub fn new(source: Q, storage: S, transcoder: T, settings: JobSettings) -> Self {
        Self {
            source,
            storage,
            transcoder,
            settings,
        }
    }

    pub fn source(&self) -> &Q {
        &self.source
    }

    /// Process a job to completion. Never panics on job errors and never
    /// deletes the message unless every step succeeded.
    pub async fn process(&self, job: &Job) -> JobOutcome {
        let span = info_span!("job", job_id = %job.id, delivery = job.delivery_count);
        async {
            if let Some(max) = self.settings.max_deliveries {
                if job.delivery_count > max {
                    return self.discard(job, max).await;
                }
            }

            let pipeline = self.run_pipeline(job);
            let result = match self.settings.lease_renewal {
                Some(interval) => tokio::select! {
                    result = pipeline => result,
                    never = self.keep_leased(job, interval) => match never {},
                },
                None => pipeline.await,
            };

            match result {
                Ok(()) => JobOutcome::Acked,
                Err(e) => {
                    if let JobError::Ack(QueueError::LeaseExpired(_)) = e {
                        warn!(state = %e.state(), error = %e, "lease expired before acknowledge; job will be redelivered");
                    } else {
                        error!(state = %e.state(), error = %e, "job failed; leaving message for redelivery");
                    }
                    JobOutcome::Failed(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_pipeline(&self, job: &Job) -> Result<(), JobError> {
        let payload = job.payload()?;
        let profile_name = payload
            .profile
            .as_deref()
            .unwrap_or(&self.settings.default_profile);
        let profile = self.settings.profiles.resolve(profile_name)?;
        let item = WorkItem::create(&self.settings.work_dir, &job.id, &payload, profile)
            .map_err(JobError::Scratch)?;

        self.storage
            .fetch_to_file(&payload.source_object_name, &item.input_path)
            .await
            .map_err(JobError::Fetch)?;
        debug!(state = %JobState::Fetched, object = %payload.source_object_name);

        self.transcoder
            .run(&item.input_path, &item.output_path, &item.profile)
            .await?;
        debug!(state = %JobState::Transcoded, profile = %item.profile.name);

        self.storage
            .put_from_file(&item.output_path, &item.output_object_name, &self.settings.upload)
            .await
            .map_err(JobError::Upload)?;
        debug!(state = %JobState::Uploaded, object = %item.output_object_name);

        let output_object_name = item.output_object_name.clone();
        drop(item);

        self.source.delete(job).await.map_err(JobError::Ack)?;
        info!(
            state = %JobState::Acked,
            source = %payload.source_object_name,
            output = %output_object_name,
            profile = %profile_name,
            "transcoded"
        );
        Ok(())
    }

    async fn keep_leased(&self, job: &Job, interval: Duration) -> Infallible {
        loop {
            tokio::time::sleep(interval).await;
            match self
                .source
                .extend_visibility(job, self.settings.visibility_timeout)
                .await
            {
                Ok(()) => debug!("lease extended"),
                Err(e) => warn!(error = %e, "failed to extend lease"),
            }
        }
    }

    async fn discard(&self, job: &Job, max: u32) -> JobOutcome {
        error!(max_deliveries = max, body = %job.body, "delivery limit exceeded; dropping message");
        match self.source.delete(job).await {
            Ok(()) => JobOutcome::Discarded,
            Err(e) => {
                warn!(error = %e, "failed to drop message");
                JobOutcome::Failed(JobError::Ack(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profile::EncodingProfile;
    use crate::error::{StorageError, TranscodeError};
    use crate::ports::queue::MockJobSource;
    use crate::ports::storage::MockObjectStore;
    use crate::ports::transcoder::MockTranscoder;
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn job(body: &str) -> Job {
        Job {
            id: "msg-1".to_string(),
            receipt: "receipt-1".to_string(),
            body: body.to_string(),
            delivery_count: 1,
        }
    }

    fn settings(work_dir: &Path, profile: &str) -> JobSettings {
        JobSettings {
            work_dir: work_dir.to_path_buf(),
            default_profile: profile.to_string(),
            profiles: ProfileTable::default(),
            upload: PutOptions::default(),
            visibility_timeout: Duration::from_secs(30),
            lease_renewal: None,
            max_deliveries: None,
        }
    }

    fn assert_no_leftovers(dir: &TempDir) {
        let left: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(left.is_empty(), "scratch files left behind: {:?}", left);
    }

    fn fetch_writes_input(storage: &mut MockObjectStore) {
        storage
            .expect_fetch_to_file()
            .withf(|name, _| name == "clip.mp4")
            .times(1)
            .returning(|_, path| {
                std::fs::write(path, b"source").unwrap();
                Ok(())
            });
    }

    fn transcode_writes_output(transcoder: &mut MockTranscoder, height: u32, bitrate: &'static str) {
        transcoder
            .expect_run()
            .withf(move |input, _, profile| {
                input.exists() && profile.height == height && profile.video_bitrate == bitrate
            })
            .times(1)
            .returning(|_, output, _| {
                std::fs::write(output, b"encoded").unwrap();
                Ok(())
            });
    }

    fn failed_state(outcome: JobOutcome) -> JobState {
        match outcome {
            JobOutcome::Failed(e) => e.state(),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_runs_every_step_in_order() {
        let work = tempdir().unwrap();
        let mut seq = Sequence::new();
        let mut source = MockJobSource::new();
        let mut storage = MockObjectStore::new();
        let mut transcoder = MockTranscoder::new();

        storage
            .expect_fetch_to_file()
            .withf(|name, _| name == "clip.mp4")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, path| {
                std::fs::write(path, b"source").unwrap();
                Ok(())
            });
        transcoder
            .expect_run()
            .withf(|_, _, profile| profile.scale_filter() == "scale=-2:720" && profile.video_bitrate == "2M")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, output, _| {
                std::fs::write(output, b"encoded").unwrap();
                Ok(())
            });
        storage
            .expect_put_from_file()
            .withf(|path, name, _| path.exists() && name == "clip_720.mp4")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        source
            .expect_delete()
            .with(eq(job(r#"{"sourceObjectName":"clip.mp4"}"#)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let worker = JobWorker::new(source, storage, transcoder, settings(work.path(), "720"));
        let outcome = worker.process(&job(r#"{"sourceObjectName":"clip.mp4"}"#)).await;

        assert!(matches!(outcome, JobOutcome::Acked));
        assert_no_leftovers(&work);
    }

    #[tokio::test]
    async fn test_480_uses_default_bitrate() {
        let work = tempdir().unwrap();
        let mut source = MockJobSource::new();
        let mut storage = MockObjectStore::new();
        let mut transcoder = MockTranscoder::new();

        fetch_writes_input(&mut storage);
        transcode_writes_output(&mut transcoder, 480, "1M");
        storage
            .expect_put_from_file()
            .withf(|_, name, _| name == "clip_480.mp4")
            .times(1)
            .returning(|_, _, _| Ok(()));
        source.expect_delete().times(1).returning(|_| Ok(()));

        let worker = JobWorker::new(source, storage, transcoder, settings(work.path(), "480"));
        let outcome = worker.process(&job(r#"{"sourceObjectName":"clip.mp4"}"#)).await;

        assert!(matches!(outcome, JobOutcome::Acked));
        assert_no_leftovers(&work);
    }

    #[tokio::test]
    async fn test_payload_profile_overrides_default() {
        let work = tempdir().unwrap();
        let mut source = MockJobSource::new();
        let mut storage = MockObjectStore::new();
        let mut transcoder = MockTranscoder::new();

        fetch_writes_input(&mut storage);
        transcode_writes_output(&mut transcoder, 720, "2M");
        storage
            .expect_put_from_file()
            .withf(|_, name, _| name == "clip_720.mp4")
            .times(1)
            .returning(|_, _, _| Ok(()));
        source.expect_delete().times(1).returning(|_| Ok(()));

        let worker = JobWorker::new(source, storage, transcoder, settings(work.path(), "480"));
        let outcome = worker
            .process(&job(r#"{"sourceObjectName":"clip.mp4","profile":"720"}"#))
            .await;
        assert!(matches!(outcome, JobOutcome::Acked));
    }

    #[tokio::test]
    async fn test_fetch_not_found_stops_before_transcode() {
        let work = tempdir().unwrap();
        let mut source = MockJobSource::new();
        let mut storage = MockObjectStore::new();
        let mut transcoder = MockTranscoder::new();

        storage
            .expect_fetch_to_file()
            .times(1)
            .returning(|name, _| Err(StorageError::NotFound(name.to_string())));
        transcoder.expect_run().never();
        storage.expect_put_from_file().never();
        source.expect_delete().never();

        let worker = JobWorker::new(source, storage, transcoder, settings(work.path(), "720"));
        let outcome = worker.process(&job(r#"{"sourceObjectName":"clip.mp4"}"#)).await;

        assert_eq!(failed_state(outcome), JobState::Leased);
        assert_no_leftovers(&work);
    }

    #[tokio::test]
    async fn test_transcode_failure_stops_before_upload() {
        let work = tempdir().unwrap();
        let mut source = MockJobSource::new();
        let mut storage = MockObjectStore::new();
        let mut transcoder = MockTranscoder::new();

        fetch_writes_input(&mut storage);
        transcoder.expect_run().times(1).returning(|_, output, _| {
            std::fs::write(output, b"partial").unwrap();
            Err(TranscodeError::Timeout(600))
        });
        storage.expect_put_from_file().never();
        source.expect_delete().never();

        let worker = JobWorker::new(source, storage, transcoder, settings(work.path(), "720"));
        let outcome = worker.process(&job(r#"{"sourceObjectName":"clip.mp4"}"#)).await;

        assert_eq!(failed_state(outcome), JobState::Fetched);
        assert_no_leftovers(&work);
    }

    #[tokio::test]
    async fn test_upload_failure_does_not_acknowledge() {
        let work = tempdir().unwrap();
        let mut source = MockJobSource::new();
        let mut storage = MockObjectStore::new();
        let mut transcoder = MockTranscoder::new();

        fetch_writes_input(&mut storage);
        transcode_writes_output(&mut transcoder, 720, "2M");
        storage
            .expect_put_from_file()
            .times(1)
            .returning(|_, _, _| Err(StorageError::Transport("connection reset".to_string())));
        source.expect_delete().never();

        let worker = JobWorker::new(source, storage, transcoder, settings(work.path(), "720"));
        let outcome = worker.process(&job(r#"{"sourceObjectName":"clip.mp4"}"#)).await;

        assert_eq!(failed_state(outcome), JobState::Transcoded);
        assert_no_leftovers(&work);
    }

    #[tokio::test]
    async fn test_expired_lease_on_delete_is_a_failure() {
        let work = tempdir().unwrap();
        let mut source = MockJobSource::new();
        let mut storage = MockObjectStore::new();
        let mut transcoder = MockTranscoder::new();

        fetch_writes_input(&mut storage);
        transcode_writes_output(&mut transcoder, 720, "2M");
        storage.expect_put_from_file().times(1).returning(|_, _, _| Ok(()));
        source
            .expect_delete()
            .times(1)
            .returning(|job| Err(QueueError::LeaseExpired(job.id.clone())));

        let worker = JobWorker::new(source, storage, transcoder, settings(work.path(), "720"));
        let outcome = worker.process(&job(r#"{"sourceObjectName":"clip.mp4"}"#)).await;

        assert_eq!(failed_state(outcome), JobState::Uploaded);
        assert_no_leftovers(&work);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_skipped_without_delete() {
        let work = tempdir().unwrap();
        let mut source = MockJobSource::new();
        let mut storage = MockObjectStore::new();
        let transcoder = MockTranscoder::new();

        storage.expect_fetch_to_file().never();
        source.expect_delete().never();

        let worker = JobWorker::new(source, storage, transcoder, settings(work.path(), "720"));
        let outcome = worker.process(&job(r#"{"profile":"720"}"#)).await;
        assert!(matches!(outcome, JobOutcome::Failed(JobError::Malformed(_))));

        let outcome = worker
            .process(&job(r#"{"sourceObjectName":"clip.mp4","profile":"hd"}"#))
            .await;
        assert!(matches!(outcome, JobOutcome::Failed(JobError::Malformed(_))));
        assert_no_leftovers(&work);
    }

    #[tokio::test]
    async fn test_poison_message_is_dropped_without_processing() {
        let work = tempdir().unwrap();
        let mut source = MockJobSource::new();
        let mut storage = MockObjectStore::new();
        let transcoder = MockTranscoder::new();

        storage.expect_fetch_to_file().never();
        source.expect_delete().times(1).returning(|_| Ok(()));

        let mut settings = settings(work.path(), "720");
        settings.max_deliveries = Some(3);
        let worker = JobWorker::new(source, storage, transcoder, settings);

        let mut poisoned = job(r#"{"sourceObjectName":"clip.mp4"}"#);
        poisoned.delivery_count = 4;
        assert!(matches!(worker.process(&poisoned).await, JobOutcome::Discarded));
    }

    /// Transcoder that takes a while, for lease renewal and cancellation tests.
    struct SlowTranscoder {
        delay: Duration,
    }

    #[async_trait]
    impl Transcoder for SlowTranscoder {
        async fn run(
            &self,
            _input: &Path,
            output: &Path,
            _profile: &EncodingProfile,
        ) -> Result<(), TranscodeError> {
            tokio::fs::write(output, b"encoding").await.unwrap();
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lease_is_renewed_while_job_runs() {
        let work = tempdir().unwrap();
        let mut source = MockJobSource::new();
        let mut storage = MockObjectStore::new();
        let extended = Arc::new(AtomicUsize::new(0));

        fetch_writes_input(&mut storage);
        storage.expect_put_from_file().returning(|_, _, _| Ok(()));
        let counter = extended.clone();
        source
            .expect_extend_visibility()
            .withf(|_, duration| *duration == Duration::from_secs(30))
            .returning(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        source.expect_delete().times(1).returning(|_| Ok(()));

        let mut settings = settings(work.path(), "720");
        settings.lease_renewal = Some(Duration::from_millis(20));
        let transcoder = SlowTranscoder {
            delay: Duration::from_millis(150),
        };
        let worker = JobWorker::new(source, storage, transcoder, settings);

        let outcome = worker.process(&job(r#"{"sourceObjectName":"clip.mp4"}"#)).await;
        assert!(matches!(outcome, JobOutcome::Acked));
        assert!(extended.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_failed_renewal_does_not_fail_the_job() {
        let work = tempdir().unwrap();
        let mut source = MockJobSource::new();
        let mut storage = MockObjectStore::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        fetch_writes_input(&mut storage);
        storage.expect_put_from_file().times(1).returning(|_, _, _| Ok(()));
        let counter = attempts.clone();
        source.expect_extend_visibility().returning(move |job, _| {
            if counter.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Err(QueueError::LeaseExpired(job.id.clone()))
            } else {
                Err(QueueError::Transport("throttled".to_string()))
            }
        });
        source.expect_delete().times(1).returning(|_| Ok(()));

        let mut settings = settings(work.path(), "720");
        settings.lease_renewal = Some(Duration::from_millis(20));
        let transcoder = SlowTranscoder {
            delay: Duration::from_millis(150),
        };
        let worker = JobWorker::new(source, storage, transcoder, settings);

        let outcome = worker.process(&job(r#"{"sourceObjectName":"clip.mp4"}"#)).await;
        assert!(matches!(outcome, JobOutcome::Acked));
        assert!(attempts.load(Ordering::SeqCst) >= 2);
        assert_no_leftovers(&work);
    }

    #[tokio::test]
    async fn test_cancelled_job_cleans_up_and_is_not_acknowledged() {
        let work = tempdir().unwrap();
        let mut source = MockJobSource::new();
        let mut storage = MockObjectStore::new();

        fetch_writes_input(&mut storage);
        storage.expect_put_from_file().never();
        source.expect_delete().never();

        let transcoder = SlowTranscoder {
            delay: Duration::from_secs(60),
        };
        let worker = JobWorker::new(source, storage, transcoder, settings(work.path(), "720"));
        let job = job(r#"{"sourceObjectName":"clip.mp4"}"#);

        let result = tokio::time::timeout(Duration::from_millis(100), worker.process(&job)).await;
        assert!(result.is_err());
        assert_no_leftovers(&work);
    }
}
