//! AWS Worker Binary
//!
//! Long-running process that:
//! 1. Loads configuration once (see `WorkerConfig` for the variables).
//! 2. Connects to SQS and S3 through the standard AWS credential chain.
//! 3. Runs `WORKER_CONCURRENCY` lease/transcode loops until SIGINT/SIGTERM.
//!
//! Required environment variables:
//! - QUEUE_URL: SQS queue URL for jobs
//! - RESOLUTION: default target profile, e.g. 720

use std::error::Error;
use tessera::adapters::aws::{s3::S3Adapter, sqs::SqsAdapter};
use tessera::adapters::ffmpeg::FfmpegTranscoder;
use tessera::application::{JobSettings, JobWorker, LoopSettings, WorkerPool};
use tessera::config::WorkerConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };
    tokio::fs::create_dir_all(&config.work_dir).await?;

    // Load AWS config
    let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

    // Create adapters
    let queue = SqsAdapter::new(
        aws_sdk_sqs::Client::new(&aws),
        config.queue_url.clone(),
        config.visibility_timeout,
    );
    let storage = S3Adapter::new(
        aws_sdk_s3::Client::new(&aws),
        config.input_bucket.clone(),
        config.output_bucket.clone(),
    );
    let transcoder = FfmpegTranscoder::new(config.ffmpeg_path.clone(), config.video_codec.clone())
        .with_timeout(config.transcode_timeout);

    let worker = JobWorker::new(queue, storage, transcoder, JobSettings::from(&config));
    let pool = WorkerPool::new(worker, config.concurrency, LoopSettings::from(&config));

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    info!(
        queue = %config.queue_url,
        profile = %config.default_profile,
        workers = config.concurrency,
        "polling for jobs"
    );
    let stats = pool.run(cancel).await;
    info!(?stats, "worker stopped");
    Ok(())
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = tokio::signal::ctrl_c().await;

    info!("shutdown requested; in-flight jobs are abandoned to redelivery");
    cancel.cancel();
}
