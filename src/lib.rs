//! Tessera - Lease-based media transcoding worker
//!
//! Hexagonal Architecture:
//! - domain/: Pure job logic (payloads, output naming, encoding profiles)
//! - ports/: Trait definitions (JobSource, ObjectStore, Transcoder)
//! - adapters/: Concrete implementations (SQS, S3, ffmpeg, local)
//! - application/: The job state machine and the worker loop
//! - config: Environment configuration
//!
//! Every job is processed at least once: a message is deleted only after its
//! artifact has been uploaded, and any failure leaves it for redelivery.
//!
//! # Features
//! - `aws` (default): SQS and S3 adapters plus the `tessera-worker` binary

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

// Re-exports for convenience
pub use config::WorkerConfig;
pub use domain::jobs::{output_object_name, Job, JobPayload, JobState};
pub use error::{ConfigError, JobError, QueueError, StorageError, TranscodeError};
