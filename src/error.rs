//! Error types for every stage of a job.

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

use crate::domain::jobs::JobState;

/// Startup configuration failures. These are the only fatal errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Queue backend failures.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(String),

    /// The receipt no longer owns the lease; another worker may hold it.
    #[error("lease expired for message {0}")]
    LeaseExpired(String),
}

impl QueueError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Object store failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage transport error: {0}")]
    Transport(String),

    #[error("local I/O error on {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }
}

/// The message body could not be turned into a job.
#[derive(Debug, Error)]
pub enum MalformedJobError {
    #[error("malformed job payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unknown profile {0:?}")]
    InvalidProfile(String),
}

/// Encoder failures.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to start encoder {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoder exited with {status}: {diagnostics}")]
    Failed {
        status: ExitStatus,
        diagnostics: String,
    },

    #[error("encoder timed out after {0} seconds")]
    Timeout(u64),

    #[error("encoder reported success but produced no output at {0}")]
    MissingOutput(PathBuf),
}

/// Why a single job ended in the `Failed` state.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Malformed(#[from] MalformedJobError),

    #[error("could not prepare scratch space: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("fetch failed: {0}")]
    Fetch(#[source] StorageError),

    #[error("transcode failed: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("upload failed: {0}")]
    Upload(#[source] StorageError),

    #[error("acknowledge failed: {0}")]
    Ack(#[source] QueueError),
}

impl JobError {
    /// The state the job was in when the error occurred.
    pub fn state(&self) -> JobState {
        match self {
            JobError::Malformed(_) | JobError::Scratch(_) | JobError::Fetch(_) => JobState::Leased,
            JobError::Transcode(_) => JobState::Fetched,
            JobError::Upload(_) => JobState::Transcoded,
            JobError::Ack(_) => JobState::Uploaded,
        }
    }
}
