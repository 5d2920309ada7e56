//! Worker configuration, loaded once at startup.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::profile::{ProfileTable, DEFAULT_VIDEO_BITRATE};
use crate::error::ConfigError;
use crate::ports::storage::PutOptions;

/// S3 rejects multipart parts smaller than this (except the last one).
pub const MIN_UPLOAD_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Matches `ProfileTable::default()`.
const DEFAULT_BITRATE_TABLE: &str = "720=2M";

/// SQS long polling cannot wait longer than this.
pub const MAX_LEASE_WAIT: Duration = Duration::from_secs(20);

/// Configuration for the AWS-backed worker.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// SQS queue URL for job messages
    pub queue_url: String,
    /// Bucket holding source media
    pub input_bucket: String,
    /// Bucket receiving transcoded artifacts
    pub output_bucket: String,
    /// Profile used when a message does not name one
    pub default_profile: String,
    pub profiles: ProfileTable,
    /// Parent directory of per-job scratch directories
    pub work_dir: PathBuf,
    pub lease_wait: Duration,
    pub visibility_timeout: Duration,
    /// Interval for lease renewal while a job runs; `None` disables renewal
    pub lease_renewal: Option<Duration>,
    /// Messages delivered more often than this are dropped; `None` retries forever
    pub max_deliveries: Option<u32>,
    pub concurrency: usize,
    pub upload: PutOptions,
    pub ffmpeg_path: String,
    pub video_codec: String,
    pub transcode_timeout: Option<Duration>,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let default_profile = required("RESOLUTION")?;
        let default_rate = get("DEFAULT_BITRATE").unwrap_or_else(|| DEFAULT_VIDEO_BITRATE.to_string());
        let table = get("BITRATE_TABLE").unwrap_or_else(|| String::from(DEFAULT_BITRATE_TABLE));
        let profiles = ProfileTable::parse(&table, default_rate)
            .map_err(|reason| ConfigError::invalid("BITRATE_TABLE", table, reason))?;
        if profiles.resolve(&default_profile).is_err() {
            return Err(ConfigError::invalid(
                "RESOLUTION",
                default_profile,
                "expected a frame height such as 720",
            ));
        }

        let lease_wait = Duration::from_secs(parse_or(&get, "LEASE_WAIT_SECS", 20u64)?);
        if lease_wait > MAX_LEASE_WAIT {
            return Err(ConfigError::invalid(
                "LEASE_WAIT_SECS",
                lease_wait.as_secs().to_string(),
                "must be at most 20",
            ));
        }

        let visibility_timeout = Duration::from_secs(positive(&get, "VISIBILITY_TIMEOUT_SECS", 30)?);
        let lease_renewal = parse_opt::<u64, _>(&get, "LEASE_RENEWAL_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        if let Some(renewal) = lease_renewal {
            if renewal >= visibility_timeout {
                return Err(ConfigError::invalid(
                    "LEASE_RENEWAL_SECS",
                    renewal.as_secs().to_string(),
                    "must be shorter than VISIBILITY_TIMEOUT_SECS",
                ));
            }
        }

        let chunk_size = parse_or(&get, "UPLOAD_CHUNK_SIZE", PutOptions::default().chunk_size)?;
        let upload = PutOptions {
            chunk_size: chunk_size.max(MIN_UPLOAD_CHUNK_SIZE),
            parallelism: positive(&get, "UPLOAD_PARALLELISM", PutOptions::default().parallelism as u64)?
                as usize,
        };

        Ok(Self {
            queue_url: required("QUEUE_URL")?,
            input_bucket: get("INPUT_BUCKET").unwrap_or_else(|| String::from("input")),
            output_bucket: get("OUTPUT_BUCKET").unwrap_or_else(|| String::from("output")),
            default_profile,
            profiles,
            work_dir: get("WORK_DIR").map(PathBuf::from).unwrap_or_else(env::temp_dir),
            lease_wait,
            visibility_timeout,
            lease_renewal,
            max_deliveries: parse_opt(&get, "MAX_DELIVERIES")?,
            concurrency: positive(&get, "WORKER_CONCURRENCY", 1)? as usize,
            upload,
            ffmpeg_path: get("FFMPEG_PATH").unwrap_or_else(|| String::from("ffmpeg")),
            video_codec: get("VIDEO_CODEC").unwrap_or_else(|| String::from("libx264")),
            transcode_timeout: parse_opt::<u64, _>(&get, "TRANSCODE_TIMEOUT_SECS")?
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            backoff_base: Duration::from_millis(positive(&get, "BACKOFF_BASE_MS", 500)?),
            backoff_max: Duration::from_secs(parse_or(&get, "BACKOFF_MAX_SECS", 60u64)?),
        })
    }
}

fn parse_opt<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&'static str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, raw, e.to_string())),
        None => Ok(None),
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&'static str) -> Option<String>,
{
    Ok(parse_opt(get, key)?.unwrap_or(default))
}

fn positive<G>(get: &G, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&'static str) -> Option<String>,
{
    match parse_or(get, key, default)? {
        0 => Err(ConfigError::invalid(key, "0", "must be greater than zero")),
        value => Ok(value),
    }
}
