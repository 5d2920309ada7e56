use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::error::MalformedJobError;

use super::profile::EncodingProfile;

/// A leased queue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Backend-assigned message id.
    pub id: String,
    /// Proof of lease ownership, required by delete and extend.
    pub receipt: String,
    /// Raw message body.
    pub body: String,
    /// Number of times the backend has delivered this message, starting at 1.
    pub delivery_count: u32,
}

impl Job {
    pub fn payload(&self) -> Result<JobPayload, MalformedJobError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobPayload {
    #[serde(rename = "sourceObjectName", alias = "video_name")]
    pub source_object_name: String,
    #[serde(default, alias = "resolution")]
    pub profile: Option<String>,
}

/// Position of a job in the processing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Leased,
    Fetched,
    Transcoded,
    Uploaded,
    Acked,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Leased => "leased",
            JobState::Fetched => "fetched",
            JobState::Transcoded => "transcoded",
            JobState::Uploaded => "uploaded",
            JobState::Acked => "acked",
        };
        f.write_str(name)
    }
}

/// Name of the artifact produced for `source` under `profile`.
///
/// `videos/clip.mp4` at `720` becomes `videos/clip_720.mp4`. Sources without
/// an extension get `.mp4`.
pub fn output_object_name(source: &str, profile: &str) -> String {
    let (dir, file) = match source.rfind('/') {
        Some(idx) => source.split_at(idx + 1),
        None => ("", source),
    };
    let (stem, ext) = match file.rfind('.') {
        Some(idx) if idx > 0 => (&file[..idx], &file[idx + 1..]),
        _ => (file, "mp4"),
    };
    format!("{}{}_{}.{}", dir, stem, profile, ext)
}

/// Local scratch state for one job. The directory and everything in it is
/// removed when the item is dropped.
#[derive(Debug)]
pub struct WorkItem {
    dir: TempDir,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub output_object_name: String,
    pub profile: EncodingProfile,
}

impl WorkItem {
    pub fn create(
        work_dir: &Path,
        job_id: &str,
        payload: &JobPayload,
        profile: EncodingProfile,
    ) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{}-", sanitize(job_id)))
            .tempdir_in(work_dir)?;

        let output_object_name = output_object_name(&payload.source_object_name, &profile.name);
        let ext = Path::new(&output_object_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");

        Ok(Self {
            input_path: dir.path().join(format!("input.{}", source_ext(&payload.source_object_name))),
            output_path: dir.path().join(format!("output.{}", ext)),
            dir,
            output_object_name,
            profile,
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

fn source_ext(source: &str) -> &str {
    Path::new(source)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
}

fn sanitize(id: &str) -> String {
    id.chars()
        .take(64)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
