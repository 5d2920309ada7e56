use crate::domain::profile::EncodingProfile;
use crate::error::TranscodeError;
use crate::ports::transcoder::Transcoder;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tracing::debug;

pub const AUDIO_CODEC: &str = "aac";
pub const AUDIO_BITRATE: &str = "128k";

/// Keep this much of the encoder's stderr in error reports.
const DIAGNOSTICS_LIMIT: usize = 4096;

/// FfmpegTranscoder implements Transcoder by running the ffmpeg CLI.
#[derive(Clone, Debug)]
pub struct FfmpegTranscoder {
    program: String,
    video_codec: String,
    timeout: Option<Duration>,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg", "libx264")
    }
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<String>, video_codec: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            video_codec: video_codec.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build_args(&self, input: &Path, output: &Path, profile: &EncodingProfile) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-i".into(), input.into()];
        for arg in [
            "-vf".to_string(),
            profile.scale_filter(),
            "-c:v".to_string(),
            self.video_codec.clone(),
            "-b:v".to_string(),
            profile.video_bitrate.clone(),
            "-c:a".to_string(),
            AUDIO_CODEC.to_string(),
            "-b:a".to_string(),
            AUDIO_BITRATE.to_string(),
            "-y".to_string(),
        ] {
            args.push(arg.into());
        }
        args.push(output.into());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn run(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodingProfile,
    ) -> Result<(), TranscodeError> {
        let args = self.build_args(input, output, profile);
        debug!(program = %self.program, ?args, "running encoder");

        // kill_on_drop: a cancelled job or an elapsed timeout takes the child down with it.
        let mut command = TokioCommand::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = command.output();

        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child)
                .await
                .map_err(|_| TranscodeError::Timeout(limit.as_secs()))?,
            None => child.await,
        };
        let out = result.map_err(|source| TranscodeError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !out.status.success() {
            return Err(TranscodeError::Failed {
                status: out.status,
                diagnostics: tail(&String::from_utf8_lossy(&out.stderr), DIAGNOSTICS_LIMIT),
            });
        }
        if !output.exists() {
            return Err(TranscodeError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }
}

fn tail(text: &str, limit: usize) -> String {
    let text = text.trim();
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
