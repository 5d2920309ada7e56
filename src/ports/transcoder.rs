use crate::domain::profile::EncodingProfile;
use crate::error::TranscodeError;
use async_trait::async_trait;
use std::path::Path;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Encode `input` into `output` using `profile`. Returns once the encoder has exited.
    async fn run(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodingProfile,
    ) -> Result<(), TranscodeError>;
}
