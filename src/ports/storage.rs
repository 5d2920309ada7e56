use crate::error::StorageError;
use async_trait::async_trait;
use std::path::Path;

/// Transfer tuning for uploads. Does not affect what ends up stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    pub chunk_size: usize,
    pub parallelism: usize,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            chunk_size: 8 * 1024 * 1024,
            parallelism: 16,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download an object from the input location to a local path, overwriting it
    async fn fetch_to_file(&self, object_name: &str, local_path: &Path) -> Result<(), StorageError>;

    /// Upload a local file to the output location. Last writer wins.
    async fn put_from_file(
        &self,
        local_path: &Path,
        object_name: &str,
        opts: &PutOptions,
    ) -> Result<(), StorageError>;
}
