use crate::error::StorageError;
use crate::ports::storage::{ObjectStore, PutOptions};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// FsAdapter implements ObjectStore over two local directories.
/// Object names are paths relative to those directories.
#[derive(Clone, Debug)]
pub struct FsAdapter {
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl FsAdapter {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    fn resolve(root: &Path, object_name: &str) -> Option<PathBuf> {
        let relative = Path::new(object_name);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        (clean && !object_name.is_empty()).then(|| root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsAdapter {
    async fn fetch_to_file(&self, object_name: &str, local_path: &Path) -> Result<(), StorageError> {
        let source = Self::resolve(&self.input_dir, object_name)
            .ok_or_else(|| StorageError::NotFound(object_name.to_string()))?;

        let mut reader = match tokio::fs::File::open(&source).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(object_name.to_string()))
            }
            Err(e) => return Err(StorageError::local_io(source, e)),
        };
        let mut writer = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| StorageError::local_io(local_path, e))?;
        tokio::io::copy(&mut reader, &mut writer)
            .await
            .map_err(|e| StorageError::local_io(local_path, e))?;
        Ok(())
    }

    async fn put_from_file(
        &self,
        local_path: &Path,
        object_name: &str,
        _opts: &PutOptions,
    ) -> Result<(), StorageError> {
        let dest = Self::resolve(&self.output_dir, object_name).ok_or_else(|| {
            StorageError::Transport(format!("invalid object name {:?}", object_name))
        })?;
        let parent = dest.parent().unwrap_or(&self.output_dir);
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::local_io(parent, e))?;

        // Each put stages under its own name; the staging file is removed on drop
        // unless it is persisted over the destination.
        let staging = tempfile::Builder::new()
            .prefix(".put-")
            .suffix(".partial")
            .tempfile_in(parent)
            .map_err(|e| StorageError::local_io(parent, e))?;
        tokio::fs::copy(local_path, staging.path())
            .await
            .map_err(|e| StorageError::local_io(local_path, e))?;
        staging
            .persist(&dest)
            .map_err(|e| StorageError::local_io(&dest, e.error))?;
        Ok(())
    }
}
