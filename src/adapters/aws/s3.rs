use crate::config::MIN_UPLOAD_CHUNK_SIZE;
use crate::error::StorageError;
use crate::ports::storage::{ObjectStore, PutOptions};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use futures::{StreamExt, TryStreamExt};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// S3 refuses multipart uploads with more parts than this.
const MAX_PARTS: u64 = 10_000;

/// S3Adapter implements ObjectStore for AWS S3, reading from one bucket and writing to another.
#[derive(Clone)]
pub struct S3Adapter {
    client: Client,
    input_bucket: String,
    output_bucket: String,
}

impl S3Adapter {
    pub fn new(client: Client, input_bucket: String, output_bucket: String) -> Self {
        Self {
            client,
            input_bucket,
            output_bucket,
        }
    }

    async fn put_single(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::local_io(local_path, std::io::Error::other(e)))?;
        self.client
            .put_object()
            .bucket(&self.output_bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::transport(DisplayErrorContext(&e)))?;
        Ok(())
    }

    /// Aborts the upload on part or completion errors. A dropped future skips the
    /// abort; the output bucket needs an `AbortIncompleteMultipartUpload` lifecycle rule.
    async fn put_multipart(
        &self,
        local_path: &Path,
        key: &str,
        size: u64,
        opts: &PutOptions,
    ) -> Result<(), StorageError> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.output_bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::transport(DisplayErrorContext(&e)))?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| StorageError::Transport("multipart upload returned no id".into()))?
            .to_string();

        let plan = part_plan(size, opts.chunk_size as u64);
        debug!(key, parts = plan.len(), "starting multipart upload");

        let parts = futures::stream::iter(plan)
            .map(|(number, offset, length)| self.upload_part(local_path, key, &upload_id, number, offset, length))
            .buffer_unordered(opts.parallelism.max(1))
            .try_collect::<Vec<_>>()
            .await;

        let mut parts = match parts {
            Ok(parts) => parts,
            Err(e) => {
                self.abort(key, &upload_id).await;
                return Err(e);
            }
        };
        parts.sort_by_key(|p| p.part_number());

        let completed = self
            .client
            .complete_multipart_upload()
            .bucket(&self.output_bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
            .send()
            .await;
        if let Err(e) = completed {
            self.abort(key, &upload_id).await;
            return Err(StorageError::transport(DisplayErrorContext(&e)));
        }
        Ok(())
    }

    async fn upload_part(
        &self,
        local_path: &Path,
        key: &str,
        upload_id: &str,
        number: i32,
        offset: u64,
        length: u64,
    ) -> Result<CompletedPart, StorageError> {
        let body = ByteStream::read_from()
            .path(local_path)
            .offset(offset)
            .length(Length::Exact(length))
            .build()
            .await
            .map_err(|e| StorageError::local_io(local_path, std::io::Error::other(e)))?;
        let part = self
            .client
            .upload_part()
            .bucket(&self.output_bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(number)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::transport(DisplayErrorContext(&e)))?;

        Ok(CompletedPart::builder()
            .set_e_tag(part.e_tag().map(str::to_string))
            .part_number(number)
            .build())
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        let aborted = self
            .client
            .abort_multipart_upload()
            .bucket(&self.output_bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;
        if let Err(e) = aborted {
            warn!(key, upload_id, error = %DisplayErrorContext(&e), "failed to abort multipart upload");
        }
    }
}

/// Splits `size` bytes into `(part_number, offset, length)` triples.
fn part_plan(size: u64, chunk_size: u64) -> Vec<(i32, u64, u64)> {
    let chunk = chunk_size
        .max(MIN_UPLOAD_CHUNK_SIZE as u64)
        .max(size.div_ceil(MAX_PARTS));
    (0..size.div_ceil(chunk))
        .map(|i| {
            let offset = i * chunk;
            (i as i32 + 1, offset, chunk.min(size - offset))
        })
        .collect()
}

#[async_trait]
impl ObjectStore for S3Adapter {
    async fn fetch_to_file(&self, object_name: &str, local_path: &Path) -> Result<(), StorageError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.input_bucket)
            .key(object_name)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(GetObjectError::NoSuchKey(_)) => StorageError::NotFound(object_name.to_string()),
                _ => StorageError::transport(DisplayErrorContext(&e)),
            })?;

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| StorageError::local_io(local_path, e))?;
        let mut body = resp.body;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::transport(DisplayErrorContext(&e)))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| StorageError::local_io(local_path, e))?;
        }
        file.flush()
            .await
            .map_err(|e| StorageError::local_io(local_path, e))?;
        Ok(())
    }

    async fn put_from_file(
        &self,
        local_path: &Path,
        object_name: &str,
        opts: &PutOptions,
    ) -> Result<(), StorageError> {
        let size = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| StorageError::local_io(local_path, e))?
            .len();

        if size <= opts.chunk_size.max(MIN_UPLOAD_CHUNK_SIZE) as u64 {
            self.put_single(local_path, object_name).await
        } else {
            self.put_multipart(local_path, object_name, size, opts).await
        }
    }
}
