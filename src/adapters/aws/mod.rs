//! AWS adapters: SQS as the job source, S3 as the object store.

pub mod s3;
pub mod sqs;
