//! Progress-reporting uploads.
//!
//! Objects no larger than `part_size_bytes` go up in one `PutObject`; larger
//! ones use a multipart upload, reporting progress after every part. A
//! multipart upload that fails, or whose future is dropped before completion,
//! is aborted so S3 does not keep the orphaned parts.

use crate::{S3Client, S3Error};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, warn};

/// Bytes transferred so far for one upload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    /// Percentage in `0.0..=100.0`; an empty body counts as complete.
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_sent as f64 / self.total_bytes as f64 * 100.0).min(100.0)
    }
}

pub(crate) fn describe<E: std::error::Error>(err: &E) -> String {
    DisplayErrorContext(err).to_string()
}

/// Split `total` bytes into consecutive part ranges of at most `part_size`.
pub fn part_ranges(total: usize, part_size: usize) -> Vec<Range<usize>> {
    let part_size = part_size.max(1);
    (0..total)
        .step_by(part_size)
        .map(|start| start..(start + part_size).min(total))
        .collect()
}

struct AbortOnDrop {
    client: Arc<Client>,
    bucket: String,
    key: String,
    upload_id: String,
    armed: bool,
}

impl AbortOnDrop {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "No runtime to abort multipart upload; parts left behind");
            return;
        };

        let client = self.client.clone();
        let bucket = std::mem::take(&mut self.bucket);
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);
        handle.spawn(async move {
            match client
                .abort_multipart_upload()
                .bucket(&bucket)
                .key(&key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                Ok(_) => debug!(%key, "Aborted multipart upload"),
                Err(e) => warn!(%key, error = %describe(&e), "Failed to abort multipart upload"),
            }
        });
    }
}

impl S3Client {
    /// Upload `body` under `key`, calling `on_progress` as bytes are accepted.
    ///
    /// Returns the public object URL.
    pub async fn upload_with_progress(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        on_progress: &(dyn Fn(UploadProgress) + Send + Sync),
    ) -> Result<String, S3Error> {
        let total_bytes = body.len() as u64;
        on_progress(UploadProgress {
            bytes_sent: 0,
            total_bytes,
        });

        if body.len() <= self.config.part_size_bytes {
            self.client
                .put_object()
                .bucket(&self.config.bucket)
                .key(key)
                .content_type(content_type)
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(|e| S3Error::Request(describe(&e)))?;
        } else {
            self.upload_multipart(key, &body, content_type, on_progress)
                .await?;
        }

        on_progress(UploadProgress {
            bytes_sent: total_bytes,
            total_bytes,
        });

        Ok(self.config.object_url(key))
    }

    async fn upload_multipart(
        &self,
        key: &str,
        body: &[u8],
        content_type: &str,
        on_progress: &(dyn Fn(UploadProgress) + Send + Sync),
    ) -> Result<(), S3Error> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| S3Error::Request(describe(&e)))?;

        let upload_id = created
            .upload_id()
            .ok_or(S3Error::MissingUploadId)?
            .to_string();

        let guard = AbortOnDrop {
            client: self.client.clone(),
            bucket: self.config.bucket.clone(),
            key: key.to_string(),
            upload_id: upload_id.clone(),
            armed: true,
        };

        let total_bytes = body.len() as u64;
        let mut completed_parts = Vec::new();

        for (index, range) in part_ranges(body.len(), self.config.part_size_bytes)
            .into_iter()
            .enumerate()
        {
            // S3 part numbers are 1-indexed
            let part_number = index as i32 + 1;
            let end = range.end;

            let part = self
                .client
                .upload_part()
                .bucket(&self.config.bucket)
                .key(key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .body(ByteStream::from(body[range].to_vec()))
                .send()
                .await
                .map_err(|e| S3Error::Request(describe(&e)))?;

            let etag = part
                .e_tag()
                .ok_or(S3Error::MissingETag(part_number))?
                .to_string();

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(etag)
                    .build(),
            );

            on_progress(UploadProgress {
                bytes_sent: end as u64,
                total_bytes,
            });
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| S3Error::Request(describe(&e)))?;

        guard.disarm();
        Ok(())
    }
}
