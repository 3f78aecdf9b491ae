use async_trait::async_trait;
use s3_utils::S3Client;
use tracing::{info, warn};

use super::{ObjectStore, UploadError, UploadProgress};

#[async_trait]
impl ObjectStore for S3Client {
    async fn upload_resumable(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        progress: &(dyn Fn(UploadProgress) + Send + Sync),
    ) -> Result<String, UploadError> {
        let size = bytes.len();
        match self
            .upload_with_progress(path, bytes, content_type, progress)
            .await
        {
            Ok(url) => {
                info!(key = %path, size, "Attachment uploaded");
                Ok(url)
            }
            Err(e) => {
                warn!(key = %path, error = %e, "Attachment upload failed");
                Err(e.into())
            }
        }
    }
}
