/// Shared S3 utilities for NotifyAll services
///
/// Provides the AWS S3 client wrapper, configuration and
/// progress-reporting uploads.
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client;
use std::sync::Arc;
use thiserror::Error;

pub mod config;
pub mod upload;

pub use config::S3Config;
pub use upload::UploadProgress;

#[derive(Debug, Error)]
pub enum S3Error {
    #[error("S3 request failed: {0}")]
    Request(String),

    #[error("S3 multipart upload ID missing")]
    MissingUploadId,

    #[error("Missing ETag for part {0}")]
    MissingETag(i32),
}

/// Shared S3 client wrapper
#[derive(Clone)]
pub struct S3Client {
    client: Arc<Client>,
    config: S3Config,
}

impl S3Client {
    /// Create new S3 client with configuration from environment
    pub async fn new() -> Self {
        Self::with_config(S3Config::from_env()).await
    }

    /// Create new S3 client with custom configuration
    pub async fn with_config(config: S3Config) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Arc::new(Client::from_conf(builder.build())),
            config,
        }
    }

    /// Get reference to underlying AWS S3 client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get S3 configuration
    pub fn config(&self) -> &S3Config {
        &self.config
    }

    /// Health check for S3 connectivity
    pub async fn health_check(&self) -> Result<(), S3Error> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
            .map_err(|e| S3Error::Request(upload::describe(&e)))?;

        Ok(())
    }
}
