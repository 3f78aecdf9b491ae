/// S3 configuration shared across services
use serde::{Deserialize, Serialize};

/// S3 rejects multipart parts smaller than this (except the last one).
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Base URL for public access (path-style endpoint or CDN domain)
    pub base_url: String,
    /// Custom endpoint, e.g. MinIO in local development
    pub endpoint: Option<String>,
    /// Whether to use path-style URLs (false = virtual-hosted-style)
    pub path_style: bool,
    /// Multipart part size; objects up to this size use a single PUT
    pub part_size_bytes: usize,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: "notifyall-attachments".to_string(),
            region: "us-east-1".to_string(),
            base_url: "https://s3.amazonaws.com".to_string(),
            endpoint: None,
            path_style: false,
            part_size_bytes: MIN_PART_SIZE,
        }
    }
}

impl S3Config {
    /// Load S3 configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        Self {
            bucket: var("S3_BUCKET").unwrap_or(defaults.bucket),
            region: var("AWS_REGION").unwrap_or(defaults.region),
            base_url: var("S3_BASE_URL").unwrap_or(defaults.base_url),
            endpoint: var("S3_ENDPOINT"),
            path_style: var("S3_PATH_STYLE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.path_style),
            part_size_bytes: var("S3_PART_SIZE_BYTES")
                .and_then(|v| v.parse().ok())
                .map(|size: usize| size.max(MIN_PART_SIZE))
                .unwrap_or(defaults.part_size_bytes),
        }
    }

    /// Build the public URL of an object
    pub fn object_url(&self, key: &str) -> String {
        if self.path_style {
            format!(
                "{}/{}/{}",
                self.base_url.trim_end_matches('/'),
                self.bucket,
                key
            )
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_virtual_hosted_style() {
        let config = S3Config {
            bucket: "test-bucket".to_string(),
            ..S3Config::default()
        };

        let url = config.object_url("notifications_attachments/report.pdf");
        assert_eq!(
            url,
            "https://test-bucket.s3.us-east-1.amazonaws.com/notifications_attachments/report.pdf"
        );
    }

    #[test]
    fn test_object_url_path_style() {
        let config = S3Config {
            bucket: "test-bucket".to_string(),
            base_url: "http://localhost:9000/".to_string(),
            path_style: true,
            ..S3Config::default()
        };

        let url = config.object_url("test/image.jpg");
        assert_eq!(url, "http://localhost:9000/test-bucket/test/image.jpg");
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_clamps_part_size() {
        std::env::set_var("S3_PART_SIZE_BYTES", "1024");
        std::env::set_var("S3_PATH_STYLE", "true");

        let config = S3Config::from_env();
        assert_eq!(config.part_size_bytes, MIN_PART_SIZE);
        assert!(config.path_style);

        std::env::remove_var("S3_PART_SIZE_BYTES");
        std::env::remove_var("S3_PATH_STYLE");
    }
}
