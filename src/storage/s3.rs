use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Builder as S3ConfigBuilder, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use tracing::{error, info, warn};

use super::{ObjectStore, ObjectStream};
use crate::error::{RenderError, Result};

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// `None` uses the AWS default endpoint for `region`.
    pub endpoint_url: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: String,
}

pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(settings: &S3Settings) -> Self {
        let credentials = Credentials::new(
            settings.access_key_id.clone(),
            settings.secret_access_key.clone(),
            None,
            None,
            "text2img-config",
        );

        // Path-style addressing so MinIO works without wildcard DNS.
        let mut builder = S3ConfigBuilder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true);
        builder.set_endpoint_url(settings.endpoint_url.clone());
        let config = builder.build();

        info!(
            endpoint = settings.endpoint_url.as_deref().unwrap_or("<aws default>"),
            bucket = %settings.bucket,
            "S3 client configured"
        );

        Self { client: Client::from_conf(config), bucket: settings.bucket.clone() }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn ensure_bucket(&self) -> Result<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!(bucket = %self.bucket, "bucket exists");
                Ok(())
            }
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                self.client
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(|e| {
                        error!(bucket = %self.bucket, error = %e, "failed to create bucket");
                        RenderError::Storage(format!("create bucket {}: {e}", self.bucket))
                    })?;
                info!(bucket = %self.bucket, "created bucket");
                Ok(())
            }
            Err(err) => {
                error!(bucket = %self.bucket, error = %err, "failed to check bucket");
                Err(RenderError::Storage(format!("head bucket {}: {err}", self.bucket)))
            }
        }
    }

    async fn upload(&self, local_path: &Path, key: &str, content_type: &str) -> Result<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| RenderError::Storage(format!("read {}: {e}", local_path.display())))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|e| {
                error!(key, error = %e, "upload failed");
                RenderError::Storage(format!("upload {key}: {e}"))
            })?;

        info!(path = %local_path.display(), key, "uploaded object");
        Ok(())
    }

    async fn download_stream(&self, key: &str) -> Result<Option<ObjectStream>> {
        match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => {
                info!(key, "streaming object");
                Ok(Some(ObjectStream {
                    content_type: output.content_type,
                    content_length: output.content_length.and_then(|n| u64::try_from(n).ok()),
                    reader: Box::pin(output.body.into_async_read()),
                }))
            }
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                warn!(key, "object does not exist");
                Ok(None)
            }
            Err(err) => {
                error!(key, error = %err, "download failed");
                Err(RenderError::Storage(format!("download {key}: {err}")))
            }
        }
    }
}
