//! S3 object fetcher.
//!
//! Streams the object body straight to the scratch file, so memory use does
//! not grow with object size.

use std::path::Path;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use tokio::io::AsyncWriteExt;

use pqload_core::{Error, ObjectFetcher, Result};

/// Fetches objects from Amazon S3 (or an S3-compatible endpoint).
#[derive(Debug, Clone)]
pub struct S3Fetcher {
    client: Client,
}

impl S3Fetcher {
    /// Builds a fetcher from the default AWS credential and region chain.
    ///
    /// `region` overrides the region discovered from the environment.
    pub async fn from_env(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let sdk_config = loader.load().await;
        if sdk_config.region().is_none() {
            tracing::warn!("no AWS region configured; S3 requests will likely fail");
        }
        Self::from_client(Client::new(&sdk_config))
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectFetcher for S3Fetcher {
    async fn fetch(&self, bucket: &str, key: &str, destination: &Path) -> Result<u64> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_s3_error(&e, bucket, key))?;

        let mut body = response.body.into_async_read();
        let mut file = tokio::fs::File::create(destination).await.map_err(|e| {
            Error::fetch_with_source(
                bucket,
                key,
                format!("cannot create {}", destination.display()),
                e,
            )
        })?;

        let written = tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(|e| Error::fetch_with_source(bucket, key, "object transfer failed", e))?;
        file.flush()
            .await
            .map_err(|e| Error::fetch_with_source(bucket, key, "flush to scratch failed", e))?;

        tracing::debug!(bucket, key, bytes = written, "object downloaded");
        Ok(written)
    }
}

fn map_s3_error<E>(err: &SdkError<E>, bucket: &str, key: &str) -> Error
where
    E: std::error::Error + 'static,
{
    let context = DisplayErrorContext(err);
    let message = match err {
        SdkError::ServiceError(service_err) => match service_err.raw().status().as_u16() {
            404 => "object not found".to_string(),
            403 => format!("access denied: {context}"),
            status => format!("S3 error (HTTP {status}): {context}"),
        },
        SdkError::TimeoutError(_) => format!("S3 timeout: {context}"),
        SdkError::DispatchFailure(_) => format!("S3 connection error: {context}"),
        _ => format!("S3 error: {context}"),
    };
    Error::fetch(bucket, key, message)
}
