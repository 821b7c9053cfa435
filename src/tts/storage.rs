//! S3 result objects via `object_store`.
//!
//! Polly writes each finished task to `<bucket>/<task id>.mp3` and reports
//! the location as a URI such as
//! `https://s3.us-west-2.amazonaws.com/<bucket>/<key>`. Credentials come
//! from the same AWS SDK profile chain the Polly client uses.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use object_store::aws::{AmazonS3, AmazonS3Builder, AwsCredential};
use object_store::path::Path as ObjectPath;
use object_store::{CredentialProvider, ObjectStore};
use tracing::debug;

use super::{ArtifactStore, StorageError};

/// Bucket and key of a remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    pub bucket: String,
    pub key: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// A result location that is not `/<bucket>/<key>`.
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("not a valid URI: {0}")]
    Invalid(#[from] url::ParseError),
    #[error("expected 3 path components, found {count}: {components:?}")]
    PathShape { count: usize, components: Vec<String> },
}

/// Parse a synthesis result URI into bucket and key.
///
/// The path must split into exactly three components on `/`: the empty
/// root, the bucket and the key.
pub fn parse_result_location(uri: &str) -> Result<ObjectKey, LocationError> {
    let parsed = url::Url::parse(uri)?;
    let components: Vec<&str> = parsed.path().split('/').collect();

    match components.as_slice() {
        ["", bucket, key] if !bucket.is_empty() && !key.is_empty() => Ok(ObjectKey {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }),
        _ => Err(LocationError::PathShape {
            count: components.len(),
            components: components.iter().map(|c| c.to_string()).collect(),
        }),
    }
}

/// Hands AWS SDK credentials (profile, environment, SSO, IMDS...) to
/// `object_store`, which has no profile support of its own.
#[derive(Debug)]
struct SdkCredentials {
    provider: SharedCredentialsProvider,
}

#[async_trait]
impl CredentialProvider for SdkCredentials {
    type Credential = AwsCredential;

    async fn get_credential(&self) -> object_store::Result<Arc<AwsCredential>> {
        let creds = self
            .provider
            .provide_credentials()
            .await
            .map_err(|e| object_store::Error::Generic {
                store: "S3",
                source: Box::new(e),
            })?;

        Ok(Arc::new(AwsCredential {
            key_id: creds.access_key_id().to_string(),
            secret_key: creds.secret_access_key().to_string(),
            token: creds.session_token().map(str::to_string),
        }))
    }
}

/// Result storage in a single S3 bucket.
pub struct S3ArtifactStore {
    bucket: String,
    store: AmazonS3,
}

impl S3ArtifactStore {
    pub fn new(
        sdk_config: &aws_config::SdkConfig,
        bucket: &str,
        region: &str,
    ) -> anyhow::Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(region);

        if let Some(provider) = sdk_config.credentials_provider() {
            builder = builder.with_credentials(Arc::new(SdkCredentials { provider }));
        }

        let store = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to configure S3 bucket {}: {}", bucket, e))?;

        Ok(Self {
            bucket: bucket.to_string(),
            store,
        })
    }

    fn object_path(&self, key: &ObjectKey) -> Result<ObjectPath, StorageError> {
        if key.bucket != self.bucket {
            return Err(StorageError::ForeignBucket {
                key: key.key.clone(),
                bucket: key.bucket.clone(),
                expected: self.bucket.clone(),
            });
        }
        Ok(ObjectPath::from(key.key.as_str()))
    }
}

impl ArtifactStore for S3ArtifactStore {
    fn get<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<Bytes, StorageError>> {
        Box::pin(async move {
            let path = self.object_path(key)?;
            let result = match self.store.get(&path).await {
                Ok(result) => result,
                Err(object_store::Error::NotFound { .. }) => {
                    return Err(StorageError::NotFound(key.clone()))
                }
                Err(e) => return Err(e.into()),
            };
            let body = result.bytes().await?;
            debug!(%key, bytes = body.len(), "Fetched synthesis result");
            Ok(body)
        })
    }

    fn delete<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let path = self.object_path(key)?;
            self.store.delete(&path).await?;
            debug!(%key, "Deleted synthesis result");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_result_location_https() {
        let key = parse_result_location(
            "https://s3.us-west-2.amazonaws.com/my-bucket/0c1d2e3f-task.mp3",
        )
        .unwrap();
        assert_eq!(key.bucket, "my-bucket");
        assert_eq!(key.key, "0c1d2e3f-task.mp3");
        assert_eq!(key.to_string(), "s3://my-bucket/0c1d2e3f-task.mp3");
    }

    #[test]
    fn test_parse_result_location_rejects_prefixed_key() {
        let err = parse_result_location("https://s3.amazonaws.com/bucket/prefix/key.mp3")
            .unwrap_err();
        match err {
            LocationError::PathShape { count, .. } => assert_eq!(count, 4),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_result_location_rejects_short_path() {
        assert!(parse_result_location("https://s3.amazonaws.com/bucket").is_err());
        assert!(parse_result_location("https://s3.amazonaws.com/bucket/").is_err());
    }

    #[test]
    fn test_parse_result_location_rejects_garbage() {
        assert!(matches!(
            parse_result_location("not a uri"),
            Err(LocationError::Invalid(_))
        ));
    }
}
