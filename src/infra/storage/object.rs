//! Object-store persistence and public URL derivation.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chartd_api_types::S3ConfigSummary;
use thiserror::Error;
use url::Url;

use super::StorageTarget;
use crate::application::render::RenderResult;
use crate::config::S3Settings;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_KEY_PREFIX: &str = "charts";

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object store request failed")]
    Transport {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("object store responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid object store endpoint `{0}`")]
    Endpoint(String),
    #[error("failed to sign object store request")]
    Signing,
}

impl ObjectStoreError {
    pub fn transport(source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Transport {
            source: Box::new(source),
        }
    }
}

/// Uploads a single object. Implementations must make the object publicly readable.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), ObjectStoreError>;
}

#[derive(Clone)]
pub struct ObjectStoreConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    pub custom_domain: Option<String>,
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub key_prefix: String,
}

impl fmt::Debug for ObjectStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreConfig")
            .field("access_key_id", &"<redacted>")
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("custom_domain", &self.custom_domain)
            .field("endpoint", &self.endpoint)
            .field("force_path_style", &self.force_path_style)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl ObjectStoreConfig {
    pub fn from_settings(settings: &S3Settings, key_prefix: &str) -> Self {
        Self {
            access_key_id: settings.access_key_id.clone(),
            secret_access_key: settings.secret_access_key.clone(),
            region: settings.region.clone(),
            bucket: settings.bucket.clone(),
            custom_domain: settings.custom_domain.clone(),
            endpoint: settings.endpoint.clone(),
            force_path_style: settings.force_path_style,
            key_prefix: key_prefix.to_string(),
        }
    }

    pub fn object_key(&self, filename: &str) -> String {
        let prefix = self.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            filename.to_string()
        } else {
            format!("{prefix}/{filename}")
        }
    }

    /// Non-secret view of the configuration for health output.
    pub fn summary(&self) -> S3ConfigSummary {
        S3ConfigSummary {
            region: self.region.clone(),
            bucket: self.bucket.clone(),
            custom_domain: self.custom_domain.clone(),
            endpoint: self.endpoint.clone(),
            force_path_style: self.force_path_style,
            service_type: if self.endpoint.is_some() {
                "MinIO/Custom".to_string()
            } else {
                "AWS S3".to_string()
            },
        }
    }
}

/// Address of `key` on the storage service itself, ignoring any custom domain.
pub fn endpoint_url(config: &ObjectStoreConfig, key: &str) -> Result<String, ObjectStoreError> {
    service_url(
        config.endpoint.as_deref(),
        config.force_path_style,
        &config.region,
        &config.bucket,
        key,
    )
}

pub(crate) fn service_url(
    endpoint: Option<&str>,
    force_path_style: bool,
    region: &str,
    bucket: &str,
    key: &str,
) -> Result<String, ObjectStoreError> {
    match endpoint {
        Some(endpoint) if force_path_style => {
            Ok(format!("{}/{bucket}/{key}", endpoint.trim_end_matches('/')))
        }
        Some(endpoint) => {
            let parsed =
                Url::parse(endpoint).map_err(|_| ObjectStoreError::Endpoint(endpoint.to_string()))?;
            let host = parsed
                .host_str()
                .ok_or_else(|| ObjectStoreError::Endpoint(endpoint.to_string()))?;
            let authority = match parsed.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            };
            Ok(format!("{}://{bucket}.{authority}/{key}", parsed.scheme()))
        }
        None => Ok(format!("https://{bucket}.s3.{region}.amazonaws.com/{key}")),
    }
}

/// Public URL for a stored object: the custom domain when configured, else the
/// service endpoint in the configured addressing style.
pub fn public_url(config: &ObjectStoreConfig, key: &str) -> Result<String, ObjectStoreError> {
    match config.custom_domain.as_deref() {
        Some(domain) => Ok(format!("{}/{key}", domain.trim_end_matches('/'))),
        None => endpoint_url(config, key),
    }
}

pub struct ObjectStorage {
    config: ObjectStoreConfig,
    client: Arc<dyn ObjectStoreClient>,
}

impl ObjectStorage {
    pub fn new(config: ObjectStoreConfig, client: Arc<dyn ObjectStoreClient>) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &ObjectStoreConfig {
        &self.config
    }

    pub async fn persist(
        &self,
        result: &RenderResult,
        filename: &str,
    ) -> Result<StorageTarget, ObjectStoreError> {
        let key = self.config.object_key(filename);
        let url = public_url(&self.config, &key)?;
        self.client
            .put(
                &self.config.bucket,
                &key,
                result.payload.clone(),
                &result.content_type,
            )
            .await?;
        Ok(StorageTarget::ObjectStore {
            bucket: self.config.bucket.clone(),
            key,
            url,
        })
    }
}
