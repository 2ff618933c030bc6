//! Chart persistence.
//!
//! [`ChartStorage`] writes rendered charts to object storage when it is
//! configured and to the local images directory otherwise. An object-store
//! failure falls back to local storage for that call only; the next call tries
//! object storage again.

mod local;
mod object;
mod s3;
mod signing;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chartd_api_types::{S3ConfigSummary, StorageMode};
use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::render::RenderResult;
use crate::config::StorageSettings;

pub use local::{DEFAULT_IMAGES_DIR, DEFAULT_PUBLIC_PATH, LocalStorage};
pub use object::{
    DEFAULT_KEY_PREFIX, DEFAULT_REGION, ObjectStorage, ObjectStoreClient, ObjectStoreConfig,
    ObjectStoreError, endpoint_url, public_url,
};
pub use s3::S3Client;

const SOURCE: &str = "infra::storage";

pub(crate) const METRIC_STORAGE_FALLBACK: &str = "chartd_storage_fallback_total";
pub(crate) const METRIC_STORAGE_PERSIST: &str = "chartd_storage_persist_total";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid chart filename `{0}`")]
    InvalidFilename(String),
    #[error("failed to create images directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("chart `{0}` not found")]
    NotFound(String),
}

/// Where a persisted chart ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    ObjectStore {
        bucket: String,
        key: String,
        url: String,
    },
    LocalFilesystem {
        directory: PathBuf,
        filename: String,
        path: PathBuf,
        url: String,
    },
}

impl StorageTarget {
    pub fn url(&self) -> &str {
        match self {
            StorageTarget::ObjectStore { url, .. } | StorageTarget::LocalFilesystem { url, .. } => {
                url
            }
        }
    }

    pub fn mode(&self) -> StorageMode {
        match self {
            StorageTarget::ObjectStore { .. } => StorageMode::S3,
            StorageTarget::LocalFilesystem { .. } => StorageMode::Local,
        }
    }

    /// Filesystem path of a locally stored chart.
    pub fn local_path(&self) -> Option<&std::path::Path> {
        match self {
            StorageTarget::LocalFilesystem { path, .. } => Some(path),
            StorageTarget::ObjectStore { .. } => None,
        }
    }
}

pub struct ChartStorage {
    object: Option<ObjectStorage>,
    local: LocalStorage,
}

impl ChartStorage {
    pub fn new(object: Option<ObjectStorage>, local: LocalStorage) -> Self {
        Self { object, local }
    }

    pub fn local_only(local: LocalStorage) -> Self {
        Self::new(None, local)
    }

    /// Wire the configured backends; object storage talks to the service over HTTPS.
    pub fn from_settings(settings: &StorageSettings) -> Result<Self, ObjectStoreError> {
        let local = LocalStorage::new(settings.images_dir.clone(), &settings.public_path);
        let object = match &settings.s3 {
            Some(s3) => {
                let config = ObjectStoreConfig::from_settings(s3, &settings.key_prefix);
                let client = S3Client::new(&config, settings.upload_timeout)?;
                Some(ObjectStorage::new(config, Arc::new(client)))
            }
            None => None,
        };
        Ok(Self::new(object, local))
    }

    /// Backend tried first on each persist.
    pub fn mode(&self) -> StorageMode {
        if self.object.is_some() {
            StorageMode::S3
        } else {
            StorageMode::Local
        }
    }

    pub fn object_summary(&self) -> Option<S3ConfigSummary> {
        self.object.as_ref().map(|object| object.config().summary())
    }

    pub fn local(&self) -> &LocalStorage {
        &self.local
    }

    pub async fn persist(
        &self,
        result: &RenderResult,
        filename: &str,
    ) -> Result<StorageTarget, StorageError> {
        let started_at = Instant::now();

        if let Some(object) = &self.object {
            match object.persist(result, filename).await {
                Ok(target) => {
                    counter!(METRIC_STORAGE_PERSIST, "backend" => "s3").increment(1);
                    info!(
                        target_module = SOURCE,
                        op = "persist",
                        result = "ok",
                        backend = "s3",
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        url = target.url(),
                        bytes = result.len(),
                        "Chart uploaded to object storage"
                    );
                    return Ok(target);
                }
                Err(err) => {
                    counter!(METRIC_STORAGE_FALLBACK).increment(1);
                    warn!(
                        target_module = SOURCE,
                        op = "persist",
                        result = "fallback",
                        backend = "s3",
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        filename,
                        error = %err,
                        "Object storage upload failed; falling back to local storage"
                    );
                }
            }
        }

        let target = self.local.persist(result, filename).await.inspect_err(|err| {
            warn!(
                target_module = SOURCE,
                op = "persist",
                result = "error",
                backend = "local",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                filename,
                error = %err,
                "Local chart storage failed"
            );
        })?;
        counter!(METRIC_STORAGE_PERSIST, "backend" => "local").increment(1);
        info!(
            target_module = SOURCE,
            op = "persist",
            result = "ok",
            backend = "local",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            url = target.url(),
            bytes = result.len(),
            "Chart written to local storage"
        );
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::TempDir;

    use super::*;

    #[derive(Default)]
    struct RecordingClient {
        fail_first: AtomicUsize,
        puts: std::sync::Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl ObjectStoreClient for RecordingClient {
        async fn put(
            &self,
            bucket: &str,
            key: &str,
            _body: Bytes,
            content_type: &str,
        ) -> Result<(), ObjectStoreError> {
            self.puts.lock().expect("puts lock").push((
                bucket.to_string(),
                key.to_string(),
                content_type.to_string(),
            ));
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(ObjectStoreError::Status {
                    status: 403,
                    body: "AccessDenied".to_string(),
                });
            }
            Ok(())
        }
    }

    fn object_config() -> ObjectStoreConfig {
        ObjectStoreConfig {
            access_key_id: "AKIA".to_string(),
            secret_access_key: "secret".to_string(),
            region: DEFAULT_REGION.to_string(),
            bucket: "charts".to_string(),
            custom_domain: None,
            endpoint: None,
            force_path_style: false,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    fn result() -> RenderResult {
        RenderResult::new(b"png-bytes".to_vec(), "image/png")
    }

    #[tokio::test]
    async fn object_store_is_primary_when_configured() {
        let dir = TempDir::new().expect("temp dir");
        let client = Arc::new(RecordingClient::default());
        let storage = ChartStorage::new(
            Some(ObjectStorage::new(object_config(), client.clone())),
            LocalStorage::new(dir.path(), DEFAULT_PUBLIC_PATH),
        );
        assert_eq!(storage.mode(), StorageMode::S3);

        let target = storage
            .persist(&result(), "chart-a.png")
            .await
            .expect("persist");

        assert_eq!(
            target,
            StorageTarget::ObjectStore {
                bucket: "charts".to_string(),
                key: "charts/chart-a.png".to_string(),
                url: "https://charts.s3.us-east-1.amazonaws.com/charts/chart-a.png".to_string(),
            }
        );
        let puts = client.puts.lock().expect("puts lock");
        assert_eq!(
            puts.as_slice(),
            &[(
                "charts".to_string(),
                "charts/chart-a.png".to_string(),
                "image/png".to_string()
            )]
        );
        assert!(!dir.path().join("chart-a.png").exists());
    }

    #[tokio::test]
    async fn failed_upload_falls_back_for_that_call_only() {
        let dir = TempDir::new().expect("temp dir");
        let client = Arc::new(RecordingClient {
            fail_first: AtomicUsize::new(1),
            ..Default::default()
        });
        let storage = ChartStorage::new(
            Some(ObjectStorage::new(object_config(), client.clone())),
            LocalStorage::new(dir.path(), DEFAULT_PUBLIC_PATH),
        );

        let first = storage
            .persist(&result(), "chart-a.png")
            .await
            .expect("fallback succeeds");
        assert_eq!(first.mode(), StorageMode::Local);
        assert_eq!(first.url(), "/images/chart-a.png");
        assert!(dir.path().join("chart-a.png").exists());

        let second = storage
            .persist(&result(), "chart-b.png")
            .await
            .expect("object store retried");
        assert_eq!(second.mode(), StorageMode::S3);
        assert_eq!(client.puts.lock().expect("puts lock").len(), 2);
    }

    #[tokio::test]
    async fn local_only_reports_local_mode() {
        let dir = TempDir::new().expect("temp dir");
        let storage = ChartStorage::local_only(LocalStorage::new(dir.path(), DEFAULT_PUBLIC_PATH));
        assert_eq!(storage.mode(), StorageMode::Local);
        assert!(storage.object_summary().is_none());

        let target = storage
            .persist(&result(), "chart.png")
            .await
            .expect("persist");
        assert_eq!(target.local_path(), Some(dir.path().join("chart.png").as_path()));
    }
}
