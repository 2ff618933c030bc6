//! Local filesystem persistence for rendered charts.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use tokio::fs;

use super::{StorageError, StorageTarget};
use crate::application::render::RenderResult;

pub const DEFAULT_IMAGES_DIR: &str = "images";
pub const DEFAULT_PUBLIC_PATH: &str = "/images";

#[derive(Debug, Clone)]
pub struct LocalStorage {
    directory: PathBuf,
    public_path: String,
}

impl LocalStorage {
    pub fn new(directory: impl Into<PathBuf>, public_path: &str) -> Self {
        let trimmed = public_path.trim_matches('/');
        let public_path = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        };
        Self {
            directory: directory.into(),
            public_path,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// URL prefix under which stored files are served, e.g. `/images`.
    pub fn public_path(&self) -> &str {
        &self.public_path
    }

    pub async fn persist(
        &self,
        result: &RenderResult,
        filename: &str,
    ) -> Result<StorageTarget, StorageError> {
        let path = self.resolve(filename)?;
        fs::create_dir_all(&self.directory)
            .await
            .map_err(|source| StorageError::CreateDir {
                path: self.directory.clone(),
                source,
            })?;
        fs::write(&path, &result.payload)
            .await
            .map_err(|source| StorageError::Write {
                path: path.clone(),
                source,
            })?;

        Ok(StorageTarget::LocalFilesystem {
            directory: self.directory.clone(),
            filename: filename.to_string(),
            url: format!("{}/{filename}", self.public_path),
            path,
        })
    }

    pub async fn read(&self, filename: &str) -> Result<Bytes, StorageError> {
        let path = self.resolve(filename)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(filename.to_string()))
            }
            Err(source) => Err(StorageError::Read { path, source }),
        }
    }

    fn resolve(&self, filename: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(filename).components();
        let valid = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) && !filename.contains(['/', '\\', '\0']);
        if !valid {
            return Err(StorageError::InvalidFilename(filename.to_string()));
        }
        Ok(self.directory.join(filename))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn result() -> RenderResult {
        RenderResult::new(b"\x89PNG".to_vec(), "image/png")
    }

    #[tokio::test]
    async fn persist_creates_directory_and_returns_public_path() {
        let dir = TempDir::new().expect("temp dir");
        let storage = LocalStorage::new(dir.path().join("nested/images"), "/images/");

        let target = storage
            .persist(&result(), "chart-1.png")
            .await
            .expect("persist");

        assert_eq!(target.url(), "/images/chart-1.png");
        let StorageTarget::LocalFilesystem { path, .. } = &target else {
            panic!("expected local target");
        };
        assert_eq!(std::fs::read(path).expect("file written"), b"\x89PNG");

        let bytes = storage.read("chart-1.png").await.expect("read back");
        assert_eq!(bytes.as_ref(), b"\x89PNG");
    }

    #[tokio::test]
    async fn rejects_filenames_that_escape_directory() {
        let dir = TempDir::new().expect("temp dir");
        let storage = LocalStorage::new(dir.path(), DEFAULT_PUBLIC_PATH);

        for name in ["", "..", "../x.png", "a/b.png", "a\\b.png", "/etc/passwd", "."] {
            let err = storage
                .persist(&result(), name)
                .await
                .expect_err("invalid name");
            assert!(
                matches!(err, StorageError::InvalidFilename(_)),
                "{name:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn missing_file_reads_as_not_found() {
        let dir = TempDir::new().expect("temp dir");
        let storage = LocalStorage::new(dir.path(), DEFAULT_PUBLIC_PATH);
        assert!(matches!(
            storage.read("absent.png").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unwritable_directory_is_fatal() {
        let dir = TempDir::new().expect("temp dir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").expect("write blocker");
        let storage = LocalStorage::new(blocker.join("images"), DEFAULT_PUBLIC_PATH);

        let err = storage
            .persist(&result(), "chart.png")
            .await
            .expect_err("directory cannot be created under a file");
        assert!(matches!(err, StorageError::CreateDir { .. }));
    }
}
