//! Upload storage on the local filesystem

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tracing::info;

use parley_common::protocol::checksum::file_checksum;
use parley_common::SessionId;

use super::{CollaboratorError, FileStore, StoredFile};

/// Writes uploads into a single directory, keyed by file name
#[derive(Debug, Clone)]
pub struct DiskFileStore {
    root: PathBuf,
}

impl DiskFileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client-supplied name to a path inside the store.
    ///
    /// Only the final path component is kept, so `../../etc/passwd` becomes
    /// `passwd`.
    fn resolve(&self, filename: &str) -> Result<(String, PathBuf), CollaboratorError> {
        let name = Path::new(filename)
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .last()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| CollaboratorError::InvalidFilename(filename.to_string()))?;
        Ok((name.to_string(), self.root.join(name)))
    }
}

#[async_trait]
impl FileStore for DiskFileStore {
    async fn store(&self, session: SessionId, filename: &str, data: Bytes) -> Result<StoredFile, CollaboratorError> {
        let (name, path) = self.resolve(filename)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&path, &data).await?;

        let stored = StoredFile {
            filename: name,
            size: data.len() as u64,
            checksum: file_checksum(&data),
            stored_at: Utc::now(),
        };
        info!(%session, filename = %stored.filename, size = stored.size, "Upload stored");
        Ok(stored)
    }

    async fn load(&self, filename: &str) -> Result<Bytes, CollaboratorError> {
        let (name, path) = self.resolve(filename)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CollaboratorError::FileNotFound(name))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskFileStore::new(dir.path());

        let stored = store
            .store(SessionId::new(), "notes.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(stored.size, 5);
        assert_eq!(stored.checksum, file_checksum(b"hello"));

        let loaded = store.load("notes.txt").await.unwrap();
        assert_eq!(&loaded[..], b"hello");
    }

    #[tokio::test]
    async fn test_path_components_are_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskFileStore::new(dir.path());

        let stored = store
            .store(SessionId::new(), "../../escape.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(stored.filename, "escape.txt");
        assert!(dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_invalid_and_missing_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskFileStore::new(dir.path());

        assert!(matches!(
            store.store(SessionId::new(), "..", Bytes::new()).await,
            Err(CollaboratorError::InvalidFilename(_))
        ));
        assert!(matches!(
            store.load("absent.bin").await,
            Err(CollaboratorError::FileNotFound(_))
        ));
    }
}
