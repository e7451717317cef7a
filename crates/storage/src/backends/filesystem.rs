//! Local filesystem chunk store.
//!
//! Layout: `{root}/{token}/{chunk number}`. Writes go to a uniquely named
//! sibling temp file which is fsynced and renamed into place.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ChunkStore};
use async_trait::async_trait;
use futures::StreamExt;
use quilt_core::{ChunkNumber, UploadToken};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Local filesystem chunk store.
pub struct FilesystemChunkStore {
    root: PathBuf,
}

impl FilesystemChunkStore {
    /// Create a new filesystem chunk store, creating the root if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Get the storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_key(token: &UploadToken, chunk: ChunkNumber) -> String {
        format!("{}/{}", token.as_str(), chunk.get())
    }

    /// Get the full path for a key, with path traversal protection.
    ///
    /// Runs the validation on the blocking pool since it canonicalizes paths.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Synchronous key path validation.
    ///
    /// Returns an error if the key would escape the storage root, including
    /// through a symlinked upload directory.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }

        for component in Path::new(key).components() {
            if !matches!(component, std::path::Component::Normal(_)) {
                return Err(StorageError::InvalidKey(format!(
                    "contains unsafe path component: {key}"
                )));
            }
        }

        let path = root.join(key);
        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        // Walk from the path itself up to the root; the nearest existing
        // entry must resolve inside the root.
        let mut candidate = Some(path.as_path());
        while let Some(current) = candidate {
            match std::fs::symlink_metadata(current) {
                Ok(meta) => {
                    let canonical = current.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(std::io::Error::new(
                                e.kind(),
                                format!("failed to canonicalize path: {e}"),
                            ))
                        }
                    })?;
                    if !canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    return Ok(path);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(StorageError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to stat path: {err}"),
                    )));
                }
            }
            candidate = current.parent();
        }

        Ok(path)
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

/// Temp file next to `path`, unique per write so concurrent writers never share one.
fn temp_path_for(path: &Path) -> PathBuf {
    let temp_name = format!(".tmp.{}", Uuid::new_v4());
    path.with_file_name(
        path.file_name()
            .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
            .unwrap_or(temp_name),
    )
}

async fn remove_temp(temp_path: &Path) {
    if let Err(e) = fs::remove_file(temp_path).await {
        tracing::warn!(
            path = %temp_path.display(),
            error = %e,
            "Failed to remove temp chunk file"
        );
    }
}

async fn drain_into(file: &mut fs::File, mut data: ByteStream) -> StorageResult<u64> {
    let mut written = 0u64;
    while let Some(bytes) = data.next().await {
        let bytes = bytes?;
        file.write_all(&bytes).await?;
        written += bytes.len() as u64;
    }
    file.sync_all().await?;
    Ok(written)
}

#[async_trait]
impl ChunkStore for FilesystemChunkStore {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, token: &UploadToken, chunk: ChunkNumber) -> StorageResult<bool> {
        let path = self.key_path(&Self::chunk_key(token, chunk)).await?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self, data), fields(backend = "filesystem"))]
    async fn put_stream(
        &self,
        token: &UploadToken,
        chunk: ChunkNumber,
        data: ByteStream,
    ) -> StorageResult<u64> {
        let path = self.key_path(&Self::chunk_key(token, chunk)).await?;
        self.ensure_parent(&path).await?;

        let temp_path = temp_path_for(&path);
        let mut file = fs::File::create(&temp_path).await?;
        let written = match drain_into(&mut file, data).await {
            Ok(written) => written,
            Err(e) => {
                drop(file);
                remove_temp(&temp_path).await;
                return Err(e);
            }
        };
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &path).await {
            remove_temp(&temp_path).await;
            return Err(StorageError::Io(e));
        }

        Ok(written)
    }

    async fn chunk_location(
        &self,
        token: &UploadToken,
        chunk: ChunkNumber,
    ) -> StorageResult<PathBuf> {
        self.key_path(&Self::chunk_key(token, chunk)).await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete_upload(&self, token: &UploadToken) -> StorageResult<()> {
        let dir = self.key_path(token.as_str()).await?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("chunk root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("chunk root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn chunk(n: u32) -> ChunkNumber {
        ChunkNumber::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_put_exists_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemChunkStore::new(dir.path()).await.unwrap();
        let token = UploadToken::generate();

        assert!(!store.exists(&token, chunk(1)).await.unwrap());
        let written = store
            .put(&token, chunk(1), Bytes::from("hello world"))
            .await
            .unwrap();
        assert_eq!(written, 11);
        assert!(store.exists(&token, chunk(1)).await.unwrap());
        assert!(!store.exists(&token, chunk(2)).await.unwrap());

        let path = store.chunk_location(&token, chunk(1)).await.unwrap();
        assert_eq!(path, dir.path().join(token.as_str()).join("1"));
        assert_eq!(std::fs::read(path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemChunkStore::new(dir.path()).await.unwrap();
        let token = UploadToken::generate();

        store.put(&token, chunk(2), Bytes::from("first")).await.unwrap();
        store.put(&token, chunk(2), Bytes::from("second")).await.unwrap();

        let path = store.chunk_location(&token, chunk(2)).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemChunkStore::new(dir.path()).await.unwrap();
        let token = UploadToken::generate();

        // A non-empty directory where the chunk belongs makes the rename fail.
        let path = store.chunk_location(&token, chunk(1)).await.unwrap();
        std::fs::create_dir_all(path.join("blocker")).unwrap();

        let result = store.put(&token, chunk(1), Bytes::from("data")).await;
        assert!(matches!(result, Err(StorageError::Io(_))), "{result:?}");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join(token.as_str()))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_failed_stream_keeps_previous_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemChunkStore::new(dir.path()).await.unwrap();
        let token = UploadToken::generate();

        store.put(&token, chunk(1), Bytes::from("good")).await.unwrap();

        let failing: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from("partial")),
            Err(StorageError::Source("connection reset".to_string())),
        ]));
        let result = store.put_stream(&token, chunk(1), failing).await;
        assert!(matches!(result, Err(StorageError::Source(_))));

        let path = store.chunk_location(&token, chunk(1)).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"good");

        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path().join(token.as_str()))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemChunkStore::new(dir.path()).await.unwrap();
        let token = UploadToken::generate();
        let other = UploadToken::generate();

        store.put(&token, chunk(1), Bytes::from("a")).await.unwrap();
        store.put(&token, chunk(2), Bytes::from("b")).await.unwrap();
        store.put(&other, chunk(1), Bytes::from("c")).await.unwrap();

        store.delete_upload(&token).await.unwrap();
        assert!(!store.exists(&token, chunk(1)).await.unwrap());
        assert!(!store.exists(&token, chunk(2)).await.unwrap());
        assert!(store.exists(&other, chunk(1)).await.unwrap());

        // Deleting again is fine
        store.delete_upload(&token).await.unwrap();
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemChunkStore::new(dir.path().join("chunks"))
            .await
            .unwrap();
        store.health_check().await.unwrap();
        assert_eq!(store.backend_name(), "filesystem");
    }

    #[test]
    fn test_key_path_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FilesystemChunkStore::key_path_sync(dir.path(), "../escape").is_err());
        assert!(FilesystemChunkStore::key_path_sync(dir.path(), "/absolute").is_err());
        assert!(FilesystemChunkStore::key_path_sync(dir.path(), "./token").is_err());
        assert!(FilesystemChunkStore::key_path_sync(dir.path(), "token/1").is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlinked_upload_dir_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let store = FilesystemChunkStore::new(dir.path()).await.unwrap();
        let token = UploadToken::generate();

        // root/{token} -> outside
        symlink(outside.path(), dir.path().join(token.as_str())).unwrap();

        let result = store.put(&token, chunk(1), Bytes::from("data")).await;
        match result {
            Err(StorageError::InvalidKey(msg)) => {
                assert!(msg.contains("escapes storage root"), "{msg}");
            }
            other => panic!("expected InvalidKey error, got: {other:?}"),
        }
        assert!(!outside.path().join("1").exists());
    }
}
