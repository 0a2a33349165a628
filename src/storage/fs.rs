use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ObjectStore, ObjectStream};
use crate::error::{RenderError, Result};
use crate::identifier::media_type_for;

/// Stores objects as files under `root`, one file per key.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Only plain relative keys map onto the directory; anything with `..`,
    /// a root or a drive prefix has no location here.
    fn object_path(&self, key: &str) -> Option<PathBuf> {
        let rel = Path::new(key);
        let plain = !key.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
        plain.then(|| self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn ensure_bucket(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| RenderError::Storage(format!("create {}: {e}", self.root.display())))?;
        info!(root = %self.root.display(), "file store ready");
        Ok(())
    }

    async fn upload(&self, local_path: &Path, key: &str, _content_type: &str) -> Result<()> {
        let target = self
            .object_path(key)
            .ok_or_else(|| RenderError::Storage(format!("invalid object key: {key}")))?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RenderError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        tokio::fs::copy(local_path, &target)
            .await
            .map_err(|e| RenderError::Storage(format!("copy {} to {key}: {e}", local_path.display())))?;
        debug!(key, "stored object on disk");
        Ok(())
    }

    async fn download_stream(&self, key: &str) -> Result<Option<ObjectStream>> {
        let Some(path) = self.object_path(key) else {
            warn!(key, "rejected key outside the store");
            return Ok(None);
        };
        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RenderError::Storage(format!("open {key}: {e}"))),
        };
        let meta = file
            .metadata()
            .await
            .map_err(|e| RenderError::Storage(format!("stat {key}: {e}")))?;
        if !meta.is_file() {
            return Ok(None);
        }
        Ok(Some(ObjectStream {
            reader: Box::pin(file),
            content_type: Some(media_type_for(key).to_string()),
            content_length: Some(meta.len()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn upload_overwrites_and_download_streams() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path().join("store"));
        store.ensure_bucket().await.unwrap();
        store.ensure_bucket().await.unwrap();

        let src = dir.path().join("img.png");
        std::fs::write(&src, b"first").unwrap();
        store.upload(&src, "data/rendered/img.png", "image/png").await.unwrap();
        std::fs::write(&src, b"second").unwrap();
        store.upload(&src, "data/rendered/img.png", "image/png").await.unwrap();

        let mut obj = store.download_stream("data/rendered/img.png").await.unwrap().unwrap();
        let mut buf = Vec::new();
        obj.reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"second");
        assert_eq!(obj.content_type.as_deref(), Some("image/png"));
        assert_eq!(obj.content_length, Some(6));
    }

    #[tokio::test]
    async fn missing_and_escaping_keys_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret.png"), b"nope").unwrap();
        let store = FsStore::new(dir.path().join("store"));
        store.ensure_bucket().await.unwrap();

        assert!(store.download_stream("data/rendered/none.png").await.unwrap().is_none());
        assert!(store.download_stream("../secret.png").await.unwrap().is_none());
        assert!(store.download_stream("/etc/passwd").await.unwrap().is_none());
        assert!(store.download_stream("data").await.unwrap().is_none());
    }
}
