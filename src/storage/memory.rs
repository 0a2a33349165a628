use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{ObjectStore, ObjectStream};
use crate::error::{RenderError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Keeps objects in process memory. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    provisioned: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times [`ObjectStore::ensure_bucket`] ran.
    pub fn provision_count(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn ensure_bucket(&self) -> Result<()> {
        self.provisioned.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upload(&self, local_path: &Path, key: &str, content_type: &str) -> Result<()> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| RenderError::Storage(format!("read {}: {e}", local_path.display())))?;
        self.objects.write().insert(
            key.to_string(),
            StoredObject { bytes: Bytes::from(bytes), content_type: content_type.to_string() },
        );
        Ok(())
    }

    async fn download_stream(&self, key: &str) -> Result<Option<ObjectStream>> {
        Ok(self.get(key).map(|obj| ObjectStream {
            content_length: Some(obj.bytes.len() as u64),
            content_type: Some(obj.content_type),
            reader: Box::pin(Cursor::new(obj.bytes)),
        }))
    }
}
