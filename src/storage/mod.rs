//! Object storage behind a single [`ObjectStore`] contract.
//!
//! - [`S3Store`]: any S3-compatible service (MinIO, AWS S3, R2).
//! - [`FsStore`]: a local directory, for development without an object store.
//! - [`MemoryStore`]: process memory, used by tests.

mod fs;
mod memory;
mod s3;

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::Result;

pub use self::fs::FsStore;
pub use self::memory::MemoryStore;
pub use self::s3::{S3Settings, S3Store};

pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// An object opened for incremental reading. The caller picks the chunk size.
pub struct ObjectStream {
    pub reader: ObjectReader,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the backing bucket if it does not exist. Idempotent; called once at startup.
    async fn ensure_bucket(&self) -> Result<()>;

    /// Upload a local file as `key`, replacing any existing object. The object
    /// is publicly readable and carries `content_type`.
    async fn upload(&self, local_path: &Path, key: &str, content_type: &str) -> Result<()>;

    /// Open `key` for streaming. `Ok(None)` when it does not exist.
    async fn download_stream(&self, key: &str) -> Result<Option<ObjectStream>>;
}
