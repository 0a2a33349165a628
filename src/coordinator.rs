//! Render coordinator: materialize, capture, then upload or hand the file back.
//!
//! Temporary files are held by [`TempFile`] guards from the moment they exist,
//! so every exit path (early `?`, success, dropped response body) deletes
//! them exactly once.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::error::{RenderError, Result};
use crate::identifier;
use crate::materialize::Materializer;
use crate::models::{GenerateRequest, RenderJob, ResponseMode};
use crate::screenshot::Capturer;
use crate::storage::{ObjectStore, ObjectStream};

/// Deletes its file when dropped, unless already deleted.
#[derive(Debug)]
pub struct TempFile {
    path: Option<PathBuf>,
}

impl TempFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Delete now. Later calls and the eventual drop do nothing.
    pub fn remove(&mut self) {
        let Some(path) = self.path.take() else { return };
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed temp file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp file"),
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Result of a successful generate call.
#[derive(Debug)]
pub enum RenderOutput {
    /// Uploaded; the storage key doubles as the identifier.
    Stored { id: String },
    /// Image to be sent as the response body.
    File(RenderedFile),
}

/// A rendered image waiting to be streamed, plus the files to delete afterwards.
#[derive(Debug)]
pub struct RenderedFile {
    image: TempFile,
    document: TempFile,
    media_type: &'static str,
}

impl RenderedFile {
    pub fn media_type(&self) -> &'static str {
        self.media_type
    }

    pub fn path(&self) -> &Path {
        self.image.path()
    }

    /// Open the image as a byte stream. Both temp files are deleted when the
    /// stream is dropped, i.e. after the body has been sent.
    pub async fn into_stream(self) -> Result<(FileBody, u64)> {
        let file = File::open(self.image.path()).await?;
        let len = file.metadata().await?.len();
        let body = FileBody { inner: ReaderStream::new(file), _cleanup: [self.image, self.document] };
        Ok((body, len))
    }
}

/// Streams a rendered file and removes it once the stream is gone.
pub struct FileBody {
    // Declared first so the file handle closes before the guards delete.
    inner: ReaderStream<File>,
    _cleanup: [TempFile; 2],
}

impl Stream for FileBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// A stored object opened for the fetch route.
#[derive(Debug)]
pub struct FetchedObject {
    pub object: ObjectStream,
    pub media_type: &'static str,
}

pub struct RenderCoordinator {
    materializer: Materializer,
    capturer: Arc<dyn Capturer>,
    store: Arc<dyn ObjectStore>,
}

impl RenderCoordinator {
    pub fn new(materializer: Materializer, capturer: Arc<dyn Capturer>, store: Arc<dyn ObjectStore>) -> Self {
        Self { materializer, capturer, store }
    }

    pub async fn generate(&self, request: GenerateRequest) -> Result<RenderOutput> {
        // Start: nothing touches disk until the request is valid.
        let job = RenderJob::try_from(request)?;

        debug!(stage = "materializing");
        let document = TempFile::new(self.materializer.materialize(&job.content).await?.into_path());

        debug!(stage = "capturing", format = ?job.options.image_format());
        let rendered = self.capturer.capture(document.path(), &job.options).await?;
        let media_type = rendered.media_type();
        let image = TempFile::new(rendered.into_path());

        match job.response {
            ResponseMode::Identifier => {
                debug!(stage = "uploading");
                let key = identifier::storage_key_for(image.path())?;
                self.store.upload(image.path(), &key, media_type).await?;
                info!(key = %key, "uploaded rendered image");
                // Cleaning up: only the identifier leaves this function.
                drop(image);
                drop(document);
                Ok(RenderOutput::Stored { id: key })
            }
            ResponseMode::File => {
                debug!(stage = "direct_return");
                Ok(RenderOutput::File(RenderedFile { image, document, media_type }))
            }
        }
    }

    /// Look up `external_path` (the part of `/data/{path}` after `data/`).
    pub async fn fetch(&self, external_path: &str) -> Result<FetchedObject> {
        let key = identifier::resolve(external_path);
        match self.store.download_stream(&key).await? {
            Some(object) => Ok(FetchedObject { object, media_type: identifier::media_type_for(&key) }),
            None => Err(RenderError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn temp_file_is_removed_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.html");
        std::fs::write(&path, "x").unwrap();

        let mut guard = TempFile::new(path.clone());
        guard.remove();
        assert!(!path.exists());

        // Recreated by someone else; the spent guard must leave it alone.
        std::fs::write(&path, "y").unwrap();
        guard.remove();
        drop(guard);
        assert!(path.exists());
    }

    #[test]
    fn temp_file_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        drop(TempFile::new(dir.path().join("never-created.png")));
    }

    #[tokio::test]
    async fn file_body_deletes_after_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("a.png");
        let document = dir.path().join("a.html");
        std::fs::write(&image, b"pngbytes").unwrap();
        std::fs::write(&document, b"<p>").unwrap();

        let rendered = RenderedFile {
            image: TempFile::new(image.clone()),
            document: TempFile::new(document.clone()),
            media_type: "image/png",
        };
        let (mut body, len) = rendered.into_stream().await.unwrap();
        assert_eq!(len, 8);

        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(out, b"pngbytes");
        assert!(image.exists(), "files stay until the body is dropped");

        drop(body);
        assert!(!image.exists());
        assert!(!document.exists());
    }
}
