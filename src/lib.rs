//! Text2Img - render HTML or templates to images and serve them from object storage.
//!
//! A generate call materializes the request into an HTML file, captures it with
//! headless Chrome, then either uploads the image and returns its storage key or
//! streams the image straight back. A fetch call streams a stored image by key.
//!
//! # Architecture
//!
//! - **materialize**: raw HTML or sandboxed templates to an HTML file
//! - **screenshot**: HTML file to PNG/JPEG via headless Chrome
//! - **storage**: S3-compatible, filesystem and in-memory object stores
//! - **coordinator**: the pipeline and temp-file cleanup
//! - **identifier**: storage keys and the fetch path
//! - **routes**: HTTP surface

pub mod config;
pub mod coordinator;
pub mod error;
pub mod identifier;
pub mod materialize;
pub mod models;
pub mod routes;
pub mod screenshot;
pub mod storage;

pub use self::config::{Config, StorageBackend};
pub use self::coordinator::{RenderCoordinator, RenderOutput};
pub use self::error::{ApiError, RenderError};
pub use self::routes::{router, AppState};
