//! Mapping between rendered files, storage keys and the `/data/{path}` fetch route.
//!
//! A storage key is also the externally visible identifier. Keys look like
//! `data/rendered/<uuid>.<ext>`; the fetch route receives everything after
//! `data/` and puts the prefix back.

use std::path::Path;

use crate::error::{RenderError, Result};

/// Prefix stripped by the fetch route and restored by [`resolve`].
pub const DATA_PREFIX: &str = "data/";

/// Where rendered images live inside the bucket.
pub const RENDERED_PREFIX: &str = "data/rendered/";

/// Storage key for a rendered image, taken from its (unique) file name.
pub fn storage_key_for(image_path: &Path) -> Result<String> {
    let name = image_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RenderError::RenderEngine(format!("rendered image has no usable file name: {}", image_path.display())))?;
    Ok(format!("{RENDERED_PREFIX}{name}"))
}

/// Recover the storage key from the path segment of `GET /data/{path}`.
pub fn resolve(external_path: &str) -> String {
    format!("{DATA_PREFIX}{external_path}")
}

/// Path segment under which `key` is served. Inverse of [`resolve`].
pub fn fetch_path(key: &str) -> Option<&str> {
    key.strip_prefix(DATA_PREFIX)
}

pub fn media_type_for(key: &str) -> &'static str {
    if key.ends_with(".png") { "image/png" } else { "image/jpeg" }
}
