//! Service configuration loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::screenshot::ChromeSettings;
use crate::storage::S3Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Fs,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "fs" => Ok(Self::Fs),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("unknown STORAGE_BACKEND `{other}` (expected s3, fs or memory)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub storage_backend: StorageBackend,
    pub s3: S3Settings,
    /// Root directory of the `fs` backend.
    pub fs_storage_dir: PathBuf,
    /// Trusted directory for named templates.
    pub template_dir: PathBuf,
    /// Where documents and rendered images live while a request runs.
    pub scratch_dir: PathBuf,
    pub chrome: ChromeSettings,
    /// Execution budget for a single template render.
    pub template_fuel: u64,
}

impl Config {
    /// Load configuration from environment variables. Every variable is optional:
    ///
    /// - `PORT` (8999), `STORAGE_BACKEND` (s3)
    /// - `S3_ENDPOINT_URL` (http://minio:9000, empty for AWS), `S3_ACCESS_KEY_ID`,
    ///   `S3_SECRET_ACCESS_KEY` (minioadmin), `S3_BUCKET_NAME` (text2img), `S3_REGION` (us-east-1)
    /// - `FS_STORAGE_DIR` (data/store), `TEMPLATE_DIR` (tmpl), `SCRATCH_DIR` (<tmp>/text2img)
    /// - `CHROME_PATH`, `CHROME_SANDBOX` (true), `VIEWPORT_WIDTH` (1280), `VIEWPORT_HEIGHT` (720)
    /// - `RENDER_TIMEOUT_MS` (30000), `TEMPLATE_FUEL` (2000000)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let parsed = |key: &str, default: &str| -> anyhow::Result<u64> {
            let raw = var(key, default);
            raw.trim().parse().with_context(|| format!("{key} must be a non-negative integer, got `{raw}`"))
        };

        let port = u16::try_from(parsed("PORT", "8999")?).context("PORT out of range")?;
        let storage_backend = var("STORAGE_BACKEND", "s3").parse()?;

        let endpoint = var("S3_ENDPOINT_URL", "http://minio:9000");
        let s3 = S3Settings {
            endpoint_url: (!endpoint.trim().is_empty()).then(|| endpoint.trim().to_string()),
            access_key_id: var("S3_ACCESS_KEY_ID", "minioadmin"),
            secret_access_key: var("S3_SECRET_ACCESS_KEY", "minioadmin"),
            bucket: var("S3_BUCKET_NAME", "text2img"),
            region: var("S3_REGION", "us-east-1"),
        };

        let scratch_dir = lookup("SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("text2img"));

        let width = u32::try_from(parsed("VIEWPORT_WIDTH", "1280")?).context("VIEWPORT_WIDTH out of range")?;
        let height = u32::try_from(parsed("VIEWPORT_HEIGHT", "720")?).context("VIEWPORT_HEIGHT out of range")?;
        let sandbox = match var("CHROME_SANDBOX", "true").trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            other => anyhow::bail!("CHROME_SANDBOX must be true or false, got `{other}`"),
        };
        let chrome = ChromeSettings {
            chrome_path: lookup("CHROME_PATH").filter(|p| !p.trim().is_empty()).map(PathBuf::from),
            window_size: (width, height),
            sandbox,
            default_timeout: Duration::from_millis(parsed("RENDER_TIMEOUT_MS", "30000")?),
        };

        let config = Self {
            port,
            storage_backend,
            s3,
            fs_storage_dir: PathBuf::from(var("FS_STORAGE_DIR", "data/store")),
            template_dir: PathBuf::from(var("TEMPLATE_DIR", "tmpl")),
            scratch_dir,
            chrome,
            template_fuel: parsed("TEMPLATE_FUEL", "2000000")?,
        };

        tracing::info!(
            port = config.port,
            backend = ?config.storage_backend,
            bucket = %config.s3.bucket,
            template_dir = %config.template_dir.display(),
            scratch_dir = %config.scratch_dir.display(),
            "configuration loaded"
        );

        Ok(config)
    }
}
