//! Screenshot engine: drives headless Chrome over the DevTools protocol.
//!
//! One browser process is shared by every request. Each capture opens its own
//! browser context and tab, so cookies, viewport overrides and injected styles
//! never leak between concurrent requests. The `headless_chrome` API is
//! blocking, so captures run on the blocking thread pool under a timeout.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Emulation, Page, Target, DOM};
use headless_chrome::{Browser, LaunchOptions};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{RenderError, Result};
use crate::models::{Animations, Caret, ImageFormat, Scale, ScreenshotOptions};

/// An image file produced by a capture. Whoever holds it deletes it.
#[derive(Debug)]
pub struct RenderedImage {
    path: PathBuf,
    format: ImageFormat,
}

impl RenderedImage {
    pub fn new(path: PathBuf, format: ImageFormat) -> Self {
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn media_type(&self) -> &'static str {
        self.format.media_type()
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// Anything that can turn an HTML file into an image file.
#[async_trait]
pub trait Capturer: Send + Sync {
    /// Capture `document` with `options`, writing one new image file.
    async fn capture(&self, document: &Path, options: &ScreenshotOptions) -> Result<RenderedImage>;
}

/// Browser launch settings.
#[derive(Debug, Clone)]
pub struct ChromeSettings {
    /// Explicit browser binary; auto-detected when `None`.
    pub chrome_path: Option<PathBuf>,
    pub window_size: (u32, u32),
    pub sandbox: bool,
    /// Used when a request does not set `options.timeout`.
    pub default_timeout: Duration,
}

pub struct ChromeCapturer {
    browser: Arc<Browser>,
    scratch_dir: PathBuf,
    default_timeout: Duration,
}

impl ChromeCapturer {
    pub fn launch(settings: &ChromeSettings, scratch_dir: PathBuf) -> Result<Self> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(settings.sandbox)
            .path(settings.chrome_path.clone())
            .window_size(Some(settings.window_size))
            // The connection is otherwise dropped after 30s without traffic.
            .idle_browser_timeout(Duration::from_secs(365 * 24 * 60 * 60))
            .build()
            .map_err(|e| RenderError::RenderEngine(format!("failed to build launch options: {e}")))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| RenderError::RenderEngine(format!("failed to launch browser: {e}")))?;

        info!(
            window = ?settings.window_size,
            timeout_ms = settings.default_timeout.as_millis() as u64,
            "headless browser started"
        );

        Ok(Self { browser: Arc::new(browser), scratch_dir, default_timeout: settings.default_timeout })
    }

    /// Stop the browser process. Captures still in flight fail.
    pub fn shutdown(self) {
        drop(self.browser);
        info!("headless browser stopped");
    }
}

#[async_trait]
impl Capturer for ChromeCapturer {
    async fn capture(&self, document: &Path, options: &ScreenshotOptions) -> Result<RenderedImage> {
        let format = options.image_format();
        let timeout = options.timeout_ms().map(Duration::from_millis).unwrap_or(self.default_timeout);
        let timeout_ms = timeout.as_millis() as u64;
        let url = Url::from_file_path(document)
            .map_err(|_| RenderError::RenderEngine(format!("document path is not absolute: {}", document.display())))?;

        let browser = Arc::clone(&self.browser);
        let job_options = options.clone();
        let job = tokio::task::spawn_blocking(move || capture_in_new_context(&browser, url.as_str(), &job_options, timeout));

        let bytes = match tokio::time::timeout(timeout, job).await {
            Err(_) => return Err(RenderError::RenderTimeout(timeout_ms)),
            Ok(Err(join)) => return Err(RenderError::RenderEngine(format!("capture task failed: {join}"))),
            Ok(Ok(result)) => result?,
        };
        verify_format(&bytes, format)?;

        let path = self.scratch_dir.join(format!("{}.{}", Uuid::new_v4(), format.extension()));
        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }
        debug!(path = %path.display(), bytes = bytes.len(), "captured screenshot");
        Ok(RenderedImage::new(path, format))
    }
}

fn capture_in_new_context(browser: &Browser, url: &str, options: &ScreenshotOptions, timeout: Duration) -> Result<Vec<u8>> {
    let started = Instant::now();
    let classify = |what: &str, err: anyhow::Error| {
        if started.elapsed() >= timeout {
            RenderError::RenderTimeout(timeout.as_millis() as u64)
        } else {
            RenderError::RenderEngine(format!("{what}: {err}"))
        }
    };

    let context = browser.new_context().map_err(|e| classify("create browser context", e))?;
    let context_id = context.get_id().to_string();
    let result = context
        .new_tab()
        .map_err(|e| classify("open tab", e))
        .and_then(|tab| {
            let shot = capture_tab(&tab, url, options, timeout).map_err(|e| classify("capture", e));
            if let Err(e) = tab.close(true) {
                warn!(error = %e, "failed to close tab");
            }
            shot
        });

    if let Err(e) = browser.call_method(Target::DisposeBrowserContext { browser_context_id: context_id }) {
        warn!(error = %e, "failed to dispose browser context");
    }
    result
}

#[derive(Debug, Deserialize)]
struct PageMetrics {
    content_width: f64,
    content_height: f64,
    viewport_width: f64,
    viewport_height: f64,
    device_pixel_ratio: f64,
}

const PAGE_METRICS_JS: &str = r#"JSON.stringify({
    content_width: Math.max(document.documentElement.scrollWidth, document.body ? document.body.scrollWidth : 0),
    content_height: Math.max(document.documentElement.scrollHeight, document.body ? document.body.scrollHeight : 0),
    viewport_width: window.innerWidth,
    viewport_height: window.innerHeight,
    device_pixel_ratio: window.devicePixelRatio || 1
})"#;

fn capture_tab(tab: &Tab, url: &str, options: &ScreenshotOptions, timeout: Duration) -> anyhow::Result<Vec<u8>> {
    tab.set_default_timeout(timeout);
    tab.navigate_to(url)?.wait_until_navigated()?;

    if options.omit_background == Some(true) {
        tab.call_method(Emulation::SetDefaultBackgroundColorOverride {
            color: Some(DOM::RGBA { r: 0, g: 0, b: 0, a: Some(0.0) }),
        })?;
    }

    if let Some(css) = capture_stylesheet(options) {
        let script = format!(
            "(() => {{ const s = document.createElement('style'); s.textContent = {}; (document.head || document.documentElement).appendChild(s); }})()",
            serde_json::to_string(&css)?
        );
        tab.evaluate(&script, false)?;
    }

    let clip = resolve_clip(tab, options)?;
    let format = match options.image_format() {
        ImageFormat::Png => Page::CaptureScreenshotFormatOption::Png,
        ImageFormat::Jpeg => Page::CaptureScreenshotFormatOption::Jpeg,
    };

    let data = tab
        .call_method(Page::CaptureScreenshot {
            format: Some(format),
            quality: options.effective_quality(),
            clip,
            from_surface: Some(true),
            capture_beyond_viewport: options.full_page,
            optimize_for_speed: None,
        })?
        .data;

    Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
}

/// Styles injected before capture for `animations` and `caret`.
fn capture_stylesheet(options: &ScreenshotOptions) -> Option<String> {
    let mut css = String::new();
    if options.animations == Some(Animations::Disabled) {
        css.push_str(
            "*, *::before, *::after { animation: none !important; transition: none !important; }\n",
        );
    }
    if options.caret == Some(Caret::Hide) {
        css.push_str("* { caret-color: transparent !important; }\n");
    }
    (!css.is_empty()).then_some(css)
}

/// Region to capture. `None` leaves the browser's default: the current viewport at device scale.
fn resolve_clip(tab: &Tab, options: &ScreenshotOptions) -> anyhow::Result<Option<Page::Viewport>> {
    let wants_page = options.full_page == Some(true);
    let wants_css_scale = options.scale == Some(Scale::Css);
    if options.clip.is_none() && !wants_page && !wants_css_scale {
        return Ok(None);
    }

    let metrics = page_metrics(tab)?;
    let scale = if wants_css_scale { 1.0 / metrics.device_pixel_ratio.max(f64::MIN_POSITIVE) } else { 1.0 };

    let viewport = match options.clip {
        Some(clip) => Page::Viewport { x: clip.x, y: clip.y, width: clip.width, height: clip.height, scale },
        None if wants_page => Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: metrics.content_width.max(metrics.viewport_width),
            height: metrics.content_height.max(metrics.viewport_height),
            scale,
        },
        None => Page::Viewport { x: 0.0, y: 0.0, width: metrics.viewport_width, height: metrics.viewport_height, scale },
    };
    Ok(Some(viewport))
}

fn page_metrics(tab: &Tab) -> anyhow::Result<PageMetrics> {
    let raw = tab
        .evaluate(PAGE_METRICS_JS, false)?
        .value
        .and_then(|v| v.as_str().map(str::to_owned))
        .ok_or_else(|| anyhow::anyhow!("page metrics script returned no value"))?;
    Ok(serde_json::from_str(&raw)?)
}

/// The captured bytes must actually be the requested format.
pub fn verify_format(bytes: &[u8], expected: ImageFormat) -> Result<()> {
    let wanted = match expected {
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
    };
    match image::guess_format(bytes) {
        Ok(found) if found == wanted => Ok(()),
        Ok(found) => Err(RenderError::RenderEngine(format!("expected {expected:?} output, browser produced {found:?}"))),
        Err(e) => Err(RenderError::RenderEngine(format!("browser produced unrecognized output: {e}"))),
    }
}
