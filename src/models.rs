use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

use crate::error::{RenderError, Result};

/// Body of `POST /generate`. Exactly one of `html`, `tmpl`, `tmplname` must be set.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GenerateRequest {
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub tmpl: Option<String>, // inline template text
    #[serde(default)]
    pub tmplname: Option<String>, // resolved to <template dir>/<name>.html
    #[serde(default)]
    pub tmpldata: Option<Map<String, Value>>,
    #[serde(default)]
    pub options: Option<ScreenshotOptions>,
    #[serde(default, rename = "json")]
    pub as_json: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSource {
    Inline(String),
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentMode {
    Html(String),
    Template { source: TemplateSource, data: Map<String, Value> },
}

/// How the caller wants the rendered image back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Image bytes in the response body, nothing persisted.
    File,
    /// Upload, then answer with the storage key.
    Identifier,
}

/// A validated generate request.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub content: ContentMode,
    pub options: ScreenshotOptions,
    pub response: ResponseMode,
}

impl TryFrom<GenerateRequest> for RenderJob {
    type Error = RenderError;

    fn try_from(req: GenerateRequest) -> Result<Self> {
        // Empty strings count as absent.
        let present = |v: Option<String>| v.filter(|s| !s.is_empty());
        let (html, tmpl, tmplname) = (present(req.html), present(req.tmpl), present(req.tmplname));

        let supplied = [html.is_some(), tmpl.is_some(), tmplname.is_some()].iter().filter(|b| **b).count();
        if supplied > 1 {
            return Err(RenderError::BadRequest("only one of html, tmpl, tmplname may be given".into()));
        }

        let data = req.tmpldata.unwrap_or_default();
        let content = if let Some(html) = html {
            ContentMode::Html(html)
        } else if let Some(tmpl) = tmpl {
            ContentMode::Template { source: TemplateSource::Inline(tmpl), data }
        } else if let Some(name) = tmplname {
            ContentMode::Template { source: TemplateSource::Named(name), data }
        } else {
            return Err(RenderError::BadRequest("html or tmpl not found".into()));
        };

        let options = ScreenshotOptions::resolve(req.options);
        options.validate()?;

        Ok(Self {
            content,
            options,
            response: if req.as_json { ResponseMode::Identifier } else { ResponseMode::File },
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self { Self::Png => "png", Self::Jpeg => "jpeg" }
    }

    pub fn media_type(self) -> &'static str {
        match self { Self::Png => "image/png", Self::Jpeg => "image/jpeg" }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Clip {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Animations { Allow, Disabled }

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Caret { Hide, Initial }

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    /// One image pixel per CSS pixel.
    Css,
    /// One image pixel per device pixel.
    Device,
}

/// Capture options. Every field is optional; `None` leaves the capture
/// engine's own default in place.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ScreenshotOptions {
    /// Milliseconds.
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default, rename = "type")]
    pub format: Option<ImageFormat>,
    #[serde(default)]
    pub quality: Option<u32>, // jpeg only
    #[serde(default)]
    pub omit_background: Option<bool>,
    #[serde(default)]
    pub full_page: Option<bool>,
    #[serde(default)]
    pub clip: Option<Clip>,
    #[serde(default)]
    pub animations: Option<Animations>,
    #[serde(default)]
    pub caret: Option<Caret>,
    #[serde(default)]
    pub scale: Option<Scale>,
}

impl ScreenshotOptions {
    /// Options used when the request carries no `options` block at all.
    pub fn request_default() -> Self {
        Self {
            format: Some(ImageFormat::Png),
            full_page: Some(true),
            scale: Some(Scale::Device),
            ..Self::default()
        }
    }

    /// An absent block becomes [`Self::request_default`]; a present block is kept as given.
    pub fn resolve(options: Option<Self>) -> Self {
        options.unwrap_or_else(Self::request_default)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.timeout {
            if !t.is_finite() || t <= 0.0 {
                return Err(RenderError::BadRequest("options.timeout must be a positive number of milliseconds".into()));
            }
        }
        if let Some(q) = self.quality {
            if q > 100 {
                return Err(RenderError::BadRequest("options.quality must be between 0 and 100".into()));
            }
        }
        if let Some(clip) = &self.clip {
            let finite = [clip.x, clip.y, clip.width, clip.height].iter().all(|v| v.is_finite());
            if !finite || clip.width <= 0.0 || clip.height <= 0.0 {
                return Err(RenderError::BadRequest("options.clip needs a positive width and height".into()));
            }
            if self.full_page == Some(true) {
                return Err(RenderError::BadRequest("options.clip and options.full_page are mutually exclusive".into()));
            }
        }
        Ok(())
    }

    pub fn image_format(&self) -> ImageFormat {
        self.format.unwrap_or_default()
    }

    /// `quality` is dropped for anything but jpeg.
    pub fn effective_quality(&self) -> Option<u32> {
        match self.image_format() {
            ImageFormat::Jpeg => self.quality,
            ImageFormat::Png => None,
        }
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout.map(|t| t.ceil() as u64)
    }
}

/// `{"code": .., "message": .., "data": ..}` envelope shared by every JSON response.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiResponse<T> {
    pub code: u8,
    pub message: String,
    pub data: T,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GeneratedId {
    pub id: String,
}

impl ApiResponse<GeneratedId> {
    pub fn success(id: String) -> Self {
        Self { code: 0, message: "success".into(), data: GeneratedId { id } }
    }
}

impl ApiResponse<Map<String, Value>> {
    pub fn failure(message: String) -> Self {
        Self { code: 1, message, data: Map::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn request(body: Value) -> GenerateRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn html_mode_with_default_options() {
        let job = RenderJob::try_from(request(json!({"html": "<h1>Hi</h1>", "json": true}))).unwrap();
        assert_eq!(job.content, ContentMode::Html("<h1>Hi</h1>".into()));
        assert_eq!(job.response, ResponseMode::Identifier);
        assert_eq!(job.options, ScreenshotOptions::request_default());
    }

    #[test]
    fn template_modes_carry_data() {
        let job = RenderJob::try_from(request(json!({"tmpl": "{{ a }}", "tmpldata": {"a": 1}}))).unwrap();
        match job.content {
            ContentMode::Template { source: TemplateSource::Inline(t), data } => {
                assert_eq!(t, "{{ a }}");
                assert_eq!(data.get("a"), Some(&json!(1)));
            }
            other => panic!("unexpected content {other:?}"),
        }
        assert_eq!(job.response, ResponseMode::File);

        let job = RenderJob::try_from(request(json!({"tmplname": "card"}))).unwrap();
        assert_eq!(
            job.content,
            ContentMode::Template { source: TemplateSource::Named("card".into()), data: Map::new() }
        );
    }

    #[test]
    fn content_mode_must_be_unique() {
        let err = RenderJob::try_from(request(json!({}))).unwrap_err();
        assert!(matches!(err, RenderError::BadRequest(m) if m == "html or tmpl not found"));

        let err = RenderJob::try_from(request(json!({"html": "x", "tmpl": "y"}))).unwrap_err();
        assert!(matches!(err, RenderError::BadRequest(_)));

        let err = RenderJob::try_from(request(json!({"html": "", "tmpl": ""}))).unwrap_err();
        assert!(matches!(err, RenderError::BadRequest(_)));
    }

    #[test]
    fn explicit_options_are_not_filled_with_defaults() {
        let job = RenderJob::try_from(request(json!({"html": "x", "options": {"type": "jpeg", "quality": 80}}))).unwrap();
        assert_eq!(job.options.image_format(), ImageFormat::Jpeg);
        assert_eq!(job.options.full_page, None);
        assert_eq!(job.options.scale, None);
        assert_eq!(job.options.effective_quality(), Some(80));
    }

    #[test]
    fn quality_is_inert_for_png() {
        let opts: ScreenshotOptions = serde_json::from_value(json!({"type": "png", "quality": 10})).unwrap();
        assert_eq!(opts.effective_quality(), None);
        let opts: ScreenshotOptions = serde_json::from_value(json!({"quality": 10})).unwrap();
        assert_eq!(opts.image_format(), ImageFormat::Png);
        assert_eq!(opts.effective_quality(), None);
    }

    #[test]
    fn option_validation() {
        let bad = [
            json!({"quality": 101}),
            json!({"timeout": 0}),
            json!({"clip": {"x": 0, "y": 0, "width": 0, "height": 10}}),
            json!({"full_page": true, "clip": {"x": 0, "y": 0, "width": 10, "height": 10}}),
        ];
        for body in bad {
            let opts: ScreenshotOptions = serde_json::from_value(body.clone()).unwrap();
            assert!(opts.validate().is_err(), "{body} should be rejected");
        }

        let ok: ScreenshotOptions = serde_json::from_value(json!({
            "timeout": 1500.5, "type": "jpeg", "quality": 0, "omit_background": true,
            "clip": {"x": 1, "y": 2, "width": 3, "height": 4},
            "animations": "disabled", "caret": "initial", "scale": "css"
        })).unwrap();
        assert!(ok.validate().is_ok());
        assert_eq!(ok.timeout_ms(), Some(1501));
    }

    #[test]
    fn envelopes_serialize_like_the_wire_format() {
        let ok = serde_json::to_value(ApiResponse::success("data/rendered/a.png".into())).unwrap();
        assert_eq!(ok, json!({"code": 0, "message": "success", "data": {"id": "data/rendered/a.png"}}));
        let err = serde_json::to_value(ApiResponse::failure("file not found".into())).unwrap();
        assert_eq!(err, json!({"code": 1, "message": "file not found", "data": {}}));
    }
}
