//! Turns raw HTML or a template plus data into an HTML file on local disk.
//!
//! Template rendering runs in a sandboxed environment:
//! - templates load only from the trusted template directory, never via `..`,
//!   absolute paths or symlinks leading outside it
//! - attribute or item names starting with `_` are refused
//! - every render has a fuel budget, so runaway loops are cut off
//! - the environment exposes no filesystem, network or process functions

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock};

use minijinja::value::Value;
use minijinja::{AutoEscape, Environment, Error, ErrorKind, UndefinedBehavior};
use regex::Regex;
use serde_json::Map;
use tracing::debug;
use uuid::Uuid;

use crate::error::{RenderError, Result};
use crate::models::{ContentMode, TemplateSource};

/// Prefix on errors raised by the sandbox so they survive minijinja's error wrapping.
const SANDBOX: &str = "sandbox: ";

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{.*?\}\}|\{%.*?%\}").expect("valid tag regex"));
static STRING_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#).expect("valid string regex"));
static PRIVATE_SUBSCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[\s*["']_"#).expect("valid subscript regex"));
static PRIVATE_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.\s*_").expect("valid attribute regex"));

/// A materialized HTML file. Whoever holds it is responsible for deleting it.
#[derive(Debug)]
pub struct Document {
    path: PathBuf,
}

impl Document {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

pub struct Materializer {
    env: Arc<Environment<'static>>,
    scratch_dir: PathBuf,
}

impl Materializer {
    /// `scratch_dir` must exist and be absolute; documents are written there.
    pub fn new(template_dir: PathBuf, scratch_dir: PathBuf, fuel: u64) -> Self {
        Self { env: Arc::new(sandboxed_environment(template_dir, fuel)), scratch_dir }
    }

    /// Write `content` as a new uniquely named HTML file.
    pub async fn materialize(&self, content: &ContentMode) -> Result<Document> {
        let rendered;
        let html = match content {
            ContentMode::Html(html) => html.as_str(),
            ContentMode::Template { source, data } => {
                let env = Arc::clone(&self.env);
                let (source, data) = (source.clone(), data.clone());
                rendered = tokio::task::spawn_blocking(move || render_template(&env, &source, &data))
                    .await
                    .map_err(|e| RenderError::TemplateRender(format!("render task failed: {e}")))??;
                rendered.as_str()
            }
        };

        let path = self.scratch_dir.join(format!("{}.html", Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&path, html).await {
            // Drop whatever part of the file made it to disk.
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }
        debug!(path = %path.display(), bytes = html.len(), "materialized document");
        Ok(Document { path })
    }
}

fn sandboxed_environment(template_dir: PathBuf, fuel: u64) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.set_fuel(Some(fuel));
    env.add_filter("attr", guarded_attr);
    env.set_loader(move |name| {
        let path = resolve_template_path(&template_dir, name).map_err(sandbox_violation)?;
        match std::fs::read_to_string(&path) {
            Ok(source) => Ok(Some(source)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::new(ErrorKind::InvalidOperation, format!("could not read template `{name}`")).with_source(e)),
        }
    });
    env
}

fn render_template(env: &Environment<'static>, source: &TemplateSource, data: &Map<String, serde_json::Value>) -> Result<String> {
    let rendered = match source {
        TemplateSource::Inline(text) => {
            check_source(text)?;
            env.render_str(text, data)
        }
        TemplateSource::Named(name) => env.get_template(&format!("{name}.html")).and_then(|t| t.render(data)),
    };
    rendered.map_err(classify)
}

/// Resolve `name` inside `dir`. Names must be plain relative paths and may
/// not lead outside `dir` through symlinks.
pub fn resolve_template_path(dir: &Path, name: &str) -> std::result::Result<PathBuf, String> {
    let rel = Path::new(name);
    let plain = !name.is_empty()
        && !name.contains(['\\', '\0'])
        && rel.components().all(|c| matches!(c, Component::Normal(_)));
    if !plain {
        return Err(format!("template name `{name}` is outside the template directory"));
    }

    let candidate = dir.join(rel);
    let Ok(real) = candidate.canonicalize() else {
        // Nonexistent; the loader reports it as not found.
        return Ok(candidate);
    };
    let root = dir
        .canonicalize()
        .map_err(|e| format!("template directory unavailable: {e}"))?;
    if real.starts_with(&root) {
        Ok(real)
    } else {
        Err(format!("template `{name}` resolves outside the template directory"))
    }
}

/// Reject private attribute access written directly in template source.
fn check_source(source: &str) -> Result<()> {
    for tag in TAG.find_iter(source) {
        let tag = tag.as_str();
        let stripped = STRING_LITERAL.replace_all(tag, "\"\"");
        if PRIVATE_SUBSCRIPT.is_match(tag) || PRIVATE_ATTRIBUTE.is_match(&stripped) {
            return Err(RenderError::TemplateSecurity(format!(
                "access to private attributes is not allowed: `{}`",
                tag.trim()
            )));
        }
    }
    Ok(())
}

/// `attr` filter that refuses private names.
fn guarded_attr(value: Value, name: &str) -> std::result::Result<Value, Error> {
    if name.starts_with('_') {
        return Err(sandbox_violation(format!("access to attribute `{name}` is not allowed")));
    }
    value.get_attr(name)
}

fn sandbox_violation(detail: String) -> Error {
    Error::new(ErrorKind::InvalidOperation, format!("{SANDBOX}{detail}"))
}

/// Find the sandbox's own reason anywhere in the error chain.
fn sandbox_reason(err: &Error) -> Option<String> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(mj) = e.downcast_ref::<Error>() {
            if mj.kind() == ErrorKind::OutOfFuel {
                return Some("template exceeded its execution budget".to_string());
            }
            if let Some(detail) = mj.detail().and_then(|d| d.strip_prefix(SANDBOX)) {
                return Some(detail.to_string());
            }
        }
        current = e.source();
    }
    None
}

fn classify(err: Error) -> RenderError {
    match sandbox_reason(&err) {
        Some(reason) => RenderError::TemplateSecurity(reason),
        None => RenderError::TemplateRender(err.to_string()),
    }
}
