//! Shader Source & Variant Composition
//!
//! Turns a [`ShaderSource`] plus an active [`FlagSet`] into the exact text
//! handed to [`GpuBackend::create_program`](crate::backend::GpuBackend::create_program).
//!
//! Composition has two steps:
//!
//! 1. Sources containing template markers are rendered through a shared
//!    minijinja environment with the active flags as context. Blocks use
//!    `{$ ... $}`, variables `{{ ... }}`, and `$$` starts a line statement,
//!    so the syntax never collides with GLSL or WGSL.
//! 2. The `#define` header of the flag set is spliced in right after a
//!    leading `#version` directive (or prepended when there is none).

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use minijinja::{Environment, Error, ErrorKind, syntax::SyntaxConfig};
use rust_embed::RustEmbed;
use serde::Serialize;
use xxhash_rust::xxh3::xxh3_128;

use super::defines::FlagSet;
use crate::errors::{FrameError, Result};

static SHADER_ENV: OnceLock<Environment<'static>> = OnceLock::new();

#[derive(RustEmbed)]
#[folder = "src/shaders"]
struct ShaderAssets;

fn get_env() -> &'static Environment<'static> {
    SHADER_ENV.get_or_init(|| {
        let mut env = Environment::new();

        match SyntaxConfig::builder()
            .block_delimiters("{$", "$}")
            .variable_delimiters("{{", "}}")
            .line_statement_prefix("$$")
            .build()
        {
            Ok(syntax) => env.set_syntax(syntax),
            Err(e) => log::error!("Shader template syntax rejected, using defaults: {e}"),
        }

        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_undefined_behavior(minijinja::UndefinedBehavior::SemiStrict);
        env.set_loader(chunk_loader);
        env.set_path_join_callback(|name, _parent| format!("chunks/{name}").into());

        env
    })
}

fn chunk_loader(name: &str) -> std::result::Result<Option<String>, Error> {
    let filename = if std::path::Path::new(name).extension().is_some() {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{name}.glsl"))
    };

    match ShaderAssets::get(&filename) {
        Some(file) => std::str::from_utf8(file.data.as_ref())
            .map(|s| Some(s.to_owned()))
            .map_err(|e| {
                Error::new(
                    ErrorKind::InvalidOperation,
                    format!("shader chunk '{filename}' is not UTF-8: {e}"),
                )
            }),
        None => Ok(None),
    }
}

/// Shader text with a stable identity.
///
/// The identity is the xxh3-128 hash of the text, so two sources with equal
/// text are the same source as far as the variant cache is concerned, and
/// editing a file (shader reload) yields a new identity.
#[derive(Clone)]
pub struct ShaderSource {
    label: Arc<str>,
    text: Arc<str>,
    id: u128,
}

impl ShaderSource {
    #[must_use]
    pub fn new(label: impl Into<Arc<str>>, text: impl Into<Arc<str>>) -> Self {
        let text = text.into();
        Self {
            label: label.into(),
            id: xxh3_128(text.as_bytes()),
            text,
        }
    }

    /// Loads a source embedded under `src/shaders/` (e.g. `"post/bloom_composite.frag"`).
    pub fn embedded(path: &str) -> Result<Self> {
        let file = ShaderAssets::get(path)
            .ok_or_else(|| FrameError::config(format!("no embedded shader '{path}'")))?;
        let text = std::str::from_utf8(file.data.as_ref())
            .map_err(|e| FrameError::config(format!("embedded shader '{path}' is not UTF-8: {e}")))?;
        Ok(Self::new(path, text))
    }

    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u128 {
        self.id
    }

    fn is_template(&self) -> bool {
        self.text.contains("{$") || self.text.contains("{{") || self.text.contains("$$")
    }
}

impl fmt::Debug for ShaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderSource")
            .field("label", &self.label)
            .field("id", &format_args!("{:032x}", self.id))
            .finish_non_exhaustive()
    }
}

impl PartialEq for ShaderSource {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ShaderSource {}

#[derive(Serialize)]
struct ShaderContext {
    #[serde(flatten)]
    defines: BTreeMap<String, String>,
}

/// Renders (if templated) and prefixes `source` with the flag header.
///
/// Template failures come back as the error text so the caller can attach
/// the full compilation context.
pub fn compose(source: &ShaderSource, flags: &FlagSet) -> std::result::Result<String, String> {
    let body: Cow<'_, str> = if source.is_template() {
        let ctx = ShaderContext {
            defines: flags.to_map(),
        };
        let rendered = get_env()
            .render_str(source.text(), &ctx)
            .map_err(|e| format!("template error in '{}': {e:#}", source.label()))?;
        Cow::Owned(rendered)
    } else {
        Cow::Borrowed(source.text())
    };

    let header = flags.header();
    if header.is_empty() {
        return Ok(body.into_owned());
    }

    let mut out = String::with_capacity(body.len() + header.len() + 1);
    let trimmed = body.trim_start();
    if trimmed.starts_with("#version") {
        let (version, rest) = match trimmed.find('\n') {
            Some(idx) => trimmed.split_at(idx + 1),
            None => (trimmed, ""),
        };
        out.push_str(version);
        if !version.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&header);
        out.push_str(rest);
    } else {
        out.push_str(&header);
        out.push_str(&body);
    }

    log::trace!("Composed variant of '{}':\n{out}", source.label());
    Ok(out)
}
