//! Effect groups and their sub-passes, as authored.
//!
//! Everything here is plain description: string references between stages
//! are only turned into typed stage handles by
//! [`PostGraph::build`](super::PostGraph::build).

use std::fmt;
use std::sync::Arc;

use crate::backend::{ClearValues, Extent, TextureDesc, TextureHandle};
use crate::command::{UniformMap, UniformValue};
use crate::pipeline::{FlagTable, ShaderSource};
use crate::resources::PassTarget;
use crate::state::StatePath;

/// Textures the frame hands to the post chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameInput {
    /// Scene color, the initial working color.
    Color,
    Depth,
}

/// A texture created once, initialized with `data` and shared by every
/// post chain that names it.
#[derive(Clone)]
pub struct SharedTexture {
    pub name: Arc<str>,
    pub desc: TextureDesc,
    pub data: Arc<[u8]>,
}

impl fmt::Debug for SharedTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedTexture")
            .field("name", &self.name)
            .field("desc", &self.desc)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl PartialEq for SharedTexture {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.desc == other.desc
    }
}

/// Where a sub-pass reads a texture from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    /// Output of the latest auto-targeted stage (scene color before any).
    Working,
    Frame(FrameInput),
    /// `"<effect>.<subpass>"`, a sub-pass name of the same effect, or an
    /// effect name (its last sub-pass).
    Named(String),
    Texture(TextureHandle),
    Shared(SharedTexture),
}

impl SourceSpec {
    /// `"color"` and `"depth"` name frame inputs; `""`/`"working"` the
    /// working color; anything else is a stage reference.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "" | "working" => SourceSpec::Working,
            "color" => SourceSpec::Frame(FrameInput::Color),
            "depth" => SourceSpec::Frame(FrameInput::Depth),
            other => SourceSpec::Named(other.to_owned()),
        }
    }
}

impl From<&str> for SourceSpec {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<TextureHandle> for SourceSpec {
    fn from(t: TextureHandle) -> Self {
        SourceSpec::Texture(t)
    }
}

impl From<SharedTexture> for SourceSpec {
    fn from(t: SharedTexture) -> Self {
        SourceSpec::Shared(t)
    }
}

/// Where a sub-pass renders to.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetSpec {
    /// Pooled transient target; its color becomes the new working color.
    Auto,
    /// Pooled transient target that leaves the working color alone
    /// (intermediate results such as blur ping-pong or an occlusion mask).
    Auxiliary,
    /// The frame's output target.
    Screen,
    /// A caller-owned pass target.
    Pass(PassTarget),
    /// Render again into the target of an earlier stage.
    Named(String),
}

impl TargetSpec {
    /// `"auto"`, `"aux"` and `"screen"` are keywords; anything else is a
    /// stage reference.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "" | "auto" => TargetSpec::Auto,
            "aux" | "auxiliary" => TargetSpec::Auxiliary,
            "screen" => TargetSpec::Screen,
            other => TargetSpec::Named(other.to_owned()),
        }
    }
}

impl From<&str> for TargetSpec {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<PassTarget> for TargetSpec {
    fn from(t: PassTarget) -> Self {
        TargetSpec::Pass(t)
    }
}

/// Size of a pooled target relative to the viewport.
#[derive(Clone, Default)]
pub enum SizeSpec {
    #[default]
    Viewport,
    Scale(f32),
    Fixed(Extent),
    Custom(Arc<dyn Fn(Extent) -> Extent + Send + Sync>),
}

impl SizeSpec {
    /// Resolves against the viewport; never returns a zero side.
    #[must_use]
    pub fn resolve(&self, viewport: Extent) -> Extent {
        let size = match self {
            SizeSpec::Viewport => viewport,
            SizeSpec::Scale(factor) => viewport.scaled(*factor),
            SizeSpec::Fixed(size) => *size,
            SizeSpec::Custom(f) => f(viewport),
        };
        Extent::new(size.width.max(1), size.height.max(1))
    }
}

impl fmt::Debug for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeSpec::Viewport => f.write_str("Viewport"),
            SizeSpec::Scale(s) => f.debug_tuple("Scale").field(s).finish(),
            SizeSpec::Fixed(e) => f.debug_tuple("Fixed").field(e).finish(),
            SizeSpec::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One full-screen draw of an effect.
#[derive(Debug, Clone)]
pub struct SubPass {
    pub name: String,
    pub fragment: ShaderSource,
    pub flags: FlagTable,
    /// Static per-pass uniforms.
    pub uniforms: UniformMap,
    /// Uniforms read from the state snapshot every frame, overriding static ones.
    pub state_uniforms: Vec<(String, StatePath)>,
    pub source: SourceSpec,
    /// Extra textures bound to the named sampler uniforms.
    pub inputs: Vec<(String, SourceSpec)>,
    pub target: TargetSpec,
    pub size: SizeSpec,
    pub format: wgpu::TextureFormat,
    pub clear: Option<ClearValues>,
}

impl SubPass {
    /// Reads the working color and renders into an auto target at viewport size.
    #[must_use]
    pub fn new(name: impl Into<String>, fragment: ShaderSource) -> Self {
        Self {
            name: name.into(),
            fragment,
            flags: FlagTable::empty(),
            uniforms: UniformMap::default(),
            state_uniforms: Vec::new(),
            source: SourceSpec::Working,
            inputs: Vec::new(),
            target: TargetSpec::Auto,
            size: SizeSpec::Viewport,
            format: wgpu::TextureFormat::Rgba16Float,
            clear: None,
        }
    }

    #[must_use]
    pub fn flags(mut self, table: FlagTable) -> Self {
        self.flags = table;
        self
    }

    #[must_use]
    pub fn uniform(mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.uniforms.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn uniform_from_state(mut self, name: impl Into<String>, path: impl Into<StatePath>) -> Self {
        self.state_uniforms.push((name.into(), path.into()));
        self
    }

    #[must_use]
    pub fn source(mut self, source: impl Into<SourceSpec>) -> Self {
        self.source = source.into();
        self
    }

    #[must_use]
    pub fn input(mut self, uniform: impl Into<String>, source: impl Into<SourceSpec>) -> Self {
        self.inputs.push((uniform.into(), source.into()));
        self
    }

    #[must_use]
    pub fn target(mut self, target: impl Into<TargetSpec>) -> Self {
        self.target = target.into();
        self
    }

    #[must_use]
    pub fn size(mut self, size: SizeSpec) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub fn format(mut self, format: wgpu::TextureFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn clear(mut self, values: ClearValues) -> Self {
        self.clear = Some(values);
        self
    }
}

/// A named effect: an ordered list of sub-passes that run together.
#[derive(Debug, Clone)]
pub struct EffectGroup {
    pub name: String,
    /// The group runs when this path is truthy; always when `None`.
    pub enable: Option<StatePath>,
    /// The final composite runs even when its predicate is false.
    pub is_final: bool,
    pub passes: Vec<SubPass>,
}

impl EffectGroup {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enable: None,
            is_final: false,
            passes: Vec::new(),
        }
    }

    /// Final composite group: always runs.
    #[must_use]
    pub fn composite(name: impl Into<String>) -> Self {
        Self {
            is_final: true,
            ..Self::new(name)
        }
    }

    #[must_use]
    pub fn enabled_when(mut self, path: impl Into<StatePath>) -> Self {
        self.enable = Some(path.into());
        self
    }

    #[must_use]
    pub fn pass(mut self, pass: SubPass) -> Self {
        self.passes.push(pass);
        self
    }
}
