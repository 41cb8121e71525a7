//! Resource descriptors and pool keys.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::backend::{
    BufferDesc, BufferHandle, Extent, FramebufferDesc, FramebufferHandle, TextureDesc,
    TextureDimension, TextureHandle,
};

/// How long a pooled resource lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UsageClass {
    /// Reclaimed once it goes unrequested for the configured number of frames.
    #[default]
    Transient,
    /// Kept until explicit disposal.
    Retained,
}

/// Offscreen render target: a color texture, an optional depth texture and
/// the framebuffer tying them together, pooled as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassDesc {
    pub width: u32,
    pub height: u32,
    pub color_format: wgpu::TextureFormat,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub filter: wgpu::FilterMode,
}

impl PassDesc {
    #[must_use]
    pub fn new(size: Extent, color_format: wgpu::TextureFormat) -> Self {
        Self {
            width: size.width,
            height: size.height,
            color_format,
            depth_format: None,
            filter: wgpu::FilterMode::Linear,
        }
    }

    #[must_use]
    pub fn with_depth(mut self, format: wgpu::TextureFormat) -> Self {
        self.depth_format = Some(format);
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: wgpu::FilterMode) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn size(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    pub(crate) fn color_desc(&self) -> TextureDesc {
        TextureDesc::new_2d(self.width, self.height, self.color_format).with_filter(self.filter)
    }

    pub(crate) fn depth_desc(&self) -> Option<TextureDesc> {
        self.depth_format.map(|format| {
            TextureDesc::new_2d(self.width, self.height, format)
                .with_filter(wgpu::FilterMode::Nearest)
        })
    }
}

/// What kind of GPU resource to create.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture2D(TextureDesc),
    TextureCube(TextureDesc),
    Framebuffer(FramebufferDesc),
    Pass(PassDesc),
    Buffer(BufferDesc),
}

/// A request for a pooled GPU resource.
///
/// Two descriptors are equal when their normalized kinds are equal; the
/// debug label never takes part in matching.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    kind: ResourceKind,
    label: Option<String>,
}

impl ResourceDescriptor {
    #[must_use]
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind: normalize(kind),
            label: None,
        }
    }

    #[must_use]
    pub fn texture_2d(desc: TextureDesc) -> Self {
        Self::new(ResourceKind::Texture2D(desc))
    }

    #[must_use]
    pub fn texture_cube(desc: TextureDesc) -> Self {
        Self::new(ResourceKind::TextureCube(desc))
    }

    #[must_use]
    pub fn framebuffer(desc: FramebufferDesc) -> Self {
        Self::new(ResourceKind::Framebuffer(desc))
    }

    #[must_use]
    pub fn pass(desc: PassDesc) -> Self {
        Self::new(ResourceKind::Pass(desc))
    }

    #[must_use]
    pub fn buffer(desc: BufferDesc) -> Self {
        Self::new(ResourceKind::Buffer(desc))
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    #[inline]
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl PartialEq for ResourceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for ResourceDescriptor {}

impl Hash for ResourceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ResourceKind::Texture2D(d) => write!(f, "texture2d {}x{} {:?}", d.width, d.height, d.format)?,
            ResourceKind::TextureCube(d) => write!(f, "textureCube {} {:?}", d.width, d.format)?,
            ResourceKind::Framebuffer(d) => write!(f, "framebuffer ({} color)", d.color.len())?,
            ResourceKind::Pass(d) => write!(f, "pass {}x{} {:?}", d.width, d.height, d.color_format)?,
            ResourceKind::Buffer(d) => write!(f, "buffer {} bytes", d.size)?,
        }
        if let Some(label) = &self.label {
            write!(f, " '{label}'")?;
        }
        Ok(())
    }
}

/// Canonical form: zero sizes become 1, cube faces are square, dimensions
/// agree with the kind.
fn normalize(kind: ResourceKind) -> ResourceKind {
    fn texture(mut d: TextureDesc, dimension: TextureDimension) -> TextureDesc {
        d.width = d.width.max(1);
        d.height = d.height.max(1);
        d.mip_level_count = d.mip_level_count.max(1);
        d.dimension = dimension;
        if dimension == TextureDimension::Cube {
            d.height = d.width;
        }
        d
    }

    match kind {
        ResourceKind::Texture2D(d) => ResourceKind::Texture2D(texture(d, TextureDimension::D2)),
        ResourceKind::TextureCube(d) => {
            ResourceKind::TextureCube(texture(d, TextureDimension::Cube))
        }
        ResourceKind::Pass(mut d) => {
            d.width = d.width.max(1);
            d.height = d.height.max(1);
            ResourceKind::Pass(d)
        }
        other => other,
    }
}

/// Handles of a pooled [`PassDesc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassTarget {
    pub framebuffer: FramebufferHandle,
    pub color: TextureHandle,
    pub depth: Option<TextureHandle>,
    pub size: Extent,
}

/// Backend handle(s) held by one pooled entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuResource {
    Texture(TextureHandle),
    Framebuffer(FramebufferHandle),
    Pass(PassTarget),
    Buffer(BufferHandle),
}

impl GpuResource {
    #[must_use]
    pub fn as_texture(&self) -> Option<TextureHandle> {
        match self {
            GpuResource::Texture(t) => Some(*t),
            GpuResource::Pass(p) => Some(p.color),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_framebuffer(&self) -> Option<FramebufferHandle> {
        match self {
            GpuResource::Framebuffer(f) => Some(*f),
            GpuResource::Pass(p) => Some(p.framebuffer),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_pass(&self) -> Option<PassTarget> {
        match self {
            GpuResource::Pass(p) => Some(*p),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_buffer(&self) -> Option<BufferHandle> {
        match self {
            GpuResource::Buffer(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<TextureHandle> for GpuResource {
    fn from(t: TextureHandle) -> Self {
        GpuResource::Texture(t)
    }
}

impl From<FramebufferHandle> for GpuResource {
    fn from(f: FramebufferHandle) -> Self {
        GpuResource::Framebuffer(f)
    }
}

impl From<PassTarget> for GpuResource {
    fn from(p: PassTarget) -> Self {
        GpuResource::Pass(p)
    }
}

impl From<BufferHandle> for GpuResource {
    fn from(b: BufferHandle) -> Self {
        GpuResource::Buffer(b)
    }
}
