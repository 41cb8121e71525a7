//! Creation descriptors and render-state vocabulary shared by every backend.
//!
//! Fixed-function state is expressed with `wgpu`'s own types so that a wgpu
//! based backend can forward them untouched, while GL-style backends map them
//! to their enums.

use std::hash::{Hash, Hasher};

use smallvec::SmallVec;
use thiserror::Error;

use super::handles::{ProgramHandle, TextureHandle};

/// Failure reported by a backend call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

// ─── Textures ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    #[default]
    D2,
    Cube,
}

/// Description of a texture to create.
///
/// Debug labels are passed separately so that two requests differing only by
/// label compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub dimension: TextureDimension,
    pub format: wgpu::TextureFormat,
    pub mip_level_count: u32,
    pub min_filter: wgpu::FilterMode,
    pub mag_filter: wgpu::FilterMode,
    pub address_mode: wgpu::AddressMode,
}

impl TextureDesc {
    /// Linear-filtered, edge-clamped single-mip 2D texture.
    #[must_use]
    pub fn new_2d(width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            width,
            height,
            dimension: TextureDimension::D2,
            format,
            mip_level_count: 1,
            min_filter: wgpu::FilterMode::Linear,
            mag_filter: wgpu::FilterMode::Linear,
            address_mode: wgpu::AddressMode::ClampToEdge,
        }
    }

    /// Cube texture with square faces of `size`.
    #[must_use]
    pub fn new_cube(size: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            dimension: TextureDimension::Cube,
            ..Self::new_2d(size, size, format)
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: wgpu::FilterMode) -> Self {
        self.min_filter = filter;
        self.mag_filter = filter;
        self
    }

    #[must_use]
    pub fn with_address_mode(mut self, mode: wgpu::AddressMode) -> Self {
        self.address_mode = mode;
        self
    }

    #[must_use]
    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count.max(1);
        self
    }
}

// ─── Framebuffers & Buffers ──────────────────────────────────────────────────

/// Attachment set of an offscreen framebuffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FramebufferDesc {
    pub color: SmallVec<[TextureHandle; 4]>,
    pub depth: Option<TextureHandle>,
}

impl FramebufferDesc {
    #[must_use]
    pub fn color(texture: TextureHandle) -> Self {
        Self {
            color: SmallVec::from_slice(&[texture]),
            depth: None,
        }
    }

    #[must_use]
    pub fn with_depth(mut self, depth: TextureHandle) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Every texture this framebuffer writes.
    pub fn attachments(&self) -> impl Iterator<Item = TextureHandle> + '_ {
        self.color.iter().copied().chain(self.depth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

// ─── Render State ────────────────────────────────────────────────────────────

/// Values a pass clears its target to before drawing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClearValues {
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
}

impl ClearValues {
    #[must_use]
    pub fn color(rgba: [f32; 4]) -> Self {
        Self {
            color: Some(rgba),
            depth: None,
        }
    }

    #[must_use]
    pub fn with_depth(mut self, depth: f32) -> Self {
        self.depth = Some(depth);
        self
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.color.is_none() && self.depth.is_none()
    }
}

// Clear values take part in resource keys; compare them bitwise.
impl Eq for ClearValues {}

impl Hash for ClearValues {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.color.map(|c| c.map(f32::to_bits)).hash(state);
        self.depth.map(f32::to_bits).hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    #[must_use]
    pub fn size(&self) -> Extent {
        Extent::new(self.width, self.height)
    }
}

/// Width/height pair used by size resolvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Scales both sides, never going below one texel.
    #[must_use]
    pub fn scaled(self, factor: f32) -> Self {
        Self {
            width: ((self.width as f32 * factor).round() as u32).max(1),
            height: ((self.height as f32 * factor).round() as u32).max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub compare: wgpu::CompareFunction,
}

impl DepthState {
    pub const DISABLED: Self = Self {
        test: false,
        write: false,
        compare: wgpu::CompareFunction::Always,
    };

    pub const LESS_EQUAL: Self = Self {
        test: true,
        write: true,
        compare: wgpu::CompareFunction::LessEqual,
    };
}

impl Default for DepthState {
    fn default() -> Self {
        Self::DISABLED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CullState {
    pub enabled: bool,
    pub face: wgpu::Face,
}

impl CullState {
    pub const DISABLED: Self = Self {
        enabled: false,
        face: wgpu::Face::Back,
    };

    pub const BACK: Self = Self {
        enabled: true,
        face: wgpu::Face::Back,
    };
}

impl Default for CullState {
    fn default() -> Self {
        Self::DISABLED
    }
}

// ─── Programs & Draws ────────────────────────────────────────────────────────

/// Type of an active uniform as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
    FloatArray,
    Sampler2D,
    SamplerCube,
}

impl UniformKind {
    #[inline]
    #[must_use]
    pub fn is_sampler(self) -> bool {
        matches!(self, UniformKind::Sampler2D | UniformKind::SamplerCube)
    }
}

/// One active uniform of a linked program.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniformInfo {
    pub name: String,
    pub kind: UniformKind,
}

/// Result of a successful program link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramInfo {
    pub handle: ProgramHandle,
    pub label: String,
    pub uniforms: Vec<UniformInfo>,
}

impl ProgramInfo {
    #[must_use]
    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.iter().find(|u| u.name == name)
    }
}

/// Geometry part of a draw. Full-screen passes use three vertices and no
/// buffers (the vertex shader derives positions from the vertex index).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DrawCall {
    pub topology: wgpu::PrimitiveTopology,
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub vertex_buffers: SmallVec<[super::BufferHandle; 4]>,
    pub index_buffer: Option<super::BufferHandle>,
}

impl DrawCall {
    /// Single full-screen triangle.
    #[must_use]
    pub fn fullscreen_triangle() -> Self {
        Self {
            topology: wgpu::PrimitiveTopology::TriangleList,
            vertex_count: 3,
            instance_count: 1,
            first_vertex: 0,
            vertex_buffers: SmallVec::new(),
            index_buffer: None,
        }
    }

    #[must_use]
    pub fn triangles(vertex_count: u32) -> Self {
        Self {
            vertex_count,
            ..Self::fullscreen_triangle()
        }
    }

    #[must_use]
    pub fn with_instances(mut self, count: u32) -> Self {
        self.instance_count = count;
        self
    }
}
