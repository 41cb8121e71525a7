//! GPU Backend Interface
//!
//! The frame scheduler never talks to a graphics API directly. Everything it
//! needs from the GPU goes through [`GpuBackend`]: resource
//! creation/destruction, binding calls, fixed-function state, clears, draws
//! and debug-group push/pop.
//!
//! The interface is deliberately *immediate*: every call maps to one GPU
//! state change. Redundant-call elimination is not the backend's job; the
//! [`CommandQueue`](crate::command::CommandQueue) diffs against the last
//! applied state and only issues calls that change something.
//!
//! | Group | Calls |
//! |-------|-------|
//! | Resources | `create_*` / `update_*` / `destroy_*` for textures, framebuffers, buffers, programs |
//! | Binding | `bind_framebuffer`, `bind_program`, `bind_texture`, `set_uniform` |
//! | Fixed function | `set_viewport`, `set_depth_state`, `set_cull_state`, `set_color_mask`, `set_blend_state` |
//! | Work | `clear`, `draw` |
//! | Scoping | `push_debug_group`, `pop_debug_group`, `flush` |
//!
//! [`HeadlessBackend`] is an in-memory implementation used by the test-suite
//! and for dry runs of a frame.

pub mod handles;
pub mod headless;
pub mod types;

pub use handles::{BufferHandle, FramebufferHandle, ProgramHandle, RenderTarget, TextureHandle};
pub use headless::{CallCounters, GpuCall, HeadlessBackend};
pub use types::{
    BackendError, BufferDesc, ClearValues, CullState, DepthState, DrawCall, Extent,
    FramebufferDesc, ProgramInfo, TextureDesc, TextureDimension, UniformInfo, UniformKind,
    Viewport,
};

use crate::command::UniformValue;

/// Generic GPU command interface consumed by the scheduler.
pub trait GpuBackend {
    // ── Resources ───────────────────────────────────────────────────────────

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        label: Option<&str>,
    ) -> Result<TextureHandle, BackendError>;

    /// Uploads texel data into mip 0 (all faces for cube textures).
    fn update_texture(&mut self, texture: TextureHandle, data: &[u8]) -> Result<(), BackendError>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDesc,
        label: Option<&str>,
    ) -> Result<FramebufferHandle, BackendError>;

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    fn create_buffer(
        &mut self,
        desc: &BufferDesc,
        label: Option<&str>,
    ) -> Result<BufferHandle, BackendError>;

    fn update_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Compiles and links a program, reporting its active uniforms.
    fn create_program(
        &mut self,
        vertex: &str,
        fragment: &str,
        label: &str,
    ) -> Result<ProgramInfo, BackendError>;

    fn destroy_program(&mut self, program: ProgramHandle);

    // ── Binding ─────────────────────────────────────────────────────────────

    fn bind_framebuffer(&mut self, target: RenderTarget);

    fn bind_program(&mut self, program: ProgramHandle);

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle);

    /// Sets a uniform of `program`, which is the currently bound program.
    fn set_uniform(&mut self, program: ProgramHandle, name: &str, value: &UniformValue);

    // ── Fixed function ──────────────────────────────────────────────────────

    fn set_viewport(&mut self, viewport: Viewport);

    fn set_depth_state(&mut self, depth: DepthState);

    fn set_cull_state(&mut self, cull: CullState);

    fn set_color_mask(&mut self, mask: wgpu::ColorWrites);

    fn set_blend_state(&mut self, blend: Option<wgpu::BlendState>);

    // ── Work ────────────────────────────────────────────────────────────────

    fn clear(&mut self, values: ClearValues);

    fn draw(&mut self, call: &DrawCall);

    // ── Scoping ─────────────────────────────────────────────────────────────

    fn push_debug_group(&mut self, _label: &str) {}

    fn pop_debug_group(&mut self) {}

    /// Submits whatever the backend batched so far.
    fn flush(&mut self) {}
}
