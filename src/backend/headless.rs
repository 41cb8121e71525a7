//! Headless Backend
//!
//! An in-memory [`GpuBackend`] that keeps resource tables, counts every call
//! and optionally records a call log. It is the mocked binding API of the
//! test-suite and can be used to dry-run a frame without a GPU.
//!
//! # Program reflection
//!
//! `create_program` runs a minimal preprocessor over both stages
//! (`#define`, `#undef`, `#ifdef`, `#ifndef`, `#if`, `#elif`, `#else`,
//! `#endif`, `#error`) and collects `uniform <type> <name>;` declarations
//! from the active lines. An active `#error` or a missing `main` entry point
//! fails the link, which is how tests exercise compilation failures.
//!
//! # Failure injection
//!
//! - [`HeadlessBackend::fail_next_allocations`]: the next `n` texture /
//!   framebuffer / buffer creations return an error.
//! - [`HeadlessBackend::set_texture_budget`]: creation fails once the number
//!   of live textures reaches the budget.

use rustc_hash::{FxHashMap, FxHashSet};

use super::handles::{BufferHandle, FramebufferHandle, ProgramHandle, RenderTarget, TextureHandle};
use super::types::{
    BackendError, BufferDesc, ClearValues, CullState, DepthState, DrawCall, FramebufferDesc,
    ProgramInfo, TextureDesc, UniformInfo, UniformKind, Viewport,
};
use super::GpuBackend;
use crate::command::UniformValue;

/// Number of calls per category since the last [`HeadlessBackend::reset_counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounters {
    pub textures_created: u32,
    pub textures_destroyed: u32,
    pub texture_updates: u32,
    pub framebuffers_created: u32,
    pub framebuffers_destroyed: u32,
    pub buffers_created: u32,
    pub buffers_destroyed: u32,
    pub buffer_updates: u32,
    pub compile_attempts: u32,
    pub programs_created: u32,
    pub programs_destroyed: u32,
    pub framebuffer_binds: u32,
    pub program_binds: u32,
    pub texture_binds: u32,
    pub uniform_sets: u32,
    pub viewport_sets: u32,
    pub depth_sets: u32,
    pub cull_sets: u32,
    pub color_mask_sets: u32,
    pub blend_sets: u32,
    pub clears: u32,
    pub draws: u32,
    pub flushes: u32,
}

impl CallCounters {
    /// Total number of state-changing binding calls (everything except
    /// resource management, clears and draws).
    #[must_use]
    pub fn state_calls(&self) -> u32 {
        self.framebuffer_binds
            + self.program_binds
            + self.texture_binds
            + self.uniform_sets
            + self.viewport_sets
            + self.depth_sets
            + self.cull_sets
            + self.color_mask_sets
            + self.blend_sets
    }
}

/// One recorded backend call (only when recording is enabled).
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCall {
    BindFramebuffer(RenderTarget),
    BindProgram(ProgramHandle),
    BindTexture { unit: u32, texture: TextureHandle },
    SetUniform { program: ProgramHandle, name: String, value: UniformValue },
    SetViewport(Viewport),
    SetDepthState(DepthState),
    SetCullState(CullState),
    SetColorMask(wgpu::ColorWrites),
    SetBlendState(Option<wgpu::BlendState>),
    Clear { target: RenderTarget, values: ClearValues },
    Draw { target: RenderTarget, program: Option<ProgramHandle>, vertex_count: u32 },
    PushDebugGroup(String),
    PopDebugGroup,
    Flush,
}

#[derive(Debug, Clone)]
struct TextureEntry {
    desc: TextureDesc,
    label: Option<String>,
}

/// In-memory GPU backend.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u64,
    textures: FxHashMap<TextureHandle, TextureEntry>,
    framebuffers: FxHashMap<FramebufferHandle, FramebufferDesc>,
    buffers: FxHashMap<BufferHandle, BufferDesc>,
    programs: FxHashMap<ProgramHandle, ProgramInfo>,

    counters: CallCounters,
    record_calls: bool,
    calls: Vec<GpuCall>,

    fail_allocations: u32,
    texture_budget: Option<usize>,

    bound_target: RenderTarget,
    bound_program: Option<ProgramHandle>,
    debug_depth: u32,
}

impl HeadlessBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that also keeps an ordered log of every binding call.
    #[must_use]
    pub fn recording() -> Self {
        Self {
            record_calls: true,
            ..Self::default()
        }
    }

    // ── Introspection ───────────────────────────────────────────────────────

    #[must_use]
    pub fn counters(&self) -> CallCounters {
        self.counters
    }

    pub fn reset_counters(&mut self) {
        self.counters = CallCounters::default();
    }

    #[must_use]
    pub fn calls(&self) -> &[GpuCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<GpuCall> {
        std::mem::take(&mut self.calls)
    }

    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn is_live_texture(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture)
    }

    #[must_use]
    pub fn texture_desc(&self, texture: TextureHandle) -> Option<&TextureDesc> {
        self.textures.get(&texture).map(|t| &t.desc)
    }

    #[must_use]
    pub fn texture_label(&self, texture: TextureHandle) -> Option<&str> {
        self.textures.get(&texture).and_then(|t| t.label.as_deref())
    }

    #[must_use]
    pub fn framebuffer_desc(&self, framebuffer: FramebufferHandle) -> Option<&FramebufferDesc> {
        self.framebuffers.get(&framebuffer)
    }

    #[must_use]
    pub fn program_info(&self, program: ProgramHandle) -> Option<&ProgramInfo> {
        self.programs.get(&program)
    }

    /// Depth of unbalanced debug groups; zero after a well-formed frame.
    #[must_use]
    pub fn debug_group_depth(&self) -> u32 {
        self.debug_depth
    }

    // ── Failure injection ───────────────────────────────────────────────────

    /// Makes the next `count` resource allocations fail.
    pub fn fail_next_allocations(&mut self, count: u32) {
        self.fail_allocations = count;
    }

    /// Caps the number of live textures.
    pub fn set_texture_budget(&mut self, budget: Option<usize>) {
        self.texture_budget = budget;
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn next_raw(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_allocation(&mut self, what: &str) -> Result<(), BackendError> {
        if self.fail_allocations > 0 {
            self.fail_allocations -= 1;
            return Err(BackendError::new(format!("out of memory allocating {what}")));
        }
        Ok(())
    }

    fn record(&mut self, call: GpuCall) {
        if self.record_calls {
            self.calls.push(call);
        }
    }
}

impl GpuBackend for HeadlessBackend {
    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        label: Option<&str>,
    ) -> Result<TextureHandle, BackendError> {
        self.check_allocation("texture")?;
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::new(format!(
                "invalid texture size {}x{}",
                desc.width, desc.height
            )));
        }
        if let Some(budget) = self.texture_budget
            && self.textures.len() >= budget
        {
            return Err(BackendError::new(format!(
                "texture budget of {budget} exhausted"
            )));
        }
        let handle = TextureHandle::from_raw(self.next_raw());
        self.textures.insert(
            handle,
            TextureEntry {
                desc: *desc,
                label: label.map(str::to_owned),
            },
        );
        self.counters.textures_created += 1;
        Ok(handle)
    }

    fn update_texture(&mut self, texture: TextureHandle, _data: &[u8]) -> Result<(), BackendError> {
        if !self.textures.contains_key(&texture) {
            return Err(BackendError::new(format!("{texture} is not live")));
        }
        self.counters.texture_updates += 1;
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture).is_some() {
            self.counters.textures_destroyed += 1;
        }
    }

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDesc,
        _label: Option<&str>,
    ) -> Result<FramebufferHandle, BackendError> {
        self.check_allocation("framebuffer")?;
        if let Some(missing) = desc.attachments().find(|t| !self.textures.contains_key(t)) {
            return Err(BackendError::new(format!(
                "framebuffer attachment {missing} is not live"
            )));
        }
        let handle = FramebufferHandle::from_raw(self.next_raw());
        self.framebuffers.insert(handle, desc.clone());
        self.counters.framebuffers_created += 1;
        Ok(handle)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.framebuffers.remove(&framebuffer).is_some() {
            self.counters.framebuffers_destroyed += 1;
        }
    }

    fn create_buffer(
        &mut self,
        desc: &BufferDesc,
        _label: Option<&str>,
    ) -> Result<BufferHandle, BackendError> {
        self.check_allocation("buffer")?;
        let handle = BufferHandle::from_raw(self.next_raw());
        self.buffers.insert(handle, *desc);
        self.counters.buffers_created += 1;
        Ok(handle)
    }

    fn update_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let desc = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| BackendError::new(format!("{buffer} is not live")))?;
        if offset + data.len() as u64 > desc.size {
            return Err(BackendError::new(format!(
                "write of {} bytes at {offset} overflows {buffer} ({} bytes)",
                data.len(),
                desc.size
            )));
        }
        self.counters.buffer_updates += 1;
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_some() {
            self.counters.buffers_destroyed += 1;
        }
    }

    fn create_program(
        &mut self,
        vertex: &str,
        fragment: &str,
        label: &str,
    ) -> Result<ProgramInfo, BackendError> {
        self.counters.compile_attempts += 1;

        let mut uniforms: Vec<UniformInfo> = Vec::new();
        for (stage, source) in [("vertex", vertex), ("fragment", fragment)] {
            let reflected = reflect_stage(source)
                .map_err(|e| BackendError::new(format!("{label} ({stage}): {e}")))?;
            for info in reflected {
                if !uniforms.iter().any(|u| u.name == info.name) {
                    uniforms.push(info);
                }
            }
        }

        let handle = ProgramHandle::from_raw(self.next_raw());
        let info = ProgramInfo {
            handle,
            label: label.to_owned(),
            uniforms,
        };
        self.programs.insert(handle, info.clone());
        self.counters.programs_created += 1;
        Ok(info)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program).is_some() {
            self.counters.programs_destroyed += 1;
            if self.bound_program == Some(program) {
                self.bound_program = None;
            }
        }
    }

    fn bind_framebuffer(&mut self, target: RenderTarget) {
        self.counters.framebuffer_binds += 1;
        self.bound_target = target;
        self.record(GpuCall::BindFramebuffer(target));
    }

    fn bind_program(&mut self, program: ProgramHandle) {
        self.counters.program_binds += 1;
        self.bound_program = Some(program);
        self.record(GpuCall::BindProgram(program));
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.counters.texture_binds += 1;
        self.record(GpuCall::BindTexture { unit, texture });
    }

    fn set_uniform(&mut self, program: ProgramHandle, name: &str, value: &UniformValue) {
        self.counters.uniform_sets += 1;
        self.record(GpuCall::SetUniform {
            program,
            name: name.to_owned(),
            value: value.clone(),
        });
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.counters.viewport_sets += 1;
        self.record(GpuCall::SetViewport(viewport));
    }

    fn set_depth_state(&mut self, depth: DepthState) {
        self.counters.depth_sets += 1;
        self.record(GpuCall::SetDepthState(depth));
    }

    fn set_cull_state(&mut self, cull: CullState) {
        self.counters.cull_sets += 1;
        self.record(GpuCall::SetCullState(cull));
    }

    fn set_color_mask(&mut self, mask: wgpu::ColorWrites) {
        self.counters.color_mask_sets += 1;
        self.record(GpuCall::SetColorMask(mask));
    }

    fn set_blend_state(&mut self, blend: Option<wgpu::BlendState>) {
        self.counters.blend_sets += 1;
        self.record(GpuCall::SetBlendState(blend));
    }

    fn clear(&mut self, values: ClearValues) {
        self.counters.clears += 1;
        self.record(GpuCall::Clear {
            target: self.bound_target,
            values,
        });
    }

    fn draw(&mut self, call: &DrawCall) {
        self.counters.draws += 1;
        self.record(GpuCall::Draw {
            target: self.bound_target,
            program: self.bound_program,
            vertex_count: call.vertex_count,
        });
    }

    fn push_debug_group(&mut self, label: &str) {
        self.debug_depth += 1;
        self.record(GpuCall::PushDebugGroup(label.to_owned()));
    }

    fn pop_debug_group(&mut self) {
        self.debug_depth = self.debug_depth.saturating_sub(1);
        self.record(GpuCall::PopDebugGroup);
    }

    fn flush(&mut self) {
        self.counters.flushes += 1;
        self.record(GpuCall::Flush);
    }
}

// ─── Reflection ──────────────────────────────────────────────────────────────

struct Conditional {
    /// Whether the enclosing region is active.
    parent_active: bool,
    /// Whether any branch of this conditional has been taken.
    taken: bool,
    active: bool,
}

fn eval_condition(expr: &str, defines: &FxHashSet<String>) -> bool {
    let expr = expr.trim();
    if let Some(rest) = expr.strip_prefix('!') {
        return !eval_condition(rest, defines);
    }
    if let Some(inner) = expr
        .strip_prefix("defined")
        .map(|r| r.trim().trim_start_matches('(').trim_end_matches(')').trim())
    {
        return defines.contains(inner);
    }
    match expr.parse::<i64>() {
        Ok(v) => v != 0,
        // Anything more elaborate is treated as taken.
        Err(_) => true,
    }
}

/// Runs the minimal preprocessor and returns the uniforms declared on active lines.
fn reflect_stage(source: &str) -> Result<Vec<UniformInfo>, String> {
    let mut defines: FxHashSet<String> = FxHashSet::default();
    let mut stack: Vec<Conditional> = Vec::new();
    let mut uniforms = Vec::new();
    let mut has_main = false;

    for (line_no, raw) in source.lines().enumerate() {
        let line = raw.trim();
        let active = stack.last().is_none_or(|c| c.active);

        if let Some(directive) = line.strip_prefix('#') {
            let directive = directive.trim_start();
            let (keyword, rest) = directive
                .split_once(char::is_whitespace)
                .unwrap_or((directive, ""));
            let rest = rest.trim();
            match keyword {
                "define" if active => {
                    if let Some(name) = rest.split_whitespace().next() {
                        defines.insert(name.to_owned());
                    }
                }
                "undef" if active => {
                    defines.remove(rest);
                }
                "ifdef" | "ifndef" | "if" => {
                    let cond = match keyword {
                        "ifdef" => defines.contains(rest),
                        "ifndef" => !defines.contains(rest),
                        _ => eval_condition(rest, &defines),
                    };
                    stack.push(Conditional {
                        parent_active: active,
                        taken: cond,
                        active: active && cond,
                    });
                }
                "elif" => {
                    let top = stack
                        .last_mut()
                        .ok_or_else(|| format!("line {}: #elif without #if", line_no + 1))?;
                    let cond = !top.taken && eval_condition(rest, &defines);
                    top.taken |= cond;
                    top.active = top.parent_active && cond;
                }
                "else" => {
                    let top = stack
                        .last_mut()
                        .ok_or_else(|| format!("line {}: #else without #if", line_no + 1))?;
                    top.active = top.parent_active && !top.taken;
                    top.taken = true;
                }
                "endif" => {
                    stack
                        .pop()
                        .ok_or_else(|| format!("line {}: #endif without #if", line_no + 1))?;
                }
                "error" if active => {
                    return Err(format!("line {}: #error {rest}", line_no + 1));
                }
                _ => {}
            }
            continue;
        }

        if !active {
            continue;
        }

        if line.contains("void main") {
            has_main = true;
        }

        if let Some(decl) = line.strip_prefix("uniform ") {
            parse_uniform_decl(decl, &mut uniforms)
                .map_err(|e| format!("line {}: {e}", line_no + 1))?;
        }
    }

    if !stack.is_empty() {
        return Err("unterminated #if block".to_owned());
    }
    if !has_main {
        return Err("missing entry point 'main'".to_owned());
    }
    Ok(uniforms)
}

fn parse_uniform_decl(decl: &str, out: &mut Vec<UniformInfo>) -> Result<(), String> {
    let decl = decl.split(';').next().unwrap_or_default();
    let mut tokens = decl
        .split_whitespace()
        .filter(|t| !matches!(*t, "lowp" | "mediump" | "highp"));
    let ty = tokens.next().ok_or("uniform without type")?;
    let names: String = tokens.collect::<Vec<_>>().join(" ");

    for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let (name, is_array) = match name.split_once('[') {
            Some((base, _)) => (base.trim(), true),
            None => (name, false),
        };
        let kind = match (ty, is_array) {
            ("float", true) => UniformKind::FloatArray,
            ("float", false) => UniformKind::Float,
            ("int", _) => UniformKind::Int,
            ("bool", _) => UniformKind::Bool,
            ("vec2", _) => UniformKind::Vec2,
            ("vec3", _) => UniformKind::Vec3,
            ("vec4", _) => UniformKind::Vec4,
            ("mat3", _) => UniformKind::Mat3,
            ("mat4", _) => UniformKind::Mat4,
            ("sampler2D", _) => UniformKind::Sampler2D,
            ("samplerCube", _) => UniformKind::SamplerCube,
            (other, _) => return Err(format!("unsupported uniform type '{other}'")),
        };
        out.push(UniformInfo {
            name: name.to_owned(),
            kind,
        });
    }
    Ok(())
}
