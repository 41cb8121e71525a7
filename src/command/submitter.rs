//! State-Diffing Command Queue
//!
//! Thin layer over the [`GpuBackend`] binding calls. It keeps two views of
//! the pipeline state:
//!
//! - the **intended** state, built from the stack of open scopes;
//! - the **applied** state, i.e. what the backend was last told.
//!
//! Scopes only change the intended state. Right before a clear or a draw,
//! every category whose intended value differs from the applied one is
//! sent to the backend; everything else is skipped. Closing a scope restores
//! the intended values it replaced, so the next draw of the parent sees the
//! parent's state again, yet nothing is issued for a scope that never drew.
//!
//! # Uniforms
//!
//! Uniform bookkeeping is kept per program handle:
//!
//! - scalar / vector / matrix values are compared bit-for-bit against the
//!   last value uploaded to that program under that name;
//! - sampler uniforms get a texture unit assigned once per program; the
//!   texture is bound only when the unit holds a different handle, and the
//!   unit index is uploaded only the first time.
//!
//! A uniform the program declares but no open scope provides is an error in
//! strict mode ([`FrameError::MissingUniform`]); otherwise it is skipped and
//! logged once.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use super::types::{Command, CommandKind, StateOverrides};
use super::uniform::{UniformMap, UniformValue};
use crate::backend::{
    ClearValues, CullState, DepthState, GpuBackend, ProgramHandle, RenderTarget, TextureHandle,
    Viewport,
};
use crate::errors::{FrameError, Result};
use crate::pipeline::ProgramRef;
use crate::settings::FrameSettings;
use crate::utils::interner::{self, Symbol};

/// Counters of one frame (reset by [`CommandQueue::begin_frame`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitStats {
    pub commands: u32,
    pub draws: u32,
    pub clears: u32,
    /// Fixed-function / binding calls issued.
    pub state_calls: u32,
    /// Fixed-function / binding calls skipped because nothing changed.
    pub state_skips: u32,
    pub uniform_sets: u32,
    pub uniform_skips: u32,
    pub texture_binds: u32,
    pub texture_skips: u32,
}

/// Intended values of every fixed-function category.
#[derive(Debug, Clone, Default)]
struct FixedState {
    target: RenderTarget,
    program: Option<ProgramRef>,
    viewport: Option<Viewport>,
    depth: DepthState,
    cull: CullState,
    color_mask: Option<wgpu::ColorWrites>,
    blend: Option<wgpu::BlendState>,
}

impl FixedState {
    fn apply(&mut self, overrides: &StateOverrides) {
        if let Some(target) = overrides.target {
            self.target = target;
        }
        if let Some(program) = &overrides.program {
            self.program = Some(program.clone());
        }
        if let Some(viewport) = overrides.viewport {
            self.viewport = Some(viewport);
        }
        if let Some(depth) = overrides.depth {
            self.depth = depth;
        }
        if let Some(cull) = overrides.cull {
            self.cull = cull;
        }
        if let Some(mask) = overrides.color_mask {
            self.color_mask = Some(mask);
        }
        if let Some(blend) = overrides.blend {
            self.blend = blend;
        }
    }
}

/// Last values the backend was told. `None` means unknown.
#[derive(Debug, Default)]
struct AppliedState {
    target: Option<RenderTarget>,
    program: Option<ProgramHandle>,
    viewport: Option<Viewport>,
    depth: Option<DepthState>,
    cull: Option<CullState>,
    color_mask: Option<wgpu::ColorWrites>,
    blend: Option<Option<wgpu::BlendState>>,
    units: SmallVec<[Option<TextureHandle>; 16]>,
}

#[derive(Debug, Default)]
struct ProgramBook {
    values: FxHashMap<Symbol, UniformValue>,
    units: FxHashMap<Symbol, u32>,
}

/// The command submitter.
pub struct CommandQueue {
    current: FixedState,
    saved: Vec<FixedState>,
    uniform_layers: Vec<UniformMap>,
    applied: AppliedState,
    programs: FxHashMap<ProgramHandle, ProgramBook>,
    warned: FxHashSet<(ProgramHandle, Symbol)>,
    pending: VecDeque<Command>,
    strict: bool,
    max_texture_units: u32,
    stats: SubmitStats,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(&FrameSettings::default())
    }
}

impl CommandQueue {
    #[must_use]
    pub fn new(settings: &FrameSettings) -> Self {
        Self {
            current: FixedState::default(),
            saved: Vec::new(),
            uniform_layers: Vec::new(),
            applied: AppliedState::default(),
            programs: FxHashMap::default(),
            warned: FxHashSet::default(),
            pending: VecDeque::new(),
            strict: settings.strict_uniforms,
            max_texture_units: settings.max_texture_units,
            stats: SubmitStats::default(),
        }
    }

    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Resets the per-frame counters. Open scopes at this point are a bug.
    pub fn begin_frame(&mut self) -> Result<()> {
        if !self.saved.is_empty() {
            return Err(FrameError::FrameState(format!(
                "CommandQueue: {} scopes still open at frame start",
                self.saved.len()
            )));
        }
        self.stats = SubmitStats::default();
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> SubmitStats {
        self.stats
    }

    #[must_use]
    pub fn scope_depth(&self) -> usize {
        self.saved.len()
    }

    /// Forgets everything known about the backend state, e.g. after foreign
    /// code issued binding calls behind the queue's back.
    pub fn invalidate(&mut self) {
        self.applied = AppliedState::default();
        self.programs.clear();
    }

    /// Drops the bookkeeping of a destroyed program.
    pub fn forget_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        self.warned.retain(|(p, _)| *p != program);
        if self.applied.program == Some(program) {
            self.applied.program = None;
        }
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    /// Opens a scope; must be closed with [`end_scope`](Self::end_scope).
    pub fn begin_scope(&mut self, overrides: &StateOverrides) {
        self.saved.push(self.current.clone());
        self.current.apply(overrides);
        self.uniform_layers.push(overrides.scope_uniforms());
    }

    /// Closes the innermost scope, restoring the state it replaced.
    ///
    /// A program restored to "none" leaves the bound program in place.
    pub fn end_scope(&mut self) -> Result<()> {
        let previous = self.saved.pop().ok_or_else(|| {
            FrameError::FrameState("CommandQueue: end_scope without begin_scope".into())
        })?;
        self.uniform_layers.pop();
        self.current = previous;
        Ok(())
    }

    /// Runs `f` inside a scope, closing it even when `f` fails.
    pub fn with_scope<R>(
        &mut self,
        backend: &mut dyn GpuBackend,
        overrides: &StateOverrides,
        f: impl FnOnce(&mut CommandQueue, &mut dyn GpuBackend) -> Result<R>,
    ) -> Result<R> {
        self.begin_scope(overrides);
        let result = f(self, backend);
        self.end_scope()?;
        result
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Executes `command` immediately.
    pub fn submit(&mut self, backend: &mut dyn GpuBackend, command: &Command) -> Result<()> {
        self.submit_with(backend, command, None)
    }

    /// Executes `command` with `overrides` merged over its own state.
    pub fn submit_with(
        &mut self,
        backend: &mut dyn GpuBackend,
        command: &Command,
        overrides: Option<&StateOverrides>,
    ) -> Result<()> {
        let merged;
        let state = match overrides {
            Some(extra) => {
                let mut state = command.state.clone();
                state.merge(extra);
                merged = state;
                &merged
            }
            None => &command.state,
        };

        self.stats.commands += 1;
        self.begin_scope(state);
        let result = self.execute(backend, command);
        self.end_scope()?;
        result
    }

    fn execute(&mut self, backend: &mut dyn GpuBackend, command: &Command) -> Result<()> {
        match command.kind {
            CommandKind::Clear => {
                let values = command
                    .state
                    .clear
                    .filter(|values| !values.is_empty())
                    .ok_or_else(|| {
                        FrameError::config(format!(
                            "clear command '{}' names neither a color nor a depth value",
                            command.label.as_deref().unwrap_or("<unnamed>")
                        ))
                    })?;
                self.clear_now(backend, values);
            }
            CommandKind::Draw => {
                if let Some(values) = command.state.clear {
                    self.clear_now(backend, values);
                }
                if let Some(draw) = &command.draw {
                    let program = self.current.program.clone().ok_or_else(|| {
                        FrameError::config(format!(
                            "draw command '{}' has no program bound",
                            command.label.as_deref().unwrap_or("<unnamed>")
                        ))
                    })?;
                    self.sync_fixed(backend);
                    self.sync_program(backend, &program);
                    self.upload_uniforms(backend, &program)?;
                    backend.draw(draw);
                    self.stats.draws += 1;
                }
                for child in &command.children {
                    self.submit(backend, child)?;
                }
            }
        }
        Ok(())
    }

    /// Clears the current target inside the current scope.
    pub fn clear(&mut self, backend: &mut dyn GpuBackend, values: ClearValues) {
        self.clear_now(backend, values);
    }

    fn clear_now(&mut self, backend: &mut dyn GpuBackend, values: ClearValues) {
        if values.is_empty() {
            return;
        }
        if values.depth.is_some() {
            // Depth clears honor the depth write mask.
            let depth = self.current.depth;
            if !depth.write {
                self.current.depth = DepthState { write: true, ..depth };
            }
            self.sync_fixed(backend);
            self.current.depth = depth;
        } else {
            self.sync_fixed(backend);
        }
        backend.clear(values);
        self.stats.clears += 1;
    }

    /// Queues `command` for the next [`flush`](Self::flush).
    pub fn enqueue(&mut self, command: Command) {
        self.pending.push_back(command);
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Submits every queued command in order, then flushes the backend.
    ///
    /// Stops at the first failing command; the remaining ones are dropped.
    pub fn flush(&mut self, backend: &mut dyn GpuBackend) -> Result<()> {
        while let Some(command) = self.pending.pop_front() {
            if let Err(e) = self.submit(backend, &command) {
                self.pending.clear();
                return Err(e);
            }
        }
        backend.flush();
        Ok(())
    }

    // ========================================================================
    // Diffing
    // ========================================================================

    fn count(&mut self, issued: bool) {
        if issued {
            self.stats.state_calls += 1;
        } else {
            self.stats.state_skips += 1;
        }
    }

    fn sync_target(&mut self, backend: &mut dyn GpuBackend) {
        let target = self.current.target;
        let issue = self.applied.target != Some(target);
        if issue {
            backend.bind_framebuffer(target);
            self.applied.target = Some(target);
        }
        self.count(issue);
    }

    fn sync_viewport(&mut self, backend: &mut dyn GpuBackend) {
        let Some(viewport) = self.current.viewport else {
            return;
        };
        let issue = self.applied.viewport != Some(viewport);
        if issue {
            backend.set_viewport(viewport);
            self.applied.viewport = Some(viewport);
        }
        self.count(issue);
    }

    fn sync_fixed(&mut self, backend: &mut dyn GpuBackend) {
        self.sync_target(backend);
        self.sync_viewport(backend);

        let depth = self.current.depth;
        let issue = self.applied.depth != Some(depth);
        if issue {
            backend.set_depth_state(depth);
            self.applied.depth = Some(depth);
        }
        self.count(issue);

        let cull = self.current.cull;
        let issue = self.applied.cull != Some(cull);
        if issue {
            backend.set_cull_state(cull);
            self.applied.cull = Some(cull);
        }
        self.count(issue);

        let mask = self.current.color_mask.unwrap_or(wgpu::ColorWrites::ALL);
        let issue = self.applied.color_mask != Some(mask);
        if issue {
            backend.set_color_mask(mask);
            self.applied.color_mask = Some(mask);
        }
        self.count(issue);

        let blend = self.current.blend;
        let issue = self.applied.blend != Some(blend);
        if issue {
            backend.set_blend_state(blend);
            self.applied.blend = Some(blend);
        }
        self.count(issue);
    }

    fn sync_program(&mut self, backend: &mut dyn GpuBackend, program: &ProgramRef) {
        let issue = self.applied.program != Some(program.handle);
        if issue {
            backend.bind_program(program.handle);
            self.applied.program = Some(program.handle);
        }
        self.count(issue);
    }

    fn lookup_uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniform_layers
            .iter()
            .rev()
            .find_map(|layer| layer.get(name))
    }

    fn upload_uniforms(&mut self, backend: &mut dyn GpuBackend, program: &ProgramRef) -> Result<()> {
        let handle = program.handle;

        for info in &program.uniforms {
            let symbol = interner::intern(&info.name);

            let Some(value) = self.lookup_uniform(&info.name).cloned() else {
                if self.strict {
                    return Err(FrameError::MissingUniform {
                        program: program.label.clone(),
                        uniform: info.name.clone(),
                    });
                }
                if self.warned.insert((handle, symbol)) {
                    log::warn!(
                        "Uniform '{}' of program '{}' has no value; skipping",
                        info.name,
                        program.label
                    );
                }
                continue;
            };

            if !value.fits(info.kind) {
                return Err(FrameError::config(format!(
                    "uniform '{}' of program '{}' is {:?}, got {value:?}",
                    info.name, program.label, info.kind
                )));
            }

            match value {
                UniformValue::Texture(texture) => {
                    self.bind_sampler(backend, handle, symbol, &info.name, texture)?;
                }
                value => self.set_value(backend, handle, symbol, &info.name, value),
            }
        }
        Ok(())
    }

    fn set_value(
        &mut self,
        backend: &mut dyn GpuBackend,
        program: ProgramHandle,
        symbol: Symbol,
        name: &str,
        value: UniformValue,
    ) {
        let book = self.programs.entry(program).or_default();
        if book.values.get(&symbol).is_some_and(|last| last.same_as(&value)) {
            self.stats.uniform_skips += 1;
            log::trace!("skip uniform {name} (unchanged)");
            return;
        }
        backend.set_uniform(program, name, &value);
        book.values.insert(symbol, value);
        self.stats.uniform_sets += 1;
    }

    fn bind_sampler(
        &mut self,
        backend: &mut dyn GpuBackend,
        program: ProgramHandle,
        symbol: Symbol,
        name: &str,
        texture: TextureHandle,
    ) -> Result<()> {
        let book = self.programs.entry(program).or_default();
        let unit = match book.units.get(&symbol) {
            Some(unit) => *unit,
            None => {
                let unit = book.units.len() as u32;
                if unit >= self.max_texture_units {
                    return Err(FrameError::config(format!(
                        "program needs more than {} texture units (at '{name}')",
                        self.max_texture_units
                    )));
                }
                book.units.insert(symbol, unit);
                unit
            }
        };

        let slot = unit as usize;
        if self.applied.units.len() <= slot {
            self.applied.units.resize(slot + 1, None);
        }
        if self.applied.units[slot] == Some(texture) {
            self.stats.texture_skips += 1;
        } else {
            backend.bind_texture(unit, texture);
            self.applied.units[slot] = Some(texture);
            self.stats.texture_binds += 1;
        }

        self.set_value(backend, program, symbol, name, UniformValue::Int(unit as i32));
        Ok(())
    }
}
