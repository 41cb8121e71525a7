//! Command records and state overrides.

use std::fmt;
use std::str::FromStr;

use glam::Mat4;

use super::uniform::{UniformMap, UniformValue};
use crate::backend::{ClearValues, CullState, DepthState, DrawCall, RenderTarget, Viewport};
use crate::errors::{FrameError, Result};
use crate::pipeline::{ProgramRef, ResolvedPipeline};

pub const PROJECTION_MATRIX: &str = "uProjectionMatrix";
pub const VIEW_MATRIX: &str = "uViewMatrix";
pub const MODEL_MATRIX: &str = "uModelMatrix";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Optional clear, optional draw, then children.
    Draw,
    /// Clears the target; never draws.
    Clear,
}

impl FromStr for CommandKind {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draw" => Ok(CommandKind::Draw),
            "clear" => Ok(CommandKind::Clear),
            other => Err(FrameError::config(format!("unknown command type '{other}'"))),
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommandKind::Draw => "draw",
            CommandKind::Clear => "clear",
        })
    }
}

/// Scoped state a command (or a caller-opened scope) pushes.
///
/// Every field is optional: `None` inherits the enclosing scope. `blend`
/// is doubly optional because "disable blending" is itself a value.
#[derive(Debug, Clone, Default)]
pub struct StateOverrides {
    pub target: Option<RenderTarget>,
    pub clear: Option<ClearValues>,
    pub program: Option<ProgramRef>,
    pub uniforms: UniformMap,
    pub projection: Option<Mat4>,
    pub view: Option<Mat4>,
    pub model: Option<Mat4>,
    pub viewport: Option<Viewport>,
    pub depth: Option<DepthState>,
    pub cull: Option<CullState>,
    pub color_mask: Option<wgpu::ColorWrites>,
    pub blend: Option<Option<wgpu::BlendState>>,
}

impl StateOverrides {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides carrying a resolved pipeline: program, fixed-function props
    /// and the uniform side table.
    #[must_use]
    pub fn from_pipeline(pipeline: &ResolvedPipeline) -> Self {
        Self {
            program: Some(pipeline.program.clone()),
            uniforms: pipeline.uniforms.clone(),
            depth: Some(pipeline.props.depth),
            cull: Some(pipeline.props.cull),
            color_mask: Some(pipeline.props.color_mask),
            blend: Some(pipeline.props.blend),
            ..Self::default()
        }
    }

    /// Layers `other` on top of `self`: set fields of `other` win, uniforms merge.
    pub fn merge(&mut self, other: &StateOverrides) {
        fn take<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
            if src.is_some() {
                dst.clone_from(src);
            }
        }

        take(&mut self.target, &other.target);
        take(&mut self.clear, &other.clear);
        take(&mut self.program, &other.program);
        take(&mut self.projection, &other.projection);
        take(&mut self.view, &other.view);
        take(&mut self.model, &other.model);
        take(&mut self.viewport, &other.viewport);
        take(&mut self.depth, &other.depth);
        take(&mut self.cull, &other.cull);
        take(&mut self.color_mask, &other.color_mask);
        take(&mut self.blend, &other.blend);
        for (name, value) in &other.uniforms {
            self.uniforms.insert(name.clone(), value.clone());
        }
    }

    /// Uniforms of this scope with the matrices folded in under their names.
    pub(crate) fn scope_uniforms(&self) -> UniformMap {
        let mut uniforms = self.uniforms.clone();
        for (name, matrix) in [
            (PROJECTION_MATRIX, self.projection),
            (VIEW_MATRIX, self.view),
            (MODEL_MATRIX, self.model),
        ] {
            if let Some(m) = matrix {
                uniforms.insert(name.to_owned(), UniformValue::Mat4(m));
            }
        }
        uniforms
    }

    #[must_use]
    pub fn with_target(mut self, target: RenderTarget) -> Self {
        self.target = Some(target);
        self
    }

    #[must_use]
    pub fn with_clear(mut self, clear: ClearValues) -> Self {
        self.clear = Some(clear);
        self
    }

    #[must_use]
    pub fn with_program(mut self, program: ProgramRef) -> Self {
        self.program = Some(program);
        self
    }

    #[must_use]
    pub fn with_uniform(mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.uniforms.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_matrices(mut self, projection: Mat4, view: Mat4, model: Mat4) -> Self {
        self.projection = Some(projection);
        self.view = Some(view);
        self.model = Some(model);
        self
    }

    #[must_use]
    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    #[must_use]
    pub fn with_depth(mut self, depth: DepthState) -> Self {
        self.depth = Some(depth);
        self
    }

    #[must_use]
    pub fn with_cull(mut self, cull: CullState) -> Self {
        self.cull = Some(cull);
        self
    }

    #[must_use]
    pub fn with_color_mask(mut self, mask: wgpu::ColorWrites) -> Self {
        self.color_mask = Some(mask);
        self
    }

    #[must_use]
    pub fn with_blend(mut self, blend: Option<wgpu::BlendState>) -> Self {
        self.blend = Some(blend);
        self
    }
}

/// One unit of submitted GPU work.
#[derive(Debug, Clone)]
pub struct Command {
    pub kind: CommandKind,
    pub label: Option<String>,
    pub state: StateOverrides,
    pub draw: Option<DrawCall>,
    pub children: Vec<Command>,
}

impl Command {
    #[must_use]
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            label: None,
            state: StateOverrides::default(),
            draw: None,
            children: Vec::new(),
        }
    }

    /// Builds a command from its textual kind (`"draw"`, `"clear"`).
    pub fn parse(kind: &str) -> Result<Self> {
        Ok(Self::new(kind.parse()?))
    }

    #[must_use]
    pub fn draw(draw: DrawCall) -> Self {
        Self {
            draw: Some(draw),
            ..Self::new(CommandKind::Draw)
        }
    }

    /// Draw command without geometry; used as a pure state scope for children.
    #[must_use]
    pub fn scope(state: StateOverrides) -> Self {
        Self {
            state,
            ..Self::new(CommandKind::Draw)
        }
    }

    #[must_use]
    pub fn clear(values: ClearValues) -> Self {
        let mut cmd = Self::new(CommandKind::Clear);
        cmd.state.clear = Some(values);
        cmd
    }

    /// Full-screen triangle drawn with a resolved pipeline.
    #[must_use]
    pub fn fullscreen(pipeline: &ResolvedPipeline) -> Self {
        Self {
            state: StateOverrides::from_pipeline(pipeline),
            ..Self::draw(DrawCall::fullscreen_triangle())
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: &StateOverrides) -> Self {
        self.state.merge(state);
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: RenderTarget) -> Self {
        self.state.target = Some(target);
        self
    }

    #[must_use]
    pub fn with_uniform(mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.state.uniforms.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: Command) -> Self {
        self.children.push(child);
        self
    }
}
