//! Per-frame execution of a [`PostGraph`].
//!
//! [`PostProcessing::record`] walks the built graph once per frame and, for
//! every stage of every enabled group:
//!
//! 1. resolves the source and extra inputs to textures (falling back to the
//!    working color when a referenced stage produced nothing this frame),
//! 2. resolves or allocates the target through the [`ResourceCache`],
//! 3. resolves the program variant through the [`PipelineCache`],
//! 4. records a [`RenderGraph`] pass wrapping one full-screen [`Command`].
//!
//! Nothing is drawn here; the passes run at `RenderGraph::end_frame`.

use std::sync::Arc;

use glam::Vec2;
use rustc_hash::FxHashMap;

use super::effect::{FrameInput, SharedTexture};
use super::graph::{
    PostGraph, ResolutionWarning, Stage, StageId, StageInput, StageTarget, WarningKind,
};
use crate::backend::{
    BackendError, Extent, GpuBackend, RenderTarget, TextureHandle, UniformKind, Viewport,
};
use crate::command::{Command, UniformMap, UniformValue};
use crate::errors::{FrameError, Result};
use crate::graph::{RenderGraph, RenderPassDesc};
use crate::pipeline::{PipelineCache, ShaderSource};
use crate::resources::{PassDesc, PassTarget, ResourceCache, ResourceDescriptor, UsageClass};
use crate::state::{StatePath, StateSnapshot, StateValue};

pub const VIEWPORT_SIZE: &str = "uViewportSize";
pub const TEXEL_SIZE: &str = "uTexelSize";
pub const TIME: &str = "uTime";
pub const SOURCE_TEXTURE: &str = "uTexture";

/// What the frame hands to the post chain.
#[derive(Debug, Clone, Copy)]
pub struct PostFrame<'a> {
    pub viewport: Viewport,
    pub color: TextureHandle,
    pub depth: Option<TextureHandle>,
    /// Where `"screen"` targets render.
    pub output: RenderTarget,
    pub state: &'a StateSnapshot,
    /// Seconds, forwarded as `uTime`.
    pub time: f32,
}

impl<'a> PostFrame<'a> {
    #[must_use]
    pub fn new(viewport: Viewport, color: TextureHandle, state: &'a StateSnapshot) -> Self {
        Self {
            viewport,
            color,
            depth: None,
            output: RenderTarget::Screen,
            state,
            time: 0.0,
        }
    }

    #[must_use]
    pub fn with_depth(mut self, depth: TextureHandle) -> Self {
        self.depth = Some(depth);
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: RenderTarget) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_time(mut self, time: f32) -> Self {
        self.time = time;
        self
    }
}

/// Where one stage rendered this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutput {
    /// Color attachment, `None` for the screen.
    pub color: Option<TextureHandle>,
    pub target: RenderTarget,
    pub pass: Option<PassTarget>,
    pub size: Extent,
    /// Index of the recorded render-graph pass.
    pub graph_index: usize,
}

/// Result of one [`PostProcessing::record`] call.
#[derive(Debug, Clone, Default)]
pub struct PostReport {
    outputs: Vec<Option<StageOutput>>,
    /// Groups whose enable predicate was false.
    pub skipped: Vec<String>,
    /// References that fell back this frame.
    pub warnings: Vec<ResolutionWarning>,
    /// Working color after the last stage.
    pub working: Option<TextureHandle>,
}

impl PostReport {
    #[must_use]
    pub fn output(&self, id: StageId) -> Option<&StageOutput> {
        self.outputs.get(id.index()).and_then(Option::as_ref)
    }

    /// Number of passes recorded into the render graph.
    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.outputs.iter().flatten().count()
    }
}

/// A built post graph plus the per-instance state it needs across frames.
pub struct PostProcessing {
    graph: PostGraph,
    vertex: ShaderSource,
    /// Shared textures this instance holds a reference on.
    shared: FxHashMap<Arc<str>, TextureHandle>,
}

impl PostProcessing {
    /// Uses the embedded full-screen triangle vertex shader.
    pub fn new(graph: PostGraph) -> Result<Self> {
        Ok(Self::with_vertex(
            graph,
            ShaderSource::embedded("post/fullscreen.vert")?,
        ))
    }

    #[must_use]
    pub fn with_vertex(graph: PostGraph, vertex: ShaderSource) -> Self {
        Self {
            graph,
            vertex,
            shared: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn graph(&self) -> &PostGraph {
        &self.graph
    }

    /// Number of shared textures currently held.
    #[must_use]
    pub fn shared_count(&self) -> usize {
        self.shared.len()
    }

    /// Records the passes of every enabled group into `graph`.
    ///
    /// Resolution problems degrade to fallbacks and show up in
    /// [`PostReport::warnings`]; allocation and compilation failures are
    /// returned unchanged.
    pub fn record(
        &mut self,
        backend: &mut dyn GpuBackend,
        graph: &mut RenderGraph,
        resources: &mut ResourceCache,
        pipelines: &mut PipelineCache,
        frame: &PostFrame<'_>,
    ) -> Result<PostReport> {
        graph.import(frame.color);
        if let Some(depth) = frame.depth {
            graph.import(depth);
        }

        let mut recorder = Recorder {
            backend,
            graph,
            resources,
            pipelines,
            shared: &mut self.shared,
            post: &self.graph,
            frame,
            report: PostReport {
                outputs: vec![None; self.graph.stages().len()],
                ..PostReport::default()
            },
            working: frame.color,
        };

        for group in self.graph.groups() {
            if !group.is_final && !is_enabled(group.enable.as_ref(), frame.state) {
                log::trace!("PostProcessing: '{}' disabled", group.name);
                recorder.report.skipped.push(group.name.clone());
                continue;
            }
            for stage in &self.graph.stages()[group.stages.clone()] {
                recorder.record_stage(stage, &self.vertex)?;
            }
        }

        let mut report = recorder.report;
        report.working = Some(recorder.working);
        Ok(report)
    }

    /// Drops this instance's references on shared textures.
    pub fn dispose(
        &mut self,
        backend: &mut dyn GpuBackend,
        resources: &mut ResourceCache,
    ) -> Result<()> {
        let mut first_error = None;
        for (name, _) in self.shared.drain() {
            if let Err(e) = resources.release_shared(backend, &name) {
                log::warn!("PostProcessing: releasing '{name}' failed: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn is_enabled(enable: Option<&StatePath>, state: &StateSnapshot) -> bool {
    enable.is_none_or(|path| state.get(path).is_some_and(StateValue::is_truthy))
}

/// Integer state values feed float uniforms.
fn coerce(value: UniformValue, kind: UniformKind) -> UniformValue {
    match (value, kind) {
        (UniformValue::Int(i), UniformKind::Float) => UniformValue::Float(i as f32),
        (value, _) => value,
    }
}

struct ResolvedTarget {
    render: RenderTarget,
    pass: Option<PassTarget>,
    size: Extent,
}

struct Recorder<'r, 'f> {
    backend: &'r mut dyn GpuBackend,
    graph: &'r mut RenderGraph,
    resources: &'r mut ResourceCache,
    pipelines: &'r mut PipelineCache,
    shared: &'r mut FxHashMap<Arc<str>, TextureHandle>,
    post: &'r PostGraph,
    frame: &'r PostFrame<'f>,
    report: PostReport,
    working: TextureHandle,
}

impl Recorder<'_, '_> {
    fn record_stage(&mut self, stage: &Stage, vertex: &ShaderSource) -> Result<()> {
        let source = self.input(stage, &stage.source)?;
        let mut inputs = Vec::with_capacity(stage.inputs.len());
        for (uniform, input) in &stage.inputs {
            inputs.push((uniform.as_str(), self.input(stage, input)?));
        }

        let (target, promotes) = self.target(stage)?;

        let pipeline = self.pipelines.resolve(
            &mut *self.backend,
            vertex,
            &stage.pass.fragment,
            &stage.pass.flags,
            self.frame.state,
        )?;

        let size = target.size;
        let mut offered = UniformMap::default();
        offered.insert(
            VIEWPORT_SIZE.to_owned(),
            Vec2::new(size.width as f32, size.height as f32).into(),
        );
        offered.insert(
            TEXEL_SIZE.to_owned(),
            Vec2::new(1.0 / size.width as f32, 1.0 / size.height as f32).into(),
        );
        offered.insert(TIME.to_owned(), self.frame.time.into());
        offered.insert(SOURCE_TEXTURE.to_owned(), source.into());
        for (name, value) in &stage.pass.uniforms {
            offered.insert(name.clone(), value.clone());
        }
        for (name, path) in &stage.pass.state_uniforms {
            if let Some(value) = self.frame.state.get(path).and_then(StateValue::to_uniform) {
                offered.insert(name.clone(), value);
            }
        }
        for (name, texture) in &inputs {
            offered.insert((*name).to_owned(), (*texture).into());
        }

        // Variants differ in the uniforms they declare; bind only those.
        let mut command = Command::fullscreen(&pipeline).with_label(stage.label.clone());
        for (name, value) in offered {
            match pipeline.program.uniform(&name) {
                Some(info) => {
                    let value = coerce(value, info.kind);
                    command = command.with_uniform(name, value);
                }
                None => log::trace!("PostProcessing: '{}' does not use '{name}'", stage.label),
            }
        }

        let mut desc = RenderPassDesc::new(stage.label.clone())
            .reads(source)
            .viewport(Viewport::new(size.width, size.height));
        for (_, texture) in &inputs {
            desc = desc.reads(*texture);
        }
        desc = match &target.pass {
            Some(pass) => desc.into_pass(pass),
            None => desc.target(target.render),
        };
        if let Some(clear) = stage.pass.clear {
            desc = desc.clear(clear);
        }
        let graph_index = self
            .graph
            .render_pass(desc.render(move |ctx| ctx.submit(&command)))?;

        let output = StageOutput {
            color: target.pass.map(|p| p.color),
            target: target.render,
            pass: target.pass,
            size,
            graph_index,
        };
        if promotes && let Some(color) = output.color {
            self.working = color;
        }
        self.report.outputs[stage.id.index()] = Some(output);
        Ok(())
    }

    fn input(&mut self, stage: &Stage, input: &StageInput) -> Result<TextureHandle> {
        Ok(match input {
            StageInput::Working => self.working,
            StageInput::Frame(FrameInput::Color) => self.frame.color,
            StageInput::Frame(FrameInput::Depth) => match self.frame.depth {
                Some(depth) => depth,
                None => {
                    self.fallback(stage, "depth", WarningKind::MissingInput);
                    self.working
                }
            },
            StageInput::Texture(texture) => {
                self.graph.import(*texture);
                *texture
            }
            StageInput::Shared(shared) => {
                let texture = self.shared_texture(shared)?;
                self.graph.import(texture);
                texture
            }
            StageInput::Stage(id) => match self.report.output(*id).map(|o| o.color) {
                Some(Some(color)) => color,
                Some(None) => {
                    self.fallback(stage, label_of(self.post, *id), WarningKind::NoTarget);
                    self.working
                }
                None => {
                    self.fallback(stage, label_of(self.post, *id), WarningKind::NotRun);
                    self.working
                }
            },
        })
    }

    fn target(&mut self, stage: &Stage) -> Result<(ResolvedTarget, bool)> {
        let viewport = self.frame.viewport.size();
        match stage.target {
            StageTarget::Screen => Ok((
                ResolvedTarget {
                    render: self.frame.output,
                    pass: None,
                    size: viewport,
                },
                false,
            )),
            StageTarget::Pass(pass) => Ok((pass_target(pass), false)),
            StageTarget::Auxiliary => Ok((self.allocate(stage)?, false)),
            StageTarget::Auto => Ok((self.allocate(stage)?, true)),
            StageTarget::Stage(id) => match self.report.output(id).copied() {
                Some(output) => Ok((
                    ResolvedTarget {
                        render: output.target,
                        pass: output.pass,
                        size: output.size,
                    },
                    false,
                )),
                None => {
                    self.fallback(stage, label_of(self.post, id), WarningKind::NotRun);
                    Ok((self.allocate(stage)?, true))
                }
            },
        }
    }

    fn allocate(&mut self, stage: &Stage) -> Result<ResolvedTarget> {
        let size = stage.pass.size.resolve(self.frame.viewport.size());
        let pass = self.resources.pass(
            &mut *self.backend,
            PassDesc::new(size, stage.pass.format),
            UsageClass::Transient,
        )?;
        Ok(pass_target(pass))
    }

    fn shared_texture(&mut self, shared: &SharedTexture) -> Result<TextureHandle> {
        if let Some(texture) = self.shared.get(&shared.name) {
            return Ok(*texture);
        }

        let data = Arc::clone(&shared.data);
        let resource = self.resources.acquire_shared(
            &mut *self.backend,
            &shared.name,
            &ResourceDescriptor::texture_2d(shared.desc),
            move |backend, resource| {
                let texture = resource
                    .as_texture()
                    .ok_or_else(|| BackendError::new("shared resource is not a texture"))?;
                backend.update_texture(texture, &data)
            },
        )?;
        let texture = resource
            .as_texture()
            .ok_or_else(|| FrameError::UnknownHandle(format!("shared texture '{}'", shared.name)))?;
        self.shared.insert(Arc::clone(&shared.name), texture);
        Ok(texture)
    }

    fn fallback(&mut self, stage: &Stage, reference: &str, kind: WarningKind) {
        let warning = ResolutionWarning {
            stage: stage.label.clone(),
            reference: reference.to_owned(),
            kind,
        };
        // A disabled group is routine; everything else points at a misconfiguration.
        if kind == WarningKind::NotRun {
            log::debug!("PostProcessing: {warning}; using the working color");
        } else {
            log::warn!("PostProcessing: {warning}; using the working color");
        }
        self.report.warnings.push(warning);
    }
}

fn label_of(post: &PostGraph, id: StageId) -> &str {
    post.stage(id).map_or("?", |s| s.label.as_str())
}

fn pass_target(pass: PassTarget) -> ResolvedTarget {
    ResolvedTarget {
        render: RenderTarget::Framebuffer(pass.framebuffer),
        pass: Some(pass),
        size: pass.size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::post::{EffectGroup, SubPass};

    const FRAG: &str = "uniform sampler2D uTexture;\nuniform vec2 uTexelSize;\nvoid main() {}\n";
    const VERT: &str = "void main() {}\n";

    fn post(groups: Vec<EffectGroup>) -> PostProcessing {
        PostProcessing::with_vertex(
            PostGraph::build(groups).unwrap(),
            ShaderSource::new("fullscreen.vert", VERT),
        )
    }

    fn frag() -> ShaderSource {
        ShaderSource::new("test.frag", FRAG)
    }

    #[test]
    fn test_disabled_group_skipped_final_always_runs() {
        let mut backend = HeadlessBackend::new();
        let mut graph = RenderGraph::new();
        let mut resources = ResourceCache::default();
        let mut pipelines = PipelineCache::new();
        let mut post = post(vec![
            EffectGroup::new("bloom")
                .enabled_when("post.bloom")
                .pass(SubPass::new("main", frag())),
            EffectGroup::composite("final")
                .enabled_when("post.final")
                .pass(SubPass::new("main", frag()).input("uBloom", "bloom.main").target("screen")),
        ]);

        let color = TextureHandle::from_raw(1);
        let state = StateSnapshot::new();
        let frame = PostFrame::new(Viewport::new(64, 64), color, &state);

        graph.begin_frame().unwrap();
        let report = post
            .record(&mut backend, &mut graph, &mut resources, &mut pipelines, &frame)
            .unwrap();

        assert_eq!(report.skipped, ["bloom"]);
        assert_eq!(report.pass_count(), 1);
        assert_eq!(graph.passes()[0].name(), "final.main");
        assert_eq!(graph.passes()[0].target(), RenderTarget::Screen);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].kind, WarningKind::NotRun);
        assert_eq!(report.working, Some(color));
    }

    #[test]
    fn test_auto_target_becomes_working_color_auxiliary_does_not() {
        let mut backend = HeadlessBackend::new();
        let mut graph = RenderGraph::new();
        let mut resources = ResourceCache::default();
        let mut pipelines = PipelineCache::new();
        let mut post = post(vec![
            EffectGroup::new("fx")
                .pass(SubPass::new("mask", frag()).target("aux"))
                .pass(SubPass::new("main", frag())),
        ]);

        let color = TextureHandle::from_raw(1);
        let state = StateSnapshot::new();
        let frame = PostFrame::new(Viewport::new(32, 16), color, &state);

        graph.begin_frame().unwrap();
        let report = post
            .record(&mut backend, &mut graph, &mut resources, &mut pipelines, &frame)
            .unwrap();

        let mask = report.output(post.graph().find("fx.mask").unwrap()).unwrap();
        let main = report.output(post.graph().find("fx.main").unwrap()).unwrap();
        assert_ne!(mask.color, main.color);
        assert_eq!(report.working, main.color);
        // Both read the scene color: the auxiliary mask left the working color alone.
        assert!(graph.passes()[1].reads().contains(&color.into()));
    }
}
