//! Frame Driver
//!
//! [`Renderer`] owns a backend and every scheduler subsystem and drives them
//! through one frame:
//!
//! ```text
//! begin_frame ─► recorder() ─► render_pass / record_post ... ─► end_frame
//!                                                              │
//!            RenderGraph::end_frame (execute) ◄────────────────┘
//!            ResourceCache::end_frame (reclaim)
//!            PipelineCache::end_frame
//!            CommandQueue::flush
//! ```
//!
//! Recording happens through a [`FrameRecorder`], a borrow-split view that
//! hands out the backend, the graph and both caches at the same time.

use crate::backend::GpuBackend;
use crate::command::{CommandQueue, SubmitStats};
use crate::errors::Result;
use crate::graph::{RenderGraph, RenderPassDesc};
use crate::pipeline::{FlagDefinition, FlagTable, PipelineCache, PipelineStats};
use crate::post::{PostFrame, PostProcessing, PostReport};
use crate::resources::{ResourceCache, ResourceStats};
use crate::settings::FrameSettings;
use crate::state::StateSchema;

/// Counters of one completed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    /// Passes executed by the render graph.
    pub passes: usize,
    /// Transient resources destroyed at the end of the frame.
    pub reclaimed: usize,
    pub pipeline: PipelineStats,
    pub submit: SubmitStats,
    pub resources: ResourceStats,
}

/// Owns the backend and the scheduler subsystems.
pub struct Renderer<B: GpuBackend> {
    backend: B,
    settings: FrameSettings,
    schema: Option<StateSchema>,
    resources: ResourceCache,
    pipelines: PipelineCache,
    queue: CommandQueue,
    graph: RenderGraph,
    frame: u64,
}

impl<B: GpuBackend> Renderer<B> {
    pub fn new(backend: B, settings: FrameSettings) -> Result<Self> {
        settings.validate()?;

        let mut graph = RenderGraph::new();
        graph.set_debug_groups(settings.debug_groups);

        log::debug!("Renderer: created with {settings:?}");
        Ok(Self {
            backend,
            resources: ResourceCache::new(settings.idle_frame_threshold),
            pipelines: PipelineCache::new(),
            queue: CommandQueue::new(&settings),
            graph,
            schema: None,
            settings,
            frame: 0,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &FrameSettings {
        &self.settings
    }

    /// Registers the state schema flag tables are validated against.
    pub fn set_schema(&mut self, schema: StateSchema) {
        self.schema = Some(schema);
    }

    /// Builds a flag table, validating its paths against the registered
    /// schema when `validate_state_paths` is on.
    pub fn flag_table(&self, definitions: Vec<FlagDefinition>) -> Result<FlagTable> {
        let schema = self
            .schema
            .as_ref()
            .filter(|_| self.settings.validate_state_paths);
        FlagTable::new(definitions, schema)
    }

    // ========================================================================
    // Frame
    // ========================================================================

    pub fn begin_frame(&mut self) -> Result<()> {
        self.resources.begin_frame()?;
        self.pipelines.begin_frame()?;
        self.queue.begin_frame()?;
        self.graph.begin_frame()?;
        self.frame += 1;
        log::trace!("Renderer: frame {} begins", self.frame);
        Ok(())
    }

    /// Borrow-split view for recording passes.
    pub fn recorder(&mut self) -> FrameRecorder<'_> {
        FrameRecorder {
            backend: &mut self.backend,
            graph: &mut self.graph,
            resources: &mut self.resources,
            pipelines: &mut self.pipelines,
            queue: &mut self.queue,
        }
    }

    /// Executes the recorded passes, reclaims idle resources and flushes.
    ///
    /// Every subsystem is closed even when a pass fails, so the next
    /// `begin_frame` starts clean; the first error is returned.
    pub fn end_frame(&mut self) -> Result<FrameStats> {
        let executed = self.graph.end_frame(
            &mut self.backend,
            &mut self.queue,
            &mut self.resources,
            &mut self.pipelines,
        );
        let reclaimed = self.resources.end_frame(&mut self.backend);
        let closed = self.pipelines.end_frame();
        let flushed = self.queue.flush(&mut self.backend);

        let stats = FrameStats {
            frame: self.frame,
            passes: executed?,
            reclaimed: reclaimed?,
            pipeline: self.pipelines.stats(),
            submit: self.queue.stats(),
            resources: self.resources.stats(),
        };
        closed?;
        flushed?;

        log::trace!(
            "Renderer: frame {} ended, {} passes, {} reclaimed",
            stats.frame,
            stats.passes,
            stats.reclaimed
        );
        Ok(stats)
    }

    /// Destroys every cached resource and program.
    pub fn dispose(&mut self) {
        self.resources.dispose(&mut self.backend);
        self.pipelines.dispose(&mut self.backend);
        self.queue.invalidate();
        log::debug!("Renderer: disposed");
    }

    /// Drops every variant compiled from the source with `source_id`
    /// (shader reload). Returns the number of variants dropped.
    pub fn invalidate_source(&mut self, source_id: u128) -> usize {
        let invalidation = self.pipelines.invalidate_source(&mut self.backend, source_id);
        for program in &invalidation.programs {
            self.queue.forget_program(*program);
        }
        invalidation.variants
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[must_use]
    pub fn resources(&self) -> &ResourceCache {
        &self.resources
    }

    #[must_use]
    pub fn pipelines(&self) -> &PipelineCache {
        &self.pipelines
    }

    #[must_use]
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    #[must_use]
    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }
}

/// Mutable access to everything recording needs, borrowed from a [`Renderer`].
pub struct FrameRecorder<'a> {
    pub backend: &'a mut dyn GpuBackend,
    pub graph: &'a mut RenderGraph,
    pub resources: &'a mut ResourceCache,
    pub pipelines: &'a mut PipelineCache,
    /// For immediate submissions outside any pass.
    pub queue: &'a mut CommandQueue,
}

impl FrameRecorder<'_> {
    pub fn render_pass(&mut self, desc: RenderPassDesc) -> Result<usize> {
        self.graph.render_pass(desc)
    }

    /// Records the enabled stages of `post` for this frame.
    pub fn record_post(
        &mut self,
        post: &mut PostProcessing,
        frame: &PostFrame<'_>,
    ) -> Result<PostReport> {
        post.record(
            &mut *self.backend,
            &mut *self.graph,
            &mut *self.resources,
            &mut *self.pipelines,
            frame,
        )
    }
}
