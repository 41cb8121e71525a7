//! Render Graph
//!
//! Records named passes during a frame and executes them at `end_frame`.
//!
//! # Current implementation
//! - Passes execute strictly in recording order, which is what makes a
//!   pass's writes visible to every later pass.
//! - Declared reads are checked when a pass is recorded: reading a resource
//!   that was neither imported nor written by an earlier pass is a
//!   [`FrameError::UnproducedRead`].
//! - Every pass body runs inside a command-queue scope carrying its target
//!   and viewport, optionally wrapped in a backend debug group.
//!
//! Declared `uses` are kept on each [`PassRecord`] so that reordering or
//! culling can be layered on later without changing the recording API.

use rustc_hash::FxHashSet;

use super::context::RenderContext;
use super::pass::{GraphResource, PassRecord, RenderPassDesc};
use crate::backend::GpuBackend;
use crate::command::{CommandQueue, StateOverrides};
use crate::errors::{FrameError, Result};
use crate::pipeline::PipelineCache;
use crate::resources::ResourceCache;
use crate::utils::FrameGuard;

/// Per-frame pass recorder and executor.
pub struct RenderGraph {
    passes: Vec<PassRecord>,
    produced: FxHashSet<GraphResource>,
    guard: FrameGuard,
    debug_groups: bool,
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderGraph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            produced: FxHashSet::default(),
            guard: FrameGuard::new("RenderGraph"),
            debug_groups: true,
        }
    }

    pub fn set_debug_groups(&mut self, enabled: bool) {
        self.debug_groups = enabled;
    }

    /// Clears the recorded passes of the previous frame.
    pub fn begin_frame(&mut self) -> Result<()> {
        self.guard.begin()?;
        self.passes.clear();
        self.produced.clear();
        Ok(())
    }

    #[must_use]
    pub fn in_frame(&self) -> bool {
        self.guard.in_frame()
    }

    /// Marks a resource produced outside the graph (scene color, retained
    /// history textures, ...) as readable this frame.
    pub fn import(&mut self, resource: impl Into<GraphResource>) {
        self.produced.insert(resource.into());
    }

    /// `true` when `resource` was imported or written by a recorded pass.
    #[must_use]
    pub fn is_produced(&self, resource: GraphResource) -> bool {
        self.produced.contains(&resource)
    }

    /// Appends a pass without executing it.
    ///
    /// Returns the pass index in recording order.
    pub fn render_pass(&mut self, mut desc: RenderPassDesc) -> Result<usize> {
        if !self.guard.in_frame() {
            return Err(FrameError::FrameState(format!(
                "RenderGraph: pass '{}' recorded outside begin_frame/end_frame",
                desc.name
            )));
        }

        if let Some(missing) = desc.reads.iter().find(|r| !self.produced.contains(*r)) {
            let resource = missing.to_string();
            return Err(FrameError::UnproducedRead {
                pass: desc.name,
                resource,
            });
        }

        let target = GraphResource::of_target(desc.target);
        if !desc.writes.contains(&target) {
            desc.writes.push(target);
        }
        self.produced.extend(desc.writes.iter().copied());

        log::trace!("RenderGraph: recorded pass '{}'", desc.name);
        self.passes.push(PassRecord { desc });
        Ok(self.passes.len() - 1)
    }

    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    #[must_use]
    pub fn passes(&self) -> &[PassRecord] {
        &self.passes
    }

    /// Executes every recorded pass in order and closes the frame.
    ///
    /// Both caches are locked for the duration so a pass body cannot start
    /// or end a frame on them. The first failing pass aborts the rest of the
    /// frame; the graph is still left ready for the next `begin_frame`.
    ///
    /// Returns the number of passes executed.
    pub fn end_frame(
        &mut self,
        backend: &mut dyn GpuBackend,
        queue: &mut CommandQueue,
        resources: &mut ResourceCache,
        pipelines: &mut PipelineCache,
    ) -> Result<usize> {
        self.guard.end()?;

        let passes = std::mem::take(&mut self.passes);
        self.produced.clear();

        resources.lock();
        pipelines.lock();
        let result = self.execute(passes, backend, queue, resources, pipelines);
        pipelines.unlock();
        resources.unlock();

        result
    }

    fn execute(
        &self,
        passes: Vec<PassRecord>,
        backend: &mut dyn GpuBackend,
        queue: &mut CommandQueue,
        resources: &mut ResourceCache,
        pipelines: &mut PipelineCache,
    ) -> Result<usize> {
        let mut executed = 0;

        for (index, record) in passes.into_iter().enumerate() {
            let RenderPassDesc {
                name,
                target,
                viewport,
                clear,
                render,
                ..
            } = record.desc;

            if self.debug_groups {
                backend.push_debug_group(&name);
            }

            let mut overrides = StateOverrides::new().with_target(target);
            overrides.viewport = viewport;
            queue.begin_scope(&overrides);

            let mut outcome = Ok(());
            if let Some(values) = clear {
                queue.clear(backend, values);
            }
            if let Some(render) = render {
                let mut ctx = RenderContext {
                    backend: &mut *backend,
                    queue: &mut *queue,
                    resources: &mut *resources,
                    pipelines: &mut *pipelines,
                    pass: &name,
                    target,
                    viewport,
                    index,
                };
                outcome = render(&mut ctx);
            }

            let closed = queue.end_scope();
            if self.debug_groups {
                backend.pop_debug_group();
            }

            if let Err(e) = outcome.and(closed) {
                log::debug!("RenderGraph: pass '{name}' failed: {e}");
                return Err(e);
            }
            executed += 1;
        }

        Ok(executed)
    }
}
