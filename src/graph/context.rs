//! Pass execution context.
//!
//! [`RenderContext`] stores individual references to the scheduler's
//! subsystems so that a pass body can borrow them independently: submit a
//! command through the queue while also asking the resource cache for a
//! scratch texture, for instance.
//!
//! Both caches are locked while pass bodies run, so `begin_frame` /
//! `end_frame` called through this context fail with
//! [`FrameError::ReentrantFrame`](crate::errors::FrameError::ReentrantFrame).

use crate::backend::{GpuBackend, RenderTarget, Viewport};
use crate::command::{Command, CommandQueue, StateOverrides};
use crate::errors::Result;
use crate::pipeline::PipelineCache;
use crate::resources::ResourceCache;

/// Everything a pass body may touch.
pub struct RenderContext<'a> {
    pub backend: &'a mut dyn GpuBackend,
    pub queue: &'a mut CommandQueue,
    pub resources: &'a mut ResourceCache,
    pub pipelines: &'a mut PipelineCache,
    /// Name of the executing pass.
    pub pass: &'a str,
    pub target: RenderTarget,
    pub viewport: Option<Viewport>,
    /// Index of the executing pass in recording order.
    pub index: usize,
}

impl RenderContext<'_> {
    /// Submits `command` inside the pass scope.
    pub fn submit(&mut self, command: &Command) -> Result<()> {
        self.queue.submit(&mut *self.backend, command)
    }

    /// Submits `command` with extra overrides merged over its own state.
    pub fn submit_with(&mut self, command: &Command, overrides: &StateOverrides) -> Result<()> {
        self.queue.submit_with(&mut *self.backend, command, Some(overrides))
    }
}
