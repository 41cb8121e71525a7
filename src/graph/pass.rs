//! Pass records.

use std::fmt;

use smallvec::SmallVec;

use super::context::RenderContext;
use crate::backend::{BufferHandle, ClearValues, FramebufferHandle, RenderTarget, TextureHandle, Viewport};
use crate::errors::Result;
use crate::resources::PassTarget;

/// A resource a pass reads or writes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GraphResource {
    Texture(TextureHandle),
    Framebuffer(FramebufferHandle),
    Buffer(BufferHandle),
    /// The default framebuffer.
    Screen,
}

impl GraphResource {
    /// Resources written when rendering into `target`.
    #[must_use]
    pub fn of_target(target: RenderTarget) -> Self {
        match target {
            RenderTarget::Screen => GraphResource::Screen,
            RenderTarget::Framebuffer(fb) => GraphResource::Framebuffer(fb),
        }
    }

    /// Framebuffer plus every attachment of a pooled pass target.
    #[must_use]
    pub fn of_pass(target: &PassTarget) -> SmallVec<[GraphResource; 3]> {
        let mut out = SmallVec::new();
        out.push(GraphResource::Framebuffer(target.framebuffer));
        out.push(GraphResource::Texture(target.color));
        if let Some(depth) = target.depth {
            out.push(GraphResource::Texture(depth));
        }
        out
    }
}

impl fmt::Display for GraphResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphResource::Texture(t) => fmt::Display::fmt(t, f),
            GraphResource::Framebuffer(fb) => fmt::Display::fmt(fb, f),
            GraphResource::Buffer(b) => fmt::Display::fmt(b, f),
            GraphResource::Screen => f.write_str("screen"),
        }
    }
}

impl From<TextureHandle> for GraphResource {
    fn from(t: TextureHandle) -> Self {
        GraphResource::Texture(t)
    }
}

impl From<FramebufferHandle> for GraphResource {
    fn from(fb: FramebufferHandle) -> Self {
        GraphResource::Framebuffer(fb)
    }
}

impl From<BufferHandle> for GraphResource {
    fn from(b: BufferHandle) -> Self {
        GraphResource::Buffer(b)
    }
}

/// Deferred body of a pass.
pub type RenderFn = Box<dyn FnOnce(&mut RenderContext<'_>) -> Result<()>>;

/// Description of one pass, recorded now and executed at `end_frame`.
///
/// `reads`/`writes` are the pass's `uses`: they drive the unproduced-read
/// check and are kept for inspection, while execution order stays the
/// recording order.
pub struct RenderPassDesc {
    pub(crate) name: String,
    pub(crate) reads: SmallVec<[GraphResource; 4]>,
    pub(crate) writes: SmallVec<[GraphResource; 4]>,
    pub(crate) target: RenderTarget,
    pub(crate) viewport: Option<Viewport>,
    pub(crate) clear: Option<ClearValues>,
    pub(crate) render: Option<RenderFn>,
}

impl RenderPassDesc {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reads: SmallVec::new(),
            writes: SmallVec::new(),
            target: RenderTarget::Screen,
            viewport: None,
            clear: None,
            render: None,
        }
    }

    #[must_use]
    pub fn reads(mut self, resource: impl Into<GraphResource>) -> Self {
        self.reads.push(resource.into());
        self
    }

    #[must_use]
    pub fn writes(mut self, resource: impl Into<GraphResource>) -> Self {
        self.writes.push(resource.into());
        self
    }

    /// Renders into a pooled pass target; declares all of its attachments as written.
    #[must_use]
    pub fn into_pass(mut self, target: &PassTarget) -> Self {
        self.target = RenderTarget::Framebuffer(target.framebuffer);
        self.writes.extend(GraphResource::of_pass(target));
        self
    }

    #[must_use]
    pub fn target(mut self, target: RenderTarget) -> Self {
        self.target = target;
        self
    }

    #[must_use]
    pub fn viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    #[must_use]
    pub fn clear(mut self, values: ClearValues) -> Self {
        self.clear = Some(values);
        self
    }

    #[must_use]
    pub fn render<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut RenderContext<'_>) -> Result<()> + 'static,
    {
        self.render = Some(Box::new(f));
        self
    }
}

/// A recorded pass as seen from outside the graph.
pub struct PassRecord {
    pub(crate) desc: RenderPassDesc,
}

impl PassRecord {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[must_use]
    pub fn reads(&self) -> &[GraphResource] {
        &self.desc.reads
    }

    /// Declared writes; the render target is always among them.
    #[must_use]
    pub fn writes(&self) -> &[GraphResource] {
        &self.desc.writes
    }

    #[must_use]
    pub fn target(&self) -> RenderTarget {
        self.desc.target
    }

    #[must_use]
    pub fn viewport(&self) -> Option<Viewport> {
        self.desc.viewport
    }

    #[must_use]
    pub fn clear_values(&self) -> Option<ClearValues> {
        self.desc.clear
    }
}

impl fmt::Debug for PassRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassRecord")
            .field("name", &self.desc.name)
            .field("reads", &self.desc.reads)
            .field("writes", &self.desc.writes)
            .field("target", &self.desc.target)
            .field("viewport", &self.desc.viewport)
            .finish_non_exhaustive()
    }
}
