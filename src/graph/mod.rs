//! Render Graph
//!
//! - [`RenderGraph`]: records passes per frame, executes them at `end_frame`
//! - [`RenderPassDesc`] / [`PassRecord`]: a pass before and after recording
//! - [`GraphResource`]: what a pass reads and writes
//! - [`RenderContext`]: borrow-split access to the subsystems inside a pass body

pub mod context;
pub mod pass;
pub mod render_graph;

pub use context::RenderContext;
pub use pass::{GraphResource, PassRecord, RenderFn, RenderPassDesc};
pub use render_graph::RenderGraph;
