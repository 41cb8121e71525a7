//! Fixed-function pipeline properties.
//!
//! The program is only half of a pipeline: depth, blend, cull, color mask
//! and topology complete it. [`PipelineProps`] bundles them so they can take
//! part in the variant key (via [`PipelineProps::compute_hash`]) and be
//! applied as command state overrides when the pipeline is used.

use std::hash::{BuildHasher, Hash};

use crate::backend::{CullState, DepthState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineProps {
    pub depth: DepthState,
    pub blend: Option<wgpu::BlendState>,
    pub cull: CullState,
    pub color_mask: wgpu::ColorWrites,
    pub topology: wgpu::PrimitiveTopology,
}

impl Default for PipelineProps {
    fn default() -> Self {
        Self {
            depth: DepthState::DISABLED,
            blend: None,
            cull: CullState::DISABLED,
            color_mask: wgpu::ColorWrites::ALL,
            topology: wgpu::PrimitiveTopology::TriangleList,
        }
    }
}

impl PipelineProps {
    /// Props of an opaque mesh: depth tested and written, back faces culled.
    #[must_use]
    pub fn opaque() -> Self {
        Self {
            depth: DepthState::LESS_EQUAL,
            cull: CullState::BACK,
            ..Self::default()
        }
    }

    /// Props of a full-screen post-processing draw.
    #[must_use]
    pub fn fullscreen() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_depth(mut self, depth: DepthState) -> Self {
        self.depth = depth;
        self
    }

    #[must_use]
    pub fn with_blend(mut self, blend: Option<wgpu::BlendState>) -> Self {
        self.blend = blend;
        self
    }

    #[must_use]
    pub fn with_cull(mut self, cull: CullState) -> Self {
        self.cull = cull;
        self
    }

    #[must_use]
    pub fn with_color_mask(mut self, mask: wgpu::ColorWrites) -> Self {
        self.color_mask = mask;
        self
    }

    #[must_use]
    pub fn with_topology(mut self, topology: wgpu::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Stable hash of every field.
    #[must_use]
    pub fn compute_hash(&self) -> u64 {
        rustc_hash::FxBuildHasher.hash_one(self)
    }
}
