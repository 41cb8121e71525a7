//! Post-Processing Pass Graph
//!
//! A chain of effect groups whose sub-passes reference each other's outputs:
//!
//! - [`EffectGroup`] / [`SubPass`]: authored description, string references
//! - [`PostGraph`]: the same chain with every reference resolved to a [`StageId`]
//! - [`PostProcessing`]: records the enabled stages of a built graph into the
//!   [`RenderGraph`](crate::graph::RenderGraph) each frame
//! - [`effects`]: the built-in SSAO, depth of field, bloom and final composite

pub mod effect;
pub mod effects;
pub mod graph;
pub mod processing;

pub use effect::{EffectGroup, FrameInput, SharedTexture, SizeSpec, SourceSpec, SubPass, TargetSpec};
pub use effects::{BuiltinEffects, ToneMappingMode, standard_chain};
pub use graph::{
    GroupEntry, PostGraph, ResolutionWarning, Stage, StageId, StageInput, StageTarget, WarningKind,
};
pub use processing::{PostFrame, PostProcessing, PostReport, StageOutput};
