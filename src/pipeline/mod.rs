//! Pipeline / Program Variant Cache
//!
//! Derives a deterministic set of compile flags from component state and
//! maps it, together with the shader sources, to a compiled program.
//!
//! ```text
//! StateSnapshot ──► FlagTable::evaluate ──► FlagSet (canonical) ─┐
//!                              │                                  ├─► VariantKey ──► program
//!                              └──► uniform side table            │
//! ShaderSource (vertex, fragment) ── identities ──────────────────┘
//! ```
//!
//! - [`flags`]: flag definitions, validation and order-independent evaluation
//! - [`defines`]: the canonical [`FlagSet`]
//! - [`shader_gen`]: [`ShaderSource`] and variant text composition
//! - [`props`]: fixed-function [`PipelineProps`]
//! - [`cache`]: the [`PipelineCache`] itself

pub mod cache;
pub mod defines;
pub mod flags;
pub mod props;
pub mod shader_gen;

pub use cache::{Invalidation, PipelineCache, PipelineStats, ProgramRef, ResolvedPipeline};
pub use defines::FlagSet;
pub use flags::{FlagDefinition, FlagEvaluation, FlagOptions, FlagTable, FlagType};
pub use props::PipelineProps;
pub use shader_gen::{ShaderSource, compose};
