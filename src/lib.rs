#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod backend;
pub mod command;
pub mod errors;
pub mod graph;
pub mod pipeline;
pub mod post;
pub mod renderer;
pub mod resources;
pub mod settings;
pub mod state;
pub mod utils;

pub use backend::{GpuBackend, HeadlessBackend};
pub use command::{Command, CommandQueue, StateOverrides, UniformValue};
pub use errors::{FrameError, Result};
pub use graph::{RenderGraph, RenderPassDesc};
pub use pipeline::{FlagDefinition, FlagTable, PipelineCache, ShaderSource};
pub use post::{EffectGroup, PostGraph, PostProcessing, SubPass};
pub use renderer::{FrameRecorder, FrameStats, Renderer};
pub use resources::{ResourceCache, ResourceDescriptor, UsageClass};
pub use settings::FrameSettings;
pub use state::{StatePath, StateSchema, StateSnapshot, StateValue};
pub use utils::interner;
