//! Commands & the State-Diffing Submitter
//!
//! A [`Command`] is frame-scoped data: a kind, scoped [`StateOverrides`], an
//! optional draw and nested children. The [`CommandQueue`] executes commands
//! against a [`GpuBackend`](crate::backend::GpuBackend) and never issues a
//! binding call whose target state already equals the last applied one.

pub mod submitter;
pub mod types;
pub mod uniform;

pub use submitter::{CommandQueue, SubmitStats};
pub use types::{
    Command, CommandKind, MODEL_MATRIX, PROJECTION_MATRIX, StateOverrides, VIEW_MATRIX,
};
pub use uniform::{UniformMap, UniformValue};
