//! Utility Module
//!
//! - [`interner`]: String interning for uniform and flag names
//! - [`FrameGuard`]: begin/end pairing and re-entrancy protection shared by the caches

pub mod frame_guard;
pub mod interner;

pub use frame_guard::FrameGuard;
pub use interner::Symbol;
