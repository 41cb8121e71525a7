//! Pooled GPU Resources
//!
//! | Type | Role |
//! |------|------|
//! | [`ResourceDescriptor`] | What to allocate; normalized, label-insensitive equality |
//! | [`UsageClass`] | `Transient` (reclaimed when idle) or `Retained` (kept until disposal) |
//! | [`ResourceCache`] | The pool: acquire, release, reclaim, shared registry |
//! | [`GpuResource`] / [`PassTarget`] | Backend handles held by a pooled entry |

pub mod cache;
pub mod descriptor;

pub use cache::{Acquired, ResourceCache, ResourceKey, ResourceStats};
pub use descriptor::{
    GpuResource, PassDesc, PassTarget, ResourceDescriptor, ResourceKind, UsageClass,
};
