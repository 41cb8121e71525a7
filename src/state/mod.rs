//! Component State Snapshots
//!
//! Flag evaluation reads scene, material and camera state through a tagged
//! [`StateValue`] tree addressed by [`StatePath`]s. A frame driver builds one
//! [`StateSnapshot`] per draw context (or per frame for post-processing) and
//! hands it to the pipeline cache; the cache never mutates it.

pub mod snapshot;
pub mod value;

pub use snapshot::{StatePath, StateSchema, StateSnapshot};
pub use value::StateValue;
