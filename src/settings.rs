//! Frame Scheduler Settings
//!
//! [`FrameSettings`] gathers every tunable of the scheduler in one plain data
//! struct. It is `serde`-loadable so hosts can keep it next to their other
//! renderer configuration:
//!
//! ```rust,ignore
//! use myth_frame::FrameSettings;
//!
//! // Defaults: destroy transient resources after one idle frame, lenient uniforms.
//! let settings = FrameSettings::default();
//!
//! // Debug build of a tool: fail loudly on missing uniforms, keep resources around longer.
//! let settings = FrameSettings::default()
//!     .with_strict_uniforms(true)
//!     .with_idle_frame_threshold(3);
//!
//! // Or from JSON
//! let settings = FrameSettings::from_json(r#"{ "idle_frame_threshold": 2 }"#)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{FrameError, Result};

/// Configuration shared by the resource cache, the pipeline cache and the
/// command queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSettings {
    /// Number of consecutive frames a transient resource may stay unrequested
    /// before it is destroyed at `end_frame`.
    ///
    /// `1` destroys a resource after the first full frame nobody asked for it.
    /// Resources are never destroyed in the frame that created them.
    pub idle_frame_threshold: u32,

    /// When `true`, a uniform declared by a program but missing from the
    /// submitted command is a [`FrameError::MissingUniform`]. Otherwise the
    /// uniform is silently left at its previous value.
    pub strict_uniforms: bool,

    /// Validate flag definition paths against the registered
    /// [`StateSchema`](crate::state::StateSchema) when a flag table is built.
    pub validate_state_paths: bool,

    /// Number of texture units the backend exposes.
    pub max_texture_units: u32,

    /// Wrap every executed pass in a backend debug group.
    pub debug_groups: bool,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            idle_frame_threshold: 1,
            strict_uniforms: false,
            validate_state_paths: true,
            max_texture_units: 16,
            debug_groups: true,
        }
    }
}

impl FrameSettings {
    /// Parses settings from JSON; missing keys fall back to the defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| FrameError::config(format!("invalid frame settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects values the scheduler cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.idle_frame_threshold == 0 {
            return Err(FrameError::config(
                "idle_frame_threshold must be at least 1",
            ));
        }
        if self.max_texture_units == 0 {
            return Err(FrameError::config("max_texture_units must be at least 1"));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_idle_frame_threshold(mut self, frames: u32) -> Self {
        self.idle_frame_threshold = frames;
        self
    }

    #[must_use]
    pub fn with_strict_uniforms(mut self, strict: bool) -> Self {
        self.strict_uniforms = strict;
        self
    }

    #[must_use]
    pub fn with_state_path_validation(mut self, validate: bool) -> Self {
        self.validate_state_paths = validate;
        self
    }

    #[must_use]
    pub fn with_max_texture_units(mut self, units: u32) -> Self {
        self.max_texture_units = units;
        self
    }

    #[must_use]
    pub fn with_debug_groups(mut self, enabled: bool) -> Self {
        self.debug_groups = enabled;
        self
    }
}
