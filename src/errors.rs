//! Error Types
//!
//! This module defines the error types used throughout the frame scheduler.
//!
//! # Overview
//!
//! The main error type [`FrameError`] covers every failure mode that can
//! abort a frame:
//! - Configuration mistakes (unknown command kinds, malformed flag tables)
//! - Shader variant compilation failures
//! - GPU resource exhaustion
//! - Render graph ordering violations and re-entrant frame calls
//!
//! Missing named references inside the post-processing graph are *not*
//! errors: they are degraded locally and reported as warnings (see
//! [`crate::post::ResolutionWarning`]).
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for `std::result::Result<T, FrameError>`.
//!
//! ```rust,ignore
//! use myth_frame::errors::{FrameError, Result};
//!
//! fn record() -> Result<()> {
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The main error type for the frame scheduler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Unknown command kind, malformed flag definition, invalid state path.
    ///
    /// Never retried: the caller has to fix its configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ========================================================================
    // Shader & Pipeline Errors
    // ========================================================================
    /// A shader variant failed to compile. The failing variant is not cached.
    #[error("Failed to compile '{label}' with flags [{}]: {message}", flags.join(", "))]
    Compilation {
        /// Debug label of the shader pair
        label: String,
        /// Canonical active-flag list of the failing variant
        flags: Vec<String>,
        /// Composed vertex source handed to the backend
        vertex: String,
        /// Composed fragment source handed to the backend
        fragment: String,
        /// Backend diagnostic
        message: String,
    },

    /// Strict mode only: a uniform declared by the program has no value.
    #[error("Missing value for uniform '{uniform}' of program '{program}'")]
    MissingUniform {
        /// Debug label of the bound program
        program: String,
        /// Uniform name
        uniform: String,
    },

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// The backend failed to allocate a resource.
    #[error("Resource exhausted while allocating {descriptor}: {message}")]
    ResourceExhausted {
        /// Debug rendering of the requested descriptor
        descriptor: String,
        /// Backend diagnostic
        message: String,
    },

    /// A handle does not (or no longer) refers to a live resource.
    #[error("Unknown handle: {0}")]
    UnknownHandle(String),

    // ========================================================================
    // Frame Scheduling Errors
    // ========================================================================
    /// A pass read a resource that nothing produced earlier in this frame.
    #[error("Pass '{pass}' reads {resource} before any pass produced it this frame")]
    UnproducedRead {
        /// Name of the offending pass
        pass: String,
        /// Debug rendering of the resource
        resource: String,
    },

    /// `begin_frame` / `end_frame` was called from inside a pass callback.
    #[error("Re-entrant {call} on {subsystem} while passes are executing")]
    ReentrantFrame {
        /// Subsystem that rejected the call
        subsystem: &'static str,
        /// Rejected call
        call: &'static str,
    },

    /// `begin_frame` / `end_frame` pairing was violated.
    #[error("Frame state error: {0}")]
    FrameState(String),
}

impl FrameError {
    /// Returns `true` for errors that retrying with identical input can never fix.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FrameError::Configuration(_)
                | FrameError::Compilation { .. }
                | FrameError::MissingUniform { .. }
                | FrameError::UnproducedRead { .. }
        )
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        FrameError::Configuration(msg.into())
    }
}

/// Alias for `Result<T, FrameError>`.
pub type Result<T> = std::result::Result<T, FrameError>;
