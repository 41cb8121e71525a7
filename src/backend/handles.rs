//! Strongly-typed GPU handles.
//!
//! Thin `Copy` wrappers around the raw `u64` id a [`GpuBackend`] hands out.
//! Distinct newtypes keep texture, framebuffer, buffer and program handles
//! from being mixed up at the call sites that diff bound state.
//!
//! [`GpuBackend`]: super::GpuBackend

use std::fmt;

macro_rules! define_gpu_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw backend id.
            #[inline]
            #[must_use]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Raw backend id.
            #[inline]
            #[must_use]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

define_gpu_handle!(
    /// Handle to a backend texture (2D or cube).
    TextureHandle,
    "texture"
);

define_gpu_handle!(
    /// Handle to a backend framebuffer (a set of attachments).
    FramebufferHandle,
    "framebuffer"
);

define_gpu_handle!(
    /// Handle to a backend buffer.
    BufferHandle,
    "buffer"
);

define_gpu_handle!(
    /// Handle to a linked shader program.
    ProgramHandle,
    "program"
);

/// Where draws and clears land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderTarget {
    /// The default framebuffer (swap-chain / screen).
    #[default]
    Screen,
    /// An offscreen framebuffer.
    Framebuffer(FramebufferHandle),
}

impl fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderTarget::Screen => f.write_str("screen"),
            RenderTarget::Framebuffer(fb) => fmt::Display::fmt(fb, f),
        }
    }
}
