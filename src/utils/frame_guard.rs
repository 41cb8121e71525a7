use crate::errors::{FrameError, Result};

/// Tracks `begin_frame` / `end_frame` pairing for one subsystem.
///
/// While the render graph executes pass callbacks the guard is *locked*:
/// a callback that reaches back into the cache and calls `begin_frame` or
/// `end_frame` gets [`FrameError::ReentrantFrame`] instead of corrupting the
/// pool bookkeeping mid-frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameGuard {
    subsystem: &'static str,
    in_frame: bool,
    locked: bool,
}

impl FrameGuard {
    #[must_use]
    pub const fn new(subsystem: &'static str) -> Self {
        Self {
            subsystem,
            in_frame: false,
            locked: false,
        }
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.locked {
            return Err(FrameError::ReentrantFrame {
                subsystem: self.subsystem,
                call: "begin_frame",
            });
        }
        if self.in_frame {
            return Err(FrameError::FrameState(format!(
                "{}: begin_frame called twice without end_frame",
                self.subsystem
            )));
        }
        self.in_frame = true;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        if self.locked {
            return Err(FrameError::ReentrantFrame {
                subsystem: self.subsystem,
                call: "end_frame",
            });
        }
        if !self.in_frame {
            return Err(FrameError::FrameState(format!(
                "{}: end_frame called without begin_frame",
                self.subsystem
            )));
        }
        self.in_frame = false;
        Ok(())
    }

    /// Locks frame transitions while pass callbacks run.
    #[inline]
    pub fn lock(&mut self) {
        self.locked = true;
    }

    #[inline]
    pub fn unlock(&mut self) {
        self.locked = false;
    }

    #[inline]
    #[must_use]
    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}
