//! Capacity limits for a single VM instance.
//!
//! The operand stack and the call-frame stack are both bounded. Running out of
//! either is a fatal [`ResourceError`], never a catchable runtime error.

use std::fmt;

/// Default operand stack capacity, in values.
pub const DEFAULT_MAX_STACK: usize = 256;

/// Default call depth, in frames.
pub const DEFAULT_MAX_FRAMES: usize = 256;

/// Limits applied to one VM instance.
///
/// Built with the same builder style as the rest of the configuration:
///
/// ```
/// use pizza::VmLimits;
///
/// let limits = VmLimits::new().max_stack(1024).max_frames(64);
/// assert_eq!(limits.stack_limit(), 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmLimits {
    max_stack: usize,
    max_frames: usize,
}

impl VmLimits {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_stack: DEFAULT_MAX_STACK,
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }

    /// Sets the maximum number of values on the operand stack.
    #[must_use]
    pub fn max_stack(mut self, max_stack: usize) -> Self {
        self.max_stack = max_stack;
        self
    }

    /// Sets the maximum number of simultaneously active call frames.
    #[must_use]
    pub fn max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    #[must_use]
    pub fn stack_limit(&self) -> usize {
        self.max_stack
    }

    #[must_use]
    pub fn frame_limit(&self) -> usize {
        self.max_frames
    }
}

impl Default for VmLimits {
    fn default() -> Self {
        Self::new()
    }
}

/// A VM ran out of one of its bounded resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Pushing onto a full operand stack.
    StackOverflow { limit: usize },
    /// Entering a call with the frame stack already at capacity.
    FrameOverflow { limit: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackOverflow { limit } => write!(f, "stack overflow: operand stack limit of {limit} exceeded"),
            Self::FrameOverflow { limit } => write!(f, "recursion limit exceeded: more than {limit} active frames"),
        }
    }
}

impl std::error::Error for ResourceError {}
