//! # HAL Error Handling
//!
//! Errors reported by external collaborators and by the gated register map.

use core::fmt;

/// HAL result type
pub type HalResult<T> = Result<T, HalError>;

/// Errors surfaced at the platform boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// Bus-scaling client rejected a bandwidth or level vote
    BusVoteFailed,
    /// Clock rate or channel switch failed
    ClockFailed,
    /// Resource state coordinator lifecycle call failed
    RscFailed,
    /// Platform resource enable/disable failed
    ResourceFailed,
    /// Bounded poll or drain expired
    Timeout,
    /// Hardware denied the request (Q-channel deny)
    Busy,
    /// Register access attempted while the SoC access count is zero
    AccessDenied,
    /// No register window mapped for the requested base
    UnmappedBase,
    /// Offset outside the mapped window
    OutOfBounds,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BusVoteFailed => write!(f, "bus vote failed"),
            Self::ClockFailed => write!(f, "clock operation failed"),
            Self::RscFailed => write!(f, "rsc operation failed"),
            Self::ResourceFailed => write!(f, "platform resource operation failed"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::Busy => write!(f, "hardware busy"),
            Self::AccessDenied => write!(f, "register access denied, soc not accessible"),
            Self::UnmappedBase => write!(f, "register base not mapped"),
            Self::OutOfBounds => write!(f, "register offset out of bounds"),
        }
    }
}
