//! # Error Handling
//!
//! Errors raised while building the voting tree and while driving votes
//! through it.
//!
//! ## Error Categories
//!
//! | Category      | Retry | Surfaced by stop | Example                      |
//! |---------------|-------|------------------|------------------------------|
//! | Configuration | No    | Yes              | Path with no covering leaf   |
//! | Lifecycle     | No    | Yes              | Stop on a stopped client     |
//! | Resource      | No    | Collected        | Bus client rejected a vote   |
//! | Timeout       | No    | Collected        | Q-channel handshake expired  |
//!
//! Configuration and lifecycle errors always abort the call. Resource and
//! timeout errors abort everything except the teardown half of `stop`, which
//! gathers them into a [`TeardownResult`] and keeps going.

use core::fmt;

use alloc::vec::Vec;
use cpas_hal::HalError;

/// Core result type
pub type CpasResult<T> = Result<T, CpasError>;

// =============================================================================
// ERROR CATEGORY
// =============================================================================

/// Broad classification used for propagation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Static mismatch between client table and tree table
    Configuration,
    /// Caller misuse of the lifecycle
    Lifecycle,
    /// External collaborator failure
    Resource,
    /// Bounded poll or drain expired
    Timeout,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Lifecycle => write!(f, "lifecycle"),
            Self::Resource => write!(f, "resource"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

// =============================================================================
// CONFIG ERROR
// =============================================================================

/// Tree or profile construction failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A parent chain does not reach a root within the level bound
    CyclicTree,
    /// Level index out of range
    InvalidLevel,
    /// Cell index out of range
    InvalidCellIndex,
    /// Two nodes share a cell index
    DuplicateCellIndex,
    /// Parent cell index not defined at a lower level
    UnknownParent,
    /// Path type normalizes outside the path table
    InvalidPathType,
    /// Transaction type outside the transaction table
    InvalidTransaction,
    /// More ports than the port table holds
    TooManyPorts,
    /// More real-time write NIU nodes than supported
    TooManyNius,
    /// Real-time write NIU node with zero size
    InvalidNiuSize,
    /// Leaf names a client missing from the client table
    UnknownClientName,
    /// DRV lane requested while DDR-DRV is disabled
    DrvNotSupported,
    /// DRV port without a resource state coordinator
    MissingRscDevice,
    /// Camera/CPAS version pair not in the profile table
    UnknownHardwareVersion,
    /// Capability registers unreadable or inconsistent
    InvalidCapsRegisters,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CyclicTree => write!(f, "tree contains a cycle"),
            Self::InvalidLevel => write!(f, "invalid tree level"),
            Self::InvalidCellIndex => write!(f, "invalid cell index"),
            Self::DuplicateCellIndex => write!(f, "duplicate cell index"),
            Self::UnknownParent => write!(f, "unknown parent node"),
            Self::InvalidPathType => write!(f, "invalid path type"),
            Self::InvalidTransaction => write!(f, "invalid transaction type"),
            Self::TooManyPorts => write!(f, "too many ports"),
            Self::TooManyNius => write!(f, "too many rt write niu nodes"),
            Self::InvalidNiuSize => write!(f, "invalid niu size"),
            Self::UnknownClientName => write!(f, "unknown client name"),
            Self::DrvNotSupported => write!(f, "drv voting not enabled"),
            Self::MissingRscDevice => write!(f, "missing rsc device for drv port"),
            Self::UnknownHardwareVersion => write!(f, "unknown hardware version"),
            Self::InvalidCapsRegisters => write!(f, "invalid capability registers"),
        }
    }
}

// =============================================================================
// CPAS ERROR
// =============================================================================

/// Engine error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpasError {
    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------
    /// Raw path type normalizes outside the path table
    InvalidPathType(u32),
    /// No leaf, direct or aggregating, covers the path
    PathNotFound {
        /// Client index
        client: u32,
        /// Normalized path type
        path: u32,
        /// Transaction type
        transaction: u32,
    },
    /// Node carries a merge type other than SUM or SUM_INTERLEAVE
    InvalidMergeType(u32),
    /// Identifier/cell pair not in the client table
    UnknownClient,
    /// Root node has no port for the lane in use
    InvalidPort,
    /// Construction-time failure
    Config(ConfigError),

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------
    /// Client already registered
    AlreadyRegistered,
    /// Client not registered
    NotRegistered,
    /// Client still started
    StillStarted,
    /// Client not started
    NotStarted,
    /// Start with zero AHB level or an all-zero AXI vote
    ZeroStartVote,
    /// AHB vote malformed
    InvalidAhbVote,
    /// Handle does not name a client slot
    InvalidHandle,
    /// Operation only allowed while powered down
    PoweredUp,
    /// Dynamic-lane leaf voted with no lane selected
    UnresolvedDynamicLane,

    // -------------------------------------------------------------------------
    // Other
    // -------------------------------------------------------------------------
    /// Paths of one call resolved to different lanes (strict mode)
    LaneMismatch,
    /// Not supported on this hardware
    NotSupported,
    /// External collaborator failure
    Hal(HalError),
}

impl CpasError {
    /// Propagation category of this error
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidPathType(_)
            | Self::PathNotFound { .. }
            | Self::InvalidMergeType(_)
            | Self::UnknownClient
            | Self::InvalidPort
            | Self::Config(_)
            | Self::LaneMismatch
            | Self::NotSupported => ErrorCategory::Configuration,
            Self::AlreadyRegistered
            | Self::NotRegistered
            | Self::StillStarted
            | Self::NotStarted
            | Self::ZeroStartVote
            | Self::InvalidAhbVote
            | Self::InvalidHandle
            | Self::PoweredUp
            | Self::UnresolvedDynamicLane => ErrorCategory::Lifecycle,
            Self::Hal(HalError::Timeout) => ErrorCategory::Timeout,
            Self::Hal(_) => ErrorCategory::Resource,
        }
    }

    /// Whether `stop` may swallow this error and keep tearing down
    pub const fn is_teardown_tolerable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Resource | ErrorCategory::Timeout
        )
    }
}

impl fmt::Display for CpasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPathType(raw) => write!(f, "invalid path type {}", raw),
            Self::PathNotFound {
                client,
                path,
                transaction,
            } => write!(
                f,
                "no tree node for client {} path {} transaction {}",
                client, path, transaction
            ),
            Self::InvalidMergeType(raw) => write!(f, "invalid merge type {}", raw),
            Self::UnknownClient => write!(f, "unknown client"),
            Self::InvalidPort => write!(f, "invalid axi port index"),
            Self::Config(e) => write!(f, "configuration: {}", e),
            Self::AlreadyRegistered => write!(f, "client already registered"),
            Self::NotRegistered => write!(f, "client not registered"),
            Self::StillStarted => write!(f, "client still started"),
            Self::NotStarted => write!(f, "client not started"),
            Self::ZeroStartVote => write!(f, "start requested with zero vote"),
            Self::InvalidAhbVote => write!(f, "invalid ahb vote"),
            Self::InvalidHandle => write!(f, "invalid client handle"),
            Self::PoweredUp => write!(f, "cpas is powered up"),
            Self::UnresolvedDynamicLane => write!(f, "dynamic drv lane not selected"),
            Self::LaneMismatch => write!(f, "paths resolved to different drv lanes"),
            Self::NotSupported => write!(f, "operation not supported"),
            Self::Hal(e) => write!(f, "hal: {}", e),
        }
    }
}

impl From<HalError> for CpasError {
    fn from(e: HalError) -> Self {
        Self::Hal(e)
    }
}

impl From<ConfigError> for CpasError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// =============================================================================
// TEARDOWN RESULT
// =============================================================================

/// Outcome of a completed stop
///
/// The client is always moved out of the started state; `errors` lists the
/// sub-steps that failed along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownResult {
    /// Non-fatal sub-errors in the order they occurred
    pub errors: Vec<CpasError>,
}

impl TeardownResult {
    /// Teardown with no sub-errors
    pub fn clean() -> Self {
        Self::default()
    }

    /// Whether every sub-step succeeded
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record a failed sub-step
    pub fn record(&mut self, step: &str, err: CpasError) {
        log::error!("teardown step '{}' failed: {}", step, err);
        self.errors.push(err);
    }

    /// Record the error of a sub-step, if any
    pub fn check<T, E: Into<CpasError>>(&mut self, step: &str, res: Result<T, E>) -> Option<T> {
        match res {
            Ok(v) => Some(v),
            Err(e) => {
                self.record(step, e.into());
                None
            },
        }
    }
}
