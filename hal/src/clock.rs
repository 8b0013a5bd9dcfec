//! # Clock Controller
//!
//! CAMNOC AXI source clock and AHB clock-level control.

use crate::bus::VoteLevel;
use crate::error::HalResult;

/// Clock voting client
///
/// The software client votes on behalf of the HLOS lane. Hardware clients
/// are the CESTA channels, one per DRV lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockClient {
    /// Software (HLOS) clock client
    Sw,
    /// Hardware CESTA client `n`
    Hw(u8),
}

impl ClockClient {
    /// Number of hardware CESTA clients
    pub const MAX_HW_CLIENTS: usize = 3;

    /// Slot index for bookkeeping arrays (software client last)
    pub const fn slot(self) -> usize {
        match self {
            Self::Hw(n) => n as usize,
            Self::Sw => Self::MAX_HW_CLIENTS,
        }
    }
}

/// External clock controller
pub trait ClockController: Send {
    /// Set the source clock rate for a client
    ///
    /// `low_rate` is only meaningful for hardware clients.
    fn set_source_rate(&mut self, client: ClockClient, high_rate: u64, low_rate: u64)
        -> HalResult<()>;

    /// Commit the pending rates of a hardware client
    fn switch_channel(&mut self, client: ClockClient, reason: &str) -> HalResult<()>;

    /// Scale the software clock to a discrete level
    fn set_rate_level(&mut self, level: VoteLevel) -> HalResult<()>;
}
