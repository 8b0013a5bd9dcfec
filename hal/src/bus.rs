//! # Bus-Scaling Clients
//!
//! One [`BusClient`] backs every physical interconnect path the engine votes
//! on: each AXI (MNOC) port, each CAMNOC port, and the AHB register bus.

use core::fmt;

use crate::error::HalResult;

// =============================================================================
// BUS PATH
// =============================================================================

/// Which vote slot of a bus client a bandwidth vote lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusPath {
    /// Legacy single-slot vote
    Hlos,
    /// DRV vote used while the channel runs at its high level
    DrvHigh,
    /// DRV vote used while the channel idles at its low level
    DrvLow,
}

impl BusPath {
    /// Short tag used in logs
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hlos => "HLOS",
            Self::DrvHigh => "DRV_HIGH",
            Self::DrvLow => "DRV_LOW",
        }
    }
}

// =============================================================================
// VOTE LEVEL
// =============================================================================

/// Discrete voltage-corner level used for AHB and clock-level votes
///
/// Ordering follows the corner ladder, so `max()` picks the most demanding
/// level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u32)]
pub enum VoteLevel {
    /// Power collapsed
    #[default]
    Suspend    = 0,
    /// Minimum SVS
    MinSvs     = 1,
    /// Low SVS D1
    LowSvsD1   = 2,
    /// Low SVS
    LowSvs     = 3,
    /// SVS
    Svs        = 4,
    /// SVS L1
    SvsL1      = 5,
    /// Nominal
    Nominal    = 6,
    /// Nominal L1
    NominalL1  = 7,
    /// Turbo
    Turbo      = 8,
}

impl VoteLevel {
    /// Convert a raw level number, clamping unknown values to `Turbo`
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Suspend,
            1 => Self::MinSvs,
            2 => Self::LowSvsD1,
            3 => Self::LowSvs,
            4 => Self::Svs,
            5 => Self::SvsL1,
            6 => Self::Nominal,
            7 => Self::NominalL1,
            _ => Self::Turbo,
        }
    }
}

impl fmt::Display for VoteLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Suspend => "SUSPEND",
            Self::MinSvs => "MINSVS",
            Self::LowSvsD1 => "LOWSVS_D1",
            Self::LowSvs => "LOWSVS",
            Self::Svs => "SVS",
            Self::SvsL1 => "SVSL1",
            Self::Nominal => "NOMINAL",
            Self::NominalL1 => "NOMINALL1",
            Self::Turbo => "TURBO",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// BUS CLIENT TRAIT
// =============================================================================

/// External bus-scaling client
pub trait BusClient: Send {
    /// Apply one bandwidth vote to one vote slot
    fn update_bandwidth(&mut self, ab: u64, ib: u64, path: BusPath) -> HalResult<()>;

    /// Apply a discrete level vote
    fn update_level(&mut self, level: VoteLevel) -> HalResult<()>;
}
