//! # Bandwidth Votes
//!
//! Vote shapes exchanged with callers and stored in the tree.
//!
//! ## Lane Layout
//!
//! ```text
//!   bw_info[Hlos] ─▶ Hlos { ab, ib, camnoc }
//!   bw_info[Drv0] ─▶ Drv  { high: { ab, ib, camnoc }, low: { ab, ib, camnoc } }
//!   bw_info[Drv1] ─▶ Drv  { .. }
//!   bw_info[Drv2] ─▶ Drv  { .. }
//! ```
//!
//! The HLOS lane has a single value slot. When a HIGH or LOW vote lands on
//! it, both select that one slot.

use alloc::vec::Vec;
use core::fmt;

use cpas_hal::{ClockClient, VoteLevel};

use crate::error::{CpasError, CpasResult};
use crate::{MAX_GRAN_PATHS_PER_CLIENT, PATH_DATA_CONSO_OFFSET, PATH_DATA_MAX};

// =============================================================================
// LANES
// =============================================================================

/// Voting lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Lane {
    /// Legacy single-vote lane
    Hlos = 0,
    /// DRV lane 0
    Drv0 = 1,
    /// DRV lane 1
    Drv1 = 2,
    /// DRV lane 2
    Drv2 = 3,
}

impl Lane {
    /// Number of lanes
    pub const COUNT: usize = 4;

    /// All lanes in index order
    pub const ALL: [Lane; Self::COUNT] = [Lane::Hlos, Lane::Drv0, Lane::Drv1, Lane::Drv2];

    /// Lane at a raw index
    pub const fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(Self::Hlos),
            1 => Some(Self::Drv0),
            2 => Some(Self::Drv1),
            3 => Some(Self::Drv2),
            _ => None,
        }
    }

    /// Raw lane index
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether this is one of the DRV lanes
    pub const fn is_drv(self) -> bool {
        !matches!(self, Self::Hlos)
    }

    /// Clock client voting on behalf of this lane
    pub const fn clock_client(self) -> ClockClient {
        match self {
            Self::Hlos => ClockClient::Sw,
            Self::Drv0 => ClockClient::Hw(0),
            Self::Drv1 => ClockClient::Hw(1),
            Self::Drv2 => ClockClient::Hw(2),
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hlos => write!(f, "HLOS"),
            Self::Drv0 => write!(f, "DRV0"),
            Self::Drv1 => write!(f, "DRV1"),
            Self::Drv2 => write!(f, "DRV2"),
        }
    }
}

/// Lane a leaf votes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrvIndex {
    /// Lane fixed by configuration
    Fixed(Lane),
    /// Lane chosen per call by the owning client's selector
    Dynamic,
}

impl Default for DrvIndex {
    fn default() -> Self {
        Self::Fixed(Lane::Hlos)
    }
}

/// Sub-value of a DRV lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrvLevel {
    /// Vote held while the channel runs at its high level
    #[default]
    High,
    /// Baseline vote held while idling
    Low,
}

impl DrvLevel {
    /// The other sub-value
    pub const fn other(self) -> Self {
        match self {
            Self::High => Self::Low,
            Self::Low => Self::High,
        }
    }
}

// =============================================================================
// BANDWIDTH VOTE
// =============================================================================

/// One `{ab, ib, camnoc}` triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LaneBw {
    /// Average bandwidth on the memory NoC
    pub ab: u64,
    /// Instantaneous bandwidth on the memory NoC
    pub ib: u64,
    /// Bandwidth inside the camera NoC
    pub camnoc: u64,
}

impl LaneBw {
    /// All-zero triple
    pub const ZERO: Self = Self {
        ab: 0,
        ib: 0,
        camnoc: 0,
    };

    /// Build a triple
    pub const fn new(ab: u64, ib: u64, camnoc: u64) -> Self {
        Self { ab, ib, camnoc }
    }

    /// Whether every field is zero
    pub const fn is_zero(&self) -> bool {
        self.ab == 0 && self.ib == 0 && self.camnoc == 0
    }
}

/// HIGH/LOW pair of one DRV lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DrvVote {
    /// High-level vote
    pub high: LaneBw,
    /// Low-level vote
    pub low: LaneBw,
}

/// Per-lane bandwidth value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BandwidthVote {
    /// Lane 0 form
    Hlos(LaneBw),
    /// Lanes 1-3 form
    Drv(DrvVote),
}

impl Default for BandwidthVote {
    fn default() -> Self {
        Self::Hlos(LaneBw::ZERO)
    }
}

impl BandwidthVote {
    /// Zero value in the form used by `lane`
    pub const fn zero_for(lane: Lane) -> Self {
        if lane.is_drv() {
            Self::Drv(DrvVote {
                high: LaneBw::ZERO,
                low: LaneBw::ZERO,
            })
        } else {
            Self::Hlos(LaneBw::ZERO)
        }
    }

    /// Zero value for every lane, indexed by lane
    pub const fn zero_lanes() -> [Self; Lane::COUNT] {
        [
            Self::zero_for(Lane::Hlos),
            Self::zero_for(Lane::Drv0),
            Self::zero_for(Lane::Drv1),
            Self::zero_for(Lane::Drv2),
        ]
    }

    /// Whether this is the DRV form
    pub const fn is_drv(&self) -> bool {
        matches!(self, Self::Drv(_))
    }

    /// Value slot selected by `level`
    pub const fn slot(&self, level: DrvLevel) -> LaneBw {
        match (self, level) {
            (Self::Hlos(bw), _) => *bw,
            (Self::Drv(v), DrvLevel::High) => v.high,
            (Self::Drv(v), DrvLevel::Low) => v.low,
        }
    }

    fn slot_mut(&mut self, level: DrvLevel) -> &mut LaneBw {
        match (self, level) {
            (Self::Hlos(bw), _) => bw,
            (Self::Drv(v), DrvLevel::High) => &mut v.high,
            (Self::Drv(v), DrvLevel::Low) => &mut v.low,
        }
    }

    fn opposite_mut(&mut self, level: DrvLevel) -> Option<&mut LaneBw> {
        match self {
            Self::Hlos(_) => None,
            Self::Drv(v) => Some(match level {
                DrvLevel::High => &mut v.low,
                DrvLevel::Low => &mut v.high,
            }),
        }
    }

    /// Set the camnoc value of one slot and clear the opposite DRV slot
    pub fn set_camnoc(&mut self, level: DrvLevel, camnoc: u64) {
        self.slot_mut(level).camnoc = camnoc;
        if let Some(other) = self.opposite_mut(level) {
            other.camnoc = 0;
        }
    }

    /// Set the mnoc values of one slot and clear the opposite DRV slot
    pub fn set_mnoc(&mut self, level: DrvLevel, ab: u64, ib: u64) {
        let slot = self.slot_mut(level);
        slot.ab = ab;
        slot.ib = ib;
        if let Some(other) = self.opposite_mut(level) {
            other.ab = 0;
            other.ib = 0;
        }
    }

    /// Camnoc bandwidth summed over both DRV slots
    pub const fn camnoc_total(&self) -> u64 {
        match self {
            Self::Hlos(bw) => bw.camnoc,
            Self::Drv(v) => v.high.camnoc + v.low.camnoc,
        }
    }

    /// Replace this node's camnoc share: remove `old / factor`, add `new / factor`
    ///
    /// Wrapping arithmetic keeps the net effect exact even if a transient
    /// subtraction crosses zero.
    pub fn fold_camnoc(&mut self, old: &Self, new: &Self, factor: u64) {
        match (self, old, new) {
            (Self::Hlos(p), Self::Hlos(o), Self::Hlos(n)) => {
                p.camnoc = fold(p.camnoc, o.camnoc / factor, n.camnoc / factor);
            },
            (Self::Drv(p), Self::Drv(o), Self::Drv(n)) => {
                p.high.camnoc = fold(p.high.camnoc, o.high.camnoc / factor, n.high.camnoc / factor);
                p.low.camnoc = fold(p.low.camnoc, o.low.camnoc / factor, n.low.camnoc / factor);
            },
            _ => log::warn!("camnoc fold across mismatched lane forms"),
        }
    }

    /// Replace this node's mnoc share: remove `old`, add `new`
    pub fn fold_mnoc(&mut self, old: &Self, new: &Self) {
        match (self, old, new) {
            (Self::Hlos(p), Self::Hlos(o), Self::Hlos(n)) => {
                p.ab = fold(p.ab, o.ab, n.ab);
                p.ib = fold(p.ib, o.ib, n.ib);
            },
            (Self::Drv(p), Self::Drv(o), Self::Drv(n)) => {
                p.high.ab = fold(p.high.ab, o.high.ab, n.high.ab);
                p.high.ib = fold(p.high.ib, o.high.ib, n.high.ib);
                p.low.ab = fold(p.low.ab, o.low.ab, n.low.ab);
                p.low.ib = fold(p.low.ib, o.low.ib, n.low.ib);
            },
            _ => log::warn!("mnoc fold across mismatched lane forms"),
        }
    }

    /// Copy with LOW mnoc traffic added into HIGH
    pub const fn with_low_folded(&self) -> Self {
        match self {
            Self::Hlos(_) => *self,
            Self::Drv(v) => {
                let mut out = *v;
                out.high.ab += v.low.ab;
                out.high.ib += v.low.ib;
                Self::Drv(out)
            },
        }
    }

    /// Whether every mnoc ab/ib value is zero
    pub const fn mnoc_is_zero(&self) -> bool {
        match self {
            Self::Hlos(bw) => bw.ab == 0 && bw.ib == 0,
            Self::Drv(v) => v.high.ab == 0 && v.high.ib == 0 && v.low.ab == 0 && v.low.ib == 0,
        }
    }

    /// Clear every ib value
    pub fn clear_ib(&mut self) {
        match self {
            Self::Hlos(bw) => bw.ib = 0,
            Self::Drv(v) => {
                v.high.ib = 0;
                v.low.ib = 0;
            },
        }
    }

    /// HLOS triple, or HIGH for the DRV form
    pub const fn primary(&self) -> LaneBw {
        self.slot(DrvLevel::High)
    }
}

#[inline]
const fn fold(acc: u64, old: u64, new: u64) -> u64 {
    acc.wrapping_sub(old).wrapping_add(new)
}

impl fmt::Display for BandwidthVote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hlos(bw) => write!(f, "ab={} ib={} camnoc={}", bw.ab, bw.ib, bw.camnoc),
            Self::Drv(v) => write!(
                f,
                "high[ab={} ib={} camnoc={}] low[ab={} ib={} camnoc={}]",
                v.high.ab, v.high.ib, v.high.camnoc, v.low.ab, v.low.ib, v.low.camnoc
            ),
        }
    }
}

// =============================================================================
// MERGE TYPE
// =============================================================================

/// How a child's camnoc contribution folds into its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MergeType {
    /// Contribution folds unchanged
    Sum            = 0,
    /// Contribution halves (two interleaved slave ports)
    SumInterleave  = 1,
}

impl MergeType {
    /// Divisor applied to a child's camnoc contribution
    pub const fn factor(self) -> u64 {
        match self {
            Self::Sum => 1,
            Self::SumInterleave => 2,
        }
    }

    /// Divisor for a raw merge type stored on a node
    pub const fn factor_of(raw: u32) -> CpasResult<u64> {
        match raw {
            0 => Ok(Self::Sum.factor()),
            1 => Ok(Self::SumInterleave.factor()),
            _ => Err(CpasError::InvalidMergeType(raw)),
        }
    }
}

// =============================================================================
// CALLER VOTES
// =============================================================================

/// Kind of apply pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyKind {
    /// First vote of a start
    Start,
    /// All-zero vote of a stop
    Stop,
    /// Per-frame update
    Update,
}

/// Transaction type index for reads
pub const TRANSACTION_READ: u32 = 0;

/// Transaction type index for writes
pub const TRANSACTION_WRITE: u32 = 1;

/// One per-path vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PathVote {
    /// Path type (raw from callers, normalized after translation)
    pub path_data_type: u32,
    /// Transaction type
    pub transac_type: u32,
    /// Camera NoC bandwidth
    pub camnoc_bw: u64,
    /// Memory NoC average bandwidth
    pub mnoc_ab_bw: u64,
    /// Memory NoC instantaneous bandwidth
    pub mnoc_ib_bw: u64,
    /// DRV sub-value targeted
    pub vote_level: DrvLevel,
}

impl PathVote {
    /// High-level vote for one path
    pub const fn new(path_data_type: u32, transac_type: u32, camnoc_bw: u64, mnoc_ab_bw: u64, mnoc_ib_bw: u64) -> Self {
        Self {
            path_data_type,
            transac_type,
            camnoc_bw,
            mnoc_ab_bw,
            mnoc_ib_bw,
            vote_level: DrvLevel::High,
        }
    }

    /// Same vote on the given DRV sub-value
    pub const fn at_level(mut self, level: DrvLevel) -> Self {
        self.vote_level = level;
        self
    }

    /// Whether every bandwidth field is zero
    pub const fn is_zero(&self) -> bool {
        self.camnoc_bw == 0 && self.mnoc_ab_bw == 0 && self.mnoc_ib_bw == 0
    }
}

/// Per-path AXI vote list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxiVote {
    /// Path entries
    pub paths: Vec<PathVote>,
}

impl AxiVote {
    /// Empty vote
    pub const fn new() -> Self {
        Self { paths: Vec::new() }
    }

    /// Vote with a single path
    pub fn single(path: PathVote) -> Self {
        let mut paths = Vec::with_capacity(1);
        paths.push(path);
        Self { paths }
    }

    /// Whether no path carries any bandwidth
    pub fn is_all_zero(&self) -> bool {
        self.paths.iter().all(PathVote::is_zero)
    }

    /// Normalize every raw path type in place
    pub fn translate(&mut self) -> CpasResult<()> {
        for path in self.paths.iter_mut() {
            path.path_data_type = translate_path_type(path.path_data_type)?;
        }
        Ok(())
    }
}

/// AHB register-bus vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AhbVote {
    /// Explicit level
    Absolute(VoteLevel),
    /// Frequency in Hz, mapped through the operating-point table
    Dynamic(u64),
}

impl AhbVote {
    /// Whether the vote asks for nothing
    pub const fn is_zero(&self) -> bool {
        match self {
            Self::Absolute(level) => matches!(level, VoteLevel::Suspend),
            Self::Dynamic(freq) => *freq == 0,
        }
    }
}

/// Normalize a raw path type into the path table
pub const fn translate_path_type(raw: u32) -> CpasResult<u32> {
    let path = if raw >= PATH_DATA_CONSO_OFFSET {
        MAX_GRAN_PATHS_PER_CLIENT + (raw % MAX_GRAN_PATHS_PER_CLIENT)
    } else {
        raw % MAX_GRAN_PATHS_PER_CLIENT
    };

    if path as usize >= PATH_DATA_MAX {
        Err(CpasError::InvalidPathType(raw))
    } else {
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_path_type() {
        assert_eq!(translate_path_type(3), Ok(3));
        assert_eq!(translate_path_type(35), Ok(3));
        assert_eq!(translate_path_type(64), Ok(32));
        assert_eq!(translate_path_type(73), Ok(41));
        assert_eq!(translate_path_type(74), Err(CpasError::InvalidPathType(74)));
    }

    #[test]
    fn test_hlos_slot_ignores_level() {
        let mut v = BandwidthVote::zero_for(Lane::Hlos);
        v.set_camnoc(DrvLevel::Low, 700);
        assert_eq!(v.slot(DrvLevel::High).camnoc, 700);
        assert_eq!(v.camnoc_total(), 700);
    }

    #[test]
    fn test_drv_high_low_exclusive() {
        let mut v = BandwidthVote::zero_for(Lane::Drv0);
        v.set_mnoc(DrvLevel::Low, 10, 20);
        v.set_camnoc(DrvLevel::Low, 30);
        v.set_mnoc(DrvLevel::High, 40, 50);
        v.set_camnoc(DrvLevel::High, 60);

        assert_eq!(v.slot(DrvLevel::High), LaneBw::new(40, 50, 60));
        assert_eq!(v.slot(DrvLevel::Low), LaneBw::ZERO);
    }

    #[test]
    fn test_low_folded_into_high() {
        let v = BandwidthVote::Drv(DrvVote {
            high: LaneBw::new(100, 200, 5),
            low: LaneBw::new(10, 20, 7),
        });
        let folded = v.with_low_folded();
        assert_eq!(folded.slot(DrvLevel::High), LaneBw::new(110, 220, 5));
        assert_eq!(folded.slot(DrvLevel::Low), LaneBw::new(10, 20, 7));
    }

    #[test]
    fn test_fold_interleave_round_trip() {
        let mut parent = BandwidthVote::Hlos(LaneBw::new(0, 0, 900));
        let zero = BandwidthVote::zero_for(Lane::Hlos);
        let set = BandwidthVote::Hlos(LaneBw::new(0, 0, 400));

        parent.fold_camnoc(&zero, &set, 2);
        assert_eq!(parent.camnoc_total(), 1100);
        parent.fold_camnoc(&set, &zero, 2);
        assert_eq!(parent.camnoc_total(), 900);
    }

    #[test]
    fn test_merge_factor() {
        assert_eq!(MergeType::factor_of(0), Ok(1));
        assert_eq!(MergeType::factor_of(1), Ok(2));
        assert_eq!(MergeType::factor_of(5), Err(CpasError::InvalidMergeType(5)));
    }

    #[test]
    fn test_ahb_zero_vote() {
        assert!(AhbVote::Absolute(VoteLevel::Suspend).is_zero());
        assert!(AhbVote::Dynamic(0).is_zero());
        assert!(!AhbVote::Absolute(VoteLevel::Svs).is_zero());
    }

    #[test]
    fn test_lane_clock_client() {
        assert_eq!(Lane::Hlos.clock_client(), ClockClient::Sw);
        assert_eq!(Lane::Drv2.clock_client(), ClockClient::Hw(2));
        assert_eq!(Lane::from_index(4), None);
    }
}
