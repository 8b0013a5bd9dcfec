//! # Static Configuration
//!
//! Plain data describing the client table, the voting tree and the feature
//! set of one CPAS instance. The platform builds a [`CpasConfig`] once and
//! hands it to [`crate::CpasDevice::probe`].
//!
//! ## Node Roles
//!
//! | Field        | Meaning                                             |
//! |--------------|-----------------------------------------------------|
//! | `mnoc`       | root node voting on one AXI port per lane           |
//! | `camnoc_port`| node voting on a CAMNOC port (bus-voted CAMNOC only) |
//! | `leaf`       | leaf owned by one client path                       |
//! | `rt_wr_niu`  | level-1 real-time write NIU under Smart QoS          |

use alloc::string::String;
use alloc::vec::Vec;

use bitflags::bitflags;
use cpas_hal::VoteLevel;

use crate::smart_qos::SmartQosTunables;
use crate::vote::{DrvIndex, MergeType};
use crate::MAX_TREE_LEVELS;

// =============================================================================
// FEATURES
// =============================================================================

bitflags! {
    /// Platform feature switches
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CpasFeatures: u32 {
        /// Memory NoC votes use DRV lanes
        const DDR_DRV                  = 1 << 0;
        /// CAMNOC clock votes use hardware CESTA clients
        const CLK_DRV                  = 1 << 1;
        /// Smart QoS priority recalculation
        const SMART_QOS                = 1 << 2;
        /// CAMNOC is clocked rather than bus-voted
        const CONTROL_CAMNOC_AXI_CLK   = 1 << 3;
        /// AHB bus scaling is not voted
        const AHB_BUS_SCALING_DISABLE  = 1 << 4;
        /// Bus clients are interconnect (ICC) paths
        const BUS_ICC                  = 1 << 5;
    }
}

// =============================================================================
// NODE DESCRIPTIONS
// =============================================================================

/// AXI port description carried by a root node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MnocDesc {
    /// One interconnect name per lane, HLOS first
    pub interconnects: Vec<String>,
    /// Whether IB values are voted at all
    pub ib_bw_voting_needed: bool,
    /// Whether the port carries real-time traffic
    pub rt: bool,
}

impl MnocDesc {
    /// Port description from interconnect names
    pub fn new<S: Into<String>>(interconnects: impl IntoIterator<Item = S>) -> Self {
        Self {
            interconnects: interconnects.into_iter().map(Into::into).collect(),
            ib_bw_voting_needed: true,
            rt: false,
        }
    }

    /// Mark as a real-time port
    pub fn rt(mut self) -> Self {
        self.rt = true;
        self
    }

    /// Set whether IB is voted
    pub fn ib_voting(mut self, needed: bool) -> Self {
        self.ib_bw_voting_needed = needed;
        self
    }
}

/// Leaf description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafDesc {
    /// Owning client name
    pub client: String,
    /// Raw path type
    pub path_data_type: u32,
    /// Transaction type
    pub transaction: u32,
    /// Raw path types aggregated by this leaf
    pub constituent_paths: Vec<u32>,
    /// Lane this leaf votes on
    pub drv_voting_idx: DrvIndex,
}

impl LeafDesc {
    /// Leaf for one client path
    pub fn new(client: impl Into<String>, path_data_type: u32, transaction: u32) -> Self {
        Self {
            client: client.into(),
            path_data_type,
            transaction,
            constituent_paths: Vec::new(),
            drv_voting_idx: DrvIndex::default(),
        }
    }

    /// Raw paths this leaf aggregates
    pub fn constituents(mut self, paths: impl IntoIterator<Item = u32>) -> Self {
        self.constituent_paths = paths.into_iter().collect();
        self
    }

    /// Lane this leaf votes on
    pub fn drv(mut self, idx: DrvIndex) -> Self {
        self.drv_voting_idx = idx;
        self
    }
}

/// Real-time write NIU description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NiuDesc {
    /// Priority LUT low register offset in the RT CAMNOC window
    pub priority_lut_low_offset: u32,
    /// Priority LUT high register offset in the RT CAMNOC window
    pub priority_lut_high_offset: u32,
    /// NIU buffer size in KB
    pub niu_size: u64,
}

/// One tree node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDesc {
    /// Dense node identity
    pub cell_index: usize,
    /// Depth, 0 for the root
    pub level: usize,
    /// Node name
    pub name: String,
    /// Parent cell index
    pub parent: Option<usize>,
    /// Raw merge type
    pub merge_type: u32,
    /// Camnoc multiplier for clock-rate derivation
    pub bus_width_factor: u64,
    /// AXI ports of a root node
    pub mnoc: Option<MnocDesc>,
    /// CAMNOC port name
    pub camnoc_port: Option<String>,
    /// Leaf role
    pub leaf: Option<LeafDesc>,
    /// Smart QoS role
    pub rt_wr_niu: Option<NiuDesc>,
}

impl NodeDesc {
    /// Node with defaults (SUM, factor 1, no roles)
    pub fn new(cell_index: usize, level: usize, name: impl Into<String>) -> Self {
        Self {
            cell_index,
            level,
            name: name.into(),
            parent: None,
            merge_type: MergeType::Sum as u32,
            bus_width_factor: 1,
            mnoc: None,
            camnoc_port: None,
            leaf: None,
            rt_wr_niu: None,
        }
    }

    /// Attach to a parent
    pub fn parent(mut self, cell_index: usize) -> Self {
        self.parent = Some(cell_index);
        self
    }

    /// Set the merge type
    pub fn merge(mut self, merge: MergeType) -> Self {
        self.merge_type = merge as u32;
        self
    }

    /// Set a raw merge type
    pub fn merge_raw(mut self, raw: u32) -> Self {
        self.merge_type = raw;
        self
    }

    /// Set the bus width factor
    pub fn bus_width_factor(mut self, factor: u64) -> Self {
        self.bus_width_factor = factor;
        self
    }

    /// Make this node vote on AXI ports
    pub fn mnoc(mut self, mnoc: MnocDesc) -> Self {
        self.mnoc = Some(mnoc);
        self
    }

    /// Make this node vote on a CAMNOC port
    pub fn camnoc_port(mut self, name: impl Into<String>) -> Self {
        self.camnoc_port = Some(name.into());
        self
    }

    /// Make this node a client leaf
    pub fn leaf(mut self, leaf: LeafDesc) -> Self {
        self.leaf = Some(leaf);
        self
    }

    /// Put this node under Smart QoS
    pub fn rt_wr_niu(mut self, niu: NiuDesc) -> Self {
        self.rt_wr_niu = Some(niu);
        self
    }
}

// =============================================================================
// DEVICE CONFIGURATION
// =============================================================================

/// CAMNOC clock derivation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CamnocClockConfig {
    /// CAMNOC bus width in bytes
    pub bus_width: u64,
    /// Margin added to the max bandwidth, in percent
    pub margin_pct: u64,
    /// Floor bandwidth for the HLOS clock vote
    pub min_ib_bw: u64,
}

impl Default for CamnocClockConfig {
    fn default() -> Self {
        Self {
            bus_width: 32,
            margin_pct: 0,
            min_ib_bw: 0,
        }
    }
}

/// VDD corner to AHB level mapping entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VddAhbEntry {
    /// Voltage corner
    pub vdd_corner: u32,
    /// AHB level voted at that corner
    pub ahb_level: VoteLevel,
}

/// Fuse feature entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuseEntry {
    /// Feature identifier
    pub feature_id: u32,
    /// Fuse value read at probe
    pub value: u32,
    /// Whether the feature is enabled by the fuse
    pub enabled: bool,
}

/// Complete configuration of one CPAS instance
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpasConfig {
    /// Client names, index equals client handle
    pub clients: Vec<String>,
    /// Register names are `identifier` + `cell_index`
    pub client_id_based: bool,
    /// Tree nodes
    pub nodes: Vec<NodeDesc>,
    /// Per-level CAMNOC max-needed flags
    pub camnoc_max_needed: [bool; MAX_TREE_LEVELS],
    /// Feature switches
    pub features: CpasFeatures,
    /// CAMNOC clock parameters
    pub camnoc_clock: CamnocClockConfig,
    /// Smart QoS tunables
    pub smart_qos: SmartQosTunables,
    /// VDD corner table
    pub vdd_ahb: Vec<VddAhbEntry>,
    /// Fuse entries
    pub fuses: Vec<FuseEntry>,
}

impl CpasConfig {
    /// Empty configuration with the given client names
    pub fn new<S: Into<String>>(clients: impl IntoIterator<Item = S>) -> Self {
        Self {
            clients: clients.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add a node
    pub fn node(mut self, node: NodeDesc) -> Self {
        self.nodes.push(node);
        self
    }

    /// Set the feature switches
    pub fn features(mut self, features: CpasFeatures) -> Self {
        self.features = features;
        self
    }

    /// AHB level for a voltage corner
    ///
    /// Falls back to `Turbo` when the corner is absent.
    pub fn ahb_level_for_corner(&self, corner: u32) -> VoteLevel {
        self.vdd_ahb
            .iter()
            .find(|e| e.vdd_corner == corner)
            .map(|e| e.ahb_level)
            .unwrap_or(VoteLevel::Turbo)
    }

    /// Whether the feature set includes `flag`
    pub fn has(&self, flag: CpasFeatures) -> bool {
        self.features.contains(flag)
    }
}
