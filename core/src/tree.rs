//! # Tree Node Store
//!
//! Arena of voting-tree nodes keyed by cell index. Parents are stored as
//! cell indices, so upward walks are plain index chasing and the "no
//! cycles" property is checked by bounded-hop traversal at build time.
//!
//! ```text
//!   level 0            [root: AXI/CAMNOC ports]
//!                       ▲               ▲
//!   level 1        [rt_wr niu]      [nrt merge]
//!                   ▲      ▲             ▲
//!   level 2..    [leaf]  [leaf]        [leaf]   ◀── client paths
//! ```

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::config::{CpasConfig, CpasFeatures, NiuDesc, NodeDesc};
use crate::error::{ConfigError, CpasResult};
use crate::vote::{translate_path_type, BandwidthVote, DrvIndex, Lane};
use crate::{MAX_AXI_PORTS, MAX_RT_WR_NIU_NODES, MAX_TREE_LEVELS, MAX_TREE_NODES, PATH_DATA_MAX, TRANSACTION_MAX};

// =============================================================================
// TREE NODE
// =============================================================================

/// Smart QoS state of a real-time write NIU node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NiuState {
    /// NIU buffer size in KB
    pub niu_size: u64,
    /// Priority LUT low register offset
    pub lut_low_offset: u32,
    /// Priority LUT high register offset
    pub lut_high_offset: u32,
    /// Last computed low word
    pub curr_priority_low: u32,
    /// Last computed high word
    pub curr_priority_high: u32,
    /// Low word last written to hardware
    pub applied_priority_low: u32,
    /// High word last written to hardware
    pub applied_priority_high: u32,
}

impl From<NiuDesc> for NiuState {
    fn from(desc: NiuDesc) -> Self {
        Self {
            niu_size: desc.niu_size,
            lut_low_offset: desc.priority_lut_low_offset,
            lut_high_offset: desc.priority_lut_high_offset,
            ..Self::default()
        }
    }
}

/// Client path a leaf stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafInfo {
    /// Owning client index
    pub client: usize,
    /// Normalized path type
    pub path_data_type: u32,
    /// Transaction type
    pub transaction: u32,
}

/// One voting-tree node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    /// Stable identity
    pub cell_index: usize,
    /// Depth, 0 at the root
    pub level: usize,
    /// Node name
    pub name: String,
    /// Parent cell index
    pub parent: Option<usize>,
    /// Raw merge type, validated during propagation
    pub merge_type: u32,
    /// Camnoc multiplier for clock-rate derivation
    pub bus_width_factor: u64,
    /// Participates in the CAMNOC clock max pass
    pub camnoc_max_needed: bool,
    /// AXI port per lane
    pub axi_port_idx: [Option<usize>; Lane::COUNT],
    /// CAMNOC port
    pub camnoc_axi_port_idx: Option<usize>,
    /// Normalized raw paths aggregated by this leaf
    pub constituent_paths: [bool; PATH_DATA_MAX],
    /// Client path, for leaves
    pub leaf: Option<LeafInfo>,
    /// Lane this leaf votes on
    pub drv_voting_idx: DrvIndex,
    /// Per-lane bandwidth
    pub bw_info: [BandwidthVote; Lane::COUNT],
    /// Smart QoS state
    pub niu: Option<NiuState>,
}

impl TreeNode {
    fn from_desc(desc: &NodeDesc, camnoc_max_needed: bool) -> Self {
        Self {
            cell_index: desc.cell_index,
            level: desc.level,
            name: desc.name.clone(),
            parent: desc.parent,
            merge_type: desc.merge_type,
            bus_width_factor: desc.bus_width_factor.max(1),
            camnoc_max_needed,
            axi_port_idx: [None; Lane::COUNT],
            camnoc_axi_port_idx: None,
            constituent_paths: [false; PATH_DATA_MAX],
            leaf: None,
            drv_voting_idx: DrvIndex::default(),
            bw_info: BandwidthVote::zero_lanes(),
            niu: None,
        }
    }

    /// Whether this node has no parent
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Whether any lane holds bandwidth
    pub fn has_bandwidth(&self) -> bool {
        self.bw_info
            .iter()
            .zip(Lane::ALL)
            .any(|(bw, lane)| *bw != BandwidthVote::zero_for(lane))
    }

    /// Camnoc bandwidth summed over every lane
    pub fn camnoc_all_lanes(&self, include_drv: bool) -> u64 {
        self.bw_info
            .iter()
            .enumerate()
            .filter(|(lane, _)| include_drv || *lane == Lane::Hlos.index())
            .map(|(_, bw)| bw.camnoc_total())
            .sum()
    }
}

// =============================================================================
// PORT SPECS
// =============================================================================

/// Port domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// Memory NoC (AXI) port
    Mnoc,
    /// Camera NoC port
    Camnoc,
}

/// Port discovered while building the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    /// Interconnect name
    pub name: String,
    /// Domain
    pub kind: PortKind,
    /// Lane the port carries
    pub lane: Lane,
    /// Real-time traffic
    pub rt: bool,
    /// Whether IB values are voted
    pub ib_bw_voting_needed: bool,
}

/// Result of building the tree from a configuration
#[derive(Debug)]
pub struct TreeBuild {
    /// Node arena
    pub tree: TreeStore,
    /// AXI ports in index order
    pub axi_ports: Vec<PortSpec>,
    /// CAMNOC ports in index order
    pub camnoc_ports: Vec<PortSpec>,
    /// Cell indices of Smart QoS NIU nodes
    pub rt_nius: Vec<usize>,
}

// =============================================================================
// TREE STORE
// =============================================================================

/// Node arena keyed by cell index
#[derive(Debug, Clone, Default)]
pub struct TreeStore {
    nodes: Vec<Option<TreeNode>>,
}

impl TreeStore {
    /// Build and validate the tree described by `config`
    pub fn build(config: &CpasConfig) -> CpasResult<TreeBuild> {
        let ddr_drv = config.has(CpasFeatures::DDR_DRV);
        let camnoc_clocked = config.has(CpasFeatures::CONTROL_CAMNOC_AXI_CLK);
        let smart_qos = config.has(CpasFeatures::SMART_QOS);

        let mut store = TreeStore {
            nodes: vec![None; MAX_TREE_NODES],
        };
        let mut axi_ports: Vec<PortSpec> = Vec::new();
        let mut camnoc_ports: Vec<PortSpec> = Vec::new();
        let mut rt_nius = Vec::new();

        let mut order: Vec<&NodeDesc> = config.nodes.iter().collect();
        order.sort_by(|a, b| b.level.cmp(&a.level));

        for desc in order {
            if desc.level >= MAX_TREE_LEVELS {
                return Err(ConfigError::InvalidLevel.into());
            }
            if desc.cell_index >= MAX_TREE_NODES {
                return Err(ConfigError::InvalidCellIndex.into());
            }
            if store.nodes[desc.cell_index].is_some() {
                return Err(ConfigError::DuplicateCellIndex.into());
            }

            let mut node = TreeNode::from_desc(desc, config.camnoc_max_needed[desc.level]);

            if let Some(mnoc) = &desc.mnoc {
                for (lane_idx, name) in mnoc.interconnects.iter().enumerate() {
                    if !ddr_drv && lane_idx > 0 {
                        break;
                    }
                    let lane = Lane::from_index(lane_idx).ok_or(ConfigError::TooManyPorts)?;
                    let idx = port_index(
                        &mut axi_ports,
                        PortSpec {
                            name: name.clone(),
                            kind: PortKind::Mnoc,
                            lane,
                            rt: mnoc.rt,
                            ib_bw_voting_needed: mnoc.ib_bw_voting_needed,
                        },
                    )?;
                    node.axi_port_idx[lane_idx] = Some(idx);
                }
            }

            if let (Some(name), false) = (&desc.camnoc_port, camnoc_clocked) {
                let idx = port_index(
                    &mut camnoc_ports,
                    PortSpec {
                        name: name.clone(),
                        kind: PortKind::Camnoc,
                        lane: Lane::Hlos,
                        rt: false,
                        ib_bw_voting_needed: true,
                    },
                )?;
                node.camnoc_axi_port_idx = Some(idx);
            }

            if let Some(leaf) = &desc.leaf {
                let path = translate_path_type(leaf.path_data_type)
                    .map_err(|_| ConfigError::InvalidPathType)?;
                if leaf.transaction as usize >= TRANSACTION_MAX {
                    return Err(ConfigError::InvalidTransaction.into());
                }
                let client = config
                    .clients
                    .iter()
                    .position(|c| *c == leaf.client)
                    .ok_or(ConfigError::UnknownClientName)?;

                for raw in leaf.constituent_paths.iter() {
                    let p = translate_path_type(*raw).map_err(|_| ConfigError::InvalidPathType)?;
                    node.constituent_paths[p as usize] = true;
                }

                node.leaf = Some(LeafInfo {
                    client,
                    path_data_type: path,
                    transaction: leaf.transaction,
                });
                if ddr_drv {
                    node.drv_voting_idx = leaf.drv_voting_idx;
                }
            }

            if let (Some(niu), true) = (desc.rt_wr_niu, smart_qos) {
                if desc.level == 1 {
                    if niu.niu_size == 0 {
                        return Err(ConfigError::InvalidNiuSize.into());
                    }
                    if rt_nius.len() >= MAX_RT_WR_NIU_NODES {
                        return Err(ConfigError::TooManyNius.into());
                    }
                    node.niu = Some(NiuState::from(niu));
                    rt_nius.push(desc.cell_index);
                }
            }

            store.nodes[desc.cell_index] = Some(node);
        }

        store.check_acyclic()?;
        store.link_parents()?;
        store.check_drv_lanes()?;

        log::debug!(
            "tree built: {} nodes, {} axi ports, {} camnoc ports, {} rt nius",
            store.len(),
            axi_ports.len(),
            camnoc_ports.len(),
            rt_nius.len()
        );

        Ok(TreeBuild {
            tree: store,
            axi_ports,
            camnoc_ports,
            rt_nius,
        })
    }

    fn link_parents(&self) -> CpasResult<()> {
        for node in self.iter() {
            if let Some(parent) = node.parent {
                let p = self.get(parent).ok_or(ConfigError::UnknownParent)?;
                if p.level >= node.level {
                    return Err(ConfigError::InvalidLevel.into());
                }
            }
        }
        Ok(())
    }

    /// Every node reaches a root within `MAX_TREE_LEVELS` hops
    fn check_acyclic(&self) -> CpasResult<()> {
        for node in self.iter() {
            let mut curr = node;
            let mut hops = 0;
            while let Some(parent) = curr.parent {
                hops += 1;
                if hops > MAX_TREE_LEVELS {
                    log::error!("node {} does not reach a root", node.name);
                    return Err(ConfigError::CyclicTree.into());
                }
                curr = self.get(parent).ok_or(ConfigError::UnknownParent)?;
            }
        }
        Ok(())
    }

    /// Leaves bound to a fixed DRV lane must reach a port for that lane
    fn check_drv_lanes(&self) -> CpasResult<()> {
        for node in self.iter().filter(|n| n.leaf.is_some()) {
            if let DrvIndex::Fixed(lane) = node.drv_voting_idx {
                if lane.is_drv() && self.root_of(node.cell_index).and_then(|r| r.axi_port_idx[lane.index()]).is_none() {
                    log::error!("leaf {} votes on {} with no port for it", node.name, lane);
                    return Err(ConfigError::DrvNotSupported.into());
                }
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    /// Node by cell index
    pub fn get(&self, cell_index: usize) -> Option<&TreeNode> {
        self.nodes.get(cell_index).and_then(Option::as_ref)
    }

    /// Mutable node by cell index
    pub fn get_mut(&mut self, cell_index: usize) -> Option<&mut TreeNode> {
        self.nodes.get_mut(cell_index).and_then(Option::as_mut)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nodes in cell-index order
    pub fn iter(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.iter().filter_map(Option::as_ref)
    }

    /// Mutable nodes in cell-index order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TreeNode> {
        self.nodes.iter_mut().filter_map(Option::as_mut)
    }

    /// Leaves owned by `client`
    pub fn for_each_leaf_with_client(&self, client: usize) -> impl Iterator<Item = &TreeNode> {
        self.iter()
            .filter(move |n| n.leaf.map(|l| l.client == client).unwrap_or(false))
    }

    /// The node followed by its ancestors up to the root
    pub fn walk_to_root(&self, cell_index: usize) -> WalkToRoot<'_> {
        WalkToRoot {
            store: self,
            next: Some(cell_index),
            remaining: MAX_TREE_LEVELS + 1,
        }
    }

    /// Root reached from `cell_index`
    pub fn root_of(&self, cell_index: usize) -> Option<&TreeNode> {
        self.walk_to_root(cell_index).last()
    }

    /// Clear every lane of every node
    pub fn reset_votes(&mut self) {
        for node in self.iter_mut() {
            node.bw_info = BandwidthVote::zero_lanes();
        }
    }

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    /// Log every node holding bandwidth
    pub fn dump(&self, tag: &str) {
        log::info!("tree state [{}]", tag);
        for node in self.iter().filter(|n| n.has_bandwidth()) {
            for (bw, lane) in node.bw_info.iter().zip(Lane::ALL) {
                if *bw == BandwidthVote::zero_for(lane) {
                    continue;
                }
                log::info!(
                    "  [{}] {} lvl={} lane={} {}",
                    node.cell_index,
                    node.name,
                    node.level,
                    lane,
                    bw
                );
            }
        }
    }
}

fn port_index(ports: &mut Vec<PortSpec>, spec: PortSpec) -> CpasResult<usize> {
    if let Some(idx) = ports.iter().position(|p| p.name == spec.name) {
        return Ok(idx);
    }
    if ports.len() >= MAX_AXI_PORTS {
        return Err(ConfigError::TooManyPorts.into());
    }
    ports.push(spec);
    Ok(ports.len() - 1)
}

// =============================================================================
// WALK ITERATOR
// =============================================================================

/// Leaf-first walk to the root
///
/// Finite by construction: yields at most `MAX_TREE_LEVELS + 1` nodes.
#[derive(Debug, Clone)]
pub struct WalkToRoot<'a> {
    store: &'a TreeStore,
    next: Option<usize>,
    remaining: usize,
}

impl<'a> Iterator for WalkToRoot<'a> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let node = self.store.get(self.next?)?;
        self.next = node.parent;
        Some(node)
    }
}
