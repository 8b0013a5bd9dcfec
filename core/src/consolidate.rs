//! # Vote Consolidation Engine
//!
//! Turns one client's per-path vote into bus, clock and priority votes.
//!
//! ## Apply Pass
//!
//! ```text
//!   paths ──▶ consolidate ──▶ resolve lanes ──▶ update leaf ──▶ fold into
//!            (aliases)       (ddr, cesta)      (skip if same)   ancestors
//!                                                                  │
//!        ┌─────────────────────────────────────────────────────────┘
//!        ▼
//!   root: port.current_bw ──▶ smart qos (if rt bw drops) ──▶ vote ports
//!                                                          ──▶ camnoc clk/bw
//!                                                          ──▶ smart qos
//! ```
//!
//! The whole pass runs under the tree lock, which is the lock around the
//! [`VoteEngine`] itself. A failing step aborts the pass and leaves the tree
//! as far as it got; nothing is rolled back.

use alloc::vec::Vec;

use cpas_hal::{ClockController, RegisterMap, VoteLevel};

use crate::camnoc::CamnocClock;
use crate::client::{Client, ClientHandle, LaneSelector};
use crate::config::{CpasConfig, CpasFeatures};
use crate::debug::{DebugSettings, DumpFlags};
use crate::error::{ConfigError, CpasError, CpasResult};
use crate::port::{BusPort, BusProvider};
use crate::smart_qos::{is_new_rt_bw_lower, SmartQos};
use crate::tree::{TreeBuild, TreeNode, TreeStore};
use crate::vote::{ApplyKind, AxiVote, BandwidthVote, DrvIndex, DrvVote, Lane, LaneBw, MergeType, PathVote};
use crate::{DEFAULT_AXI_BW, MAX_AXI_PORTS, MAX_TREE_LEVELS, PATH_DATA_MAX, TRANSACTION_MAX};

// =============================================================================
// APPLY CONTEXT
// =============================================================================

/// Per-call inputs of an apply pass
pub struct ApplyContext<'a> {
    /// Kind of pass
    pub kind: ApplyKind,
    /// Lane choice for dynamic leaves
    pub selector: LaneSelector,
    /// Some client is streaming
    pub streaming: bool,
    /// Debug snapshot for this call
    pub settings: &'a DebugSettings,
    /// CAMNOC clock controller
    pub clock: &'a mut dyn ClockController,
    /// Register windows for Smart QoS writes
    pub regs: &'a RegisterMap,
}

/// Ports touched during one pass
#[derive(Debug, Clone, Copy, Default)]
struct UpdatedPorts {
    mnoc: [bool; MAX_AXI_PORTS],
    camnoc: [bool; MAX_AXI_PORTS],
}

// =============================================================================
// VOTE ENGINE
// =============================================================================

/// Tree, ports and the derived-vote state they feed
#[derive(Debug)]
pub struct VoteEngine {
    tree: TreeStore,
    axi_ports: Vec<BusPort>,
    camnoc_ports: Vec<BusPort>,
    smart_qos: SmartQos,
    camnoc_clock: CamnocClock,
    features: CpasFeatures,
}

impl VoteEngine {
    /// Create the ports discovered by the tree build
    pub fn new(build: TreeBuild, config: &CpasConfig, provider: &mut dyn BusProvider) -> CpasResult<Self> {
        let axi_ports = BusPort::create_all(&build.axi_ports, provider)?;
        let camnoc_ports = BusPort::create_all(&build.camnoc_ports, provider)?;

        Ok(Self {
            tree: build.tree,
            axi_ports,
            camnoc_ports,
            smart_qos: SmartQos::new(build.rt_nius, config.smart_qos),
            camnoc_clock: CamnocClock::new(config.camnoc_clock),
            features: config.features,
        })
    }

    /// Node arena
    pub fn tree(&self) -> &TreeStore {
        &self.tree
    }

    /// AXI ports
    pub fn axi_ports(&self) -> &[BusPort] {
        &self.axi_ports
    }

    /// CAMNOC ports
    pub fn camnoc_ports(&self) -> &[BusPort] {
        &self.camnoc_ports
    }

    /// Smart QoS state
    pub fn smart_qos(&self) -> &SmartQos {
        &self.smart_qos
    }

    /// CAMNOC clock state
    pub fn camnoc_clock(&self) -> &CamnocClock {
        &self.camnoc_clock
    }

    /// Features in effect
    pub fn features(&self) -> CpasFeatures {
        self.features
    }

    /// Replace the features in effect
    pub fn set_features(&mut self, features: CpasFeatures) {
        self.features = features;
    }

    fn has(&self, flag: CpasFeatures) -> bool {
        self.features.contains(flag)
    }

    // -------------------------------------------------------------------------
    // Consolidation
    // -------------------------------------------------------------------------

    /// Fold paths without a direct leaf into the aggregation leaf covering them
    pub fn consolidate(&self, handle: ClientHandle, client: &Client, vote: &AxiVote) -> CpasResult<AxiVote> {
        let mut out: Vec<PathVote> = Vec::with_capacity(vote.paths.len());

        for path in vote.paths.iter() {
            let p = path.path_data_type;
            let t = path.transac_type;
            if p as usize >= PATH_DATA_MAX {
                return Err(CpasError::InvalidPathType(p));
            }
            if t as usize >= TRANSACTION_MAX {
                return Err(ConfigError::InvalidTransaction.into());
            }

            if client.leaf(p, t).is_some() {
                out.push(*path);
                continue;
            }

            let covering = (0..PATH_DATA_MAX as u32).find(|&k| {
                client
                    .leaf(k, t)
                    .and_then(|cell| self.tree.get(cell))
                    .map(|n| n.constituent_paths[p as usize])
                    .unwrap_or(false)
            });

            let Some(k) = covering else {
                log::error!(
                    "{}: no leaf covers path {} transaction {}",
                    client.display_name(),
                    p,
                    t
                );
                return Err(CpasError::PathNotFound {
                    client: handle.index() as u32,
                    path: p,
                    transaction: t,
                });
            };

            match out.iter_mut().find(|v| v.path_data_type == k && v.transac_type == t) {
                Some(entry) => {
                    entry.camnoc_bw = entry.camnoc_bw.saturating_add(path.camnoc_bw);
                    entry.mnoc_ab_bw = entry.mnoc_ab_bw.saturating_add(path.mnoc_ab_bw);
                    entry.mnoc_ib_bw = entry.mnoc_ib_bw.saturating_add(path.mnoc_ib_bw);
                },
                None => {
                    let mut entry = *path;
                    entry.path_data_type = k;
                    out.push(entry);
                },
            }
        }

        Ok(AxiVote { paths: out })
    }

    /// `(ddr, cesta)` lanes a leaf votes on
    fn resolve_lanes(&self, node: &TreeNode, selector: LaneSelector, settings: &DebugSettings) -> CpasResult<(Lane, Lane)> {
        if !self.has(CpasFeatures::DDR_DRV) || settings.force_hlos_drv {
            return Ok((Lane::Hlos, Lane::Hlos));
        }

        let lane = selector.resolve(node.drv_voting_idx).map_err(|e| {
            log::error!("leaf {} has no drv lane selected", node.name);
            e
        })?;

        if !self.has(CpasFeatures::CLK_DRV) || settings.force_cesta_sw_client {
            Ok((lane, Lane::Hlos))
        } else {
            Ok((lane, lane))
        }
    }

    // -------------------------------------------------------------------------
    // Apply
    // -------------------------------------------------------------------------

    /// Apply a client's translated vote through the tree to the hardware
    pub fn apply_client_axi_vote(
        &mut self,
        handle: ClientHandle,
        client: &mut Client,
        vote: &AxiVote,
        ctx: ApplyContext<'_>,
    ) -> CpasResult<()> {
        let mut updated = UpdatedPorts::default();

        if !client.tree_node_valid {
            self.apply_additional_bw(vote, &mut updated);
            return self.vote_ports(&updated, Lane::Hlos, None, ctx);
        }

        let consolidated = self.consolidate(handle, client, vote)?;
        client.consolidated = consolidated.clone();

        if ctx.settings.dumps(DumpFlags::TREE) {
            log::info!("{}: consolidated {} paths", client.display_name(), consolidated.paths.len());
            self.tree.dump("before client vote update");
        }

        // a stop zeroes the lane that carries the bandwidth, whatever the binding is now
        let selector = match (ctx.kind, client.voted_lane) {
            (ApplyKind::Stop, Some(lane)) => LaneSelector::Override(lane),
            _ => ctx.selector,
        };

        let mut first: Option<(Lane, Lane)> = None;
        let mut cesta_lane = Lane::Hlos;
        let mut touched = false;

        for path in consolidated.paths.iter() {
            let cell = client
                .leaf(path.path_data_type, path.transac_type)
                .ok_or(CpasError::PathNotFound {
                    client: handle.index() as u32,
                    path: path.path_data_type,
                    transaction: path.transac_type,
                })?;
            let node = self.tree.get(cell).ok_or(ConfigError::InvalidCellIndex)?;
            let (ddr, cesta) = self.resolve_lanes(node, selector, ctx.settings)?;
            if node.drv_voting_idx == DrvIndex::Dynamic {
                client.voted_lane = Some(ddr);
            }

            match first {
                None => first = Some((ddr, cesta)),
                Some(pair) if pair != (ddr, cesta) => {
                    log::warn!(
                        "{}: drv lanes differ within one vote: ddr {} vs {}, cesta {} vs {}",
                        client.display_name(),
                        pair.0,
                        ddr,
                        pair.1,
                        cesta
                    );
                    if ctx.settings.strict_lane_check {
                        return Err(CpasError::LaneMismatch);
                    }
                },
                Some(_) => {}
            }
            cesta_lane = cesta;

            let Some(old) = self.update_leaf(cell, path, ddr, cesta, ctx.kind)? else {
                continue;
            };
            touched |= self.propagate(cell, old, ddr, cesta, &mut updated)?;
        }

        if ctx.settings.dumps(DumpFlags::TREE) {
            self.tree.dump("after client vote update");
        }

        if !touched {
            log::debug!("{}: no change in bw for all paths", client.display_name());
            return Ok(());
        }

        let mut apply_qos = false;
        if self.has(CpasFeatures::SMART_QOS) {
            let rt_updated = self
                .axi_ports
                .iter()
                .enumerate()
                .any(|(i, p)| updated.mnoc[i] && p.is_rt);

            if rt_updated {
                let dump = ctx.settings.dumps(DumpFlags::SMART_QOS);
                let clk_drv = self.has(CpasFeatures::CLK_DRV);
                apply_qos = self.smart_qos.calculate(&mut self.tree, clk_drv, dump);

                if apply_qos && is_new_rt_bw_lower(&self.axi_ports) {
                    log::debug!("rt bw dropping, applying smart qos first");
                    self.smart_qos.apply(&mut self.tree, ctx.regs, dump)?;
                    apply_qos = false;
                }
            }
        }

        let regs = ctx.regs;
        let dump = ctx.settings.dumps(DumpFlags::SMART_QOS);
        self.vote_ports(&updated, cesta_lane, Some(client), ctx)?;

        if apply_qos {
            self.smart_qos.apply(&mut self.tree, regs, dump)?;
        }

        Ok(())
    }

    /// Add or remove the default floor of a tree-less client
    fn apply_additional_bw(&mut self, vote: &AxiVote, updated: &mut UpdatedPorts) {
        let first = vote.paths.first().copied().unwrap_or_default();

        for (i, port) in self.axi_ports.iter_mut().enumerate().filter(|(_, p)| !p.is_drv()) {
            port.additional_bw = if first.mnoc_ab_bw != 0 {
                port.additional_bw.saturating_add(DEFAULT_AXI_BW)
            } else {
                port.additional_bw.saturating_sub(DEFAULT_AXI_BW)
            };
            updated.mnoc[i] = true;
        }

        for (i, port) in self.camnoc_ports.iter_mut().enumerate() {
            port.additional_bw = if first.camnoc_bw != 0 {
                port.additional_bw.saturating_add(DEFAULT_AXI_BW)
            } else {
                port.additional_bw.saturating_sub(DEFAULT_AXI_BW)
            };
            updated.camnoc[i] = true;
        }
    }

    /// Store a path vote on its leaf
    ///
    /// Returns the leaf's previous `(camnoc, mnoc)` lane values, or `None`
    /// when nothing changed. A HIGH vote clears the LOW sub-value of the same
    /// lane and vice versa.
    fn update_leaf(
        &mut self,
        cell: usize,
        path: &PathVote,
        ddr: Lane,
        cesta: Lane,
        kind: ApplyKind,
    ) -> CpasResult<Option<(BandwidthVote, BandwidthVote)>> {
        let node = self.tree.get_mut(cell).ok_or(ConfigError::InvalidCellIndex)?;
        let level = path.vote_level;
        let force = kind == ApplyKind::Stop;
        let old = (node.bw_info[cesta.index()], node.bw_info[ddr.index()]);

        let camnoc_unchanged = !force && node.bw_info[cesta.index()].slot(level).camnoc == path.camnoc_bw;
        if !camnoc_unchanged {
            node.bw_info[cesta.index()].set_camnoc(level, path.camnoc_bw);
        }

        let curr = node.bw_info[ddr.index()].slot(level);
        if !force && camnoc_unchanged && curr.ab == path.mnoc_ab_bw && curr.ib == path.mnoc_ib_bw {
            return Ok(None);
        }
        node.bw_info[ddr.index()].set_mnoc(level, path.mnoc_ab_bw, path.mnoc_ib_bw);

        log::debug!(
            "leaf {} ddr {} [{}] cesta {} [{}]",
            node.name,
            ddr,
            node.bw_info[ddr.index()],
            cesta,
            node.bw_info[cesta.index()]
        );
        Ok(Some(old))
    }

    /// Fold a leaf's change into every ancestor and stage the root's ports
    ///
    /// Returns whether any parent was updated.
    fn propagate(
        &mut self,
        leaf: usize,
        old: (BandwidthVote, BandwidthVote),
        ddr: Lane,
        cesta: Lane,
        updated: &mut UpdatedPorts,
    ) -> CpasResult<bool> {
        let (mut camnoc_old, mut mnoc_old) = old;
        let mut curr = leaf;
        let mut touched = false;

        for _ in 0..MAX_TREE_LEVELS {
            let node = self.tree.get(curr).ok_or(ConfigError::InvalidCellIndex)?;
            let Some(parent) = node.parent else {
                break;
            };
            let camnoc_new = node.bw_info[cesta.index()];
            let mnoc_new = node.bw_info[ddr.index()];

            let par = self.tree.get_mut(parent).ok_or(ConfigError::UnknownParent)?;
            let par_old = (par.bw_info[cesta.index()], par.bw_info[ddr.index()]);
            let factor = MergeType::factor_of(par.merge_type).map_err(|e| {
                log::error!("node {}: {}", par.name, e);
                e
            })?;

            par.bw_info[cesta.index()].fold_camnoc(&camnoc_old, &camnoc_new, factor);
            par.bw_info[ddr.index()].fold_mnoc(&mnoc_old, &mnoc_new);
            touched = true;

            log::debug!(
                "parent {} ddr {} [{}] cesta {} [{}]",
                par.name,
                ddr,
                par.bw_info[ddr.index()],
                cesta,
                par.bw_info[cesta.index()]
            );

            if par.is_root() {
                self.stage_root_ports(parent, ddr, cesta, updated)?;
            }

            (camnoc_old, mnoc_old) = par_old;
            curr = parent;
        }

        Ok(touched)
    }

    /// Copy a root's lane values into its ports' pending votes
    fn stage_root_ports(&mut self, root: usize, ddr: Lane, cesta: Lane, updated: &mut UpdatedPorts) -> CpasResult<()> {
        let node = self.tree.get(root).ok_or(ConfigError::InvalidCellIndex)?;

        let idx = node.axi_port_idx[ddr.index()].ok_or_else(|| {
            log::error!("root {} has no axi port for lane {}", node.name, ddr);
            CpasError::InvalidPort
        })?;
        let port = self.axi_ports.get_mut(idx).ok_or(CpasError::InvalidPort)?;
        port.current_bw = node.bw_info[ddr.index()].with_low_folded();
        updated.mnoc[idx] = true;

        if self.features.contains(CpasFeatures::CONTROL_CAMNOC_AXI_CLK) {
            return Ok(());
        }

        if let Some(cidx) = node.camnoc_axi_port_idx {
            if let Some(cport) = self.camnoc_ports.get_mut(cidx) {
                let mut bw = cport.current_bw.primary();
                bw.camnoc = node.bw_info[cesta.index()].camnoc_total();
                cport.current_bw = BandwidthVote::Hlos(bw);
                updated.camnoc[cidx] = true;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Port voting
    // -------------------------------------------------------------------------

    fn vote_ports(
        &mut self,
        updated: &UpdatedPorts,
        cesta: Lane,
        client: Option<&Client>,
        ctx: ApplyContext<'_>,
    ) -> CpasResult<()> {
        let settings = ctx.settings;
        let verbose = settings.dumps(DumpFlags::DRV);

        for (i, port) in self.axi_ports.iter_mut().enumerate() {
            if !updated.mnoc[i] {
                continue;
            }
            let mut bw = port.current_bw;

            if port.is_drv() {
                if !port.ib_bw_voting_needed {
                    bw.clear_ib();
                }
                let vote = match bw {
                    BandwidthVote::Drv(v) => v,
                    BandwidthVote::Hlos(h) => DrvVote {
                        high: h,
                        low: LaneBw::ZERO,
                    },
                };
                log::debug!("port {}: drv {} streaming={}", port.name, bw, ctx.streaming);
                port.vote_drv(vote, settings)?;
                port.drive_channel(ctx.kind, verbose)?;
            } else {
                let mut hl = bw.primary();
                log::debug!(
                    "port {}: hlos ab={} ib={} additional={} streaming={}",
                    port.name,
                    hl.ab,
                    hl.ib,
                    port.additional_bw,
                    ctx.streaming
                );
                if hl.ab == 0 {
                    hl.ab = if port.additional_bw != 0 {
                        port.additional_bw
                    } else if ctx.streaming {
                        DEFAULT_AXI_BW
                    } else {
                        0
                    };
                }
                if !port.ib_bw_voting_needed {
                    hl.ib = 0;
                }
                port.vote_hlos(hl.ab, hl.ib, settings)?;
            }
        }

        if self.has(CpasFeatures::CONTROL_CAMNOC_AXI_CLK) {
            let clk_drv = self.has(CpasFeatures::CLK_DRV);
            self.camnoc_clock
                .set_rate(&self.tree, cesta, clk_drv, ctx.streaming, ctx.clock, settings, verbose)
                .map_err(|e| {
                    if let Some(c) = client {
                        log::error!("{}: camnoc axi clk failed: {}", c.display_name(), e);
                    }
                    e
                })?;
        } else {
            for (i, port) in self.camnoc_ports.iter_mut().enumerate() {
                if !updated.camnoc[i] {
                    continue;
                }
                let curr = port.current_bw.primary().camnoc;
                let bw = if curr != 0 {
                    curr
                } else if port.additional_bw != 0 {
                    port.additional_bw
                } else if ctx.streaming {
                    DEFAULT_AXI_BW
                } else {
                    0
                };
                log::debug!("camnoc port {}: bw={}", port.name, bw);
                port.vote_hlos(0, bw, settings)?;
            }
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Power transitions
    // -------------------------------------------------------------------------

    /// Vote or remove the idle floor on HLOS ports with no real vote
    pub fn apply_default_axi_vote(&mut self, enable: bool, settings: &DebugSettings) -> CpasResult<()> {
        let ib = if enable { DEFAULT_AXI_BW } else { 0 };

        for port in self.axi_ports.iter_mut().filter(|p| !p.is_drv()) {
            let curr = port.current_bw.primary();
            if curr.ab != 0 && curr.ib != 0 {
                continue;
            }
            log::debug!("port {}: default vote ab=0 ib={}", port.name, ib);
            port.vote_hlos(0, ib, settings)?;
        }
        Ok(())
    }

    /// Whether every port is back at zero after the last stop
    pub fn validate_stop_bw(&self) -> bool {
        let ddr_drv = self.has(CpasFeatures::DDR_DRV);

        for port in self.axi_ports.iter() {
            if port.is_drv() && !ddr_drv {
                continue;
            }
            if !port.applied_bw.mnoc_is_zero() {
                log::error!("port {}: nonzero applied bw after last stop: {}", port.name, port.applied_bw);
                return false;
            }
        }
        true
    }

    /// Forget the Smart QoS values written to hardware
    pub fn reset_smart_qos(&mut self) {
        self.smart_qos.reset_applied(&mut self.tree);
    }

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    /// Log applied against current values of every port
    pub fn log_vote(&self, ddr_drv: bool, ahb_level: VoteLevel) {
        for port in self.axi_ports.iter() {
            if port.is_drv() && !ddr_drv {
                continue;
            }
            log::info!(
                "axi port {} {}: applied [{}] current [{}] additional={}{}",
                port.name,
                port.lane,
                port.applied_bw,
                port.current_bw,
                port.additional_bw,
                if port.drv_channel_started { " drv-started" } else { "" }
            );
        }

        if self.has(CpasFeatures::CONTROL_CAMNOC_AXI_CLK) {
            let rates = self.camnoc_clock.applied();
            log::info!("camnoc axi clk sw={}", rates.sw_client);
            for (i, hw) in rates.hw_client.iter().enumerate() {
                log::info!("camnoc axi clk hw{}: high={} low={}", i, hw.high, hw.low);
            }
        } else {
            for port in self.camnoc_ports.iter() {
                log::info!(
                    "camnoc port {}: applied [{}] current camnoc={}",
                    port.name,
                    port.applied_bw,
                    port.current_bw.primary().camnoc
                );
            }
        }

        log::info!("ahb level {}", ahb_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientRegistry;
    use crate::config::{LeafDesc, MnocDesc, NodeDesc};
    use crate::drv::{MIN_CAMNOC_IB, MIN_MNOC_AB, MIN_MNOC_IB};
    use crate::vote::{DrvIndex, DrvLevel};
    use alloc::boxed::Box;
    use alloc::string::String;
    use alloc::sync::Arc;
    use cpas_hal::{BusClient, BusPath, ClockClient, HalResult, RscDevice};
    use spin::Mutex;

    type VoteLog = Arc<Mutex<Vec<(String, u64, u64, BusPath)>>>;

    struct Bus {
        name: String,
        log: VoteLog,
    }

    impl BusClient for Bus {
        fn update_bandwidth(&mut self, ab: u64, ib: u64, path: BusPath) -> HalResult<()> {
            self.log.lock().push((self.name.clone(), ab, ib, path));
            Ok(())
        }

        fn update_level(&mut self, _level: VoteLevel) -> HalResult<()> {
            Ok(())
        }
    }

    struct Rsc;

    impl RscDevice for Rsc {
        fn start(&mut self) -> HalResult<()> {
            Ok(())
        }

        fn stop(&mut self) -> HalResult<()> {
            Ok(())
        }

        fn channel_switch(&mut self) -> HalResult<()> {
            Ok(())
        }
    }

    struct Provider(VoteLog);

    impl BusProvider for Provider {
        fn bus_client(&mut self, name: &str) -> HalResult<Box<dyn BusClient>> {
            Ok(Box::new(Bus {
                name: String::from(name),
                log: self.0.clone(),
            }))
        }

        fn ahb_client(&mut self) -> HalResult<Box<dyn BusClient>> {
            self.bus_client("ahb")
        }

        fn rsc_device(&mut self, _drv_idx: usize) -> Option<Box<dyn RscDevice>> {
            Some(Box::new(Rsc))
        }
    }

    struct NoClock;

    impl ClockController for NoClock {
        fn set_source_rate(&mut self, _client: ClockClient, _high: u64, _low: u64) -> HalResult<()> {
            Ok(())
        }

        fn switch_channel(&mut self, _client: ClockClient, _reason: &str) -> HalResult<()> {
            Ok(())
        }

        fn set_rate_level(&mut self, _level: VoteLevel) -> HalResult<()> {
            Ok(())
        }
    }

    struct Harness {
        engine: VoteEngine,
        registry: ClientRegistry,
        log: VoteLog,
        streaming: bool,
        selector: Option<LaneSelector>,
    }

    impl Harness {
        fn new(cfg: &CpasConfig) -> Self {
            let log = VoteLog::default();
            let build = TreeStore::build(cfg).unwrap();
            let registry = ClientRegistry::new(cfg, &build.tree).unwrap();
            let engine = VoteEngine::new(build, cfg, &mut Provider(log.clone())).unwrap();
            Self {
                engine,
                registry,
                log,
                streaming: true,
                selector: None,
            }
        }

        fn apply(&mut self, client: usize, paths: &[PathVote], kind: ApplyKind) -> CpasResult<()> {
            let settings = DebugSettings::default();
            let regs = RegisterMap::new();
            let mut clock = NoClock;
            let handle = ClientHandle::from_index(client);
            let mut c = self.registry.lock(handle).unwrap();
            let ctx = ApplyContext {
                kind,
                selector: self.selector.unwrap_or(c.lane_selector),
                streaming: self.streaming,
                settings: &settings,
                clock: &mut clock,
                regs: &regs,
            };
            let vote = AxiVote {
                paths: paths.to_vec(),
            };
            self.engine.apply_client_axi_vote(handle, &mut c, &vote, ctx)
        }

        fn votes(&self) -> usize {
            self.log.lock().len()
        }
    }

    fn config() -> CpasConfig {
        CpasConfig::new(["ife0", "ipe0", "cpas-cdm0"])
            .node(
                NodeDesc::new(0, 0, "root")
                    .mnoc(MnocDesc::new(["cam_hf_0"]).rt())
                    .camnoc_port("camnoc"),
            )
            .node(NodeDesc::new(1, 1, "rt_merge").parent(0).merge(MergeType::SumInterleave))
            .node(NodeDesc::new(2, 2, "ife_pix").parent(1).leaf(LeafDesc::new("ife0", 1, 1)))
            .node(
                NodeDesc::new(3, 1, "ipe_rd")
                    .parent(0)
                    .leaf(LeafDesc::new("ipe0", 64, 0).constituents([1, 2])),
            )
    }

    fn drv_config(idx: DrvIndex) -> CpasConfig {
        CpasConfig::new(["sfe0"])
            .features(CpasFeatures::DDR_DRV)
            .node(NodeDesc::new(0, 0, "root").mnoc(MnocDesc::new(["cam_hf", "cam_hf_drv0"])))
            .node(NodeDesc::new(1, 1, "sfe_wr").parent(0).leaf(LeafDesc::new("sfe0", 0, 1).drv(idx)))
    }

    #[test]
    fn test_leaf_vote_reaches_root_port() {
        let mut h = Harness::new(&config());
        h.apply(0, &[PathVote::new(1, 1, 1000, 4000, 4000)], ApplyKind::Update)
            .unwrap();

        let tree = h.engine.tree();
        assert_eq!(tree.get(2).unwrap().bw_info[0], BandwidthVote::Hlos(LaneBw::new(4000, 4000, 1000)));
        assert_eq!(tree.get(1).unwrap().bw_info[0], BandwidthVote::Hlos(LaneBw::new(4000, 4000, 500)));
        assert_eq!(tree.get(0).unwrap().bw_info[0], BandwidthVote::Hlos(LaneBw::new(4000, 4000, 500)));

        let port = &h.engine.axi_ports()[0];
        assert_eq!(port.current_bw.primary(), LaneBw::new(4000, 4000, 500));
        assert_eq!(port.applied_bw.primary().ab, MIN_MNOC_AB);
        assert_eq!(port.applied_bw.primary().ib, MIN_MNOC_IB);

        let camnoc = &h.engine.camnoc_ports()[0];
        assert_eq!(camnoc.current_bw.primary().camnoc, 500);
        assert_eq!(camnoc.applied_bw.primary().ib, MIN_CAMNOC_IB);
    }

    #[test]
    fn test_repeat_vote_is_noop() {
        let mut h = Harness::new(&config());
        let path = PathVote::new(1, 1, 1000, 4000, 4000);
        h.apply(0, &[path], ApplyKind::Update).unwrap();
        let votes = h.votes();
        let applied = h.engine.axi_ports()[0].applied_bw;

        h.apply(0, &[path], ApplyKind::Update).unwrap();
        assert_eq!(h.votes(), votes);
        assert_eq!(h.engine.axi_ports()[0].applied_bw, applied);
    }

    #[test]
    fn test_stop_returns_ports_to_zero() {
        let mut h = Harness::new(&config());
        h.apply(0, &[PathVote::new(1, 1, 1000, 4000, 4000)], ApplyKind::Start)
            .unwrap();

        h.streaming = false;
        h.apply(0, &[PathVote::new(1, 1, 0, 0, 0)], ApplyKind::Stop).unwrap();

        for node in h.engine.tree().iter() {
            assert!(!node.has_bandwidth(), "{} kept bandwidth", node.name);
        }
        assert!(h.engine.axi_ports()[0].applied_is_zero());
        assert!(h.engine.validate_stop_bw());
    }

    #[test]
    fn test_alias_paths_sum_into_aggregate_leaf() {
        let h = Harness::new(&config());
        let handle = ClientHandle::from_index(1);
        let c = h.registry.lock(handle).unwrap();
        let vote = AxiVote {
            paths: alloc::vec![PathVote::new(1, 0, 10, 20, 30), PathVote::new(2, 0, 1, 2, 3)],
        };

        let out = h.engine.consolidate(handle, &c, &vote).unwrap();
        assert_eq!(out.paths, [PathVote::new(32, 0, 11, 22, 33)]);
    }

    #[test]
    fn test_uncovered_path_fails() {
        let mut h = Harness::new(&config());
        let res = h.apply(1, &[PathVote::new(5, 0, 1, 1, 1)], ApplyKind::Update);
        assert_eq!(
            res,
            Err(CpasError::PathNotFound {
                client: 1,
                path: 5,
                transaction: 0
            })
        );
    }

    #[test]
    fn test_treeless_client_votes_additional_bw() {
        let mut h = Harness::new(&config());
        h.apply(2, &[PathVote::new(0, 0, 1, 1, 1)], ApplyKind::Start).unwrap();
        assert_eq!(h.engine.axi_ports()[0].additional_bw, DEFAULT_AXI_BW);
        assert_eq!(h.engine.camnoc_ports()[0].additional_bw, DEFAULT_AXI_BW);
        assert_eq!(h.engine.axi_ports()[0].applied_bw.primary().ab, MIN_MNOC_AB);

        h.apply(2, &[PathVote::new(0, 0, 0, 0, 0)], ApplyKind::Stop).unwrap();
        assert_eq!(h.engine.axi_ports()[0].additional_bw, 0);
        assert_eq!(h.engine.camnoc_ports()[0].additional_bw, 0);
    }

    #[test]
    fn test_invalid_merge_type_aborts() {
        let cfg = CpasConfig::new(["ife0"])
            .node(NodeDesc::new(0, 0, "root").mnoc(MnocDesc::new(["cam_hf_0"])))
            .node(NodeDesc::new(1, 1, "bad").parent(0).merge_raw(7))
            .node(NodeDesc::new(2, 2, "leaf").parent(1).leaf(LeafDesc::new("ife0", 0, 0)));
        let mut h = Harness::new(&cfg);
        let res = h.apply(0, &[PathVote::new(0, 0, 1, 1, 1)], ApplyKind::Update);
        assert_eq!(res, Err(CpasError::InvalidMergeType(7)));
    }

    #[test]
    fn test_drv_low_vote_folds_into_high_at_port() {
        let mut h = Harness::new(&drv_config(DrvIndex::Fixed(Lane::Drv0)));
        let path = PathVote::new(0, 1, 500, 3_000_000, 3_000_000).at_level(DrvLevel::Low);
        h.apply(0, &[path], ApplyKind::Start).unwrap();

        let leaf = h.engine.tree().get(1).unwrap();
        assert_eq!(leaf.bw_info[1].slot(DrvLevel::Low).ab, 3_000_000);
        assert_eq!(leaf.bw_info[1].slot(DrvLevel::High), LaneBw::ZERO);

        let port = &h.engine.axi_ports()[1];
        assert!(port.drv_channel_started);
        assert_eq!(port.current_bw.slot(DrvLevel::High).ab, 3_000_000);
        assert_eq!(port.current_bw.slot(DrvLevel::Low).ab, 3_000_000);

        let log = h.log.lock();
        assert!(log.iter().any(|v| v.0 == "cam_hf_drv0" && v.3 == BusPath::DrvLow));
        assert!(!log.iter().any(|v| v.0 == "cam_hf"));
    }

    #[test]
    fn test_dynamic_lane_needs_selection() {
        let mut h = Harness::new(&drv_config(DrvIndex::Dynamic));
        let path = PathVote::new(0, 1, 0, 3_000_000, 3_000_000);
        assert_eq!(
            h.apply(0, &[path], ApplyKind::Update),
            Err(CpasError::UnresolvedDynamicLane)
        );

        h.selector = Some(LaneSelector::Override(Lane::Drv0));
        h.apply(0, &[path], ApplyKind::Update).unwrap();
        assert_eq!(h.engine.tree().get(1).unwrap().bw_info[1].slot(DrvLevel::High).ab, 3_000_000);
    }

    #[test]
    fn test_stop_zeroes_last_voted_lane_after_release() {
        let mut h = Harness::new(&drv_config(DrvIndex::Dynamic));
        h.selector = Some(LaneSelector::Override(Lane::Drv0));
        let path = PathVote::new(0, 1, 0, 3_000_000, 3_000_000);
        h.apply(0, &[path], ApplyKind::Start).unwrap();
        assert_eq!(
            h.registry.lock(ClientHandle::from_index(0)).unwrap().voted_lane,
            Some(Lane::Drv0)
        );

        h.selector = None;
        assert_eq!(
            h.apply(0, &[path], ApplyKind::Update),
            Err(CpasError::UnresolvedDynamicLane)
        );

        let zero = PathVote::new(0, 1, 0, 0, 0).at_level(DrvLevel::Low);
        h.apply(0, &[zero], ApplyKind::Stop).unwrap();
        assert_eq!(h.engine.tree().get(1).unwrap().bw_info[1], BandwidthVote::zero_for(Lane::Drv0));
        assert_eq!(h.engine.tree().get(0).unwrap().bw_info[1], BandwidthVote::zero_for(Lane::Drv0));
    }

    #[test]
    fn test_default_vote_and_stop_validation() {
        let mut h = Harness::new(&config());
        let settings = DebugSettings::default();

        h.engine.apply_default_axi_vote(true, &settings).unwrap();
        assert_eq!(h.engine.axi_ports()[0].applied_bw.primary().ib, MIN_MNOC_IB);
        assert!(!h.engine.validate_stop_bw());

        h.engine.apply_default_axi_vote(false, &settings).unwrap();
        assert!(h.engine.validate_stop_bw());
    }
}
