//! # CPAS Device
//!
//! Client lifecycle on top of the vote engine.
//!
//! ```text
//!              register            start               stop           unregister
//!  Unregistered ───────▶ Registered ────▶ Started ────────────▶ Registered ───────▶ Unregistered
//!                                          │  ▲
//!                                          └──┘ update_axi_vote / update_ahb_vote
//! ```
//!
//! ## Power Sequencing
//!
//! The first client to start powers the block up; the last one to stop
//! powers it down:
//!
//! | Step | First start                     | Last stop                        |
//! |------|---------------------------------|----------------------------------|
//! | 1    | default AXI floor               | power-off hook (flush)           |
//! | 2    | SoC access = 1, resources on    | Q-channel handshake off          |
//! | 3    | Q-channel handshake on          | irq off, drain SoC access        |
//! | 4    | power-on hook (QoS)             | handshake retry, resources off   |
//! | 5    | reset Smart QoS shadows         | remove default floor, check zero |
//!
//! Handshake and drain timeouts never abort either sequence.
//!
//! ## Locking
//!
//! Every public operation takes the hardware mutex, then the client mutex.
//! The engine (tree lock), the AHB bus and the clock controller are taken
//! inside, in that order, and never held across each other.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use cpas_hal::{ClockController, HalError, Platform, RegBase, RegisterMap, VoteLevel};
use spin::{Mutex, MutexGuard, RwLock};
use static_assertions::assert_impl_all;

use crate::client::{Client, ClientHandle, ClientRegistry, ClientState, LaneSelector};
use crate::config::{CpasConfig, CpasFeatures, FuseEntry};
use crate::consolidate::{ApplyContext, VoteEngine};
use crate::cpastop::{CpasTop, POLL_DELAY_US, POLL_RETRY_CNT};
use crate::debug::{DebugSettings, DumpFlags};
use crate::error::{CpasError, CpasResult, TeardownResult};
use crate::monitor::{Monitor, MonitorEntry};
use crate::port::{AhbBus, BusProvider};
use crate::profile::QosSelection;
use crate::tree::TreeStore;
use crate::vote::{AhbVote, ApplyKind, AxiVote, DrvIndex, Lane, PathVote};
use crate::API_PATH_DATA_STD_START;

/// SoC access drain bound on the last stop, in polls of [`POLL_DELAY_US`]
const SOC_ACCESS_DRAIN_RETRIES: u32 = 50;

// =============================================================================
// Resources and State
// =============================================================================

/// External collaborators handed to [`CpasDevice::probe`]
pub struct CpasResources {
    /// Bus client and RSC factory
    pub provider: Box<dyn BusProvider>,
    /// Clock controller
    pub clock: Box<dyn ClockController>,
    /// Platform hooks
    pub platform: Box<dyn Platform>,
    /// Register windows
    pub regs: RegisterMap,
}

impl fmt::Debug for CpasResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpasResources").field("regs", &self.regs).finish()
    }
}

/// Power state of the shared block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HwPowerState {
    /// Resources off
    #[default]
    PowerDown,
    /// Resources on, registers accessible
    PowerUp,
}

/// Static hardware facts reported to clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitiesSnapshot {
    /// Titan family (480, 880, ...)
    pub camera_family: u32,
    /// Raw camera version triple
    pub camera_version: (u32, u32, u32),
    /// Raw CPAS version triple
    pub cpas_version: (u32, u32, u32),
    /// Capability register values
    pub capabilities: Vec<u32>,
    /// Fuse entries
    pub fuses: Vec<FuseEntry>,
}

/// State under the hardware mutex
#[derive(Debug)]
struct HwState {
    streamon: u32,
    registered: u32,
    power: HwPowerState,
}

// =============================================================================
// Device
// =============================================================================

/// One CPAS instance
pub struct CpasDevice {
    config: CpasConfig,
    hw: Mutex<HwState>,
    registry: ClientRegistry,
    engine: Mutex<VoteEngine>,
    ahb: Mutex<AhbBus>,
    clock: Mutex<Box<dyn ClockController>>,
    platform: Box<dyn Platform>,
    regs: RegisterMap,
    top: RwLock<CpasTop>,
    debug: RwLock<DebugSettings>,
    monitor: Monitor,
    caps: CapabilitiesSnapshot,
}

assert_impl_all!(CpasDevice: Send, Sync);

impl fmt::Debug for CpasDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpasDevice")
            .field("registry", &self.registry)
            .field("regs", &self.regs)
            .field("caps", &self.caps)
            .finish()
    }
}

impl CpasDevice {
    /// Build the tree, the ports and the client table, then read the
    /// hardware version and capabilities
    pub fn probe(config: CpasConfig, resources: CpasResources) -> CpasResult<Self> {
        let CpasResources {
            mut provider,
            clock,
            platform,
            regs,
        } = resources;

        let build = TreeStore::build(&config)?;
        let registry = ClientRegistry::new(&config, &build.tree)?;
        let engine = VoteEngine::new(build, &config, provider.as_mut())?;
        let ahb = AhbBus::new(provider.ahb_client().map_err(|e| {
            log::error!("ahb bus client unavailable: {}", e);
            e
        })?);

        let top = read_top(&regs, platform.as_ref())?;
        let profile = top.profile();
        let caps = CapabilitiesSnapshot {
            camera_family: profile.titan.family(),
            camera_version: (
                profile.version.camera.major,
                profile.version.camera.minor,
                profile.version.camera.incr,
            ),
            cpas_version: (
                profile.version.cpas.major,
                profile.version.cpas.minor,
                profile.version.cpas.incr,
            ),
            capabilities: top.capabilities().to_vec(),
            fuses: config.fuses.clone(),
        };

        log::info!(
            "cpas probed: {} clients, {} nodes, titan {}, features {:?}",
            registry.len(),
            engine.tree().len(),
            caps.camera_family,
            config.features
        );

        Ok(Self {
            config,
            hw: Mutex::new(HwState {
                streamon: 0,
                registered: 0,
                power: HwPowerState::PowerDown,
            }),
            registry,
            engine: Mutex::new(engine),
            ahb: Mutex::new(ahb),
            clock: Mutex::new(clock),
            platform,
            regs,
            top: RwLock::new(top),
            debug: RwLock::new(DebugSettings::default()),
            monitor: Monitor::new(),
            caps,
        })
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Register a client by identifier and cell index
    pub fn register_client(&self, identifier: &str, cell_index: u32) -> CpasResult<ClientHandle> {
        let handle = self
            .registry
            .lookup(identifier, cell_index, self.config.client_id_based)?;

        let mut hw = self.hw.lock();
        let mut client = self.registry.lock(handle)?;
        client.register(identifier, cell_index).map_err(|e| {
            log::error!("register {}[{}]: {}", identifier, cell_index, e);
            e
        })?;
        hw.registered += 1;

        log::debug!(
            "registered {} as {}, registered clients={}",
            client.display_name(),
            handle,
            hw.registered
        );
        Ok(handle)
    }

    /// Release a registered, stopped client
    pub fn unregister_client(&self, handle: ClientHandle) -> CpasResult<()> {
        let mut hw = self.hw.lock();
        let mut client = self.registry.lock(handle)?;
        client.unregister().map_err(|e| {
            log::error!("unregister {}: {}", client.display_name(), e);
            e
        })?;
        hw.registered = hw.registered.saturating_sub(1);

        log::debug!(
            "unregistered {}, registered clients={}",
            client.display_name(),
            hw.registered
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Start / Stop
    // -------------------------------------------------------------------------

    /// Start a registered client with its first votes
    pub fn start(&self, handle: ClientHandle, ahb: AhbVote, axi: &AxiVote) -> CpasResult<()> {
        if ahb.is_zero() {
            log::error!("{}: start with zero ahb vote", handle);
            return Err(CpasError::ZeroStartVote);
        }
        if axi.paths.is_empty() || axi.is_all_zero() {
            log::error!("{}: start with zero axi vote", handle);
            return Err(CpasError::ZeroStartVote);
        }

        let settings = self.debug.read().clone();
        let mut hw = self.hw.lock();
        let mut client = self.registry.lock(handle)?;

        if !client.registered {
            log::error!("{}: start while not registered", handle);
            return Err(CpasError::NotRegistered);
        }
        if client.started {
            log::error!("{}: already started", client.display_name());
            return Err(CpasError::StillStarted);
        }

        log::debug!(
            "start {}: ahb {:?}, {} paths, streamon clients={}",
            client.display_name(),
            ahb,
            axi.paths.len(),
            hw.streamon
        );

        let applied = self
            .apply_ahb_vote(&hw, handle, ahb)?
            .unwrap_or(VoteLevel::LowSvsD1);

        if let Err(e) = self.start_locked(&mut hw, handle, &mut client, axi, applied, &settings) {
            log::error!("start {} failed: {}", client.display_name(), e);
            if let Err(r) = self.apply_ahb_vote(&hw, handle, AhbVote::Absolute(VoteLevel::Suspend)) {
                log::error!("{}: removing ahb vote failed: {}", client.display_name(), r);
            }
            return Err(e);
        }

        client.started = true;
        hw.streamon += 1;

        if hw.streamon == 1 && settings.dumps(DumpFlags::DRV) {
            let engine = self.engine.lock();
            engine.log_vote(engine.features().contains(CpasFeatures::DDR_DRV), self.ahb.lock().level());
            engine.tree().dump("start first client");
        }

        log::debug!("started {}, streamon clients={}", client.display_name(), hw.streamon);
        self.record("CPAS_START", Some(handle));
        Ok(())
    }

    fn start_locked(
        &self,
        hw: &mut HwState,
        handle: ClientHandle,
        client: &mut Client,
        axi: &AxiVote,
        applied: VoteLevel,
        settings: &DebugSettings,
    ) -> CpasResult<()> {
        let vote = self.start_vote(client, axi)?;

        if hw.streamon == 0 {
            self.power_up(hw, applied, settings)?;
        }

        // DRV channel switches need the clocks enabled above
        self.apply_axi(handle, client, &vote, ApplyKind::Start, hw.streamon > 0, settings)
    }

    /// Translated start vote, expanded to every leaf when asked to
    fn start_vote(&self, client: &Client, axi: &AxiVote) -> CpasResult<AxiVote> {
        match axi.paths.first() {
            Some(first) if first.path_data_type == API_PATH_DATA_STD_START => {
                let engine = self.engine.lock();
                Ok(client.vote_all_paths(first, |cell| is_drv_leaf(engine.tree(), cell)))
            },
            _ => {
                let mut vote = axi.clone();
                vote.translate()?;
                Ok(vote)
            },
        }
    }

    fn power_up(&self, hw: &mut HwState, applied: VoteLevel, settings: &DebugSettings) -> CpasResult<()> {
        let mut features = self.config.features;
        if settings.force_hlos_drv {
            features.remove(CpasFeatures::DDR_DRV | CpasFeatures::CLK_DRV);
        }
        if settings.force_cesta_sw_client {
            features.remove(CpasFeatures::CLK_DRV);
        }

        {
            let mut engine = self.engine.lock();
            engine.set_features(features);
            if settings.dumps(DumpFlags::DRV) {
                log::info!(
                    "drv enable [ddr clk]: [{} {}]",
                    features.contains(CpasFeatures::DDR_DRV),
                    features.contains(CpasFeatures::CLK_DRV)
                );
            }
            engine.apply_default_axi_vote(true, settings)?;
        }

        self.regs.grant_access();
        if let Err(e) = self.platform.enable_resources(applied) {
            self.regs.revoke_access();
            log::error!("enable resources at {} failed: {}", applied, e);
            return Err(e.into());
        }

        {
            let top = self.top.read();
            let platform = self.platform.as_ref();
            if let Err(e) = top.qchannel_handshake(&self.regs, platform, true, false) {
                log::warn!("qchannel handshake failed: {}", e);
                if let Err(e) = top.qchannel_handshake(&self.regs, platform, true, true) {
                    log::error!("forced qchannel handshake failed, hw blocks may not work: {}", e);
                }
            }

            if let Err(e) = top.power_on(&self.regs) {
                self.regs.revoke_access();
                if let Err(d) = platform.disable_resources() {
                    log::error!("disable resources after failed power on: {}", d);
                }
                log::error!("power on settings failed: {}", e);
                return Err(e);
            }
        }

        if features.contains(CpasFeatures::SMART_QOS) {
            self.engine.lock().reset_smart_qos();
        }

        hw.power = HwPowerState::PowerUp;
        log::debug!("cpas powered up, soc access count={}", self.regs.soc_access_count());
        Ok(())
    }

    /// Stop a started client
    ///
    /// The zero vote for every mapped leaf is built here, so callers pass
    /// none. Dynamic leaves are zeroed on the lane they last voted on even
    /// if the binding was released since.
    ///
    /// Once the zero vote is applied the client is stopped; later teardown
    /// failures are reported in the returned [`TeardownResult`].
    pub fn stop(&self, handle: ClientHandle) -> CpasResult<TeardownResult> {
        let settings = self.debug.read().clone();
        let mut hw = self.hw.lock();
        let mut client = self.registry.lock(handle)?;

        if !client.started {
            log::error!("{}: stop while not started", client.display_name());
            return Err(CpasError::NotStarted);
        }

        let vote = {
            let engine = self.engine.lock();
            client.vote_all_paths(&PathVote::default(), |cell| is_drv_leaf(engine.tree(), cell))
        };
        self.apply_axi(handle, &mut client, &vote, ApplyKind::Stop, hw.streamon > 0, &settings)?;

        client.started = false;
        client.voted_lane = None;

        if hw.streamon == 1 && settings.dumps(DumpFlags::DRV) {
            let engine = self.engine.lock();
            engine.log_vote(engine.features().contains(CpasFeatures::DDR_DRV), self.ahb.lock().level());
            engine.tree().dump("stop last client");
        }

        hw.streamon = hw.streamon.saturating_sub(1);

        let mut td = TeardownResult::clean();
        if hw.streamon == 0 {
            self.power_down(&mut hw, &settings, &mut td);
        }

        td.check(
            "ahb suspend",
            self.apply_ahb_vote(&hw, handle, AhbVote::Absolute(VoteLevel::Suspend)),
        );

        log::debug!(
            "stopped {}, streamon clients={}, {} teardown errors",
            client.display_name(),
            hw.streamon,
            td.errors.len()
        );
        self.record("CPAS_STOP", Some(handle));
        Ok(td)
    }

    fn power_down(&self, hw: &mut HwState, settings: &DebugSettings, td: &mut TeardownResult) {
        let platform = self.platform.as_ref();
        let top = self.top.read();

        if let Err(e) = top.power_off(&self.regs, platform) {
            log::error!("power off settings failed: {}", e);
        }

        let retry_idle = td
            .check("qchannel off", top.qchannel_handshake(&self.regs, platform, false, false))
            .is_none();

        platform.disable_irq();

        self.regs.revoke_access();
        td.check(
            "soc access drain",
            self.regs.drain(platform, SOC_ACCESS_DRAIN_RETRIES, POLL_DELAY_US),
        );

        if retry_idle {
            // the count is zero after the drain
            let guard = self.regs.hold_access();
            td.check(
                "qchannel off retry",
                top.qchannel_handshake(guard.map(), platform, false, false),
            );
        }

        td.check("disable resources", platform.disable_resources());

        {
            let mut engine = self.engine.lock();
            td.check("default axi vote off", engine.apply_default_axi_vote(false, settings));
            if !engine.validate_stop_bw() {
                log::error!("invalid applied bw at stop");
            }
        }

        hw.power = HwPowerState::PowerDown;
        log::debug!("cpas powered down, soc access count={}", self.regs.soc_access_count());
    }

    // -------------------------------------------------------------------------
    // Votes
    // -------------------------------------------------------------------------

    /// Replace a started client's AXI vote
    pub fn update_axi_vote(&self, handle: ClientHandle, axi: &AxiVote) -> CpasResult<()> {
        let settings = self.debug.read().clone();
        let hw = self.hw.lock();
        let mut client = self.registry.lock(handle)?;

        if !client.started {
            log::error!("{}: axi update while not started", client.display_name());
            return Err(CpasError::NotStarted);
        }

        let mut vote = axi.clone();
        vote.translate().map_err(|e| {
            log::error!("{}: unable to translate paths: {}", client.display_name(), e);
            e
        })?;

        let res = self.apply_axi(handle, &mut client, &vote, ApplyKind::Update, hw.streamon > 0, &settings);
        self.record("CPAS AXI post-update", Some(handle));
        res
    }

    /// Replace a started client's AHB vote
    ///
    /// A zero vote is raised to LOWSVS_D1.
    pub fn update_ahb_vote(&self, handle: ClientHandle, ahb: AhbVote) -> CpasResult<()> {
        let ahb = if ahb.is_zero() {
            log::debug!("{}: zero ahb vote", handle);
            AhbVote::Absolute(VoteLevel::LowSvsD1)
        } else {
            ahb
        };

        let hw = self.hw.lock();
        let client = self.registry.lock(handle)?;
        if !client.started {
            log::error!("{}: ahb update while not started", client.display_name());
            return Err(CpasError::NotStarted);
        }

        self.apply_ahb_vote(&hw, handle, ahb).map(|_| ())
    }

    fn apply_axi(
        &self,
        handle: ClientHandle,
        client: &mut Client,
        vote: &AxiVote,
        kind: ApplyKind,
        streaming: bool,
        settings: &DebugSettings,
    ) -> CpasResult<()> {
        let mut engine = self.engine.lock();
        let mut clock = self.clock.lock();
        let ctx = ApplyContext {
            kind,
            selector: client.lane_selector,
            streaming,
            settings,
            clock: clock.as_mut(),
            regs: &self.regs,
        };
        engine.apply_client_axi_vote(handle, client, vote, ctx)
    }

    /// Aggregate AHB levels and vote the highest
    ///
    /// Returns the level voted, or `None` when nothing had to change.
    fn apply_ahb_vote(&self, hw: &HwState, handle: ClientHandle, vote: AhbVote) -> CpasResult<Option<VoteLevel>> {
        let required = match vote {
            AhbVote::Absolute(level) => level,
            AhbVote::Dynamic(freq) => self.ahb_level_for_freq(freq),
        };

        if self.registry.ahb_level(handle) == required {
            return Ok(None);
        }

        let mut ahb = self.ahb.lock();
        self.registry.set_ahb_level(handle, required);
        if required == ahb.level() {
            return Ok(None);
        }

        let highest = required.max(self.registry.max_ahb_level());
        log::debug!("{}: ahb required {} highest {}", handle, required, highest);

        if !self.config.has(CpasFeatures::AHB_BUS_SCALING_DISABLE) {
            ahb.vote(highest)?;
        }

        if hw.streamon > 0 {
            self.clock.lock().set_rate_level(highest).map_err(|e| {
                log::error!("ahb clock rate level {} failed: {}", highest, e);
                e
            })?;
        }

        Ok(Some(highest))
    }

    fn ahb_level_for_freq(&self, freq: u64) -> VoteLevel {
        match self.platform.opp_corner(freq) {
            Some(corner) => {
                let level = self.config.ahb_level_for_corner(corner);
                log::debug!("ahb freq {} corner {} level {}", freq, corner, level);
                level
            },
            None => {
                log::warn!("no operating point for ahb freq {}, using {}", freq, VoteLevel::Turbo);
                VoteLevel::Turbo
            },
        }
    }

    // -------------------------------------------------------------------------
    // Dynamic DRV lanes
    // -------------------------------------------------------------------------

    /// Bind or release the DRV lane of `sfe<sfe_idx>` for CSID `csid_idx`
    pub fn csid_input_core_info_update(&self, csid_idx: usize, sfe_idx: usize, set_port: bool) -> CpasResult<()> {
        if !self.config.has(CpasFeatures::DDR_DRV) || self.debug.read().force_hlos_drv {
            return Ok(());
        }

        let name = alloc::format!("sfe{}", sfe_idx);
        let Some(idx) = self.registry.index_of(&name) else {
            log::error!("client {} not in client table", name);
            return Err(CpasError::UnknownClient);
        };

        let _hw = self.hw.lock();
        let mut client = self.registry.lock(ClientHandle::from_index(idx))?;
        if !client.is_drv_dynamic {
            return Ok(());
        }

        let selector = if set_port {
            let lane = Lane::from_index(csid_idx + 1).ok_or(CpasError::InvalidPort)?;
            LaneSelector::Override(lane)
        } else {
            LaneSelector::Static
        };

        // moving a streaming client would strand its bandwidth on the old lane
        if let (true, LaneSelector::Override(lane), Some(voted)) = (client.started, selector, client.voted_lane) {
            if lane != voted {
                log::error!("{}: rebind from {} to {} while started", name, voted, lane);
                return Err(CpasError::StillStarted);
            }
        }

        client.lane_selector = selector;
        log::debug!("{}: lane selector {:?} for csid {}", name, client.lane_selector, csid_idx);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Hardware access
    // -------------------------------------------------------------------------

    /// Capabilities read at probe
    pub fn get_hw_capabilities(&self) -> CapabilitiesSnapshot {
        self.caps.clone()
    }

    /// Switch the QoS set applied at the next power-up
    pub fn select_qos(&self, mask: QosSelection) -> CpasResult<()> {
        let hw = self.hw.lock();
        if hw.power == HwPowerState::PowerUp {
            log::error!("qos selection while powered up");
            return Err(CpasError::PoweredUp);
        }
        self.top.write().profile_mut().select_qos(mask)
    }

    /// Read a register, refused while the SoC is powered down
    pub fn register_read(&self, base: RegBase, offset: u32) -> CpasResult<u32> {
        let guard = self.regs.access().ok_or(HalError::AccessDenied)?;
        Ok(guard.map().read(base, offset)?)
    }

    /// Write a register, refused while the SoC is powered down
    pub fn register_write(&self, base: RegBase, offset: u32, value: u32, barrier: bool) -> CpasResult<()> {
        let guard = self.regs.access().ok_or(HalError::AccessDenied)?;
        Ok(guard.map().write(base, offset, value, barrier)?)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Replace the debug settings
    pub fn set_debug_settings(&self, settings: DebugSettings) {
        *self.debug.write() = settings;
    }

    /// Current debug settings
    pub fn debug_settings(&self) -> DebugSettings {
        self.debug.read().clone()
    }

    /// Power state of the shared block
    pub fn power_state(&self) -> HwPowerState {
        self.hw.lock().power
    }

    /// Number of started clients
    pub fn streamon_clients(&self) -> u32 {
        self.hw.lock().streamon
    }

    /// Number of registered clients
    pub fn registered_clients(&self) -> u32 {
        self.hw.lock().registered
    }

    /// Lifecycle state of a client
    pub fn client_state(&self, handle: ClientHandle) -> CpasResult<ClientState> {
        Ok(self.registry.lock(handle)?.state())
    }

    /// Client table
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Lock the vote engine for inspection
    pub fn engine(&self) -> MutexGuard<'_, VoteEngine> {
        self.engine.lock()
    }

    /// Vote history
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// AHB level currently voted
    pub fn ahb_level(&self) -> VoteLevel {
        self.ahb.lock().level()
    }

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    fn record(&self, tag: &'static str, client: Option<ClientHandle>) {
        let ahb_level = self.ahb.lock().level();
        let engine = self.engine.lock();
        let top = self.top.read();
        let entry = MonitorEntry::capture(
            self.platform.timestamp_ns(),
            tag,
            client,
            &engine,
            &top,
            &self.regs,
            ahb_level,
        );
        self.monitor.push(entry);
    }

    /// Log applied against current votes of every port
    pub fn log_vote(&self) {
        let ahb_level = self.ahb.lock().level();
        let engine = self.engine.lock();
        let ddr_drv = engine.features().contains(CpasFeatures::DDR_DRV);
        engine.log_vote(ddr_drv, ahb_level);
    }

    /// Log tree state, votes, monitor history and live registers
    ///
    /// Register reads are skipped while the SoC is powered down.
    pub fn dump_state(&self, tag: &str) -> CpasResult<()> {
        log::info!("cpas state dump: {}", tag);
        let ahb_level = self.ahb.lock().level();

        let (axi_names, camnoc_names) = {
            let engine = self.engine.lock();
            engine.tree().dump(tag);
            engine.log_vote(engine.features().contains(CpasFeatures::DDR_DRV), ahb_level);
            engine.smart_qos().log_registers(engine.tree(), &self.regs);

            let axi: Vec<_> = engine.axi_ports().iter().map(|p| p.name.clone()).collect();
            let camnoc: Vec<_> = engine.camnoc_ports().iter().map(|p| p.name.clone()).collect();
            (axi, camnoc)
        };

        let axi: Vec<&str> = axi_names.iter().map(|s| s.as_str()).collect();
        let camnoc: Vec<&str> = camnoc_names.iter().map(|s| s.as_str()).collect();
        self.monitor.dump(&axi, &camnoc);

        let top = self.top.read();
        top.log_qos(&self.regs);
        for f in top.fill_levels(&self.regs).iter() {
            log::info!("fill level {}: queue={} max={}", f.port, f.queue_len(), f.max_fill());
        }
        Ok(())
    }
}

fn is_drv_leaf(tree: &TreeStore, cell: usize) -> bool {
    tree.get(cell)
        .is_some_and(|n| n.drv_voting_idx != DrvIndex::Fixed(Lane::Hlos))
}

/// Power the block long enough to read version and capabilities
fn read_top(regs: &RegisterMap, platform: &dyn Platform) -> CpasResult<CpasTop> {
    platform.enable_resources(VoteLevel::LowSvsD1).map_err(|e| {
        log::error!("enable resources for probe failed: {}", e);
        e
    })?;
    regs.grant_access();

    let top = CpasTop::init(regs);

    regs.revoke_access();
    if let Err(e) = regs.drain(platform, POLL_RETRY_CNT, POLL_DELAY_US) {
        log::warn!("soc access drain after probe: {}", e);
    }
    if let Err(e) = platform.disable_resources() {
        log::error!("disable resources after probe failed: {}", e);
    }
    top
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LeafDesc, MnocDesc, NodeDesc};
    use alloc::string::String;
    use alloc::sync::Arc;
    use alloc::vec;
    use cpas_hal::{BusClient, BusPath, ClockClient, HalResult, RegisterIo, RscDevice};

    #[derive(Default)]
    struct Calls {
        bus: Vec<(String, u64, u64, BusPath)>,
        ahb: Vec<VoteLevel>,
        platform: Vec<&'static str>,
        clock_levels: Vec<VoteLevel>,
    }

    type Shared = Arc<Mutex<Calls>>;

    struct Bus {
        name: String,
        calls: Shared,
    }

    impl BusClient for Bus {
        fn update_bandwidth(&mut self, ab: u64, ib: u64, path: BusPath) -> HalResult<()> {
            self.calls.lock().bus.push((self.name.clone(), ab, ib, path));
            Ok(())
        }

        fn update_level(&mut self, level: VoteLevel) -> HalResult<()> {
            self.calls.lock().ahb.push(level);
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

    struct Provider(Shared);

    impl BusProvider for Provider {
        fn bus_client(&mut self, name: &str) -> HalResult<Box<dyn cpas_hal::BusClient>> {
            Ok(Box::new(Bus {
                name: String::from(name),
                calls: self.0.clone(),
            }))
        }
        fn ahb_client(&mut self) -> HalResult<Box<dyn cpas_hal::BusClient>> {
            self.bus_client("ahb")
        }
        fn rsc_device(&mut self, _drv_idx: usize) -> Option<Box<dyn RscDevice>> {
            Some(Box::new(Rsc))
        }
    }

    struct Clock(Shared);

    impl ClockController for Clock {
        fn set_source_rate(&mut self, _client: ClockClient, _high: u64, _low: u64) -> HalResult<()> {
            Ok(())
        }
        fn switch_channel(&mut self, _client: ClockClient, _reason: &str) -> HalResult<()> {
            Ok(())
        }
        fn set_rate_level(&mut self, level: VoteLevel) -> HalResult<()> {
            self.0.lock().clock_levels.push(level);
            Ok(())
        }
    }

    struct Plat(Shared);

    impl Platform for Plat {
        fn enable_resources(&self, _level: VoteLevel) -> HalResult<()> {
            self.0.lock().platform.push("enable");
            Ok(())
        }
        fn disable_resources(&self) -> HalResult<()> {
            self.0.lock().platform.push("disable");
            Ok(())
        }
        fn disable_irq(&self) {
            self.0.lock().platform.push("irq off");
        }
        fn timestamp_ns(&self) -> u64 {
            42
        }
        fn delay_us(&self, _us: u32) {}
    }

    /// CPASTOP window of a Titan 480; the Q-channel status follows its control
    struct Top(Mutex<Vec<u32>>);

    impl RegisterIo for Top {
        fn size(&self) -> u32 {
            (self.0.lock().len() * 4) as u32
        }
        fn read32(&self, offset: u32) -> u32 {
            self.0.lock()[(offset / 4) as usize]
        }
        fn write32(&self, offset: u32, value: u32) {
            let mut w = self.0.lock();
            w[(offset / 4) as usize] = value;
            if offset == 0x14 {
                w[0x18 / 4] = value & 0x1;
            }
        }
    }

    struct Noc;

    impl RegisterIo for Noc {
        fn size(&self) -> u32 {
            0x1000
        }
        fn read32(&self, _offset: u32) -> u32 {
            0
        }
        fn write32(&self, _offset: u32, _value: u32) {}
    }

    fn device() -> (CpasDevice, Shared) {
        let calls = Shared::default();
        let mut top = vec![0u32; 0x40];
        top[0] = 0x0004_0800;
        top[1] = 0x1000_0000;
        top[0x8 / 4] = 0x77;
        top[0x18 / 4] = 0x1;

        let regs = RegisterMap::new()
            .with(RegBase::CpasTop, Box::new(Top(Mutex::new(top))))
            .with(RegBase::Camnoc, Box::new(Noc));

        let cfg = CpasConfig::new(["ife0", "ipe0"])
            .node(
                NodeDesc::new(0, 0, "root")
                    .mnoc(MnocDesc::new(["cam_hf_0"]).rt())
                    .camnoc_port("camnoc"),
            )
            .node(NodeDesc::new(1, 1, "ife_wr").parent(0).leaf(LeafDesc::new("ife0", 1, 1)))
            .node(NodeDesc::new(2, 1, "ipe_rd").parent(0).leaf(LeafDesc::new("ipe0", 1, 0)));

        let res = CpasResources {
            provider: Box::new(Provider(calls.clone())),
            clock: Box::new(Clock(calls.clone())),
            platform: Box::new(Plat(calls.clone())),
            regs,
        };
        (CpasDevice::probe(cfg, res).unwrap(), calls)
    }

    fn vote(ab: u64) -> AxiVote {
        AxiVote::single(PathVote::new(1, 1, ab, ab, ab))
    }

    #[test]
    fn test_probe_reads_capabilities() {
        let (dev, calls) = device();
        let caps = dev.get_hw_capabilities();
        assert_eq!(caps.camera_family, 480);
        assert_eq!(caps.camera_version, (4, 8, 0));
        assert_eq!(caps.capabilities, [0x77]);
        assert_eq!(calls.lock().platform, ["enable", "disable"]);
        assert_eq!(dev.power_state(), HwPowerState::PowerDown);
        assert!(!dev.regs.is_accessible());
    }

    #[test]
    fn test_register_lifecycle_errors() {
        let (dev, _) = device();
        assert_eq!(dev.register_client("bps", 0), Err(CpasError::UnknownClient));

        let h = dev.register_client("ife0", 0).unwrap();
        assert_eq!(dev.register_client("ife0", 0), Err(CpasError::AlreadyRegistered));
        assert_eq!(dev.registered_clients(), 1);

        dev.unregister_client(h).unwrap();
        assert_eq!(dev.unregister_client(h), Err(CpasError::NotRegistered));
        assert_eq!(dev.registered_clients(), 0);
    }

    #[test]
    fn test_start_rejects_zero_votes() {
        let (dev, _) = device();
        let h = dev.register_client("ife0", 0).unwrap();

        assert_eq!(
            dev.start(h, AhbVote::Absolute(VoteLevel::Suspend), &vote(100)),
            Err(CpasError::ZeroStartVote)
        );
        assert_eq!(
            dev.start(h, AhbVote::Absolute(VoteLevel::Svs), &vote(0)),
            Err(CpasError::ZeroStartVote)
        );
        assert_eq!(dev.client_state(h), Ok(ClientState::Registered));
    }

    #[test]
    fn test_start_stop_power_sequence() {
        let (dev, calls) = device();
        let h = dev.register_client("ife0", 0).unwrap();

        dev.start(h, AhbVote::Absolute(VoteLevel::Svs), &vote(4_000_000)).unwrap();
        assert_eq!(dev.power_state(), HwPowerState::PowerUp);
        assert_eq!(dev.streamon_clients(), 1);
        assert_eq!(dev.ahb_level(), VoteLevel::Svs);
        assert!(dev.regs.is_accessible());
        assert_eq!(dev.client_state(h), Ok(ClientState::Started));
        assert_eq!(dev.unregister_client(h), Err(CpasError::StillStarted));

        let td = dev.stop(h).unwrap();
        assert!(td.is_clean(), "{:?}", td.errors);
        assert_eq!(dev.power_state(), HwPowerState::PowerDown);
        assert_eq!(dev.ahb_level(), VoteLevel::Suspend);
        assert!(!dev.regs.is_accessible());
        assert!(dev.engine().axi_ports()[0].applied_is_zero());

        assert_eq!(
            calls.lock().platform,
            ["enable", "disable", "enable", "irq off", "disable"]
        );
        assert_eq!(dev.stop(h), Err(CpasError::NotStarted));
        assert_eq!(dev.monitor().len(), 2);
    }

    #[test]
    fn test_updates_require_started() {
        let (dev, _) = device();
        let h = dev.register_client("ife0", 0).unwrap();
        assert_eq!(dev.update_axi_vote(h, &vote(10)), Err(CpasError::NotStarted));
        assert_eq!(
            dev.update_ahb_vote(h, AhbVote::Absolute(VoteLevel::Svs)),
            Err(CpasError::NotStarted)
        );
    }

    #[test]
    fn test_ahb_aggregates_highest() {
        let (dev, calls) = device();
        let a = dev.register_client("ife0", 0).unwrap();
        let b = dev.register_client("ipe0", 0).unwrap();

        dev.start(a, AhbVote::Absolute(VoteLevel::Svs), &vote(4_000_000)).unwrap();
        dev.start(b, AhbVote::Absolute(VoteLevel::Nominal), &AxiVote::single(PathVote::new(1, 0, 5, 5, 5)))
            .unwrap();
        assert_eq!(dev.ahb_level(), VoteLevel::Nominal);

        dev.update_ahb_vote(b, AhbVote::Absolute(VoteLevel::Suspend)).unwrap();
        assert_eq!(dev.ahb_level(), VoteLevel::Svs);

        // unknown operating point falls back to the top level
        dev.update_ahb_vote(a, AhbVote::Dynamic(300_000_000)).unwrap();
        assert_eq!(dev.ahb_level(), VoteLevel::Turbo);
        assert_eq!(calls.lock().clock_levels.last(), Some(&VoteLevel::Turbo));
    }

    #[test]
    fn test_select_qos_only_while_powered_down() {
        let (dev, _) = device();
        dev.select_qos(QosSelection::CUSTOM).unwrap();

        let h = dev.register_client("ife0", 0).unwrap();
        dev.start(h, AhbVote::Absolute(VoteLevel::Svs), &vote(4_000_000)).unwrap();
        assert_eq!(dev.select_qos(QosSelection::DEFAULT), Err(CpasError::PoweredUp));
    }

    #[test]
    fn test_register_access_gated() {
        let (dev, _) = device();
        assert_eq!(
            dev.register_read(RegBase::CpasTop, 0x0),
            Err(CpasError::Hal(HalError::AccessDenied))
        );

        let h = dev.register_client("ife0", 0).unwrap();
        dev.start(h, AhbVote::Absolute(VoteLevel::Svs), &vote(4_000_000)).unwrap();
        assert_eq!(dev.register_read(RegBase::CpasTop, 0x0), Ok(0x0004_0800));
        dev.register_write(RegBase::CpasTop, 0x20, 5, true).unwrap();
        assert_eq!(dev.register_read(RegBase::CpasTop, 0x20), Ok(5));
    }
}
