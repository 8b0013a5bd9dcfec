//! # Bus Ports
//!
//! Physical bus-scaling endpoints the tree ultimately drives: AXI (MNOC)
//! ports, CAMNOC ports and the AHB register bus. Each port owns its external
//! [`BusClient`] behind its own lock, taken only around the bus write.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use cpas_hal::{BusClient, HalResult, RscDevice, VoteLevel};
use spin::Mutex;
use static_assertions::assert_impl_all;

use crate::debug::DebugSettings;
use crate::drv;
use crate::error::{ConfigError, CpasResult};
use crate::tree::{PortKind, PortSpec};
use crate::vote::{BandwidthVote, DrvVote, Lane, LaneBw};

// =============================================================================
// PROVIDER
// =============================================================================

/// Factory for the external collaborators behind ports
pub trait BusProvider {
    /// Bus client for a named interconnect path
    fn bus_client(&mut self, name: &str) -> HalResult<Box<dyn BusClient>>;

    /// Bus client for the AHB register bus
    fn ahb_client(&mut self) -> HalResult<Box<dyn BusClient>>;

    /// Resource state coordinator for DRV lane `drv_idx` (0-based)
    fn rsc_device(&mut self, drv_idx: usize) -> Option<Box<dyn RscDevice>>;
}

// =============================================================================
// BUS PORT
// =============================================================================

/// One AXI or CAMNOC port
pub struct BusPort {
    /// Interconnect name
    pub name: String,
    /// Domain
    pub kind: PortKind,
    /// Lane carried by this port
    pub lane: Lane,
    /// Real-time traffic
    pub is_rt: bool,
    /// Whether IB values are voted
    pub ib_bw_voting_needed: bool,
    /// Consolidated value, not yet applied
    pub current_bw: BandwidthVote,
    /// Value last sent to the bus client
    pub applied_bw: BandwidthVote,
    /// Floor added for tree-less clients
    pub additional_bw: u64,
    /// DRV channel active
    pub drv_channel_started: bool,
    bus: Mutex<Box<dyn BusClient>>,
    rsc: Option<Mutex<Box<dyn RscDevice>>>,
}

assert_impl_all!(BusPort: Send, Sync);

impl fmt::Debug for BusPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusPort")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("lane", &self.lane)
            .field("current_bw", &self.current_bw)
            .field("applied_bw", &self.applied_bw)
            .field("additional_bw", &self.additional_bw)
            .field("drv_channel_started", &self.drv_channel_started)
            .finish()
    }
}

impl BusPort {
    /// Create a port from its spec
    pub fn new(spec: &PortSpec, bus: Box<dyn BusClient>, rsc: Option<Box<dyn RscDevice>>) -> CpasResult<Self> {
        if spec.lane.is_drv() && rsc.is_none() {
            log::error!("drv port {} has no rsc device", spec.name);
            return Err(ConfigError::MissingRscDevice.into());
        }

        Ok(Self {
            name: spec.name.clone(),
            kind: spec.kind,
            lane: spec.lane,
            is_rt: spec.rt,
            ib_bw_voting_needed: spec.ib_bw_voting_needed,
            current_bw: BandwidthVote::zero_for(spec.lane),
            applied_bw: BandwidthVote::zero_for(spec.lane),
            additional_bw: 0,
            drv_channel_started: false,
            bus: Mutex::new(bus),
            rsc: rsc.map(Mutex::new),
        })
    }

    /// Create every port in `specs`
    pub fn create_all(specs: &[PortSpec], provider: &mut dyn BusProvider) -> CpasResult<Vec<Self>> {
        specs
            .iter()
            .map(|spec| {
                let bus = provider.bus_client(&spec.name)?;
                let rsc = if spec.lane.is_drv() {
                    provider.rsc_device(spec.lane.index() - 1)
                } else {
                    None
                };
                Self::new(spec, bus, rsc)
            })
            .collect()
    }

    /// Whether this port carries a DRV lane
    pub fn is_drv(&self) -> bool {
        self.lane.is_drv()
    }

    /// Vote `(ab, ib)` on the HLOS path
    pub fn vote_hlos(&mut self, ab: u64, ib: u64, settings: &DebugSettings) -> CpasResult<()> {
        let camnoc = self.kind == PortKind::Camnoc;
        let (ab, ib) = {
            let mut bus = self.bus.lock();
            drv::vote_hlos(bus.as_mut(), &self.name, ab, ib, camnoc, settings)?
        };
        let camnoc_bw = self.applied_bw.primary().camnoc;
        self.applied_bw = BandwidthVote::Hlos(LaneBw::new(ab, ib, camnoc_bw));
        Ok(())
    }

    /// Vote a HIGH/LOW pair on the DRV paths
    pub fn vote_drv(&mut self, vote: DrvVote, settings: &DebugSettings) -> CpasResult<()> {
        let applied = {
            let mut bus = self.bus.lock();
            drv::vote_drv(bus.as_mut(), &self.name, vote, settings)?
        };
        self.applied_bw = BandwidthVote::Drv(applied);
        Ok(())
    }

    /// Drive the DRV channel for this apply pass
    ///
    /// Starts the channel on a start pass, stops it once a stop pass leaves
    /// every applied value at zero, and otherwise switches a running channel.
    pub fn drive_channel(&mut self, kind: crate::vote::ApplyKind, verbose: bool) -> CpasResult<()> {
        use crate::vote::ApplyKind;

        let Some(rsc) = self.rsc.as_ref() else {
            return Ok(());
        };
        let mut rsc = rsc.lock();

        match kind {
            ApplyKind::Start if !self.drv_channel_started => {
                rsc.start().map_err(|e| {
                    log::error!("{}: drv start failed: {}", self.name, e);
                    e
                })?;
                self.drv_channel_started = true;
                trace_channel(verbose, "started", &self.name);
            },
            ApplyKind::Stop if self.drv_channel_started && self.applied_bw.mnoc_is_zero() => {
                rsc.stop().map_err(|e| {
                    log::error!("{}: drv stop failed: {}", self.name, e);
                    e
                })?;
                self.drv_channel_started = false;
                trace_channel(verbose, "stopped", &self.name);
            },
            _ if self.drv_channel_started => {
                rsc.channel_switch().map_err(|e| {
                    log::error!("{}: channel switch failed: {}", self.name, e);
                    e
                })?;
                trace_channel(verbose, "switched", &self.name);
            },
            _ => {}
        }

        Ok(())
    }

    /// Whether nothing is applied
    pub fn applied_is_zero(&self) -> bool {
        self.applied_bw.mnoc_is_zero()
    }
}

fn trace_channel(verbose: bool, what: &str, port: &str) {
    if verbose {
        log::info!("drv channel {} for {}", what, port);
    } else {
        log::debug!("drv channel {} for {}", what, port);
    }
}

// =============================================================================
// AHB BUS
// =============================================================================

/// AHB register-bus client
pub struct AhbBus {
    bus: Mutex<Box<dyn BusClient>>,
    curr_level: VoteLevel,
}

impl fmt::Debug for AhbBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AhbBus").field("curr_level", &self.curr_level).finish()
    }
}

impl AhbBus {
    /// Wrap an AHB bus client
    pub fn new(bus: Box<dyn BusClient>) -> Self {
        Self {
            bus: Mutex::new(bus),
            curr_level: VoteLevel::Suspend,
        }
    }

    /// Level last applied
    pub fn level(&self) -> VoteLevel {
        self.curr_level
    }

    /// Apply a level vote, skipping repeats
    pub fn vote(&mut self, level: VoteLevel) -> CpasResult<()> {
        if level == self.curr_level {
            return Ok(());
        }
        self.bus.lock().update_level(level).map_err(|e| {
            log::error!("ahb vote {} failed: {}", level, e);
            e
        })?;
        self.curr_level = level;
        Ok(())
    }
}
