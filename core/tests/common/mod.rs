//! Recording collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use cpas_core::port::BusProvider;
use cpas_core::{CpasConfig, CpasDevice, CpasResources};
use cpas_hal::{
    BusClient, BusPath, ClockClient, ClockController, HalError, HalResult, Platform, RegBase,
    RegisterIo, RegisterMap, RscDevice, VoteLevel,
};
use spin::Mutex;

/// Titan 480 camera version, CPAS 1.0.0
pub const TITAN_480: u32 = 0x0004_0800;
pub const CPAS_1_0_0: u32 = 0x1000_0000;

const QCH_CTRL: u32 = 0x14;
const QCH_STATUS: u32 = 0x18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusCall {
    pub port: String,
    pub ab: u64,
    pub ib: u64,
    pub path: BusPath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockCall {
    Source(ClockClient, u64, u64),
    Switch(ClockClient),
    Level(VoteLevel),
}

/// Everything the collaborators saw, in call order
#[derive(Debug, Default)]
pub struct Recorder {
    pub bus: Vec<BusCall>,
    pub ahb: Vec<VoteLevel>,
    pub clock: Vec<ClockCall>,
    pub rsc: Vec<(usize, &'static str)>,
    pub platform: Vec<&'static str>,
    /// Bus votes on ports starting with this name fail
    pub fail_bus: Option<String>,
    /// `disable_resources` fails
    pub fail_disable: bool,
}

pub type Shared = Arc<Mutex<Recorder>>;

impl Recorder {
    pub fn votes_on(&self, port: &str) -> Vec<BusCall> {
        self.bus.iter().filter(|c| c.port == port).cloned().collect()
    }

    pub fn last_vote(&self, port: &str) -> Option<BusCall> {
        self.bus.iter().rev().find(|c| c.port == port).cloned()
    }
}

// -----------------------------------------------------------------------------
// Bus, RSC, clock
// -----------------------------------------------------------------------------

struct Bus {
    name: String,
    rec: Shared,
}

impl BusClient for Bus {
    fn update_bandwidth(&mut self, ab: u64, ib: u64, path: BusPath) -> HalResult<()> {
        let mut rec = self.rec.lock();
        if rec.fail_bus.as_deref().is_some_and(|p| self.name.starts_with(p)) {
            return Err(HalError::BusVoteFailed);
        }
        rec.bus.push(BusCall {
            port: self.name.clone(),
            ab,
            ib,
            path,
        });
        Ok(())
    }

    fn update_level(&mut self, level: VoteLevel) -> HalResult<()> {
        self.rec.lock().ahb.push(level);
        Ok(())
    }
}

struct Rsc {
    idx: usize,
    rec: Shared,
}

impl RscDevice for Rsc {
    fn start(&mut self) -> HalResult<()> {
        self.rec.lock().rsc.push((self.idx, "start"));
        Ok(())
    }

    fn stop(&mut self) -> HalResult<()> {
        self.rec.lock().rsc.push((self.idx, "stop"));
        Ok(())
    }

    fn channel_switch(&mut self) -> HalResult<()> {
        self.rec.lock().rsc.push((self.idx, "switch"));
        Ok(())
    }
}

pub struct Provider(pub Shared);

impl BusProvider for Provider {
    fn bus_client(&mut self, name: &str) -> HalResult<Box<dyn BusClient>> {
        Ok(Box::new(Bus {
            name: name.to_string(),
            rec: self.0.clone(),
        }))
    }

    fn ahb_client(&mut self) -> HalResult<Box<dyn BusClient>> {
        self.bus_client("ahb")
    }

    fn rsc_device(&mut self, drv_idx: usize) -> Option<Box<dyn RscDevice>> {
        Some(Box::new(Rsc {
            idx: drv_idx,
            rec: self.0.clone(),
        }))
    }
}

pub struct Clock(pub Shared);

impl ClockController for Clock {
    fn set_source_rate(&mut self, client: ClockClient, high_rate: u64, low_rate: u64) -> HalResult<()> {
        self.0.lock().clock.push(ClockCall::Source(client, high_rate, low_rate));
        Ok(())
    }

    fn switch_channel(&mut self, client: ClockClient, _reason: &str) -> HalResult<()> {
        self.0.lock().clock.push(ClockCall::Switch(client));
        Ok(())
    }

    fn set_rate_level(&mut self, level: VoteLevel) -> HalResult<()> {
        self.0.lock().clock.push(ClockCall::Level(level));
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Platform
// -----------------------------------------------------------------------------

pub struct Plat(pub Shared);

impl Platform for Plat {
    fn enable_resources(&self, _level: VoteLevel) -> HalResult<()> {
        self.0.lock().platform.push("enable");
        Ok(())
    }

    fn disable_resources(&self) -> HalResult<()> {
        let mut rec = self.0.lock();
        rec.platform.push("disable");
        if rec.fail_disable {
            return Err(HalError::ResourceFailed);
        }
        Ok(())
    }

    fn disable_irq(&self) {
        self.0.lock().platform.push("irq off");
    }

    fn timestamp_ns(&self) -> u64 {
        self.0.lock().platform.len() as u64 * 1_000
    }

    fn opp_corner(&self, freq: u64) -> Option<u32> {
        match freq {
            0..=100_000_000 => Some(1),
            100_000_001..=400_000_000 => Some(2),
            _ => None,
        }
    }

    fn delay_us(&self, _us: u32) {}
}

// -----------------------------------------------------------------------------
// Register windows
// -----------------------------------------------------------------------------

/// Plain register file with a write log
#[derive(Debug)]
pub struct Window {
    pub words: Mutex<Vec<u32>>,
    pub writes: Mutex<Vec<(u32, u32)>>,
    /// Q-channel status follows the control register
    qchannel: bool,
}

impl Window {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            words: Mutex::new(vec![0; size / 4]),
            writes: Mutex::new(Vec::new()),
            qchannel: false,
        })
    }

    /// CPASTOP window reporting the given versions, Q-channel accepting
    pub fn cpas_top(camera: u32, cpas: u32) -> Arc<Self> {
        let mut words = vec![0; 0x100 / 4];
        words[0] = camera;
        words[1] = cpas;
        words[0x8 / 4] = 0x1f;
        words[(QCH_STATUS / 4) as usize] = 0x1;
        Arc::new(Self {
            words: Mutex::new(words),
            writes: Mutex::new(Vec::new()),
            qchannel: true,
        })
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }
}

/// `RegisterIo` view of a shared window
pub struct Io(pub Arc<Window>);

impl RegisterIo for Io {
    fn size(&self) -> u32 {
        (self.0.words.lock().len() * 4) as u32
    }

    fn read32(&self, offset: u32) -> u32 {
        self.0.words.lock()[(offset / 4) as usize]
    }

    fn write32(&self, offset: u32, value: u32) {
        let mut words = self.0.words.lock();
        words[(offset / 4) as usize] = value;
        if self.0.qchannel && offset == QCH_CTRL {
            words[(QCH_STATUS / 4) as usize] = value & 0x1;
        }
        self.0.writes.lock().push((offset, value));
    }
}

// -----------------------------------------------------------------------------
// Device
// -----------------------------------------------------------------------------

pub struct Rig {
    pub dev: CpasDevice,
    pub rec: Shared,
    pub top: Arc<Window>,
    pub camnoc: Arc<Window>,
    pub camnoc_rt: Arc<Window>,
}

pub fn rig(cfg: CpasConfig) -> Rig {
    rig_with(cfg, Shared::default())
}

pub fn rig_with(cfg: CpasConfig, rec: Shared) -> Rig {
    let top = Window::cpas_top(TITAN_480, CPAS_1_0_0);
    let camnoc = Window::new(0x1000);
    let camnoc_rt = Window::new(0x1000);

    let regs = RegisterMap::new()
        .with(RegBase::CpasTop, Box::new(Io(top.clone())))
        .with(RegBase::Camnoc, Box::new(Io(camnoc.clone())))
        .with(RegBase::CamnocRt, Box::new(Io(camnoc_rt.clone())));

    let res = CpasResources {
        provider: Box::new(Provider(rec.clone())),
        clock: Box::new(Clock(rec.clone())),
        platform: Box::new(Plat(rec.clone())),
        regs,
    };
    let dev = CpasDevice::probe(cfg, res).expect("probe");

    Rig {
        dev,
        rec,
        top,
        camnoc,
        camnoc_rt,
    }
}

// -----------------------------------------------------------------------------
// Input generation
// -----------------------------------------------------------------------------

/// Linear congruential generator for reproducible test inputs
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_add(0x9e37_79b9_7f4a_7c15))
    }

    pub fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    /// Uniform-ish value in `0..n`
    pub fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }

    /// Value in `lo..=hi`
    pub fn range(&mut self, lo: u64, hi: u64) -> u64 {
        lo + self.below(hi - lo + 1)
    }
}
