//! # Vote Monitor
//!
//! Fixed-size history of applied votes for post-mortem dumps.
//!
//! ```text
//!   head (atomic) ──▶ slot = head % MONITOR_MAX_ENTRIES
//!   ┌────┬────┬────┬─────┬────┐
//!   │ 0  │ 1  │ 2  │ ... │ 99 │   each slot behind its own spin::Mutex
//!   └────┴────┴────┴─────┴────┘
//! ```
//!
//! Writers claim a slot with one atomic increment, so concurrent recorders
//! only contend when they wrap onto the same slot. Fill levels are sampled
//! under a transient access reference and are simply missing while the SoC
//! is powered down.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use cpas_hal::{RegisterMap, VoteLevel};
use heapless::Vec as HVec;
use spin::Mutex;

use crate::camnoc::AppliedClockRates;
use crate::client::ClientHandle;
use crate::consolidate::VoteEngine;
use crate::cpastop::{CpasTop, FillSamples};
use crate::port::BusPort;
use crate::vote::BandwidthVote;
use crate::{MAX_AXI_PORTS, MAX_RT_WR_NIU_NODES, MONITOR_MAX_ENTRIES};

/// Vote state of one port at record time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSample {
    /// Vote computed by the tree
    pub current: BandwidthVote,
    /// Vote last sent to the bus
    pub applied: BandwidthVote,
    /// DRV channel running
    pub drv_started: bool,
}

impl From<&BusPort> for PortSample {
    fn from(port: &BusPort) -> Self {
        Self {
            current: port.current_bw,
            applied: port.applied_bw,
            drv_started: port.drv_channel_started,
        }
    }
}

/// Priority LUT words last written to one real-time write NIU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NiuSample {
    /// Tree cell of the NIU node
    pub cell_index: usize,
    /// LUT low word
    pub low: u32,
    /// LUT high word
    pub high: u32,
}

/// One recorded snapshot
#[derive(Debug, Clone)]
pub struct MonitorEntry {
    /// Platform timestamp
    pub timestamp_ns: u64,
    /// What triggered the record
    pub tag: &'static str,
    /// Client whose call triggered the record
    pub client: Option<ClientHandle>,
    /// AXI ports, engine order
    pub axi: HVec<PortSample, MAX_AXI_PORTS>,
    /// CAMNOC ports, engine order
    pub camnoc: HVec<PortSample, MAX_AXI_PORTS>,
    /// CAMNOC clock rates
    pub camnoc_clk: AppliedClockRates,
    /// AHB level in effect
    pub ahb_level: VoteLevel,
    /// Fill levels
    pub fill_levels: FillSamples,
    /// Smart QoS LUTs
    pub niu_luts: HVec<NiuSample, MAX_RT_WR_NIU_NODES>,
}

impl MonitorEntry {
    /// Capture the engine state
    pub fn capture(
        timestamp_ns: u64,
        tag: &'static str,
        client: Option<ClientHandle>,
        engine: &VoteEngine,
        top: &CpasTop,
        regs: &RegisterMap,
        ahb_level: VoteLevel,
    ) -> Self {
        let axi = engine.axi_ports().iter().take(MAX_AXI_PORTS).map(PortSample::from).collect();
        let camnoc = engine
            .camnoc_ports()
            .iter()
            .take(MAX_AXI_PORTS)
            .map(PortSample::from)
            .collect();

        Self {
            timestamp_ns,
            tag,
            client,
            axi,
            camnoc,
            camnoc_clk: *engine.camnoc_clock().applied(),
            ahb_level,
            fill_levels: top.fill_levels(regs),
            niu_luts: sample_nius(engine),
        }
    }
}

fn sample_nius(engine: &VoteEngine) -> HVec<NiuSample, MAX_RT_WR_NIU_NODES> {
    engine
        .smart_qos()
        .nius()
        .iter()
        .filter_map(|&cell| {
            let niu = engine.tree().get(cell)?.niu?;
            Some(NiuSample {
                cell_index: cell,
                low: niu.applied_priority_low,
                high: niu.applied_priority_high,
            })
        })
        .take(MAX_RT_WR_NIU_NODES)
        .collect()
}

// =============================================================================
// Ring
// =============================================================================

/// Ring of the last [`MONITOR_MAX_ENTRIES`] snapshots
#[derive(Debug)]
pub struct Monitor {
    slots: Vec<Mutex<Option<MonitorEntry>>>,
    head: AtomicUsize,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    /// Empty ring
    pub fn new() -> Self {
        Self {
            slots: (0..MONITOR_MAX_ENTRIES).map(|_| Mutex::new(None)).collect(),
            head: AtomicUsize::new(0),
        }
    }

    /// Store an entry, overwriting the oldest once full
    pub fn push(&self, entry: MonitorEntry) {
        let idx = self.head.fetch_add(1, Ordering::AcqRel) % MONITOR_MAX_ENTRIES;
        *self.slots[idx].lock() = Some(entry);
    }

    /// Total entries ever recorded
    pub fn recorded(&self) -> usize {
        self.head.load(Ordering::Acquire)
    }

    /// Entries currently held
    pub fn len(&self) -> usize {
        self.recorded().min(MONITOR_MAX_ENTRIES)
    }

    /// Whether nothing was recorded yet
    pub fn is_empty(&self) -> bool {
        self.recorded() == 0
    }

    /// Newest entry
    pub fn latest(&self) -> Option<MonitorEntry> {
        let head = self.recorded();
        if head == 0 {
            return None;
        }
        self.slots[(head - 1) % MONITOR_MAX_ENTRIES].lock().clone()
    }

    /// Copy of the held entries, oldest first
    pub fn snapshot(&self) -> Vec<MonitorEntry> {
        let head = self.recorded();
        let start = head.saturating_sub(MONITOR_MAX_ENTRIES);
        (start..head)
            .filter_map(|i| self.slots[i % MONITOR_MAX_ENTRIES].lock().clone())
            .collect()
    }

    /// Log the held entries, oldest first
    pub fn dump(&self, axi_names: &[&str], camnoc_names: &[&str]) {
        let entries = self.snapshot();
        log::info!("monitor: {} entries ({} recorded)", entries.len(), self.recorded());

        for (i, e) in entries.iter().enumerate() {
            log::info!(
                "[{}] {}.{:09} {} client={:?} ahb={} camnoc clk sw={}",
                i,
                e.timestamp_ns / 1_000_000_000,
                e.timestamp_ns % 1_000_000_000,
                e.tag,
                e.client.map(ClientHandle::index),
                e.ahb_level,
                e.camnoc_clk.sw_client
            );
            for (s, name) in e.axi.iter().zip(axi_names.iter()) {
                log::info!(
                    "    axi {}: current [{}] applied [{}]{}",
                    name,
                    s.current,
                    s.applied,
                    if s.drv_started { " drv-started" } else { "" }
                );
            }
            for (s, name) in e.camnoc.iter().zip(camnoc_names.iter()) {
                log::info!("    camnoc {}: current [{}] applied [{}]", name, s.current, s.applied);
            }
            for f in e.fill_levels.iter() {
                log::info!("    fill {}: queue={} max={}", f.port, f.queue_len(), f.max_fill());
            }
            for n in e.niu_luts.iter() {
                log::info!("    niu {}: high {:#x} low {:#x}", n.cell_index, n.high, n.low);
            }
        }
    }
}
