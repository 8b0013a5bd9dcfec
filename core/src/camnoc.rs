//! # CAMNOC Clock Control
//!
//! When the CAMNOC is clocked instead of bus-voted, its AXI clock rate is
//! derived from the busiest node flagged `camnoc_max_needed`:
//!
//! ```text
//!   bw   = max(camnoc * bus_width_factor) + margin%
//!   rate = bw / bus_width
//! ```
//!
//! The HLOS lane votes through the software clock client. A DRV lane votes
//! HIGH and LOW rates through its CESTA hardware client and then switches
//! the channel.

use cpas_hal::{ClockClient, ClockController};

use crate::config::CamnocClockConfig;
use crate::debug::DebugSettings;
use crate::error::{CpasError, CpasResult};
use crate::tree::TreeStore;
use crate::vote::{DrvLevel, Lane};
use crate::DEFAULT_AXI_BW;

/// HIGH/LOW rate pair of one hardware clock client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrvRate {
    /// High rate
    pub high: u64,
    /// Low rate
    pub low: u64,
}

/// Rates last set per clock client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppliedClockRates {
    /// Software client rate
    pub sw_client: u64,
    /// Hardware client rates
    pub hw_client: [DrvRate; ClockClient::MAX_HW_CLIENTS],
}

/// CAMNOC AXI clock state
#[derive(Debug, Clone, Default)]
pub struct CamnocClock {
    config: CamnocClockConfig,
    applied: AppliedClockRates,
}

impl CamnocClock {
    /// Clock state for the given parameters
    pub fn new(config: CamnocClockConfig) -> Self {
        Self {
            config,
            applied: AppliedClockRates::default(),
        }
    }

    /// Rates last set
    pub fn applied(&self) -> &AppliedClockRates {
        &self.applied
    }

    fn bus_width(&self) -> u64 {
        self.config.bus_width.max(1)
    }

    fn with_margin(&self, bw: u64) -> u64 {
        bw.saturating_add(bw.saturating_mul(self.config.margin_pct) / 100)
    }

    /// Max `camnoc * bus_width_factor` on one lane slot
    fn max_needed(tree: &TreeStore, lane: Lane, level: DrvLevel) -> u64 {
        tree.iter()
            .filter(|n| n.camnoc_max_needed)
            .map(|n| n.bw_info[lane.index()].slot(level).camnoc.saturating_mul(n.bus_width_factor))
            .max()
            .unwrap_or(0)
    }

    /// HLOS `(bandwidth, rate)`
    pub fn hlos_rate(&self, tree: &TreeStore, streaming: bool, settings: &DebugSettings) -> (u64, u64) {
        let mut bw = self.with_margin(Self::max_needed(tree, Lane::Hlos, DrvLevel::High));

        if streaming && bw == 0 {
            bw = DEFAULT_AXI_BW;
        }
        if bw > 0 && bw < self.config.min_ib_bw {
            bw = self.config.min_ib_bw;
        }
        if settings.camnoc_bw != 0 {
            bw = settings.camnoc_bw.max(self.config.bus_width);
            log::info!("overriding camnoc bw: {}", bw);
        }

        (bw, bw / self.bus_width())
    }

    /// DRV `(high, low)` bandwidth and rates for one lane
    ///
    /// LOW traffic is part of HIGH, so the HIGH figure includes it.
    pub fn drv_rate(&self, tree: &TreeStore, lane: Lane) -> (DrvRate, DrvRate) {
        let low = self.with_margin(Self::max_needed(tree, lane, DrvLevel::Low));
        let high = self
            .with_margin(Self::max_needed(tree, lane, DrvLevel::High))
            .saturating_add(low);

        let bw = DrvRate { high, low };
        let rate = DrvRate {
            high: high / self.bus_width(),
            low: low / self.bus_width(),
        };
        (bw, rate)
    }

    /// Set the CAMNOC AXI clock for the lane a vote landed on
    ///
    /// Nothing reaches the clock controller unless some client streams.
    pub fn set_rate(
        &mut self,
        tree: &TreeStore,
        lane: Lane,
        clk_drv: bool,
        streaming: bool,
        clock: &mut dyn ClockController,
        settings: &DebugSettings,
        verbose: bool,
    ) -> CpasResult<()> {
        if !lane.is_drv() {
            let (bw, rate) = self.hlos_rate(tree, streaming, settings);
            log::debug!("camnoc axi hlos clk [bw rate]: [{} {}]", bw, rate);
            if streaming {
                clock.set_source_rate(ClockClient::Sw, rate, 0).map_err(|e| {
                    log::error!("camnoc axi clk [{} {}] failed: {}", bw, rate, e);
                    e
                })?;
                self.applied.sw_client = rate;
            }
            return Ok(());
        }

        if !clk_drv {
            log::error!("clk drv not enabled, cannot vote {} camnoc clk", lane);
            return Err(CpasError::NotSupported);
        }

        let (bw, rate) = self.drv_rate(tree, lane);
        if !streaming {
            return Ok(());
        }

        let client = lane.clock_client();
        if verbose {
            log::info!(
                "camnoc axi cesta clk {:?}: high [{} {}] low [{} {}]",
                client,
                bw.high,
                rate.high,
                bw.low,
                rate.low
            );
        } else {
            log::debug!(
                "camnoc axi cesta clk {:?}: high [{} {}] low [{} {}]",
                client,
                bw.high,
                rate.high,
                bw.low,
                rate.low
            );
        }

        clock.set_source_rate(client, rate.high, rate.low).map_err(|e| {
            log::error!("camnoc cesta clk {:?} [{} {}] failed: {}", client, rate.high, rate.low, e);
            e
        })?;
        if let Some(slot) = self.applied.hw_client.get_mut(client.slot()) {
            *slot = rate;
        }

        clock.switch_channel(client, "cpas_update").map_err(|e| {
            log::error!("channel switch for cesta client {:?} failed: {}", client, e);
            e
        })?;

        Ok(())
    }
}
