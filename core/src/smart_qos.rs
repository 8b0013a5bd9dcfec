//! # Smart QoS
//!
//! Redistributes CAMNOC priority among real-time write NIUs according to
//! how stressed each one is relative to the others.
//!
//! Each NIU gets a 16-entry priority LUT packed as nibbles, position 15 in
//! the top nibble:
//!
//! ```text
//!   pos  15 ............ clamp_th | clamp_th-1 ........ 1 | 0
//!        [ clamp  clamp  clamp ]  | [ ramp(pos) ...       ] [ min ]
//! ```
//!
//! The more bandwidth a NIU carries per KB of buffer, the lower its clamp
//! threshold, so the clamp run covers more positions. All arithmetic is
//! integer; ratios are percentages out of 100.

use alloc::vec::Vec;

use cpas_hal::{RegBase, RegisterMap};

use crate::error::CpasResult;
use crate::port::BusPort;
use crate::tree::TreeStore;
use crate::vote::BandwidthVote;

/// Positions in one priority LUT
pub const LUT_POSITIONS: usize = 16;

/// Full scale of stress percentages
pub const MAX_STRESS_INDICATOR: u64 = 100;

/// Full scale of the slope factor
pub const MAX_SLOPE_FACTOR: u64 = 100;

/// Smart QoS tuning constants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SmartQosTunables {
    /// Priority at position 0 and base of the ramp
    pub priority_min: u8,
    /// Ceiling of the ramp
    pub priority_max: u8,
    /// Priority filling the clamp run
    pub priority_clamp: u8,
    /// Ramp slope in percent
    pub slope_factor: u64,
    /// Share of total bandwidth below which a NIU is least stressed, in percent
    pub lowstress_th: u64,
    /// Share of total bandwidth above which a NIU is most stressed, in percent
    pub highstress_th: u64,
    /// Clamp threshold of the most stressed NIU
    pub moststressed_clamp_th: u8,
    /// Clamp threshold of the least stressed NIU
    pub leaststressed_clamp_th: u8,
    /// Scale applied to a NIU's share before interpolation
    pub bw_ratio_scale_factor: u64,
}

impl SmartQosTunables {
    /// LUT position where the clamp run starts
    pub fn clamp_threshold(&self, bw_per_kb: u64, total_bw_per_kb: u64) -> usize {
        let most = self.moststressed_clamp_th;
        let least = self.leaststressed_clamp_th;

        let th = if bw_per_kb.saturating_mul(MAX_STRESS_INDICATOR)
            > total_bw_per_kb.saturating_mul(self.highstress_th)
        {
            most
        } else {
            let ramp = self
                .bw_ratio_scale_factor
                .saturating_mul(bw_per_kb)
                .saturating_mul(u64::from(least.saturating_sub(most)));
            let denom = total_bw_per_kb.saturating_mul(self.highstress_th.saturating_sub(self.lowstress_th))
                / MAX_STRESS_INDICATOR;

            if denom == 0 {
                most
            } else {
                let val = round_div(ramp, denom);
                least.saturating_sub(val.min(u64::from(least)) as u8)
            }
        };

        usize::from(th).min(LUT_POSITIONS)
    }

    /// Ramp value at a LUT position below the clamp run
    fn ramp(&self, pos: usize, bw_per_kb: u64, max_bw_per_kb: u64) -> u8 {
        if pos == 0 || max_bw_per_kb == 0 {
            return self.priority_min;
        }
        let ramp = (pos as u64)
            .saturating_mul(bw_per_kb)
            .saturating_mul(self.slope_factor)
            / MAX_SLOPE_FACTOR;
        let val = round_div(ramp, max_bw_per_kb).saturating_add(u64::from(self.priority_min));
        val.min(u64::from(self.priority_max)) as u8
    }

    /// Packed 64-bit priority LUT for one NIU
    pub fn priority_lut(&self, bw_per_kb: u64, total_bw_per_kb: u64, max_bw_per_kb: u64) -> u64 {
        let clamp_th = self.clamp_threshold(bw_per_kb, total_bw_per_kb);

        (0..LUT_POSITIONS).rev().fold(0u64, |lut, pos| {
            let val = if pos >= clamp_th {
                self.priority_clamp
            } else {
                self.ramp(pos, bw_per_kb, max_bw_per_kb)
            };
            (lut << 4) | u64::from(val & 0xF)
        })
    }
}

/// `num / denom` rounded half up
#[inline]
fn round_div(num: u64, denom: u64) -> u64 {
    let q = num / denom;
    if (num % denom).saturating_mul(2) >= denom {
        q + 1
    } else {
        q
    }
}

// =============================================================================
// CALCULATOR
// =============================================================================

/// Smart QoS state: the NIU nodes and their tunables
#[derive(Debug, Clone, Default)]
pub struct SmartQos {
    nius: Vec<usize>,
    tunables: SmartQosTunables,
}

impl SmartQos {
    /// Calculator over the given NIU cell indices
    pub fn new(nius: Vec<usize>, tunables: SmartQosTunables) -> Self {
        Self { nius, tunables }
    }

    /// NIU cell indices
    pub fn nius(&self) -> &[usize] {
        &self.nius
    }

    /// Tunables in use
    pub fn tunables(&self) -> &SmartQosTunables {
        &self.tunables
    }

    fn bw_per_kb(tree: &TreeStore, cell: usize, clk_drv: bool) -> u64 {
        tree.get(cell)
            .and_then(|n| n.niu.map(|niu| n.camnoc_all_lanes(clk_drv) / niu.niu_size.max(1)))
            .unwrap_or(0)
    }

    /// Recompute every NIU's LUT, returning whether any differs from hardware
    ///
    /// DRV lanes count toward a NIU's bandwidth only when `clk_drv` is set.
    pub fn calculate(&self, tree: &mut TreeStore, clk_drv: bool, dump: bool) -> bool {
        let per_kb: Vec<u64> = self
            .nius
            .iter()
            .map(|&cell| Self::bw_per_kb(tree, cell, clk_drv))
            .collect();

        let total: u64 = per_kb.iter().sum();
        let max = per_kb.iter().copied().max().unwrap_or(0);

        if max == 0 {
            log::debug!("no bandwidth on rt nius");
            return false;
        }

        let mut needs_update = false;
        for (&cell, &bw) in self.nius.iter().zip(per_kb.iter()) {
            let lut = self.tunables.priority_lut(bw, total, max);
            let Some(node) = tree.get_mut(cell) else {
                continue;
            };
            let Some(niu) = node.niu.as_mut() else {
                continue;
            };

            niu.curr_priority_low = lut as u32;
            niu.curr_priority_high = (lut >> 32) as u32;
            if niu.curr_priority_low != niu.applied_priority_low
                || niu.curr_priority_high != niu.applied_priority_high
            {
                needs_update = true;
            }

            log::debug!(
                "niu {}: bw_per_kb={} lut={:#018x} applied high={:#x} low={:#x}",
                node.name,
                bw,
                lut,
                niu.applied_priority_high,
                niu.applied_priority_low
            );
        }

        if dump && needs_update {
            self.dump(tree, clk_drv);
        }

        needs_update
    }

    /// Write every changed LUT word to the RT CAMNOC window
    pub fn apply(&self, tree: &mut TreeStore, regs: &RegisterMap, dump: bool) -> CpasResult<()> {
        if dump {
            log::info!("smart qos before update");
            self.log_registers(tree, regs);
        }

        for &cell in self.nius.iter() {
            let Some(niu) = tree.get_mut(cell).and_then(|n| n.niu.as_mut()) else {
                continue;
            };

            if niu.curr_priority_high != niu.applied_priority_high {
                regs.write(RegBase::CamnocRt, niu.lut_high_offset, niu.curr_priority_high, true)?;
                niu.applied_priority_high = niu.curr_priority_high;
            }
            if niu.curr_priority_low != niu.applied_priority_low {
                regs.write(RegBase::CamnocRt, niu.lut_low_offset, niu.curr_priority_low, true)?;
                niu.applied_priority_low = niu.curr_priority_low;
            }
        }

        if dump {
            log::info!("smart qos after update");
            self.log_registers(tree, regs);
        }

        Ok(())
    }

    /// Forget what was written to hardware
    pub fn reset_applied(&self, tree: &mut TreeStore) {
        for &cell in self.nius.iter() {
            if let Some(niu) = tree.get_mut(cell).and_then(|n| n.niu.as_mut()) {
                niu.applied_priority_low = 0;
                niu.applied_priority_high = 0;
            }
        }
    }

    /// Log the LUT registers as read back from hardware
    pub fn log_registers(&self, tree: &TreeStore, regs: &RegisterMap) {
        let Some(guard) = regs.access() else {
            return;
        };
        for node in self.nius.iter().filter_map(|&c| tree.get(c)) {
            let Some(niu) = node.niu else {
                continue;
            };
            let high = guard.map().read(RegBase::CamnocRt, niu.lut_high_offset);
            let low = guard.map().read(RegBase::CamnocRt, niu.lut_low_offset);
            if let (Ok(high), Ok(low)) = (high, low) {
                log::info!("smart qos [{}: high {:#x} low {:#x}]", node.name, high, low);
            }
        }
    }

    fn dump(&self, tree: &TreeStore, clk_drv: bool) {
        for node in self.nius.iter().filter_map(|&c| tree.get(c)) {
            if let Some(niu) = node.niu {
                log::info!(
                    "niu {}: camnoc={} size={} offsets high {:#x} low {:#x}, new high {:#x} low {:#x}, applied high {:#x} low {:#x}",
                    node.name,
                    node.camnoc_all_lanes(clk_drv),
                    niu.niu_size,
                    niu.lut_high_offset,
                    niu.lut_low_offset,
                    niu.curr_priority_high,
                    niu.curr_priority_low,
                    niu.applied_priority_high,
                    niu.applied_priority_low
                );
            }
        }
    }
}

/// Whether the pending real-time AB total is below what is applied
pub fn is_new_rt_bw_lower(ports: &[BusPort]) -> bool {
    let ab = |bw: &BandwidthVote| bw.primary().ab;
    let (applied, pending) = ports
        .iter()
        .filter(|p| p.is_rt)
        .fold((0u64, 0u64), |(applied, pending), p| {
            (applied.saturating_add(ab(&p.applied_bw)), pending.saturating_add(ab(&p.current_bw)))
        });

    log::debug!("rt ab applied={} pending={}", applied, pending);
    pending < applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CpasConfig, CpasFeatures, LeafDesc, MnocDesc, NiuDesc, NodeDesc};
    use crate::vote::{Lane, LaneBw};
    use alloc::boxed::Box;
    use alloc::sync::Arc;
    use cpas_hal::RegisterIo;
    use spin::Mutex;

    fn tunables() -> SmartQosTunables {
        SmartQosTunables {
            priority_min: 3,
            priority_max: 6,
            priority_clamp: 7,
            slope_factor: 100,
            lowstress_th: 20,
            highstress_th: 80,
            moststressed_clamp_th: 6,
            leaststressed_clamp_th: 12,
            bw_ratio_scale_factor: 1,
        }
    }

    fn nibble(lut: u64, pos: usize) -> u8 {
        ((lut >> (pos * 4)) & 0xF) as u8
    }

    #[derive(Clone, Default)]
    struct Window(Arc<Mutex<Vec<(u32, u32)>>>);

    impl RegisterIo for Window {
        fn size(&self) -> u32 {
            0x1000
        }

        fn read32(&self, _offset: u32) -> u32 {
            0
        }

        fn write32(&self, offset: u32, value: u32) {
            self.0.lock().push((offset, value));
        }
    }

    fn qos_tree() -> (TreeStore, SmartQos) {
        let niu = |low, high| NiuDesc {
            priority_lut_low_offset: low,
            priority_lut_high_offset: high,
            niu_size: 4,
        };
        let mut cfg = CpasConfig::new(["ife0", "ife1"])
            .features(CpasFeatures::SMART_QOS)
            .node(NodeDesc::new(0, 0, "root").mnoc(MnocDesc::new(["cam_hf_0"]).rt()))
            .node(NodeDesc::new(1, 1, "rt_wr_0").parent(0).rt_wr_niu(niu(0x10, 0x14)))
            .node(NodeDesc::new(2, 1, "rt_wr_1").parent(0).rt_wr_niu(niu(0x20, 0x24)))
            .node(NodeDesc::new(3, 2, "ife0_wr").parent(1).leaf(LeafDesc::new("ife0", 0, 1)))
            .node(NodeDesc::new(4, 2, "ife1_wr").parent(2).leaf(LeafDesc::new("ife1", 0, 1)));
        cfg.smart_qos = tunables();
        let build = TreeStore::build(&cfg).unwrap();
        let qos = SmartQos::new(build.rt_nius, cfg.smart_qos);
        (build.tree, qos)
    }

    fn set_camnoc(tree: &mut TreeStore, cell: usize, camnoc: u64) {
        tree.get_mut(cell).unwrap().bw_info[Lane::Hlos.index()] = BandwidthVote::Hlos(LaneBw::new(0, 0, camnoc));
    }

    #[test]
    fn test_zero_bandwidth_is_noop() {
        let (mut tree, qos) = qos_tree();
        assert!(!qos.calculate(&mut tree, false, false));

        let window = Window::default();
        let regs = RegisterMap::new().with(RegBase::CamnocRt, Box::new(window.clone()));
        regs.grant_access();
        qos.apply(&mut tree, &regs, false).unwrap();

        assert!(window.0.lock().is_empty());
        assert_eq!(tree.get(1).unwrap().niu.unwrap().applied_priority_low, 0);
    }

    #[test]
    fn test_most_stressed_gets_longest_clamp() {
        let t = tunables();
        assert_eq!(t.clamp_threshold(90, 100), 6);
        assert_eq!(t.clamp_threshold(0, 100), 12);

        let lut = t.priority_lut(90, 100, 90);
        for pos in 6..LUT_POSITIONS {
            assert_eq!(nibble(lut, pos), 7);
        }
        assert_eq!(nibble(lut, 0), 3);
    }

    #[test]
    fn test_lut_monotone_and_capped() {
        let t = tunables();
        for bw in (0..=200).step_by(5) {
            let lut = t.priority_lut(bw, 200, 200);
            assert_eq!(nibble(lut, 0), t.priority_min);
            for pos in 1..LUT_POSITIONS {
                assert!(nibble(lut, pos) >= nibble(lut, pos - 1));
            }
            let th = t.clamp_threshold(bw, 200);
            for pos in 0..th {
                assert!(nibble(lut, pos) <= t.priority_max);
            }
        }
    }

    #[test]
    fn test_apply_writes_changed_words_only() {
        let (mut tree, qos) = qos_tree();
        set_camnoc(&mut tree, 1, 4000);
        set_camnoc(&mut tree, 2, 400);
        assert!(qos.calculate(&mut tree, false, false));

        let window = Window::default();
        let regs = RegisterMap::new().with(RegBase::CamnocRt, Box::new(window.clone()));
        regs.grant_access();
        qos.apply(&mut tree, &regs, false).unwrap();
        let first = window.0.lock().len();
        assert!(first > 0);

        assert!(!qos.calculate(&mut tree, false, false));
        qos.apply(&mut tree, &regs, false).unwrap();
        assert_eq!(window.0.lock().len(), first);

        let niu = tree.get(1).unwrap().niu.unwrap();
        assert_eq!(niu.applied_priority_low, niu.curr_priority_low);
    }

    #[test]
    fn test_reset_forces_rewrite() {
        let (mut tree, qos) = qos_tree();
        set_camnoc(&mut tree, 1, 4000);
        qos.calculate(&mut tree, false, false);
        let regs = RegisterMap::new().with(RegBase::CamnocRt, Box::new(Window::default()));
        regs.grant_access();
        qos.apply(&mut tree, &regs, false).unwrap();

        qos.reset_applied(&mut tree);
        assert!(qos.calculate(&mut tree, false, false));
    }

    #[test]
    fn test_apply_denied_while_powered_down() {
        let (mut tree, qos) = qos_tree();
        set_camnoc(&mut tree, 1, 4000);
        qos.calculate(&mut tree, false, false);
        let regs = RegisterMap::new().with(RegBase::CamnocRt, Box::new(Window::default()));
        assert!(qos.apply(&mut tree, &regs, false).is_err());
    }
}
