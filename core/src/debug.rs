//! # Debug Settings
//!
//! Runtime knobs for bring-up and tuning. The device keeps one
//! [`DebugSettings`] behind a `spin::RwLock`; readers take a snapshot at the
//! start of each operation so a concurrent `set_debug_settings` never tears
//! an apply pass.

use alloc::string::String;
use alloc::vec::Vec;

use bitflags::bitflags;

bitflags! {
    /// Diagnostic dump switches
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DumpFlags: u32 {
        /// Tree state around each consolidation
        const TREE       = 1 << 0;
        /// Full tree state and vote log on every update
        const FULL       = 1 << 1;
        /// Smart QoS LUT values
        const SMART_QOS  = 1 << 2;
        /// DRV channel lifecycle at info level
        const DRV        = 1 << 3;
    }
}

/// Fixed AB/IB for HLOS ports whose name contains `port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HlosOverride {
    /// Port name fragment
    pub port: String,
    /// Replacement AB, 0 keeps the computed value
    pub ab: u64,
    /// Replacement IB, 0 keeps the computed value
    pub ib: u64,
}

/// Fixed HIGH/LOW values for DRV ports whose name contains `port`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DrvOverride {
    /// Port name fragment
    pub port: String,
    /// Replacement HIGH AB, 0 keeps the computed value
    pub high_ab: u64,
    /// Replacement HIGH IB, 0 keeps the computed value
    pub high_ib: u64,
    /// Replacement LOW AB, 0 keeps the computed value
    pub low_ab: u64,
    /// Replacement LOW IB, 0 keeps the computed value
    pub low_ib: u64,
    /// Force the LOW pair to zero
    pub low_set_zero: bool,
}

/// Runtime debug knobs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DebugSettings {
    /// Collapse every vote onto the HLOS lane
    pub force_hlos_drv: bool,
    /// Route CAMNOC clock votes through the software client
    pub force_cesta_sw_client: bool,
    /// Dump switches
    pub dump: DumpFlags,
    /// CAMNOC clock bandwidth override, 0 for none
    pub camnoc_bw: u64,
    /// HLOS port overrides
    pub hlos_overrides: Vec<HlosOverride>,
    /// DRV port overrides
    pub drv_overrides: Vec<DrvOverride>,
    /// CAMNOC IB floor in units of 1,000,000, 0 keeps the built-in floor
    pub min_camnoc_ib_mul: u64,
    /// Fail a call whose paths resolve to different lanes
    pub strict_lane_check: bool,
}

impl DebugSettings {
    /// HLOS override for a port, if any
    pub fn hlos_override(&self, port: &str) -> Option<&HlosOverride> {
        self.hlos_overrides.iter().find(|o| port.contains(o.port.as_str()))
    }

    /// DRV override for a port, if any
    pub fn drv_override(&self, port: &str) -> Option<&DrvOverride> {
        self.drv_overrides.iter().find(|o| port.contains(o.port.as_str()))
    }

    /// Whether a dump switch is on
    pub fn dumps(&self, flag: DumpFlags) -> bool {
        self.dump.contains(flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_lookup_by_fragment() {
        let settings = DebugSettings {
            hlos_overrides: alloc::vec![HlosOverride {
                port: String::from("cam_hf_0"),
                ab: 5,
                ib: 0,
            }],
            ..DebugSettings::default()
        };
        assert!(settings.hlos_override("cam_hf_0_mnoc").is_some());
        assert!(settings.hlos_override("cam_sf_0").is_none());
        assert!(settings.drv_override("cam_hf_0").is_none());
    }
}
