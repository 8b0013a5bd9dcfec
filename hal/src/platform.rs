//! # Platform Hooks
//!
//! Shared power resources, interrupt control and time services provided by
//! the surrounding platform.

use crate::bus::VoteLevel;
use crate::error::HalResult;

/// Platform services used during power transitions and diagnostics
pub trait Platform: Send + Sync {
    /// Power on shared regulators and clocks at the given level
    fn enable_resources(&self, level: VoteLevel) -> HalResult<()>;

    /// Power off shared regulators and clocks
    fn disable_resources(&self) -> HalResult<()>;

    /// Mask the CPAS interrupt line
    fn disable_irq(&self);

    /// Monotonic timestamp in nanoseconds
    fn timestamp_ns(&self) -> u64;

    /// Voltage corner of the lowest operating point at or above `freq`
    ///
    /// `None` when no operating point table covers the frequency.
    fn opp_corner(&self, freq: u64) -> Option<u32> {
        let _ = freq;
        None
    }

    /// Busy-wait for roughly `us` microseconds
    fn delay_us(&self, us: u32) {
        for _ in 0..us {
            for _ in 0..100 {
                core::hint::spin_loop();
            }
        }
    }
}
