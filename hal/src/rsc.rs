//! # Resource State Coordinator
//!
//! Per-DRV-port channel lifecycle hooks.

use crate::error::HalResult;

/// DRV channel controller bound to one DRV AXI port
pub trait RscDevice: Send {
    /// Activate the hardware voting channel
    fn start(&mut self) -> HalResult<()>;

    /// Deactivate the hardware voting channel
    fn stop(&mut self) -> HalResult<()>;

    /// Apply new lane values to a running channel
    fn channel_switch(&mut self) -> HalResult<()>;
}
