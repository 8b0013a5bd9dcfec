//! # Bandwidth Floors and Bus Votes
//!
//! Last stop before a value reaches a [`BusClient`]: nonzero values below the
//! minimum floor are raised to it, exact zero stays zero, and debug
//! overrides replace whatever survives.
//!
//! | Domain | AB floor       | IB floor                          |
//! |--------|----------------|-----------------------------------|
//! | MNOC   | `MIN_MNOC_AB`  | `MIN_MNOC_IB`                     |
//! | CAMNOC | `MIN_CAMNOC_AB`| `MIN_CAMNOC_IB` or debug multiplier |

use cpas_hal::{BusClient, BusPath, HalResult};

use crate::debug::DebugSettings;
use crate::vote::{DrvVote, LaneBw};

/// Minimum nonzero MNOC AB vote
pub const MIN_MNOC_AB: u64 = 2048 * 1024;

/// Minimum nonzero MNOC IB vote
pub const MIN_MNOC_IB: u64 = 2048 * 1024;

/// Minimum nonzero CAMNOC AB vote
pub const MIN_CAMNOC_AB: u64 = 2048 * 1024;

/// Minimum nonzero CAMNOC IB vote
pub const MIN_CAMNOC_IB: u64 = 3_000_000_000;

/// Unit of the `min_camnoc_ib_mul` debug knob
pub const CAMNOC_IB_MUL_UNIT: u64 = 1_000_000;

/// Raise a nonzero value to `min`
#[inline]
pub const fn apply_floor(value: u64, min: u64) -> u64 {
    if value > 0 && value < min {
        min
    } else {
        value
    }
}

/// CAMNOC IB floor in effect
pub fn min_camnoc_ib(settings: &DebugSettings) -> u64 {
    if settings.min_camnoc_ib_mul > 0 {
        settings.min_camnoc_ib_mul.saturating_mul(CAMNOC_IB_MUL_UNIT)
    } else {
        MIN_CAMNOC_IB
    }
}

/// Floor and override an HLOS `(ab, ib)` pair
pub fn hlos_values(port: &str, ab: u64, ib: u64, camnoc: bool, settings: &DebugSettings) -> (u64, u64) {
    let (mut ab, mut ib) = if camnoc {
        (apply_floor(ab, MIN_CAMNOC_AB), apply_floor(ib, min_camnoc_ib(settings)))
    } else {
        (apply_floor(ab, MIN_MNOC_AB), apply_floor(ib, MIN_MNOC_IB))
    };

    if ab != 0 || ib != 0 {
        if let Some(o) = settings.hlos_override(port) {
            let (curr_ab, curr_ib) = (ab, ib);
            if o.ab != 0 {
                ab = o.ab;
            }
            if o.ib != 0 {
                ib = o.ib;
            }
            log::info!(
                "overriding {} with ab={} ib={}, curr ab={} ib={}",
                port,
                ab,
                ib,
                curr_ab,
                curr_ib
            );
        }
    }

    (ab, ib)
}

/// Floor and override a DRV HIGH/LOW pair
pub fn drv_values(port: &str, vote: DrvVote, settings: &DebugSettings) -> DrvVote {
    let mut out = DrvVote {
        high: LaneBw {
            ab: apply_floor(vote.high.ab, MIN_MNOC_AB),
            ib: apply_floor(vote.high.ib, MIN_MNOC_IB),
            camnoc: vote.high.camnoc,
        },
        low: LaneBw {
            ab: apply_floor(vote.low.ab, MIN_MNOC_AB),
            ib: apply_floor(vote.low.ib, MIN_MNOC_IB),
            camnoc: vote.low.camnoc,
        },
    };

    let nonzero = out.high.ab != 0 || out.high.ib != 0 || out.low.ab != 0 || out.low.ib != 0;
    if nonzero {
        if let Some(o) = settings.drv_override(port) {
            if o.high_ab != 0 {
                out.high.ab = o.high_ab;
            }
            if o.high_ib != 0 {
                out.high.ib = o.high_ib;
            }
            if o.low_ab != 0 {
                out.low.ab = o.low_ab;
            }
            if o.low_ib != 0 {
                out.low.ib = o.low_ib;
            }
            if o.low_set_zero {
                out.low.ab = 0;
                out.low.ib = 0;
            }
            log::info!(
                "overriding {} with high=[{} {}] low=[{} {}]",
                port,
                out.high.ab,
                out.high.ib,
                out.low.ab,
                out.low.ib
            );
        }
    }

    out
}

/// Send an HLOS vote, returning the applied `(ab, ib)`
pub fn vote_hlos(
    bus: &mut dyn BusClient,
    port: &str,
    ab: u64,
    ib: u64,
    camnoc: bool,
    settings: &DebugSettings,
) -> HalResult<(u64, u64)> {
    let (ab, ib) = hlos_values(port, ab, ib, camnoc, settings);
    bus.update_bandwidth(ab, ib, BusPath::Hlos).map_err(|e| {
        log::error!("{}: {} vote ab={} ib={} failed: {}", port, BusPath::Hlos.name(), ab, ib, e);
        e
    })?;
    Ok((ab, ib))
}

/// Send a DRV vote, HIGH first, returning the applied pair
pub fn vote_drv(bus: &mut dyn BusClient, port: &str, vote: DrvVote, settings: &DebugSettings) -> HalResult<DrvVote> {
    let vote = drv_values(port, vote, settings);
    log::debug!(
        "{}: drv vote high=[{} {}] low=[{} {}]",
        port,
        vote.high.ab,
        vote.high.ib,
        vote.low.ab,
        vote.low.ib
    );

    for (path, bw) in [(BusPath::DrvHigh, vote.high), (BusPath::DrvLow, vote.low)] {
        bus.update_bandwidth(bw.ab, bw.ib, path).map_err(|e| {
            log::error!("{}: {} vote ab={} ib={} failed: {}", port, path.name(), bw.ab, bw.ib, e);
            e
        })?;
    }

    Ok(vote)
}
