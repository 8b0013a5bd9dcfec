//! # CPAS Top Hooks
//!
//! Version-specific hardware steps run around the first start and the last
//! stop: Q-channel handshake, power-on QoS programming, the power-off flush
//! poll, and the capability reads done at probe.
//!
//! ## Q-Channel Handshake
//!
//! ```text
//!   power on :                      poll status & QACCEPTN == QACCEPTN
//!   power off: write ctrl = 0, then poll status & (QACCEPTN|QDENY) == 0
//!              QDENY still set afterwards ─▶ Busy
//! ```
//!
//! Every CAMNOC of the profile has its own ctrl/status pair. A timeout on one
//! CAMNOC is logged and the next one is still handshaken.

use heapless::Vec as HVec;

use cpas_hal::{HalError, Platform, RegBase, RegisterMap};

use crate::error::{ConfigError, CpasError, CpasResult};
use crate::profile::{regs as top_regs, FillLevel, HardwareProfile, HwVersion, MAX_CAMNOCS, MAX_CAPS_REGISTERS, MAX_FILL_LEVELS};

// =============================================================================
// Constants
// =============================================================================

/// Poll retries for ordinary register waits
pub const POLL_RETRY_CNT: u32 = 5;

/// Poll retries for the Q-channel handshake
pub const POLL_QH_RETRY_CNT: u32 = 50;

/// Delay between poll retries in microseconds
pub const POLL_DELAY_US: u32 = 200;

/// Q-channel status bits
mod qstat {
    /// Quiescence request accepted
    pub const QACCEPTN: u32 = 1 << 0;
    /// Quiescence request denied
    pub const QDENY: u32 = 1 << 1;
}

/// One sampled fill-level register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillSample {
    /// Port name
    pub port: &'static str,
    /// Raw MAXWR value
    pub raw: u32,
}

/// Fill levels of every CAMNOC
pub type FillSamples = HVec<FillSample, { MAX_FILL_LEVELS * MAX_CAMNOCS }>;

/// Capability register values
pub type CapsRegisters = HVec<u32, MAX_CAPS_REGISTERS>;

// =============================================================================
// CPAS Top
// =============================================================================

/// Profile-driven CPASTOP and CAMNOC register sequences
#[derive(Debug, Clone)]
pub struct CpasTop {
    profile: HardwareProfile,
    caps: CapsRegisters,
}

impl CpasTop {
    /// Read the version registers and resolve the profile
    ///
    /// Registers must be accessible.
    pub fn init(regs: &RegisterMap) -> CpasResult<Self> {
        let version = read_hw_version(regs)?;
        let profile = HardwareProfile::initialize(version)?;
        let caps = read_capabilities(regs, &profile)?;

        log::info!(
            "cpas top: titan {} ({}), {} caps registers",
            profile.titan.family(),
            version,
            caps.len()
        );
        Ok(Self { profile, caps })
    }

    /// Wrap an already resolved profile
    pub fn with_profile(profile: HardwareProfile, caps: CapsRegisters) -> Self {
        Self { profile, caps }
    }

    /// Hardware profile
    pub fn profile(&self) -> &HardwareProfile {
        &self.profile
    }

    /// Hardware profile, for QoS selection
    pub fn profile_mut(&mut self) -> &mut HardwareProfile {
        &mut self.profile
    }

    /// Capability register values read at init
    pub fn capabilities(&self) -> &[u32] {
        &self.caps
    }

    // -------------------------------------------------------------------------
    // Power hooks
    // -------------------------------------------------------------------------

    /// Q-channel handshake on every CAMNOC
    ///
    /// With `force_on` the control register is written before waiting for
    /// acceptance. A timeout is reported only after all CAMNOCs were tried.
    pub fn qchannel_handshake(
        &self,
        regs: &RegisterMap,
        platform: &dyn Platform,
        power_on: bool,
        force_on: bool,
    ) -> CpasResult<()> {
        let phase = if power_on { "START" } else { "STOP" };
        let mut ret: CpasResult<()> = Ok(());

        for q in self.profile.qchannels.iter() {
            let (mask, expected) = if power_on {
                if force_on {
                    regs.write(RegBase::CpasTop, q.ctrl, 0x1, true)?;
                    log::debug!("force qchannel on for {}", q.camnoc);
                }
                (qstat::QACCEPTN, qstat::QACCEPTN)
            } else {
                regs.write(RegBase::CpasTop, q.ctrl, 0x0, true)?;
                (qstat::QACCEPTN | qstat::QDENY, 0)
            };

            match regs.poll(
                platform,
                RegBase::CpasTop,
                q.status,
                mask,
                expected,
                POLL_QH_RETRY_CNT,
                POLL_DELAY_US,
            ) {
                Ok(()) => {},
                Err(HalError::Timeout) => {
                    let status = regs.read(RegBase::CpasTop, q.status).unwrap_or(0);
                    log::error!("cpas_{} {} idle sequence failed, qstat {:#x}", phase, q.camnoc, status);
                    ret = Err(HalError::Timeout.into());
                },
                Err(e) => return Err(e.into()),
            }

            let status = regs.read(RegBase::CpasTop, q.status)?;
            log::debug!("cpas_{} {}: qchannel status {:#x}", phase, q.camnoc, status);
            if !power_on && status & qstat::QDENY != 0 {
                ret = Err(HalError::Busy.into());
            }
        }

        ret
    }

    /// Program the active QoS set
    pub fn power_on(&self, regs: &RegisterMap) -> CpasResult<()> {
        for w in self.profile.qos().iter() {
            log::debug!("qos {} {:#x} = {:#x}", w.base.name(), w.offset, w.value);
            regs.write(w.base, w.offset, w.value, true).map_err(|e| {
                log::error!("qos write {} {:#x} failed: {}", w.base.name(), w.offset, e);
                e
            })?;
        }
        Ok(())
    }

    /// Wait for pending CAMNOC transactions to flush
    ///
    /// A flush that never completes is only logged.
    pub fn power_off(&self, regs: &RegisterMap, platform: &dyn Platform) -> CpasResult<()> {
        let Some(flush) = self.profile.flush else {
            return Ok(());
        };

        let res = regs.poll(
            platform,
            flush.base,
            flush.offset,
            flush.mask,
            flush.expected,
            POLL_RETRY_CNT,
            POLL_DELAY_US,
        );
        match res {
            Ok(()) => Ok(()),
            Err(HalError::Timeout) => {
                log::debug!("camnoc flush of pending transactions did not complete");
                Ok(())
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Log the QoS registers as currently programmed
    pub fn log_qos(&self, regs: &RegisterMap) {
        let Some(guard) = regs.access() else {
            log::info!("qos registers skipped, soc not accessible");
            return;
        };
        for w in self.profile.qos().iter() {
            match guard.map().read(w.base, w.offset) {
                Ok(v) => log::info!("qos {} {:#x}: {:#x} (programmed {:#x})", w.base.name(), w.offset, v, w.value),
                Err(e) => log::info!("qos {} {:#x}: {}", w.base.name(), w.offset, e),
            }
        }
    }

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    /// Sample the fill-level registers
    ///
    /// Empty while the SoC is not accessible.
    pub fn fill_levels(&self, regs: &RegisterMap) -> FillSamples {
        let mut out = FillSamples::new();
        let Some(guard) = regs.access() else {
            return out;
        };

        for fl in self.profile.fill_levels.iter() {
            let Ok(raw) = guard.map().read(fl.base, fl.offset) else {
                continue;
            };
            if out.push(FillSample { port: fl.port, raw }).is_err() {
                log::warn!("fill level buffer full, max {}", out.capacity());
                break;
            }
        }
        out
    }
}

impl FillSample {
    /// Queue length field
    pub const fn queue_len(&self) -> u32 {
        FillLevel::queue_len(self.raw)
    }

    /// Max fill field
    pub const fn max_fill(&self) -> u32 {
        FillLevel::max_fill(self.raw)
    }
}

// =============================================================================
// Probe reads
// =============================================================================

/// Read and decode the version registers
pub fn read_hw_version(regs: &RegisterMap) -> CpasResult<HwVersion> {
    let camera = regs.read(RegBase::CpasTop, top_regs::CAMERA_VERSION)?;
    let cpas = regs.read(RegBase::CpasTop, top_regs::CPAS_VERSION)?;
    let version = HwVersion::decode(camera, cpas);
    log::debug!("hw version raw camera {:#x} cpas {:#x}: {}", camera, cpas, version);
    Ok(version)
}

/// Read the capability registers named by the profile
pub fn read_capabilities(regs: &RegisterMap, profile: &HardwareProfile) -> CpasResult<CapsRegisters> {
    let offsets = profile.caps_offsets;
    if offsets.is_empty() || offsets.len() > MAX_CAPS_REGISTERS {
        log::error!("invalid number of caps registers: {}", offsets.len());
        return Err(ConfigError::InvalidCapsRegisters.into());
    }

    let mut caps = CapsRegisters::new();
    for (i, &off) in offsets.iter().enumerate() {
        let v = regs.read(RegBase::CpasTop, off)?;
        log::debug!("camera caps {} = {:#x}", i, v);
        caps.push(v).map_err(|_| CpasError::Config(ConfigError::InvalidCapsRegisters))?;
    }
    Ok(caps)
}
