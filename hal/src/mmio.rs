//! # Memory-Mapped I/O
//!
//! Register windows of the CPAS block and the SoC-access gate in front of
//! them.
//!
//! Every access through [`RegisterMap`] first checks the SoC access count.
//! The count is raised to one when the first client powers the block up and
//! dropped when the last client powers it down; interrupt-context readers
//! take a transient reference with [`RegisterMap::access`] so the stop
//! sequence can drain them before resources go away.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicU32, Ordering};

use static_assertions::assert_impl_all;

use crate::error::{HalError, HalResult};
use crate::platform::Platform;

// =============================================================================
// REGISTER BASES
// =============================================================================

/// Register windows owned by the CPAS block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum RegBase {
    /// CPAS top-level control (Q-channel, capabilities)
    CpasTop   = 0,
    /// Combined CAMNOC
    Camnoc    = 1,
    /// Real-time CAMNOC
    CamnocRt  = 2,
    /// Non-real-time CAMNOC
    CamnocNrt = 3,
    /// RPMh sequencer
    Rpmh      = 4,
    /// CESTA controller
    Cesta     = 5,
}

impl RegBase {
    /// Number of register bases
    pub const COUNT: usize = 6;

    /// All bases in index order
    pub const ALL: [RegBase; Self::COUNT] = [
        Self::CpasTop,
        Self::Camnoc,
        Self::CamnocRt,
        Self::CamnocNrt,
        Self::Rpmh,
        Self::Cesta,
    ];

    /// Short name used in logs
    pub const fn name(self) -> &'static str {
        match self {
            Self::CpasTop => "cpas_top",
            Self::Camnoc => "camnoc",
            Self::CamnocRt => "camnoc_rt",
            Self::CamnocNrt => "camnoc_nrt",
            Self::Rpmh => "rpmh",
            Self::Cesta => "cesta",
        }
    }
}

// =============================================================================
// RAW REGISTER I/O
// =============================================================================

/// Raw 32-bit register window
///
/// Offsets are in bytes from the start of the window. Bounds are checked by
/// [`RegisterMap`] before any call reaches the implementation.
pub trait RegisterIo: Send + Sync {
    /// Window size in bytes
    fn size(&self) -> u32;

    /// Read a 32-bit register
    fn read32(&self, offset: u32) -> u32;

    /// Write a 32-bit register
    fn write32(&self, offset: u32, value: u32);
}

/// Volatile MMIO window over a mapped virtual address range
#[derive(Debug)]
pub struct MmioWindow {
    virt_addr: usize,
    size: u32,
}

impl MmioWindow {
    /// Create a window over an already mapped range
    ///
    /// # Safety
    /// - `virt_addr` must map `size` bytes of device memory
    /// - The mapping must outlive the window
    pub unsafe fn new(virt_addr: usize, size: u32) -> Self {
        Self { virt_addr, size }
    }
}

impl RegisterIo for MmioWindow {
    fn size(&self) -> u32 {
        self.size
    }

    fn read32(&self, offset: u32) -> u32 {
        let ptr = (self.virt_addr + offset as usize) as *const u32;
        // SAFETY: constructor contract guarantees the mapping, RegisterMap
        // guarantees the offset is in bounds
        unsafe { core::ptr::read_volatile(ptr) }
    }

    fn write32(&self, offset: u32, value: u32) {
        let ptr = (self.virt_addr + offset as usize) as *mut u32;
        // SAFETY: see read32
        unsafe { core::ptr::write_volatile(ptr, value) }
    }
}

// SAFETY: MMIO accesses are volatile and the window holds no CPU-side state
unsafe impl Send for MmioWindow {}
// SAFETY: see Send
unsafe impl Sync for MmioWindow {}

// =============================================================================
// REGISTER MAP
// =============================================================================

/// Set of register windows behind the SoC access count
pub struct RegisterMap {
    windows: [Option<Box<dyn RegisterIo>>; RegBase::COUNT],
    access_count: AtomicU32,
}

assert_impl_all!(RegisterMap: Send, Sync);

impl core::fmt::Debug for RegisterMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut mapped = [false; RegBase::COUNT];
        for (slot, window) in mapped.iter_mut().zip(self.windows.iter()) {
            *slot = window.is_some();
        }
        f.debug_struct("RegisterMap")
            .field("mapped", &mapped)
            .field("access_count", &self.soc_access_count())
            .finish()
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterMap {
    /// Create an empty map with access closed
    pub fn new() -> Self {
        Self {
            windows: Default::default(),
            access_count: AtomicU32::new(0),
        }
    }

    /// Attach a register window to a base
    pub fn map(&mut self, base: RegBase, io: Box<dyn RegisterIo>) {
        self.windows[base as usize] = Some(io);
    }

    /// Builder form of [`RegisterMap::map`]
    pub fn with(mut self, base: RegBase, io: Box<dyn RegisterIo>) -> Self {
        self.map(base, io);
        self
    }

    /// Check whether a base has a window
    pub fn is_mapped(&self, base: RegBase) -> bool {
        self.windows[base as usize].is_some()
    }

    // -------------------------------------------------------------------------
    // SoC access count
    // -------------------------------------------------------------------------

    /// Current SoC access count
    pub fn soc_access_count(&self) -> u32 {
        self.access_count.load(Ordering::Acquire)
    }

    /// Whether registers may currently be touched
    pub fn is_accessible(&self) -> bool {
        self.soc_access_count() > 0
    }

    /// Open access after power-up
    pub fn grant_access(&self) {
        self.access_count.store(1, Ordering::Release);
    }

    /// Drop the power-up reference, returning the remaining count
    pub fn revoke_access(&self) -> u32 {
        let prev = self
            .access_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some(c.saturating_sub(1)))
            .unwrap_or(0);
        prev.saturating_sub(1)
    }

    /// Take a transient access reference if the SoC is accessible
    pub fn access(&self) -> Option<AccessGuard<'_>> {
        self.access_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                if c == 0 { None } else { Some(c + 1) }
            })
            .ok()
            .map(|_| AccessGuard { map: self })
    }

    /// Take an access reference even while the count is zero
    ///
    /// Only for teardown steps that run after the drain but before the
    /// platform resources are switched off.
    pub fn hold_access(&self) -> AccessGuard<'_> {
        self.access_count.fetch_add(1, Ordering::AcqRel);
        AccessGuard { map: self }
    }

    /// Wait for outstanding access references to drain
    ///
    /// Bounded by `retries` sleeps of `delay_us`.
    pub fn drain(&self, platform: &dyn Platform, retries: u32, delay_us: u32) -> HalResult<()> {
        for _ in 0..retries {
            if self.soc_access_count() == 0 {
                return Ok(());
            }
            platform.delay_us(delay_us);
        }

        if self.soc_access_count() == 0 {
            Ok(())
        } else {
            log::warn!("soc access drain timed out, count={}", self.soc_access_count());
            Err(HalError::Timeout)
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    fn window(&self, base: RegBase, offset: u32) -> HalResult<&dyn RegisterIo> {
        if !self.is_accessible() {
            return Err(HalError::AccessDenied);
        }

        let io = self.windows[base as usize]
            .as_deref()
            .ok_or(HalError::UnmappedBase)?;

        if offset % 4 != 0 || offset as u64 + 4 > io.size() as u64 {
            log::error!("{} offset {:#x} outside window of {:#x}", base.name(), offset, io.size());
            return Err(HalError::OutOfBounds);
        }

        Ok(io)
    }

    /// Read a register
    pub fn read(&self, base: RegBase, offset: u32) -> HalResult<u32> {
        let io = self.window(base, offset)?;
        let value = io.read32(offset);
        fence::mmio_read_barrier();
        Ok(value)
    }

    /// Write a register, optionally followed by a write barrier
    pub fn write(&self, base: RegBase, offset: u32, value: u32, barrier: bool) -> HalResult<()> {
        let io = self.window(base, offset)?;
        if barrier {
            fence::mmio_write_barrier();
        }
        io.write32(offset, value);
        if barrier {
            fence::mmio_write_barrier();
        }
        Ok(())
    }

    /// Poll a register until `(value & mask) == expected`
    pub fn poll(
        &self,
        platform: &dyn Platform,
        base: RegBase,
        offset: u32,
        mask: u32,
        expected: u32,
        retries: u32,
        delay_us: u32,
    ) -> HalResult<()> {
        for _ in 0..retries {
            if self.read(base, offset)? & mask == expected {
                return Ok(());
            }
            platform.delay_us(delay_us);
        }

        if self.read(base, offset)? & mask == expected {
            Ok(())
        } else {
            Err(HalError::Timeout)
        }
    }
}

/// Transient SoC access reference
#[derive(Debug)]
pub struct AccessGuard<'a> {
    map: &'a RegisterMap,
}

impl AccessGuard<'_> {
    /// Register map this guard keeps open
    pub fn map(&self) -> &RegisterMap {
        self.map
    }
}

impl Drop for AccessGuard<'_> {
    fn drop(&mut self) {
        self.map.access_count.fetch_sub(1, Ordering::AcqRel);
    }
}

// =============================================================================
// MEMORY FENCE OPERATIONS
// =============================================================================

/// Memory barrier types for MMIO
pub mod fence {
    //! Memory barrier operations

    /// Compiler fence (prevents reordering)
    #[inline(always)]
    pub fn compiler() {
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
    }

    /// Memory barrier around MMIO writes
    #[inline(always)]
    pub fn mmio_write_barrier() {
        #[cfg(target_arch = "aarch64")]
        {
            // SAFETY: This is a memory barrier instruction
            unsafe {
                core::arch::asm!("dmb st", options(nostack, preserves_flags));
            }
        }

        #[cfg(not(target_arch = "aarch64"))]
        {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }

    /// Memory barrier after MMIO reads
    #[inline(always)]
    pub fn mmio_read_barrier() {
        #[cfg(target_arch = "aarch64")]
        {
            // SAFETY: This is a memory barrier instruction
            unsafe {
                core::arch::asm!("dmb ld", options(nostack, preserves_flags));
            }
        }

        #[cfg(not(target_arch = "aarch64"))]
        {
            compiler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;
    use spin::Mutex;

    struct FakeWindow {
        regs: Mutex<Vec<u32>>,
    }

    impl FakeWindow {
        fn new(words: usize) -> Self {
            Self { regs: Mutex::new(vec![0; words]) }
        }
    }

    impl RegisterIo for FakeWindow {
        fn size(&self) -> u32 {
            (self.regs.lock().len() * 4) as u32
        }

        fn read32(&self, offset: u32) -> u32 {
            self.regs.lock()[(offset / 4) as usize]
        }

        fn write32(&self, offset: u32, value: u32) {
            self.regs.lock()[(offset / 4) as usize] = value;
        }
    }

    struct NoopPlatform;

    impl Platform for NoopPlatform {
        fn enable_resources(&self, _level: crate::VoteLevel) -> HalResult<()> {
            Ok(())
        }
        fn disable_resources(&self) -> HalResult<()> {
            Ok(())
        }
        fn disable_irq(&self) {}
        fn timestamp_ns(&self) -> u64 {
            0
        }
        fn delay_us(&self, _us: u32) {}
    }

    fn map() -> RegisterMap {
        RegisterMap::new().with(RegBase::CpasTop, Box::new(FakeWindow::new(16)))
    }

    #[test]
    fn test_access_denied_while_closed() {
        let regs = map();
        assert_eq!(regs.read(RegBase::CpasTop, 0), Err(HalError::AccessDenied));
        assert_eq!(regs.write(RegBase::CpasTop, 0, 1, true), Err(HalError::AccessDenied));
        assert!(regs.access().is_none());
    }

    #[test]
    fn test_read_write_when_granted() {
        let regs = map();
        regs.grant_access();
        regs.write(RegBase::CpasTop, 0x8, 0xabcd, true).unwrap();
        assert_eq!(regs.read(RegBase::CpasTop, 0x8), Ok(0xabcd));
        assert_eq!(regs.read(RegBase::Camnoc, 0), Err(HalError::UnmappedBase));
        assert_eq!(regs.read(RegBase::CpasTop, 0x40), Err(HalError::OutOfBounds));
        assert_eq!(regs.read(RegBase::CpasTop, 0x2), Err(HalError::OutOfBounds));
    }

    #[test]
    fn test_guard_holds_count_until_drop() {
        let regs = map();
        regs.grant_access();
        let guard = regs.access().unwrap();
        assert_eq!(regs.soc_access_count(), 2);
        assert_eq!(regs.revoke_access(), 1);
        assert_eq!(regs.drain(&NoopPlatform, 3, 1), Err(HalError::Timeout));
        drop(guard);
        assert_eq!(regs.drain(&NoopPlatform, 3, 1), Ok(()));
    }

    #[test]
    fn test_poll_timeout_and_success() {
        let regs = map();
        regs.grant_access();
        assert_eq!(
            regs.poll(&NoopPlatform, RegBase::CpasTop, 0x4, 0x1, 0x1, 5, 1),
            Err(HalError::Timeout)
        );
        regs.write(RegBase::CpasTop, 0x4, 0x3, false).unwrap();
        assert_eq!(regs.poll(&NoopPlatform, RegBase::CpasTop, 0x4, 0x1, 0x1, 5, 1), Ok(()));
    }

    #[test]
    fn test_hold_access_after_drain() {
        let regs = map();
        regs.grant_access();
        regs.revoke_access();
        {
            let guard = regs.hold_access();
            assert_eq!(guard.map().write(RegBase::CpasTop, 0x0, 1, true), Ok(()));
        }
        assert_eq!(regs.soc_access_count(), 0);
    }
}
