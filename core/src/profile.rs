//! # Hardware Profiles
//!
//! Per-generation register layout of the CPAS top block and the CAMNOC.
//!
//! The camera and CPAS version registers are decoded at probe and matched
//! against the table of known Titan generations. The resulting profile
//! lists everything the engine touches by offset:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ HardwareProfile                                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  camnocs       COMBINED  or  RT + NRT                        │
//! │  qchannels     one ctrl/status pair per CAMNOC (CPASTOP)     │
//! │  caps_offsets  capability registers (CPASTOP)                │
//! │  qos           static QoS writes applied at power-on         │
//! │  custom_qos    alternate QoS set (selectable generations)    │
//! │  fill_levels   MAXWR registers sampled by the monitor        │
//! │  flush         pending-transaction poll run at power-off     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Version Registers
//!
//! | Register  | Offset | major          | minor          | incr     |
//! |-----------|--------|----------------|----------------|----------|
//! | camera    | 0x0    | `[23:16]`      | `[15:8]`       | `[7:0]`  |
//! | cpas      | 0x4    | `[31:28]`      | `[27:16]`      | `[15:0]` |

use core::fmt;

use bitflags::bitflags;
use cpas_hal::RegBase;

use crate::error::{ConfigError, CpasError, CpasResult};

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of capability registers
pub const MAX_CAPS_REGISTERS: usize = 2;

/// Maximum number of fill-level registers sampled per CAMNOC
pub const MAX_FILL_LEVELS: usize = 6;

/// Maximum number of CAMNOC instances
pub const MAX_CAMNOCS: usize = 2;

/// CPASTOP register offsets
pub mod regs {
    /// Camera version
    pub const CAMERA_VERSION: u32 = 0x0;
    /// CPAS version
    pub const CPAS_VERSION: u32 = 0x4;
}

bitflags! {
    /// QoS set requested by `select_qos`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QosSelection: u32 {
        /// Generation default settings
        const DEFAULT = 1 << 0;
        /// Custom settings
        const CUSTOM = 1 << 1;
    }
}

// =============================================================================
// Versions
// =============================================================================

/// `major.minor.incr` triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    /// Major
    pub major: u32,
    /// Minor
    pub minor: u32,
    /// Increment
    pub incr: u32,
}

impl Version {
    /// Build a version
    pub const fn new(major: u32, minor: u32, incr: u32) -> Self {
        Self { major, minor, incr }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.incr)
    }
}

/// Decoded camera and CPAS versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HwVersion {
    /// Camera (Titan) version
    pub camera: Version,
    /// CPAS version
    pub cpas: Version,
}

impl HwVersion {
    /// Decode the two raw version registers
    pub const fn decode(camera: u32, cpas: u32) -> Self {
        Self {
            camera: Version::new((camera & 0xff_0000) >> 16, (camera & 0xff00) >> 8, camera & 0xff),
            cpas: Version::new((cpas & 0xf000_0000) >> 28, (cpas & 0x0fff_0000) >> 16, cpas & 0xffff),
        }
    }

    /// Titan generation for this version pair
    pub fn titan(&self) -> Option<TitanVersion> {
        use TitanVersion::*;

        let c = (self.camera.major, self.camera.minor, self.camera.incr);
        let p = (self.cpas.major, self.cpas.minor, self.cpas.incr);

        let v = match (c, p) {
            ((1, 5, 0), (1, 0, 0)) => Titan150V100,
            ((1, 6, 5), (1, 0, 0)) => Titan165V100,
            ((1, 7, 0), (1, 0, 0)) => Titan170V100,
            ((1, 7, 0), (1, 1, 0)) => Titan170V110,
            ((1, 7, 0), (1, 2, 0)) => Titan170V120,
            ((1, 7, 0), (2, 0, 0)) => Titan170V200,
            ((1, 7, 5), (1, 0, 0)) => Titan175V100,
            ((1, 7, 5), (1, 0, 1)) => Titan175V101,
            ((1, 7, 5), (1, 2, 0)) => Titan175V120,
            ((1, 7, 5), (1, 3, 0)) => Titan175V130,
            ((4, 8, 0), (1, 0, 0)) => Titan480V100,
            ((5, 2, 0), (1, 0, 0)) => Titan520V100,
            ((5, 4, 0), (1, 0, 0)) => Titan540V100,
            ((5, 4, 5), (1, 0, 0)) => Titan545V100,
            ((5, 7, 0), (1, 0, 0)) => Titan570V100,
            ((5, 7, 0), (2, 0, 0)) => Titan570V200,
            ((5, 8, 0), (1, 0, 0)) => Titan580V100,
            ((6, 4, 0), (2, 0, 0)) => Titan640V200,
            ((6, 8, 0), (1, 0, 0)) => Titan680V100,
            ((6, 8, 0), (1, 1, 0)) => Titan680V110,
            ((7, 8, 0), (1, 0, 0)) => Titan780V100,
            ((8, 8, 0), (1, 0, 0)) => Titan880V100,
            ((9, 8, 0), (1, 0, 0)) => Titan980V100,
            _ => return None,
        };
        Some(v)
    }
}

impl fmt::Display for HwVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "camera {} cpas {}", self.camera, self.cpas)
    }
}

/// Known Titan generations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TitanVersion {
    Titan150V100,
    Titan165V100,
    Titan170V100,
    Titan170V110,
    Titan170V120,
    Titan170V200,
    Titan175V100,
    Titan175V101,
    Titan175V120,
    Titan175V130,
    Titan480V100,
    Titan520V100,
    Titan540V100,
    Titan545V100,
    Titan570V100,
    Titan570V200,
    Titan580V100,
    Titan640V200,
    Titan680V100,
    Titan680V110,
    Titan780V100,
    Titan880V100,
    Titan980V100,
}

impl TitanVersion {
    /// Titan family number (480, 880, ...)
    pub const fn family(self) -> u32 {
        use TitanVersion::*;
        match self {
            Titan150V100 => 150,
            Titan165V100 => 165,
            Titan170V100 | Titan170V110 | Titan170V120 | Titan170V200 => 170,
            Titan175V100 | Titan175V101 | Titan175V120 | Titan175V130 => 175,
            Titan480V100 => 480,
            Titan520V100 => 520,
            Titan540V100 => 540,
            Titan545V100 => 545,
            Titan570V100 | Titan570V200 => 570,
            Titan580V100 => 580,
            Titan640V200 => 640,
            Titan680V100 | Titan680V110 => 680,
            Titan780V100 => 780,
            Titan880V100 => 880,
            Titan980V100 => 980,
        }
    }
}

// =============================================================================
// Register Descriptions
// =============================================================================

/// One static register write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegWrite {
    /// Register window
    pub base: RegBase,
    /// Offset in the window
    pub offset: u32,
    /// Value written
    pub value: u32,
}

const fn w(base: RegBase, offset: u32, value: u32) -> RegWrite {
    RegWrite { base, offset, value }
}

/// Q-channel control/status pair for one CAMNOC, in the CPASTOP window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QChannel {
    /// CAMNOC name used in logs
    pub camnoc: &'static str,
    /// Control register
    pub ctrl: u32,
    /// Status register
    pub status: u32,
}

/// Fill-level register of one CAMNOC port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillLevel {
    /// Port name
    pub port: &'static str,
    /// Register window
    pub base: RegBase,
    /// MAXWR offset
    pub offset: u32,
}

impl FillLevel {
    /// Queue length field of a raw value
    pub const fn queue_len(raw: u32) -> u32 {
        raw & 0x7ff
    }

    /// Max fill field of a raw value
    pub const fn max_fill(raw: u32) -> u32 {
        (raw & 0x7f_0000) >> 16
    }
}

/// Pending-transaction poll run before power-off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPoll {
    /// Register window
    pub base: RegBase,
    /// Sense register offset
    pub offset: u32,
    /// Bits to watch
    pub mask: u32,
    /// Value expected once drained
    pub expected: u32,
}

// =============================================================================
// Static Tables
// =============================================================================

mod tables {
    use super::*;

    pub const COMBINED: &[RegBase] = &[RegBase::Camnoc];
    pub const SPLIT: &[RegBase] = &[RegBase::CamnocRt, RegBase::CamnocNrt];

    pub const QCH_COMBINED: &[QChannel] = &[QChannel {
        camnoc: "CAMNOC_COMBINED",
        ctrl: 0x14,
        status: 0x18,
    }];
    pub const QCH_SPLIT: &[QChannel] = &[
        QChannel {
            camnoc: "CAMNOC_RT",
            ctrl: 0xec,
            status: 0xf0,
        },
        QChannel {
            camnoc: "CAMNOC_NRT",
            ctrl: 0xf4,
            status: 0xf8,
        },
    ];

    pub const CAPS_ONE: &[u32] = &[0x8];
    pub const CAPS_TWO: &[u32] = &[0x8, 0xdc];

    pub const QOS_LEGACY: &[RegWrite] = &[
        w(RegBase::Camnoc, 0x30, 0x6666_5433),
        w(RegBase::Camnoc, 0x34, 0x6666_6666),
        w(RegBase::Camnoc, 0x38, 0x0000_0003),
    ];

    pub const QOS_480: &[RegWrite] = &[
        w(RegBase::Camnoc, 0xa30, 0x6666_5433),
        w(RegBase::Camnoc, 0xa34, 0x6666_6666),
        w(RegBase::Camnoc, 0xa38, 0x0000_1e40),
        w(RegBase::Camnoc, 0xe30, 0x3333_3333),
        w(RegBase::Camnoc, 0xe34, 0x3333_3333),
    ];
    pub const QOS_480_CUSTOM: &[RegWrite] = &[
        w(RegBase::Camnoc, 0xa30, 0x5555_4433),
        w(RegBase::Camnoc, 0xa34, 0x6666_6655),
        w(RegBase::Camnoc, 0xa38, 0x0000_1030),
        w(RegBase::Camnoc, 0xe30, 0x2222_2222),
        w(RegBase::Camnoc, 0xe34, 0x2222_2222),
    ];

    pub const QOS_580: &[RegWrite] = &[
        w(RegBase::Camnoc, 0x2430, 0x6666_5433),
        w(RegBase::Camnoc, 0x2434, 0x6666_6666),
        w(RegBase::Camnoc, 0x2438, 0x0000_1e40),
        w(RegBase::Camnoc, 0x2830, 0x3333_3333),
        w(RegBase::Camnoc, 0x2834, 0x3333_3333),
    ];
    pub const QOS_580_CUSTOM: &[RegWrite] = &[
        w(RegBase::Camnoc, 0x2430, 0x5555_4433),
        w(RegBase::Camnoc, 0x2434, 0x6666_6655),
        w(RegBase::Camnoc, 0x2438, 0x0000_1030),
        w(RegBase::Camnoc, 0x2830, 0x2222_2222),
        w(RegBase::Camnoc, 0x2834, 0x2222_2222),
    ];

    pub const QOS_6XX_7XX: &[RegWrite] = &[
        w(RegBase::Camnoc, 0x2830, 0x6666_5433),
        w(RegBase::Camnoc, 0x2834, 0x6666_6666),
        w(RegBase::Camnoc, 0x2838, 0x0000_1030),
        w(RegBase::Camnoc, 0x3230, 0x3333_3333),
        w(RegBase::Camnoc, 0x3234, 0x3333_3333),
    ];

    pub const QOS_880: &[RegWrite] = &[
        w(RegBase::Camnoc, 0x3630, 0x6666_5433),
        w(RegBase::Camnoc, 0x3634, 0x6666_6666),
        w(RegBase::Camnoc, 0x3638, 0x0000_1030),
        w(RegBase::Camnoc, 0x4030, 0x3333_3333),
        w(RegBase::Camnoc, 0x4034, 0x3333_3333),
    ];

    pub const QOS_980: &[RegWrite] = &[
        w(RegBase::CamnocRt, 0x4030, 0x6666_5433),
        w(RegBase::CamnocRt, 0x4034, 0x6666_6666),
        w(RegBase::CamnocRt, 0x4038, 0x0000_1030),
        w(RegBase::CamnocNrt, 0x5830, 0x3333_3333),
        w(RegBase::CamnocNrt, 0x5834, 0x3333_3333),
    ];

    pub const FILL_NONE: &[FillLevel] = &[];
    pub const FILL_6XX_7XX: &[FillLevel] = &[
        FillLevel {
            port: "IFE_LINEAR",
            base: RegBase::Camnoc,
            offset: 0x2a20,
        },
        FillLevel {
            port: "IFE_RDI_WR",
            base: RegBase::Camnoc,
            offset: 0x2c20,
        },
    ];
    pub const FILL_880: &[FillLevel] = &[
        FillLevel {
            port: "IFE_LINEAR_PDAF",
            base: RegBase::Camnoc,
            offset: 0x3820,
        },
        FillLevel {
            port: "IFE_RDI_SFE",
            base: RegBase::Camnoc,
            offset: 0x3a20,
        },
    ];
    pub const FILL_980: &[FillLevel] = &[
        FillLevel {
            port: "RT0-TFE_LINEAR_RDI",
            base: RegBase::CamnocRt,
            offset: 0x4220,
        },
        FillLevel {
            port: "RT2-TFE_STATS",
            base: RegBase::CamnocRt,
            offset: 0x4620,
        },
    ];

    pub const FLUSH_6XX_7XX: FlushPoll = FlushPoll {
        base: RegBase::Camnoc,
        offset: 0x2300,
        mask: 0xe_0000,
        expected: 0,
    };
}

// =============================================================================
// Hardware Profile
// =============================================================================

/// Register layout of one Titan generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareProfile {
    /// Decoded versions
    pub version: HwVersion,
    /// Generation
    pub titan: TitanVersion,
    /// CAMNOC windows, RT (or combined) first
    pub camnocs: &'static [RegBase],
    /// Q-channel pairs, one per CAMNOC
    pub qchannels: &'static [QChannel],
    /// Capability register offsets
    pub caps_offsets: &'static [u32],
    /// Generation default QoS writes
    pub default_qos: &'static [RegWrite],
    /// Alternate QoS writes when the generation supports selection
    pub custom_qos: Option<&'static [RegWrite]>,
    /// Fill-level registers sampled by the monitor
    pub fill_levels: &'static [FillLevel],
    /// Pending-transaction poll before power-off
    pub flush: Option<FlushPoll>,
    qos: &'static [RegWrite],
}

impl HardwareProfile {
    /// Resolve the profile for a decoded version pair
    pub fn initialize(version: HwVersion) -> CpasResult<Self> {
        use tables::*;
        use TitanVersion::*;

        let Some(titan) = version.titan() else {
            log::error!("camera version not supported: {}", version);
            return Err(ConfigError::UnknownHardwareVersion.into());
        };

        let mut p = Self {
            version,
            titan,
            camnocs: COMBINED,
            qchannels: QCH_COMBINED,
            caps_offsets: CAPS_ONE,
            default_qos: QOS_LEGACY,
            custom_qos: None,
            fill_levels: FILL_NONE,
            flush: None,
            qos: QOS_LEGACY,
        };

        match titan {
            Titan480V100 => {
                p.default_qos = QOS_480;
                p.custom_qos = Some(QOS_480_CUSTOM);
            },
            Titan580V100 => {
                p.default_qos = QOS_580;
                p.custom_qos = Some(QOS_580_CUSTOM);
            },
            Titan520V100 | Titan540V100 | Titan545V100 | Titan570V100 | Titan570V200 => {
                p.default_qos = QOS_580;
            },
            Titan640V200 | Titan680V100 | Titan680V110 | Titan780V100 => {
                p.default_qos = QOS_6XX_7XX;
                p.fill_levels = FILL_6XX_7XX;
                p.flush = Some(FLUSH_6XX_7XX);
            },
            Titan880V100 => {
                p.caps_offsets = CAPS_TWO;
                p.default_qos = QOS_880;
                p.fill_levels = FILL_880;
            },
            Titan980V100 => {
                p.camnocs = SPLIT;
                p.qchannels = QCH_SPLIT;
                p.caps_offsets = CAPS_TWO;
                p.default_qos = QOS_980;
                p.fill_levels = FILL_980;
            },
            _ => {},
        }
        p.qos = p.default_qos;

        log::debug!("hw profile titan {} ({}) camnocs={}", titan.family(), version, p.camnocs.len());
        Ok(p)
    }

    /// QoS writes applied at power-on
    pub fn qos(&self) -> &'static [RegWrite] {
        self.qos
    }

    /// CAMNOC carrying real-time traffic
    pub fn rt_camnoc(&self) -> RegBase {
        self.camnocs.first().copied().unwrap_or(RegBase::Camnoc)
    }

    /// Switch the active QoS set
    ///
    /// CUSTOM wins over DEFAULT. A mask naming neither leaves the active set
    /// untouched.
    pub fn select_qos(&mut self, mask: QosSelection) -> CpasResult<()> {
        let Some(custom) = self.custom_qos else {
            log::warn!("qos selection not supported for titan {}", self.titan.family());
            return Err(CpasError::NotSupported);
        };

        if mask.contains(QosSelection::CUSTOM) {
            self.qos = custom;
        } else if mask.contains(QosSelection::DEFAULT) {
            self.qos = self.default_qos;
        } else {
            log::error!("invalid qos selection mask {:#x} for titan {}", mask.bits(), self.titan.family());
        }
        Ok(())
    }

    /// Whether the custom QoS set is active
    pub fn custom_qos_active(&self) -> bool {
        self.custom_qos.is_some_and(|c| core::ptr::eq(c, self.qos))
    }
}
