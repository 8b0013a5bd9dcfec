//! # CPAS Bandwidth-Arbitration Engine
//!
//! Hierarchical bandwidth voting for the camera subsystem. Many camera
//! hardware blocks (IFE, SFE, IPE, compression engines) request bandwidth
//! per traffic path; the engine folds those requests through a tree of
//! merge nodes and issues the minimal set of bus, clock and priority votes
//! that cover them.
//!
//! ## Components
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         CpasDevice (lifecycle)                       │
//! │   register ─▶ start ─▶ update_axi / update_ahb ─▶ stop ─▶ unregister │
//! └──────────────┬─────────────────────────────────────┬────────────────┘
//!                │ hw mutex ▸ client mutex ▸ tree lock │
//!        ┌───────▼────────┐                    ┌───────▼────────┐
//!        │ ClientRegistry │                    │  VoteEngine    │
//!        │ (name table,   │                    │ consolidation, │
//!        │  leaf mapping) │                    │ DRV lanes      │
//!        └────────────────┘                    └──┬─────┬────┬──┘
//!                                                 │     │    │
//!                                    ┌────────────▼┐ ┌──▼──┐ ┌▼──────────┐
//!                                    │ TreeStore   │ │Ports│ │ Smart QoS │
//!                                    │ (arena)     │ │     │ │ (NIU LUTs)│
//!                                    └─────────────┘ └─────┘ └───────────┘
//! ```
//!
//! ## Voting Lanes
//!
//! | Lane | Form | Meaning                                   |
//! |------|------|-------------------------------------------|
//! | 0    | HLOS | legacy single vote `{ab, ib, camnoc}`     |
//! | 1-3  | DRV  | `{high, low}` pair per DRV hardware client |
//!
//! ## Locking
//!
//! Locks are always taken outer to inner: the hardware mutex, then the
//! per-client mutex, then the tree lock, then a port's bus-client lock.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod camnoc;
pub mod client;
pub mod config;
pub mod consolidate;
pub mod cpastop;
pub mod debug;
pub mod device;
pub mod drv;
pub mod error;
pub mod monitor;
pub mod port;
pub mod profile;
pub mod smart_qos;
pub mod tree;
pub mod vote;

pub use client::{Client, ClientHandle, ClientRegistry, ClientState, LaneSelector};
pub use config::{CpasConfig, CpasFeatures, NodeDesc};
pub use consolidate::VoteEngine;
pub use debug::DebugSettings;
pub use device::{CapabilitiesSnapshot, CpasDevice, CpasResources, HwPowerState};
pub use error::{ConfigError, CpasError, CpasResult, ErrorCategory, TeardownResult};
pub use profile::{HardwareProfile, HwVersion};
pub use tree::{TreeNode, TreeStore};
pub use vote::{AhbVote, ApplyKind, AxiVote, BandwidthVote, DrvLevel, Lane, PathVote};

use static_assertions::const_assert;

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum number of statically known clients
pub const MAX_CLIENTS: usize = 43;

/// Maximum number of AXI (MNOC) ports, and of CAMNOC ports
pub const MAX_AXI_PORTS: usize = 6;

/// Number of voting lanes (1 HLOS + 3 DRV)
pub const MAX_DRV_PORTS: usize = 4;

/// Maximum tree depth
pub const MAX_TREE_LEVELS: usize = 4;

/// Maximum number of tree nodes (cell indices are below this)
pub const MAX_TREE_NODES: usize = 100;

/// Maximum number of real-time write NIU nodes managed by Smart QoS
pub const MAX_RT_WR_NIU_NODES: usize = 10;

// =============================================================================
// PATH TAXONOMY
// =============================================================================

/// Granular path types per client
pub const MAX_GRAN_PATHS_PER_CLIENT: u32 = 32;

/// Raw path types at or above this value denote consolidated paths
pub const PATH_DATA_CONSO_OFFSET: u32 = 64;

/// Number of normalized path types
pub const PATH_DATA_MAX: usize = 42;

/// Number of transaction types (read, write)
pub const TRANSACTION_MAX: usize = 2;

/// Raw path type asking for one start vote on every client path
pub const API_PATH_DATA_STD_START: u32 = 512;

// =============================================================================
// BANDWIDTH
// =============================================================================

/// Default AXI bandwidth used for tree-less clients and idle floors
pub const DEFAULT_AXI_BW: u64 = 1024;

/// Entries kept by the monitor ring buffer
pub const MONITOR_MAX_ENTRIES: usize = 100;

const_assert!(MAX_DRV_PORTS == Lane::COUNT);
const_assert!((PATH_DATA_MAX as u32) > MAX_GRAN_PATHS_PER_CLIENT);
const_assert!(MAX_AXI_PORTS <= 8);
