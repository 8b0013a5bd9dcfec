//! # Client Registry
//!
//! One [`Client`] per statically known client name. Slots are created at
//! probe and never destroyed; registration only toggles lifecycle flags.
//!
//! Each slot sits behind its own `spin::Mutex`. The last AHB level of every
//! client is mirrored in an atomic so the AHB aggregation pass can read all
//! clients while holding only the caller's lock.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use cpas_hal::VoteLevel;
use hashbrown::HashMap;
use spin::{Mutex, MutexGuard};
use static_assertions::assert_impl_all;

use crate::config::CpasConfig;
use crate::error::{CpasError, CpasResult};
use crate::tree::TreeStore;
use crate::vote::{AxiVote, DrvIndex, DrvLevel, Lane, PathVote};
use crate::{MAX_CLIENTS, PATH_DATA_MAX, TRANSACTION_MAX};

// =============================================================================
// HANDLES AND STATE
// =============================================================================

/// Opaque client handle (the slot index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientHandle(u32);

impl ClientHandle {
    /// Handle for a slot index
    pub const fn from_index(idx: usize) -> Self {
        Self(idx as u32)
    }

    /// Slot index
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Slot idle
    Unregistered,
    /// Registered, not streaming
    Registered,
    /// Streaming
    Started,
}

/// Lane choice for dynamic-lane leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LaneSelector {
    /// Use each leaf's configured lane
    #[default]
    Static,
    /// Dynamic leaves vote on this lane
    Override(Lane),
}

impl LaneSelector {
    /// Lane a leaf with `idx` votes on
    pub fn resolve(self, idx: DrvIndex) -> CpasResult<Lane> {
        match (idx, self) {
            (DrvIndex::Fixed(lane), _) => Ok(lane),
            (DrvIndex::Dynamic, Self::Override(lane)) => Ok(lane),
            (DrvIndex::Dynamic, Self::Static) => Err(CpasError::UnresolvedDynamicLane),
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// One client slot
#[derive(Debug, Clone)]
pub struct Client {
    /// Name in the client table
    pub name: String,
    /// Identifier given at registration
    pub identifier: String,
    /// Cell index given at registration
    pub cell_index: u32,
    /// Registered flag
    pub registered: bool,
    /// Started flag, implies registered
    pub started: bool,
    /// Leaf cell per (path, transaction)
    pub tree_node: [[Option<usize>; TRANSACTION_MAX]; PATH_DATA_MAX],
    /// At least one leaf is mapped
    pub tree_node_valid: bool,
    /// Leaves pick their lane per call
    pub is_drv_dynamic: bool,
    /// Current lane choice for dynamic leaves
    pub lane_selector: LaneSelector,
    /// Lane the dynamic leaves last voted on, cleared at stop
    pub voted_lane: Option<Lane>,
    /// Last consolidated vote
    pub consolidated: AxiVote,
}

impl Client {
    fn new(name: String) -> Self {
        Self {
            name,
            identifier: String::new(),
            cell_index: 0,
            registered: false,
            started: false,
            tree_node: [[None; TRANSACTION_MAX]; PATH_DATA_MAX],
            tree_node_valid: false,
            is_drv_dynamic: false,
            lane_selector: LaneSelector::Static,
            voted_lane: None,
            consolidated: AxiVote::new(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ClientState {
        match (self.registered, self.started) {
            (_, true) => ClientState::Started,
            (true, false) => ClientState::Registered,
            (false, false) => ClientState::Unregistered,
        }
    }

    /// Leaf mapped to a (path, transaction) pair
    pub fn leaf(&self, path: u32, transaction: u32) -> Option<usize> {
        self.tree_node
            .get(path as usize)
            .and_then(|row| row.get(transaction as usize))
            .copied()
            .flatten()
    }

    /// Mapped leaves, transaction-major like the path table
    pub fn leaves(&self) -> impl Iterator<Item = (u32, u32, usize)> + '_ {
        (0..TRANSACTION_MAX).flat_map(move |t| {
            (0..PATH_DATA_MAX)
                .filter_map(move |p| self.tree_node[p][t].map(|cell| (p as u32, t as u32, cell)))
        })
    }

    /// Name used in logs
    pub fn display_name(&self) -> String {
        format!("{}[{}]", self.identifier, self.cell_index)
    }

    pub(crate) fn register(&mut self, identifier: &str, cell_index: u32) -> CpasResult<()> {
        if self.registered {
            return Err(CpasError::AlreadyRegistered);
        }
        self.identifier = String::from(identifier);
        self.cell_index = cell_index;
        self.registered = true;
        Ok(())
    }

    pub(crate) fn unregister(&mut self) -> CpasResult<()> {
        if !self.registered {
            return Err(CpasError::NotRegistered);
        }
        if self.started {
            return Err(CpasError::StillStarted);
        }
        self.registered = false;
        self.consolidated = AxiVote::new();
        Ok(())
    }

    /// Expand a start vote to every mapped leaf using the first path's values
    ///
    /// Leaves on DRV lanes receive a LOW vote.
    pub fn vote_all_paths(&self, template: &PathVote, drv_leaf: impl Fn(usize) -> bool) -> AxiVote {
        let paths = self
            .leaves()
            .map(|(path, transaction, cell)| {
                let mut vote = *template;
                vote.path_data_type = path;
                vote.transac_type = transaction;
                if drv_leaf(cell) {
                    vote.vote_level = DrvLevel::Low;
                }
                vote
            })
            .collect();
        AxiVote { paths }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Table of client slots
pub struct ClientRegistry {
    names: HashMap<String, usize>,
    clients: Vec<Mutex<Client>>,
    ahb_levels: Vec<AtomicU32>,
}

assert_impl_all!(ClientRegistry: Send, Sync);

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.clients.len())
            .finish()
    }
}

impl ClientRegistry {
    /// Build the slots and bind the tree's leaves to them
    pub fn new(config: &CpasConfig, tree: &TreeStore) -> CpasResult<Self> {
        if config.clients.len() > MAX_CLIENTS {
            return Err(CpasError::UnknownClient);
        }

        let mut slots: Vec<Client> = config.clients.iter().cloned().map(Client::new).collect();
        let mut names = HashMap::with_capacity(slots.len());
        for (idx, name) in config.clients.iter().enumerate() {
            names.insert(name.clone(), idx);
        }

        for node in tree.iter() {
            let Some(leaf) = node.leaf else { continue };
            let client = slots.get_mut(leaf.client).ok_or(CpasError::UnknownClient)?;
            let slot = &mut client.tree_node[leaf.path_data_type as usize][leaf.transaction as usize];
            if let Some(prev) = slot.replace(node.cell_index) {
                log::warn!(
                    "client {} path {} transaction {}: leaf {} replaces {}",
                    client.name,
                    leaf.path_data_type,
                    leaf.transaction,
                    node.cell_index,
                    prev
                );
            }
            client.tree_node_valid = true;
            if node.drv_voting_idx == DrvIndex::Dynamic {
                client.is_drv_dynamic = true;
            }
        }

        let ahb_levels = slots.iter().map(|_| AtomicU32::new(VoteLevel::Suspend as u32)).collect();

        Ok(Self {
            names,
            clients: slots.into_iter().map(Mutex::new).collect(),
            ahb_levels,
        })
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether there are no slots
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Slot index for a table name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    /// Slot index for registration parameters
    pub fn lookup(&self, identifier: &str, cell_index: u32, id_based: bool) -> CpasResult<ClientHandle> {
        if identifier.is_empty() {
            return Err(CpasError::UnknownClient);
        }
        let name = if id_based {
            format!("{}{}", identifier, cell_index)
        } else {
            String::from(identifier)
        };
        self.index_of(&name)
            .map(ClientHandle::from_index)
            .ok_or_else(|| {
                log::error!("client {} not in client table", name);
                CpasError::UnknownClient
            })
    }

    /// Lock one slot
    pub fn lock(&self, handle: ClientHandle) -> CpasResult<MutexGuard<'_, Client>> {
        self.clients
            .get(handle.index())
            .map(Mutex::lock)
            .ok_or(CpasError::InvalidHandle)
    }

    /// Try to lock one slot without spinning
    pub fn try_lock(&self, handle: ClientHandle) -> Option<MutexGuard<'_, Client>> {
        self.clients.get(handle.index()).and_then(Mutex::try_lock)
    }

    /// Last AHB level of a client
    pub fn ahb_level(&self, handle: ClientHandle) -> VoteLevel {
        self.ahb_levels
            .get(handle.index())
            .map(|l| VoteLevel::from_raw(l.load(Ordering::Acquire)))
            .unwrap_or_default()
    }

    /// Record the AHB level of a client
    pub fn set_ahb_level(&self, handle: ClientHandle, level: VoteLevel) {
        if let Some(slot) = self.ahb_levels.get(handle.index()) {
            slot.store(level as u32, Ordering::Release);
        }
    }

    /// Highest AHB level across clients
    pub fn max_ahb_level(&self) -> VoteLevel {
        self.ahb_levels
            .iter()
            .map(|l| VoteLevel::from_raw(l.load(Ordering::Acquire)))
            .max()
            .unwrap_or_default()
    }
}
