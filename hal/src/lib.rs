//! # CPAS Hardware Abstraction Layer
//!
//! Boundary contracts between the camera bandwidth-arbitration engine and
//! the platform it runs on.
//!
//! The engine never touches a bus driver, clock tree or register window
//! directly. Everything it drives is expressed as a trait here so that the
//! surrounding platform (or a test harness) supplies the implementation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         cpas-core                            │
//! └───────┬───────────────┬───────────────┬──────────────┬───────┘
//!         │               │               │              │
//!   ┌─────▼─────┐   ┌─────▼──────┐  ┌─────▼─────┐  ┌─────▼──────┐
//!   │ BusClient │   │ Clock      │  │ RscDevice │  │ RegisterMap│
//!   │ (AXI/AHB) │   │ Controller │  │ (DRV chan)│  │ (gated I/O)│
//!   └───────────┘   └────────────┘  └───────────┘  └────────────┘
//! ```
//!
//! ## Register Access
//!
//! Register windows are only valid while the camera SoC is powered. The
//! [`RegisterMap`] keeps an atomic access count and refuses any access while
//! it is zero, so interrupt-context dumps racing a power-down never touch a
//! dead window.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod bus;
pub mod clock;
pub mod error;
pub mod mmio;
pub mod platform;
pub mod rsc;

pub use bus::{BusClient, BusPath, VoteLevel};
pub use clock::{ClockClient, ClockController};
pub use error::{HalError, HalResult};
pub use mmio::{RegBase, RegisterIo, RegisterMap};
pub use platform::Platform;
pub use rsc::RscDevice;
