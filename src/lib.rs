//! Core packet-driver stack for the Vortex/Boomerang/Hurricane family of
//! 10/100 Mbit Ethernet controllers.
//!
//! This crate implements the hardware-facing half of a packet driver:
//! windowed register access and EEPROM identification, per-chip-family
//! operations, a descriptor ring/buffer-pool engine, an interrupt-driven
//! transmit/receive pipeline, and a cache-coherency tier selector for
//! bus-master DMA. Argument parsing, TSR lifecycle, memory allocation
//! policy, and the packet-driver call-gate surface are host concerns and
//! are deliberately not part of this crate; a host binds to it through the
//! [`IoPort`](io::IoPort), [`Clock`](clock::Clock), [`CpuProbe`](coherency::CpuProbe) and
//! [`BusMasterProbe`](coherency::BusMasterProbe) traits and the
//! [`Controller`](controller::Controller) facade.
#![warn(rust_2018_idioms)]
#![warn(unused_qualifications)]

pub mod capability;
pub mod client;
pub mod coherency;
pub mod config;
pub mod clock;
pub mod controller;
pub mod eeprom;
pub mod error;
pub mod frame;
pub mod io;
pub mod media;
pub mod ops;
pub mod ring;
pub mod stats;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use capability::{ChipCapability, ChipFamily, TransferMethod};
pub use client::{ClientHandle, ClientMode, ClientTable};
pub use coherency::{CoherencyReport, CoherencyTier};
pub use config::{BufferSize, CoherencyOverride, Config};
pub use controller::{AttachDescriptor, Controller, ControllerState};
pub use error::Error;
pub use frame::{EtherType, MacAddress};
pub use stats::Stats;

/// Convenience result type for fallible core operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Ring size is a compile-time constant, not a configuration knob: §6 of the
/// specification is explicit that it is fixed at 16 entries.
pub const RING_SIZE: usize = 16;

/// Default DMA-capable buffer size; the alternate size is 2048 (§6).
pub const DEFAULT_BUFFER_SIZE: usize = 1536;

/// Minimum Ethernet frame length on the wire, FCS excluded.
pub const MIN_FRAME: usize = 60;

/// Maximum Ethernet frame length on the wire, FCS excluded.
pub const MAX_FRAME: usize = 1514;

/// Bounded capacity for registered clients (§3: "at least 8").
pub const MAX_CLIENTS: usize = 8;

/// EEPROM size in 16-bit words, used to range-check `eeprom_read` addresses.
pub const EEPROM_SIZE: usize = 64;
