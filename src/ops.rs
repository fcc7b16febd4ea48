//! Per-chip-family controller operations (C3).
//!
//! One trait, two concrete implementations selected at attach by
//! [`crate::capability::ChipFamily`] / [`crate::capability::TransferMethod`]:
//! [`PioIsaOps`] pushes frame bytes through the programmed-I/O FIFO the
//! original Vortex-class parts expose, and [`BusMasterOps`] drives the
//! descriptor ring engine the Boomerang/Hurricane-class parts use instead.
//! Grounded in the teacher's `NetworkInterface` trait
//! (`drivers/net/mod.rs`) plus its two concrete drivers — `rtl8139.rs`'s
//! FIFO-style PIO transmit/receive and `gem.rs`'s descriptor-ring
//! transmit/receive — generalized to this chip family's own register
//! layout and descriptor format.

use log::{debug, warn};

use crate::capability::DefaultMedia;
use crate::clock::Clock;
use crate::coherency::{self, CoherencyTier};
use crate::error::Error;
use crate::frame::MacAddress;
use crate::io::{self, IoPort, WindowIo};
use crate::media::{self, Mii};
use crate::ring::{BufferPool, Descriptor, DescriptorStatus, FragmentFlags, Ring};
use crate::{MAX_FRAME, MIN_FRAME};

/// MII command/data register offsets within the operating window (spec does
/// not fix these; by convention on this chip family MII bit-banging lives
/// at these two offsets of window 1).
const MII_CMD_REG: u16 = 0x06;
const MII_DATA_REG: u16 = 0x08;

/// Builds an [`InterruptOutcome`] from a raw interrupt-status register read
/// (spec §4.7 step 1), and the mask of cause bits that were set and need
/// acknowledging.
fn outcome_from_status(status: u16) -> (InterruptOutcome, u16) {
    let cause = status & io::INT_CAUSE_MASK;
    let outcome = InterruptOutcome {
        tx_complete: status & io::INT_TX_COMPLETE != 0,
        rx_ready: status & io::INT_RX_COMPLETE != 0,
        link_change: status & io::INT_LINK_EVENT != 0,
        adapter_failure: status & io::INT_ADAPTER_FAILURE != 0,
    };
    (outcome, cause)
}

/// Outcome of one interrupt dispatch (spec §4.7 step 1's cause bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptOutcome {
    /// A transmit completion (or a batch of them) was reaped.
    pub tx_complete: bool,
    /// At least one frame is ready for [`ControllerOps::poll_receive`].
    pub rx_ready: bool,
    /// The link-change bit was set; media state should be re-resolved.
    pub link_change: bool,
    /// The adapter-failure bit was set (spec §4.7 step 1, §7).
    pub adapter_failure: bool,
}

/// Window holding the operating registers common to both families (spec
/// does not fix the window number; by convention on this chip family it
/// is window 1, the "operating registers" window).
const WINDOW_OPERATING: u8 = 1;

/// PIO transmit FIFO register offset within the operating window.
const TX_FIFO: u16 = 0x10;
/// PIO receive FIFO register offset within the operating window.
const RX_FIFO: u16 = 0x00;
/// RX status register offset within the operating window.
const RX_STATUS: u16 = 0x18;
/// RX-status "packet complete" bit.
const RX_STATUS_COMPLETE: u16 = 0x8000;
/// RX-status error bit.
const RX_STATUS_ERROR: u16 = 0x4000;
/// TX status register offset within the operating window.
const TX_STATUS: u16 = 0x1b;
/// TX-status underrun bit.
const TX_STATUS_UNDERRUN: u8 = 0x04;

/// Bus-master descriptor-pointer window (window 7 by the same convention).
const WINDOW_BUS_MASTER: u8 = 7;
/// Download (transmit) list pointer register.
const DOWN_LIST_PTR: u16 = 0x24;

/// Initial transmit-start threshold, in bytes (spec §4.6's adaptive
/// threshold starts conservative and relaxes with clean sends).
const INITIAL_TX_THRESHOLD: u16 = 256;
/// Amount the threshold grows on an underrun (spec §4.6 / P8).
const TX_THRESHOLD_BACKOFF: u16 = 64;
/// Amount the threshold shrinks per run of clean sends (spec §4.6 / P8).
const TX_THRESHOLD_RELIEF: u16 = 8;
/// Number of consecutive clean sends needed before relief is applied.
const CLEAN_SENDS_FOR_RELIEF: u32 = 8;
/// Minimum the threshold is ever clamped to.
const TX_THRESHOLD_MIN: u16 = 16;

/// Tracks the adaptive transmit-start threshold (spec §4.6, P8): `+64` on
/// every underrun, `-8` after every run of 8 clean sends, clamped to
/// `[16, MAX_FRAME]`.
#[derive(Debug, Clone, Copy)]
pub struct TxThreshold {
    value: u16,
    clean_run: u32,
}

impl TxThreshold {
    fn new() -> Self {
        TxThreshold {
            value: INITIAL_TX_THRESHOLD,
            clean_run: 0,
        }
    }

    /// Current threshold value in bytes.
    pub fn value(&self) -> u16 {
        self.value
    }

    fn on_underrun(&mut self) {
        self.clean_run = 0;
        self.value = self
            .value
            .saturating_add(TX_THRESHOLD_BACKOFF)
            .min(MAX_FRAME as u16);
        debug!("tx underrun, raising start threshold to {}", self.value);
    }

    fn on_clean_send(&mut self) {
        self.clean_run += 1;
        if self.clean_run >= CLEAN_SENDS_FOR_RELIEF {
            self.clean_run = 0;
            self.value = self
                .value
                .saturating_sub(TX_THRESHOLD_RELIEF)
                .max(TX_THRESHOLD_MIN);
        }
    }
}

/// The uniform contract both chip families implement (spec §4, C3).
///
/// `init` performs reset, EEPROM identification, and initial media setup
/// and returns the station address; everything after that is driven by
/// the caller's interrupt/poll loop through the remaining methods.
pub trait ControllerOps {
    /// Resets the chip and brings it up to a ready-to-attach state,
    /// returning the station MAC address read from EEPROM.
    fn init(&mut self, clock: &dyn Clock, default_media: DefaultMedia) -> Result<MacAddress, Error>;
    /// Enables transmit and receive.
    fn start(&self, clock: &dyn Clock) -> Result<(), Error>;
    /// Disables transmit and receive without tearing down rings/buffers.
    fn stop(&self, clock: &dyn Clock) -> Result<(), Error>;
    /// Transmits one frame's worth of padded payload bytes.
    fn transmit(&mut self, frame_bytes: &[u8]) -> Result<(), Error>;
    /// Harvests one received frame, if any is ready.
    fn poll_receive(&mut self) -> Option<Vec<u8>>;
    /// Reclaims completed transmit resources, returning how many.
    fn reap_tx(&mut self) -> usize;
    /// Reads and acknowledges the interrupt cause bits.
    fn interrupt(&self, clock: &dyn Clock) -> InterruptOutcome;
    /// Switches the receive filter between normal and promiscuous.
    fn set_receive_mode(&self, clock: &dyn Clock, promiscuous: bool) -> Result<(), Error>;
    /// Current adaptive transmit-start threshold.
    fn tx_threshold(&self) -> u16;
    /// Soft-resets the chip without re-reading EEPROM identity, used by
    /// bounded interrupt recovery (spec §4.7, §7 `AdapterFailure`).
    fn reset(&mut self, clock: &dyn Clock) -> Result<(), Error>;
}

/// Programmed-I/O operations for PIO-only (Vortex-class) chips.
pub struct PioIsaOps<'a, IO: IoPort> {
    io: WindowIo<'a, IO>,
    mac: MacAddress,
    threshold: TxThreshold,
    default_media: DefaultMedia,
    phy_addr: Option<u8>,
}

impl<'a, IO: IoPort> PioIsaOps<'a, IO> {
    /// Wraps a bus accessor for a PIO-only chip.
    pub fn new(io: &'a IO) -> Self {
        PioIsaOps {
            io: WindowIo::new(io),
            mac: MacAddress::ZERO,
            threshold: TxThreshold::new(),
            default_media: DefaultMedia::Tp10HalfDuplex,
            phy_addr: None,
        }
    }
}

impl<'a, IO: IoPort> ControllerOps for PioIsaOps<'a, IO> {
    fn init(&mut self, clock: &dyn Clock, default_media: DefaultMedia) -> Result<MacAddress, Error> {
        self.default_media = default_media;
        self.io
            .command(clock, io::CMD_GLOBAL_RESET, 0, io::RESET_TIMEOUT_US)
            .map_err(|_| Error::ResetTimeout)?;
        let identity = crate::eeprom::identify(&self.io, clock)?;
        if identity.vendor_id == 0xffff {
            return Err(Error::HardwareAbsent);
        }
        self.mac = identity.mac;

        self.io.select(WINDOW_OPERATING, |w| {
            let mii = Mii::new(w, MII_CMD_REG, MII_DATA_REG);
            self.phy_addr = mii.detect_phy();
            if self.phy_addr.is_some() {
                let _ = media::negotiate(&mii, clock, default_media).unwrap_or_else(|_| {
                    warn!("auto-negotiation timed out, forcing 10Mbps half duplex");
                    media::forced_10_half_duplex()
                });
            }
        });
        Ok(self.mac)
    }

    fn start(&self, clock: &dyn Clock) -> Result<(), Error> {
        self.io.command(clock, io::CMD_RX_ENABLE, 0, io::COMMAND_TIMEOUT_US)?;
        self.io.command(clock, io::CMD_TX_ENABLE, 0, io::COMMAND_TIMEOUT_US)
    }

    fn stop(&self, clock: &dyn Clock) -> Result<(), Error> {
        self.io.command(clock, io::CMD_RX_DISABLE, 0, io::COMMAND_TIMEOUT_US)?;
        self.io.command(clock, io::CMD_TX_DISABLE, 0, io::COMMAND_TIMEOUT_US)
    }

    fn transmit(&mut self, frame_bytes: &[u8]) -> Result<(), Error> {
        if frame_bytes.len() < MIN_FRAME || frame_bytes.len() > MAX_FRAME {
            return Err(Error::InvalidLength);
        }
        let threshold = &mut self.threshold;
        self.io.select(WINDOW_OPERATING, |w| {
            w.write32(TX_FIFO, frame_bytes.len() as u32);
            for chunk in frame_bytes.chunks(4) {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                w.write32(TX_FIFO, u32::from_le_bytes(word));
            }
            if w.read8(TX_STATUS) & TX_STATUS_UNDERRUN != 0 {
                threshold.on_underrun();
            } else {
                threshold.on_clean_send();
            }
        });
        Ok(())
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        self.io.select(WINDOW_OPERATING, |w| {
            let status = w.read16(RX_STATUS);
            if status & RX_STATUS_COMPLETE == 0 || status & RX_STATUS_ERROR != 0 {
                return None;
            }
            let length = (status & 0x1fff) as usize;
            let mut bytes = Vec::with_capacity(length);
            while bytes.len() < length {
                bytes.extend_from_slice(&w.read32(RX_FIFO).to_le_bytes());
            }
            bytes.truncate(length);
            Some(bytes)
        })
    }

    fn reap_tx(&mut self) -> usize {
        0 // PIO transmit completes synchronously in `transmit`.
    }

    fn interrupt(&self, clock: &dyn Clock) -> InterruptOutcome {
        let status = self.io.status();
        let (outcome, cause) = outcome_from_status(status);
        if cause != 0 {
            let _ = self.io.ack_interrupt(clock, cause);
        }
        if outcome.link_change {
            if let Some(phy_addr) = self.phy_addr {
                self.io.select(WINDOW_OPERATING, |w| {
                    let mii = Mii::new(w, MII_CMD_REG, MII_DATA_REG);
                    let state = media::on_link_change(&mii, phy_addr, self.default_media);
                    debug!(
                        "link change: speed={:?} duplex={:?} link_up={}",
                        state.speed, state.duplex, state.link_up
                    );
                });
            }
        }
        outcome
    }

    fn set_receive_mode(&self, clock: &dyn Clock, promiscuous: bool) -> Result<(), Error> {
        let arg = if promiscuous { 0x05 } else { 0x01 };
        self.io.command(clock, io::CMD_SET_RX_FILTER, arg, io::COMMAND_TIMEOUT_US)
    }

    fn tx_threshold(&self) -> u16 {
        self.threshold.value()
    }

    fn reset(&mut self, clock: &dyn Clock) -> Result<(), Error> {
        self.io
            .command(clock, io::CMD_GLOBAL_RESET, 0, io::RESET_TIMEOUT_US)
            .map_err(|_| Error::ResetTimeout)
    }
}

/// Descriptor-ring bus-master DMA operations for Boomerang/Hurricane-class
/// chips.
pub struct BusMasterOps<'a, IO: IoPort> {
    io: WindowIo<'a, IO>,
    tx_ring: Ring,
    rx_ring: Ring,
    tx_pool: BufferPool,
    rx_pool: BufferPool,
    mac: MacAddress,
    threshold: TxThreshold,
    default_media: DefaultMedia,
    phy_addr: Option<u8>,
    tier: CoherencyTier,
}

impl<'a, IO: IoPort> BusMasterOps<'a, IO> {
    /// Wraps a bus accessor and allocates the fixed-size rings/pools.
    pub fn new(io: &'a IO, buffer_size: usize) -> Self {
        BusMasterOps {
            io: WindowIo::new(io),
            tx_ring: Ring::with_seed(0),
            rx_ring: Ring::with_seed(0),
            tx_pool: BufferPool::new(crate::RING_SIZE, buffer_size),
            rx_pool: BufferPool::new(crate::RING_SIZE, buffer_size),
            mac: MacAddress::ZERO,
            threshold: TxThreshold::new(),
            default_media: DefaultMedia::Tp10HalfDuplex,
            phy_addr: None,
            tier: CoherencyTier::Fallback,
        }
    }

    /// True once both rings and both pools have returned to their
    /// zero-leak resting state (spec §4.9, P2).
    pub fn is_drained(&self) -> bool {
        self.tx_ring.is_drained() && self.rx_ring.is_drained() && self.tx_pool.all_free() && self.rx_pool.all_free()
    }

    /// Sets the cache-coherency tier `dma_prepare`/`dma_complete` enforce on
    /// every transfer, chosen once at attach by [`coherency::resolve`] (spec
    /// §4.8) and demoted at runtime on a DMA fault.
    pub fn set_tier(&mut self, tier: CoherencyTier) {
        self.tier = tier;
    }
}

impl<'a, IO: IoPort> ControllerOps for BusMasterOps<'a, IO> {
    fn init(&mut self, clock: &dyn Clock, default_media: DefaultMedia) -> Result<MacAddress, Error> {
        self.default_media = default_media;
        self.io
            .command(clock, io::CMD_GLOBAL_RESET, 0, io::RESET_TIMEOUT_US)
            .map_err(|_| Error::ResetTimeout)?;
        let identity = crate::eeprom::identify(&self.io, clock)?;
        if identity.vendor_id == 0xffff {
            return Err(Error::HardwareAbsent);
        }
        self.mac = identity.mac;

        self.io.select(WINDOW_OPERATING, |w| {
            let mii = Mii::new(w, MII_CMD_REG, MII_DATA_REG);
            self.phy_addr = mii.detect_phy();
            if self.phy_addr.is_some() {
                let _ = media::negotiate(&mii, clock, default_media).unwrap_or_else(|_| {
                    warn!("auto-negotiation timed out, forcing 10Mbps half duplex");
                    media::forced_10_half_duplex()
                });
            }
        });
        Ok(self.mac)
    }

    fn start(&self, clock: &dyn Clock) -> Result<(), Error> {
        self.io.command(clock, io::CMD_RX_ENABLE, 0, io::COMMAND_TIMEOUT_US)?;
        self.io.command(clock, io::CMD_TX_ENABLE, 0, io::COMMAND_TIMEOUT_US)
    }

    fn stop(&self, clock: &dyn Clock) -> Result<(), Error> {
        self.io.command(clock, io::CMD_RX_DISABLE, 0, io::COMMAND_TIMEOUT_US)?;
        self.io.command(clock, io::CMD_TX_DISABLE, 0, io::COMMAND_TIMEOUT_US)
    }

    fn transmit(&mut self, frame_bytes: &[u8]) -> Result<(), Error> {
        if frame_bytes.len() < MIN_FRAME || frame_bytes.len() > MAX_FRAME {
            return Err(Error::InvalidLength);
        }
        let id = self.tx_pool.acquire()?;
        let buf = self.tx_pool.buffer_mut(id);
        buf[..frame_bytes.len()].copy_from_slice(frame_bytes);

        if let Err(e) = coherency::dma_prepare(self.tier, self.tx_pool.buffer(id)) {
            self.tier = coherency::demote(self.tier);
            if coherency::dma_prepare(self.tier, self.tx_pool.buffer(id)).is_err() {
                self.tx_pool.release(id);
                return Err(e);
            }
        }

        let descriptor = Descriptor {
            next_phys: 0,
            status: 0,
            fragment_phys: u32::from(id),
            fragment_flags: FragmentFlags::LAST_FRAGMENT.bits() | frame_bytes.len() as u32,
        };
        if let Err(e) = self.tx_ring.enqueue(descriptor) {
            self.tx_pool.release(id);
            return Err(e);
        }
        self.tx_pool.mark_device_owned(id);

        self.io.select(WINDOW_BUS_MASTER, |w| {
            w.write32(DOWN_LIST_PTR, descriptor.fragment_phys);
        });
        self.threshold.on_clean_send();
        Ok(())
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        let mut harvested = None;
        let tier = self.tier;
        self.rx_ring.reap(|descriptor| {
            if harvested.is_none() && !descriptor.has_error() {
                let id = descriptor.fragment_phys as u16;
                let length = descriptor.length() as usize;
                if coherency::dma_complete(tier, self.rx_pool.buffer(id)).is_ok() {
                    harvested = Some(self.rx_pool.buffer(id)[..length].to_vec());
                }
                self.rx_pool.release(id);
            }
        });
        harvested
    }

    fn reap_tx(&mut self) -> usize {
        let pool = &mut self.tx_pool;
        let threshold = &mut self.threshold;
        let tier = self.tier;
        self.tx_ring.reap(|descriptor| {
            let id = descriptor.fragment_phys as u16;
            if descriptor.status & DescriptorStatus::UNDERRUN_OVERRUN.bits() != 0 {
                threshold.on_underrun();
            }
            let _ = coherency::dma_complete(tier, pool.buffer(id));
            pool.release(id);
        })
    }

    fn interrupt(&self, clock: &dyn Clock) -> InterruptOutcome {
        let status = self.io.status();
        let (outcome, cause) = outcome_from_status(status);
        if cause != 0 {
            let _ = self.io.ack_interrupt(clock, cause);
        }
        if outcome.link_change {
            if let Some(phy_addr) = self.phy_addr {
                self.io.select(WINDOW_OPERATING, |w| {
                    let mii = Mii::new(w, MII_CMD_REG, MII_DATA_REG);
                    let state = media::on_link_change(&mii, phy_addr, self.default_media);
                    debug!(
                        "link change: speed={:?} duplex={:?} link_up={}",
                        state.speed, state.duplex, state.link_up
                    );
                });
            }
        }
        InterruptOutcome {
            tx_complete: outcome.tx_complete && !self.tx_ring.is_drained(),
            rx_ready: outcome.rx_ready && !self.rx_ring.is_drained(),
            link_change: outcome.link_change,
            adapter_failure: outcome.adapter_failure,
        }
    }

    fn set_receive_mode(&self, clock: &dyn Clock, promiscuous: bool) -> Result<(), Error> {
        let arg = if promiscuous { 0x05 } else { 0x01 };
        self.io.command(clock, io::CMD_SET_RX_FILTER, arg, io::COMMAND_TIMEOUT_US)
    }

    fn tx_threshold(&self) -> u16 {
        self.threshold.value()
    }

    fn reset(&mut self, clock: &dyn Clock) -> Result<(), Error> {
        if self.tx_ring.descriptor_at_cur().is_complete() && !self.tx_ring.is_drained() {
            return Err(Error::BadDescriptor);
        }
        let tx_pool = &mut self.tx_pool;
        self.tx_ring.drain(|d| tx_pool.release(d.fragment_phys as u16));
        let rx_pool = &mut self.rx_pool;
        self.rx_ring.drain(|d| rx_pool.release(d.fragment_phys as u16));
        self.threshold = TxThreshold::new();
        self.io
            .command(clock, io::CMD_GLOBAL_RESET, 0, io::RESET_TIMEOUT_US)
            .map_err(|_| Error::ResetTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_backs_off_on_underrun_and_relieves_after_clean_run() {
        // spec §8 P8.
        let mut t = TxThreshold::new();
        let start = t.value();
        t.on_underrun();
        assert_eq!(t.value(), start + TX_THRESHOLD_BACKOFF);
        for _ in 0..CLEAN_SENDS_FOR_RELIEF {
            t.on_clean_send();
        }
        assert_eq!(t.value(), start + TX_THRESHOLD_BACKOFF - TX_THRESHOLD_RELIEF);
    }

    #[test]
    fn threshold_never_drops_below_the_floor() {
        let mut t = TxThreshold::new();
        for _ in 0..1000 {
            for _ in 0..CLEAN_SENDS_FOR_RELIEF {
                t.on_clean_send();
            }
        }
        assert!(t.value() >= TX_THRESHOLD_MIN);
    }
}
