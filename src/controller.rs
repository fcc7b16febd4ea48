//! Core facade (C10).
//!
//! [`Controller`] is the single entry point a host binds to: it owns the
//! state machine, the client table, statistics, and the chosen
//! [`ControllerOps`] implementation, and wires the transmit/receive
//! dataflow together (spec §2, §4.9). Grounded in the teacher's
//! `drivers/pci.rs` attach flow (`init_device`, which probes a capability,
//! picks a driver, and registers it) generalized into an explicit state
//! machine instead of a one-shot initialization function, to make the
//! attach/detach lifecycle spec §4.9 describes representable in types.

use crate::capability::{self, ChipCapability, ChipFamily, TransferMethod};
use crate::client::{ClientHandle, ClientMode, ClientTable};
use crate::clock::Clock;
use crate::coherency::{self, BusMasterProbe, CoherencyInputs, CoherencyReport, CoherencyTier, CpuProbe};
use crate::config::Config;
use crate::error::Error;
use crate::frame::{self, EtherType, Frame, MacAddress};
use crate::io::IoPort;
use crate::ops::{BusMasterOps, ControllerOps, PioIsaOps};
use crate::stats::Stats;
use log::{info, warn};

/// Ceiling on bounded interrupt-recovery attempts within one rolling window
/// (spec §7 `AdapterFailure`: "3 times over 30s").
const RECOVERY_MAX_ATTEMPTS: u32 = 3;
/// Width of the rolling recovery window, in microseconds.
const RECOVERY_WINDOW_US: u64 = 30_000_000;

/// Tracks bounded recovery attempts within a rolling window (spec §7): a
/// soft reset is allowed up to [`RECOVERY_MAX_ATTEMPTS`] times within any
/// [`RECOVERY_WINDOW_US`]-wide window before recovery gives up and the
/// controller is marked [`ControllerState::Failed`].
struct RecoveryState {
    attempts: u32,
    window_start_us: Option<u64>,
}

impl RecoveryState {
    fn new() -> Self {
        RecoveryState {
            attempts: 0,
            window_start_us: None,
        }
    }

    /// Records one recovery attempt at `now`, starting a fresh window if
    /// the previous one has expired. Returns `true` if the attempt is still
    /// within budget.
    fn try_attempt(&mut self, now: u64) -> bool {
        let in_window = match self.window_start_us {
            Some(start) => now.saturating_sub(start) <= RECOVERY_WINDOW_US,
            None => false,
        };
        if !in_window {
            self.window_start_us = Some(now);
            self.attempts = 0;
        }
        self.attempts += 1;
        self.attempts <= RECOVERY_MAX_ATTEMPTS
    }
}

/// Lifecycle state of one attached controller (spec §4.9).
///
/// Transitions are guarded by `debug_assert!` in [`Controller`]'s methods
/// rather than encoded as separate types, because the state lives inside
/// one long-lived facade a host holds for the attach's whole lifetime
/// rather than being consumed and rebuilt at each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Constructed but `attach` has not run.
    Uninitialized,
    /// Attached and stopped; rings/buffers allocated, TX/RX disabled.
    Ready,
    /// Attached and running; TX/RX enabled.
    Active,
    /// A hardware failure exhausted bounded recovery (spec §7
    /// `AdapterFailure`); the controller must be detached and re-attached.
    Failed,
    /// Detached; resources released.
    Dead,
}

/// Everything learned about the hardware during [`Controller::attach`]
/// (spec §4.2): the matched capability entry and the station address read
/// from EEPROM.
#[derive(Debug, Clone, Copy)]
pub struct AttachDescriptor {
    /// The matched capability-table entry.
    pub capability: ChipCapability,
    /// Station MAC address read from EEPROM.
    pub mac: MacAddress,
    /// The cache-coherency tier chosen for this attach (spec §4.8).
    pub coherency: CoherencyReport,
}

/// Host-supplied interrupt masking for the scoped critical sections
/// `transmit`/`poll_receive`/`interrupt` need around ring/pool mutation
/// (spec §4.7's "ISR and poll path share mutable ring state").
pub trait IrqMask {
    /// Disables this controller's interrupt line, returning a token whose
    /// `Drop` (or an explicit unmask call) re-enables it.
    fn mask(&self);
    /// Re-enables this controller's interrupt line.
    fn unmask(&self);
}

enum Ops<'a, IO: IoPort> {
    Pio(PioIsaOps<'a, IO>),
    BusMaster(BusMasterOps<'a, IO>),
}

impl<'a, IO: IoPort> Ops<'a, IO> {
    fn as_dyn(&mut self) -> &mut dyn ControllerOps {
        match self {
            Ops::Pio(ops) => ops,
            Ops::BusMaster(ops) => ops,
        }
    }

    fn as_dyn_ref(&self) -> &dyn ControllerOps {
        match self {
            Ops::Pio(ops) => ops,
            Ops::BusMaster(ops) => ops,
        }
    }
}

/// The packet-driver core facade (spec §2, C10).
///
/// Bound to a host's bus, clock, CPU/bus-master probes, and interrupt
/// masking through the traits in [`crate::io`], [`crate::clock`], and
/// [`crate::coherency`]; everything above that line (argument parsing,
/// TSR residency, the packet-driver call-gate surface) is the host's job.
pub struct Controller<'a, IO: IoPort> {
    io: &'a IO,
    ops: Ops<'a, IO>,
    irq: &'a dyn IrqMask,
    state: ControllerState,
    clients: ClientTable<'a>,
    stats: Stats,
    config: Config,
    mac: MacAddress,
    capability: ChipCapability,
    descriptor: Option<AttachDescriptor>,
    recovery: RecoveryState,
}

impl<'a, IO: IoPort> core::fmt::Debug for Controller<'a, IO> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state)
            .field("stats", &self.stats)
            .field("config", &self.config)
            .field("mac", &self.mac)
            .field("capability", &self.capability)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl<'a, IO: IoPort> Controller<'a, IO> {
    /// Matches `(vendor_id, device_id)` against the capability table and
    /// builds an unattached controller bound to `io` and `irq`. The
    /// concrete [`ControllerOps`] implementation is picked here from
    /// [`ChipCapability::transfer_method`] (spec §4.2 step 2).
    pub fn new(
        io: &'a IO,
        vendor_id: u16,
        device_id: u16,
        config: Config,
        irq: &'a dyn IrqMask,
    ) -> Result<Self, Error> {
        let capability = capability::lookup(vendor_id, device_id).ok_or(Error::UnknownChip)?;
        if capability.family == ChipFamily::Reserved {
            return Err(Error::UnknownChip);
        }
        let ops = match capability.transfer_method {
            TransferMethod::Pio => Ops::Pio(PioIsaOps::new(io)),
            TransferMethod::BusMasterDma => {
                Ops::BusMaster(BusMasterOps::new(io, config.buffer_size.bytes()))
            }
        };
        Ok(Controller {
            io,
            ops,
            irq,
            state: ControllerState::Uninitialized,
            clients: ClientTable::new(),
            stats: Stats::default(),
            config,
            mac: MacAddress::ZERO,
            capability: *capability,
            descriptor: None,
            recovery: RecoveryState::new(),
        })
    }

    /// Runs `f` with this controller's interrupt line masked, unmasking it
    /// again once `f` returns (spec §4.7: "ISR and poll path share mutable
    /// ring state"). Callers that mutate ring cursors from a foreground
    /// context use this to keep the ISR from observing a half-updated ring.
    pub fn with_irq_masked<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.irq.mask();
        let result = f(self);
        self.irq.unmask();
        result
    }

    /// The transfer method currently driving the wire (spec §4.8: a
    /// [`CoherencyTier::DisableBusMaster`] verdict at attach demotes a
    /// DMA-capable chip down to programmed I/O for the rest of its life).
    pub fn active_transfer_method(&self) -> TransferMethod {
        match &self.ops {
            Ops::Pio(_) => TransferMethod::Pio,
            Ops::BusMaster(_) => TransferMethod::BusMasterDma,
        }
    }

    /// Resets the chip, identifies it, negotiates media, picks a
    /// cache-coherency tier, and brings the controller to
    /// [`ControllerState::Ready`] (spec §4.9 step 1-2).
    ///
    /// The coherency tier is resolved from probes *before* the chip is
    /// initialized, so that a [`CoherencyTier::DisableBusMaster`] verdict on
    /// a DMA-capable chip can swap this controller's [`ControllerOps`] to
    /// [`PioIsaOps`] before `init` ever touches the ring engine (spec §4.8:
    /// "bus-master DMA does not work at all; the caller must fall back to
    /// programmed I/O").
    pub fn attach(
        &mut self,
        clock: &dyn Clock,
        cpu_probe: &dyn CpuProbe,
        bus_master_probe: &dyn BusMasterProbe,
        cache_mode: coherency::CacheMode,
    ) -> Result<AttachDescriptor, Error> {
        debug_assert_eq!(self.state, ControllerState::Uninitialized);

        let inputs = CoherencyInputs {
            bus_master_works: self.capability.transfer_method == TransferMethod::BusMasterDma
                && bus_master_probe.bus_master_works(),
            snoops: bus_master_probe.snoops(),
            cpu_family: cpu_probe.family(),
            cache_mode,
        };
        let coherency_report = coherency::resolve(inputs, self.config.coherency_override);

        if coherency_report.tier == CoherencyTier::DisableBusMaster {
            if let Ops::BusMaster(_) = self.ops {
                warn!("bus-master DMA unusable, falling back to programmed I/O");
                self.ops = Ops::Pio(PioIsaOps::new(self.io));
            }
        } else if let Ops::BusMaster(ops) = &mut self.ops {
            ops.set_tier(coherency_report.tier);
        }

        let mac = self.ops.as_dyn().init(clock, self.capability.default_media)?;
        self.mac = mac;

        let descriptor = AttachDescriptor {
            capability: self.capability,
            mac,
            coherency: coherency_report,
        };
        info!(
            "attached {} ({mac}), coherency tier {:?}",
            self.capability.name, coherency_report.tier
        );
        self.descriptor = Some(descriptor);
        self.state = ControllerState::Ready;
        Ok(descriptor)
    }

    /// Enables transmit/receive (spec §4.9 step 3).
    pub fn start(&mut self, clock: &dyn Clock) -> Result<(), Error> {
        debug_assert_eq!(self.state, ControllerState::Ready);
        self.ops.as_dyn().start(clock)?;
        self.ops
            .as_dyn()
            .set_receive_mode(clock, self.config.promiscuous)?;
        self.state = ControllerState::Active;
        Ok(())
    }

    /// Disables transmit/receive without releasing rings/clients, dropping
    /// back to [`ControllerState::Ready`].
    pub fn stop(&mut self, clock: &dyn Clock) -> Result<(), Error> {
        debug_assert_eq!(self.state, ControllerState::Active);
        self.ops.as_dyn().stop(clock)?;
        self.state = ControllerState::Ready;
        Ok(())
    }

    /// Registers a client for `ether_type` in `mode`, optionally narrowed to
    /// `mac_filter`, invoking `callback` with a received frame's raw bytes
    /// on every match (spec §3, §4.7 step 4c).
    pub fn register_client(
        &mut self,
        ether_type: EtherType,
        mac_filter: Option<MacAddress>,
        mode: ClientMode,
        callback: impl FnMut(&[u8]) + 'a,
    ) -> Result<ClientHandle, Error> {
        self.clients.register(ether_type, mac_filter, mode, callback)
    }

    /// Releases a previously registered client.
    pub fn release_client(&mut self, handle: ClientHandle) {
        self.clients.release(handle);
    }

    /// Toggles promiscuous mode at runtime (spec §8 S4).
    pub fn set_promiscuous(&mut self, clock: &dyn Clock, promiscuous: bool) -> Result<(), Error> {
        self.config.promiscuous = promiscuous;
        self.ops.as_dyn().set_receive_mode(clock, promiscuous)
    }

    /// Pads, validates, and transmits one frame (spec §4.6). Masks
    /// interrupts for the duration of the ring mutation (spec §4.7).
    pub fn transmit(&mut self, frame: &Frame) -> Result<(), Error> {
        debug_assert_eq!(self.state, ControllerState::Active);
        let bytes = frame.build();
        let (padded, original_len) = frame::pad_payload(&bytes[14..]);
        let mut wire = Vec::with_capacity(14 + padded.len());
        wire.extend_from_slice(&bytes[..14]);
        wire.extend_from_slice(&padded);

        self.with_irq_masked(|this| match this.ops.as_dyn().transmit(&wire) {
            Ok(()) => {
                this.stats.record_tx(14 + original_len);
                Ok(())
            }
            Err(e) => {
                if !e.is_transient() {
                    this.stats.tx_errors.underrun += 1;
                }
                Err(e)
            }
        })
    }

    /// Harvests one received frame, classifies it, and dispatches it to
    /// every matching registered client (spec §4.7 step 4).
    ///
    /// Returns the parsed frame and the handles it was delivered to, or
    /// `None` if nothing was ready. A frame matching no registered client
    /// is still counted in [`Stats::rx_drops`]. Only the ring harvest is
    /// done with interrupts masked; client dispatch runs outside the
    /// masked section.
    pub fn poll_receive(&mut self) -> Option<(Frame, Vec<ClientHandle>)> {
        let bytes = self.with_irq_masked(|this| this.ops.as_dyn().poll_receive())?;
        let frame = match Frame::parse(&bytes) {
            Ok(f) => f,
            Err(_) => {
                self.stats.rx_errors.length += 1;
                return None;
            }
        };
        self.stats.record_rx(bytes.len());

        let class = frame.classify(self.mac);
        let recipients = self.clients.dispatch(frame.ether_type, class, frame.dest, &bytes);
        if recipients.is_empty() {
            self.stats.rx_drops += 1;
        }
        Some((frame, recipients))
    }

    /// Reclaims completed transmit descriptors (spec §4.7 step 3).
    pub fn reap_tx(&mut self) -> usize {
        self.with_irq_masked(|this| this.ops.as_dyn().reap_tx())
    }

    /// Dispatches one interrupt: reaps TX, notes RX readiness, and runs
    /// bounded recovery on the adapter-failure bit (spec §4.7 step 1-2, §7
    /// `AdapterFailure`: up to 3 soft resets within a rolling 30s window).
    /// Once the budget is exhausted, or a reset itself fails, the
    /// controller moves to [`ControllerState::Failed`] and this returns
    /// [`Error::AdapterFailure`].
    pub fn handle_interrupt(&mut self, clock: &dyn Clock) -> Result<crate::ops::InterruptOutcome, Error> {
        self.stats.interrupts += 1;
        let outcome = self.ops.as_dyn().interrupt(clock);
        if outcome.tx_complete {
            self.reap_tx();
        }
        if outcome.adapter_failure && self.state == ControllerState::Active {
            if self.recovery.try_attempt(clock.now_us()) && self.ops.as_dyn().reset(clock).is_ok() {
                warn!("adapter failure bit set, recovered via bounded soft reset");
            } else {
                warn!("adapter failure recovery exhausted, marking controller Failed");
                self.state = ControllerState::Failed;
                return Err(Error::AdapterFailure);
            }
        }
        Ok(outcome)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Station MAC address, valid once attached.
    pub fn mac_address(&self) -> MacAddress {
        self.mac
    }

    /// A snapshot of the running statistics counters.
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// The attach-time descriptor, if [`Controller::attach`] has run.
    pub fn attach_descriptor(&self) -> Option<AttachDescriptor> {
        self.descriptor
    }

    /// Current adaptive transmit-start threshold (spec §4.6, P8).
    pub fn tx_threshold(&self) -> u16 {
        self.ops.as_dyn_ref().tx_threshold()
    }

    /// Tears the controller down: stops TX/RX if still active, asserts
    /// every client was released and every ring/pool buffer freed, and
    /// moves to [`ControllerState::Dead`] (spec §4.9 step 4, P2).
    ///
    /// Returns [`Error::LeakedAtShutdown`] rather than panicking if
    /// buffers are still outstanding, so a host can log and continue
    /// rather than crash on a misbehaving client.
    pub fn detach(&mut self, clock: &dyn Clock) -> Result<(), Error> {
        if self.state == ControllerState::Active {
            self.stop(clock)?;
        }
        if !self.clients.is_empty() {
            warn!("detach refused: clients still registered");
            return Err(Error::LeakedAtShutdown);
        }
        let drained = match &self.ops {
            Ops::Pio(_) => true,
            Ops::BusMaster(ops) => ops.is_drained(),
        };
        self.state = ControllerState::Dead;
        if !drained {
            warn!("detach completed with buffers still outstanding");
            return Err(Error::LeakedAtShutdown);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coherency::CacheMode;
    use crate::frame::EtherType;
    use crate::testutil::{FakeClock, MockIo, RecordingIrqMask};

    struct AlwaysWorksProbe;
    impl CpuProbe for AlwaysWorksProbe {
        fn family(&self) -> coherency::CpuFamily {
            coherency::CpuFamily::PentiumOrLater
        }
    }
    impl BusMasterProbe for AlwaysWorksProbe {
        fn bus_master_works(&self) -> bool {
            true
        }
        fn snoops(&self) -> bool {
            false
        }
    }

    fn attach_pio<'a>(io: &'a MockIo, clock: &FakeClock, irq: &'a RecordingIrqMask) -> Controller<'a, MockIo> {
        let mut controller = Controller::new(io, 0x10b7, 0x5900, Config::default(), irq).unwrap();
        let probe = AlwaysWorksProbe;
        controller
            .attach(clock, &probe, &probe, CacheMode::WriteBack)
            .unwrap();
        controller
    }

    #[test]
    fn unknown_chip_is_rejected_at_construction() {
        let io = MockIo::new();
        let irq = RecordingIrqMask::new();
        let err = Controller::new(&io, 0xffff, 0xffff, Config::default(), &irq).unwrap_err();
        assert_eq!(err, Error::UnknownChip);
    }

    #[test]
    fn reserved_slot_is_rejected_at_construction() {
        let io = MockIo::new();
        let irq = RecordingIrqMask::new();
        let err = Controller::new(&io, 0x10b7, 0x9001, Config::default(), &irq).unwrap_err();
        assert_eq!(err, Error::UnknownChip);
    }

    #[test]
    fn attach_then_start_then_detach_cleanly() {
        // spec §8 S1.
        let io = MockIo::new();
        let clock = FakeClock::new();
        let irq = RecordingIrqMask::new();
        let mut controller = attach_pio(&io, &clock, &irq);
        assert_eq!(controller.state(), ControllerState::Ready);
        controller.start(&clock).unwrap();
        assert_eq!(controller.state(), ControllerState::Active);
        controller.stop(&clock).unwrap();
        controller.detach(&clock).unwrap();
        assert_eq!(controller.state(), ControllerState::Dead);
    }

    #[test]
    fn detach_reports_leak_when_clients_still_registered() {
        let io = MockIo::new();
        let clock = FakeClock::new();
        let irq = RecordingIrqMask::new();
        let mut controller = attach_pio(&io, &clock, &irq);
        controller
            .register_client(EtherType::IP, None, ClientMode::Direct, |_| {})
            .unwrap();
        let err = controller.detach(&clock).unwrap_err();
        assert_eq!(err, Error::LeakedAtShutdown);
    }

    #[test]
    fn promiscuous_toggle_survives_a_round_trip() {
        // spec §8 S4.
        let io = MockIo::new();
        let clock = FakeClock::new();
        let irq = RecordingIrqMask::new();
        let mut controller = attach_pio(&io, &clock, &irq);
        controller.start(&clock).unwrap();
        controller.set_promiscuous(&clock, true).unwrap();
        assert!(controller.config.promiscuous);
        controller.set_promiscuous(&clock, false).unwrap();
        assert!(!controller.config.promiscuous);
    }

    #[test]
    fn transmit_masks_interrupts_for_its_duration_and_unmasks_after() {
        let io = MockIo::new();
        let clock = FakeClock::new();
        let irq = RecordingIrqMask::new();
        let mut controller = attach_pio(&io, &clock, &irq);
        controller.start(&clock).unwrap();

        let frame = Frame::new(MacAddress::BROADCAST, controller.mac_address(), EtherType::IP, b"hi");
        controller.transmit(&frame).unwrap();

        assert!(!irq.is_masked());
        assert_eq!(irq.mask_count(), 1);
    }

    #[test]
    fn adapter_failure_recovers_via_soft_reset_within_budget() {
        let io = MockIo::new();
        let clock = FakeClock::new();
        let irq = RecordingIrqMask::new();
        let mut controller = attach_pio(&io, &clock, &irq);
        controller.start(&clock).unwrap();

        io.set_interrupt_status(crate::io::INT_ADAPTER_FAILURE);
        let outcome = controller.handle_interrupt(&clock).unwrap();
        assert!(outcome.adapter_failure);
        assert_eq!(controller.state(), ControllerState::Active);
    }

    #[test]
    fn adapter_failure_fails_the_controller_once_recovery_budget_is_exhausted() {
        let io = MockIo::new();
        let clock = FakeClock::new();
        let irq = RecordingIrqMask::new();
        let mut controller = attach_pio(&io, &clock, &irq);
        controller.start(&clock).unwrap();

        for _ in 0..RECOVERY_MAX_ATTEMPTS {
            io.set_interrupt_status(crate::io::INT_ADAPTER_FAILURE);
            controller.handle_interrupt(&clock).unwrap();
        }
        io.set_interrupt_status(crate::io::INT_ADAPTER_FAILURE);
        let err = controller.handle_interrupt(&clock).unwrap_err();
        assert_eq!(err, Error::AdapterFailure);
        assert_eq!(controller.state(), ControllerState::Failed);
    }
}
