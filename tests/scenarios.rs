//! End-to-end scenarios driven entirely through the public `Controller`
//! facade and the in-memory [`MockIo`]/[`FakeClock`] test doubles, the way
//! a host integration would exercise this crate without real hardware.

use vortex_core::client::ClientMode;
use vortex_core::coherency::{BusMasterProbe, CacheMode, CoherencyTier, CpuFamily, CpuProbe};
use vortex_core::config::Config;
use vortex_core::controller::ControllerState;
use vortex_core::frame::{EtherType, Frame, MacAddress};
use vortex_core::testutil::{FakeClock, MockIo, RecordingIrqMask};
use vortex_core::{Controller, TransferMethod};

const VORTEX_PIO: (u16, u16) = (0x10b7, 0x5900);
const BOOMERANG_DMA: (u16, u16) = (0x10b7, 0x9200);

struct WorkingProbe;
impl CpuProbe for WorkingProbe {
    fn family(&self) -> CpuFamily {
        CpuFamily::PentiumOrLater
    }
}
impl BusMasterProbe for WorkingProbe {
    fn bus_master_works(&self) -> bool {
        true
    }
    fn snoops(&self) -> bool {
        false
    }
}

struct BrokenBusMasterProbe;
impl CpuProbe for BrokenBusMasterProbe {
    fn family(&self) -> CpuFamily {
        CpuFamily::PentiumOrLater
    }
}
impl BusMasterProbe for BrokenBusMasterProbe {
    fn bus_master_works(&self) -> bool {
        false
    }
    fn snoops(&self) -> bool {
        false
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn s1_attach_transmit_stop_detach_is_clean() {
    init_logging();
    let io = MockIo::new();
    let clock = FakeClock::new();
    let probe = WorkingProbe;
    let irq = RecordingIrqMask::new();
    let mut controller =
        Controller::new(&io, VORTEX_PIO.0, VORTEX_PIO.1, Config::default(), &irq).unwrap();

    controller
        .attach(&clock, &probe, &probe, CacheMode::WriteBack)
        .unwrap();
    assert_eq!(controller.state(), ControllerState::Ready);

    controller.start(&clock).unwrap();
    assert_eq!(controller.state(), ControllerState::Active);

    let frame = Frame::new(
        MacAddress::BROADCAST,
        controller.mac_address(),
        EtherType::IP,
        b"hello",
    );
    controller.transmit(&frame).unwrap();
    assert_eq!(controller.stats().tx_packets, 1);

    controller.stop(&clock).unwrap();
    controller.detach(&clock).unwrap();
    assert_eq!(controller.state(), ControllerState::Dead);
}

#[test]
fn s2_tx_pool_fills_to_capacity_then_rejects_until_reaped() {
    // spec §8 S2, driven through a bus-mastering chip's ring/pool pair.
    let io = MockIo::new();
    let clock = FakeClock::new();
    let probe = WorkingProbe;
    let irq = RecordingIrqMask::new();
    let mut controller =
        Controller::new(&io, BOOMERANG_DMA.0, BOOMERANG_DMA.1, Config::default(), &irq).unwrap();
    controller
        .attach(&clock, &probe, &probe, CacheMode::WriteBack)
        .unwrap();
    controller.start(&clock).unwrap();

    let frame = Frame::new(
        MacAddress::BROADCAST,
        controller.mac_address(),
        EtherType::IP,
        b"payload",
    );

    for _ in 0..vortex_core::RING_SIZE {
        controller.transmit(&frame).unwrap();
    }
    let err = controller.transmit(&frame).unwrap_err();
    assert!(err.is_transient());
    assert_eq!(controller.tx_threshold(), 256); // no underrun observed yet
}

#[test]
fn s3_received_frame_is_demuxed_to_the_matching_client() {
    // spec §8 S3.
    let io = MockIo::new();
    let clock = FakeClock::new();
    let probe = WorkingProbe;
    let irq = RecordingIrqMask::new();
    let mut controller =
        Controller::new(&io, VORTEX_PIO.0, VORTEX_PIO.1, Config::default(), &irq).unwrap();
    controller
        .attach(&clock, &probe, &probe, CacheMode::WriteBack)
        .unwrap();
    assert_eq!(controller.mac_address(), MacAddress::ZERO);
    controller.start(&clock).unwrap();

    let ip_client = controller
        .register_client(EtherType::IP, None, ClientMode::Direct, |_| {})
        .unwrap();
    controller
        .register_client(EtherType::ARP, None, ClientMode::Direct, |_| {})
        .unwrap();

    // 60-byte minimum frame, destination == station address (zero), type IP.
    let mut wire = vec![0u8; 60];
    wire[6..12].copy_from_slice(&[0x11; 6]); // source
    wire[12..14].copy_from_slice(&EtherType::IP.0.to_be_bytes());
    io.queue_rx_frame(&wire);

    let (frame, recipients) = controller.poll_receive().expect("frame should be ready");
    assert_eq!(frame.ether_type, EtherType::IP);
    assert_eq!(recipients, vec![ip_client]);
    assert_eq!(controller.stats().rx_drops, 0);
}

#[test]
fn s3_received_frame_with_no_matching_client_is_counted_as_a_drop() {
    let io = MockIo::new();
    let clock = FakeClock::new();
    let probe = WorkingProbe;
    let irq = RecordingIrqMask::new();
    let mut controller =
        Controller::new(&io, VORTEX_PIO.0, VORTEX_PIO.1, Config::default(), &irq).unwrap();
    controller
        .attach(&clock, &probe, &probe, CacheMode::WriteBack)
        .unwrap();
    controller.start(&clock).unwrap();
    controller
        .register_client(EtherType::ARP, None, ClientMode::Direct, |_| {})
        .unwrap();

    let mut wire = vec![0u8; 60];
    wire[6..12].copy_from_slice(&[0x22; 6]);
    wire[12..14].copy_from_slice(&EtherType::IP.0.to_be_bytes());
    io.queue_rx_frame(&wire);

    let (_, recipients) = controller.poll_receive().expect("frame should be ready");
    assert!(recipients.is_empty());
    assert_eq!(controller.stats().rx_drops, 1);
}

#[test]
fn s4_promiscuous_toggle_reaches_the_receive_filter_register() {
    // spec §8 S4.
    let io = MockIo::new();
    let clock = FakeClock::new();
    let probe = WorkingProbe;
    let irq = RecordingIrqMask::new();
    let mut controller =
        Controller::new(&io, VORTEX_PIO.0, VORTEX_PIO.1, Config::default(), &irq).unwrap();
    controller
        .attach(&clock, &probe, &probe, CacheMode::WriteBack)
        .unwrap();
    controller.start(&clock).unwrap();

    let writes_before = io.command_writes();
    controller.set_promiscuous(&clock, true).unwrap();
    assert!(io.command_writes() > writes_before);
    controller.set_promiscuous(&clock, false).unwrap();
}

#[test]
fn s5_negotiation_timeout_falls_back_to_forced_media_without_failing_attach() {
    // spec §8 S5: a PHY that reports auto-negotiation-capable but never
    // reports completion must not prevent attach from succeeding.
    use vortex_core::io::{IoPort, CMD_SELECT_WINDOW, COMMAND_REG};

    let io = MockIo::new();
    // Select window 1 and program the MII status offset with the
    // AN_CAPABLE bit set (0x08) so `negotiate` enters its bounded poll
    // instead of short-circuiting to forced media immediately.
    io.write16(COMMAND_REG, (u16::from(CMD_SELECT_WINDOW) << 11) | 1);
    io.write16(0x08, 0x08);

    let clock = FakeClock::new();
    clock.set_auto_advance(1_000_000);
    let probe = WorkingProbe;
    let irq = RecordingIrqMask::new();
    let mut controller =
        Controller::new(&io, VORTEX_PIO.0, VORTEX_PIO.1, Config::default(), &irq).unwrap();

    let result = controller.attach(&clock, &probe, &probe, CacheMode::WriteBack);
    assert!(result.is_ok());
    assert_eq!(controller.state(), ControllerState::Ready);
}

#[test]
fn s6_broken_bus_master_disables_dma_for_a_dma_capable_chip() {
    // spec §8 S6.
    let io = MockIo::new();
    let clock = FakeClock::new();
    let probe = BrokenBusMasterProbe;
    let irq = RecordingIrqMask::new();
    let mut controller =
        Controller::new(&io, BOOMERANG_DMA.0, BOOMERANG_DMA.1, Config::default(), &irq).unwrap();

    let descriptor = controller
        .attach(&clock, &probe, &probe, CacheMode::WriteBack)
        .unwrap();
    assert_eq!(descriptor.coherency.tier, CoherencyTier::DisableBusMaster);
    assert_eq!(controller.active_transfer_method(), TransferMethod::Pio);

    controller.start(&clock).unwrap();
    controller.stop(&clock).unwrap();
    // No frames were ever queued, so the ring/pool are still in their
    // all-free resting state and detach sees a clean shutdown.
    controller.detach(&clock).unwrap();
}
