//! In-memory test doubles for [`IoPort`](crate::io::IoPort) and
//! [`Clock`](crate::clock::Clock).
//!
//! Grounded in the teacher's `ConfigRegionAccess`-over-a-trait pattern
//! (`drivers/pci.rs`), which lets the same driver logic run over real bus
//! access or, here, a plain register file — no real hardware or interrupt
//! controller is needed to drive every scenario in spec §8.

use std::cell::{Cell, RefCell};

use crate::clock::Clock;
use crate::controller::IrqMask;
use crate::io::IoPort;

/// A manually-advanced [`Clock`] for deterministic timeout tests.
///
/// Every read of [`Clock::now_us`] nudges the clock forward by
/// `auto_advance_us` (1 by default) so bounded polling loops in tests
/// terminate instead of spinning forever on a frozen clock. Tests that
/// need a busy-forever loop to hit a multi-second deadline quickly (spec
/// §8 S5's 3s auto-negotiation timeout) can widen the step with
/// [`FakeClock::set_auto_advance`] instead of iterating millions of times.
#[derive(Debug)]
pub struct FakeClock {
    now_us: Cell<u64>,
    auto_advance_us: Cell<u64>,
}

impl Default for FakeClock {
    fn default() -> Self {
        FakeClock {
            now_us: Cell::new(0),
            auto_advance_us: Cell::new(1),
        }
    }
}

impl FakeClock {
    /// Starts the clock at zero, advancing by 1us per observation.
    pub fn new() -> Self {
        FakeClock::default()
    }

    /// Advances the clock by `us` microseconds immediately.
    pub fn advance(&self, us: u64) {
        self.now_us.set(self.now_us.get() + us);
    }

    /// Changes the per-observation auto-advance step.
    pub fn set_auto_advance(&self, us: u64) {
        self.auto_advance_us.set(us);
    }
}

impl Clock for FakeClock {
    fn now_us(&self) -> u64 {
        let t = self.now_us.get();
        self.now_us.set(t + self.auto_advance_us.get());
        t
    }
}

/// Operating-window offset of the PIO receive FIFO (mirrors `ops::RX_FIFO`).
const RX_FIFO_OFFSET: u16 = 0x00;
/// Operating-window offset of the PIO receive status register (mirrors
/// `ops::RX_STATUS`).
const RX_STATUS_OFFSET: u16 = 0x18;
/// Receive-status "packet complete" bit (mirrors `ops::RX_STATUS_COMPLETE`).
const RX_STATUS_COMPLETE: u16 = 0x8000;

/// An in-memory register file standing in for the 8-window bus plus the
/// EEPROM, command, and status registers.
///
/// [`MockIo::queue_rx_frame`] additionally emulates the PIO receive FIFO
/// (`ops::RX_FIFO`/`ops::RX_STATUS`) well enough to drive
/// [`crate::ops::PioIsaOps::poll_receive`] end to end in tests, since a
/// real FIFO auto-advances on each read and a plain register slot cannot.
pub struct MockIo {
    windows: RefCell<[[u8; 256]; crate::io::NUM_WINDOWS as usize + 1]>,
    command_writes: Cell<u32>,
    always_busy: Cell<bool>,
    eeprom: RefCell<[u16; crate::EEPROM_SIZE]>,
    eeprom_last_address: Cell<u16>,
    current_window: Cell<u8>,
    rx_frame: RefCell<Option<Vec<u8>>>,
    rx_cursor: Cell<usize>,
    interrupt_status: Cell<u16>,
}

impl MockIo {
    /// Builds a fresh register file, all zeroed, window 0 selected.
    pub fn new() -> Self {
        MockIo {
            windows: RefCell::new([[0u8; 256]; crate::io::NUM_WINDOWS as usize + 1]),
            command_writes: Cell::new(0),
            always_busy: Cell::new(false),
            eeprom: RefCell::new([0u16; crate::EEPROM_SIZE]),
            eeprom_last_address: Cell::new(0),
            current_window: Cell::new(0),
            rx_frame: RefCell::new(None),
            rx_cursor: Cell::new(0),
            interrupt_status: Cell::new(0),
        }
    }

    /// Number of writes observed on the shared command register.
    pub fn command_writes(&self) -> u32 {
        self.command_writes.get()
    }

    /// Forces every busy-bit poll to report busy, for timeout tests.
    pub fn set_always_busy(&self, busy: bool) {
        self.always_busy.set(busy);
    }

    /// Programs one EEPROM word for [`WindowIo::eeprom_read`] to return.
    pub fn set_eeprom_word(&self, address: u16, value: u16) {
        self.eeprom.borrow_mut()[address as usize] = value;
    }

    /// Queues one frame for the PIO receive FIFO emulation to hand back to
    /// the next `poll_receive` call.
    pub fn queue_rx_frame(&self, bytes: &[u8]) {
        *self.rx_frame.borrow_mut() = Some(bytes.to_vec());
        self.rx_cursor.set(0);
    }

    /// Sets interrupt-cause bits in the shared status register, as if
    /// hardware had just raised them. Cleared as the driver acknowledges
    /// them through [`crate::io::CMD_ACK_INTERRUPT`].
    pub fn set_interrupt_status(&self, bits: u16) {
        self.interrupt_status.set(self.interrupt_status.get() | bits);
    }

    fn window_slot(&self) -> usize {
        self.current_window.get() as usize
    }
}

impl Default for MockIo {
    fn default() -> Self {
        Self::new()
    }
}

impl IoPort for MockIo {
    fn read8(&self, offset: u16) -> u8 {
        self.windows.borrow()[self.window_slot()][offset as usize]
    }

    fn read16(&self, offset: u16) -> u16 {
        if offset == crate::io::STATUS_REG {
            let busy = if self.always_busy.get() { 0x1000 } else { 0 };
            return busy | self.interrupt_status.get();
        }
        if offset == 0x0a {
            // EEPROM command register: never busy in the mock.
            return 0;
        }
        if offset == 0x0c {
            let addr = self.eeprom_last_address.get() as usize % crate::EEPROM_SIZE;
            return self.eeprom.borrow()[addr];
        }
        if offset == RX_STATUS_OFFSET {
            return match &*self.rx_frame.borrow() {
                Some(bytes) => RX_STATUS_COMPLETE | bytes.len() as u16,
                None => 0,
            };
        }
        let win = self.windows.borrow();
        let slot = &win[self.window_slot()];
        u16::from_le_bytes([slot[offset as usize], slot[offset as usize + 1]])
    }

    fn read32(&self, offset: u16) -> u32 {
        if offset == RX_FIFO_OFFSET {
            let mut frame = self.rx_frame.borrow_mut();
            if let Some(bytes) = frame.as_mut() {
                let cursor = self.rx_cursor.get();
                let mut word = [0u8; 4];
                let remaining = bytes.len().saturating_sub(cursor);
                let take = remaining.min(4);
                word[..take].copy_from_slice(&bytes[cursor..cursor + take]);
                self.rx_cursor.set(cursor + take);
                if cursor + take >= bytes.len() {
                    *frame = None;
                    self.rx_cursor.set(0);
                }
                return u32::from_le_bytes(word);
            }
        }
        let win = self.windows.borrow();
        let slot = &win[self.window_slot()];
        u32::from_le_bytes([
            slot[offset as usize],
            slot[offset as usize + 1],
            slot[offset as usize + 2],
            slot[offset as usize + 3],
        ])
    }

    fn write8(&self, offset: u16, value: u8) {
        self.windows.borrow_mut()[self.window_slot()][offset as usize] = value;
    }

    fn write16(&self, offset: u16, value: u16) {
        if offset == crate::io::COMMAND_REG {
            self.command_writes.set(self.command_writes.get() + 1);
            let opcode = value >> 11;
            let arg = value & 0x07ff;
            if opcode == crate::io::CMD_SELECT_WINDOW as u16 {
                self.current_window.set(arg as u8);
            } else if opcode == crate::io::CMD_ACK_INTERRUPT as u16 {
                self.interrupt_status.set(self.interrupt_status.get() & !arg);
            }
            return;
        }
        if offset == 0x0a {
            self.eeprom_last_address.set(value & 0x3f);
            return;
        }
        let mut win = self.windows.borrow_mut();
        let slot = &mut win[self.window_slot()];
        let bytes = value.to_le_bytes();
        slot[offset as usize] = bytes[0];
        slot[offset as usize + 1] = bytes[1];
    }

    fn write32(&self, offset: u16, value: u32) {
        let mut win = self.windows.borrow_mut();
        let slot = &mut win[self.window_slot()];
        let bytes = value.to_le_bytes();
        slot[offset as usize..offset as usize + 4].copy_from_slice(&bytes);
    }
}

/// An [`IrqMask`] test double that records whether the controller's
/// interrupt line is currently masked, and how many times masking was
/// requested, without touching any real interrupt controller.
#[derive(Debug, Default)]
pub struct RecordingIrqMask {
    masked: Cell<bool>,
    mask_count: Cell<u32>,
}

impl RecordingIrqMask {
    /// Builds an unmasked recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the line is currently masked.
    pub fn is_masked(&self) -> bool {
        self.masked.get()
    }

    /// Number of times [`IrqMask::mask`] has been called.
    pub fn mask_count(&self) -> u32 {
        self.mask_count.get()
    }
}

impl IrqMask for RecordingIrqMask {
    fn mask(&self) {
        self.masked.set(true);
        self.mask_count.set(self.mask_count.get() + 1);
    }

    fn unmask(&self) {
        self.masked.set(false);
    }
}
