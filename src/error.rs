//! Error taxonomy (spec §7).
//!
//! Every variant below is grouped by the failure family the specification
//! assigns it to. Recovery that happens *inside* the component that raised
//! the error (one soft reset, one tier demotion, ...) is not visible here;
//! only errors that change the controller's externally observable state
//! are surfaced to callers.

use thiserror::Error;

/// Taxonomy of errors a core operation can return.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // --- Timeout family -----------------------------------------------
    /// A register command's busy bit never cleared within its deadline.
    #[error("command timed out waiting for the busy bit to clear")]
    CommandTimeout,
    /// EEPROM busy bit never cleared within its deadline.
    #[error("EEPROM access timed out")]
    EepromTimeout,
    /// Soft reset never cleared the busy bit within its deadline.
    #[error("reset timed out")]
    ResetTimeout,
    /// Auto-negotiation never asserted negotiation-complete within 3s.
    #[error("auto-negotiation timed out")]
    NegotiationTimeout,

    // --- Parameter family -----------------------------------------------
    /// Frame length outside `[MIN_FRAME - FCS, MAX_FRAME - FCS]`.
    #[error("frame length out of bounds")]
    InvalidLength,
    /// EEPROM address at or beyond `EEPROM_SIZE`.
    #[error("EEPROM address out of range")]
    EepromAddress,
    /// Client registration table is at capacity.
    #[error("no free client handles")]
    OutOfHandles,
    /// `(vendor_id, device_id)` not present in the capability table.
    #[error("unrecognized vendor/device id")]
    UnknownChip,

    // --- Resource family -----------------------------------------------
    /// TX ring has zero free slots.
    #[error("transmit ring is full")]
    RingFull,
    /// Buffer pool has no free buffers to hand out.
    #[error("buffer pool is empty")]
    BufferPoolEmpty,

    // --- Integrity family -----------------------------------------------
    /// EEPROM checksum did not close to zero; attach still proceeds.
    #[error("EEPROM checksum mismatch")]
    EepromChecksum,
    /// A descriptor was found in an invalid combination of ownership/fields.
    #[error("descriptor in an invalid state")]
    BadDescriptor,

    // --- Hardware family -----------------------------------------------
    /// Adapter-failure interrupt bit set and bounded recovery exhausted.
    #[error("adapter failed and recovery was exhausted")]
    AdapterFailure,
    /// No hardware responded at the expected I/O base during attach.
    #[error("hardware not present")]
    HardwareAbsent,

    // --- Coherency family -----------------------------------------------
    /// The selected DMA cache-management tier faulted at runtime.
    #[error("DMA cache-management tier unsupported at runtime")]
    DmaUnsupported,

    // --- Shutdown family -----------------------------------------------
    /// Detach completed, but buffer/ring accounting did not return to zero.
    #[error("buffers were still allocated at shutdown")]
    LeakedAtShutdown,
}

impl Error {
    /// True for errors spec §7 calls transient: the caller may retry or
    /// drop the operation without the controller's state having changed.
    pub fn is_transient(self) -> bool {
        matches!(self, Error::RingFull | Error::BufferPoolEmpty)
    }

    /// True for the timeout family, which recovers locally with one soft
    /// reset before being re-raised.
    pub fn is_timeout(self) -> bool {
        matches!(
            self,
            Error::CommandTimeout
                | Error::EepromTimeout
                | Error::ResetTimeout
                | Error::NegotiationTimeout
        )
    }
}
