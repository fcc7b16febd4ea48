//! Capability table (C2).
//!
//! A static table maps `(vendor_id, device_id)` to the per-chip record
//! spec §4.2 describes: display name, chip family, default media,
//! transfer-method preference, and a feature bitmap. Lookup is linear over
//! a small table, exactly as spec.md calls for.

use bitflags::bitflags;

/// Chip family tag (spec §3). `Reserved` exists only to occupy the
/// unused/duplicate jump-table slots DESIGN NOTES calls out; `attach`
/// rejects it with [`crate::Error::UnknownChip`] rather than aliasing it
/// onto a real family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipFamily {
    /// PIO-only ISA controller (e.g. the original Vortex-class part).
    PioIsa,
    /// Bus-mastering ISA controller (Boomerang-class).
    BusMasterIsa,
    /// Bus-mastering PCI controller (Boomerang/Hurricane-class).
    BusMasterPci,
    /// CardBus variant of the bus-mastering controller.
    CardBus,
    /// A reserved/duplicate table slot; never a legal attach target.
    Reserved,
}

/// Whether a family moves frames through programmed I/O or bus-master DMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMethod {
    /// The driver copies frame bytes through the FIFO itself.
    Pio,
    /// The chip DMAs to/from host-resident descriptor rings.
    BusMasterDma,
}

bitflags! {
    /// Per-chip feature bitmap (spec §3: "capability flags").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CapabilityFlags: u8 {
        /// Chip can compute IP/TCP/UDP checksums on transmit/receive.
        const CHECKSUM_OFFLOAD = 1 << 0;
        /// Chip has an MII/PHY capable of auto-negotiation.
        const AUTO_NEGOTIATION = 1 << 1;
        /// Chip can act as a PCI/CardBus bus master.
        const BUS_MASTER = 1 << 2;
    }
}

/// Default media, used when auto-negotiation is unavailable or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultMedia {
    /// 10 Mbit half duplex.
    Tp10HalfDuplex,
    /// 100 Mbit half duplex (100Base-TX).
    Tx100HalfDuplex,
}

/// One capability-table entry (spec §4.2).
#[derive(Debug, Clone, Copy)]
pub struct ChipCapability {
    /// PCI/ISA-PnP vendor id.
    pub vendor_id: u16,
    /// PCI/ISA-PnP device id.
    pub device_id: u16,
    /// Human-readable chip name.
    pub name: &'static str,
    /// Chip family tag, used to select a [`crate::ops::ControllerOps`].
    pub family: ChipFamily,
    /// Media to fall back to when negotiation is unavailable.
    pub default_media: DefaultMedia,
    /// PIO vs. bus-master DMA.
    pub transfer_method: TransferMethod,
    /// Feature bitmap.
    pub features: CapabilityFlags,
}

/// The capability table. Real vendor/device ids for the 3Com Vortex
/// (PIO-only), Boomerang (bus-master ISA/PCI), and Hurricane/CardBus
/// generations this specification targets; two reserved slots represent
/// the unused/duplicate jump-table entries DESIGN NOTES calls out.
pub static CAPABILITY_TABLE: &[ChipCapability] = &[
    ChipCapability {
        vendor_id: 0x10b7,
        device_id: 0x5900,
        name: "3c590 Vortex 10Mbps",
        family: ChipFamily::PioIsa,
        default_media: DefaultMedia::Tp10HalfDuplex,
        transfer_method: TransferMethod::Pio,
        features: CapabilityFlags::empty(),
    },
    ChipCapability {
        vendor_id: 0x10b7,
        device_id: 0x5920,
        name: "3c592 EISA Vortex 10Mbps",
        family: ChipFamily::PioIsa,
        default_media: DefaultMedia::Tp10HalfDuplex,
        transfer_method: TransferMethod::Pio,
        features: CapabilityFlags::empty(),
    },
    ChipCapability {
        vendor_id: 0x10b7,
        device_id: 0x5950,
        name: "3c595 Vortex 100Mbps TX",
        family: ChipFamily::PioIsa,
        default_media: DefaultMedia::Tx100HalfDuplex,
        transfer_method: TransferMethod::Pio,
        features: CapabilityFlags::AUTO_NEGOTIATION,
    },
    ChipCapability {
        vendor_id: 0x10b7,
        device_id: 0x900a,
        name: "3c900 Boomerang 10Mbps Combo",
        family: ChipFamily::BusMasterPci,
        default_media: DefaultMedia::Tp10HalfDuplex,
        transfer_method: TransferMethod::BusMasterDma,
        features: CapabilityFlags::BUS_MASTER,
    },
    ChipCapability {
        vendor_id: 0x10b7,
        device_id: 0x9000,
        name: "3c900 Boomerang 10Mbps",
        family: ChipFamily::BusMasterPci,
        default_media: DefaultMedia::Tp10HalfDuplex,
        transfer_method: TransferMethod::BusMasterDma,
        features: CapabilityFlags::BUS_MASTER,
    },
    ChipCapability {
        vendor_id: 0x10b7,
        device_id: 0x9050,
        name: "3c905 Boomerang 100Mbps TX",
        family: ChipFamily::BusMasterPci,
        default_media: DefaultMedia::Tx100HalfDuplex,
        transfer_method: TransferMethod::BusMasterDma,
        features: CapabilityFlags::BUS_MASTER.union(CapabilityFlags::AUTO_NEGOTIATION),
    },
    ChipCapability {
        vendor_id: 0x10b7,
        device_id: 0x9055,
        name: "3c905 Boomerang 100Mbps T4",
        family: ChipFamily::BusMasterPci,
        default_media: DefaultMedia::Tx100HalfDuplex,
        transfer_method: TransferMethod::BusMasterDma,
        features: CapabilityFlags::BUS_MASTER.union(CapabilityFlags::AUTO_NEGOTIATION),
    },
    ChipCapability {
        vendor_id: 0x10b7,
        device_id: 0x9004,
        name: "3c900B Cyclone 10Mbps Combo",
        family: ChipFamily::BusMasterPci,
        default_media: DefaultMedia::Tp10HalfDuplex,
        transfer_method: TransferMethod::BusMasterDma,
        features: CapabilityFlags::BUS_MASTER.union(CapabilityFlags::CHECKSUM_OFFLOAD),
    },
    ChipCapability {
        vendor_id: 0x10b7,
        device_id: 0x9056,
        name: "3c905B Cyclone 100Mbps TX",
        family: ChipFamily::BusMasterPci,
        default_media: DefaultMedia::Tx100HalfDuplex,
        transfer_method: TransferMethod::BusMasterDma,
        features: CapabilityFlags::BUS_MASTER
            .union(CapabilityFlags::AUTO_NEGOTIATION)
            .union(CapabilityFlags::CHECKSUM_OFFLOAD),
    },
    ChipCapability {
        vendor_id: 0x10b7,
        device_id: 0x9200,
        name: "3c905C Tornado 100Mbps TX",
        family: ChipFamily::BusMasterPci,
        default_media: DefaultMedia::Tx100HalfDuplex,
        transfer_method: TransferMethod::BusMasterDma,
        features: CapabilityFlags::BUS_MASTER
            .union(CapabilityFlags::AUTO_NEGOTIATION)
            .union(CapabilityFlags::CHECKSUM_OFFLOAD),
    },
    ChipCapability {
        vendor_id: 0x10b7,
        device_id: 0x4500,
        name: "3c575 Hurricane CardBus",
        family: ChipFamily::CardBus,
        default_media: DefaultMedia::Tx100HalfDuplex,
        transfer_method: TransferMethod::BusMasterDma,
        features: CapabilityFlags::BUS_MASTER.union(CapabilityFlags::AUTO_NEGOTIATION),
    },
    // Reserved/duplicate jump-table slots (spec.md DESIGN NOTES, Open
    // Questions): rejected at attach rather than silently aliased onto a
    // real family.
    ChipCapability {
        vendor_id: 0x10b7,
        device_id: 0x9001,
        name: "reserved",
        family: ChipFamily::Reserved,
        default_media: DefaultMedia::Tp10HalfDuplex,
        transfer_method: TransferMethod::Pio,
        features: CapabilityFlags::empty(),
    },
    ChipCapability {
        vendor_id: 0x10b7,
        device_id: 0x9058,
        name: "reserved",
        family: ChipFamily::Reserved,
        default_media: DefaultMedia::Tp10HalfDuplex,
        transfer_method: TransferMethod::Pio,
        features: CapabilityFlags::empty(),
    },
];

/// Looks up a `(vendor_id, device_id)` pair in [`CAPABILITY_TABLE`].
pub fn lookup(vendor_id: u16, device_id: u16) -> Option<&'static ChipCapability> {
    CAPABILITY_TABLE
        .iter()
        .find(|c| c.vendor_id == vendor_id && c.device_id == device_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_known_chip() {
        let cap = lookup(0x10b7, 0x9200).expect("3c905C should be in the table");
        assert_eq!(cap.family, ChipFamily::BusMasterPci);
        assert!(cap.features.contains(CapabilityFlags::AUTO_NEGOTIATION));
    }

    #[test]
    fn lookup_rejects_unknown_chip() {
        assert!(lookup(0xffff, 0xffff).is_none());
    }

    #[test]
    fn reserved_slots_carry_the_reserved_family() {
        let cap = lookup(0x10b7, 0x9001).unwrap();
        assert_eq!(cap.family, ChipFamily::Reserved);
    }

    #[test]
    fn table_stays_within_the_small_n_budget() {
        assert!(CAPABILITY_TABLE.len() <= 64);
    }
}
