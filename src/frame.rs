//! Ethernet II frame model (spec §6) and destination classification.
//!
//! Build/parse is a plain byte-layout round trip (P5); classification
//! implements the broadcast/multicast/for-us first-byte rule the receive
//! path (§4.7 step 4b) depends on.

use std::fmt;

use crate::error::Error;
use crate::MIN_FRAME;

/// A 6-octet Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// The broadcast address `ff:ff:ff:ff:ff:ff`.
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// All-zero address, used as a "no filter" sentinel.
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    /// True if every octet is `0xff`.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// True if the group bit (low bit of the first octet) is set and the
    /// address is not the broadcast address.
    pub fn is_multicast(&self) -> bool {
        !self.is_broadcast() && self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// A 16-bit Ethernet II type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EtherType(pub u16);

impl EtherType {
    /// IPv4 (spec §6).
    pub const IP: EtherType = EtherType(0x0800);
    /// ARP (spec §6).
    pub const ARP: EtherType = EtherType(0x0806);
    /// IPX (spec §6).
    pub const IPX: EtherType = EtherType(0x8137);
}

/// How a received frame's destination relates to this controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationClass {
    /// Destination is the all-ones broadcast address.
    Broadcast,
    /// Destination has the multicast group bit set and isn't broadcast.
    Multicast,
    /// Destination matches this controller's station address.
    ForUs,
    /// Destination matches none of the above.
    Other,
}

/// Classifies a destination address against this controller's station
/// address, per spec §4.7 step 4b's first-byte rule.
pub fn classify(dest: MacAddress, station: MacAddress) -> DestinationClass {
    if dest.is_broadcast() {
        DestinationClass::Broadcast
    } else if dest.is_multicast() {
        DestinationClass::Multicast
    } else if dest == station {
        DestinationClass::ForUs
    } else {
        DestinationClass::Other
    }
}

/// An owned Ethernet II frame: 6-byte dest, 6-byte src, 2-byte type, and a
/// 46..1500-byte payload (spec §6). The driver pads short payloads; the
/// FCS is added/checked by hardware and is not modeled here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination MAC address.
    pub dest: MacAddress,
    /// Source MAC address.
    pub src: MacAddress,
    /// Ethernet type field.
    pub ether_type: EtherType,
    /// Frame payload, unpadded.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Builds a frame from its fields. Does not pad or validate length;
    /// see [`crate::ops::pad_and_validate`] for the transmit-path rules.
    pub fn new(dest: MacAddress, src: MacAddress, ether_type: EtherType, payload: &[u8]) -> Self {
        Frame {
            dest,
            src,
            ether_type,
            payload: payload.to_vec(),
        }
    }

    /// Serializes the frame to its on-wire byte layout (header + payload,
    /// no padding, no FCS).
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(14 + self.payload.len());
        out.extend_from_slice(&self.dest.0);
        out.extend_from_slice(&self.src.0);
        out.extend_from_slice(&self.ether_type.0.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parses a byte slice into a [`Frame`]. Fails with
    /// [`Error::InvalidLength`] if the slice is shorter than a bare
    /// header (14 bytes).
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < 14 {
            return Err(Error::InvalidLength);
        }
        let mut dest = [0u8; 6];
        let mut src = [0u8; 6];
        dest.copy_from_slice(&bytes[0..6]);
        src.copy_from_slice(&bytes[6..12]);
        let ether_type = u16::from_be_bytes([bytes[12], bytes[13]]);
        Ok(Frame {
            dest: MacAddress(dest),
            src: MacAddress(src),
            ether_type: EtherType(ether_type),
            payload: bytes[14..].to_vec(),
        })
    }

    /// Classifies this frame's destination against `station`.
    pub fn classify(&self, station: MacAddress) -> DestinationClass {
        classify(self.dest, station)
    }
}

/// Zero-pads `payload` up to [`MIN_FRAME`] minus the 14-byte header, if
/// needed, matching the transmit path's "payload length is tracked
/// separately from descriptor length" rule (spec §4.6 step 2). Returns the
/// padded bytes and the original, unpadded payload length.
pub fn pad_payload(payload: &[u8]) -> (Vec<u8>, usize) {
    let min_payload = MIN_FRAME - 14;
    let original_len = payload.len();
    if payload.len() >= min_payload {
        return (payload.to_vec(), original_len);
    }
    let mut padded = payload.to_vec();
    padded.resize(min_payload, 0);
    (padded, original_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_round_trips_byte_for_byte() {
        let frame = Frame::new(
            MacAddress([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]),
            MacAddress([0x11, 0x12, 0x13, 0x14, 0x15, 0x16]),
            EtherType::IP,
            &[0xde, 0xad, 0xbe, 0xef],
        );
        let bytes = frame.build();
        let parsed = Frame::parse(&bytes).unwrap();
        assert_eq!(frame, parsed);
    }

    #[test]
    fn classification_follows_first_byte_rule() {
        let station = MacAddress([0x00, 0x60, 0x8c, 0x12, 0x34, 0x56]);
        assert_eq!(
            classify(MacAddress::BROADCAST, station),
            DestinationClass::Broadcast
        );
        assert_eq!(
            classify(MacAddress([0x01, 0, 0, 0, 0, 0]), station),
            DestinationClass::Multicast
        );
        assert_eq!(classify(station, station), DestinationClass::ForUs);
        assert_eq!(
            classify(MacAddress([0x02, 0, 0, 0, 0, 0]), station),
            DestinationClass::Other
        );
    }

    #[test]
    fn short_payload_is_padded_to_min_frame() {
        let (padded, original_len) = pad_payload(&[1, 2, 3]);
        assert_eq!(padded.len(), MIN_FRAME - 14);
        assert_eq!(original_len, 3);
        assert!(padded[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn long_payload_is_untouched() {
        let payload = vec![7u8; 200];
        let (padded, original_len) = pad_payload(&payload);
        assert_eq!(padded, payload);
        assert_eq!(original_len, 200);
    }
}
