//! Configuration knobs (spec §6).
//!
//! A plain, host-supplied value; nothing here reads the environment or a
//! config file itself, matching how `drivers/pci.rs`'s callers hand
//! already-parsed descriptors down into the driver layer rather than the
//! driver parsing anything itself.

/// DMA-capable receive buffer size. The chip family supports exactly these
/// two sizes (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSize {
    /// 1536-byte buffers, enough for one full untagged Ethernet frame.
    Standard,
    /// 2048-byte buffers, room for a tagged frame or alignment slack.
    Large,
}

impl BufferSize {
    /// The buffer size in bytes.
    pub fn bytes(self) -> usize {
        match self {
            BufferSize::Standard => crate::DEFAULT_BUFFER_SIZE,
            BufferSize::Large => 2048,
        }
    }
}

impl Default for BufferSize {
    fn default() -> Self {
        BufferSize::Standard
    }
}

/// Overrides the cache-coherency tier that [`crate::coherency::select`]
/// would otherwise choose (spec §6, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoherencyOverride {
    /// Let the decision table choose (spec §4.8's normal path).
    #[default]
    Auto,
    /// Force programmed I/O, bypassing bus-master DMA entirely.
    ForcePio,
    /// Force a specific tier, bypassing the probe-driven decision.
    ForceTier(crate::coherency::CoherencyTier),
}

/// Live configuration knobs for one controller attach (spec §6).
///
/// Host-level concerns that spec.md explicitly places outside this crate
/// — log level, TSR residency, packet-driver call-gate numbers — are not
/// modeled here; only the knobs that affect this crate's own behavior are.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Receive/transmit buffer size.
    pub buffer_size: BufferSize,
    /// Receive all frames regardless of destination address or filter.
    pub promiscuous: bool,
    /// Cache-coherency tier override.
    pub coherency_override: CoherencyOverride,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            buffer_size: BufferSize::default(),
            promiscuous: false,
            coherency_override: CoherencyOverride::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_not_promiscuous_and_auto_coherency() {
        let cfg = Config::default();
        assert!(!cfg.promiscuous);
        assert_eq!(cfg.coherency_override, CoherencyOverride::Auto);
        assert_eq!(cfg.buffer_size.bytes(), 1536);
    }

    #[test]
    fn large_buffer_size_is_2048_bytes() {
        assert_eq!(BufferSize::Large.bytes(), 2048);
    }
}
