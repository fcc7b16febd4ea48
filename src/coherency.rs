//! Cache-coherency tier selector (C8).
//!
//! Bus-master DMA needs the host to keep CPU caches and device-visible
//! memory consistent. Which mechanism does that job is a pure function of
//! four inputs (spec §4.8, P9): whether bus-mastering even probes
//! successfully, whether the platform snoops the bus, the CPU family, and
//! the configured cache mode. Grounded in the teacher's `virtio`
//! transport selection (`drivers/virtio/transport/mod.rs`), which picks
//! one transport implementation from a small set of host-probed facts in
//! exactly this style.

use crate::config::CoherencyOverride;
use crate::error::Error;

/// CPU family, coarse enough to know which flush instruction it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuFamily {
    /// 386/486-class CPU with neither CLFLUSH nor a cache to invalidate
    /// selectively.
    PreCache,
    /// 486 with WBINVD but no CLFLUSH.
    I486,
    /// Pentium-class or later with CLFLUSH available.
    PentiumOrLater,
}

/// Host-level CPU cache mode, as configured or detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Caching disabled entirely.
    Disabled,
    /// Write-through caching.
    WriteThrough,
    /// Write-back caching (needs explicit coherency action on DMA).
    WriteBack,
}

/// Host-supplied CPU identification (spec §4.8 input 3).
pub trait CpuProbe {
    /// Reports the running CPU's family.
    fn family(&self) -> CpuFamily;
}

/// Host-supplied bus-master capability probe (spec §4.8 input 1).
pub trait BusMasterProbe {
    /// True if a bus-master DMA transaction round-trips correctly. A host
    /// typically determines this with a one-time scratch-buffer DMA test
    /// during attach.
    fn bus_master_works(&self) -> bool;
    /// True if the platform snoops DMA traffic against CPU caches, making
    /// explicit cache management unnecessary (spec §4.8 input 2).
    fn snoops(&self) -> bool;
}

/// The four facts the decision table closes over (spec §4.8, P9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoherencyInputs {
    /// Bus-master DMA round-trips correctly.
    pub bus_master_works: bool,
    /// Platform snoops DMA against CPU caches.
    pub snoops: bool,
    /// CPU family.
    pub cpu_family: CpuFamily,
    /// Configured cache mode.
    pub cache_mode: CacheMode,
}

/// The chosen cache-management mechanism for DMA buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoherencyTier {
    /// Use the CLFLUSH instruction to invalidate DMA buffer lines.
    Clflush,
    /// Use WBINVD to flush the whole cache around DMA.
    Wbinvd,
    /// No flush instruction available; copy through an uncached bounce
    /// buffer instead.
    Software,
    /// Snooping or a disabled/write-through cache makes no action needed.
    Fallback,
    /// Bus-master DMA does not work at all; the caller must fall back to
    /// programmed I/O.
    DisableBusMaster,
}

/// A decision plus the inputs it was made from, useful for logging at
/// attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoherencyReport {
    /// The inputs the decision was computed from.
    pub inputs: CoherencyInputs,
    /// The selected tier.
    pub tier: CoherencyTier,
}

/// Selects a [`CoherencyTier`] from [`CoherencyInputs`] (spec §4.8's
/// decision table). Pure and deterministic (P9): the same inputs always
/// produce the same tier.
pub fn select(inputs: CoherencyInputs) -> CoherencyTier {
    if !inputs.bus_master_works {
        return CoherencyTier::DisableBusMaster;
    }
    if inputs.snoops || inputs.cache_mode != CacheMode::WriteBack {
        return CoherencyTier::Fallback;
    }
    match inputs.cpu_family {
        CpuFamily::PentiumOrLater => CoherencyTier::Clflush,
        CpuFamily::I486 => CoherencyTier::Wbinvd,
        CpuFamily::PreCache => CoherencyTier::Software,
    }
}

/// Runs [`select`], honoring a [`CoherencyOverride`] when the caller's
/// configuration asks for one instead of the probed decision.
pub fn resolve(inputs: CoherencyInputs, override_: CoherencyOverride) -> CoherencyReport {
    let tier = match override_ {
        CoherencyOverride::Auto => select(inputs),
        CoherencyOverride::ForcePio => CoherencyTier::DisableBusMaster,
        CoherencyOverride::ForceTier(t) => t,
    };
    CoherencyReport { inputs, tier }
}

/// Demotes a tier one step down the safety ladder after a runtime fault
/// (spec §4.8: "a tier that faults at runtime demotes once and retries").
/// [`CoherencyTier::DisableBusMaster`] has nowhere further to demote to
/// and is returned unchanged.
pub fn demote(tier: CoherencyTier) -> CoherencyTier {
    match tier {
        CoherencyTier::Clflush => CoherencyTier::Wbinvd,
        CoherencyTier::Wbinvd => CoherencyTier::Software,
        CoherencyTier::Software => CoherencyTier::DisableBusMaster,
        CoherencyTier::Fallback => CoherencyTier::DisableBusMaster,
        CoherencyTier::DisableBusMaster => CoherencyTier::DisableBusMaster,
    }
}

/// Runs whatever cache-maintenance `tier` requires before a DMA buffer is
/// handed to the device (spec §4.6 step 4's "call C8 dma_prepare(buffer,
/// to_device)"). The CPU-local flush tiers have nothing to report back to
/// a hosted caller — there is no real cache to flush in this crate's test
/// build — so only [`CoherencyTier::DisableBusMaster`], which has no DMA
/// path at all, is an error for a caller to reach.
pub fn dma_prepare(tier: CoherencyTier, _buffer: &[u8]) -> Result<(), Error> {
    match tier {
        CoherencyTier::DisableBusMaster => Err(Error::DmaUnsupported),
        CoherencyTier::Clflush | CoherencyTier::Wbinvd | CoherencyTier::Software | CoherencyTier::Fallback => Ok(()),
    }
}

/// The matching completion-side hook, run once the device has finished
/// with a DMA buffer and before the driver reads or reuses it.
pub fn dma_complete(tier: CoherencyTier, _buffer: &[u8]) -> Result<(), Error> {
    match tier {
        CoherencyTier::DisableBusMaster => Err(Error::DmaUnsupported),
        CoherencyTier::Clflush | CoherencyTier::Wbinvd | CoherencyTier::Software | CoherencyTier::Fallback => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dma_prepare_and_complete_reject_only_disable_bus_master() {
        for tier in [
            CoherencyTier::Clflush,
            CoherencyTier::Wbinvd,
            CoherencyTier::Software,
            CoherencyTier::Fallback,
        ] {
            assert!(dma_prepare(tier, &[]).is_ok());
            assert!(dma_complete(tier, &[]).is_ok());
        }
        assert_eq!(dma_prepare(CoherencyTier::DisableBusMaster, &[]).unwrap_err(), Error::DmaUnsupported);
        assert_eq!(dma_complete(CoherencyTier::DisableBusMaster, &[]).unwrap_err(), Error::DmaUnsupported);
    }

    #[test]
    fn selection_is_deterministic_given_the_same_inputs() {
        let inputs = CoherencyInputs {
            bus_master_works: true,
            snoops: false,
            cpu_family: CpuFamily::PentiumOrLater,
            cache_mode: CacheMode::WriteBack,
        };
        assert_eq!(select(inputs), select(inputs));
        assert_eq!(select(inputs), CoherencyTier::Clflush);
    }

    #[test]
    fn broken_bus_master_disables_dma_regardless_of_other_inputs() {
        let inputs = CoherencyInputs {
            bus_master_works: false,
            snoops: true,
            cpu_family: CpuFamily::PentiumOrLater,
            cache_mode: CacheMode::WriteBack,
        };
        assert_eq!(select(inputs), CoherencyTier::DisableBusMaster);
    }

    #[test]
    fn snooping_platform_needs_no_explicit_action() {
        let inputs = CoherencyInputs {
            bus_master_works: true,
            snoops: true,
            cpu_family: CpuFamily::I486,
            cache_mode: CacheMode::WriteBack,
        };
        assert_eq!(select(inputs), CoherencyTier::Fallback);
    }

    #[test]
    fn pre_cache_cpu_falls_back_to_software_copy() {
        let inputs = CoherencyInputs {
            bus_master_works: true,
            snoops: false,
            cpu_family: CpuFamily::PreCache,
            cache_mode: CacheMode::WriteBack,
        };
        assert_eq!(select(inputs), CoherencyTier::Software);
    }

    #[test]
    fn demotion_walks_down_the_safety_ladder_to_disable() {
        assert_eq!(demote(CoherencyTier::Clflush), CoherencyTier::Wbinvd);
        assert_eq!(demote(CoherencyTier::Wbinvd), CoherencyTier::Software);
        assert_eq!(demote(CoherencyTier::Software), CoherencyTier::DisableBusMaster);
        assert_eq!(demote(CoherencyTier::DisableBusMaster), CoherencyTier::DisableBusMaster);
    }

    #[test]
    fn force_pio_override_bypasses_the_decision_table() {
        let inputs = CoherencyInputs {
            bus_master_works: true,
            snoops: false,
            cpu_family: CpuFamily::PentiumOrLater,
            cache_mode: CacheMode::WriteBack,
        };
        let report = resolve(inputs, CoherencyOverride::ForcePio);
        assert_eq!(report.tier, CoherencyTier::DisableBusMaster);
    }
}
