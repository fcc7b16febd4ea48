//! Statistics & health (C9).
//!
//! Per spec §3: monotonically increasing counters, reset only by an
//! explicit reset operation. Updates are additive-only plain `u64`s — spec
//! §5 explicitly allows an occasional torn read here, so no atomics are
//! needed for the single-threaded-plus-ISR model this crate targets.

/// Sub-counters for transmit errors (spec §3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxErrorCounters {
    /// FIFO underrun during transmission.
    pub underrun: u64,
    /// Carrier sense lost during transmission.
    pub carrier_loss: u64,
    /// Collision during transmission.
    pub collision: u64,
}

/// Sub-counters for receive errors (spec §3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxErrorCounters {
    /// CRC check failed.
    pub crc: u64,
    /// Frame length invalid.
    pub length: u64,
    /// FIFO overrun.
    pub overrun: u64,
    /// No buffer available to receive into.
    pub no_buffer: u64,
}

/// Per-controller statistics block (spec §3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Successfully transmitted packets.
    pub tx_packets: u64,
    /// Successfully transmitted bytes.
    pub tx_bytes: u64,
    /// Transmit error sub-counters.
    pub tx_errors: TxErrorCounters,
    /// Successfully received packets.
    pub rx_packets: u64,
    /// Successfully received bytes.
    pub rx_bytes: u64,
    /// Receive error sub-counters.
    pub rx_errors: RxErrorCounters,
    /// Total interrupts serviced.
    pub interrupts: u64,
    /// Transmit retries (hardware-level, not driver retransmission policy).
    pub tx_retries: u64,
    /// Frames dropped on receive (classification miss, no client, etc.)
    pub rx_drops: u64,
}

impl Stats {
    /// Records a successfully transmitted frame.
    pub fn record_tx(&mut self, bytes: usize) {
        self.tx_packets += 1;
        self.tx_bytes += bytes as u64;
    }

    /// Records a successfully received, delivered frame.
    pub fn record_rx(&mut self, bytes: usize) {
        self.rx_packets += 1;
        self.rx_bytes += bytes as u64;
    }

    /// Resets every counter to zero (the only sanctioned mutation other
    /// than the additive recorders above).
    pub fn reset(&mut self) {
        *self = Stats::default();
    }
}

/// A coarse health read derived from a [`Stats`] snapshot, used by a host
/// health monitor to decide whether to log a warning or escalate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// No errors observed, or an error rate below the warning threshold.
    Healthy,
    /// Error rate high enough to warrant a log message but not action.
    Degraded,
    /// Error rate high enough that a host should consider a reset.
    Critical,
}

/// Error-rate thresholds (errors per 100 received/transmitted frames)
/// above which [`assess`] reports [`Health::Degraded`] / [`Health::Critical`].
const DEGRADED_THRESHOLD_PERCENT: u64 = 1;
const CRITICAL_THRESHOLD_PERCENT: u64 = 10;

/// Classifies a [`Stats`] snapshot into a coarse health level by comparing
/// total rx/tx errors against rx/tx packet counts.
pub fn assess(stats: &Stats) -> Health {
    let rx_errors = stats.rx_errors.crc
        + stats.rx_errors.length
        + stats.rx_errors.overrun
        + stats.rx_errors.no_buffer;
    let tx_errors =
        stats.tx_errors.underrun + stats.tx_errors.carrier_loss + stats.tx_errors.collision;
    let total_errors = rx_errors + tx_errors;
    let total_frames = stats.rx_packets + stats.tx_packets + total_errors;

    if total_frames == 0 || total_errors == 0 {
        return Health::Healthy;
    }

    let percent = total_errors.saturating_mul(100) / total_frames;
    if percent >= CRITICAL_THRESHOLD_PERCENT {
        Health::Critical
    } else if percent >= DEGRADED_THRESHOLD_PERCENT {
        Health::Degraded
    } else {
        Health::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_zeroes_every_counter() {
        let mut stats = Stats::default();
        stats.record_tx(100);
        stats.record_rx(64);
        stats.interrupts = 5;
        stats.reset();
        assert_eq!(stats, Stats::default());
    }

    #[test]
    fn healthy_with_no_errors() {
        let mut stats = Stats::default();
        stats.record_rx(64);
        stats.record_tx(64);
        assert_eq!(assess(&stats), Health::Healthy);
    }

    #[test]
    fn critical_with_high_error_rate() {
        let mut stats = Stats::default();
        stats.record_rx(64);
        stats.rx_errors.crc = 50;
        assert_eq!(assess(&stats), Health::Critical);
    }
}
