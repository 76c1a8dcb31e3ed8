use std::sync::atomic::{AtomicU64, Ordering};

/// Engine debug counters, updated from the hot paths.
#[derive(Debug, Default)]
pub(crate) struct MuxStats {
    pub read_bytes: AtomicU64,
    pub write_bytes: AtomicU64,
    pub write_copies: AtomicU64,
    pub write_copy_bytes: AtomicU64,
    pub rx_dropped: AtomicU64,
    pub queue_overflows: AtomicU64,
    pub repost_failures: AtomicU64,
}

impl MuxStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            write_copies: self.write_copies.load(Ordering::Relaxed),
            write_copy_bytes: self.write_copy_bytes.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            repost_failures: self.repost_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the engine's debug counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Payload bytes of data frames accepted on the receive path.
    pub read_bytes: u64,
    /// Payload bytes retired through data write completions.
    pub write_bytes: u64,
    /// Writes that fell back to copy-and-expand.
    pub write_copies: u64,
    /// Payload bytes moved by the copy fallback.
    pub write_copy_bytes: u64,
    /// Inbound frames dropped: bad magic, unknown command, bad channel.
    pub rx_dropped: u64,
    /// Completion events lost to a full deferred-work queue.
    pub queue_overflows: u64,
    /// Failed attempts to repost the receive buffer. A non-zero value
    /// with no subsequent traffic means the receive pipe has stalled.
    pub repost_failures: u64,
}
