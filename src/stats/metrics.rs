//! Transfer statistics for outlets and inlets

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Snapshot of an outlet's counters
#[derive(Debug, Clone, Default)]
pub struct OutletStats {
    /// Samples accepted by push calls
    pub samples_pushed: u64,
    /// Samples evicted from consumer queues because a consumer fell behind
    pub samples_dropped: u64,
    /// Currently connected consumers
    pub consumers: u64,
    /// Consumers served since creation
    pub total_consumers: u64,
    /// Time since the outlet was created
    pub uptime: Duration,
}

impl OutletStats {
    /// Average push rate since creation (samples/sec)
    pub fn push_rate(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.samples_pushed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Snapshot of an inlet's counters
#[derive(Debug, Clone, Default)]
pub struct InletStats {
    /// Samples decoded from the connection
    pub samples_received: u64,
    /// Samples evicted from the receive buffer by overflow
    pub samples_dropped: u64,
    /// Successful reconnects after the source was lost
    pub reconnects: u64,
    /// Payload bytes read from the connection
    pub bytes_received: u64,
}

/// Live counters behind [`OutletStats`]
#[derive(Debug)]
pub(crate) struct OutletCounters {
    pub samples_pushed: AtomicU64,
    pub samples_dropped: AtomicU64,
    pub consumers: AtomicU64,
    pub total_consumers: AtomicU64,
    started_at: Instant,
}

impl OutletCounters {
    pub fn new() -> Self {
        Self {
            samples_pushed: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            consumers: AtomicU64::new(0),
            total_consumers: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> OutletStats {
        OutletStats {
            samples_pushed: self.samples_pushed.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            consumers: self.consumers.load(Ordering::Relaxed),
            total_consumers: self.total_consumers.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

/// Live counters behind [`InletStats`]
#[derive(Debug, Default)]
pub(crate) struct InletCounters {
    pub samples_received: AtomicU64,
    pub reconnects: AtomicU64,
    pub bytes_received: AtomicU64,
}

impl InletCounters {
    /// Snapshot; drops are tracked by the receive buffer itself
    pub fn snapshot(&self, samples_dropped: u64) -> InletStats {
        InletStats {
            samples_received: self.samples_received.load(Ordering::Relaxed),
            samples_dropped,
            reconnects: self.reconnects.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}
