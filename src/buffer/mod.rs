//! Buffering of samples between producer and consumer

pub mod queue;

pub use queue::{Popped, SampleQueue};

use crate::info::StreamInfo;

/// Capacity of a sample buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BufferLength {
    /// Seconds of data at the stream's nominal rate (100 samples per second
    /// for irregular streams)
    Seconds(f64),
    /// Exact number of samples
    Samples(usize),
}

impl Default for BufferLength {
    fn default() -> Self {
        BufferLength::Seconds(360.0)
    }
}

impl BufferLength {
    /// Capacity in samples for the given stream (at least 1)
    pub fn to_samples(&self, info: &StreamInfo) -> usize {
        match *self {
            BufferLength::Seconds(s) if s.is_finite() && s > 0.0 => info.seconds_to_samples(s),
            BufferLength::Seconds(_) => 1,
            BufferLength::Samples(n) => n.max(1),
        }
    }
}
