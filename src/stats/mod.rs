//! Transfer statistics

pub mod metrics;

pub use metrics::{InletStats, OutletStats};
