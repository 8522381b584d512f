//! Clocks, clock offset estimation and timestamp post-processing

pub mod clock;
pub mod correction;
pub mod postproc;

pub use clock::local_clock;
pub use correction::TimeCorrection;
pub use postproc::PostProcessing;
