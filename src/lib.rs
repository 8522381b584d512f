//! # labstream
//!
//! Real-time discovery, transport and clock synchronization of multichannel
//! time series (EEG, eye tracking, audio, event markers, ...) on a local
//! network, without a central broker.
//!
//! ```text
//!  Producer                                              Consumer
//!  ────────                                              ────────
//!  StreamInfo ──► StreamOutlet ── registers ──► Context registry
//!                      │                            │
//!                      │                  multicast responder ◄── resolve_*()
//!                      │                                               │
//!                      └── TCP sample frames ──────────────► StreamInlet
//!                      └── UDP time probes   ◄─────────────  time_correction()
//! ```
//!
//! - [`xml`] / [`StreamInfo`]: stream descriptors with a free-form metadata
//!   tree, serialized as XML.
//! - [`query`]: the XPath-like predicates resolvers match descriptors with.
//! - [`resolver`]: one-shot and continuous stream discovery.
//! - [`StreamOutlet`] / [`StreamInlet`]: typed, ordered sample transport with
//!   bounded buffers.
//! - [`timing`]: local clock, clock offset estimation and timestamp
//!   post-processing.
//!
//! All network state lives in a [`Context`]; every async operation requires a
//! tokio runtime.

pub mod buffer;
pub mod context;
pub mod error;
pub mod info;
pub mod inlet;
pub(crate) mod net;
pub mod outlet;
pub mod protocol;
pub mod query;
pub mod registry;
pub mod resolver;
pub mod stats;
pub mod timing;
pub mod xml;

pub use buffer::BufferLength;
pub use context::{Config, Context};
pub use error::{Error, ErrorKind, Result};
pub use info::{ChannelFormat, StreamInfo};
pub use inlet::StreamInlet;
pub use outlet::StreamOutlet;
pub use protocol::constants::{DEDUCED_TIMESTAMP, FOREVER, IRREGULAR_RATE};
pub use protocol::ChannelValue;
pub use query::{Query, QueryError};
pub use resolver::{resolve_all, resolve_by_predicate, resolve_by_property, ContinuousResolver};
pub use stats::{InletStats, OutletStats};
pub use timing::{local_clock, PostProcessing, TimeCorrection};
pub use xml::{XmlDocument, XmlElement, XmlError};

/// Protocol version spoken by this library (major * 100 + minor)
pub fn protocol_version() -> i32 {
    protocol::constants::PROTOCOL_VERSION
}

/// Version of this library (major * 100 + minor)
pub fn library_version() -> i32 {
    protocol::constants::LIBRARY_VERSION
}
