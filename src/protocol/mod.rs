//! Wire protocol
//!
//! - [`handshake`]: TCP request/response headers on the data port
//! - [`sample`]: sample frames and channel value conversion
//! - [`datagram`]: UDP discovery queries and time probes

pub mod constants;
pub mod datagram;
pub mod handshake;
pub mod sample;

pub use datagram::{Datagram, ShortInfoReply, TimeReply};
pub use handshake::{FeedHeader, Request, Response};
pub use sample::{ChannelValue, RawSample, SampleDecoder, WireValue};
