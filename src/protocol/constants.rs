//! Protocol constants

use std::time::Duration;

/// Protocol version spoken by this implementation (1.10)
pub const PROTOCOL_VERSION: i32 = 110;

/// Library version (major * 100 + minor)
pub const LIBRARY_VERSION: i32 = 100;

/// Nominal sampling rate of streams without a regular rate
pub const IRREGULAR_RATE: f64 = 0.0;

/// Timestamp meaning "previous timestamp plus one sampling interval"
pub const DEDUCED_TIMESTAMP: f64 = -1.0;

/// A very large timeout (about one year)
pub const FOREVER: Duration = Duration::from_secs(32_000_000);

/// Default UDP port for multicast/broadcast discovery
pub const DEFAULT_MULTICAST_PORT: u16 = 16571;

/// First port tried for outlet data and service sockets
pub const DEFAULT_BASE_PORT: u16 = 16572;

/// Number of ports tried from the base port before falling back
pub const DEFAULT_PORT_RANGE: u16 = 32;

/// Sample tag: timestamp is deduced by the receiver
pub const TAG_DEDUCED_TIMESTAMP: u8 = 1;

/// Sample tag: an 8-byte timestamp follows
pub const TAG_TRANSMITTED_TIMESTAMP: u8 = 2;

/// Receive buffer for discovery and time datagrams
pub const MAX_DATAGRAM_SIZE: usize = 65536;

/// Longest accepted request or response header block
pub const MAX_HEADER_SIZE: usize = 16 * 1024;

/// Longest accepted string/blob channel value (16MB)
pub const MAX_STRING_VALUE_SIZE: usize = 16 * 1024 * 1024;

/// Multiplier from seconds to samples for irregular streams
pub const IRREGULAR_SAMPLES_PER_SECOND: f64 = 100.0;
