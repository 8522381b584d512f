//! Data connection handshake
//!
//! An inlet opens a TCP connection to the outlet's data port and sends one of
//! two requests:
//!
//! ```text
//! Inlet                                          Outlet
//!   |                                              |
//!   |-- LSL:streamfeed/110 <uid>\r\n ------------->|
//!   |   Max-Buffer-Length: <samples>\r\n           |
//!   |   Max-Chunk-Length: <samples>\r\n            |
//!   |   \r\n                                       |
//!   |                                              |
//!   |<------------ LSL/110 200 OK\r\n -------------|
//!   |              UID: <uid>\r\n                  |
//!   |              Channel-Count: <n>\r\n          |
//!   |              Channel-Format: <fmt>\r\n       |
//!   |              Nominal-Rate: <hz>\r\n          |
//!   |              \r\n                            |
//!   |<============ sample frames ==================|
//!
//!   |-- LSL:fullinfo\r\n ------------------------->|
//!   |<------------ <info xml>, close --------------|
//! ```
//!
//! A request for an unknown uid is answered with `404 Not Found`, a malformed
//! one with `400 Bad Request`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::info::ChannelFormat;
use crate::protocol::constants::{MAX_HEADER_SIZE, PROTOCOL_VERSION};

const STREAMFEED: &str = "LSL:streamfeed";
const FULLINFO: &str = "LSL:fullinfo";

fn malformed(what: impl Into<String>) -> Error {
    Error::internal(format!("malformed handshake: {}", what.into()))
}

/// Split a complete header block off `buf`
///
/// Returns `Ok(None)` until the terminating blank line has arrived.
fn take_block(buf: &mut BytesMut) -> Result<Option<String>> {
    match buf.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(end) => {
            let block = buf.split_to(end + 4);
            let text = std::str::from_utf8(&block[..end])
                .map_err(|_| malformed("header is not UTF-8"))?;
            Ok(Some(text.to_string()))
        }
        None if buf.len() > MAX_HEADER_SIZE => Err(malformed("header block too long")),
        None => Ok(None),
    }
}

/// Parse `Name: value` lines into (lowercase name, value) pairs
fn header_fields(lines: std::str::Lines<'_>) -> Vec<(String, String)> {
    lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}

fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

fn parse_field<T: std::str::FromStr>(fields: &[(String, String)], name: &str) -> Result<Option<T>> {
    match field(fields, name) {
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| malformed(format!("invalid {} '{}'", name, v))),
        None => Ok(None),
    }
}

/// Request sent by an inlet on a fresh data connection
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Subscribe to the sample feed
    StreamFeed {
        version: i32,
        uid: String,
        /// Per-consumer queue capacity in samples (0 = outlet default)
        max_buffer_length: usize,
        /// Samples per transmitted chunk (0 = outlet default)
        max_chunk_length: usize,
    },
    /// Fetch the full stream description
    FullInfo,
}

impl Request {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128);
        match self {
            Request::StreamFeed {
                version,
                uid,
                max_buffer_length,
                max_chunk_length,
            } => {
                buf.put_slice(
                    format!(
                        "{}/{} {}\r\nMax-Buffer-Length: {}\r\nMax-Chunk-Length: {}\r\n\r\n",
                        STREAMFEED, version, uid, max_buffer_length, max_chunk_length
                    )
                    .as_bytes(),
                );
            }
            Request::FullInfo => buf.put_slice(format!("{}\r\n", FULLINFO).as_bytes()),
        }
        buf.freeze()
    }

    /// Parse a request from the front of `buf`
    pub fn parse(buf: &mut BytesMut) -> Result<Option<Request>> {
        let Some(line_end) = buf.windows(2).position(|w| w == b"\r\n") else {
            if buf.len() > MAX_HEADER_SIZE {
                return Err(malformed("request line too long"));
            }
            return Ok(None);
        };

        if &buf[..line_end] == FULLINFO.as_bytes() {
            buf.advance(line_end + 2);
            return Ok(Some(Request::FullInfo));
        }
        if !buf.starts_with(STREAMFEED.as_bytes()) {
            let line = String::from_utf8_lossy(&buf[..line_end]).into_owned();
            return Err(malformed(format!("unknown request '{}'", line)));
        }

        let Some(block) = take_block(buf)? else {
            return Ok(None);
        };
        let mut lines = block.lines();
        let first = lines.next().unwrap_or_default();
        let rest = first
            .strip_prefix(STREAMFEED)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| malformed("missing protocol version"))?;
        let (version, uid) = rest
            .split_once(' ')
            .ok_or_else(|| malformed("missing stream uid"))?;
        let version: i32 = version
            .trim()
            .parse()
            .map_err(|_| malformed(format!("invalid version '{}'", version)))?;

        let fields = header_fields(lines);
        Ok(Some(Request::StreamFeed {
            version,
            uid: uid.trim().to_string(),
            max_buffer_length: parse_field(&fields, "max-buffer-length")?.unwrap_or(0),
            max_chunk_length: parse_field(&fields, "max-chunk-length")?.unwrap_or(0),
        }))
    }
}

/// Stream shape announced by the outlet on a successful subscription
#[derive(Debug, Clone, PartialEq)]
pub struct FeedHeader {
    pub uid: String,
    pub channel_count: u32,
    pub channel_format: ChannelFormat,
    pub nominal_srate: f64,
}

/// Outlet's answer to a stream feed request
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok(FeedHeader),
    Error { status: u16, reason: String },
}

impl Response {
    pub fn not_found() -> Self {
        Response::Error {
            status: 404,
            reason: "Not Found".to_string(),
        }
    }

    pub fn bad_request() -> Self {
        Response::Error {
            status: 400,
            reason: "Bad Request".to_string(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let text = match self {
            Response::Ok(h) => format!(
                "LSL/{} 200 OK\r\nUID: {}\r\nChannel-Count: {}\r\nChannel-Format: {}\r\nNominal-Rate: {}\r\n\r\n",
                PROTOCOL_VERSION, h.uid, h.channel_count, h.channel_format, h.nominal_srate
            ),
            Response::Error { status, reason } => {
                format!("LSL/{} {} {}\r\n\r\n", PROTOCOL_VERSION, status, reason)
            }
        };
        Bytes::from(text)
    }

    /// Parse a response from the front of `buf`, leaving sample data behind
    pub fn parse(buf: &mut BytesMut) -> Result<Option<Response>> {
        let Some(block) = take_block(buf)? else {
            return Ok(None);
        };
        let mut lines = block.lines();
        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');
        let proto = parts.next().unwrap_or_default();
        if !proto.starts_with("LSL/") {
            return Err(malformed(format!("bad status line '{}'", status_line)));
        }
        let status: u16 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| malformed(format!("bad status line '{}'", status_line)))?;
        let reason = parts.next().unwrap_or_default().to_string();

        if status != 200 {
            return Ok(Some(Response::Error { status, reason }));
        }

        let fields = header_fields(lines);
        let channel_format = match field(&fields, "channel-format") {
            Some(f) => f
                .parse()
                .map_err(|_| malformed(format!("invalid channel format '{}'", f)))?,
            None => ChannelFormat::Undefined,
        };
        Ok(Some(Response::Ok(FeedHeader {
            uid: field(&fields, "uid").unwrap_or_default().to_string(),
            channel_count: parse_field(&fields, "channel-count")?.unwrap_or(0),
            channel_format,
            nominal_srate: parse_field(&fields, "nominal-rate")?.unwrap_or(0.0),
        })))
    }
}
