//! Query waves
//!
//! A wave sends one `LSL:shortinfo` query to every multicast group, the
//! broadcast address and each known peer; responders answer to the query
//! socket's port. Replies are tagged with the wave's query id so stray
//! answers to other resolvers are ignored.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;

use crate::context::Context;
use crate::error::Result;
use crate::info::StreamInfo;
use crate::net::{bind_query_socket, query_targets};
use crate::protocol::constants::MAX_DATAGRAM_SIZE;
use crate::protocol::{Datagram, ShortInfoReply};
use crate::query::Query;

/// Socket and addressing for the waves of one resolve operation
pub(crate) struct QueryWave {
    ctx: Context,
    socket: UdpSocket,
    targets: Vec<SocketAddr>,
    /// Session-scoped query text sent on the wire
    query_text: String,
    query: Query,
    query_id: u64,
    buf: Vec<u8>,
}

impl QueryWave {
    /// `query` must already be scoped to the context's session
    pub(crate) fn bind(ctx: &Context, query_text: String) -> Result<Self> {
        let query = Query::parse(&query_text)?;
        let socket = bind_query_socket(ctx.config())?;
        Ok(Self {
            ctx: ctx.clone(),
            socket,
            targets: query_targets(ctx.config()),
            query_text,
            query,
            query_id: uuid::Uuid::new_v4().as_u128() as u64,
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    /// Send one wave; unreachable targets are skipped
    pub(crate) async fn send(&self) {
        let return_port = match self.socket.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                tracing::debug!(error = %e, "Query socket has no local address");
                return;
            }
        };
        let datagram = Datagram::ShortInfoQuery {
            query: self.query_text.clone(),
            return_port,
            query_id: self.query_id,
        }
        .encode();

        for target in &self.targets {
            if let Err(e) = self.socket.send_to(&datagram, target).await {
                tracing::trace!(target = %target, error = %e, "Query not sent");
            }
        }
    }

    /// Streams of the context's own registry that match
    pub(crate) fn local_matches(&self) -> Vec<StreamInfo> {
        self.ctx
            .registry()
            .find_matching(&self.query, usize::MAX)
            .into_iter()
            .map(|entry| {
                let mut info = entry.info().clone();
                info.set_v4address(Ipv4Addr::LOCALHOST.to_string());
                info
            })
            .collect()
    }

    /// Wait for the next reply to this wave's query
    ///
    /// Cancel-safe: intended to race against a timer in `select!`.
    pub(crate) async fn recv(&mut self) -> StreamInfo {
        loop {
            let (len, from) = match self.socket.recv_from(&mut self.buf).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::trace!(error = %e, "Query socket receive failed");
                    continue;
                }
            };
            if let Some(info) = parse_reply(&self.buf[..len], from.ip(), self.query_id) {
                return info;
            }
        }
    }
}

/// Decode a short-info reply; the stream is reachable at the sender's address
pub(crate) fn parse_reply(data: &[u8], from: IpAddr, query_id: u64) -> Option<StreamInfo> {
    let reply = match ShortInfoReply::parse(data) {
        Ok(r) => r,
        Err(e) => {
            tracing::trace!(peer = %from, error = %e, "Ignoring malformed reply");
            return None;
        }
    };
    if reply.query_id != query_id {
        return None;
    }
    match StreamInfo::from_xml(&reply.xml) {
        Ok(mut info) if info.is_bound() => {
            info.set_v4address(from.to_string());
            Some(info)
        }
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(peer = %from, error = %e, "Ignoring invalid stream info");
            None
        }
    }
}

/// Results keyed by uid, in discovery order
#[derive(Debug, Default)]
pub(crate) struct Discovered {
    order: Vec<String>,
    streams: HashMap<String, StreamInfo>,
}

impl Discovered {
    /// Insert or refresh; returns true for a new uid
    pub(crate) fn insert(&mut self, info: StreamInfo) -> bool {
        let uid = info.uid().to_string();
        if self.streams.insert(uid.clone(), info).is_some() {
            return false;
        }
        self.order.push(uid);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn into_vec(mut self, max: usize) -> Vec<StreamInfo> {
        self.order
            .iter()
            .filter_map(|uid| self.streams.remove(uid))
            .take(max)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::ChannelFormat;

    fn bound(uid: &str) -> StreamInfo {
        let mut info = StreamInfo::new("s", "EEG", 1, 10.0, ChannelFormat::Int32, "src").unwrap();
        info.bind(uid.to_string(), "default", "h", 1.0, 100, 101);
        info
    }

    #[test]
    fn test_parse_reply_sets_sender_address() {
        let reply = ShortInfoReply {
            query_id: 9,
            xml: bound("u-1").to_shortinfo_xml().unwrap(),
        };
        let data = reply.encode();
        let from: IpAddr = "192.168.1.20".parse().unwrap();

        let info = parse_reply(&data, from, 9).unwrap();
        assert_eq!(info.uid(), "u-1");
        assert_eq!(info.v4address(), "192.168.1.20");
        assert!(parse_reply(&data, from, 10).is_none());
        assert!(parse_reply(b"garbage", from, 9).is_none());
    }

    #[test]
    fn test_unbound_reply_ignored() {
        let unbound = StreamInfo::new("s", "EEG", 1, 10.0, ChannelFormat::Int32, "").unwrap();
        let reply = ShortInfoReply {
            query_id: 1,
            xml: unbound.to_shortinfo_xml().unwrap(),
        };
        assert!(parse_reply(&reply.encode(), IpAddr::V4(Ipv4Addr::LOCALHOST), 1).is_none());
    }

    #[test]
    fn test_discovered_dedupes_in_order() {
        let mut found = Discovered::default();
        assert!(found.insert(bound("b")));
        assert!(found.insert(bound("a")));
        assert!(!found.insert(bound("b")));
        assert_eq!(found.len(), 2);

        let uids: Vec<String> = found
            .into_vec(usize::MAX)
            .iter()
            .map(|i| i.uid().to_string())
            .collect();
        assert_eq!(uids, vec!["b", "a"]);
    }
}
