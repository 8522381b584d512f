//! Discovery responder
//!
//! Listens on the multicast port (joined to every configured group) and
//! answers `LSL:shortinfo` queries with the short descriptor of each local
//! outlet that matches:
//!
//! ```text
//! Resolver                               Responder
//!   LSL:shortinfo <query> <port> <id> ---->  find_matching(query)
//!   <---- <id> <shortinfo xml> (one per match, sent to sender-ip:<port>)
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::context::Config;
use crate::error::Result;
use crate::net::bind_reuse_udp;
use crate::protocol::constants::MAX_DATAGRAM_SIZE;
use crate::protocol::{Datagram, ShortInfoReply};
use crate::query::Query;
use crate::registry::{StreamEntry, StreamRegistry};

/// Bind the responder socket and join the multicast groups
///
/// Failing to join a group is not fatal: unicast and broadcast queries still
/// reach the socket.
pub(crate) fn bind(config: &Config) -> Result<UdpSocket> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.multicast_port);
    let socket = bind_reuse_udp(addr)?;
    for group in &config.multicast_addresses {
        if let Err(e) = socket.join_multicast_v4(*group, Ipv4Addr::UNSPECIFIED) {
            tracing::warn!(group = %group, error = %e, "Failed to join multicast group");
        }
    }
    Ok(socket)
}

/// Answer queries from the registry until the task is aborted
pub(crate) async fn run(socket: UdpSocket, registry: Arc<StreamRegistry>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "Responder receive failed");
                continue;
            }
        };

        match Datagram::parse(&buf[..len]) {
            Ok(Datagram::ShortInfoQuery {
                query,
                return_port,
                query_id,
            }) => {
                let Some(query) = parse_query(&query, from) else {
                    continue;
                };
                let matches = registry.find_matching(&query, usize::MAX);
                send_replies(&socket, from, return_port, query_id, &matches).await;
            }
            Ok(Datagram::TimeProbe { .. }) => {
                tracing::trace!(peer = %from, "Ignoring time probe on discovery port");
            }
            Err(e) => {
                tracing::trace!(peer = %from, error = %e, "Ignoring malformed datagram");
            }
        }
    }
}

pub(crate) fn parse_query(source: &str, from: SocketAddr) -> Option<Query> {
    match Query::parse(source) {
        Ok(q) => Some(q),
        Err(e) => {
            tracing::debug!(peer = %from, error = %e, "Ignoring unparseable query");
            None
        }
    }
}

/// Send one short-info reply per matching entry to `sender-ip:return_port`
pub(crate) async fn send_replies(
    socket: &UdpSocket,
    from: SocketAddr,
    return_port: u16,
    query_id: u64,
    matches: &[Arc<StreamEntry>],
) {
    let reply_to = SocketAddr::new(from.ip(), return_port);
    for entry in matches {
        let reply = ShortInfoReply {
            query_id,
            xml: entry.shortinfo_xml().to_string(),
        };
        if let Err(e) = socket.send_to(&reply.encode(), reply_to).await {
            tracing::debug!(peer = %reply_to, error = %e, "Failed to send short info");
        } else {
            tracing::trace!(peer = %reply_to, uid = %entry.uid(), "Answered query");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{ChannelFormat, StreamInfo};
    use std::time::Duration;

    #[tokio::test]
    async fn test_responder_answers_matching_queries() {
        let registry = Arc::new(StreamRegistry::new());
        let mut info = StreamInfo::new("Markers", "Markers", 1, 0.0, ChannelFormat::String, "m1")
            .unwrap();
        info.bind("uid-resp".into(), "default", "host", 1.0, 16572, 16573);
        registry
            .register(Arc::new(StreamEntry::new(info).unwrap()))
            .unwrap();

        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let responder_addr = socket.local_addr().unwrap();
        let task = tokio::spawn(run(socket, Arc::clone(&registry)));

        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let return_port = client.local_addr().unwrap().port();

        let miss = Datagram::ShortInfoQuery {
            query: "type='EEG'".into(),
            return_port,
            query_id: 1,
        };
        client.send_to(&miss.encode(), responder_addr).await.unwrap();
        let hit = Datagram::ShortInfoQuery {
            query: "type='Markers'".into(),
            return_port,
            query_id: 2,
        };
        client.send_to(&hit.encode(), responder_addr).await.unwrap();

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply = ShortInfoReply::parse(&buf[..len]).unwrap();
        assert_eq!(reply.query_id, 2);
        assert!(reply.xml.contains("<uid>uid-resp</uid>"));

        task.abort();
    }
}
