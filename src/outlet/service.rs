//! Outlet service socket
//!
//! Answers time probes from inlets and unicast short-info queries for this
//! one outlet.

use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::context::responder::{parse_query, send_replies};
use crate::protocol::constants::MAX_DATAGRAM_SIZE;
use crate::protocol::{Datagram, TimeReply};
use crate::registry::StreamEntry;
use crate::timing::local_clock;

pub(crate) async fn run(socket: UdpSocket, entry: Arc<StreamEntry>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "Service receive failed");
                continue;
            }
        };
        let t1 = local_clock();

        match Datagram::parse(&buf[..len]) {
            Ok(Datagram::TimeProbe { wave_id, t0 }) => {
                let reply = TimeReply {
                    wave_id,
                    t0,
                    t1,
                    t2: local_clock(),
                };
                if let Err(e) = socket.send_to(&reply.encode(), from).await {
                    tracing::debug!(peer = %from, error = %e, "Failed to answer time probe");
                }
            }
            Ok(Datagram::ShortInfoQuery {
                query,
                return_port,
                query_id,
            }) => {
                let Some(query) = parse_query(&query, from) else {
                    continue;
                };
                if entry.matches(&query) {
                    send_replies(&socket, from, return_port, query_id, std::slice::from_ref(&entry))
                        .await;
                }
            }
            Err(e) => {
                tracing::trace!(peer = %from, error = %e, "Ignoring malformed datagram");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{ChannelFormat, StreamInfo};
    use crate::protocol::ShortInfoReply;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[tokio::test]
    async fn test_service_answers_probes_and_queries() {
        let mut info =
            StreamInfo::new("Gaze", "Gaze", 2, 60.0, ChannelFormat::Float32, "tracker").unwrap();
        info.bind("uid-svc".into(), "default", "host", 1.0, 16572, 16573);
        let entry = Arc::new(StreamEntry::new(info).unwrap());

        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = socket.local_addr().unwrap();
        let task = tokio::spawn(run(socket, entry));

        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        let t0 = local_clock();
        let probe = Datagram::TimeProbe { wave_id: 7, t0 };
        client.send_to(&probe.encode(), addr).await.unwrap();
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply = TimeReply::parse(&buf[..len]).unwrap();
        assert_eq!(reply.wave_id, 7);
        assert_eq!(reply.t0, t0);
        assert!(reply.t1 <= reply.t2);

        let query = Datagram::ShortInfoQuery {
            query: "name='Gaze'".into(),
            return_port: client.local_addr().unwrap().port(),
            query_id: 42,
        };
        client.send_to(&query.encode(), addr).await.unwrap();
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply = ShortInfoReply::parse(&buf[..len]).unwrap();
        assert_eq!(reply.query_id, 42);
        assert!(reply.xml.contains("<uid>uid-svc</uid>"));

        task.abort();
    }
}
