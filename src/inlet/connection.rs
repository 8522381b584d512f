//! Inlet data connection
//!
//! ```text
//!   connect ──► handshake ──► receive loop ──► connection lost
//!                                  ▲                 │
//!                                  │   recover?  ────┤ no ──► queue closed (StreamLost)
//!                                  │                 │ yes
//!                                  └── reconnect ◄── re-resolve name/type/source_id
//! ```
//!
//! The receive loop decodes frames into the inlet's bounded queue. Recovery
//! looks the source up again (it may have restarted elsewhere with a new uid),
//! reconnects and flags a clock reset.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::buffer::SampleQueue;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::info::{ChannelFormat, StreamInfo};
use crate::protocol::constants::{MAX_HEADER_SIZE, PROTOCOL_VERSION};
use crate::protocol::{RawSample, Request, Response, SampleDecoder};
use crate::query::property_query;
use crate::resolver::resolve_by_predicate;
use crate::stats::metrics::InletCounters;
use crate::timing::correction::TimeReceiver;

/// Connection state of an inlet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkState {
    /// No connection yet, or closed by `close_stream`
    Idle,
    Connected,
    /// Source gone and not recovered
    Lost,
    Closed,
}

/// State shared between an inlet and its connection task
pub(crate) struct Link {
    pub ctx: Context,
    /// Current source; rebound on recovery
    pub info: Mutex<StreamInfo>,
    pub channel_count: usize,
    pub channel_format: ChannelFormat,
    pub nominal_srate: f64,
    pub queue: SampleQueue<RawSample>,
    pub counters: InletCounters,
    pub time: Arc<TimeReceiver>,
    pub max_buflen: usize,
    pub max_chunklen: usize,
    pub recover: bool,
    state: Mutex<LinkState>,
}

/// An established data connection with any sample bytes already read
pub(crate) struct Connection {
    stream: TcpStream,
    buf: BytesMut,
}

impl Link {
    pub(crate) fn new(
        ctx: &Context,
        info: StreamInfo,
        time: Arc<TimeReceiver>,
        max_buflen: usize,
        max_chunklen: usize,
        recover: bool,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            channel_count: info.channel_count() as usize,
            channel_format: info.channel_format(),
            nominal_srate: info.nominal_srate(),
            info: Mutex::new(info),
            queue: SampleQueue::new(max_buflen),
            counters: InletCounters::default(),
            time,
            max_buflen,
            max_chunklen,
            recover,
            state: Mutex::new(LinkState::Idle),
        }
    }

    pub(crate) fn state(&self) -> LinkState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        let mut current = self.state.lock();
        if *current != LinkState::Closed {
            *current = state;
        }
    }

    /// Whether a lost connection may be recovered
    pub(crate) fn can_recover(&self) -> bool {
        self.recover && !self.info.lock().source_id().is_empty()
    }

    pub(crate) fn mark_lost(&self) {
        self.set_state(LinkState::Lost);
        self.queue.close();
        let info = self.info.lock();
        tracing::warn!(stream = %info.name(), uid = %info.uid(), "Stream lost");
    }
}

/// TCP address of an outlet's data port
pub(crate) fn data_addr(info: &StreamInfo) -> Result<SocketAddr> {
    Ok(SocketAddr::new(host_addr(info)?, info.v4data_port()))
}

/// UDP address of an outlet's service port
pub(crate) fn service_addr(info: &StreamInfo) -> Result<SocketAddr> {
    Ok(SocketAddr::new(host_addr(info)?, info.v4service_port()))
}

/// An info without an address refers to a stream on this host
fn host_addr(info: &StreamInfo) -> Result<IpAddr> {
    let address = info.v4address();
    if address.is_empty() {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    address
        .parse()
        .map_err(|_| Error::argument(format!("invalid stream address '{}'", address)))
}

/// Connect to `info`'s outlet and subscribe to its feed
pub(crate) async fn connect(link: &Link, info: &StreamInfo, timeout: Duration) -> Result<Connection> {
    let addr = data_addr(info)?;
    let handshake = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        let request = Request::StreamFeed {
            version: PROTOCOL_VERSION,
            uid: info.uid().to_string(),
            max_buffer_length: link.max_buflen,
            max_chunk_length: link.max_chunklen,
        };
        stream.write_all(&request.encode()).await?;

        let mut buf = BytesMut::with_capacity(8192);
        let response = loop {
            if let Some(response) = Response::parse(&mut buf)? {
                break response;
            }
            if stream.read_buf(&mut buf).await? == 0 {
                return Err(Error::StreamLost);
            }
        };

        match response {
            Response::Ok(header) => {
                if header.uid != info.uid()
                    || header.channel_count as usize != link.channel_count
                    || header.channel_format != link.channel_format
                {
                    return Err(Error::argument(format!(
                        "outlet announces {} channels of {}, inlet expects {} channels of {}",
                        header.channel_count,
                        header.channel_format,
                        link.channel_count,
                        link.channel_format
                    )));
                }
            }
            Response::Error { status: 404, .. } => return Err(Error::StreamLost),
            Response::Error { status, reason } => {
                return Err(Error::internal(format!(
                    "outlet refused the connection: {} {}",
                    status, reason
                )));
            }
        }
        Ok(Connection { stream, buf })
    };

    tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| Error::Timeout)?
}

/// Fetch the full descriptor of `info`'s outlet
pub(crate) async fn fetch_full_info(info: &StreamInfo, timeout: Duration) -> Result<StreamInfo> {
    let addr = data_addr(info)?;
    let fetch = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(&Request::FullInfo.encode()).await?;

        let mut xml = Vec::with_capacity(MAX_HEADER_SIZE);
        stream.read_to_end(&mut xml).await?;
        let xml = String::from_utf8(xml)
            .map_err(|_| Error::internal("full info is not valid UTF-8"))?;
        StreamInfo::from_xml(&xml)
    };

    let mut full = tokio::time::timeout(timeout, fetch)
        .await
        .map_err(|_| Error::Timeout)??;
    full.set_v4address(info.v4address());
    Ok(full)
}

/// Whether a failed connect means the outlet is gone rather than busy
pub(crate) fn source_gone(error: &Error) -> bool {
    match error {
        Error::StreamLost => true,
        Error::Io(e) => e.kind() == std::io::ErrorKind::ConnectionRefused,
        _ => false,
    }
}

/// Receive until the connection ends
async fn receive(link: &Link, conn: Connection) -> Result<()> {
    let Connection { mut stream, mut buf } = conn;
    let mut decoder = SampleDecoder::new(link.channel_format, link.channel_count, link.nominal_srate);

    loop {
        while let Some(sample) = decoder.decode(&mut buf)? {
            link.counters.samples_received.fetch_add(1, Ordering::Relaxed);
            link.queue.push(sample);
        }
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        link.counters
            .bytes_received
            .fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Connection task: receive, and recover when the source drops
pub(crate) async fn supervise(link: Arc<Link>, conn: Connection) {
    let mut conn = conn;
    loop {
        match receive(&link, conn).await {
            Ok(()) => tracing::debug!("Outlet closed the connection"),
            Err(e) => tracing::debug!(error = %e, "Connection failed"),
        }
        if link.state() == LinkState::Closed {
            return;
        }
        if !link.can_recover() {
            link.mark_lost();
            return;
        }

        tracing::info!(stream = %link.info.lock().name(), "Connection lost, recovering");
        match recover(&link).await {
            Some(c) => conn = c,
            None => return,
        }
    }
}

/// Re-resolve the source by name, type and source id until it reconnects
pub(crate) async fn recover(link: &Link) -> Option<Connection> {
    let (predicate, current_uid) = {
        let info = link.info.lock();
        let predicate = [
            ("name", info.name()),
            ("type", info.stream_type()),
            ("source_id", info.source_id()),
        ]
        .iter()
        .map(|(property, value)| property_query(property, value))
        .collect::<std::result::Result<Vec<_>, _>>();
        (predicate, info.uid().to_string())
    };
    let predicate = match predicate {
        Ok(parts) => parts.join(" and "),
        Err(e) => {
            tracing::warn!(error = %e, "Stream cannot be re-resolved");
            link.mark_lost();
            return None;
        }
    };

    let config = link.ctx.config().clone();
    loop {
        tokio::time::sleep(config.recover_interval).await;
        if link.state() == LinkState::Closed {
            return None;
        }

        let found =
            match resolve_by_predicate(&link.ctx, &predicate, 1, 1, config.connect_timeout).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::debug!(error = %e, "Recovery resolve failed");
                    continue;
                }
            };
        let Some(candidate) = found.into_iter().next() else {
            continue;
        };

        match connect(link, &candidate, config.connect_timeout).await {
            Ok(conn) => {
                if let Ok(addr) = service_addr(&candidate) {
                    link.time.set_target(addr);
                }
                link.info.lock().rebind_from(&candidate);
                link.time.force_reset();
                link.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    stream = %candidate.name(),
                    uid = %candidate.uid(),
                    restarted = candidate.uid() != current_uid,
                    "Inlet recovered"
                );
                return Some(conn);
            }
            Err(e) => {
                tracing::debug!(uid = %candidate.uid(), error = %e, "Reconnect failed");
            }
        }
    }
}
