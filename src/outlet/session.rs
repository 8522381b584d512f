//! Consumer session
//!
//! One session per accepted data connection:
//!
//! ```text
//! Inlet                                   Outlet session
//!   LSL:streamfeed/110 <uid> + headers -->  uid / version check
//!   <-- LSL/110 200 OK + stream shape ----  subscribe consumer queue
//!   <-- sample frames ---------------------  (until either side closes)
//!
//!   LSL:fullinfo ------------------------>
//!   <-- full info XML, then close --------
//! ```
//!
//! Frames are written out when a chunk is complete or a sample asks to be
//! pushed through.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::buffer::Popped;
use crate::error::{Error, Result};
use crate::protocol::constants::{FOREVER, PROTOCOL_VERSION};
use crate::protocol::{FeedHeader, Request, Response};
use crate::registry::entry::ConsumerQueue;
use crate::registry::StreamEntry;

/// Per-outlet session parameters
#[derive(Debug, Clone)]
pub(crate) struct SessionOptions {
    /// Upper bound of a consumer queue in samples
    pub max_buffered: usize,
    /// Samples per transmitted chunk (0 = one chunk per push call)
    pub chunk_size: usize,
    /// Time allowed for the request to arrive
    pub handshake_timeout: Duration,
}

pub(crate) struct ConsumerSession {
    id: u64,
    socket: TcpStream,
    peer: SocketAddr,
    entry: Arc<StreamEntry>,
    options: SessionOptions,
}

impl ConsumerSession {
    pub(crate) fn new(
        id: u64,
        socket: TcpStream,
        peer: SocketAddr,
        entry: Arc<StreamEntry>,
        options: SessionOptions,
    ) -> Self {
        Self {
            id,
            socket,
            peer,
            entry,
            options,
        }
    }

    pub(crate) async fn run(self) -> Result<()> {
        let (mut reader, mut writer) = self.socket.into_split();
        let mut buf = BytesMut::with_capacity(1024);

        let request = match tokio::time::timeout(
            self.options.handshake_timeout,
            read_request(&mut reader, &mut buf),
        )
        .await
        {
            Ok(Ok(Some(r))) => r,
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(e)) => {
                writer.write_all(&Response::bad_request().encode()).await?;
                return Err(e);
            }
            Err(_) => return Err(Error::Timeout),
        };

        match request {
            Request::FullInfo => {
                tracing::debug!(session_id = self.id, peer = %self.peer, "Serving full info");
                writer.write_all(self.entry.fullinfo_xml().as_bytes()).await?;
                writer.shutdown().await?;
                Ok(())
            }
            Request::StreamFeed {
                version,
                uid,
                max_buffer_length,
                max_chunk_length,
            } => {
                if uid != self.entry.uid() {
                    tracing::debug!(session_id = self.id, uid = %uid, "Unknown stream requested");
                    writer.write_all(&Response::not_found().encode()).await?;
                    return Ok(());
                }
                if version / 100 != PROTOCOL_VERSION / 100 {
                    tracing::debug!(session_id = self.id, version, "Unsupported protocol version");
                    writer.write_all(&Response::bad_request().encode()).await?;
                    return Ok(());
                }

                let header = FeedHeader {
                    uid,
                    channel_count: self.entry.info().channel_count(),
                    channel_format: self.entry.info().channel_format(),
                    nominal_srate: self.entry.info().nominal_srate(),
                };
                writer.write_all(&Response::Ok(header).encode()).await?;

                let capacity = match max_buffer_length {
                    0 => self.options.max_buffered,
                    n => n.min(self.options.max_buffered),
                };
                let chunk = match max_chunk_length {
                    0 => self.options.chunk_size,
                    n => n,
                };

                let queue = self.entry.subscribe(capacity);
                let result = feed(&queue, &mut reader, &mut writer, chunk).await;
                self.entry.unsubscribe(&queue);
                result
            }
        }
    }
}

async fn read_request(reader: &mut OwnedReadHalf, buf: &mut BytesMut) -> Result<Option<Request>> {
    loop {
        if let Some(request) = Request::parse(buf)? {
            return Ok(Some(request));
        }
        if reader.read_buf(buf).await? == 0 {
            return Ok(None);
        }
    }
}

/// Stream samples until the queue closes or the peer hangs up
async fn feed(
    queue: &ConsumerQueue,
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    chunk: usize,
) -> Result<()> {
    let mut frames = BytesMut::with_capacity(4096);
    let mut pending = 0usize;
    let mut scratch = [0u8; 64];

    loop {
        let popped = tokio::select! {
            popped = queue.pop(FOREVER) => popped,
            read = reader.read(&mut scratch) => match read {
                Ok(0) | Err(_) => return Ok(()),
                Ok(_) => continue,
            },
        };

        match popped {
            Popped::Item(q) => {
                q.sample.write_frame(&mut frames);
                pending += 1;
                if q.push_through || (chunk > 0 && pending >= chunk) {
                    writer.write_all(&frames).await?;
                    frames.clear();
                    pending = 0;
                }
            }
            Popped::Timeout => {}
            Popped::Closed => {
                if !frames.is_empty() {
                    writer.write_all(&frames).await?;
                }
                writer.shutdown().await?;
                return Ok(());
            }
        }
    }
}
