//! Outlet data listener
//!
//! Handles the TCP accept loop and spawns one session per consumer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::registry::StreamEntry;

use super::session::{ConsumerSession, SessionOptions};

/// Accept loop of one outlet
pub(crate) struct OutletListener {
    listener: TcpListener,
    entry: Arc<StreamEntry>,
    options: SessionOptions,
    next_session_id: AtomicU64,
}

impl OutletListener {
    pub(crate) fn new(listener: TcpListener, entry: Arc<StreamEntry>, options: SessionOptions) -> Self {
        Self {
            listener,
            entry,
            options,
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Run until the task is aborted; aborting also ends every session
    pub(crate) async fn run(self) {
        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => {
                        self.handle_connection(&mut sessions, socket, peer_addr);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                    }
                },
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }
    }

    fn handle_connection(&self, sessions: &mut JoinSet<()>, socket: TcpStream, peer_addr: SocketAddr) {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            stream = %self.entry.info().name(),
            "New connection"
        );

        if let Err(e) = socket.set_nodelay(true) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let session = ConsumerSession::new(
            session_id,
            socket,
            peer_addr,
            Arc::clone(&self.entry),
            self.options.clone(),
        );
        sessions.spawn(async move {
            if let Err(e) = session.run().await {
                tracing::debug!(
                    session_id = session_id,
                    error = %e,
                    "Session error"
                );
            }
            tracing::debug!(session_id = session_id, "Session closed");
        });
    }
}
