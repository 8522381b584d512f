//! Library context
//!
//! A [`Context`] holds everything that would otherwise be process-global: the
//! [`Config`], the registry of outlets created through it and the multicast
//! discovery responder answering for them. Outlets, inlets and resolvers all
//! take a context; cloning it is cheap and shares the same state.
//!
//! Contexts with different session ids never see each other's streams.

pub mod config;
pub(crate) mod responder;

pub use config::Config;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::net::local_hostname;
use crate::registry::StreamRegistry;

struct ContextInner {
    config: Config,
    registry: Arc<StreamRegistry>,
    hostname: String,
    responder: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Some(handle) = self.responder.lock().take() {
            handle.abort();
        }
    }
}

/// Shared library state; see the [module docs](self)
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a context and start its discovery responder
    ///
    /// Must be called from within a tokio runtime. A responder that cannot
    /// bind is logged and skipped; the context still works for local streams
    /// and unicast discovery.
    pub fn new(config: Config) -> Result<Self> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::internal("a tokio runtime is required"));
        }

        let registry = Arc::new(StreamRegistry::new());
        let responder = if config.discovery_responder {
            match responder::bind(&config) {
                Ok(socket) => {
                    tracing::debug!(
                        port = config.multicast_port,
                        session = %config.session_id,
                        "Discovery responder started"
                    );
                    Some(tokio::spawn(responder::run(socket, Arc::clone(&registry))))
                }
                Err(e) => {
                    tracing::warn!(
                        port = config.multicast_port,
                        error = %e,
                        "Discovery responder unavailable"
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            inner: Arc::new(ContextInner {
                hostname: local_hostname(),
                config,
                registry,
                responder: Mutex::new(responder),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn session_id(&self) -> &str {
        &self.inner.config.session_id
    }

    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    /// Outlets created through this context
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.inner.registry
    }

    /// Whether the multicast responder is running
    pub fn has_responder(&self) -> bool {
        self.inner
            .responder
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("session_id", &self.session_id())
            .field("hostname", &self.hostname())
            .field("outlets", &self.registry().len())
            .finish()
    }
}
