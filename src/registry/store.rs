//! Outlet registry implementation
//!
//! Every [`Context`](crate::Context) keeps one registry of the outlets it
//! created. Discovery responders answer queries from it and outlet listeners
//! look up consumers' requested streams in it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::query::Query;

use super::entry::StreamEntry;

/// Registry of live outlets, keyed by stream uid
///
/// Thread-safe via `RwLock`: lookups from responders and listeners run
/// concurrently, registration is rare.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: RwLock<HashMap<String, Arc<StreamEntry>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outlet; its uid must be unique
    pub fn register(&self, entry: Arc<StreamEntry>) -> Result<()> {
        let mut streams = self.streams.write();
        let uid = entry.uid().to_string();
        if uid.is_empty() {
            return Err(Error::InvalidHandle);
        }
        if streams.contains_key(&uid) {
            return Err(Error::internal(format!("stream uid {} already registered", uid)));
        }

        tracing::info!(
            stream = %entry.info().name(),
            uid = %uid,
            streams = streams.len() + 1,
            "Outlet registered"
        );
        streams.insert(uid, entry);
        Ok(())
    }

    /// Remove an outlet, returning its entry if it was registered
    pub fn unregister(&self, uid: &str) -> Option<Arc<StreamEntry>> {
        let removed = self.streams.write().remove(uid);
        if let Some(ref entry) = removed {
            tracing::info!(
                stream = %entry.info().name(),
                uid = %uid,
                "Outlet unregistered"
            );
        }
        removed
    }

    pub fn get(&self, uid: &str) -> Option<Arc<StreamEntry>> {
        self.streams.read().get(uid).cloned()
    }

    /// Entries matching `query`, oldest first, at most `max` of them
    pub fn find_matching(&self, query: &Query, max: usize) -> Vec<Arc<StreamEntry>> {
        let mut found: Vec<Arc<StreamEntry>> = self
            .streams
            .read()
            .values()
            .filter(|e| e.matches(query))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.info().created_at().total_cmp(&b.info().created_at()));
        found.truncate(max);
        found
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }
}
