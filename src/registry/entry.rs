//! Registered outlet state
//!
//! One entry per live outlet: its bound descriptor, the pre-rendered XML
//! answers for discovery and info requests, and the consumer queues samples
//! are fanned out to.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::buffer::SampleQueue;
use crate::error::Result;
use crate::info::StreamInfo;
use crate::protocol::RawSample;
use crate::query::Query;
use crate::stats::metrics::OutletCounters;
use crate::stats::OutletStats;
use crate::xml::XmlDocument;

/// A sample waiting in a consumer queue
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct QueuedSample {
    pub sample: RawSample,
    /// Flush the connection after this sample
    pub push_through: bool,
}

pub(crate) type ConsumerQueue = Arc<SampleQueue<QueuedSample>>;

/// Entry for a single outlet in the registry
pub struct StreamEntry {
    info: StreamInfo,
    /// Full info document, for query evaluation
    document: XmlDocument,
    shortinfo_xml: String,
    fullinfo_xml: String,
    consumers: Mutex<Vec<ConsumerQueue>>,
    consumers_changed: Notify,
    counters: OutletCounters,
}

impl StreamEntry {
    /// Render the descriptor once; it does not change while registered
    pub(crate) fn new(info: StreamInfo) -> Result<Self> {
        Ok(Self {
            document: info.to_document(true),
            shortinfo_xml: info.to_shortinfo_xml()?,
            fullinfo_xml: info.to_xml()?,
            info,
            consumers: Mutex::new(Vec::new()),
            consumers_changed: Notify::new(),
            counters: OutletCounters::new(),
        })
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn uid(&self) -> &str {
        self.info.uid()
    }

    pub fn matches(&self, query: &Query) -> bool {
        query.matches_document(&self.document)
    }

    pub fn shortinfo_xml(&self) -> &str {
        &self.shortinfo_xml
    }

    pub fn fullinfo_xml(&self) -> &str {
        &self.fullinfo_xml
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.lock().len()
    }

    pub fn stats(&self) -> OutletStats {
        self.counters.snapshot()
    }

    /// Attach a consumer queue holding up to `capacity` samples
    pub(crate) fn subscribe(&self, capacity: usize) -> ConsumerQueue {
        let queue = Arc::new(SampleQueue::new(capacity));
        self.consumers.lock().push(Arc::clone(&queue));
        self.counters.consumers.fetch_add(1, Ordering::Relaxed);
        self.counters.total_consumers.fetch_add(1, Ordering::Relaxed);
        self.consumers_changed.notify_waiters();

        tracing::info!(
            stream = %self.info.name(),
            uid = %self.uid(),
            consumers = self.consumer_count(),
            "Consumer attached"
        );
        queue
    }

    /// Detach a consumer queue
    pub(crate) fn unsubscribe(&self, queue: &ConsumerQueue) {
        let removed = {
            let mut consumers = self.consumers.lock();
            let before = consumers.len();
            consumers.retain(|q| !Arc::ptr_eq(q, queue));
            before != consumers.len()
        };
        if removed {
            self.counters.consumers.fetch_sub(1, Ordering::Relaxed);
            self.consumers_changed.notify_waiters();
            tracing::debug!(
                stream = %self.info.name(),
                consumers = self.consumer_count(),
                "Consumer detached"
            );
        }
    }

    /// Fan a sample out to every consumer
    ///
    /// Returns the number of consumers reached.
    pub(crate) fn broadcast(&self, sample: RawSample, push_through: bool) -> usize {
        self.counters.samples_pushed.fetch_add(1, Ordering::Relaxed);
        let consumers = self.consumers.lock();
        for queue in consumers.iter() {
            let evicted = queue.push(QueuedSample {
                sample: sample.clone(),
                push_through,
            });
            if evicted {
                self.counters.samples_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        consumers.len()
    }

    /// Wait until at least one consumer is attached
    pub(crate) async fn wait_for_consumers(&self, timeout: Duration) -> bool {
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(|| Instant::now() + crate::protocol::constants::FOREVER);
        loop {
            let notified = self.consumers_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.consumer_count() > 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    /// Close every consumer queue so sessions finish
    pub(crate) fn close_consumers(&self) {
        for queue in self.consumers.lock().drain(..) {
            queue.close();
        }
        self.counters.consumers.store(0, Ordering::Relaxed);
        self.consumers_changed.notify_waiters();
    }
}

impl std::fmt::Debug for StreamEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEntry")
            .field("name", &self.info.name())
            .field("uid", &self.uid())
            .field("consumers", &self.consumer_count())
            .finish()
    }
}
