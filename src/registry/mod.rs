//! Registry of local outlets
//!
//! The registry is the source of truth for "which streams does this context
//! offer". Outlets register on creation and unregister on close; samples are
//! fanned out through their entry to every connected consumer.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<StreamRegistry>
//!                   ┌──────────────────────────┐
//!                   │ streams: HashMap<uid,    │
//!                   │   StreamEntry {          │
//!                   │     info, cached xml,    │
//!                   │     consumers: [queue],  │
//!                   │   }                      │
//!                   │ >                        │
//!                   └────────────┬─────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        │                       │                       │
//!        ▼                       ▼                       ▼
//!   [StreamOutlet]         [Responder]             [Listener]
//!   push_sample()          find_matching()         get(uid)
//!        │                  shortinfo ──► UDP       subscribe() ──► TCP
//!        └──► entry.broadcast() ──► consumer queues ──┘
//! ```
//!
//! Samples are `bytes::Bytes`-backed, so fan-out clones only bump reference
//! counts.

pub mod entry;
pub mod store;

pub use entry::StreamEntry;
pub use store::StreamRegistry;
