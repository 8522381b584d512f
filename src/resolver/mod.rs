//! Stream discovery
//!
//! Resolvers find outlets by sending `LSL:shortinfo` queries over UDP to the
//! configured multicast groups, the broadcast address and any known peers.
//! Outlets of the caller's own context are merged in directly. Queries are
//! scoped to the context's session id, so streams of other sessions are never
//! returned.
//!
//! Results are short descriptors (empty `desc`); use
//! [`StreamInlet::info`](crate::StreamInlet::info) for the full metadata.

mod continuous;
mod oneshot;
pub(crate) mod wave;

pub use continuous::ContinuousResolver;

use std::time::Duration;

use crate::context::Context;
use crate::error::Result;
use crate::info::StreamInfo;
use crate::query::property_query;

/// Every stream visible within `wait_time`, at most `max_count`
pub async fn resolve_all(
    ctx: &Context,
    max_count: usize,
    wait_time: Duration,
) -> Result<Vec<StreamInfo>> {
    oneshot::resolve(ctx, "", 0, max_count, wait_time).await
}

/// Streams whose `property` (e.g. `name`, `type`, `desc/manufacturer`)
/// equals `value`
///
/// Returns as soon as `min_count` streams are found, or with whatever was
/// found when `timeout` expires.
pub async fn resolve_by_property(
    ctx: &Context,
    property: &str,
    value: &str,
    min_count: usize,
    max_count: usize,
    timeout: Duration,
) -> Result<Vec<StreamInfo>> {
    let query = property_query(property, value)?;
    oneshot::resolve(ctx, &query, min_count, max_count, timeout).await
}

/// Streams matching a query predicate such as
/// `name='BioSemi' and count(desc/channels/channel)=32`
pub async fn resolve_by_predicate(
    ctx: &Context,
    predicate: &str,
    min_count: usize,
    max_count: usize,
    timeout: Duration,
) -> Result<Vec<StreamInfo>> {
    oneshot::resolve(ctx, predicate, min_count, max_count, timeout).await
}
