//! One-shot resolution

use std::time::Duration;

use tokio::time::Instant;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::info::StreamInfo;
use crate::protocol::constants::FOREVER;
use crate::query::scoped_query;

use super::wave::{Discovered, QueryWave};

/// Run query waves until `min_count` streams are known or `timeout` expires
///
/// `min_count == 0` always waits the full timeout.
pub(crate) async fn resolve(
    ctx: &Context,
    query: &str,
    min_count: usize,
    max_count: usize,
    timeout: Duration,
) -> Result<Vec<StreamInfo>> {
    if max_count == 0 {
        return Err(Error::argument("max_count must be at least 1"));
    }
    let mut wave = QueryWave::bind(ctx, scoped_query(ctx.session_id(), query)?)?;
    let config = ctx.config();

    let start = Instant::now();
    let deadline = start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FOREVER);
    let earliest_return = start + config.resolve_minimum_time;
    let wave_interval = config.resolve_wave_interval.max(Duration::from_millis(1));
    let mut next_wave = start;
    let mut found = Discovered::default();

    loop {
        let now = Instant::now();
        if now >= next_wave {
            for info in wave.local_matches() {
                found.insert(info);
            }
            wave.send().await;
            next_wave += wave_interval;
        }

        let satisfied = min_count > 0 && found.len() >= min_count;
        if satisfied && now >= earliest_return {
            break;
        }
        if now >= deadline {
            break;
        }

        let mut wake = next_wave.min(deadline);
        if satisfied {
            wake = wake.min(earliest_return);
        }
        tokio::select! {
            info = wave.recv() => {
                tracing::trace!(stream = %info.name(), uid = %info.uid(), "Stream found");
                found.insert(info);
            }
            _ = tokio::time::sleep_until(wake) => {}
        }
    }

    tracing::debug!(
        query = %query,
        found = found.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Resolve finished"
    );
    Ok(found.into_vec(max_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Config;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_zero_max_count_rejected() {
        let ctx = Context::new(Config::with_session("oneshot-zero").disable_responder()).unwrap();
        let err = resolve(&ctx, "", 0, 0, Duration::ZERO).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[tokio::test]
    async fn test_invalid_predicate_rejected() {
        let ctx = Context::new(Config::with_session("oneshot-bad").disable_responder()).unwrap();
        let err = resolve(&ctx, "name='x' and", 1, 1, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
    }
}
