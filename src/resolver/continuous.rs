//! Continuous resolution
//!
//! A background task keeps sending query waves and records when each stream
//! was last seen. [`ContinuousResolver::results`] returns the streams seen
//! within the `forget_after` window.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::info::StreamInfo;
use crate::query::{property_query, scoped_query};

use super::wave::QueryWave;

type SeenMap = HashMap<String, (StreamInfo, Instant)>;

/// Background resolver; see the [module docs](self)
pub struct ContinuousResolver {
    seen: Arc<Mutex<SeenMap>>,
    forget_after: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ContinuousResolver {
    /// Track every stream of the context's session
    pub fn all(ctx: &Context, forget_after: Duration) -> Result<Self> {
        Self::start(ctx, "", forget_after)
    }

    /// Track streams whose `property` equals `value`
    pub fn by_property(
        ctx: &Context,
        property: &str,
        value: &str,
        forget_after: Duration,
    ) -> Result<Self> {
        let query = property_query(property, value)?;
        Self::start(ctx, &query, forget_after)
    }

    /// Track streams matching a predicate
    pub fn by_predicate(ctx: &Context, predicate: &str, forget_after: Duration) -> Result<Self> {
        Self::start(ctx, predicate, forget_after)
    }

    fn start(ctx: &Context, query: &str, forget_after: Duration) -> Result<Self> {
        let wave = QueryWave::bind(ctx, scoped_query(ctx.session_id(), query)?)?;
        let seen = Arc::new(Mutex::new(SeenMap::new()));
        let interval = ctx
            .config()
            .continuous_resolve_interval
            .max(Duration::from_millis(1));
        let task = tokio::spawn(run(wave, Arc::clone(&seen), interval, forget_after));

        tracing::debug!(query = %query, "Continuous resolver started");
        Ok(Self {
            seen,
            forget_after,
            task: Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        })
    }

    /// Streams seen within the forget window, oldest first, at most
    /// `max_count`
    pub fn results(&self, max_count: usize) -> Result<Vec<StreamInfo>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::InvalidHandle);
        }
        if max_count == 0 {
            return Err(Error::argument("max_count must be at least 1"));
        }

        let mut seen = self.seen.lock();
        prune(&mut seen, self.forget_after, Instant::now());

        let mut streams: Vec<StreamInfo> = seen.values().map(|(info, _)| info.clone()).collect();
        streams.sort_by(|a, b| a.created_at().total_cmp(&b.created_at()));
        streams.truncate(max_count);
        Ok(streams)
    }

    /// Stop the background task; later `results` calls fail
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.seen.lock().clear();
    }
}

impl fmt::Debug for ContinuousResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuousResolver")
            .field("forget_after", &self.forget_after)
            .field("known", &self.seen.lock().len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for ContinuousResolver {
    fn drop(&mut self) {
        self.close();
    }
}

/// Forget streams not seen within `forget_after` of `now`
fn prune(seen: &mut SeenMap, forget_after: Duration, now: Instant) {
    seen.retain(|_, (_, last)| now.saturating_duration_since(*last) <= forget_after);
}

async fn run(
    mut wave: QueryWave,
    seen: Arc<Mutex<SeenMap>>,
    interval: Duration,
    forget_after: Duration,
) {
    let mut next_wave = Instant::now();
    loop {
        if Instant::now() >= next_wave {
            let now = Instant::now();
            let local = wave.local_matches();
            {
                let mut seen = seen.lock();
                prune(&mut seen, forget_after, now);
                for info in local {
                    seen.insert(info.uid().to_string(), (info, now));
                }
            }
            wave.send().await;
            next_wave += interval;
        }

        tokio::select! {
            info = wave.recv() => {
                let mut seen = seen.lock();
                if !seen.contains_key(info.uid()) {
                    tracing::debug!(stream = %info.name(), uid = %info.uid(), "Stream appeared");
                }
                seen.insert(info.uid().to_string(), (info, Instant::now()));
            }
            _ = tokio::time::sleep_until(next_wave) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferLength;
    use crate::context::Config;
    use crate::error::ErrorKind;
    use crate::info::ChannelFormat;
    use crate::outlet::StreamOutlet;

    fn context(session: &str) -> Context {
        let mut config = Config::with_session(session)
            .disable_responder()
            .disable_broadcast()
            .multicast_addresses(vec![]);
        config.continuous_resolve_interval = Duration::from_millis(20);
        Context::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_tracks_and_forgets_streams() {
        let ctx = context("continuous-track");
        let resolver =
            ContinuousResolver::by_property(&ctx, "type", "Markers", Duration::from_millis(200))
                .unwrap();

        let info = StreamInfo::new("M", "Markers", 1, 0.0, ChannelFormat::String, "m").unwrap();
        let outlet = StreamOutlet::new(&ctx, &info, 0, BufferLength::default())
            .await
            .unwrap();
        let other = StreamInfo::new("E", "EEG", 1, 10.0, ChannelFormat::Float32, "e").unwrap();
        let _other = StreamOutlet::new(&ctx, &other, 0, BufferLength::default())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let found = resolver.results(10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uid(), outlet.info().uid());

        outlet.close();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(resolver.results(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_invalidates() {
        let ctx = context("continuous-close");
        let resolver = ContinuousResolver::all(&ctx, Duration::from_secs(5)).unwrap();
        tokio_test::assert_ok!(resolver.results(1));

        resolver.close();
        resolver.close();
        let err = resolver.results(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let ctx = context("continuous-args");
        let err = ContinuousResolver::by_predicate(&ctx, "name=", Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        let err = ContinuousResolver::by_property(&ctx, "bad name", "x", Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);

        let resolver = ContinuousResolver::all(&ctx, Duration::from_secs(1)).unwrap();
        assert_eq!(resolver.results(0).unwrap_err().kind(), ErrorKind::Argument);
        assert!(format!("{:?}", resolver).contains("closed: false"));
    }

    #[tokio::test]
    async fn test_background_task_forgets_without_results_calls() {
        let ctx = context("continuous-prune");
        let resolver = ContinuousResolver::all(&ctx, Duration::from_millis(100)).unwrap();

        let info = StreamInfo::new("P", "Markers", 1, 0.0, ChannelFormat::Int32, "p").unwrap();
        let outlet = StreamOutlet::new(&ctx, &info, 0, BufferLength::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(resolver.seen.lock().len(), 1);

        outlet.close();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(resolver.seen.lock().is_empty());
    }

    #[test]
    fn test_prune() {
        let info = StreamInfo::new("P", "Markers", 1, 0.0, ChannelFormat::Int32, "p").unwrap();
        let now = Instant::now();
        let mut seen = SeenMap::new();
        seen.insert("old".into(), (info.clone(), now));
        seen.insert("new".into(), (info, now + Duration::from_secs(5)));

        prune(&mut seen, Duration::from_secs(1), now + Duration::from_secs(5));
        assert_eq!(seen.len(), 1);
        assert!(seen.contains_key("new"));
    }
}
