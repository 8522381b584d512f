//! Stream outlets
//!
//! An outlet makes one stream available on the network. Creating it binds a
//! TCP data port and a UDP service port, registers the stream in the
//! context's registry (which makes it discoverable) and starts the background
//! tasks:
//!
//! ```text
//!  push_sample() ──► StreamEntry::broadcast() ──► consumer queue ──► session ──► TCP
//!                                               └► consumer queue ──► session ──► TCP
//!  UDP service ◄── time probes / unicast short-info queries
//! ```
//!
//! # Example
//! ```no_run
//! use labstream::{ChannelFormat, Config, Context, StreamInfo, StreamOutlet, BufferLength};
//!
//! # async fn example() -> labstream::Result<()> {
//! let ctx = Context::new(Config::default())?;
//! let info = StreamInfo::new("BioSemi", "EEG", 8, 100.0, ChannelFormat::Float32, "myuid34234")?;
//! let outlet = StreamOutlet::new(&ctx, &info, 0, BufferLength::default()).await?;
//!
//! outlet.push_sample(&[0.0f32; 8])?;
//! # Ok(())
//! # }
//! ```

pub(crate) mod listener;
pub(crate) mod service;
pub(crate) mod session;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::buffer::BufferLength;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::info::{ChannelFormat, StreamInfo};
use crate::net::{bind_tcp_in_range, bind_udp_in_range, loopback_if_unspecified};
use crate::protocol::constants::DEDUCED_TIMESTAMP;
use crate::protocol::{ChannelValue, RawSample};
use crate::registry::StreamEntry;
use crate::stats::OutletStats;
use crate::timing::local_clock;

use listener::OutletListener;
use session::SessionOptions;

/// Producer side of a stream
pub struct StreamOutlet {
    ctx: Context,
    entry: Arc<StreamEntry>,
    chunk_size: usize,
    last_timestamp: Mutex<f64>,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamOutlet {
    /// Create an outlet for a copy of `info`
    ///
    /// `chunk_size` is the number of samples sent per network chunk (0 = one
    /// chunk per push call); `max_buffered` bounds each consumer's queue,
    /// beyond which the oldest samples are dropped.
    pub async fn new(
        ctx: &Context,
        info: &StreamInfo,
        chunk_size: usize,
        max_buffered: BufferLength,
    ) -> Result<Self> {
        if info.channel_format() == ChannelFormat::Undefined {
            return Err(Error::argument("channel format must not be undefined"));
        }

        let config = ctx.config();
        let listener = bind_tcp_in_range(config).await?;
        let service = bind_udp_in_range(config).await?;
        let data_addr = loopback_if_unspecified(listener.local_addr()?);
        let service_port = service.local_addr()?.port();

        let mut bound = info.clone();
        bound.bind(
            uuid::Uuid::new_v4().to_string(),
            ctx.session_id(),
            ctx.hostname(),
            local_clock(),
            data_addr.port(),
            service_port,
        );
        bound.set_v4address(data_addr.ip().to_string());

        let max_buffered = max_buffered.to_samples(&bound);
        let entry = Arc::new(StreamEntry::new(bound)?);
        ctx.registry().register(Arc::clone(&entry))?;

        let options = SessionOptions {
            max_buffered,
            chunk_size,
            handshake_timeout: config.connect_timeout,
        };
        let tasks = vec![
            tokio::spawn(OutletListener::new(listener, Arc::clone(&entry), options).run()),
            tokio::spawn(service::run(service, Arc::clone(&entry))),
        ];

        tracing::info!(
            stream = %entry.info().name(),
            uid = %entry.uid(),
            data_port = data_addr.port(),
            service_port = service_port,
            "Outlet created"
        );

        Ok(Self {
            ctx: ctx.clone(),
            entry,
            chunk_size,
            last_timestamp: Mutex::new(0.0),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(tasks),
        })
    }

    /// Bound descriptor of this outlet
    pub fn info(&self) -> &StreamInfo {
        self.entry.info()
    }

    pub fn stats(&self) -> OutletStats {
        self.entry.stats()
    }

    /// Push one sample stamped with the current time
    pub fn push_sample<T: ChannelValue>(&self, values: &[T]) -> Result<()> {
        self.push_sample_at(values, 0.0, true)
    }

    /// Push one sample
    ///
    /// A `timestamp` of `0.0` means now, [`DEDUCED_TIMESTAMP`] means the
    /// previous timestamp plus one sampling interval.
    pub fn push_sample_at<T: ChannelValue>(
        &self,
        values: &[T],
        timestamp: f64,
        push_through: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        let info = self.info();
        let mut last = self.last_timestamp.lock();
        let timestamp = self.resolve_timestamp(timestamp, *last);
        let sample = RawSample::encode(
            info.channel_format(),
            info.channel_count() as usize,
            timestamp,
            values,
        )?;
        *last = timestamp;
        drop(last);

        self.entry
            .broadcast(sample, push_through || self.chunk_size == 0);
        Ok(())
    }

    /// Push a multiplexed chunk stamped with the current time
    ///
    /// Returns the number of samples transmitted.
    pub fn push_chunk<T: ChannelValue>(&self, values: &[T]) -> Result<usize> {
        self.push_chunk_at(values, 0.0, true)
    }

    /// Push a multiplexed chunk whose last sample has `timestamp`
    ///
    /// Earlier samples are stamped backwards by the nominal sampling interval.
    /// With [`DEDUCED_TIMESTAMP`] every sample continues from the previous one.
    pub fn push_chunk_at<T: ChannelValue>(
        &self,
        values: &[T],
        timestamp: f64,
        push_through: bool,
    ) -> Result<usize> {
        self.ensure_open()?;
        let n = self.chunk_len(values)?;
        if n == 0 {
            return Ok(0);
        }

        let interval = self.interval();
        let mut last = self.last_timestamp.lock();
        let stamps: Vec<f64> = if timestamp == DEDUCED_TIMESTAMP {
            (1..=n).map(|i| *last + interval * i as f64).collect()
        } else {
            let end = if timestamp == 0.0 { local_clock() } else { timestamp };
            (0..n)
                .map(|i| end - interval * (n - 1 - i) as f64)
                .collect()
        };
        self.push_stamped(values, &stamps, push_through, &mut last)
    }

    /// Push a multiplexed chunk with one timestamp per sample
    pub fn push_chunk_stamped<T: ChannelValue>(
        &self,
        values: &[T],
        timestamps: &[f64],
        push_through: bool,
    ) -> Result<usize> {
        self.ensure_open()?;
        let n = self.chunk_len(values)?;
        if timestamps.len() != n {
            return Err(Error::argument(format!(
                "chunk has {} samples but {} timestamps",
                n,
                timestamps.len()
            )));
        }
        if n == 0 {
            return Ok(0);
        }
        let mut last = self.last_timestamp.lock();
        let stamps: Vec<f64> = timestamps
            .iter()
            .scan(*last, |prev, &t| {
                *prev = self.resolve_timestamp(t, *prev);
                Some(*prev)
            })
            .collect();
        self.push_stamped(values, &stamps, push_through, &mut last)
    }

    /// Encode every sample first so a bad value transmits nothing
    fn push_stamped<T: ChannelValue>(
        &self,
        values: &[T],
        stamps: &[f64],
        push_through: bool,
        last: &mut f64,
    ) -> Result<usize> {
        let info = self.info();
        let channels = info.channel_count() as usize;
        let samples = values
            .chunks_exact(channels)
            .zip(stamps)
            .map(|(v, &t)| RawSample::encode(info.channel_format(), channels, t, v))
            .collect::<Result<Vec<_>>>()?;

        let n = samples.len();
        if let Some(t) = stamps.last() {
            *last = *t;
        }
        let flush_last = push_through || self.chunk_size == 0;
        for (i, sample) in samples.into_iter().enumerate() {
            self.entry.broadcast(sample, flush_last && i + 1 == n);
        }
        Ok(n)
    }

    fn chunk_len<T>(&self, values: &[T]) -> Result<usize> {
        let channels = self.info().channel_count() as usize;
        if values.len() % channels != 0 {
            return Err(Error::argument(format!(
                "chunk of {} values is not a multiple of {} channels",
                values.len(),
                channels
            )));
        }
        Ok(values.len() / channels)
    }

    fn interval(&self) -> f64 {
        let srate = self.info().nominal_srate();
        if srate > 0.0 {
            1.0 / srate
        } else {
            0.0
        }
    }

    fn resolve_timestamp(&self, timestamp: f64, last: f64) -> f64 {
        if timestamp == 0.0 {
            local_clock()
        } else if timestamp == DEDUCED_TIMESTAMP {
            last + self.interval()
        } else {
            timestamp
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::InvalidHandle);
        }
        Ok(())
    }

    /// Whether any inlet is connected
    pub fn have_consumers(&self) -> bool {
        self.entry.consumer_count() > 0
    }

    /// Wait until an inlet connects; `false` on timeout
    pub async fn wait_for_consumers(&self, timeout: Duration) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.entry.wait_for_consumers(timeout).await)
    }

    /// Stop serving the stream
    ///
    /// Unregisters the stream, disconnects every consumer and releases the
    /// ports. Calling it again is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ctx.registry().unregister(self.entry.uid());
        self.entry.close_consumers();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::info!(
            stream = %self.entry.info().name(),
            uid = %self.entry.uid(),
            "Outlet closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for StreamOutlet {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StreamOutlet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamOutlet")
            .field("stream", &self.entry)
            .field("chunk_size", &self.chunk_size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Popped;
    use crate::context::Config;
    use crate::error::ErrorKind;

    fn context(session: &str) -> Context {
        Context::new(Config::with_session(session).disable_responder()).unwrap()
    }

    fn eeg(channels: u32) -> StreamInfo {
        StreamInfo::new("Outlet", "EEG", channels, 100.0, ChannelFormat::Float32, "out-1").unwrap()
    }

    #[tokio::test]
    async fn test_outlet_binds_and_registers() {
        let ctx = context("outlet-bind");
        let info = eeg(2);
        let outlet = StreamOutlet::new(&ctx, &info, 0, BufferLength::default())
            .await
            .unwrap();

        assert!(!info.is_bound());
        assert!(outlet.info().is_bound());
        assert_eq!(outlet.info().session_id(), "outlet-bind");
        assert_ne!(outlet.info().v4data_port(), 0);
        assert_ne!(outlet.info().v4service_port(), 0);
        assert!(ctx.registry().get(outlet.info().uid()).is_some());

        let uid = outlet.info().uid().to_string();
        outlet.close();
        outlet.close();
        assert!(ctx.registry().get(&uid).is_none());
        let err = outlet.push_sample(&[1.0f32, 2.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
    }

    #[tokio::test]
    async fn test_undefined_format_rejected() {
        let ctx = context("outlet-undefined");
        let info = StreamInfo::new("u", "x", 1, 0.0, ChannelFormat::Undefined, "").unwrap();
        let err = StreamOutlet::new(&ctx, &info, 0, BufferLength::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[tokio::test]
    async fn test_channel_count_and_chunk_divisibility() {
        let ctx = context("outlet-shape");
        let outlet = StreamOutlet::new(&ctx, &eeg(3), 0, BufferLength::default())
            .await
            .unwrap();

        let err = outlet.push_sample(&[1.0f32, 2.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        let err = outlet.push_chunk(&[1.0f32; 7]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        let err = outlet
            .push_chunk_stamped(&[1.0f32; 6], &[1.0], true)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);

        assert_eq!(outlet.push_chunk(&[1.0f32; 6]).unwrap(), 2);
        assert_eq!(outlet.push_chunk::<f32>(&[]).unwrap(), 0);
        assert_eq!(outlet.stats().samples_pushed, 2);
    }

    #[tokio::test]
    async fn test_timestamps_of_chunks() {
        let ctx = context("outlet-stamps");
        let outlet = StreamOutlet::new(&ctx, &eeg(1), 0, BufferLength::default())
            .await
            .unwrap();
        let queue = outlet.entry.subscribe(16);

        outlet.push_chunk_at(&[0.0f32, 1.0, 2.0], 10.0, false).unwrap();
        outlet.push_sample_at(&[3.0f32], DEDUCED_TIMESTAMP, false).unwrap();
        outlet
            .push_chunk_stamped(&[4.0f32, 5.0], &[20.0, DEDUCED_TIMESTAMP], true)
            .unwrap();

        let stamps: Vec<f64> = queue
            .drain_up_to(16)
            .into_iter()
            .map(|q| q.sample.timestamp)
            .collect();
        let expected = [9.98, 9.99, 10.0, 10.01, 20.0, 20.01];
        assert_eq!(stamps.len(), expected.len());
        for (got, want) in stamps.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{} != {}", got, want);
        }
    }

    #[tokio::test]
    async fn test_push_through_only_on_last_sample() {
        let ctx = context("outlet-flush");
        let outlet = StreamOutlet::new(&ctx, &eeg(1), 32, BufferLength::default())
            .await
            .unwrap();
        let queue = outlet.entry.subscribe(16);

        outlet.push_chunk_at(&[0.0f32, 1.0, 2.0], 0.0, true).unwrap();
        outlet.push_sample_at(&[3.0f32], 0.0, false).unwrap();

        let flags: Vec<bool> = queue.drain_up_to(16).iter().map(|q| q.push_through).collect();
        assert_eq!(flags, vec![false, false, true, false]);
    }

    #[tokio::test]
    async fn test_wait_for_consumers_and_close() {
        let ctx = context("outlet-consumers");
        let outlet = StreamOutlet::new(&ctx, &eeg(1), 0, BufferLength::Samples(4))
            .await
            .unwrap();
        assert!(!outlet.have_consumers());
        assert!(!outlet
            .wait_for_consumers(Duration::from_millis(10))
            .await
            .unwrap());

        let queue = outlet.entry.subscribe(4);
        assert!(outlet.have_consumers());
        outlet.close();
        assert_eq!(queue.pop(Duration::from_secs(1)).await, Popped::Closed);
        tokio_test::assert_err!(outlet.wait_for_consumers(Duration::ZERO).await);
    }
}
