//! Stream inlets
//!
//! An inlet receives one stream found by a resolver. The data connection is
//! opened lazily (by [`StreamInlet::open_stream`] or the first pull) and
//! feeds a bounded receive buffer that drops its oldest samples on overflow.
//!
//! Timestamps arrive in the source's clock. [`StreamInlet::time_correction`]
//! estimates the offset to the local clock; with
//! [`PostProcessing::CLOCKSYNC`] the inlet applies it itself.
//!
//! # Example
//! ```no_run
//! use std::time::Duration;
//! use labstream::{resolve_by_property, BufferLength, Config, Context, StreamInlet, FOREVER};
//!
//! # async fn example() -> labstream::Result<()> {
//! let ctx = Context::new(Config::default())?;
//! let streams = resolve_by_property(&ctx, "type", "EEG", 1, 1, FOREVER).await?;
//! let inlet = StreamInlet::new(&ctx, &streams[0], BufferLength::default(), 0, true)?;
//!
//! let mut sample = vec![0.0f32; streams[0].channel_count() as usize];
//! let timestamp = inlet.pull_sample(&mut sample, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub(crate) mod connection;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::buffer::{BufferLength, Popped};
use crate::context::Context;
use crate::error::{Error, ErrorKind, Result};
use crate::info::StreamInfo;
use crate::protocol::constants::FOREVER;
use crate::protocol::ChannelValue;
use crate::stats::InletStats;
use crate::timing::correction::{ProbeSettings, TimeReceiver};
use crate::timing::postproc::TimestampPostProcessor;
use crate::timing::{PostProcessing, TimeCorrection};

use connection::{Link, LinkState};

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FOREVER)
}

/// Consumer side of a stream
pub struct StreamInlet {
    link: Arc<Link>,
    connection: Mutex<Option<JoinHandle<()>>>,
    /// Serializes connection attempts
    opening: tokio::sync::Mutex<()>,
    postproc: Mutex<TimestampPostProcessor>,
    /// Held across dequeue and post-processing with `THREADSAFE`
    pull_gate: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl StreamInlet {
    /// Create an inlet for a resolved stream
    ///
    /// `max_buflen` bounds the receive buffer (and the outlet's queue for this
    /// consumer), `max_chunklen` asks the outlet for chunks of at most that
    /// many samples (0 = outlet default). With `recover`, a lost source with a
    /// non-empty source id is looked up again and reconnected transparently.
    pub fn new(
        ctx: &Context,
        info: &StreamInfo,
        max_buflen: BufferLength,
        max_chunklen: usize,
        recover: bool,
    ) -> Result<Self> {
        if !info.is_bound() {
            return Err(Error::InvalidHandle);
        }

        let time = TimeReceiver::new(ProbeSettings::from(ctx.config()));
        time.set_target(connection::service_addr(info)?);
        let postproc = TimestampPostProcessor::new(
            info.nominal_srate(),
            ctx.config().smoothing_halftime,
        );
        let capacity = max_buflen.to_samples(info);

        Ok(Self {
            link: Arc::new(Link::new(
                ctx,
                info.clone(),
                time,
                capacity,
                max_chunklen,
                recover,
            )),
            connection: Mutex::new(None),
            opening: tokio::sync::Mutex::new(()),
            postproc: Mutex::new(postproc),
            pull_gate: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::InvalidHandle);
        }
        Ok(())
    }

    /// Connect to the outlet unless already connected
    ///
    /// Fails with `StreamLost` if the outlet is gone and the inlet cannot
    /// recover; a recovering inlet looks the source up again instead.
    pub async fn open_stream(&self, timeout: Duration) -> Result<()> {
        self.open_until(deadline_after(timeout)).await
    }

    async fn open_until(&self, deadline: Instant) -> Result<()> {
        self.ensure_open()?;
        let _opening = self.opening.lock().await;
        if self.link.state() == LinkState::Connected {
            return Ok(());
        }

        let config = self.link.ctx.config();
        let info = self.link.info.lock().clone();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            match connection::connect(&self.link, &info, remaining).await {
                Ok(conn) => {
                    self.attach(conn);
                    return Ok(());
                }
                Err(e) if connection::source_gone(&e) => {
                    if !self.link.can_recover() {
                        self.link.mark_lost();
                        return Err(Error::StreamLost);
                    }
                    tracing::info!(uid = %info.uid(), "Source gone before connecting, recovering");
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    return match tokio::time::timeout(remaining, connection::recover(&self.link)).await {
                        Ok(Some(conn)) => {
                            self.attach(conn);
                            Ok(())
                        }
                        Ok(None) => Err(self.ended_error()),
                        Err(_) => Err(Error::Timeout),
                    };
                }
                // Reset mid-handshake: the outlet may still be coming up
                Err(Error::Io(e)) => {
                    tracing::debug!(uid = %info.uid(), error = %e, "Connect failed, retrying");
                    let retry = Instant::now() + config.recover_interval;
                    tokio::time::sleep_until(retry.min(deadline)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Hand an established connection to a supervising task
    fn attach(&self, conn: connection::Connection) {
        self.link.queue.reopen();
        self.link.set_state(LinkState::Connected);
        let task = tokio::spawn(connection::supervise(Arc::clone(&self.link), conn));
        if let Some(old) = self.connection.lock().replace(task) {
            old.abort();
        }
        let info = self.link.info.lock();
        tracing::info!(stream = %info.name(), uid = %info.uid(), "Inlet connected");
    }

    /// Open lazily; `false` if the deadline passed first
    async fn ensure_connected(&self, deadline: Instant) -> Result<bool> {
        match self.link.state() {
            LinkState::Connected | LinkState::Lost => Ok(true),
            LinkState::Closed => Err(Error::InvalidHandle),
            LinkState::Idle => match self.open_until(deadline).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::Timeout => Ok(false),
                Err(e) => Err(e),
            },
        }
    }

    fn ended_error(&self) -> Error {
        if self.closed.load(Ordering::Acquire) {
            Error::InvalidHandle
        } else {
            Error::StreamLost
        }
    }

    fn check_channels(&self, len: usize) -> Result<()> {
        if len != self.link.channel_count {
            return Err(Error::argument(format!(
                "buffer holds {} values but the stream has {} channels",
                len, self.link.channel_count
            )));
        }
        Ok(())
    }

    async fn gate(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        let threadsafe = self.postproc.lock().flags().contains(PostProcessing::THREADSAFE);
        if threadsafe {
            Some(self.pull_gate.lock().await)
        } else {
            None
        }
    }

    /// With `CLOCKSYNC`, wait until a clock offset is known so no timestamp
    /// leaves uncorrected; `false` if the deadline passed first
    async fn clock_ready(&self, deadline: Instant) -> Result<bool> {
        if !self.postproc.lock().flags().contains(PostProcessing::CLOCKSYNC) {
            return Ok(true);
        }
        if self.link.time.current().is_some() {
            return Ok(true);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.link.time.time_correction(remaining).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::Timeout => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn postprocess(&self, timestamp: f64) -> f64 {
        let mut postproc = self.postproc.lock();
        if postproc.flags().is_empty() {
            return timestamp;
        }
        let (estimate, generation) = self.link.time.snapshot();
        if estimate.is_none() && postproc.flags().contains(PostProcessing::CLOCKSYNC) {
            self.link.time.ensure_updater();
        }
        postproc.process(
            timestamp,
            estimate.map(|c| c.offset).unwrap_or(0.0),
            generation,
        )
    }

    /// Pull one sample into `buf` (one slot per channel)
    ///
    /// Returns its timestamp, or `0.0` if none arrived within `timeout`.
    pub async fn pull_sample<T: ChannelValue>(&self, buf: &mut [T], timeout: Duration) -> Result<f64> {
        self.ensure_open()?;
        self.check_channels(buf.len())?;
        let deadline = deadline_after(timeout);
        if !self.ensure_connected(deadline).await? {
            return Ok(0.0);
        }

        let _gate = self.gate().await;
        if !self.clock_ready(deadline).await? {
            return Ok(0.0);
        }
        match self.link.queue.pop_until(deadline).await {
            Popped::Item(sample) => {
                sample.decode_into(self.link.channel_format, buf)?;
                Ok(self.postprocess(sample.timestamp))
            }
            Popped::Timeout => Ok(0.0),
            Popped::Closed => Err(self.ended_error()),
        }
    }

    /// Pull up to `timestamps.len()` samples into a multiplexed `buf`
    ///
    /// Returns what is available immediately; with a non-zero `timeout` waits
    /// until the buffers are full or the timeout expires. Returns the number
    /// of samples written.
    pub async fn pull_chunk<T: ChannelValue>(
        &self,
        buf: &mut [T],
        timestamps: &mut [f64],
        timeout: Duration,
    ) -> Result<usize> {
        self.ensure_open()?;
        let channels = self.link.channel_count;
        if buf.len() % channels != 0 {
            return Err(Error::argument(format!(
                "buffer of {} values is not a multiple of {} channels",
                buf.len(),
                channels
            )));
        }
        let max = (buf.len() / channels).min(timestamps.len());
        if max == 0 {
            return Ok(0);
        }
        let deadline = deadline_after(timeout);
        if !self.ensure_connected(deadline).await? {
            return Ok(0);
        }

        let _gate = self.gate().await;
        if !self.clock_ready(deadline).await? {
            return Ok(0);
        }
        let mut n = 0;
        while n < max {
            match self.link.queue.pop_until(deadline).await {
                Popped::Item(sample) => {
                    let slot = &mut buf[n * channels..(n + 1) * channels];
                    sample.decode_into(self.link.channel_format, slot)?;
                    timestamps[n] = self.postprocess(sample.timestamp);
                    n += 1;
                }
                Popped::Timeout => break,
                Popped::Closed if n == 0 => return Err(self.ended_error()),
                Popped::Closed => break,
            }
        }
        Ok(n)
    }

    /// Samples waiting in the receive buffer
    pub fn samples_available(&self) -> usize {
        self.link.queue.len()
    }

    /// Discard buffered samples, returning how many were dropped
    pub fn flush(&self) -> usize {
        self.link.queue.clear()
    }

    /// Fetch the full descriptor, including `desc`, from the outlet
    pub async fn info(&self, timeout: Duration) -> Result<StreamInfo> {
        self.ensure_open()?;
        let info = self.link.info.lock().clone();
        connection::fetch_full_info(&info, timeout).await
    }

    /// Offset to add to the source's timestamps to map them onto
    /// [`local_clock`](crate::local_clock)
    pub async fn time_correction(&self, timeout: Duration) -> Result<f64> {
        Ok(self.time_correction_ex(timeout).await?.offset)
    }

    /// Offset estimate together with its remote time and uncertainty
    pub async fn time_correction_ex(&self, timeout: Duration) -> Result<TimeCorrection> {
        self.ensure_open()?;
        self.link.time.time_correction(timeout).await
    }

    /// Whether the source's clock was reset (or the source was recovered)
    /// since the last call
    pub fn was_clock_reset(&self) -> bool {
        self.link.time.take_reset()
    }

    /// Select timestamp post-processing; filter state restarts
    pub fn set_postprocessing(&self, flags: PostProcessing) -> Result<()> {
        self.ensure_open()?;
        self.postproc.lock().set_flags(flags);
        if flags.contains(PostProcessing::CLOCKSYNC) {
            self.link.time.ensure_updater();
        }
        Ok(())
    }

    /// Half-time (seconds) of the dejitter filter's memory
    pub fn smoothing_halftime(&self, seconds: f64) -> Result<()> {
        self.ensure_open()?;
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(Error::argument(format!(
                "smoothing half-time must be positive, got {}",
                seconds
            )));
        }
        self.postproc.lock().set_halftime(seconds);
        Ok(())
    }

    pub fn stats(&self) -> InletStats {
        self.link.counters.snapshot(self.link.queue.dropped())
    }

    /// Drop the data connection; the next pull reconnects
    pub fn close_stream(&self) {
        if let Some(task) = self.connection.lock().take() {
            task.abort();
        }
        if self.link.state() == LinkState::Connected {
            self.link.set_state(LinkState::Idle);
        }
    }

    /// Release the inlet; later operations fail with `InvalidHandle`
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.link.set_state(LinkState::Closed);
        if let Some(task) = self.connection.lock().take() {
            task.abort();
        }
        self.link.time.stop();
        self.link.queue.close();
        tracing::debug!(stream = %self.link.info.lock().name(), "Inlet closed");
    }
}

impl Drop for StreamInlet {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StreamInlet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = self.link.info.lock();
        f.debug_struct("StreamInlet")
            .field("stream", &info.name())
            .field("uid", &info.uid())
            .field("state", &self.link.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Config;
    use crate::info::ChannelFormat;
    use crate::outlet::StreamOutlet;
    use crate::resolver::resolve_by_property;
    use crate::protocol::constants::MAX_DATAGRAM_SIZE;
    use crate::protocol::{Datagram, TimeReply};
    use crate::timing::local_clock;
    use std::net::{Ipv4Addr, SocketAddr};
    use tokio::net::UdpSocket;

    fn context(session: &str) -> Context {
        let config = Config::with_session(session)
            .disable_responder()
            .disable_broadcast()
            .multicast_addresses(vec![])
            .resolve_wave_interval(Duration::from_millis(50))
            .recover_interval(Duration::from_millis(50))
            .time_update_interval(Duration::from_millis(200));
        Context::new(config).unwrap()
    }

    async fn pair(
        session: &str,
        info: &StreamInfo,
        recover: bool,
    ) -> (Context, StreamOutlet, StreamInlet) {
        let ctx = context(session);
        let outlet = StreamOutlet::new(&ctx, info, 0, BufferLength::default())
            .await
            .unwrap();
        let found = resolve_by_property(&ctx, "name", info.name(), 1, 1, Duration::from_secs(5))
            .await
            .unwrap();
        let inlet = StreamInlet::new(&ctx, &found[0], BufferLength::default(), 0, recover).unwrap();
        inlet.open_stream(Duration::from_secs(5)).await.unwrap();
        assert!(outlet.wait_for_consumers(Duration::from_secs(5)).await.unwrap());
        (ctx, outlet, inlet)
    }

    fn eeg(name: &str) -> StreamInfo {
        StreamInfo::new(name, "EEG", 4, 100.0, ChannelFormat::Float32, "eeg-src").unwrap()
    }

    #[tokio::test]
    async fn test_unbound_info_rejected() {
        let ctx = context("inlet-unbound");
        let err = StreamInlet::new(&ctx, &eeg("x"), BufferLength::default(), 0, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
    }

    #[tokio::test]
    async fn test_delivery_in_push_order() {
        let (_ctx, outlet, inlet) = pair("inlet-order", &eeg("Order"), false).await;

        for i in 0..50 {
            let v = i as f32;
            outlet.push_sample_at(&[v, v + 0.5, -v, 0.0], 1000.0 + i as f64, true).unwrap();
        }

        let mut sample = [0.0f32; 4];
        for i in 0..50 {
            let ts = inlet.pull_sample(&mut sample, Duration::from_secs(5)).await.unwrap();
            assert_eq!(ts, 1000.0 + i as f64);
            assert_eq!(sample, [i as f32, i as f32 + 0.5, -(i as f32), 0.0]);
        }
        assert_eq!(inlet.stats().samples_received, 50);
        assert_eq!(outlet.stats().samples_pushed, 50);
    }

    #[tokio::test]
    async fn test_timeout_sentinel_and_argument_errors() {
        let (_ctx, _outlet, inlet) = pair("inlet-timeout", &eeg("Quiet"), false).await;

        let mut sample = [0.0f32; 4];
        let ts = inlet
            .pull_sample(&mut sample, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(ts, 0.0);

        let mut wrong = [0.0f32; 3];
        let err = inlet.pull_sample(&mut wrong, Duration::ZERO).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);

        let mut chunk = [0.0f32; 6];
        let mut stamps = [0.0; 2];
        let err = inlet
            .pull_chunk(&mut chunk, &mut stamps, Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);

        let mut chunk = [0.0f32; 8];
        let n = inlet.pull_chunk(&mut chunk, &mut stamps, Duration::ZERO).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_chunks_round_trip() {
        let info = StreamInfo::new("Chunky", "Audio", 2, 1000.0, ChannelFormat::Int16, "mic").unwrap();
        let (_ctx, outlet, inlet) = pair("inlet-chunks", &info, false).await;

        let values: Vec<i16> = (0..20).collect();
        assert_eq!(outlet.push_chunk_at(&values, 50.0, true).unwrap(), 10);

        let mut buf = [0i16; 20];
        let mut stamps = [0.0; 10];
        let n = inlet
            .pull_chunk(&mut buf, &mut stamps, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(n, 10);
        assert_eq!(buf.to_vec(), values);
        assert!((stamps[9] - 50.0).abs() < 1e-9);
        assert!((stamps[0] - 49.991).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_string_samples() {
        let info = StreamInfo::new("Markers", "Markers", 1, 0.0, ChannelFormat::String, "mk").unwrap();
        let (_ctx, outlet, inlet) = pair("inlet-strings", &info, false).await;

        outlet.push_sample(&["stimulus onset".to_string()]).unwrap();
        let mut marker = [String::new()];
        let ts = inlet.pull_sample(&mut marker, Duration::from_secs(5)).await.unwrap();
        assert!(ts > 0.0);
        assert_eq!(marker[0], "stimulus onset");

        let err = outlet.push_sample(&[1.0f32]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[tokio::test]
    async fn test_full_info_round_trip() {
        let info = eeg("Described");
        let channels = info.desc().append_child("channels");
        for label in ["Fp1", "Fp2", "C3", "C4"] {
            channels
                .append_child("channel")
                .append_child_value("label", label);
        }
        let (_ctx, _outlet, inlet) = pair("inlet-fullinfo", &info, false).await;

        let full = inlet.info(Duration::from_secs(5)).await.unwrap();
        let labels: Vec<String> = full
            .desc()
            .child("channels")
            .children()
            .iter()
            .map(|c| c.child_value_named("label"))
            .collect();
        assert_eq!(labels, vec!["Fp1", "Fp2", "C3", "C4"]);
        assert_eq!(full.v4address(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let ctx = context("inlet-overflow");
        let info = StreamInfo::new("Burst", "EEG", 1, 100.0, ChannelFormat::Int32, "b").unwrap();
        let outlet = StreamOutlet::new(&ctx, &info, 0, BufferLength::default())
            .await
            .unwrap();
        let found = resolve_by_property(&ctx, "name", "Burst", 1, 1, Duration::from_secs(5))
            .await
            .unwrap();
        let inlet = StreamInlet::new(&ctx, &found[0], BufferLength::Samples(5), 0, false).unwrap();
        inlet.open_stream(Duration::from_secs(5)).await.unwrap();
        assert!(outlet.wait_for_consumers(Duration::from_secs(5)).await.unwrap());

        for i in 0..20 {
            outlet.push_sample(&[i]).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(inlet.samples_available() <= 5);
        let mut v = [0i32];
        let mut last = -1;
        while inlet.samples_available() > 0 {
            inlet.pull_sample(&mut v, Duration::ZERO).await.unwrap();
            assert!(v[0] > last);
            last = v[0];
        }
        assert_eq!(last, 19);
        assert!(outlet.stats().samples_dropped + inlet.stats().samples_dropped >= 15);
    }

    #[tokio::test]
    async fn test_stream_lost_without_recovery() {
        let (_ctx, outlet, inlet) = pair("inlet-lost", &eeg("Vanishing"), false).await;
        outlet.push_sample(&[1.0f32; 4]).unwrap();
        let mut sample = [0.0f32; 4];
        inlet.pull_sample(&mut sample, Duration::from_secs(5)).await.unwrap();

        drop(outlet);
        let err = inlet
            .pull_sample(&mut sample, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamLost);
    }

    #[tokio::test]
    async fn test_recovery_after_outlet_restart() {
        let info = eeg("Phoenix");
        let (ctx, outlet, inlet) = pair("inlet-recover", &info, true).await;
        outlet.push_sample_at(&[1.0f32; 4], 1.0, true).unwrap();
        let mut sample = [0.0f32; 4];
        assert_eq!(inlet.pull_sample(&mut sample, Duration::from_secs(5)).await.unwrap(), 1.0);
        let first_uid = outlet.info().uid().to_string();
        drop(outlet);

        let restarted = StreamOutlet::new(&ctx, &info, 0, BufferLength::default())
            .await
            .unwrap();
        assert_ne!(restarted.info().uid(), first_uid);
        assert!(restarted.wait_for_consumers(Duration::from_secs(10)).await.unwrap());
        restarted.push_sample_at(&[2.0f32; 4], 2.0, true).unwrap();

        let ts = inlet.pull_sample(&mut sample, Duration::from_secs(10)).await.unwrap();
        assert_eq!(ts, 2.0);
        assert_eq!(sample, [2.0f32; 4]);
        assert_eq!(inlet.stats().reconnects, 1);
        assert!(inlet.was_clock_reset());
        assert!(!inlet.was_clock_reset());
    }

    #[tokio::test]
    async fn test_time_correction_on_loopback() {
        let (_ctx, _outlet, inlet) = pair("inlet-clock", &eeg("Clock"), false).await;

        let correction = inlet.time_correction_ex(Duration::from_secs(5)).await.unwrap();
        assert!(correction.offset.abs() < 0.01);
        assert!(correction.uncertainty >= 0.0);
        assert!((correction.remote_time - local_clock()).abs() < 5.0);
        let offset = inlet.time_correction(Duration::from_secs(5)).await.unwrap();
        assert!(offset.abs() < 0.01);
    }

    #[tokio::test]
    async fn test_postprocessing_monotonize() {
        let (_ctx, outlet, inlet) = pair("inlet-postproc", &eeg("Jumpy"), false).await;
        inlet
            .set_postprocessing(PostProcessing::MONOTONIZE | PostProcessing::THREADSAFE)
            .unwrap();
        tokio_test::assert_err!(inlet.smoothing_halftime(0.0));
        tokio_test::assert_ok!(inlet.smoothing_halftime(30.0));

        for ts in [10.0, 9.0, 11.0] {
            outlet.push_sample_at(&[0.0f32; 4], ts, true).unwrap();
        }
        let mut sample = [0.0f32; 4];
        let mut stamps = Vec::new();
        for _ in 0..3 {
            stamps.push(inlet.pull_sample(&mut sample, Duration::from_secs(5)).await.unwrap());
        }
        assert_eq!(stamps, vec![10.0, 10.0, 11.0]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_ctx, outlet, inlet) = pair("inlet-close", &eeg("Closing"), false).await;
        outlet.push_sample(&[0.0f32; 4]).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(inlet.flush(), 1);

        inlet.close_stream();
        inlet.close();
        inlet.close();
        let mut sample = [0.0f32; 4];
        let err = inlet.pull_sample(&mut sample, Duration::ZERO).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
        assert_eq!(
            inlet.time_correction(Duration::ZERO).await.unwrap_err().kind(),
            ErrorKind::InvalidHandle
        );
    }

    /// Service answering time probes with a clock running `skew` seconds
    /// behind the local one
    async fn skewed_service(skew: f64) -> SocketAddr {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                if let Ok(Datagram::TimeProbe { wave_id, t0 }) = Datagram::parse(&buf[..len]) {
                    let t1 = local_clock() - skew;
                    let reply = TimeReply {
                        wave_id,
                        t0,
                        t1,
                        t2: local_clock() - skew,
                    };
                    let _ = socket.send_to(&reply.encode(), from).await;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_clocksync_corrects_first_sample() {
        let (_ctx, outlet, inlet) = pair("inlet-clocksync", &eeg("Skewed"), false).await;
        inlet.link.time.set_target(skewed_service(3600.0).await);
        inlet
            .set_postprocessing(PostProcessing::CLOCKSYNC | PostProcessing::MONOTONIZE)
            .unwrap();

        outlet.push_sample_at(&[0.0f32; 4], 1000.0, true).unwrap();
        outlet.push_sample_at(&[0.0f32; 4], 999.0, true).unwrap();

        let mut sample = [0.0f32; 4];
        let first = inlet.pull_sample(&mut sample, Duration::from_secs(5)).await.unwrap();
        assert!((first - 4600.0).abs() < 0.05, "first timestamp {}", first);
        let second = inlet.pull_sample(&mut sample, Duration::from_secs(5)).await.unwrap();
        assert!((second - 4600.0).abs() < 0.05, "second timestamp {}", second);
    }

    #[tokio::test]
    async fn test_clocksync_without_estimate_keeps_sample() {
        let (_ctx, outlet, inlet) = pair("inlet-clocksync-silent", &eeg("Mute"), false).await;
        let silent = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        inlet.link.time.set_target(silent.local_addr().unwrap());
        inlet.set_postprocessing(PostProcessing::CLOCKSYNC).unwrap();

        outlet.push_sample_at(&[0.0f32; 4], 5.0, true).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut sample = [0.0f32; 4];
        let ts = inlet
            .pull_sample(&mut sample, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(ts, 0.0);
        assert_eq!(inlet.samples_available(), 1);
    }

    #[tokio::test]
    async fn test_source_gone_before_first_connect() {
        let ctx = context("inlet-gone-early");
        let outlet = StreamOutlet::new(&ctx, &eeg("Ghost"), 0, BufferLength::default())
            .await
            .unwrap();
        let found = resolve_by_property(&ctx, "name", "Ghost", 1, 1, Duration::from_secs(5))
            .await
            .unwrap();
        drop(outlet);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let inlet = StreamInlet::new(&ctx, &found[0], BufferLength::default(), 0, false).unwrap();
        let mut sample = [0.0f32; 4];
        let err = inlet
            .pull_sample(&mut sample, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamLost);
    }

    #[tokio::test]
    async fn test_recovers_source_gone_before_first_connect() {
        let info = eeg("Lazarus");
        let ctx = context("inlet-recover-early");
        let outlet = StreamOutlet::new(&ctx, &info, 0, BufferLength::default())
            .await
            .unwrap();
        let found = resolve_by_property(&ctx, "name", "Lazarus", 1, 1, Duration::from_secs(5))
            .await
            .unwrap();
        drop(outlet);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let inlet = StreamInlet::new(&ctx, &found[0], BufferLength::default(), 0, true).unwrap();
        let restarted = StreamOutlet::new(&ctx, &info, 0, BufferLength::default())
            .await
            .unwrap();

        let mut sample = [0.0f32; 4];
        let (pulled, consumers) = tokio::join!(
            inlet.pull_sample(&mut sample, Duration::from_secs(10)),
            async {
                let attached = restarted.wait_for_consumers(Duration::from_secs(10)).await;
                restarted.push_sample_at(&[3.0f32; 4], 3.0, true).unwrap();
                attached
            }
        );
        assert!(consumers.unwrap());
        assert_eq!(pulled.unwrap(), 3.0);
        assert_eq!(sample, [3.0f32; 4]);
    }
}
