//! Clock offset estimation
//!
//! A probe wave sends several time probes to the outlet's service port:
//!
//! ```text
//! Inlet (local clock)                  Outlet (remote clock)
//!   t0 ---- LSL:timedata wave t0 ------>  t1
//!   t3 <--- wave t0 t1 t2 --------------  t2
//!
//! rtt         = (t3 - t0) - (t2 - t1)
//! offset      = ((t0 - t1) + (t3 - t2)) / 2     remote + offset = local
//! remote_time = (t1 + t2) / 2
//! ```
//!
//! The probe with the smallest round trip wins. A background task repeats the
//! wave periodically and flags a clock reset when two estimates disagree.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::context::Config;
use crate::error::{Error, Result};
use crate::protocol::constants::MAX_DATAGRAM_SIZE;
use crate::protocol::{Datagram, TimeReply};
use crate::timing::clock::local_clock;

/// Clock offset estimate of an inlet's source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeCorrection {
    /// Add to a remote timestamp to map it onto the local clock
    pub offset: f64,
    /// Remote time at which the estimate was taken
    pub remote_time: f64,
    /// Round-trip time of the winning probe (seconds)
    pub uncertainty: f64,
}

impl TimeCorrection {
    /// Local time at which the estimate was taken
    fn local_time(&self) -> f64 {
        self.remote_time + self.offset
    }

    fn from_probe(t0: f64, reply: &TimeReply, t3: f64) -> Self {
        Self {
            offset: ((t0 - reply.t1) + (t3 - reply.t2)) / 2.0,
            remote_time: (reply.t1 + reply.t2) / 2.0,
            uncertainty: (t3 - t0) - (reply.t2 - reply.t1),
        }
    }
}

/// Probe timing taken from [`Config`]
#[derive(Debug, Clone)]
pub(crate) struct ProbeSettings {
    pub count: u32,
    pub interval: Duration,
    pub max_rtt: Duration,
    pub update_interval: Duration,
    pub reset_threshold: f64,
    pub reset_offset_threshold: f64,
}

impl From<&Config> for ProbeSettings {
    fn from(config: &Config) -> Self {
        Self {
            count: config.time_probe_count.max(1),
            interval: config.time_probe_interval,
            max_rtt: config.time_probe_max_rtt,
            update_interval: config.time_update_interval,
            reset_threshold: config.clock_reset_threshold,
            reset_offset_threshold: config.clock_reset_offset_threshold,
        }
    }
}

/// Run one probe wave against `target`
///
/// Returns `None` if no reply arrived within the round-trip limit.
pub(crate) async fn probe_wave(
    socket: &UdpSocket,
    target: SocketAddr,
    settings: &ProbeSettings,
    wave_id: u32,
) -> Result<Option<TimeCorrection>> {
    let mut best: Option<TimeCorrection> = None;
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut sent = 0;
    let mut next_send = Instant::now();
    let mut end = next_send + settings.interval * settings.count + settings.max_rtt;
    let max_rtt = settings.max_rtt.as_secs_f64();

    loop {
        let now = Instant::now();
        if sent < settings.count && now >= next_send {
            let probe = Datagram::TimeProbe {
                wave_id,
                t0: local_clock(),
            };
            socket.send_to(&probe.encode(), target).await?;
            sent += 1;
            next_send += settings.interval;
            end = end.max(now + settings.max_rtt);
        }
        let wake = if sent < settings.count { next_send } else { end };
        if sent >= settings.count && now >= end {
            break;
        }

        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, _from) = received?;
                let t3 = local_clock();
                let reply = match TimeReply::parse(&buf[..len]) {
                    Ok(r) if r.wave_id == wave_id => r,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::trace!(error = %e, "Ignoring malformed time reply");
                        continue;
                    }
                };
                let estimate = TimeCorrection::from_probe(reply.t0, &reply, t3);
                if estimate.uncertainty > max_rtt {
                    continue;
                }
                if best.map(|b| estimate.uncertainty < b.uncertainty).unwrap_or(true) {
                    best = Some(estimate);
                }
            }
            _ = tokio::time::sleep_until(wake) => {}
        }
    }

    Ok(best)
}

#[derive(Debug, Default)]
struct EstimateState {
    current: Option<TimeCorrection>,
    was_reset: bool,
    /// Bumped on every reset, never cleared
    generation: u64,
}

/// Per-inlet time-correction state with a background updater
pub(crate) struct TimeReceiver {
    settings: ProbeSettings,
    target: Mutex<Option<SocketAddr>>,
    state: Mutex<EstimateState>,
    updated: Notify,
    updater: Mutex<Option<JoinHandle<()>>>,
    next_wave: AtomicU32,
}

impl TimeReceiver {
    pub(crate) fn new(settings: ProbeSettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            target: Mutex::new(None),
            state: Mutex::new(EstimateState::default()),
            updated: Notify::new(),
            updater: Mutex::new(None),
            next_wave: AtomicU32::new(1),
        })
    }

    /// Point probes at a (new) service address
    pub(crate) fn set_target(&self, addr: SocketAddr) {
        *self.target.lock() = Some(addr);
    }

    /// Latest estimate without waiting
    pub(crate) fn current(&self) -> Option<TimeCorrection> {
        self.state.lock().current
    }

    /// Latest estimate and the reset generation it belongs to
    pub(crate) fn snapshot(&self) -> (Option<TimeCorrection>, u64) {
        let state = self.state.lock();
        (state.current, state.generation)
    }

    /// Discard the estimate and raise the reset flag (source changed)
    pub(crate) fn force_reset(&self) {
        let mut state = self.state.lock();
        state.current = None;
        state.was_reset = true;
        state.generation += 1;
    }

    /// Return and clear the reset flag
    pub(crate) fn take_reset(&self) -> bool {
        std::mem::take(&mut self.state.lock().was_reset)
    }

    /// Wait for an estimate, starting the updater if needed
    pub(crate) async fn time_correction(self: &Arc<Self>, timeout: Duration) -> Result<TimeCorrection> {
        self.ensure_updater();
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(|| Instant::now() + crate::protocol::constants::FOREVER);

        loop {
            let notified = self.updated.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(c) = self.current() {
                return Ok(c);
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    /// Start the background updater unless it is already running
    pub(crate) fn ensure_updater(self: &Arc<Self>) {
        let mut updater = self.updater.lock();
        if updater.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }
        let weak = Arc::downgrade(self);
        *updater = Some(tokio::spawn(update_loop(weak)));
    }

    fn apply(&self, estimate: TimeCorrection) {
        {
            let mut state = self.state.lock();
            if let Some(prev) = state.current {
                let remote_advance = estimate.remote_time - prev.remote_time;
                let local_advance = estimate.local_time() - prev.local_time();
                if (remote_advance - local_advance).abs() > self.settings.reset_threshold
                    || (estimate.offset - prev.offset).abs() > self.settings.reset_offset_threshold
                {
                    tracing::info!(
                        offset = estimate.offset,
                        previous = prev.offset,
                        "Clock reset detected"
                    );
                    state.was_reset = true;
                    state.generation += 1;
                }
            }
            state.current = Some(estimate);
        }
        self.updated.notify_waiters();
    }

    /// Stop the background updater
    pub(crate) fn stop(&self) {
        if let Some(handle) = self.updater.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for TimeReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn update_loop(receiver: Weak<TimeReceiver>) {
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to bind time probe socket");
            return;
        }
    };

    loop {
        let Some(this) = receiver.upgrade() else {
            return;
        };
        let target = *this.target.lock();
        let settings = this.settings.clone();
        let wave_id = this.next_wave.fetch_add(1, Ordering::Relaxed);
        drop(this);

        let mut pause = settings.update_interval;
        if let Some(target) = target {
            match probe_wave(&socket, target, &settings, wave_id).await {
                Ok(Some(estimate)) => {
                    tracing::trace!(
                        offset = estimate.offset,
                        rtt = estimate.uncertainty,
                        "Time correction updated"
                    );
                    if let Some(this) = receiver.upgrade() {
                        this.apply(estimate);
                    }
                }
                Ok(None) => {
                    tracing::debug!(target = %target, "No time probe replies");
                    pause = pause.min(settings.interval * settings.count);
                }
                Err(e) => {
                    tracing::debug!(target = %target, error = %e, "Time probe wave failed");
                    pause = pause.min(settings.interval * settings.count);
                }
            }
        } else {
            pause = settings.interval;
        }

        tokio::time::sleep(pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers time probes as if its clock ran `skew` seconds behind
    async fn skewed_responder(skew: f64) -> SocketAddr {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                    return;
                };
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

    fn fast_settings() -> ProbeSettings {
        ProbeSettings {
            count: 4,
            interval: Duration::from_millis(5),
            max_rtt: Duration::from_millis(200),
            update_interval: Duration::from_millis(50),
            reset_threshold: 5.0,
            reset_offset_threshold: 1.0,
        }
    }

    #[test]
    fn test_probe_formula() {
        let reply = TimeReply {
            wave_id: 1,
            t0: 100.0,
            t1: 50.01,
            t2: 50.02,
        };
        let c = TimeCorrection::from_probe(100.0, &reply, 100.04);
        assert!((c.offset - 49.995).abs() < 1e-9);
        assert!((c.remote_time - 50.015).abs() < 1e-9);
        assert!((c.uncertainty - 0.03).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_probe_wave_on_loopback() {
        let target = skewed_responder(10.0).await;
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let estimate = probe_wave(&socket, target, &fast_settings(), 3)
            .await
            .unwrap()
            .expect("loopback responder should answer");

        assert!((estimate.offset - 10.0).abs() < 0.01, "offset {}", estimate.offset);
        assert!(estimate.uncertainty >= 0.0 && estimate.uncertainty < 0.2);
    }

    #[tokio::test]
    async fn test_receiver_times_out_without_target() {
        let receiver = TimeReceiver::new(fast_settings());
        let err = receiver
            .time_correction(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_receiver_updates_and_detects_reset() {
        let receiver = TimeReceiver::new(fast_settings());
        receiver.set_target(skewed_responder(0.0).await);

        let first = receiver.time_correction(Duration::from_secs(5)).await.unwrap();
        assert!(first.offset.abs() < 0.01);
        assert!(!receiver.take_reset());

        // The source's clock jumps by an hour
        receiver.set_target(skewed_responder(3600.0).await);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !receiver.take_reset() {
            assert!(Instant::now() < deadline, "reset was not detected");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let c = receiver.current().unwrap();
        assert!((c.offset - 3600.0).abs() < 0.01);

        let (_, generation) = receiver.snapshot();
        receiver.force_reset();
        assert!(receiver.current().is_none());
        assert_eq!(receiver.snapshot().1, generation + 1);
        assert!(receiver.take_reset());
        assert!(!receiver.take_reset());
        receiver.stop();
    }
}
