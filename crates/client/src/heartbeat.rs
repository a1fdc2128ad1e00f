//! Application-level liveness probing.
//!
//! Per connection epoch the monitor is either idle or awaiting exactly one
//! pong. The manager owns the writer, so the monitor only decides *when* a
//! probe goes out and whether an acknowledgement matches; the manager writes
//! the frames.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::manager::Signal;
use crate::reconnection::TimerSlot;

/// The single outstanding probe of the current epoch.
#[derive(Debug, Clone)]
pub(crate) struct PendingHeartbeat {
    pub(crate) probe_id: String,
    pub(crate) sent_at: Instant,
}

pub(crate) struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    pending: Option<PendingHeartbeat>,
    interval_timer: TimerSlot,
    timeout_timer: TimerSlot,
    last_rtt: Option<Duration>,
}

impl HeartbeatMonitor {
    pub(crate) fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            pending: None,
            interval_timer: TimerSlot::default(),
            timeout_timer: TimerSlot::default(),
            last_rtt: None,
        }
    }

    /// Starts probing for a fresh epoch. Anything left from a prior epoch is
    /// cancelled before the new interval timer is armed.
    pub(crate) fn start(&mut self, epoch: u64, signals: &mpsc::UnboundedSender<Signal>) {
        self.stop();
        self.interval_timer
            .arm_every(self.interval, signals, move || Signal::HeartbeatTick { epoch });
        debug!(epoch, interval_ms = self.interval.as_millis() as u64, "heartbeat started");
    }

    /// Cancels both timers and returns to idle.
    pub(crate) fn stop(&mut self) {
        self.interval_timer.cancel();
        self.timeout_timer.cancel();
        self.pending = None;
    }

    /// Opens a new probe if idle and returns its id. Returns `None` while a
    /// probe is still outstanding.
    pub(crate) fn begin_probe(&mut self) -> Option<String> {
        if self.pending.is_some() {
            trace!("previous probe still outstanding, skipping tick");
            return None;
        }
        let probe_id = uuid::Uuid::new_v4().to_string();
        self.pending = Some(PendingHeartbeat {
            probe_id: probe_id.clone(),
            sent_at: Instant::now(),
        });
        Some(probe_id)
    }

    /// Starts the timeout for the probe just written.
    pub(crate) fn arm_timeout(&mut self, epoch: u64, signals: &mpsc::UnboundedSender<Signal>) {
        let Some(pending) = &self.pending else {
            return;
        };
        let signal = Signal::HeartbeatTimeout {
            epoch,
            probe_id: pending.probe_id.clone(),
        };
        self.timeout_timer.arm_once(self.timeout, signals, signal);
    }

    /// Handles an inbound pong. Only the outstanding probe id counts; stale
    /// or mismatched ids leave the timeout running.
    pub(crate) fn acknowledge(&mut self, probe_id: &str) -> bool {
        match &self.pending {
            Some(pending) if pending.probe_id == probe_id => {
                let rtt = pending.sent_at.elapsed();
                self.timeout_timer.cancel();
                self.pending = None;
                self.last_rtt = Some(rtt);
                trace!(rtt_ms = rtt.as_millis() as u64, "heartbeat acknowledged");
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if `probe_id` is the probe still awaiting its pong.
    pub(crate) fn is_awaiting(&self, probe_id: &str) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| p.probe_id == probe_id)
    }

    pub(crate) fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(Duration::from_secs(1), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn one_probe_outstanding_at_a_time() {
        let mut hb = monitor();
        let first = hb.begin_probe().unwrap();
        assert!(hb.is_awaiting(&first));
        assert!(hb.begin_probe().is_none());

        assert!(hb.acknowledge(&first));
        let second = hb.begin_probe().unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn mismatched_pong_is_ignored() {
        let mut hb = monitor();
        let probe = hb.begin_probe().unwrap();
        assert!(!hb.acknowledge("some-other-probe"));
        assert!(hb.is_awaiting(&probe));
        assert!(hb.last_rtt().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_pong_does_not_cancel_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut hb = monitor();
        let probe = hb.begin_probe().unwrap();
        hb.arm_timeout(3, &tx);

        assert!(!hb.acknowledge("stale"));
        let signal = rx.recv().await.unwrap();
        match signal {
            Signal::HeartbeatTimeout { epoch, probe_id } => {
                assert_eq!(epoch, 3);
                assert_eq!(probe_id, probe);
            }
            _ => panic!("expected heartbeat timeout"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn matching_pong_cancels_timeout_and_records_rtt() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut hb = monitor();
        let probe = hb.begin_probe().unwrap();
        hb.arm_timeout(1, &tx);

        tokio::time::advance(Duration::from_millis(120)).await;
        assert!(hb.acknowledge(&probe));
        assert_eq!(hb.last_rtt(), Some(Duration::from_millis(120)));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_discards_previous_epoch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut hb = monitor();
        hb.start(1, &tx);
        let probe = hb.begin_probe().unwrap();
        hb.arm_timeout(1, &tx);

        hb.start(2, &tx);
        assert!(!hb.is_awaiting(&probe));

        // Only epoch-2 ticks arrive; the epoch-1 timeout was cancelled.
        for _ in 0..3 {
            match rx.recv().await.unwrap() {
                Signal::HeartbeatTick { epoch } => assert_eq!(epoch, 2),
                _ => panic!("unexpected signal from a previous epoch"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_everything() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut hb = monitor();
        hb.start(1, &tx);
        hb.begin_probe().unwrap();
        hb.arm_timeout(1, &tx);
        hb.stop();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
