//! Reconnect backoff and cancellable timers.
//!
//! Every piece of scheduled future work (reconnect delay, heartbeat interval,
//! heartbeat timeout) lives in a [`TimerSlot`]. Arming a slot cancels whatever
//! it held before, and the fired [`Signal`] carries the epoch it was armed in
//! so the manager can discard anything that outlived its connection.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use livewire_protocol::constants::{RECONNECT_MAX_DELAY, RECONNECT_MAX_JITTER};

use crate::manager::Signal;

/// Exponential backoff with a cap and additive jitter.
#[derive(Debug, Clone)]
pub(crate) struct ReconnectPolicy {
    pub(crate) base_delay: Duration,
    pub(crate) max_delay: Duration,
    pub(crate) max_jitter: Duration,
}

impl ReconnectPolicy {
    pub(crate) fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: RECONNECT_MAX_DELAY,
            max_jitter: RECONNECT_MAX_JITTER,
        }
    }

    /// Delay before attempt `attempt` (1-based), without jitter:
    /// `min(base * 2^(attempt-1), max_delay)`.
    pub(crate) fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before attempt `attempt`, plus jitter in `[0, max_jitter)`.
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}

/// Holder for one logical timer.
#[derive(Default)]
pub(crate) struct TimerSlot {
    cancel: Option<CancellationToken>,
}

impl TimerSlot {
    /// Fires `signal` once after `delay`. Cancels the previous timer first.
    pub(crate) fn arm_once(
        &mut self,
        delay: Duration,
        signals: &mpsc::UnboundedSender<Signal>,
        signal: Signal,
    ) {
        self.cancel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let signals = signals.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = signals.send(signal);
                }
            }
        });
        self.cancel = Some(cancel);
    }

    /// Fires a signal built by `make` every `period`, first one after one
    /// full period. Cancels the previous timer first.
    pub(crate) fn arm_every<F>(
        &mut self,
        period: Duration,
        signals: &mpsc::UnboundedSender<Signal>,
        make: F,
    ) where
        F: Fn() -> Signal + Send + 'static,
    {
        self.cancel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let signals = signals.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // Skip immediate first tick.
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if signals.send(make()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        self.cancel = Some(cancel);
    }

    /// Cancels the timer, if any.
    pub(crate) fn cancel(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
    }

    /// Returns `true` while a timer is held (armed and not yet cancelled or
    /// acknowledged by the manager).
    pub(crate) fn is_armed(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
