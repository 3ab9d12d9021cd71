//! Single in-flight reconnect timer.
//!
//! Every disconnect path funnels into [`ReconnectTimer::schedule`]. While a
//! reconnect is armed further disconnect signals are ignored, so a burst of
//! disconnect events (logged-off packet followed by socket EOF, for example)
//! produces exactly one reconnect attempt.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use tokio::time::Instant;

/// Configuration for reconnect delays.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt after a disconnect.
    pub delay: Duration,
    /// Upper bound for the delay when `multiplier` is above 1.0.
    pub max_delay: Duration,
    /// Multiplier for each successive attempt (1.0 = fixed delay).
    pub multiplier: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            multiplier: 1.0,
        }
    }
}

impl ReconnectConfig {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(self.delay)
            .with_max_delay(self.max_delay.max(self.delay))
            .with_factor(self.multiplier)
            .without_max_times()
            .build()
    }
}

/// Cancellable reconnect timer with at most one pending deadline.
pub struct ReconnectTimer {
    config: ReconnectConfig,
    backoff: ExponentialBackoff,
    deadline: Option<Instant>,
    scheduled_total: u64,
}

impl ReconnectTimer {
    pub fn new(config: ReconnectConfig) -> Self {
        let backoff = config.backoff();
        Self {
            config,
            backoff,
            deadline: None,
            scheduled_total: 0,
        }
    }

    /// Arm the timer with the next backoff delay.
    ///
    /// Returns `false` if a reconnect is already pending.
    pub fn schedule(&mut self) -> bool {
        let delay = self.backoff.next().unwrap_or(self.config.max_delay);
        self.schedule_in(delay)
    }

    /// Arm the timer with an explicit delay.
    ///
    /// Returns `false` if a reconnect is already pending.
    pub fn schedule_in(&mut self, delay: Duration) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(Instant::now() + delay);
        self.scheduled_total += 1;
        true
    }

    /// Replace any pending deadline with an immediate attempt.
    pub fn reschedule_now(&mut self) {
        self.cancel();
        self.schedule_in(Duration::ZERO);
    }

    /// Clear the pending deadline, if any.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Reset backoff after a successful logon.
    pub fn reset(&mut self) {
        self.backoff = self.config.backoff();
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Total number of reconnects scheduled over the timer's lifetime.
    pub fn scheduled_total(&self) -> u64 {
        self.scheduled_total
    }

    /// Wait until the pending deadline fires and disarm the timer.
    ///
    /// Never resolves while nothing is scheduled. Cancel safe: dropping the
    /// future keeps the deadline armed.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
