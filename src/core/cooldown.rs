//! Local minimum interval between check-ins for one identity.
//!
//! This is advisory; the relay applies its own per-identity limit.

use super::events::ClientEvent;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const TICK: Duration = Duration::from_secs(1);

/// Longest cooldown accepted from configuration: one week.
pub const MAX_COOLDOWN_MINUTES: f64 = 7.0 * 24.0 * 60.0;

/// Convert a configured cooldown in minutes, clamped to
/// `0..=MAX_COOLDOWN_MINUTES`. NaN counts as no cooldown.
pub fn period_from_minutes(minutes: f64) -> Duration {
    if minutes.is_nan() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(minutes.clamp(0.0, MAX_COOLDOWN_MINUTES) * 60.0)
}

#[derive(Debug, Clone)]
pub struct CooldownGate {
    period: Duration,
    last_submission: Option<DateTime<Utc>>,
}

impl CooldownGate {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_submission: None,
        }
    }

    pub fn from_minutes(minutes: f64) -> Self {
        Self::new(period_from_minutes(minutes))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn can_submit(&self) -> bool {
        self.can_submit_at(Utc::now())
    }

    pub fn can_submit_at(&self, now: DateTime<Utc>) -> bool {
        self.remaining_at(now).is_zero()
    }

    pub fn remaining(&self) -> Duration {
        self.remaining_at(Utc::now())
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        let Some(last) = self.last_submission else {
            return Duration::ZERO;
        };
        // A clock that moved backwards counts as no time elapsed.
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        self.period.saturating_sub(elapsed)
    }

    /// Record a submission. Called as soon as it is sent, not on relay ack.
    pub fn record(&mut self) {
        self.record_at(Utc::now());
    }

    pub fn record_at(&mut self, at: DateTime<Utc>) {
        self.last_submission = Some(at);
    }
}

/// `m s`-style rendering, rounded up so a running cooldown never shows `0s`.
pub fn format_remaining(remaining: Duration) -> String {
    let mut secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs += 1;
    }
    format!("{}m {}s", secs / 60, secs % 60)
}

/// Emit [`ClientEvent::CooldownTick`] once a second until the cooldown
/// reaches zero, then stop.
pub async fn run_ticker(
    gate: Arc<Mutex<CooldownGate>>,
    events: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
) {
    let remaining = gate
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .remaining();
    let deadline = tokio::time::Instant::now() + remaining;
    let mut interval = tokio::time::interval(TICK);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if events
            .send(ClientEvent::CooldownTick { remaining })
            .await
            .is_err()
        {
            return;
        }
        if remaining.is_zero() {
            return;
        }
    }
}
