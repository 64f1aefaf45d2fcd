use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const PRUNE_THRESHOLD: usize = 4_096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub remaining: Duration,
}

/// Minimum interval between accepted submissions per identity.
///
/// Enforced by the relay independently of whatever the client's own
/// cooldown decided.
#[derive(Debug)]
pub struct IdentityRateLimiter {
    interval: Duration,
    last_accepted: Mutex<HashMap<String, Instant>>,
}

impl IdentityRateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn check_and_record(&self, identity: &str) -> Result<(), RateLimited> {
        self.check_and_record_at(identity, Instant::now())
    }

    pub fn check_and_record_at(&self, identity: &str, now: Instant) -> Result<(), RateLimited> {
        let mut last_accepted = self
            .last_accepted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if last_accepted.len() > PRUNE_THRESHOLD {
            last_accepted.retain(|_, at| now.saturating_duration_since(*at) < self.interval);
        }

        if let Some(at) = last_accepted.get(identity) {
            let elapsed = now.saturating_duration_since(*at);
            if elapsed < self.interval {
                return Err(RateLimited {
                    remaining: self.interval - elapsed,
                });
            }
        }

        last_accepted.insert(identity.to_string(), now);
        Ok(())
    }
}
