//! Replay protection for signed check-ins.
//!
//! A signature is remembered until its signing timestamp falls out of the
//! freshness window; past that point the freshness check rejects it anyway.
//! In-memory only, resets on restart.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sweep expired signatures once the table grows past this.
const SWEEP_THRESHOLD: usize = 10_000;

pub struct ReplayGuard {
    window: Duration,
    first_seen: Mutex<HashMap<String, Instant>>,
}

impl ReplayGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            first_seen: Mutex::new(HashMap::new()),
        }
    }

    /// `true` the first time `signature` is presented inside the window.
    pub fn check_and_record(&self, signature: &str) -> bool {
        self.check_and_record_at(signature, Instant::now())
    }

    pub fn check_and_record_at(&self, signature: &str, now: Instant) -> bool {
        let mut first_seen = self
            .first_seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if first_seen.len() >= SWEEP_THRESHOLD {
            let window = self.window;
            first_seen.retain(|_, at| now.saturating_duration_since(*at) < window);
        }

        match first_seen.get(signature) {
            Some(at) if now.saturating_duration_since(*at) < self.window => false,
            _ => {
                first_seen.insert(signature.to_string(), now);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.first_seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ReplayGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayGuard")
            .field("window", &self.window)
            .field("tracked", &self.len())
            .finish()
    }
}
