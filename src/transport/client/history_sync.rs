//! Decides when the initial history after a (re)connect is complete.
//!
//! Relays that send `history_end` finish it explicitly. Otherwise it is an
//! approximation: complete once no check-in has arrived for the idle window,
//! or at the ceiling, whichever comes first.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Inactive,
    Receiving {
        ceiling: Instant,
        idle_deadline: Option<Instant>,
        received: usize,
    },
    Complete,
}

#[derive(Debug, Clone)]
pub struct HistorySync {
    idle: Duration,
    ceiling: Duration,
    phase: Phase,
}

impl HistorySync {
    pub fn new(idle: Duration, ceiling: Duration) -> Self {
        Self {
            idle,
            ceiling,
            phase: Phase::Inactive,
        }
    }

    /// Start waiting for history, on transport open.
    pub fn begin(&mut self, now: Instant) {
        self.phase = Phase::Receiving {
            ceiling: now + self.ceiling,
            idle_deadline: None,
            received: 0,
        };
    }

    /// A check-in arrived; restarts the idle window while receiving.
    pub fn record(&mut self, now: Instant) {
        if let Phase::Receiving {
            idle_deadline,
            received,
            ..
        } = &mut self.phase
        {
            *idle_deadline = Some(now + self.idle);
            *received += 1;
        }
    }

    /// Next instant [`Self::poll`] should run, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Receiving {
                ceiling,
                idle_deadline,
                ..
            } => Some(idle_deadline.map_or(ceiling, |idle| idle.min(ceiling))),
            Phase::Inactive | Phase::Complete => None,
        }
    }

    /// Completes history if a deadline has passed. Returns the number of
    /// check-ins received, exactly once per [`Self::begin`].
    pub fn poll(&mut self, now: Instant) -> Option<usize> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        self.finish()
    }

    /// Explicit end of history.
    pub fn finish(&mut self) -> Option<usize> {
        if let Phase::Receiving { received, .. } = self.phase {
            self.phase = Phase::Complete;
            Some(received)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Inactive;
    }

    pub fn is_receiving(&self) -> bool {
        matches!(self.phase, Phase::Receiving { .. })
    }
}
