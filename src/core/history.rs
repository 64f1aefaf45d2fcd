//! Reconciliation buffer holding the latest known check-in per identity.
//!
//! Arrival order across connections is not trusted: an entry is replaced
//! only by a strictly newer timestamp, so the retained entry for an identity
//! is always the maximum-timestamp one seen so far.

use super::checkin::CheckIn;
use std::collections::HashMap;

/// Default bound on retained identities.
pub const DEFAULT_MAX_HISTORY_SIZE: usize = 100;

/// A retained check-in plus its confirmation status.
///
/// `pending` entries are local echoes that the relay has not broadcast back
/// yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub check_in: CheckIn,
    pub pending: bool,
}

/// What an upsert did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// A relay echo confirmed a pending local entry with the same timestamp.
    Confirmed,
    /// Not newer than the retained entry, or evicted immediately for being
    /// the oldest when the buffer is full.
    Discarded,
}

impl UpsertOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, Self::Discarded)
    }
}

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: HashMap<String, HistoryEntry>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Apply a confirmed check-in. Returns whether the buffer changed.
    pub fn upsert(&mut self, check_in: CheckIn) -> bool {
        self.apply(check_in, false).changed()
    }

    /// Apply a local echo that the relay has not confirmed yet.
    pub fn upsert_pending(&mut self, check_in: CheckIn) -> bool {
        self.apply(check_in, true).changed()
    }

    pub fn apply(&mut self, check_in: CheckIn, pending: bool) -> UpsertOutcome {
        if let Some(existing) = self.entries.get_mut(&check_in.identity) {
            let current = existing.check_in.timestamp;
            if check_in.timestamp > current {
                *existing = HistoryEntry { check_in, pending };
                return UpsertOutcome::Replaced;
            }
            if check_in.timestamp == current && existing.pending && !pending {
                *existing = HistoryEntry {
                    check_in,
                    pending: false,
                };
                return UpsertOutcome::Confirmed;
            }
            return UpsertOutcome::Discarded;
        }

        let identity = check_in.identity.clone();
        self.entries
            .insert(identity.clone(), HistoryEntry { check_in, pending });

        if self.entries.len() > self.capacity
            && let Some(evicted) = self.oldest_identity()
        {
            self.entries.remove(&evicted);
            if evicted == identity {
                return UpsertOutcome::Discarded;
            }
            tracing::debug!(identity = %evicted, "evicted oldest check-in from history");
        }
        UpsertOutcome::Inserted
    }

    /// All retained entries, newest first. Recomputed on every call.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            b.check_in
                .timestamp
                .cmp(&a.check_in.timestamp)
                .then_with(|| a.check_in.identity.cmp(&b.check_in.identity))
        });
        entries
    }

    /// Confirmed check-ins, oldest first, for replaying to a peer.
    pub fn replay_order(&self) -> Vec<CheckIn> {
        let mut replay: Vec<CheckIn> = self
            .snapshot()
            .into_iter()
            .filter(|entry| !entry.pending)
            .map(|entry| entry.check_in)
            .collect();
        replay.reverse();
        replay
    }

    pub fn get(&self, identity: &str) -> Option<&HistoryEntry> {
        self.entries.get(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn oldest_identity(&self) -> Option<String> {
        self.entries
            .values()
            .min_by(|a, b| {
                a.check_in
                    .timestamp
                    .cmp(&b.check_in.timestamp)
                    .then_with(|| b.check_in.identity.cmp(&a.check_in.identity))
            })
            .map(|entry| entry.check_in.identity.clone())
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY_SIZE)
    }
}
