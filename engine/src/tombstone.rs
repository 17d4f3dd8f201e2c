//! Tombstone ledger: which records were deleted locally, and when.
//!
//! A remote snapshot fetched before the remote processed a delete still
//! contains the deleted record. The ledger stops such a snapshot from
//! resurrecting it, for a bounded retention window.

use crate::{RecordId, Timestamp};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tombstones older than this are pruned.
pub const RETENTION_DAYS: i64 = 45;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TombstoneLedger {
    entries: BTreeMap<RecordId, Timestamp>,
}

impl TombstoneLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `id` was deleted at `at`. A later deletion replaces an
    /// earlier one.
    pub fn remember(&mut self, id: impl Into<RecordId>, at: Timestamp) {
        let id = id.into();
        if id.is_empty() {
            return;
        }
        self.entries
            .entry(id)
            .and_modify(|existing| *existing = (*existing).max(at))
            .or_insert(at);
    }

    /// Forget a tombstone. Returns whether one existed.
    pub fn clear(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Drop entries older than the retention window. Returns how many were
    /// dropped.
    pub fn prune(&mut self, now: Timestamp) -> usize {
        let cutoff = now - Duration::days(RETENTION_DAYS);
        let before = self.entries.len();
        self.entries.retain(|_, deleted_at| *deleted_at >= cutoff);
        before - self.entries.len()
    }

    /// Whether `id` is deleted as of a record copy carrying `record_instant`:
    /// true iff a tombstone exists and the copy is not newer than it. A copy
    /// without an instant is never newer.
    pub fn is_deleted_as_of(&self, id: &str, record_instant: Option<Timestamp>) -> bool {
        match (self.entries.get(id), record_instant) {
            (Some(deleted_at), Some(at)) => *deleted_at >= at,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn deleted_at(&self, id: &str) -> Option<Timestamp> {
        self.entries.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordId, &Timestamp)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
