//! Per-sheet sync metadata.
//!
//! The remembered id set is the only way to notice that another device
//! deleted something: an id present last time and missing now was removed.

use crate::{clock, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncMetadata {
    /// At least one reconciliation has completed
    pub initialized: bool,
    /// Ids the remote reported at the last reconciliation
    pub known_remote_ids: BTreeSet<RecordId>,
    /// Latest remote modification instant already incorporated
    pub watermark: Option<Timestamp>,
}

impl SyncMetadata {
    /// A delta fetch is only safe once a full one has populated the id set.
    pub fn needs_full_fetch(&self) -> bool {
        !self.initialized || self.watermark.is_none()
    }

    /// Move the watermark forward; it never goes back.
    pub fn advance_watermark(&mut self, candidate: Option<Timestamp>) {
        self.watermark = match (self.watermark, candidate) {
            (Some(current), Some(next)) => Some(current.max(next)),
            (current, next) => current.or(next),
        };
    }

    /// The watermark as sent in `updatedAfter`.
    pub fn watermark_param(&self) -> Option<String> {
        self.watermark.map(clock::format_instant)
    }

    /// Whether a remote staleness probe shows nothing new since the last
    /// reconciliation.
    pub fn is_current(&self, remote_updated_at: Option<Timestamp>, remote_row_count: usize) -> bool {
        if self.needs_full_fetch() || remote_row_count != self.known_remote_ids.len() {
            return false;
        }
        match (remote_updated_at, self.watermark) {
            (Some(remote), Some(watermark)) => remote <= watermark,
            _ => false,
        }
    }
}
