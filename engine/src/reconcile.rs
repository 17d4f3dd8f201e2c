//! Reconciliation of the local history against a remote snapshot.
//!
//! Given the local records, a fetched remote snapshot, the outbox, the
//! tombstone ledger and the sheet's sync metadata, this module produces the
//! merged history and the updated ledger and metadata. It is pure: the same
//! inputs always produce the same outputs, and nothing is written until the
//! caller persists the [`ReconcileOutput`].
//!
//! # Algorithm
//!
//! 1. Collapse local duplicates (by id, newest first; by fingerprint for
//!    id-less legacy rows)
//! 2. Merge remote records, last-writer-wins on the derived instant
//! 3. Diff the remote id set against the previously known one to find
//!    deletions made on other devices
//! 4. Clear tombstones that a newer remote copy has revived
//! 5. Advance the sync metadata

use crate::outbox::{Outbox, Sheet};
use crate::{clock, HistoryRecord, RecordId, SyncMetadata, Timestamp, TombstoneLedger};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Stage of a sync cycle. Stages run strictly in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    Idle,
    Flushing,
    Fetching,
    Merging,
    DiffingDeletes,
    Persisting,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Flushing => "flushing",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Merging => "merging",
            SyncPhase::DiffingDeletes => "diffing-deletes",
            SyncPhase::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

/// Whether a remote snapshot holds every record or only recent changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    #[default]
    Full,
    Delta,
}

/// A sanitized remote answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub records: Vec<HistoryRecord>,
    /// Every id the remote holds; `None` when a delta omitted the list
    pub remote_ids: Option<BTreeSet<RecordId>>,
    /// Remote-reported latest modification
    pub last_updated_at: Option<Timestamp>,
    pub mode: FetchMode,
}

impl RemoteSnapshot {
    /// A full snapshot: the id set is exactly the ids of its records.
    pub fn full(records: Vec<HistoryRecord>) -> Self {
        let remote_ids = records
            .iter()
            .filter(|r| r.has_id())
            .map(|r| r.id.clone())
            .collect();
        Self {
            records,
            remote_ids: Some(remote_ids),
            last_updated_at: None,
            mode: FetchMode::Full,
        }
    }

    pub fn delta(
        records: Vec<HistoryRecord>,
        remote_ids: Option<BTreeSet<RecordId>>,
        last_updated_at: Option<Timestamp>,
    ) -> Self {
        Self {
            records,
            remote_ids,
            last_updated_at,
            mode: FetchMode::Delta,
        }
    }

    pub fn with_last_updated_at(mut self, at: Option<Timestamp>) -> Self {
        self.last_updated_at = at;
        self
    }

    /// Newest `updated_at` among the records.
    pub fn newest_record_instant(&self) -> Option<Timestamp> {
        self.records
            .iter()
            .filter_map(|r| clock::parse_instant(&r.updated_at))
            .max()
    }
}

/// How a same-id conflict was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictResolution {
    LocalWins,
    RemoteWins,
    /// Equal instants: remote copy with local non-empty fields on top
    Merged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub record_id: RecordId,
    pub resolution: ConflictResolution,
}

/// What a reconciliation did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    /// Remote records appended locally
    pub added: usize,
    /// Same-id records settled by last-writer-wins
    pub conflicts: Vec<Conflict>,
    /// Remote records not appended because they were deleted locally
    pub suppressed: usize,
    /// Duplicates collapsed (local ids or legacy fingerprints)
    pub deduplicated: usize,
    /// Local records removed because another device deleted them
    pub deleted_remote: usize,
    /// Remote deletions ignored because a local write is pending
    pub kept_pending: usize,
    /// Tombstones cleared by a newer remote copy
    pub revived: usize,
    /// The empty-remote guard skipped the deletion diff
    pub deletion_guard_tripped: bool,
}

impl ReconcileResult {
    pub fn count(&self, resolution: ConflictResolution) -> usize {
        self.conflicts
            .iter()
            .filter(|c| c.resolution == resolution)
            .count()
    }

    /// Whether the local history changed.
    pub fn has_changes(&self) -> bool {
        self.added > 0
            || self.deduplicated > 0
            || self.deleted_remote > 0
            || self
                .conflicts
                .iter()
                .any(|c| c.resolution != ConflictResolution::LocalWins)
    }
}

/// Everything a reconciliation needs.
#[derive(Debug)]
pub struct ReconcileInput<'a> {
    pub local: Vec<HistoryRecord>,
    pub remote: RemoteSnapshot,
    pub outbox: &'a Outbox,
    pub tombstones: TombstoneLedger,
    pub metadata: SyncMetadata,
    pub now: Timestamp,
}

/// The state to persist after a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutput {
    pub history: Vec<HistoryRecord>,
    pub tombstones: TombstoneLedger,
    pub metadata: SyncMetadata,
    pub result: ReconcileResult,
}

/// Merges one remote snapshot into the local history.
pub struct Reconciler<'a> {
    outbox: &'a Outbox,
    tombstones: TombstoneLedger,
    now: Timestamp,
    result: ReconcileResult,
}

impl<'a> Reconciler<'a> {
    pub fn new(outbox: &'a Outbox, tombstones: TombstoneLedger, now: Timestamp) -> Self {
        Self {
            outbox,
            tombstones,
            now,
            result: ReconcileResult::default(),
        }
    }

    /// Last-writer-wins merge of remote records into the local set.
    pub fn merge(
        &mut self,
        local: Vec<HistoryRecord>,
        remote: &[HistoryRecord],
    ) -> Vec<HistoryRecord> {
        let mut merged = self.collapse_local(local);
        let mut by_id: HashMap<RecordId, usize> = HashMap::new();
        let mut fingerprints: HashSet<String> = HashSet::new();
        for (idx, record) in merged.iter().enumerate() {
            if record.has_id() {
                by_id.insert(record.id.clone(), idx);
            }
            fingerprints.insert(record.fingerprint());
        }

        for incoming in remote {
            if !incoming.has_id() {
                if fingerprints.insert(incoming.fingerprint()) {
                    merged.push(incoming.clone());
                    self.result.added += 1;
                } else {
                    self.result.deduplicated += 1;
                }
                continue;
            }

            match by_id.get(&incoming.id) {
                Some(&idx) => {
                    let resolution = resolve(&mut merged[idx], incoming);
                    self.result.conflicts.push(Conflict {
                        record_id: incoming.id.clone(),
                        resolution,
                    });
                }
                None if self.is_locally_deleted(incoming) => {
                    self.result.suppressed += 1;
                }
                None => {
                    by_id.insert(incoming.id.clone(), merged.len());
                    fingerprints.insert(incoming.fingerprint());
                    merged.push(incoming.clone());
                    self.result.added += 1;
                }
            }
        }

        merged
    }

    /// Remove local records that disappeared from the remote since the last
    /// reconciliation. Returns the surviving records and the id set to
    /// remember.
    pub fn diff_deletes(
        &mut self,
        merged: Vec<HistoryRecord>,
        previous: &BTreeSet<RecordId>,
        current: Option<&BTreeSet<RecordId>>,
    ) -> (Vec<HistoryRecord>, BTreeSet<RecordId>) {
        let Some(current) = current else {
            // a delta without an id list cannot reveal deletions
            return (merged, previous.clone());
        };

        if !previous.is_empty() && current.is_empty() {
            tracing::warn!(
                previously_known = previous.len(),
                "remote reported no records, skipping deletion diff"
            );
            self.result.deletion_guard_tripped = true;
            return (merged, previous.clone());
        }

        let mut removed: HashSet<&str> = HashSet::new();
        for id in previous.difference(current) {
            if self.outbox.has_pending_write(Sheet::History, id) {
                self.result.kept_pending += 1;
            } else {
                removed.insert(id.as_str());
            }
        }

        let survivors: Vec<_> = merged
            .into_iter()
            .filter(|record| {
                if record.has_id() && removed.contains(record.id.as_str()) {
                    self.tombstones.remember(record.id.clone(), self.now);
                    self.result.deleted_remote += 1;
                    false
                } else {
                    true
                }
            })
            .collect();

        (survivors, current.clone())
    }

    /// Clear tombstones whose remote copy is strictly newer than the
    /// deletion, then hand back the ledger and the result.
    pub fn finish(mut self, remote: &[HistoryRecord]) -> (TombstoneLedger, ReconcileResult) {
        for record in remote.iter().filter(|r| r.has_id()) {
            let Some(deleted_at) = self.tombstones.deleted_at(&record.id) else {
                continue;
            };
            if self.outbox.has_pending_delete(Sheet::History, &record.id) {
                continue;
            }
            if record.derived_instant().is_some_and(|at| at > deleted_at) {
                self.tombstones.clear(&record.id);
                self.result.revived += 1;
            }
        }
        (self.tombstones, self.result)
    }

    fn is_locally_deleted(&self, record: &HistoryRecord) -> bool {
        self.outbox.has_pending_delete(Sheet::History, &record.id)
            || self
                .tombstones
                .is_deleted_as_of(&record.id, record.derived_instant())
    }

    /// Keep one record per id (the newest, in the slot of the first
    /// occurrence) and one id-less record per fingerprint.
    fn collapse_local(&mut self, local: Vec<HistoryRecord>) -> Vec<HistoryRecord> {
        let mut collapsed: Vec<HistoryRecord> = Vec::with_capacity(local.len());
        let mut by_id: HashMap<RecordId, usize> = HashMap::new();
        let mut legacy: HashSet<String> = HashSet::new();

        for record in local {
            if !record.has_id() {
                if legacy.insert(record.fingerprint()) {
                    collapsed.push(record);
                } else {
                    self.result.deduplicated += 1;
                }
                continue;
            }
            match by_id.get(&record.id) {
                Some(&idx) => {
                    self.result.deduplicated += 1;
                    if record.derived_instant() > collapsed[idx].derived_instant() {
                        collapsed[idx] = record;
                    }
                }
                None => {
                    by_id.insert(record.id.clone(), collapsed.len());
                    collapsed.push(record);
                }
            }
        }

        collapsed
    }
}

/// Settle a same-id conflict in place.
fn resolve(local: &mut HistoryRecord, remote: &HistoryRecord) -> ConflictResolution {
    // None orders before any instant
    let local_at = local.derived_instant();
    let remote_at = remote.derived_instant();

    if remote_at > local_at {
        *local = remote.clone();
        ConflictResolution::RemoteWins
    } else if local_at > remote_at {
        ConflictResolution::LocalWins
    } else {
        *local = remote.clone().overlaid_with(local);
        ConflictResolution::Merged
    }
}

/// Whether a delta names ids the client cannot place: not local, not in the
/// delta itself and not pending a local delete. Such a delta must be
/// replaced by a full fetch.
pub fn needs_full_refetch(
    snapshot: &RemoteSnapshot,
    local: &[HistoryRecord],
    outbox: &Outbox,
    tombstones: &TombstoneLedger,
) -> bool {
    if snapshot.mode != FetchMode::Delta {
        return false;
    }
    let Some(remote_ids) = &snapshot.remote_ids else {
        return false;
    };

    let known: HashSet<&str> = local
        .iter()
        .chain(&snapshot.records)
        .map(|r| r.id.as_str())
        .collect();

    remote_ids.iter().any(|id| {
        !known.contains(id.as_str())
            && !outbox.has_pending_delete(Sheet::History, id)
            && !tombstones.contains(id)
    })
}

/// Run a full reconciliation.
pub fn reconcile(input: ReconcileInput<'_>) -> ReconcileOutput {
    let ReconcileInput {
        local,
        remote,
        outbox,
        tombstones,
        mut metadata,
        now,
    } = input;

    let mut reconciler = Reconciler::new(outbox, tombstones, now);
    tracing::debug!(phase = %SyncPhase::Merging, local = local.len(), remote = remote.records.len());
    let merged = reconciler.merge(local, &remote.records);
    tracing::debug!(phase = %SyncPhase::DiffingDeletes, mode = ?remote.mode);
    let (history, known_ids) = reconciler.diff_deletes(
        merged,
        &metadata.known_remote_ids,
        remote.remote_ids.as_ref(),
    );
    let (tombstones, result) = reconciler.finish(&remote.records);

    metadata.initialized = true;
    metadata.known_remote_ids = match (remote.remote_ids.is_some(), result.deletion_guard_tripped) {
        (true, false) => known_ids,
        // keep the previous set and learn the ids the delta carried
        _ => known_ids
            .into_iter()
            .chain(remote.records.iter().filter(|r| r.has_id()).map(|r| r.id.clone()))
            .collect(),
    };
    metadata.advance_watermark(remote.last_updated_at);
    metadata.advance_watermark(remote.newest_record_instant());

    ReconcileOutput {
        history,
        tombstones,
        metadata,
        result,
    }
}
