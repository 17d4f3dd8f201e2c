//! Outbox queue: local mutations waiting to reach the remote store.
//!
//! Changes are recorded as intents, not sent directly. The queue is kept
//! compacted so that at most one entry exists per `(sheet, record_id)`,
//! which means the remote never sees two operations for the same record out
//! of order and never sees a stale operation after a correcting one.

use crate::error::{Error, Result};
use crate::{clock, HistoryRecord, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A named record set on the remote spreadsheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sheet {
    History,
    Database,
}

impl Sheet {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sheet::History => "History",
            Sheet::Database => "Database",
        }
    }
}

impl fmt::Display for Sheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mutation an entry asks the remote to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    /// Add and update both carry a full payload.
    pub fn is_write(&self) -> bool {
        matches!(self, Action::Add | Action::Update)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub action: Action,
    pub sheet: Sheet,
    pub record_id: RecordId,
    /// Full payload for add/update, id-only for delete
    pub record: HistoryRecord,
    /// When the mutation was queued (RFC 3339)
    pub enqueued_at: String,
}

impl OutboxEntry {
    pub fn new(record: &HistoryRecord, sheet: Sheet, action: Action, now: Timestamp) -> Self {
        let record = match action {
            Action::Delete => record.identity(),
            Action::Add | Action::Update => record.clone(),
        };
        Self {
            action,
            sheet,
            record_id: record.id.clone(),
            record,
            enqueued_at: clock::format_instant(now),
        }
    }

    fn key(&self) -> (Sheet, RecordId) {
        (self.sheet, self.record_id.clone())
    }
}

/// Merge a later entry for the same key into an earlier one.
fn merge(earlier: &OutboxEntry, later: OutboxEntry) -> OutboxEntry {
    let action = match (earlier.action, later.action) {
        (_, Action::Delete) => Action::Delete,
        // never created remotely yet: still a creation
        (Action::Add, Action::Update) => Action::Add,
        // revived before the delete was confirmed: must be (re)created
        (Action::Delete, Action::Add | Action::Update) => Action::Add,
        (_, action) => action,
    };
    OutboxEntry { action, ..later }
}

/// Collapse same-key entries. The merged entry keeps the slot of the first
/// entry for its key. Entries without an id are passed through untouched.
pub fn compact(entries: Vec<OutboxEntry>) -> Vec<OutboxEntry> {
    let mut compacted: Vec<OutboxEntry> = Vec::with_capacity(entries.len());
    let mut slots: HashMap<(Sheet, RecordId), usize> = HashMap::new();

    for entry in entries {
        if entry.record_id.is_empty() {
            compacted.push(entry);
            continue;
        }
        match slots.get(&entry.key()) {
            Some(&slot) => {
                let merged = merge(&compacted[slot], entry);
                compacted[slot] = merged;
            }
            None => {
                slots.insert(entry.key(), compacted.len());
                compacted.push(entry);
            }
        }
    }

    compacted
}

/// The persisted queue of pending mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outbox {
    entries: Vec<OutboxEntry>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw entries, compacting them.
    pub fn from_entries(entries: Vec<OutboxEntry>) -> Self {
        Self {
            entries: compact(entries),
        }
    }

    /// Queue a mutation and compact.
    ///
    /// Returns `false` (and queues nothing) for a record without an id: such
    /// a record cannot be addressed remotely.
    pub fn enqueue(
        &mut self,
        record: &HistoryRecord,
        sheet: Sheet,
        action: Action,
        now: Timestamp,
    ) -> bool {
        if !record.has_id() {
            tracing::warn!(%sheet, %action, "refusing to queue a record without an id");
            return false;
        }
        self.entries
            .push(OutboxEntry::new(record, sheet, action, now));
        self.compact();
        true
    }

    pub fn compact(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        self.entries = compact(entries);
    }

    /// Remove an entry the remote has confirmed. Returns `false` when the
    /// queued entry for that record changed while the push was in flight;
    /// the newer intent stays queued. If the confirmed entry created the
    /// record, a queued add for it is sent as an update instead.
    pub fn acknowledge(&mut self, delivered: &OutboxEntry) -> bool {
        let key = delivered.key();
        let Some(index) = self.entries.iter().position(|e| e.key() == key) else {
            return false;
        };
        let current = &mut self.entries[index];
        if *current == *delivered {
            self.entries.remove(index);
            return true;
        }
        if delivered.action == Action::Add && current.action == Action::Add {
            current.action = Action::Update;
        }
        false
    }

    /// Every key appears at most once and each entry addresses the record
    /// it carries. A persisted queue that breaks this was not written by
    /// [`enqueue`](Self::enqueue).
    pub fn verify(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if entry.record_id.is_empty() || entry.record.id != entry.record_id {
                return Err(Error::CorruptState(format!(
                    "outbox entry for {:?} carries record {:?}",
                    entry.record_id, entry.record.id
                )));
            }
            if !seen.insert(entry.key()) {
                return Err(Error::CorruptState(format!(
                    "outbox holds more than one entry for {} {}",
                    entry.sheet, entry.record_id
                )));
            }
        }
        Ok(())
    }

    /// An add or update for this record is waiting to be sent.
    pub fn has_pending_write(&self, sheet: Sheet, id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.sheet == sheet && e.record_id == id && e.action.is_write())
    }

    /// A delete for this record is waiting to be sent.
    pub fn has_pending_delete(&self, sheet: Sheet, id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.sheet == sheet && e.record_id == id && e.action == Action::Delete)
    }

    pub fn entries(&self) -> &[OutboxEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn record(id: &str, brand: &str) -> HistoryRecord {
        HistoryRecord {
            id: id.into(),
            brand: brand.into(),
            ..HistoryRecord::default()
        }
    }

    fn entry(id: &str, action: Action, brand: &str) -> OutboxEntry {
        OutboxEntry::new(&record(id, brand), Sheet::History, action, now())
    }

    #[test]
    fn enqueue_same_add_twice_is_one_entry() {
        let mut outbox = Outbox::new();
        let r = record("x1", "Tormek");
        outbox.enqueue(&r, Sheet::History, Action::Add, now());
        outbox.enqueue(&r, Sheet::History, Action::Add, now());

        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.entries()[0].action, Action::Add);
    }

    #[test]
    fn add_then_update_stays_add_with_new_payload() {
        let compacted = compact(vec![
            entry("r1", Action::Add, "Tormek"),
            entry("r1", Action::Update, "Mora"),
        ]);

        assert_eq!(compacted.len(), 1);
        assert_eq!(compacted[0].action, Action::Add);
        assert_eq!(compacted[0].record.brand, "Mora");
    }

    #[test]
    fn delete_supersedes_add_and_update() {
        let compacted = compact(vec![
            entry("r1", Action::Add, "Tormek"),
            entry("r1", Action::Update, "Mora"),
            entry("r1", Action::Delete, "Mora"),
        ]);

        assert_eq!(compacted.len(), 1);
        assert_eq!(compacted[0].action, Action::Delete);
        assert_eq!(compacted[0].record, record("r1", "").identity());
    }

    #[test]
    fn delete_then_update_becomes_add() {
        let compacted = compact(vec![
            entry("r1", Action::Delete, ""),
            entry("r1", Action::Update, "Revived"),
        ]);

        assert_eq!(compacted.len(), 1);
        assert_eq!(compacted[0].action, Action::Add);
        assert_eq!(compacted[0].record.brand, "Revived");
    }

    #[test]
    fn update_then_update_keeps_latest() {
        let compacted = compact(vec![
            entry("r1", Action::Update, "first"),
            entry("r1", Action::Update, "second"),
        ]);
        assert_eq!(compacted.len(), 1);
        assert_eq!(compacted[0].action, Action::Update);
        assert_eq!(compacted[0].record.brand, "second");
    }

    #[test]
    fn merged_entry_keeps_first_slot() {
        let compacted = compact(vec![
            entry("a", Action::Add, "A"),
            entry("b", Action::Add, "B"),
            entry("a", Action::Update, "A2"),
        ]);
        let ids: Vec<_> = compacted.iter().map(|e| e.record_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn different_sheets_do_not_merge() {
        let mut db_entry = entry("k1", Action::Add, "x");
        db_entry.sheet = Sheet::Database;
        let compacted = compact(vec![entry("k1", Action::Delete, ""), db_entry]);
        assert_eq!(compacted.len(), 2);
    }

    #[test]
    fn record_without_id_is_refused() {
        let mut outbox = Outbox::new();
        assert!(!outbox.enqueue(&record("", "Legacy"), Sheet::History, Action::Add, now()));
        assert!(outbox.is_empty());
    }

    #[test]
    fn acknowledge_removes_only_the_delivered_entry() {
        let mut outbox = Outbox::new();
        outbox.enqueue(&record("a", "A"), Sheet::History, Action::Update, now());
        outbox.enqueue(&record("b", "B"), Sheet::History, Action::Add, now());
        let sent = outbox.entries()[1].clone();

        assert!(outbox.acknowledge(&sent));
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.entries()[0].record_id, "a");
        assert!(!outbox.acknowledge(&sent));
    }

    #[test]
    fn acknowledge_keeps_an_edit_made_in_flight() {
        let mut outbox = Outbox::new();
        outbox.enqueue(&record("a", "A"), Sheet::History, Action::Add, now());
        let sent = outbox.entries()[0].clone();

        let later = now() + chrono::Duration::seconds(1);
        outbox.enqueue(&record("a", "A2"), Sheet::History, Action::Update, later);
        assert!(!outbox.acknowledge(&sent));

        // the record exists remotely now
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.entries()[0].action, Action::Update);
        assert_eq!(outbox.entries()[0].record.brand, "A2");
    }

    #[test]
    fn acknowledge_keeps_a_delete_made_in_flight() {
        let mut outbox = Outbox::new();
        outbox.enqueue(&record("a", "A"), Sheet::History, Action::Add, now());
        let sent = outbox.entries()[0].clone();
        outbox.enqueue(&record("a", "A"), Sheet::History, Action::Delete, now());

        assert!(!outbox.acknowledge(&sent));
        assert!(outbox.has_pending_delete(Sheet::History, "a"));
    }

    #[test]
    fn verify_rejects_duplicate_keys() {
        let outbox: Outbox = serde_json::from_value(serde_json::json!([
            entry("a", Action::Update, "A"),
            entry("a", Action::Delete, ""),
        ]))
        .unwrap();
        assert!(matches!(outbox.verify(), Err(Error::CorruptState(_))));
    }

    #[test]
    fn verify_rejects_mismatched_record() {
        let mut stray = entry("a", Action::Update, "A");
        stray.record.id = "b".into();
        let outbox = Outbox::from_entries(vec![entry("c", Action::Add, "C"), stray]);
        assert!(matches!(outbox.verify(), Err(Error::CorruptState(_))));

        let fine = Outbox::from_entries(vec![entry("c", Action::Add, "C")]);
        assert!(fine.verify().is_ok());
    }

    #[test]
    fn pending_queries() {
        let mut outbox = Outbox::new();
        outbox.enqueue(&record("w", "W"), Sheet::History, Action::Update, now());
        outbox.enqueue(&record("d", "D"), Sheet::History, Action::Delete, now());

        assert!(outbox.has_pending_write(Sheet::History, "w"));
        assert!(!outbox.has_pending_delete(Sheet::History, "w"));
        assert!(outbox.has_pending_delete(Sheet::History, "d"));
        assert!(!outbox.has_pending_write(Sheet::History, "d"));
        assert!(!outbox.has_pending_write(Sheet::Database, "w"));
    }

    #[test]
    fn serialization_format() {
        let e = entry("r1", Action::Delete, "");
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"action\":\"delete\""));
        assert!(json.contains("\"sheet\":\"History\""));
        assert!(json.contains("\"recordId\":\"r1\""));

        let outbox = Outbox::from_entries(vec![e]);
        let json = serde_json::to_string(&outbox).unwrap();
        assert!(json.starts_with('['));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_action() -> impl Strategy<Value = Action> {
            prop_oneof![Just(Action::Add), Just(Action::Update), Just(Action::Delete)]
        }

        fn arb_entry() -> impl Strategy<Value = OutboxEntry> {
            (prop_oneof![Just("a"), Just("b"), Just("c")], arb_action(), "[a-z]{0,4}")
                .prop_map(|(id, action, brand)| entry(id, action, &brand))
        }

        proptest! {
            #[test]
            fn prop_compact_idempotent(entries in prop::collection::vec(arb_entry(), 0..24)) {
                let once = compact(entries);
                let twice = compact(once.clone());
                prop_assert_eq!(once, twice);
            }

            #[test]
            fn prop_one_entry_per_key(entries in prop::collection::vec(arb_entry(), 0..24)) {
                let compacted = compact(entries);
                let mut keys: Vec<_> = compacted.iter().map(|e| e.record_id.clone()).collect();
                let before = keys.len();
                keys.sort();
                keys.dedup();
                prop_assert_eq!(before, keys.len());
            }

            #[test]
            fn prop_delete_dominates(prefix in prop::collection::vec(arb_action(), 0..10)) {
                let mut entries: Vec<_> = prefix.into_iter().map(|a| entry("a", a, "x")).collect();
                entries.push(entry("a", Action::Delete, ""));
                let compacted = compact(entries);
                prop_assert_eq!(compacted.len(), 1);
                prop_assert_eq!(compacted[0].action, Action::Delete);
            }
        }
    }
}
