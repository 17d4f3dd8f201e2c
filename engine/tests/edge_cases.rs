//! Edge case tests for staysharp-engine
//!
//! These tests walk the sync scenarios end to end through the public API:
//! local mutations in the store, outbox compaction, and reconciliation
//! against remote snapshots.

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use staysharp_engine::normalize::{normalize_history, sanitize_history};
use staysharp_engine::reconcile::{self, ConflictResolution};
use staysharp_engine::{
    Action, HistoryDraft, HistoryRecord, MemoryBackend, Outbox, ReconcileInput, RemoteSnapshot,
    Sheet, Store, SyncMetadata, Timestamp, TombstoneLedger,
};
use std::collections::BTreeSet;

fn at(rfc3339: &str) -> Timestamp {
    rfc3339.parse().unwrap()
}

fn record(id: &str, updated_at: &str, comments: &str) -> HistoryRecord {
    HistoryRecord {
        id: id.into(),
        brand: "Tormek".into(),
        updated_at: updated_at.into(),
        comments: comments.into(),
        ..HistoryRecord::default()
    }
}

fn known(ids: &[&str]) -> SyncMetadata {
    SyncMetadata {
        initialized: true,
        known_remote_ids: ids.iter().map(|s| s.to_string()).collect(),
        watermark: Some(at("2024-01-01T00:00:00Z")),
    }
}

/// Reconcile the store's current state against a remote snapshot and
/// persist the result, the way a sync cycle does.
fn sync_against(store: &mut Store, remote: RemoteSnapshot, now: Timestamp) -> reconcile::ReconcileResult {
    let state = store.load_sync_state(now).unwrap();
    let output = reconcile::reconcile(ReconcileInput {
        local: state.history,
        remote,
        outbox: &state.outbox,
        tombstones: state.tombstones,
        metadata: state.metadata,
        now,
    });
    store.apply_reconcile(&output);
    output.result
}

// ============================================================================
// Normalizer Edge Cases
// ============================================================================

#[test]
fn empty_object_is_dropped_by_sanitize() {
    let normalized = normalize_history(&json!({}));
    assert!(!normalized.is_valid());

    let rows = vec![json!({}), json!({"comments": "no id, no brand"})];
    assert!(sanitize_history(&rows).is_empty());
}

#[test]
fn unicode_fields_survive_normalization() {
    let names = ["Tōjirō", "Нож", "🔪", "Line\nBreak"];
    let rows: Vec<Value> = names
        .iter()
        .enumerate()
        .map(|(i, name)| json!({"id": format!("u{i}"), "brand": name}))
        .collect();

    let records = sanitize_history(&rows);
    let brands: Vec<_> = records.iter().map(|r| r.brand.as_str()).collect();
    assert_eq!(brands, names);
}

#[test]
fn mixed_legacy_and_canonical_rows() {
    let rows = vec![
        json!({"ID": 1, "Brand": "Global", "Date": "05.02.2024, 18:30:00"}),
        json!({"id": "2", "brand": "Mora", "date": "2024-02-06T07:00:00Z"}),
    ];
    let records = sanitize_history(&rows);
    assert_eq!(records[0].date, "05.02.2024 18:30");
    assert_eq!(records[1].date, "06.02.2024 07:00");
}

// ============================================================================
// Outbox Edge Cases
// ============================================================================

#[test]
fn enqueue_add_then_flush_confirmation_empties_outbox() {
    let mut store = Store::in_memory();
    let now = at("2024-03-01T10:00:00Z");
    let draft = HistoryDraft {
        brand: "Tormek".into(),
        ..HistoryDraft::default()
    };
    let x1 = store.create_record(&draft, now).unwrap();

    let mut outbox = store.load_outbox();
    let in_flight = outbox.entries().to_vec();
    assert_eq!(in_flight.len(), 1);
    assert_eq!(in_flight[0].action, Action::Add);
    assert_eq!(in_flight[0].record.brand, "Tormek");

    // the remote confirmed it
    assert!(outbox.acknowledge(&in_flight[0]));
    store.save_outbox(&outbox);
    assert!(store.load_outbox().is_empty());

    // the remote now lists the record
    let result = sync_against(&mut store, RemoteSnapshot::full(vec![x1.clone()]), now);
    assert_eq!(result.count(ConflictResolution::Merged), 1);
    assert_eq!(store.load_history(), vec![x1.clone()]);
    assert!(store.load_metadata(Sheet::History).known_remote_ids.contains(&x1.id));
}

#[test]
fn edit_during_flush_is_not_lost() {
    let mut store = Store::in_memory();
    let now = at("2024-03-01T10:00:00Z");
    let created = store
        .create_record(
            &HistoryDraft {
                brand: "Tormek".into(),
                ..HistoryDraft::default()
            },
            now,
        )
        .unwrap();

    let in_flight = store.load_outbox().entries().to_vec();

    // user edits while the push is on the wire
    let later = at("2024-03-01T10:00:05Z");
    store
        .update_record(
            &created.id,
            &HistoryDraft {
                brand: "Tormek".into(),
                comments: "second pass".into(),
                ..HistoryDraft::default()
            },
            later,
        )
        .unwrap();

    // the push is still queued, so a remote deletion cannot drop the record
    let state = store.load_sync_state(later).unwrap();
    assert!(state.outbox.has_pending_write(Sheet::History, &created.id));

    // the push failed: nothing to acknowledge, the edit stays an add
    let outbox = store.load_outbox();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox.entries()[0].action, Action::Add);
    assert_eq!(outbox.entries()[0].record.comments, "second pass");

    // the push succeeded after all: the edit goes out as an update
    let mut outbox = store.load_outbox();
    assert!(!outbox.acknowledge(&in_flight[0]));
    assert_eq!(outbox.entries()[0].action, Action::Update);
    assert_eq!(outbox.entries()[0].record.comments, "second pass");
}

#[test]
fn many_operations_on_one_record_compact_to_one() {
    let mut outbox = Outbox::new();
    let now = at("2024-03-01T10:00:00Z");
    let r = record("busy", "", "");
    outbox.enqueue(&r, Sheet::History, Action::Add, now);
    for _ in 0..50 {
        outbox.enqueue(&r, Sheet::History, Action::Update, now);
    }
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox.entries()[0].action, Action::Add);

    outbox.enqueue(&r, Sheet::History, Action::Delete, now);
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox.entries()[0].action, Action::Delete);
}

// ============================================================================
// Reconciliation Scenarios
// ============================================================================

#[test]
fn remote_newer_copy_replaces_local() {
    let mut store = Store::in_memory();
    store.save_history(&[record("r1", "2024-01-01T10:00:00Z", "local note")]);
    let remote = record("r1", "2024-01-02T09:00:00Z", "remote note");

    sync_against(
        &mut store,
        RemoteSnapshot::full(vec![remote.clone()]),
        at("2024-01-03T00:00:00Z"),
    );

    assert_eq!(store.load_history(), vec![remote]);
}

#[test]
fn locally_deleted_record_is_not_resurrected() {
    let mut store = Store::in_memory();
    let r2 = record("r2", "2024-02-20T00:00:00Z", "");
    store.save_history(&[r2.clone()]);
    store.save_metadata(Sheet::History, &known(&["r2"]));

    let deleted_at = at("2024-03-01T00:00:00Z");
    store.delete_record("r2", deleted_at).unwrap();

    // the remote has not processed the delete yet
    let result = sync_against(
        &mut store,
        RemoteSnapshot::full(vec![r2]),
        at("2024-03-01T00:00:05Z"),
    );

    assert!(store.load_history().is_empty());
    assert_eq!(result.suppressed, 1);
    assert!(store.load_tombstones(deleted_at).contains("r2"));
}

#[test]
fn pending_update_survives_remote_deletion() {
    let mut store = Store::in_memory();
    let r3 = record("r3", "2024-01-01T00:00:00Z", "");
    store.save_history(&[r3.clone(), record("other", "2024-01-01T00:00:00Z", "")]);
    store.save_metadata(Sheet::History, &known(&["r3", "other"]));
    store
        .update_record(
            "r3",
            &HistoryDraft {
                brand: "Tormek".into(),
                comments: "edited offline".into(),
                ..HistoryDraft::default()
            },
            at("2024-01-05T00:00:00Z"),
        )
        .unwrap();

    let result = sync_against(
        &mut store,
        RemoteSnapshot::full(vec![record("other", "2024-01-01T00:00:00Z", "")]),
        at("2024-01-06T00:00:00Z"),
    );

    let history = store.load_history();
    assert!(history.iter().any(|r| r.id == "r3" && r.comments == "edited offline"));
    assert_eq!(result.kept_pending, 1);
    assert!(!store.load_tombstones(at("2024-01-06T00:00:00Z")).contains("r3"));
}

#[test]
fn empty_remote_answer_deletes_nothing() {
    let mut store = Store::in_memory();
    let local = vec![
        record("A", "2024-01-01T00:00:00Z", ""),
        record("B", "2024-01-01T00:00:00Z", ""),
        record("C", "2024-01-01T00:00:00Z", ""),
    ];
    store.save_history(&local);
    store.save_metadata(Sheet::History, &known(&["A", "B", "C"]));

    let result = sync_against(&mut store, RemoteSnapshot::full(vec![]), at("2024-01-02T00:00:00Z"));

    assert!(result.deletion_guard_tripped);
    assert_eq!(store.load_history(), local);
    assert!(store.load_tombstones(at("2024-01-02T00:00:00Z")).is_empty());
}

#[test]
fn deletion_on_another_device_propagates() {
    let mut store = Store::in_memory();
    store.save_history(&[
        record("keep", "2024-01-01T00:00:00Z", ""),
        record("gone", "2024-01-01T00:00:00Z", ""),
    ]);
    store.save_metadata(Sheet::History, &known(&["keep", "gone"]));
    let now = at("2024-01-02T00:00:00Z");

    let result = sync_against(
        &mut store,
        RemoteSnapshot::full(vec![record("keep", "2024-01-01T00:00:00Z", "")]),
        now,
    );

    assert_eq!(result.deleted_remote, 1);
    assert_eq!(store.load_history().len(), 1);
    assert_eq!(store.load_tombstones(now).deleted_at("gone"), Some(now));
}

#[test]
fn second_sync_with_same_snapshot_is_stable() {
    let mut store = Store::in_memory();
    store.save_history(&[record("a", "2024-01-01T00:00:00Z", "")]);
    let remote = RemoteSnapshot::full(vec![
        record("a", "2024-01-02T00:00:00Z", "remote"),
        record("b", "2024-01-02T00:00:00Z", ""),
    ]);
    let now = at("2024-01-03T00:00:00Z");

    sync_against(&mut store, remote.clone(), now);
    let first = store.load_history();
    let result = sync_against(&mut store, remote, now);

    assert_eq!(store.load_history(), first);
    assert_eq!(result.added, 0);
    assert!(result.has_changes()); // ties still re-merge
}

#[test]
fn history_persists_across_store_instances() {
    let backend = MemoryBackend::new();
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    let created = {
        let mut store = Store::new(Box::new(backend.clone()));
        store
            .create_record(
                &HistoryDraft {
                    brand: "Tormek".into(),
                    ..HistoryDraft::default()
                },
                now,
            )
            .unwrap()
    };

    let mut reopened = Store::new(Box::new(backend));
    assert_eq!(reopened.load_history(), vec![created]);
    assert_eq!(reopened.load_outbox().len(), 1);
}

#[test]
fn delta_naming_unknown_ids_requires_full_fetch() {
    let local = vec![record("a", "", "")];
    let ids: BTreeSet<String> = ["a", "unknown"].iter().map(|s| s.to_string()).collect();
    let delta = RemoteSnapshot::delta(vec![], Some(ids), None);

    assert!(reconcile::needs_full_refetch(
        &delta,
        &local,
        &Outbox::new(),
        &TombstoneLedger::new()
    ));
}
