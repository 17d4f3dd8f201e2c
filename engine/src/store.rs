//! Store - typed access to everything persisted locally.
//!
//! The Store owns the [`DurableStore`] and knows which key holds what. It
//! applies local mutations (create, edit, delete) so that the history, the
//! outbox and the tombstone ledger always change together, and it heals
//! corrupt cached values instead of failing.

use crate::outbox::{Action, Outbox, Sheet};
use crate::reconcile::ReconcileOutput;
use crate::storage::{Backend, DurableStore};
use crate::{
    error::Result, CatalogSnapshot, Error, HistoryDraft, HistoryRecord, KnifeRecord,
    SyncMetadata, Timestamp, TombstoneLedger,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Persisted key names.
pub mod keys {
    pub const HISTORY: &str = "staysharp_history";
    pub const CATALOG: &str = "staysharp_database_v2";
    pub const TAB_ORDER: &str = "staysharp_tab_order";
    pub const OUTBOX: &str = "staysharp_outbox";
    pub const TOMBSTONES: &str = "staysharp_tombstones";
    pub const SYNC_META_HISTORY: &str = "staysharp_sync_meta_history";
    pub const SYNC_META_DATABASE: &str = "staysharp_sync_meta_database";
}

/// A user-visible message about something the store fixed on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    /// The key that was reset
    pub key: String,
    pub message: String,
}

/// Everything a sync cycle reads before merging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    pub history: Vec<HistoryRecord>,
    pub outbox: Outbox,
    pub tombstones: TombstoneLedger,
    pub metadata: SyncMetadata,
}

/// Typed local store.
#[derive(Debug)]
pub struct Store {
    durable: DurableStore,
    catalog_defaults: Vec<KnifeRecord>,
    notices: Vec<Notice>,
}

impl Store {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self::with_durable(DurableStore::new(backend))
    }

    /// A store that keeps nothing across sessions.
    pub fn in_memory() -> Self {
        Self::with_durable(DurableStore::in_memory())
    }

    fn with_durable(durable: DurableStore) -> Self {
        Self {
            durable,
            catalog_defaults: Vec::new(),
            notices: Vec::new(),
        }
    }

    /// Catalog used while no (valid) cached catalog exists.
    pub fn with_catalog_defaults(mut self, knives: Vec<KnifeRecord>) -> Self {
        self.catalog_defaults = knives;
        self
    }

    /// Whether persistence has failed and state lives in memory only.
    pub fn is_degraded(&self) -> bool {
        self.durable.is_degraded()
    }

    /// Notices queued since the last call.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // ---- History ----

    /// The local history. Stored rows go through the normalizer, so caches
    /// written by older builds load too.
    pub fn load_history(&mut self) -> Vec<HistoryRecord> {
        let rows: Vec<Value> = self.read_json(keys::HISTORY);
        crate::normalize::sanitize_history(&rows)
    }

    pub fn save_history(&mut self, history: &[HistoryRecord]) {
        self.write_json(keys::HISTORY, &history);
    }

    // ---- Outbox ----

    pub fn load_outbox(&mut self) -> Outbox {
        let outbox: Outbox = self.read_json(keys::OUTBOX);
        Outbox::from_entries(outbox.entries().to_vec())
    }

    pub fn save_outbox(&mut self, outbox: &Outbox) {
        self.write_json(keys::OUTBOX, outbox);
    }

    // ---- Tombstones ----

    /// The tombstone ledger, pruned. Pruning is written back.
    pub fn load_tombstones(&mut self, now: Timestamp) -> TombstoneLedger {
        let mut tombstones: TombstoneLedger = self.read_json(keys::TOMBSTONES);
        let pruned = tombstones.prune(now);
        if pruned > 0 {
            tracing::debug!(pruned, "pruned expired tombstones");
            self.save_tombstones(&tombstones);
        }
        tombstones
    }

    pub fn save_tombstones(&mut self, tombstones: &TombstoneLedger) {
        self.write_json(keys::TOMBSTONES, tombstones);
    }

    // ---- Sync metadata ----

    pub fn load_metadata(&mut self, sheet: Sheet) -> SyncMetadata {
        self.read_json(metadata_key(sheet))
    }

    pub fn save_metadata(&mut self, sheet: Sheet, metadata: &SyncMetadata) {
        self.write_json(metadata_key(sheet), metadata);
    }

    // ---- Catalog ----

    /// The cached catalog, or the bundled defaults when there is none or it
    /// was written in an incompatible format.
    pub fn load_catalog(&mut self) -> CatalogSnapshot {
        let cached = self
            .durable
            .get(keys::CATALOG)
            .map(|raw| CatalogSnapshot::from_json(&raw));
        match cached {
            Some(Ok(snapshot)) => snapshot,
            Some(Err(err)) => {
                self.heal(keys::CATALOG, &err);
                CatalogSnapshot::new(self.catalog_defaults.clone(), None)
            }
            None => CatalogSnapshot::new(self.catalog_defaults.clone(), None),
        }
    }

    pub fn save_catalog(&mut self, snapshot: &CatalogSnapshot) {
        match snapshot.to_json() {
            Ok(raw) => self.durable.set(keys::CATALOG, &raw),
            Err(err) => tracing::warn!(error = %err, "failed to serialize catalog"),
        }
    }

    // ---- Tab order ----

    pub fn load_tab_order(&mut self) -> Vec<String> {
        self.read_json(keys::TAB_ORDER)
    }

    pub fn save_tab_order(&mut self, order: &[String]) {
        self.write_json(keys::TAB_ORDER, &order);
    }

    // ---- Sync cycle ----

    /// Snapshot of the local state a reconciliation merges against.
    ///
    /// Fails with [`Error::CorruptState`] when the persisted outbox breaks
    /// its one-entry-per-record invariant.
    pub fn load_sync_state(&mut self, now: Timestamp) -> Result<SyncState> {
        let outbox = self.load_outbox();
        outbox.verify()?;
        Ok(SyncState {
            history: self.load_history(),
            outbox,
            tombstones: self.load_tombstones(now),
            metadata: self.load_metadata(Sheet::History),
        })
    }

    /// Persist a reconciliation's result in one step.
    pub fn apply_reconcile(&mut self, output: &ReconcileOutput) {
        self.save_history(&output.history);
        self.save_tombstones(&output.tombstones);
        self.save_metadata(Sheet::History, &output.metadata);
    }

    /// Forget all sync bookkeeping. The history itself is kept until a full
    /// fetch replaces it.
    pub fn reset_sync_state(&mut self) {
        for key in [
            keys::OUTBOX,
            keys::TOMBSTONES,
            keys::SYNC_META_HISTORY,
            keys::SYNC_META_DATABASE,
        ] {
            self.durable.remove(key);
        }
    }

    // ---- Local mutations ----

    /// Log a new sharpening session.
    pub fn create_record(&mut self, draft: &HistoryDraft, now: Timestamp) -> Result<HistoryRecord> {
        if draft.brand.trim().is_empty() {
            return Err(Error::MissingRequiredField("brand".into()));
        }

        let record = HistoryRecord::create(draft, now);
        let mut history = self.load_history();
        history.push(record.clone());

        let mut outbox = self.load_outbox();
        outbox.enqueue(&record, Sheet::History, Action::Add, now);

        self.save_history(&history);
        self.save_outbox(&outbox);
        Ok(record)
    }

    /// Edit an existing session, keeping its id and display date.
    pub fn update_record(
        &mut self,
        id: &str,
        draft: &HistoryDraft,
        now: Timestamp,
    ) -> Result<HistoryRecord> {
        let mut history = self.load_history();
        let record = history
            .iter_mut()
            .find(|r| r.has_id() && r.id == id)
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
        record.apply_draft(draft, now);
        let updated = record.clone();

        let mut outbox = self.load_outbox();
        outbox.enqueue(&updated, Sheet::History, Action::Update, now);

        self.save_history(&history);
        self.save_outbox(&outbox);
        Ok(updated)
    }

    /// Remove a session locally, remember the deletion and queue it.
    pub fn delete_record(&mut self, id: &str, now: Timestamp) -> Result<()> {
        let mut history = self.load_history();
        let before = history.len();
        history.retain(|r| !(r.has_id() && r.id == id));
        if history.len() == before {
            return Err(Error::RecordNotFound(id.to_string()));
        }

        let mut tombstones = self.load_tombstones(now);
        tombstones.remember(id, now);

        let mut outbox = self.load_outbox();
        let identity = HistoryRecord {
            id: id.to_string(),
            ..HistoryRecord::default()
        };
        outbox.enqueue(&identity, Sheet::History, Action::Delete, now);

        self.save_history(&history);
        self.save_tombstones(&tombstones);
        self.save_outbox(&outbox);
        Ok(())
    }

    // ---- JSON plumbing ----

    fn read_json<T: DeserializeOwned + Default>(&mut self, key: &str) -> T {
        let Some(raw) = self.durable.get(key) else {
            return T::default();
        };
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                self.heal(key, &err);
                T::default()
            }
        }
    }

    fn write_json<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.durable.set(key, &raw),
            Err(err) => tracing::warn!(key, error = %err, "failed to serialize local state"),
        }
    }

    fn heal(&mut self, key: &str, err: &dyn std::fmt::Display) {
        tracing::warn!(key, error = %err, "corrupt local data, resetting");
        self.durable.remove(key);
        self.notices.push(Notice {
            key: key.to_string(),
            message: format!("Local data in {key} was unreadable and has been reset."),
        });
    }
}

fn metadata_key(sheet: Sheet) -> &'static str {
    match sheet {
        Sheet::History => keys::SYNC_META_HISTORY,
        Sheet::Database => keys::SYNC_META_DATABASE,
    }
}
