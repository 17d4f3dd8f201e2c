//! The sync service: outbox flushing and reconciliation cycles.
//!
//! Local state lives in a [`Store`] behind a `std::sync::Mutex` that is only
//! held for synchronous work. Network waits happen outside the lock, so the
//! merge always runs against the local state as it is *after* the fetch.
//!
//! Flushes and cycles are single-flight: a caller that arrives while one is
//! running awaits the same result instead of starting another.

use crate::error::{Result, SyncError};
use crate::remote::Remote;
use futures::future::{BoxFuture, FutureExt, Shared};
use staysharp_engine::reconcile::{self, needs_full_refetch};
use staysharp_engine::{
    CatalogSnapshot, Clock, FetchMode, HistoryDraft, HistoryRecord, Notice, Outbox,
    ReconcileInput, ReconcileResult, Sheet, Store, SyncMetadata, SyncPhase, SystemClock,
    TombstoneLedger,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Whether a cycle was asked for by the user and should show progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Feedback {
    Visible,
    #[default]
    Silent,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub feedback: Feedback,
    /// Skip the staleness probe and fetch everything
    pub force_full: bool,
}

impl SyncOptions {
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn visible() -> Self {
        Self {
            feedback: Feedback::Visible,
            force_full: false,
        }
    }
}

/// Outcome of one outbox flush.
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    /// Entries the remote confirmed
    pub delivered: usize,
    /// Entries left queued for a later attempt
    pub requeued: usize,
    pub last_error: Option<SyncError>,
}

impl FlushReport {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.last_error, Some(SyncError::Unauthorized))
    }
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub flush: FlushReport,
    /// `None` when the staleness probe showed nothing new
    pub mode: Option<FetchMode>,
    pub result: ReconcileResult,
    /// Local state was rebuilt from a full fetch
    pub recovered: bool,
}

impl SyncReport {
    pub fn skipped_fetch(&self) -> bool {
        self.mode.is_none()
    }
}

/// Something subscribers may want to show.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Started { feedback: Feedback },
    Completed { feedback: Feedback, report: SyncReport },
    Failed { feedback: Feedback, error: SyncError },
    CatalogUpdated { knives: usize },
    Notice(Notice),
}

type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Slot<T> {
    next: u64,
    current: Option<(u64, SharedResult<T>)>,
}

/// At most one operation in flight; late callers join it.
struct SingleFlight<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                next: 0,
                current: None,
            }),
        }
    }

    /// Join the operation in flight, or start one with `start`.
    async fn run<F>(&self, start: F) -> Result<T>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        let (generation, shared) = {
            let mut slot = lock(&self.slot);
            match slot.current.as_ref().filter(|(_, f)| f.peek().is_none()) {
                Some((generation, shared)) => (*generation, shared.clone()),
                None => {
                    let generation = slot.next;
                    slot.next += 1;
                    let shared = start().shared();
                    slot.current = Some((generation, shared.clone()));
                    (generation, shared)
                }
            }
        };

        let result = shared.await;

        let mut slot = lock(&self.slot);
        if matches!(&slot.current, Some((current, _)) if *current == generation) {
            slot.current = None;
        }
        result
    }

    /// The operation in flight, if any.
    fn pending(&self) -> Option<SharedResult<T>> {
        let slot = lock(&self.slot);
        slot.current
            .as_ref()
            .filter(|(_, f)| f.peek().is_none())
            .map(|(_, f)| f.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner<R> {
    remote: R,
    store: Mutex<Store>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<SyncEvent>,
    flush_flight: SingleFlight<FlushReport>,
    sync_flight: SingleFlight<SyncReport>,
}

/// Handle to the sync machinery. Cheap to clone.
pub struct SyncService<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for SyncService<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Remote> SyncService<R> {
    pub fn new(remote: R, store: Store) -> Self {
        Self::with_clock(remote, store, Arc::new(SystemClock))
    }

    pub fn with_clock(remote: R, store: Store, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                remote,
                store: Mutex::new(store),
                clock,
                events,
                flush_flight: SingleFlight::new(),
                sync_flight: SingleFlight::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    // ---- Local mutations ----

    pub fn create_record(&self, draft: &HistoryDraft) -> Result<HistoryRecord> {
        let now = self.inner.clock.now();
        let record = self.inner.with_store(|store| store.create_record(draft, now));
        self.inner.publish_notices();
        Ok(record?)
    }

    pub fn update_record(&self, id: &str, draft: &HistoryDraft) -> Result<HistoryRecord> {
        let now = self.inner.clock.now();
        let record = self
            .inner
            .with_store(|store| store.update_record(id, draft, now));
        self.inner.publish_notices();
        Ok(record?)
    }

    pub fn delete_record(&self, id: &str) -> Result<()> {
        let now = self.inner.clock.now();
        let deleted = self.inner.with_store(|store| store.delete_record(id, now));
        self.inner.publish_notices();
        Ok(deleted?)
    }

    // ---- Reads ----

    pub fn history(&self) -> Vec<HistoryRecord> {
        self.inner.with_store(Store::load_history)
    }

    pub fn catalog(&self) -> CatalogSnapshot {
        self.inner.with_store(Store::load_catalog)
    }

    /// Number of mutations waiting to reach the remote.
    pub fn pending_count(&self) -> usize {
        self.inner.with_store(|store| store.load_outbox().len())
    }

    /// Whether persistence failed and state now only lives in memory.
    pub fn is_storage_degraded(&self) -> bool {
        self.inner.with_store(|store| store.is_degraded())
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.sync_flight.pending().is_some()
    }

    // ---- Remote work ----

    /// Push every queued mutation, in order. Entries that fail stay queued;
    /// an authorization failure is returned as an error.
    pub async fn flush(&self) -> Result<FlushReport> {
        let report = self.inner.flush().await?;
        if report.is_unauthorized() {
            return Err(SyncError::Unauthorized);
        }
        Ok(report)
    }

    /// Run a sync cycle, or join the one in flight.
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncReport> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .sync_flight
            .run(move || inner.run_cycle(options).boxed())
            .await
    }

    /// Drop outbox, tombstones and metadata and rebuild the history from a
    /// full fetch. Waits for a cycle already in flight first.
    pub async fn recover(&self) -> Result<SyncReport> {
        while let Some(pending) = self.inner.sync_flight.pending() {
            if let Err(err) = pending.await {
                tracing::debug!(error = %err, "Cycle before recovery failed");
            }
        }
        let inner = Arc::clone(&self.inner);
        self.inner
            .sync_flight
            .run(move || {
                async move {
                    let feedback = Feedback::Visible;
                    inner.emit(SyncEvent::Started { feedback });
                    let outcome = inner.recover_state().await;
                    inner.finish_cycle(feedback, &outcome);
                    outcome
                }
                .boxed()
            })
            .await
    }

    /// Replace the cached knife catalog with the remote one. Returns whether
    /// the cache changed; an empty remote catalog never replaces it.
    pub async fn refresh_catalog(&self) -> Result<bool> {
        let knives = self.inner.remote.fetch_database().await?;
        if knives.is_empty() {
            tracing::warn!("Remote catalog is empty, keeping the cached one");
            return Ok(false);
        }

        let now = self.inner.clock.now();
        let count = knives.len();
        self.inner.with_store(|store| {
            store.save_catalog(&CatalogSnapshot::new(knives, Some(now)));
            let mut metadata = store.load_metadata(Sheet::Database);
            metadata.initialized = true;
            metadata.advance_watermark(Some(now));
            store.save_metadata(Sheet::Database, &metadata);
        });
        tracing::info!(knives = count, "Catalog refreshed");
        self.inner.emit(SyncEvent::CatalogUpdated { knives: count });
        self.inner.publish_notices();
        Ok(true)
    }
}

impl<R: Remote> Inner<R> {
    fn with_store<T>(&self, f: impl FnOnce(&mut Store) -> T) -> T {
        f(&mut lock(&self.store))
    }

    fn emit(&self, event: SyncEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_notices(&self) {
        for notice in self.with_store(Store::take_notices) {
            tracing::warn!(key = %notice.key, "{}", notice.message);
            self.emit(SyncEvent::Notice(notice));
        }
    }

    async fn flush(self: &Arc<Self>) -> Result<FlushReport> {
        let inner = Arc::clone(self);
        self.flush_flight
            .run(move || inner.flush_outbox().boxed())
            .await
    }

    /// Entries stay persisted until the remote confirms them, so a
    /// reconciliation running meanwhile still sees them as pending.
    async fn flush_outbox(self: Arc<Self>) -> Result<FlushReport> {
        let entries = self.with_store(|store| store.load_outbox().entries().to_vec());
        let mut report = FlushReport::default();
        if entries.is_empty() {
            return Ok(report);
        }
        tracing::debug!(phase = %SyncPhase::Flushing, entries = entries.len());

        let total = entries.len();
        for entry in entries {
            match self.remote.push(&entry).await {
                Ok(()) => {
                    report.delivered += 1;
                    self.with_store(|store| {
                        let mut outbox = store.load_outbox();
                        if !outbox.acknowledge(&entry) {
                            tracing::debug!(record_id = %entry.record_id, "Record changed during push, keeping newer entry");
                        }
                        store.save_outbox(&outbox);
                    });
                }
                Err(SyncError::Unauthorized) => {
                    tracing::error!(record_id = %entry.record_id, "Remote refused the token, stopping flush");
                    report.last_error = Some(SyncError::Unauthorized);
                    break;
                }
                Err(err) => {
                    tracing::warn!(
                        record_id = %entry.record_id,
                        action = %entry.action,
                        error = %err,
                        "Push failed, keeping entry queued"
                    );
                    report.last_error = Some(err);
                }
            }
        }

        report.requeued = total - report.delivered;
        Ok(report)
    }

    async fn run_cycle(self: Arc<Self>, options: SyncOptions) -> Result<SyncReport> {
        self.emit(SyncEvent::Started {
            feedback: options.feedback,
        });
        let outcome = self.cycle(options).await;
        self.finish_cycle(options.feedback, &outcome);
        outcome
    }

    fn finish_cycle(&self, feedback: Feedback, outcome: &Result<SyncReport>) {
        match outcome {
            Ok(report) => {
                tracing::info!(
                    ?feedback,
                    mode = ?report.mode,
                    delivered = report.flush.delivered,
                    added = report.result.added,
                    conflicts = report.result.conflicts.len(),
                    deleted_remote = report.result.deleted_remote,
                    recovered = report.recovered,
                    "Sync completed"
                );
                self.emit(SyncEvent::Completed {
                    feedback,
                    report: report.clone(),
                });
            }
            Err(SyncError::Unauthorized) => {
                tracing::error!(?feedback, "Sync failed: remote refused the token");
                self.emit(SyncEvent::Failed {
                    feedback,
                    error: SyncError::Unauthorized,
                });
            }
            Err(err) => {
                tracing::warn!(?feedback, error = %err, "Sync failed");
                self.emit(SyncEvent::Failed {
                    feedback,
                    error: err.clone(),
                });
            }
        }
        self.publish_notices();
        tracing::debug!(phase = %SyncPhase::Idle);
    }

    async fn cycle(self: &Arc<Self>, options: SyncOptions) -> Result<SyncReport> {
        let flush = self.flush().await?;
        if flush.is_unauthorized() {
            return Err(SyncError::Unauthorized);
        }

        let metadata = self.with_store(|store| store.load_metadata(Sheet::History));
        if options.feedback == Feedback::Silent
            && !options.force_full
            && self.remote_unchanged(&metadata).await?
        {
            tracing::debug!("Remote unchanged, skipping fetch");
            return Ok(SyncReport {
                flush,
                ..SyncReport::default()
            });
        }

        let full = options.force_full || metadata.needs_full_fetch();
        let updated_after = if full { None } else { metadata.watermark_param() };
        tracing::debug!(phase = %SyncPhase::Fetching, full, updated_after = ?updated_after);
        let mut remote = self.remote.fetch_history(updated_after.as_deref()).await?;

        if remote.mode == FetchMode::Delta {
            let now = self.clock.now();
            // a corrupt state is handled by the merge step below
            let refetch = self.with_store(|store| {
                store.load_sync_state(now).is_ok_and(|state| {
                    needs_full_refetch(&remote, &state.history, &state.outbox, &state.tombstones)
                })
            });
            if refetch {
                tracing::debug!("Delta names unknown ids, fetching in full");
                remote = self.remote.fetch_history(None).await?;
            }
        }

        let mode = remote.mode;
        let now = self.clock.now();
        let reconciled = self.with_store(|store| {
            let state = store.load_sync_state(now)?;
            let output = reconcile::reconcile(ReconcileInput {
                local: state.history,
                remote,
                outbox: &state.outbox,
                tombstones: state.tombstones,
                metadata: state.metadata,
                now,
            });
            tracing::debug!(phase = %SyncPhase::Persisting, records = output.history.len());
            store.apply_reconcile(&output);
            Ok::<_, staysharp_engine::Error>(output.result)
        });

        match reconciled {
            Ok(result) => Ok(SyncReport {
                flush,
                mode: Some(mode),
                result,
                recovered: false,
            }),
            Err(err) if err.requires_recovery() => {
                tracing::warn!(error = %err, "Local state is corrupt, rebuilding from remote");
                let report = self.recover_state().await?;
                Ok(SyncReport { flush, ..report })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Ask the remote whether anything changed since the last cycle. A
    /// failing probe counts as "changed".
    async fn remote_unchanged(&self, metadata: &SyncMetadata) -> Result<bool> {
        if metadata.needs_full_fetch() {
            return Ok(false);
        }
        match self.remote.fetch_meta(Sheet::History).await {
            Ok(meta) => Ok(metadata.is_current(meta.updated_at, meta.row_count)),
            Err(SyncError::Unauthorized) => Err(SyncError::Unauthorized),
            Err(err) => {
                tracing::debug!(error = %err, "Staleness probe failed, fetching");
                Ok(false)
            }
        }
    }

    async fn recover_state(&self) -> Result<SyncReport> {
        tracing::debug!(phase = %SyncPhase::Fetching, full = true, "Recovering");
        let remote = self.remote.fetch_history(None).await?;
        let now = self.clock.now();

        let result = self.with_store(|store| {
            store.reset_sync_state();
            let outbox = Outbox::new();
            let output = reconcile::reconcile(ReconcileInput {
                local: Vec::new(),
                remote,
                outbox: &outbox,
                tombstones: TombstoneLedger::default(),
                metadata: SyncMetadata::default(),
                now,
            });
            tracing::debug!(phase = %SyncPhase::Persisting, records = output.history.len());
            store.apply_reconcile(&output);
            output.result
        });

        Ok(SyncReport {
            flush: FlushReport::default(),
            mode: Some(FetchMode::Full),
            result,
            recovered: true,
        })
    }
}
