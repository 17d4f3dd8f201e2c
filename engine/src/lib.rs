//! # StaySharp Engine
//!
//! The deterministic core of an offline-first sharpening log.
//!
//! This crate holds everything about synchronization that does not touch the
//! network: record shapes, normalization of loosely-typed spreadsheet rows,
//! the outbox of pending mutations, the tombstone ledger, per-sheet sync
//! metadata and the reconciliation that merges a remote snapshot into the
//! local history.
//!
//! ## Design Principles
//!
//! - **No network, no async**: the I/O shell lives in `staysharp-sync`
//! - **Deterministic**: "now" is always an argument, never read implicitly
//! - **Never loses a mutation**: local edits reach the outbox in the same
//!   step that changes the history
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! [`HistoryRecord`] is a logged sharpening session with a client-generated
//! id and an `updated_at` instant. [`KnifeRecord`] is a catalog entry with no
//! id, replaced wholesale.
//!
//! ### Outbox
//!
//! Mutations are queued as [`OutboxEntry`] values and compacted so that at
//! most one entry exists per record:
//! - `delete` supersedes anything before it
//! - `add` then `update` stays an `add`
//! - `delete` then `add`/`update` becomes an `add`
//!
//! ### Reconciliation
//!
//! [`reconcile::reconcile`] merges local and remote records last-writer-wins,
//! suppresses records the [`TombstoneLedger`] marks as deleted, and detects
//! deletions made on other devices by diffing remote id sets.
//!
//! ## Quick Start
//!
//! ```rust
//! use staysharp_engine::{HistoryDraft, Store};
//! use chrono::Utc;
//!
//! let mut store = Store::in_memory();
//! let draft = HistoryDraft {
//!     brand: "Tormek".into(),
//!     angle: "30".into(),
//!     ..HistoryDraft::default()
//! };
//!
//! let record = store.create_record(&draft, Utc::now()).unwrap();
//! assert_eq!(store.load_history(), vec![record]);
//! assert_eq!(store.load_outbox().len(), 1);
//! ```

pub mod clock;
pub mod error;
pub mod metadata;
pub mod normalize;
pub mod outbox;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod tombstone;

// Re-export main types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::Error;
pub use metadata::SyncMetadata;
pub use outbox::{Action, Outbox, OutboxEntry, Sheet};
pub use reconcile::{
    FetchMode, ReconcileInput, ReconcileOutput, ReconcileResult, Reconciler, RemoteSnapshot,
    SyncPhase,
};
pub use record::{HistoryDraft, HistoryRecord, KnifeRecord, Quality};
pub use snapshot::{CatalogSnapshot, CATALOG_FORMAT_VERSION};
pub use storage::{Backend, BackendError, DurableStore, MemoryBackend};
pub use store::{Notice, Store, SyncState};
pub use tombstone::TombstoneLedger;

/// Type aliases for clarity
pub type RecordId = String;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
