//! # StaySharp Sync
//!
//! The async shell around `staysharp-engine`: talks to the spreadsheet
//! endpoint, flushes the outbox, runs reconciliation cycles and schedules
//! them.
//!
//! ```text
//! Trigger ──> Scheduler ──> SyncService ──> Remote (HTTP)
//!                               │
//!                               └──> Store (engine) ──> FileBackend
//! ```

pub mod config;
pub mod error;
pub mod remote;
pub mod scheduler;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use error::{Result, SyncError};
pub use remote::{Remote, RemoteClient, RemoteMeta};
pub use scheduler::{Scheduler, SchedulerHandle, Trigger};
pub use storage::FileBackend;
pub use sync::{Feedback, FlushReport, SyncEvent, SyncOptions, SyncReport, SyncService};
