//! Access to the remote spreadsheet store.

mod client;
pub mod protocol;

pub use client::RemoteClient;
pub use protocol::RemoteMeta;

use crate::error::Result;
use staysharp_engine::{KnifeRecord, OutboxEntry, RemoteSnapshot, Sheet};
use std::future::Future;

/// The remote store as the sync service sees it.
pub trait Remote: Send + Sync + 'static {
    /// Read the History sheet, as a delta when `updated_after` is given.
    fn fetch_history(
        &self,
        updated_after: Option<&str>,
    ) -> impl Future<Output = Result<RemoteSnapshot>> + Send;

    /// Read the whole knife catalog.
    fn fetch_database(&self) -> impl Future<Output = Result<Vec<KnifeRecord>>> + Send;

    /// Cheap staleness probe for a sheet.
    fn fetch_meta(&self, sheet: Sheet) -> impl Future<Output = Result<RemoteMeta>> + Send;

    /// Deliver one outbox entry. `Ok` only on explicit confirmation.
    fn push(&self, entry: &OutboxEntry) -> impl Future<Output = Result<()>> + Send;
}
