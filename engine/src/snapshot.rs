//! Cached knife catalog.
//!
//! The catalog is replaced wholesale, either from bundled defaults or from a
//! remote fetch. It is persisted as a versioned, schema-tagged document so
//! that a cache written by an incompatible build is ignored instead of
//! misread.

use crate::{error::Result, normalize, Error, KnifeRecord, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version of the persisted catalog format.
pub const CATALOG_FORMAT_VERSION: u32 = 2;

/// Tag identifying the knife field layout.
pub const CATALOG_SCHEMA: &str = "staysharp.knife";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Field layout tag
    pub schema: String,
    /// When the catalog was fetched; `None` for bundled defaults
    #[serde(default)]
    pub fetched_at: Option<Timestamp>,
    #[serde(default)]
    pub knives: Vec<KnifeRecord>,
}

impl CatalogSnapshot {
    pub fn new(knives: Vec<KnifeRecord>, fetched_at: Option<Timestamp>) -> Self {
        Self {
            format_version: CATALOG_FORMAT_VERSION,
            schema: CATALOG_SCHEMA.to_string(),
            fetched_at,
            knives,
        }
    }

    /// Build from loosely-shaped catalog rows, dropping non-objects.
    pub fn from_rows(rows: &[Value], fetched_at: Option<Timestamp>) -> Self {
        Self::new(normalize::sanitize_knives(rows), fetched_at)
    }

    pub fn len(&self) -> usize {
        self.knives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.knives.is_empty()
    }

    /// Whether the catalog came from the remote rather than bundled defaults.
    pub fn is_remote(&self) -> bool {
        self.fetched_at.is_some()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize, rejecting snapshots from a newer format or a different
    /// field layout.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > CATALOG_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported catalog format version: {} (max supported: {})",
                snapshot.format_version, CATALOG_FORMAT_VERSION
            )));
        }
        if snapshot.schema != CATALOG_SCHEMA {
            return Err(Error::InvalidSnapshot(format!(
                "unexpected catalog schema: {}",
                snapshot.schema
            )));
        }

        Ok(snapshot)
    }
}
