//! Wire format of the spreadsheet endpoint.
//!
//! Reads answer either a bare JSON array of rows (full snapshot) or an object
//! `{records, cloudIds, lastUpdatedAt, mode}` (delta). Writes answer plain
//! text or JSON that has to be classified: the endpoint reports most
//! failures with a 200 status.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use staysharp_engine::normalize::{sanitize_history, sanitize_knives, value_to_text};
use staysharp_engine::{
    clock, Action, HistoryRecord, KnifeRecord, RemoteSnapshot, Sheet, Timestamp,
};

/// Longest body excerpt carried in an error.
const EXCERPT_LEN: usize = 120;

/// Body of a write request.
#[derive(Debug, Serialize)]
pub struct PushRequest<'a> {
    pub token: &'a str,
    pub sheet: Sheet,
    pub action: Action,
    pub record: &'a HistoryRecord,
}

/// Any read answer.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReadResponse {
    Rows(Vec<Value>),
    Failure(ErrorBody),
    Delta(DeltaBody),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeltaBody {
    records: Vec<Value>,
    #[serde(default)]
    cloud_ids: Option<Vec<Value>>,
    #[serde(default)]
    last_updated_at: Option<String>,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaBody {
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    row_count: Option<u64>,
}

/// Answer of the `?meta=1` staleness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteMeta {
    pub updated_at: Option<Timestamp>,
    pub row_count: usize,
}

/// Classify the answer to a write.
pub fn classify_push_response(status: u16, body: &str) -> Result<()> {
    let body = body.trim();
    if body.starts_with("Success") {
        return Ok(());
    }
    if status == 401 || status == 403 || body.contains("Unauthorized") {
        return Err(SyncError::Unauthorized);
    }
    if body.starts_with("Error") {
        return Err(SyncError::Rejected(excerpt(body)));
    }
    if let Ok(ErrorBody { error }) = serde_json::from_str::<ErrorBody>(body) {
        return Err(SyncError::Rejected(error_text(&error)));
    }
    Err(SyncError::UnexpectedResponse(excerpt(body)))
}

/// Parse the answer to a History read. `requested_delta` decides the mode
/// of an object answer that does not state one.
pub fn parse_history_response(body: &str, requested_delta: bool) -> Result<RemoteSnapshot> {
    match parse_read(body)? {
        ReadResponse::Rows(rows) => Ok(RemoteSnapshot::full(sanitize_history(&rows))),
        ReadResponse::Failure(failure) => Err(read_failure(&failure.error)),
        ReadResponse::Delta(delta) => {
            let records = sanitize_history(&delta.records);
            let last_updated_at = delta
                .last_updated_at
                .as_deref()
                .and_then(clock::parse_instant);
            let is_delta = match delta.mode.as_deref() {
                Some(mode) => mode.eq_ignore_ascii_case("delta"),
                None => requested_delta,
            };

            if !is_delta {
                return Ok(RemoteSnapshot::full(records).with_last_updated_at(last_updated_at));
            }
            let remote_ids = delta
                .cloud_ids
                .map(|ids| ids.iter().filter_map(value_to_text).collect());
            Ok(RemoteSnapshot::delta(records, remote_ids, last_updated_at))
        }
    }
}

/// Parse the answer to a Database (catalog) read.
pub fn parse_database_response(body: &str) -> Result<Vec<KnifeRecord>> {
    match parse_read(body)? {
        ReadResponse::Rows(rows) => Ok(sanitize_knives(&rows)),
        ReadResponse::Delta(delta) => Ok(sanitize_knives(&delta.records)),
        ReadResponse::Failure(failure) => Err(read_failure(&failure.error)),
    }
}

/// Parse the answer to a staleness probe.
pub fn parse_meta_response(body: &str) -> Result<RemoteMeta> {
    if let Ok(ErrorBody { error }) = serde_json::from_str::<ErrorBody>(body) {
        return Err(read_failure(&error));
    }
    let meta: MetaBody = serde_json::from_str(body)
        .map_err(|_| unreadable(body))?;
    Ok(RemoteMeta {
        updated_at: meta.updated_at.as_deref().and_then(clock::parse_instant),
        row_count: meta.row_count.unwrap_or_default() as usize,
    })
}

fn parse_read(body: &str) -> Result<ReadResponse> {
    serde_json::from_str(body).map_err(|_| unreadable(body))
}

/// A read body that is not JSON may still be a plain-text refusal.
fn unreadable(body: &str) -> SyncError {
    let body = body.trim();
    if body.contains("Unauthorized") {
        SyncError::Unauthorized
    } else if body.starts_with("Error") {
        SyncError::Rejected(excerpt(body))
    } else {
        SyncError::UnexpectedResponse(excerpt(body))
    }
}

fn read_failure(error: &Value) -> SyncError {
    let text = error_text(error);
    if text.contains("Unauthorized") {
        SyncError::Unauthorized
    } else {
        SyncError::Rejected(text)
    }
}

fn error_text(error: &Value) -> String {
    value_to_text(error).unwrap_or_else(|| error.to_string())
}

fn excerpt(body: &str) -> String {
    match body.char_indices().nth(EXCERPT_LEN) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use staysharp_engine::FetchMode;

    #[test]
    fn push_classification() {
        assert!(classify_push_response(200, "Success").is_ok());
        assert!(classify_push_response(200, "  Success: row 12 updated\n").is_ok());
        assert!(matches!(
            classify_push_response(200, "Error: Unauthorized token"),
            Err(SyncError::Unauthorized)
        ));
        assert!(matches!(
            classify_push_response(401, ""),
            Err(SyncError::Unauthorized)
        ));
        assert!(matches!(
            classify_push_response(200, "Error: sheet is locked"),
            Err(SyncError::Rejected(msg)) if msg == "Error: sheet is locked"
        ));
        assert!(matches!(
            classify_push_response(200, r#"{"error": "Record not found"}"#),
            Err(SyncError::Rejected(msg)) if msg == "Record not found"
        ));
        assert!(matches!(
            classify_push_response(200, "<!DOCTYPE html><html>"),
            Err(SyncError::UnexpectedResponse(_))
        ));
        assert!(matches!(
            classify_push_response(200, r#"{"ok": true}"#),
            Err(SyncError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn legacy_array_is_full_snapshot() {
        let body = r#"[{"ID": 1, "Brand": "Tormek"}, {"Brand": ""}, "junk"]"#;
        let snapshot = parse_history_response(body, true).unwrap();

        assert_eq!(snapshot.mode, FetchMode::Full);
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.remote_ids.unwrap().len(), 1);
    }

    #[test]
    fn delta_object() {
        let body = r#"{
            "records": [{"id": "n1", "brand": "Mora", "updatedAt": "2024-03-02T00:00:00Z"}],
            "cloudIds": ["a", "n1", 1709251200000],
            "lastUpdatedAt": "2024-03-02T00:00:00Z",
            "mode": "delta"
        }"#;
        let snapshot = parse_history_response(body, true).unwrap();

        assert_eq!(snapshot.mode, FetchMode::Delta);
        let ids = snapshot.remote_ids.unwrap();
        assert!(ids.contains("a"));
        assert!(ids.contains("1709251200000"));
        assert!(snapshot.last_updated_at.is_some());
    }

    #[test]
    fn delta_without_ids_and_unstated_mode() {
        let body = r#"{"records": []}"#;
        let delta = parse_history_response(body, true).unwrap();
        assert_eq!(delta.mode, FetchMode::Delta);
        assert!(delta.remote_ids.is_none());

        let full = parse_history_response(body, false).unwrap();
        assert_eq!(full.mode, FetchMode::Full);
        assert_eq!(full.remote_ids, Some(Default::default()));
    }

    #[test]
    fn read_errors() {
        assert!(matches!(
            parse_history_response(r#"{"error": "Unauthorized"}"#, false),
            Err(SyncError::Unauthorized)
        ));
        assert!(matches!(
            parse_history_response(r#"{"error": "Sheet missing"}"#, false),
            Err(SyncError::Rejected(_))
        ));
        assert!(matches!(
            parse_history_response("Unauthorized", false),
            Err(SyncError::Unauthorized)
        ));
        assert!(matches!(
            parse_history_response("{}", false),
            Err(SyncError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn database_rows() {
        let knives =
            parse_database_response(r#"[{"Brand": "Global", "Category": "premium_quality"}]"#)
                .unwrap();
        assert_eq!(knives.len(), 1);
        assert_eq!(knives[0].brand, "Global");
    }

    #[test]
    fn meta_probe() {
        let meta = parse_meta_response(r#"{"updatedAt": "2024-03-01T00:00:00Z", "rowCount": 12}"#)
            .unwrap();
        assert_eq!(meta.row_count, 12);
        assert!(meta.updated_at.is_some());

        assert!(matches!(
            parse_meta_response("nope"),
            Err(SyncError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn push_request_shape() {
        let record = HistoryRecord {
            id: "x1".into(),
            brand: "Tormek".into(),
            ..HistoryRecord::default()
        };
        let body = serde_json::to_value(PushRequest {
            token: "t",
            sheet: Sheet::History,
            action: Action::Add,
            record: &record,
        })
        .unwrap();
        assert_eq!(body["sheet"], "History");
        assert_eq!(body["action"], "add");
        assert_eq!(body["record"]["id"], "x1");
        assert_eq!(body["token"], "t");
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(500);
        match classify_push_response(200, &body) {
            Err(SyncError::UnexpectedResponse(msg)) => assert_eq!(msg.len(), EXCERPT_LEN + 3),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
