//! HTTP implementation of [`Remote`].

use super::protocol::{self, PushRequest, RemoteMeta};
use super::Remote;
use crate::config::Config;
use crate::error::{Result, SyncError};
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, StatusCode};
use staysharp_engine::{KnifeRecord, OutboxEntry, RemoteSnapshot, Sheet};
use std::time::Duration;

/// Client for the spreadsheet endpoint.
#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    get_timeout: Duration,
    post_timeout: Duration,
}

impl RemoteClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
            get_timeout: config.get_timeout,
            post_timeout: config.post_timeout,
        })
    }

    /// Query parameters every request carries.
    fn base_query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("token", self.token.clone()),
            ("_t", chrono::Utc::now().timestamp_millis().to_string()),
        ]
    }

    async fn get(&self, sheet: Sheet, extra: &[(&'static str, String)]) -> Result<String> {
        let mut query = self.base_query();
        query.push(("sheet", sheet.to_string()));
        query.extend(extra.iter().cloned());

        let request = self
            .http
            .get(&self.endpoint)
            .bearer_auth(&self.token)
            .query(&query);
        let (status, body) = exchange(request, self.get_timeout).await?;
        check_read_status(status)?;
        Ok(body)
    }
}

impl Remote for RemoteClient {
    async fn fetch_history(&self, updated_after: Option<&str>) -> Result<RemoteSnapshot> {
        let extra: Vec<_> = updated_after
            .map(|at| ("updatedAfter", at.to_string()))
            .into_iter()
            .collect();
        let body = self.get(Sheet::History, &extra).await?;
        let snapshot = protocol::parse_history_response(&body, updated_after.is_some())?;
        tracing::debug!(
            mode = ?snapshot.mode,
            records = snapshot.records.len(),
            "Fetched history"
        );
        Ok(snapshot)
    }

    async fn fetch_database(&self) -> Result<Vec<KnifeRecord>> {
        let body = self.get(Sheet::Database, &[]).await?;
        protocol::parse_database_response(&body)
    }

    async fn fetch_meta(&self, sheet: Sheet) -> Result<RemoteMeta> {
        let body = self.get(sheet, &[("meta", "1".to_string())]).await?;
        protocol::parse_meta_response(&body)
    }

    async fn push(&self, entry: &OutboxEntry) -> Result<()> {
        let payload = serde_json::to_string(&PushRequest {
            token: &self.token,
            sheet: entry.sheet,
            action: entry.action,
            record: &entry.record,
        })
        .map_err(|e| SyncError::UnexpectedResponse(e.to_string()))?;

        let request = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .query(&self.base_query())
            .header(CONTENT_TYPE, "text/plain;charset=utf-8")
            .body(payload);
        let (status, body) = exchange(request, self.post_timeout).await?;
        protocol::classify_push_response(status.as_u16(), &body)
    }
}

/// Send a request and read its body, all within `limit`.
async fn exchange(request: RequestBuilder, limit: Duration) -> Result<(StatusCode, String)> {
    let round_trip = async {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok::<_, SyncError>((status, body))
    };
    tokio::time::timeout(limit, round_trip)
        .await
        .map_err(|_| SyncError::Timeout(limit))?
}

fn check_read_status(status: StatusCode) -> Result<()> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::Unauthorized),
        s if s.is_server_error() => Err(SyncError::Network(format!("HTTP {s}"))),
        s if s.is_client_error() => Err(SyncError::Rejected(format!("HTTP {s}"))),
        _ => Ok(()),
    }
}
